//! Wire contract between devices and the server.
//!
//! These tests run without a database; they pin the JSON shapes the apply and
//! fetch endpoints accept and produce.

use ferry_engine::{
    ApplyRequest, ApplyResponse, FetchResponse, IdempotencyKey, Mutation, MutationMeta,
    OperationKind, QueueEntry, StockAdjustment,
};
use serde_json::json;

fn queued(mutation: Mutation) -> QueueEntry {
    QueueEntry::new(
        7,
        mutation,
        "till-1",
        IdempotencyKey::parse("3f1c9a2e-5d6b-4e8f-9a0b-1c2d3e4f5a6b").unwrap(),
        1_706_745_600_000,
    )
}

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn apply_request_field_names() {
        let entry = queued(Mutation::insert("sessions", json!({"id": "s-1", "grams": 18})));
        let json = serde_json::to_value(ApplyRequest::from(&entry)).unwrap();

        assert_eq!(json["table"], "sessions");
        assert_eq!(json["operation"], "insert");
        assert_eq!(json["idempotencyKey"], "3f1c9a2e-5d6b-4e8f-9a0b-1c2d3e4f5a6b");
        assert_eq!(json["userId"], "till-1");
        assert_eq!(json["meta"]["kind"], "none");
    }

    #[test]
    fn meta_defaults_to_none_when_omitted() {
        let request: ApplyRequest = serde_json::from_value(json!({
            "table": "inventory",
            "operation": "delete",
            "payload": {"id": "beans"},
            "idempotencyKey": "k-1",
            "userId": "till-1"
        }))
        .unwrap();

        assert_eq!(request.meta, MutationMeta::None);
        assert!(request.mutation().validate_shape().is_ok());
    }

    #[test]
    fn order_placement_round_trips_through_the_wire() {
        let mutation = Mutation::order_placement(
            "orders",
            json!({"id": "o-1", "total": 12}),
            "order_lines",
            vec![
                json!({"id": "o-1-1", "order_id": "o-1", "quantity": 2}),
                json!({"id": "o-1-2", "order_id": "o-1", "quantity": 1}),
            ],
            vec![StockAdjustment::decrement("inventory", "beans", "quantity", 3)],
        );
        let request = ApplyRequest::from(&queued(mutation.clone()));

        let body = serde_json::to_string(&request).unwrap();
        let parsed: ApplyRequest = serde_json::from_str(&body).unwrap();

        assert_eq!(parsed.operation, OperationKind::Compound);
        assert_eq!(parsed.mutation(), mutation);
        assert_eq!(parsed.mutation().touched_records().len(), 4);
    }

    #[test]
    fn malformed_shapes_are_refused_before_any_write() {
        let request: ApplyRequest = serde_json::from_value(json!({
            "table": "sessions",
            "operation": "compound",
            "payload": {"id": "s-1"},
            "meta": {"kind": "none"},
            "idempotencyKey": "k-2",
            "userId": "till-1"
        }))
        .unwrap();

        assert!(request.mutation().validate_shape().is_err());
    }

    #[test]
    fn apply_responses_are_tagged_by_status() {
        assert_eq!(
            serde_json::to_value(ApplyResponse::Applied).unwrap(),
            json!({"status": "applied"})
        );
        assert_eq!(
            serde_json::to_value(ApplyResponse::AlreadyApplied).unwrap(),
            json!({"status": "already_applied"})
        );
    }

    #[test]
    fn fetch_page_carries_cursor_until_the_end() {
        let page = FetchResponse {
            table: "inventory".into(),
            records: vec![json!({"id": "beans", "quantity": 94})],
            next_cursor: Some("beans".into()),
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["nextCursor"], "beans");

        let last: FetchResponse =
            serde_json::from_value(json!({"table": "inventory", "records": []})).unwrap();
        assert!(last.next_cursor.is_none());
    }
}
