//! Mutation types for expressing intended writes.
//!
//! A mutation is what a domain action hands to the engine: the target table, an
//! operation tag, the primary record and any side-payloads. Side-payloads are a
//! closed set of shapes ([`MutationMeta`]) so that every place that replays a
//! mutation has to handle each shape explicitly.

use crate::{error::Result, Error, RecordId, TableName, PRIMARY_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation tag of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    /// A multi-step business transaction replayed as one unit
    Compound,
}

impl OperationKind {
    /// Stable lowercase name, used for persistence and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Compound => "compound",
        }
    }

    /// Parse the name produced by [`OperationKind::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(OperationKind::Insert),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            "compound" => Some(OperationKind::Compound),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relative change to a numeric counter field.
///
/// The remote applies adjustments in a single atomic statement, so two devices
/// decrementing the same quantity both take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    /// Table holding the counter
    pub table: TableName,
    /// Record whose counter changes
    pub record_id: RecordId,
    /// Counter field name
    pub field: String,
    /// Signed amount to add
    pub delta: i64,
}

impl StockAdjustment {
    /// Create a new adjustment.
    pub fn new(
        table: impl Into<TableName>,
        record_id: impl Into<RecordId>,
        field: impl Into<String>,
        delta: i64,
    ) -> Self {
        Self {
            table: table.into(),
            record_id: record_id.into(),
            field: field.into(),
            delta,
        }
    }

    /// Adjustment that subtracts `amount` from the counter.
    pub fn decrement(
        table: impl Into<TableName>,
        record_id: impl Into<RecordId>,
        field: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self::new(table, record_id, field, -amount)
    }
}

/// Operation-specific side-payloads.
///
/// Replayed in the same remote call as the primary payload, never split into
/// separate queue entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MutationMeta {
    /// Plain insert, update or delete
    #[default]
    None,
    /// Update expressed as an atomic counter change
    Adjust(StockAdjustment),
    /// Create a usage session and deduct the stock it consumed
    #[serde(rename_all = "camelCase")]
    SessionUsage { deductions: Vec<StockAdjustment> },
    /// Create an order, its line records and the stock they consume
    #[serde(rename_all = "camelCase")]
    OrderPlacement {
        line_table: TableName,
        lines: Vec<serde_json::Value>,
        deductions: Vec<StockAdjustment>,
    },
}

impl MutationMeta {
    /// All counter adjustments carried by this meta, in replay order.
    pub fn adjustments(&self) -> &[StockAdjustment] {
        match self {
            MutationMeta::None => &[],
            MutationMeta::Adjust(adjustment) => std::slice::from_ref(adjustment),
            MutationMeta::SessionUsage { deductions } => deductions,
            MutationMeta::OrderPlacement { deductions, .. } => deductions,
        }
    }
}

/// One intended write, before it is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Target table
    pub table: TableName,
    /// Operation tag
    pub operation: OperationKind,
    /// Primary record, carrying its client-generated `id`
    pub payload: serde_json::Value,
    /// Side-payloads
    #[serde(default)]
    pub meta: MutationMeta,
}

impl Mutation {
    /// Create a mutation from its parts.
    pub fn new(
        table: impl Into<TableName>,
        operation: OperationKind,
        payload: serde_json::Value,
        meta: MutationMeta,
    ) -> Self {
        Self {
            table: table.into(),
            operation,
            payload,
            meta,
        }
    }

    /// Insert a new record.
    pub fn insert(table: impl Into<TableName>, payload: serde_json::Value) -> Self {
        Self::new(table, OperationKind::Insert, payload, MutationMeta::None)
    }

    /// Overwrite the fields present in `payload` (last write wins).
    pub fn update(table: impl Into<TableName>, payload: serde_json::Value) -> Self {
        Self::new(table, OperationKind::Update, payload, MutationMeta::None)
    }

    /// Delete a record by id.
    pub fn delete(table: impl Into<TableName>, id: impl Into<RecordId>) -> Self {
        Self::new(
            table,
            OperationKind::Delete,
            id_payload(id.into()),
            MutationMeta::None,
        )
    }

    /// Atomically adjust a counter.
    pub fn adjust(adjustment: StockAdjustment) -> Self {
        Self::new(
            adjustment.table.clone(),
            OperationKind::Update,
            id_payload(adjustment.record_id.clone()),
            MutationMeta::Adjust(adjustment),
        )
    }

    /// Create a session record together with its stock deductions.
    pub fn session_usage(
        table: impl Into<TableName>,
        session: serde_json::Value,
        deductions: Vec<StockAdjustment>,
    ) -> Self {
        Self::new(
            table,
            OperationKind::Compound,
            session,
            MutationMeta::SessionUsage { deductions },
        )
    }

    /// Create an order with its line records and stock deductions.
    pub fn order_placement(
        table: impl Into<TableName>,
        order: serde_json::Value,
        line_table: impl Into<TableName>,
        lines: Vec<serde_json::Value>,
        deductions: Vec<StockAdjustment>,
    ) -> Self {
        Self::new(
            table,
            OperationKind::Compound,
            order,
            MutationMeta::OrderPlacement {
                line_table: line_table.into(),
                lines,
                deductions,
            },
        )
    }

    /// The primary record's id, if the payload carries one.
    pub fn record_id(&self) -> Option<&str> {
        self.payload.get(PRIMARY_KEY).and_then(|v| v.as_str())
    }

    /// Every `(table, id)` this mutation writes, primary record first.
    pub fn touched_records(&self) -> Vec<(TableName, RecordId)> {
        let mut touched = Vec::new();
        if let Some(id) = self.record_id() {
            touched.push((self.table.clone(), id.to_string()));
        }
        if let MutationMeta::OrderPlacement {
            line_table, lines, ..
        } = &self.meta
        {
            for line in lines {
                if let Some(id) = line.get(PRIMARY_KEY).and_then(|v| v.as_str()) {
                    touched.push((line_table.clone(), id.to_string()));
                }
            }
        }
        for adjustment in self.meta.adjustments() {
            let key = (adjustment.table.clone(), adjustment.record_id.clone());
            if !touched.contains(&key) {
                touched.push(key);
            }
        }
        touched
    }

    /// Check that the meta shape matches the operation tag.
    pub fn validate_shape(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::InvalidMeta {
                operation: self.operation,
                reason: reason.to_string(),
            })
        };

        match (&self.operation, &self.meta) {
            (OperationKind::Insert | OperationKind::Delete, MutationMeta::None) => {}
            (OperationKind::Insert | OperationKind::Delete, _) => {
                return invalid("no side-payload allowed");
            }
            (OperationKind::Update, MutationMeta::None) => {}
            (OperationKind::Update, MutationMeta::Adjust(adjustment)) => {
                if adjustment.table != self.table {
                    return invalid("adjustment must target the mutation's table");
                }
                if Some(adjustment.record_id.as_str()) != self.record_id() {
                    return invalid("adjustment must target the payload record");
                }
            }
            (OperationKind::Update, _) => return invalid("only counter adjustments allowed"),
            (OperationKind::Compound, MutationMeta::None | MutationMeta::Adjust(_)) => {
                return invalid("compound requires a compound side-payload");
            }
            (OperationKind::Compound, MutationMeta::SessionUsage { .. }) => {}
            (OperationKind::Compound, MutationMeta::OrderPlacement { lines, .. }) => {
                if lines.is_empty() {
                    return invalid("order placement needs at least one line");
                }
            }
        }

        if self.meta.adjustments().iter().any(|a| a.delta == 0) {
            return invalid("adjustment delta must be non-zero");
        }

        Ok(())
    }

    /// Short human-readable description for operators.
    pub fn describe(&self) -> String {
        let id = self.record_id().unwrap_or("?");
        match &self.meta {
            MutationMeta::None => format!("{} {}/{}", self.operation, self.table, id),
            MutationMeta::Adjust(adjustment) => format!(
                "adjust {}/{} {} by {:+}",
                self.table, id, adjustment.field, adjustment.delta
            ),
            MutationMeta::SessionUsage { deductions } => format!(
                "session usage {}/{} ({} deductions)",
                self.table,
                id,
                deductions.len()
            ),
            MutationMeta::OrderPlacement {
                lines, deductions, ..
            } => format!(
                "order placement {}/{} ({} lines, {} deductions)",
                self.table,
                id,
                lines.len(),
                deductions.len()
            ),
        }
    }
}

/// Payload holding only the primary key.
fn id_payload(id: RecordId) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(PRIMARY_KEY.to_string(), serde_json::Value::String(id));
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deduct(id: &str, grams: i64) -> StockAdjustment {
        StockAdjustment::decrement("inventory", id, "quantity", grams)
    }

    #[test]
    fn operation_kind_names() {
        for kind in [
            OperationKind::Insert,
            OperationKind::Update,
            OperationKind::Delete,
            OperationKind::Compound,
        ] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::parse("upsert"), None);
    }

    #[test]
    fn adjust_builds_update() {
        let m = Mutation::adjust(deduct("item-1", 3));
        assert_eq!(m.operation, OperationKind::Update);
        assert_eq!(m.table, "inventory");
        assert_eq!(m.record_id(), Some("item-1"));
        assert_eq!(m.meta.adjustments()[0].delta, -3);
        assert!(m.validate_shape().is_ok());
    }

    #[test]
    fn delete_carries_primary_key() {
        let m = Mutation::delete("orders", "o-9");
        assert_eq!(m.payload, json!({"id": "o-9"}));
        assert!(m.validate_shape().is_ok());
    }

    #[test]
    fn insert_rejects_side_payload() {
        let mut m = Mutation::insert("sessions", json!({"id": "s-1"}));
        m.meta = MutationMeta::SessionUsage {
            deductions: vec![deduct("item-1", 20)],
        };
        assert!(matches!(
            m.validate_shape(),
            Err(Error::InvalidMeta {
                operation: OperationKind::Insert,
                ..
            })
        ));
    }

    #[test]
    fn compound_requires_compound_meta() {
        let m = Mutation::new(
            "sessions",
            OperationKind::Compound,
            json!({"id": "s-1"}),
            MutationMeta::None,
        );
        assert!(m.validate_shape().is_err());
    }

    #[test]
    fn adjust_must_target_payload_record() {
        let mut m = Mutation::adjust(deduct("item-1", 3));
        m.payload = json!({"id": "item-2"});
        assert!(m.validate_shape().is_err());
    }

    #[test]
    fn zero_delta_rejected() {
        let m = Mutation::session_usage(
            "sessions",
            json!({"id": "s-1", "grams": 0}),
            vec![deduct("item-1", 0)],
        );
        assert!(m.validate_shape().is_err());
    }

    #[test]
    fn order_needs_lines() {
        let m = Mutation::order_placement(
            "orders",
            json!({"id": "o-1"}),
            "order_lines",
            vec![],
            vec![],
        );
        assert!(m.validate_shape().is_err());
    }

    #[test]
    fn touched_records_of_order() {
        let m = Mutation::order_placement(
            "orders",
            json!({"id": "o-1"}),
            "order_lines",
            vec![json!({"id": "l-1"}), json!({"id": "l-2"})],
            vec![deduct("item-1", 2), deduct("item-1", 1)],
        );
        assert_eq!(
            m.touched_records(),
            vec![
                ("orders".to_string(), "o-1".to_string()),
                ("order_lines".to_string(), "l-1".to_string()),
                ("order_lines".to_string(), "l-2".to_string()),
                ("inventory".to_string(), "item-1".to_string()),
            ]
        );
    }

    #[test]
    fn describe_compound() {
        let m = Mutation::session_usage(
            "sessions",
            json!({"id": "s-1", "grams": 20}),
            vec![deduct("item-1", 20), deduct("item-2", 5)],
        );
        assert_eq!(m.describe(), "session usage sessions/s-1 (2 deductions)");

        let m = Mutation::adjust(deduct("item-1", 3));
        assert_eq!(m.describe(), "adjust inventory/item-1 quantity by -3");
    }

    #[test]
    fn meta_serialization_is_tagged() {
        let m = Mutation::session_usage(
            "sessions",
            json!({"id": "s-1"}),
            vec![deduct("item-1", 20)],
        );
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"kind\":\"sessionUsage\""));
        assert!(json.contains("\"recordId\":\"item-1\""));

        let parsed: Mutation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn meta_defaults_to_none() {
        let parsed: Mutation = serde_json::from_str(
            r#"{"table":"orders","operation":"delete","payload":{"id":"o-1"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.meta, MutationMeta::None);
    }
}
