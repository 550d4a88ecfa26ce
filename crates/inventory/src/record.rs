use serde::{Deserialize, Serialize};

use stockroom_core::ItemId;

/// Fields a caller supplies on create and update.
///
/// Stored exactly as given: an empty name or a negative quantity is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFields {
    pub name: String,
    pub quantity: i64,
}

impl ItemFields {
    pub fn new(name: impl Into<String>, quantity: i64) -> Self {
        Self {
            name: name.into(),
            quantity,
        }
    }
}

/// A stored inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: ItemId,
    pub name: String,
    pub quantity: i64,
}

impl InventoryRecord {
    pub fn new(id: ItemId, fields: ItemFields) -> Self {
        Self {
            id,
            name: fields.name,
            quantity: fields.quantity,
        }
    }

    /// Overwrite name and quantity; the id is left alone.
    pub fn apply(&mut self, fields: ItemFields) {
        self.name = fields.name;
        self.quantity = fields.quantity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: i64) -> ItemId {
        ItemId::new(v).unwrap()
    }

    #[test]
    fn apply_overwrites_fields_but_keeps_id() {
        let mut rec = InventoryRecord::new(id(3), ItemFields::new("Bolt", 5));
        rec.apply(ItemFields::new("Nut", -2));
        assert_eq!(rec.id, id(3));
        assert_eq!(rec.name, "Nut");
        assert_eq!(rec.quantity, -2);
    }

    #[test]
    fn json_shape_is_flat() {
        let rec = InventoryRecord::new(id(1), ItemFields::new("Widget", 10));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v, serde_json::json!({ "id": 1, "name": "Widget", "quantity": 10 }));
    }

    #[test]
    fn fields_accept_empty_name() {
        let fields: ItemFields = serde_json::from_str(r#"{"name":"","quantity":0}"#).unwrap();
        assert_eq!(fields, ItemFields::new("", 0));
    }
}
