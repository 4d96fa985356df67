//! Stock locations, stock items and movements (spec component C4, §3/§4.3).

use async_graphql::{Enum, SimpleObject};
use bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{StockItemId, StockLocationId, StockMovementId, VariantId};

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct StockLocation {
    #[graphql(skip)]
    pub _id: StockLocationId,
    pub internal_name: String,
    pub presentation_name: String,
    pub active: bool,
    pub is_default: bool,
    pub address_street: String,
    pub address_city: String,
    pub address_country_code: String,
    pub row_version: u64,
}

#[async_graphql::ComplexObject]
impl StockLocation {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}

impl StockLocation {
    pub fn new(internal_name: String, presentation_name: String, is_default: bool) -> Self {
        Self {
            _id: StockLocationId::new(),
            internal_name,
            presentation_name,
            active: true,
            is_default,
            address_street: String::new(),
            address_city: String::new(),
            address_country_code: String::new(),
            row_version: 0,
        }
    }
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct StockItem {
    #[graphql(skip)]
    pub _id: StockItemId,
    pub variant_id: VariantId,
    pub stock_location_id: StockLocationId,
    pub sku: String,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub backorderable: bool,
    pub backorder_limit: u32,
    pub row_version: u64,
}

#[async_graphql::ComplexObject]
impl StockItem {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }

    async fn count_available(&self) -> i64 {
        self.count_available()
    }

    async fn in_stock(&self) -> bool {
        self.in_stock()
    }
}

impl StockItem {
    pub fn new(variant_id: VariantId, stock_location_id: StockLocationId, sku: String) -> Self {
        Self {
            _id: StockItemId::new(),
            variant_id,
            stock_location_id,
            sku,
            quantity_on_hand: 0,
            quantity_reserved: 0,
            backorderable: false,
            backorder_limit: 0,
            row_version: 0,
        }
    }

    /// `max(0, on_hand - reserved) + (backorderable ? backorder_limit : 0)`.
    pub fn count_available(&self) -> i64 {
        let unreserved = (self.quantity_on_hand - self.quantity_reserved).max(0);
        unreserved + if self.backorderable { self.backorder_limit as i64 } else { 0 }
    }

    pub fn in_stock(&self) -> bool {
        self.count_available() > 0
    }

    /// How much of a requested reservation would overage into backorder
    /// territory, given current counters.
    pub fn backorder_overage(&self, requested: i64) -> i64 {
        let headroom = (self.quantity_on_hand - self.quantity_reserved).max(0);
        (requested - headroom).max(0)
    }
}

/// Who/what caused a stock movement (spec §3 `originator`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Originator {
    Order(bson::Uuid),
    Shipment(bson::Uuid),
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, Serialize, Deserialize)]
pub enum MovementAction {
    Adjust,
    Reserve,
    Release,
    Transfer,
    Receive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub _id: StockMovementId,
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub originator: Originator,
    pub action: MovementAction,
    pub reason: Option<String>,
    pub created_at: BsonDateTime,
    /// Links the two legs of a `Transfer` (the source `Adjust(-q)` and
    /// destination `Adjust(+q)`/`Receive(q)`) under one id, per spec §4.3.
    pub transfer_id: Option<bson::Uuid>,
}

impl StockMovement {
    pub fn new(
        stock_item_id: StockItemId,
        quantity: i64,
        originator: Originator,
        action: MovementAction,
        reason: Option<String>,
    ) -> Self {
        Self {
            _id: StockMovementId::new(),
            stock_item_id,
            quantity,
            originator,
            action,
            reason,
            created_at: BsonDateTime::now(),
            transfer_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_available_without_backorder() {
        let mut item = StockItem::new(VariantId::new(), StockLocationId::new(), "SKU1".into());
        item.quantity_on_hand = 5;
        item.quantity_reserved = 3;
        assert_eq!(item.count_available(), 2);
    }

    #[test]
    fn count_available_includes_backorder_limit() {
        let mut item = StockItem::new(VariantId::new(), StockLocationId::new(), "SKU1".into());
        item.quantity_on_hand = 1;
        item.quantity_reserved = 1;
        item.backorderable = true;
        item.backorder_limit = 4;
        assert_eq!(item.count_available(), 4);
        assert!(item.in_stock());
    }
}
