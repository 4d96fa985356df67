//! Shipments and inventory units (spec component C7, §3/§4.3).

use async_graphql::{Enum, SimpleObject};
use bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{InventoryUnitId, LineItemId, OrderId, ShipmentId, StockLocationId, VariantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, Serialize, Deserialize)]
pub enum ShipmentStatus {
    Pending,
    Ready,
    Shipped,
    Delivered,
    Canceled,
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct Shipment {
    #[graphql(skip)]
    pub _id: ShipmentId,
    pub order_id: OrderId,
    pub number: String,
    pub status: ShipmentStatus,
    pub stock_location_id: StockLocationId,
    pub shipment_method_id: Option<bson::Uuid>,
    pub tracking_number: Option<String>,
    pub cost: i64,
    pub ready_at: Option<BsonDateTime>,
    pub shipped_at: Option<BsonDateTime>,
    pub delivered_at: Option<BsonDateTime>,
    pub canceled_at: Option<BsonDateTime>,
    pub row_version: u64,
}

#[async_graphql::ComplexObject]
impl Shipment {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}

impl Shipment {
    pub fn new(order_id: OrderId, number: String, stock_location_id: StockLocationId, cost: i64) -> Self {
        Self {
            _id: ShipmentId::new(),
            order_id,
            number,
            status: ShipmentStatus::Pending,
            stock_location_id,
            shipment_method_id: None,
            tracking_number: None,
            cost,
            ready_at: None,
            shipped_at: None,
            delivered_at: None,
            canceled_at: None,
            row_version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, Serialize, Deserialize)]
pub enum InventoryUnitStatus {
    OnHand,
    Backordered,
    Shipped,
    Returned,
    Canceled,
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct InventoryUnit {
    #[graphql(skip)]
    pub _id: InventoryUnitId,
    pub variant_id: VariantId,
    pub line_item_id: LineItemId,
    pub shipment_id: Option<ShipmentId>,
    pub status: InventoryUnitStatus,
    pub state_changed_at: BsonDateTime,
}

#[async_graphql::ComplexObject]
impl InventoryUnit {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}

impl InventoryUnit {
    pub fn new(variant_id: VariantId, line_item_id: LineItemId, status: InventoryUnitStatus) -> Self {
        Self {
            _id: InventoryUnitId::new(),
            variant_id,
            line_item_id,
            shipment_id: None,
            status,
            state_changed_at: BsonDateTime::now(),
        }
    }
}
