//! Line items and adjustments, owned by their order (spec §3).

use async_graphql::{Enum, SimpleObject};
use bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{AdjustmentId, LineItemId, OrderId, PromotionId, VariantId};

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct LineItem {
    #[graphql(skip)]
    pub _id: LineItemId,
    pub order_id: OrderId,
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Snapshotted at `add_line_item` time; frozen once the order reaches
    /// `Complete` (spec §4.1 "Price capture").
    pub unit_price: i64,
    /// `unit_price * quantity + Σ adjustments`, recomputed by `totals.rs`.
    pub line_total: i64,
    pub weight_snapshot: Option<f64>,
    pub added_at: BsonDateTime,
}

#[async_graphql::ComplexObject]
impl LineItem {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}

impl LineItem {
    pub fn new(order_id: OrderId, variant_id: VariantId, quantity: u32, unit_price: i64) -> Self {
        Self {
            _id: LineItemId::new(),
            order_id,
            variant_id,
            quantity,
            unit_price,
            line_total: unit_price * quantity as i64,
            weight_snapshot: None,
            added_at: BsonDateTime::now(),
        }
    }
}

/// What an `Adjustment` modifies: an order's totals directly, or a single
/// line item's total. Tagged variant per spec's "Polymorphism → tagged
/// variants" design note — no open class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, Serialize, Deserialize)]
pub enum AdjustmentTarget {
    Order,
    LineItem,
}

/// What kind of action produced this row; part of the natural key used for
/// idempotent recomputation (spec §4.2 "Idempotence & natural keys").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, Serialize, Deserialize)]
pub enum AdjustmentActionKind {
    OrderPercentDiscount,
    OrderFlatDiscount,
    LineItemPercentDiscount,
    FreeShipping,
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct Adjustment {
    #[graphql(skip)]
    pub _id: AdjustmentId,
    pub order_id: OrderId,
    pub target: AdjustmentTarget,
    /// The order id (target=Order) or line item id (target=LineItem) this
    /// adjustment applies to.
    pub target_id: bson::Uuid,
    pub action_kind: AdjustmentActionKind,
    pub amount: i64,
    pub description: String,
    pub promotion_id: Option<PromotionId>,
}

#[async_graphql::ComplexObject]
impl Adjustment {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }

    async fn is_promotion(&self) -> bool {
        self.promotion_id.is_some()
    }
}

impl Adjustment {
    /// The natural key recomputation matches against to decide
    /// replace-vs-append, per spec §4.2.
    pub fn natural_key(&self) -> (bson::Uuid, Option<PromotionId>, AdjustmentActionKind) {
        (self.target_id, self.promotion_id, self.action_kind)
    }

    pub fn new(
        order_id: OrderId,
        target: AdjustmentTarget,
        target_id: bson::Uuid,
        action_kind: AdjustmentActionKind,
        amount: i64,
        description: impl Into<String>,
        promotion_id: Option<PromotionId>,
    ) -> Self {
        Self {
            _id: AdjustmentId::new(),
            order_id,
            target,
            target_id,
            action_kind,
            amount,
            description: description.into(),
            promotion_id,
        }
    }
}
