//! Append-only order audit trail (spec §3 `OrderHistory`), always written
//! from the outbox drain step regardless of subscriber presence (§4.5).

use async_graphql::SimpleObject;
use bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{OrderHistoryId, OrderId, UserId};
use crate::order::model::OrderStatus;

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct OrderHistory {
    #[graphql(skip)]
    pub _id: OrderHistoryId,
    pub order_id: OrderId,
    pub from_state: Option<OrderStatus>,
    pub to_state: OrderStatus,
    pub description: String,
    /// `None` means the system itself triggered the transition (e.g. a
    /// webhook-driven advance), as opposed to an authenticated actor.
    pub triggered_by: Option<UserId>,
    pub context: Option<String>,
    pub created_at: BsonDateTime,
}

#[async_graphql::ComplexObject]
impl OrderHistory {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}

impl OrderHistory {
    pub fn new(
        order_id: OrderId,
        from_state: Option<OrderStatus>,
        to_state: OrderStatus,
        description: impl Into<String>,
        triggered_by: Option<UserId>,
    ) -> Self {
        Self {
            _id: OrderHistoryId::new(),
            order_id,
            from_state,
            to_state,
            description: description.into(),
            triggered_by,
            context: None,
            created_at: BsonDateTime::now(),
        }
    }
}
