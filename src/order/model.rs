//! Order aggregate root (spec component C6, §3/§4.1).

use async_graphql::{Enum, SimpleObject};
use bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{OrderId, PromotionId, UserId};
use crate::money::CurrencyCode;

/// The checkout state machine's states, in the order spec §4.1 lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum OrderStatus {
    Cart,
    Address,
    Delivery,
    Payment,
    Confirm,
    Complete,
    Canceled,
    AwaitingReturn,
    Returned,
}

impl OrderStatus {
    pub fn is_terminal_for_cancel(&self) -> bool {
        matches!(self, OrderStatus::Canceled | OrderStatus::Returned)
    }
}

/// A postal address captured at the Address phase.
#[derive(Debug, Clone, PartialEq, Eq, SimpleObject, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country_code: String,
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct Order {
    #[graphql(skip)]
    pub _id: OrderId,
    /// Unique, human-readable order number, e.g. `R100000123`.
    pub number: String,
    pub user_id: Option<UserId>,
    /// Opaque session token identifying a guest cart when `user_id` is unset.
    pub adhoc_customer_id: Option<String>,
    pub status: OrderStatus,
    pub currency: CurrencyCode,
    pub item_total: i64,
    pub shipment_total: i64,
    pub adjustment_total: i64,
    pub grand_total: i64,
    pub promotion_id: Option<PromotionId>,
    pub promo_code: Option<String>,
    pub email: Option<String>,
    pub special_instructions: Option<String>,
    pub shipping_address: Option<Address>,
    pub completed_at: Option<BsonDateTime>,
    pub canceled_at: Option<BsonDateTime>,
    pub row_version: u64,
}

#[async_graphql::ComplexObject]
impl Order {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}

impl Order {
    pub fn new_cart(number: String, user_id: Option<UserId>, adhoc_customer_id: Option<String>, currency: CurrencyCode) -> Self {
        Self {
            _id: OrderId::new(),
            number,
            user_id,
            adhoc_customer_id,
            status: OrderStatus::Cart,
            currency,
            item_total: 0,
            shipment_total: 0,
            adjustment_total: 0,
            grand_total: 0,
            promotion_id: None,
            promo_code: None,
            email: None,
            special_instructions: None,
            shipping_address: None,
            completed_at: None,
            canceled_at: None,
            row_version: 0,
        }
    }

    pub fn id(&self) -> OrderId {
        self._id
    }

    /// Wraps a minor-unit amount in this order's currency, for arithmetic
    /// that needs a `Money` value (e.g. the promotion engine's rational
    /// percentage math).
    pub fn money(&self, amount_minor: i64) -> crate::money::Money {
        crate::money::Money::new(amount_minor, self.currency)
    }
}
