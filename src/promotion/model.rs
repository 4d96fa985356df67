//! Promotion, rule and action types (spec component C5, §3).

use async_graphql::SimpleObject;
use bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{PromotionId, TaxonId, UserId, VariantId};

/// Tagged variant over the seven rule kinds spec §3 names. Evaluated with
/// AND semantics (spec §4.2): a promotion is only a candidate once every
/// attached rule is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    UserLoggedIn,
    FirstOrder,
    MinQuantity(u32),
    MinOrderAmount(i64),
    ProductInCart(Vec<VariantId>),
    TaxonInCart(Vec<TaxonId>),
    UserAllowList(Vec<UserId>),
}

/// Which lines a `LineItemPercentDiscount` applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineItemFilter {
    AllLines,
    SpecificTaxons(Vec<TaxonId>),
}

/// Tagged variant over the four action kinds spec §3 names. Every promotion
/// carries exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// `pct` is a percentage expressed as (numerator, denominator), e.g.
    /// 20% = (20, 100), to keep the rational-rounding arithmetic exact.
    OrderPercentDiscount { pct_numerator: i64, pct_denominator: i64 },
    OrderFlatDiscount { amount: i64 },
    LineItemPercentDiscount {
        pct_numerator: i64,
        pct_denominator: i64,
        filter: LineItemFilter,
    },
    FreeShipping,
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct Promotion {
    #[graphql(skip)]
    pub _id: PromotionId,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub min_order_amount: Option<i64>,
    pub max_discount_amount: Option<i64>,
    pub starts_at: Option<BsonDateTime>,
    pub expires_at: Option<BsonDateTime>,
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub active: bool,
    pub requires_code: bool,
    /// Higher sorts first among candidates in the same tier (spec §4.2).
    pub priority: i32,
    pub created_at: BsonDateTime,
    #[graphql(skip)]
    pub action: Action,
    #[graphql(skip)]
    pub rules: Vec<Rule>,
}

#[async_graphql::ComplexObject]
impl Promotion {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}
