//! Payment aggregate and gateway configuration (spec component C8, §3).

use async_graphql::{Enum, SimpleObject};
use bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{OrderId, PaymentId, PaymentMethodId};
use crate::money::CurrencyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Authorizing,
    Authorized,
    Capturing,
    Completed,
    Void,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, Serialize, Deserialize)]
pub enum PaymentMethodType {
    CashOnDelivery,
    Stripe,
    PayPal,
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct Payment {
    #[graphql(skip)]
    pub _id: PaymentId,
    pub order_id: OrderId,
    pub amount: i64,
    pub currency: CurrencyCode,
    pub status: PaymentStatus,
    pub payment_method_id: PaymentMethodId,
    pub payment_method_type: PaymentMethodType,
    pub provider_reference_id: Option<String>,
    pub gateway_auth_code: Option<String>,
    pub gateway_error_code: Option<String>,
    pub failure_reason: Option<String>,
    pub authorized_at: Option<BsonDateTime>,
    pub captured_at: Option<BsonDateTime>,
    pub voided_at: Option<BsonDateTime>,
    pub idempotency_key: Option<String>,
    pub refunded_amount: i64,
    /// How many dispatch attempts have been made; feeds idempotency-key
    /// derivation (spec §4.4 "Idempotency").
    pub attempt_counter: u32,
    /// Monotonic per-payment counter derived from provider webhook
    /// timestamps; stale webhooks (lower sequence) are ignored (spec §4.4).
    pub last_applied_sequence: i64,
    pub row_version: u64,
}

#[async_graphql::ComplexObject]
impl Payment {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }

    async fn net_captured(&self) -> i64 {
        self.net_captured()
    }
}

impl Payment {
    pub fn new(order_id: OrderId, amount: i64, currency: CurrencyCode, payment_method_id: PaymentMethodId) -> Self {
        Self {
            _id: PaymentId::new(),
            order_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            payment_method_id,
            payment_method_type: PaymentMethodType::CashOnDelivery,
            provider_reference_id: None,
            gateway_auth_code: None,
            gateway_error_code: None,
            failure_reason: None,
            authorized_at: None,
            captured_at: None,
            voided_at: None,
            idempotency_key: None,
            refunded_amount: 0,
            attempt_counter: 0,
            last_applied_sequence: -1,
            row_version: 0,
        }
    }

    /// Net amount still captured against the order (spec §4.1 cancel guard,
    /// §4.4 "Completed -> Refunded").
    pub fn net_captured(&self) -> i64 {
        if self.status == PaymentStatus::Completed {
            self.amount - self.refunded_amount
        } else {
            0
        }
    }

    /// Deterministic idempotency key for the next gateway call, per spec
    /// §4.4: derived from `(payment_id, operation, attempt_counter)`.
    pub fn idempotency_key_for(&self, operation: &str) -> String {
        format!("{}:{}:{}", self._id, operation, self.attempt_counter)
    }
}

#[derive(Debug, Clone, SimpleObject, Serialize, Deserialize)]
#[graphql(complex)]
pub struct PaymentMethod {
    #[graphql(skip)]
    pub _id: PaymentMethodId,
    pub method_type: PaymentMethodType,
    pub active: bool,
    pub auto_capture: bool,
    /// Points at an encrypted credential blob; the orchestrator decrypts
    /// only at dispatch time (spec §4.4 "Credential handling").
    pub gateway_configuration_id: Option<bson::Uuid>,
}

#[async_graphql::ComplexObject]
impl PaymentMethod {
    async fn id(&self) -> async_graphql::ID {
        async_graphql::ID(self._id.to_string())
    }
}

impl PaymentMethod {
    pub fn cash_on_delivery() -> Self {
        Self {
            _id: PaymentMethodId::new(),
            method_type: PaymentMethodType::CashOnDelivery,
            active: true,
            auto_capture: true,
            gateway_configuration_id: None,
        }
    }
}
