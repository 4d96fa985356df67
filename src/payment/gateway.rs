//! Pluggable gateway processor interface and the process-wide registry
//! (spec §4.3 "Processor interface", §5 "Shared resources").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use ring::hmac;
use serde::Deserialize;
use serde_json::json;

use crate::error::CoreError;
use crate::payment::credentials::{self, GatewayConfiguration};
use crate::payment::model::{Payment, PaymentMethodType};

/// Outcome of dispatching `create_intent` to a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Authorized,
    RequiresAction,
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
pub struct IntentResult {
    pub provider_ref: String,
    pub status: IntentStatus,
    pub auth_code: Option<String>,
}

/// Per-operation gateway timeout (spec §5 "Timeouts": "default 15s").
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

/// The uniform operation set every gateway implements (spec §4.4
/// "Processor interface").
#[async_trait::async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_intent(&self, payment: &Payment, idempotency_key: &str) -> Result<IntentResult, CoreError>;
    async fn capture(&self, payment: &Payment, idempotency_key: &str) -> Result<(), CoreError>;
    async fn refund(&self, payment: &Payment, amount: i64, reason: &str, idempotency_key: &str) -> Result<(), CoreError>;
    async fn void(&self, payment: &Payment, idempotency_key: &str) -> Result<(), CoreError>;
    /// Verifies an HMAC-SHA256 webhook signature against the gateway's
    /// stored secret (spec §4.4 AMBIENT "Gateway HTTP client").
    fn validate_webhook(&self, payload: &[u8], signature: &[u8], secret: &[u8]) -> bool {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        hmac::verify(&key, payload, signature).is_ok()
    }
}

/// Always present, per spec §4.4: returns `Pending` on intent, succeeds on
/// capture/refund/void, and refuses webhook validation (it has no gateway
/// secret to validate against).
pub struct CashOnDeliveryProcessor;

#[async_trait::async_trait]
impl PaymentProcessor for CashOnDeliveryProcessor {
    async fn create_intent(&self, payment: &Payment, _idempotency_key: &str) -> Result<IntentResult, CoreError> {
        Ok(IntentResult {
            provider_ref: format!("cod:{}", payment._id),
            status: IntentStatus::Pending,
            auth_code: None,
        })
    }

    async fn capture(&self, _payment: &Payment, _idempotency_key: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn refund(&self, _payment: &Payment, _amount: i64, _reason: &str, _idempotency_key: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn void(&self, _payment: &Payment, _idempotency_key: &str) -> Result<(), CoreError> {
        Ok(())
    }

    fn validate_webhook(&self, _payload: &[u8], _signature: &[u8], _secret: &[u8]) -> bool {
        false
    }
}

/// A REST-ish card/wallet gateway (Stripe, PayPal, ...) dispatched over
/// HTTP (spec §4.4 "Processor interface"). Credentials are decrypted from
/// `config.sealed_api_key` fresh on every call, never cached in memory
/// beyond the single request (spec §4.4 "Credential handling").
pub struct HttpGatewayProcessor {
    gateway_name: String,
    client: reqwest::Client,
    config: GatewayConfiguration,
    master_key: [u8; 32],
    webhook_secret: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct GatewayIntentResponse {
    id: String,
    status: String,
    auth_code: Option<String>,
}

impl HttpGatewayProcessor {
    pub fn new(
        gateway_name: impl Into<String>,
        config: GatewayConfiguration,
        master_key: [u8; 32],
        webhook_secret: Vec<u8>,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|e| CoreError::internal(format!("building gateway http client: {e}")))?;
        Ok(Self {
            gateway_name: gateway_name.into(),
            client,
            config,
            master_key,
            webhook_secret,
        })
    }

    fn api_key(&self) -> Result<String, CoreError> {
        credentials::open(&self.master_key, &self.config.sealed_api_key)
    }

    fn map_response_error(&self, status: reqwest::StatusCode, body: String) -> CoreError {
        let retriable = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
        CoreError::external(
            if retriable { "Gateway.Retriable" } else { "Gateway.Rejected" },
            format!("{} responded {}: {}", self.gateway_name, status, body),
            retriable,
        )
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for HttpGatewayProcessor {
    async fn create_intent(&self, payment: &Payment, idempotency_key: &str) -> Result<IntentResult, CoreError> {
        let response = self
            .client
            .post(format!("{}/intents", self.config.base_url))
            .bearer_auth(self.api_key()?)
            .header("Idempotency-Key", idempotency_key)
            .json(&json!({
                "amount": payment.amount,
                "currency": payment.currency.as_str(),
                "payment_method_id": payment.payment_method_id.to_string(),
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.map_response_error(status, response.text().await.unwrap_or_default()));
        }
        let body: GatewayIntentResponse = response.json().await?;
        let intent_status = match body.status.as_str() {
            "succeeded" | "authorized" => IntentStatus::Authorized,
            "requires_action" => IntentStatus::RequiresAction,
            "processing" | "pending" => IntentStatus::Pending,
            _ => IntentStatus::Failed,
        };
        Ok(IntentResult {
            provider_ref: body.id,
            status: intent_status,
            auth_code: body.auth_code,
        })
    }

    async fn capture(&self, payment: &Payment, idempotency_key: &str) -> Result<(), CoreError> {
        let reference = payment
            .provider_reference_id
            .as_deref()
            .ok_or_else(|| CoreError::internal("capture dispatched before an intent reference was recorded"))?;
        let response = self
            .client
            .post(format!("{}/intents/{}/capture", self.config.base_url, reference))
            .bearer_auth(self.api_key()?)
            .header("Idempotency-Key", idempotency_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.map_response_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn refund(&self, payment: &Payment, amount: i64, reason: &str, idempotency_key: &str) -> Result<(), CoreError> {
        let reference = payment
            .provider_reference_id
            .as_deref()
            .ok_or_else(|| CoreError::internal("refund dispatched before an intent reference was recorded"))?;
        let response = self
            .client
            .post(format!("{}/intents/{}/refund", self.config.base_url, reference))
            .bearer_auth(self.api_key()?)
            .header("Idempotency-Key", idempotency_key)
            .json(&json!({ "amount": amount, "reason": reason }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.map_response_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn void(&self, payment: &Payment, idempotency_key: &str) -> Result<(), CoreError> {
        let reference = payment
            .provider_reference_id
            .as_deref()
            .ok_or_else(|| CoreError::internal("void dispatched before an intent reference was recorded"))?;
        let response = self
            .client
            .post(format!("{}/intents/{}/void", self.config.base_url, reference))
            .bearer_auth(self.api_key()?)
            .header("Idempotency-Key", idempotency_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.map_response_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    fn validate_webhook(&self, payload: &[u8], signature: &[u8], _secret: &[u8]) -> bool {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.webhook_secret);
        hmac::verify(&key, payload, signature).is_ok()
    }
}

type ProcessorRegistry = HashMap<PaymentMethodType, Arc<dyn PaymentProcessor>>;

/// Process-wide, populated-once-at-startup processor registry (spec §5
/// "Shared resources").
static PROCESSORS: Lazy<std::sync::RwLock<ProcessorRegistry>> = Lazy::new(|| {
    let mut map: ProcessorRegistry = HashMap::new();
    map.insert(PaymentMethodType::CashOnDelivery, Arc::new(CashOnDeliveryProcessor));
    std::sync::RwLock::new(map)
});

/// Registers (or overrides) the processor used for `method_type`. Intended
/// to run once at startup, before any command executes.
pub fn register_processor(method_type: PaymentMethodType, processor: Arc<dyn PaymentProcessor>) {
    PROCESSORS
        .write()
        .expect("processor registry poisoned")
        .insert(method_type, processor);
}

pub fn processor_for(method_type: PaymentMethodType) -> Result<Arc<dyn PaymentProcessor>, CoreError> {
    PROCESSORS
        .read()
        .expect("processor registry poisoned")
        .get(&method_type)
        .cloned()
        .ok_or_else(|| CoreError::internal(format!("no processor registered for {:?}", method_type)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::CurrencyCode;

    #[tokio::test]
    async fn cash_on_delivery_intent_is_pending() {
        let processor = CashOnDeliveryProcessor;
        let payment = Payment::new(bson::Uuid::new(), 1000, CurrencyCode::new("USD").unwrap(), bson::Uuid::new());
        let result = processor.create_intent(&payment, "key-1").await.unwrap();
        assert_eq!(result.status, IntentStatus::Pending);
    }

    #[test]
    fn cash_on_delivery_refuses_webhook_validation() {
        let processor = CashOnDeliveryProcessor;
        assert!(!processor.validate_webhook(b"payload", b"sig", b"secret"));
    }

    #[test]
    fn registry_always_has_cash_on_delivery() {
        let processor = processor_for(PaymentMethodType::CashOnDelivery).unwrap();
        assert!(!processor.validate_webhook(b"p", b"s", b"k"));
    }

    fn http_processor() -> HttpGatewayProcessor {
        let master_key = [3u8; 32];
        let sealed = credentials::seal(&master_key, "sk_test_123").unwrap();
        let config = GatewayConfiguration {
            _id: bson::Uuid::new(),
            base_url: "https://gateway.example.test".into(),
            sealed_api_key: sealed,
        };
        HttpGatewayProcessor::new("stripe-like", config, master_key, b"whsec_test".to_vec()).unwrap()
    }

    #[test]
    fn http_processor_decrypts_its_own_api_key() {
        let processor = http_processor();
        assert_eq!(processor.api_key().unwrap(), "sk_test_123");
    }

    #[test]
    fn server_errors_are_marked_retriable() {
        let processor = http_processor();
        let err = processor.map_response_error(reqwest::StatusCode::BAD_GATEWAY, "down".into());
        assert!(err.retriable());
    }

    #[test]
    fn client_errors_are_not_retriable() {
        let processor = http_processor();
        let err = processor.map_response_error(reqwest::StatusCode::BAD_REQUEST, "bad card".into());
        assert!(!err.retriable());
    }

    #[test]
    fn http_processor_validates_webhook_against_its_own_secret() {
        let processor = http_processor();
        let key = hmac::Key::new(hmac::HMAC_SHA256, b"whsec_test");
        let tag = hmac::sign(&key, b"payload");
        assert!(processor.validate_webhook(b"payload", tag.as_ref(), b"unused"));
        assert!(!processor.validate_webhook(b"payload", b"bogus", b"unused"));
    }
}
