//! Inbound gateway webhook reconciliation (spec §4.4 "Webhook
//! reconciliation", testable property 8 "Webhook monotonicity").

use crate::error::CoreError;
use crate::payment::gateway::processor_for;
use crate::payment::model::{Payment, PaymentStatus};

/// The event kinds a gateway webhook can carry, restricted to the ones
/// spec §4.4 names a transition for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    IntentSucceeded,
    IntentFailed,
    AmountCapturableUpdated,
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub payment_id: bson::Uuid,
    pub kind: WebhookEventKind,
    /// Derived from the provider's event timestamp; used for the
    /// monotonicity check.
    pub sequence: i64,
    pub signature: Vec<u8>,
}

/// Validates the signature, then applies the minimal transition implied by
/// the event if — and only if — `event.sequence` is newer than the
/// payment's `last_applied_sequence`. Returns `true` if a transition was
/// applied (the caller should then check whether the order can advance).
pub fn reconcile(payment: &mut Payment, event: &WebhookEvent, payload: &[u8], secret: &[u8]) -> Result<bool, CoreError> {
    let processor = processor_for(payment.payment_method_type)?;
    if !processor.validate_webhook(payload, &event.signature, secret) {
        return Err(CoreError::business_rule(
            "Payment.InvalidWebhookSignature",
            "webhook signature did not validate against the stored gateway secret",
        ));
    }

    // Stale or duplicate webhooks (lower or equal sequence) are no-ops,
    // applied in either delivery order (spec §4.4, property 8).
    if event.sequence <= payment.last_applied_sequence {
        return Ok(false);
    }

    match event.kind {
        WebhookEventKind::IntentSucceeded => {
            payment.status = PaymentStatus::Completed;
            payment.captured_at = Some(bson::DateTime::now());
        }
        WebhookEventKind::IntentFailed => {
            payment.status = PaymentStatus::Failed;
        }
        WebhookEventKind::AmountCapturableUpdated => {
            payment.status = PaymentStatus::Authorized;
            payment.authorized_at = Some(bson::DateTime::now());
        }
    }
    payment.last_applied_sequence = event.sequence;
    payment.row_version += 1;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ring::hmac;

    use super::*;
    use crate::ids::{OrderId, PaymentMethodId};
    use crate::money::CurrencyCode;
    use crate::payment::credentials::{self, GatewayConfiguration};
    use crate::payment::gateway::{self, HttpGatewayProcessor};
    use crate::payment::model::PaymentMethodType;

    fn payment() -> Payment {
        Payment::new(OrderId::new(), 5000, CurrencyCode::new("USD").unwrap(), PaymentMethodId::new())
    }

    fn event(kind: WebhookEventKind, sequence: i64, payment_id: bson::Uuid) -> WebhookEvent {
        WebhookEvent {
            payment_id,
            kind,
            sequence,
            signature: vec![],
        }
    }

    #[test]
    fn cash_on_delivery_refuses_any_webhook() {
        let mut p = payment();
        let id = p._id;
        let err = reconcile(&mut p, &event(WebhookEventKind::IntentSucceeded, 1, id), b"payload", b"secret").unwrap_err();
        assert_eq!(err.code(), "Payment.InvalidWebhookSignature");
    }

    /// CashOnDelivery never validates a webhook, so converging S5 requires a
    /// processor that does; a real `HttpGatewayProcessor` is registered for
    /// `Stripe` and every event is signed with its actual secret.
    fn stripe_processor_with_secret(secret: &[u8]) -> HttpGatewayProcessor {
        let master_key = [11u8; 32];
        let sealed = credentials::seal(&master_key, "sk_test_s5").unwrap();
        let config = GatewayConfiguration {
            _id: bson::Uuid::new(),
            base_url: "https://gateway.example.test".into(),
            sealed_api_key: sealed,
        };
        HttpGatewayProcessor::new("stripe-like", config, master_key, secret.to_vec()).unwrap()
    }

    fn sign(secret: &[u8], payload: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        hmac::sign(&key, payload).as_ref().to_vec()
    }

    #[test]
    fn out_of_order_webhooks_converge_to_completed() {
        // S5: `succeeded` (seq=5) then `processing` (seq=4) for the same
        // payment; regardless of delivery order, final state = Completed.
        let secret: &[u8] = b"whsec_s5_test";
        gateway::register_processor(PaymentMethodType::Stripe, Arc::new(stripe_processor_with_secret(secret)));

        let succeeded_payload: &[u8] = b"succeeded-event";
        let processing_payload: &[u8] = b"processing-event";
        let events = [
            (WebhookEventKind::IntentSucceeded, 5i64, succeeded_payload),
            (WebhookEventKind::AmountCapturableUpdated, 4i64, processing_payload),
        ];

        let apply_in_order = |order: [usize; 2]| {
            let mut p = payment();
            p.payment_method_type = PaymentMethodType::Stripe;
            let payment_id = p._id;
            for &i in &order {
                let (kind, sequence, payload) = events[i];
                let signature = sign(secret, payload);
                reconcile(
                    &mut p,
                    &WebhookEvent { payment_id, kind, sequence, signature },
                    payload,
                    secret,
                )
                .unwrap();
            }
            p.status
        };

        assert_eq!(apply_in_order([0, 1]), PaymentStatus::Completed);
        assert_eq!(apply_in_order([1, 0]), PaymentStatus::Completed);
    }
}
