//! Payment command dispatch: create/capture/void/refund against the
//! registered gateway processor (spec component C8, §4.4).

use bson::doc;
use mongodb::{ClientSession, Collection};

use crate::db::retry_on_conflict;
use crate::error::CoreError;
use crate::ids::{OrderId, PaymentMethodId};
use crate::money::CurrencyCode;
use crate::payment::gateway::{processor_for, IntentStatus, PaymentProcessor};
use crate::payment::model::{Payment, PaymentMethodType, PaymentStatus};

/// `PaymentCreate`: opens a new payment and dispatches `create_intent`. One
/// retry with a fresh idempotency key is attempted on a retriable `External`
/// failure (spec §4.4 "Idempotency": "On retriable failure... the
/// attempt_counter advances and a new key is used"). When `auto_capture` is
/// set (the `PaymentMethod`'s own flag) and the intent didn't fail, the
/// capture is dispatched inline — the `Payment -> Complete` short-circuit
/// (spec §4.1) never leaves the payment sitting in `Authorized`/`Pending`.
pub async fn create(
    order_id: OrderId,
    amount: i64,
    currency: CurrencyCode,
    payment_method_id: PaymentMethodId,
    method_type: PaymentMethodType,
    auto_capture: bool,
) -> Result<Payment, CoreError> {
    let mut payment = Payment::new(order_id, amount, currency, payment_method_id);
    payment.payment_method_type = method_type;
    payment.status = PaymentStatus::Authorizing;

    let processor = processor_for(method_type)?;
    let mut last_err = None;
    for _ in 0..2 {
        let key = payment.idempotency_key_for("create_intent");
        match processor.create_intent(&payment, &key).await {
            Ok(result) => {
                payment.idempotency_key = Some(key);
                payment.provider_reference_id = Some(result.provider_ref);
                payment.gateway_auth_code = result.auth_code;
                payment.status = match result.status {
                    IntentStatus::Authorized => PaymentStatus::Authorized,
                    IntentStatus::RequiresAction | IntentStatus::Pending => PaymentStatus::Pending,
                    IntentStatus::Failed => PaymentStatus::Failed,
                };
                if auto_capture && payment.status != PaymentStatus::Failed {
                    capture_with(&mut payment, processor.as_ref()).await?;
                }
                return Ok(payment);
            }
            Err(err) if err.retriable() => {
                payment.attempt_counter += 1;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// `PaymentCapture`: `Authorized -> Capturing -> Completed/Failed`.
pub async fn capture(payment: &mut Payment) -> Result<(), CoreError> {
    require_status(payment, PaymentStatus::Authorized, "capture")?;
    let processor = processor_for(payment.payment_method_type)?;
    capture_with(payment, processor.as_ref()).await
}

/// Shared capture dispatch, used both by the `capture()` entry point (which
/// guards on `Authorized`) and `create()`'s auto-capture short-circuit
/// (which dispatches straight from whatever status the intent returned,
/// since CashOnDelivery's intent is always `Pending`, never `Authorized`).
async fn capture_with(payment: &mut Payment, processor: &dyn PaymentProcessor) -> Result<(), CoreError> {
    payment.status = PaymentStatus::Capturing;
    let key = payment.idempotency_key_for("capture");
    match processor.capture(payment, &key).await {
        Ok(()) => {
            payment.status = PaymentStatus::Completed;
            payment.captured_at = Some(bson::DateTime::now());
            Ok(())
        }
        Err(err) => {
            payment.status = PaymentStatus::Failed;
            payment.failure_reason = Some(err.to_string());
            Err(err)
        }
    }
}

/// `PaymentVoid`: `Authorized -> Void`.
pub async fn void(payment: &mut Payment) -> Result<(), CoreError> {
    require_status(payment, PaymentStatus::Authorized, "void")?;
    let processor = processor_for(payment.payment_method_type)?;
    let key = payment.idempotency_key_for("void");
    processor.void(payment, &key).await?;
    payment.status = PaymentStatus::Void;
    payment.voided_at = Some(bson::DateTime::now());
    Ok(())
}

/// `PaymentRefund`: `Completed -> Refunded` on a full refund; a partial
/// refund keeps `status = Completed` and increments `refunded_amount`.
pub async fn refund(payment: &mut Payment, amount: i64, reason: &str) -> Result<(), CoreError> {
    if payment.status != PaymentStatus::Completed {
        return Err(CoreError::state_conflict(
            "Payment.InvalidTransition",
            format!("cannot refund a payment in status {:?}", payment.status),
        ));
    }
    if amount <= 0 || payment.refunded_amount + amount > payment.amount {
        return Err(CoreError::business_rule(
            "Payment.OverRefund",
            format!(
                "refund of {} would exceed remaining refundable amount {}",
                amount,
                payment.amount - payment.refunded_amount
            ),
        ));
    }
    let processor = processor_for(payment.payment_method_type)?;
    let key = payment.idempotency_key_for("refund");
    processor.refund(payment, amount, reason, &key).await?;
    payment.refunded_amount += amount;
    if payment.refunded_amount == payment.amount {
        payment.status = PaymentStatus::Refunded;
    }
    Ok(())
}

/// Persists `payment` with an optimistic `row_version` filter, retrying on
/// conflict up to the shared retry budget. A payment is contested between
/// whichever mutation holds it in memory and an async gateway webhook
/// landing on the same row (spec §5 lists payments alongside stock items
/// and orders as rows that "carry row-version checks on write"); this
/// mirrors `order::commands::persist_order`'s reload-then-reapply shape.
pub async fn persist_payment(
    collection: &Collection<Payment>,
    session: &mut ClientSession,
    payment: &mut Payment,
) -> Result<(), CoreError> {
    let collection = &*collection;
    let session = &mut *session;
    let payment = &mut *payment;
    retry_on_conflict(|attempt| {
        let collection = &*collection;
        let session = &mut *session;
        let payment = &mut *payment;
        async move {
            if attempt > 0 {
                let current = collection
                    .find_one_with_session(doc! { "_id": payment._id }, None, session)
                    .await?
                    .ok_or_else(|| CoreError::not_found("Payment", payment._id))?;
                payment.row_version = current.row_version;
            }
            let expected_version = payment.row_version;
            payment.row_version += 1;
            let result = collection
                .update_one_with_session(
                    doc! { "_id": payment._id, "row_version": expected_version as i64 },
                    doc! { "$set": bson::to_bson(&*payment).map_err(|e| CoreError::internal(e.to_string()))? },
                    None,
                    session,
                )
                .await?;
            if result.modified_count == 0 {
                payment.row_version = expected_version;
                return Err(CoreError::concurrency_conflict("Payment", payment._id));
            }
            Ok(())
        }
    })
    .await
}

/// Same optimistic-concurrency persistence as [`persist_payment`], for
/// callers outside a `UnitOfWork` transaction — the inbound webhook handler
/// reconciles a payment entirely on its own, only opening a transaction
/// afterward if the order can now advance.
pub async fn persist_payment_standalone(
    collection: &Collection<Payment>,
    payment: &mut Payment,
) -> Result<(), CoreError> {
    let collection = &*collection;
    let payment = &mut *payment;
    retry_on_conflict(|attempt| {
        let collection = &*collection;
        let payment = &mut *payment;
        async move {
            if attempt > 0 {
                let current = collection
                    .find_one(doc! { "_id": payment._id })
                    .await?
                    .ok_or_else(|| CoreError::not_found("Payment", payment._id))?;
                payment.row_version = current.row_version;
            }
            let expected_version = payment.row_version;
            payment.row_version += 1;
            let result = collection
                .update_one(
                    doc! { "_id": payment._id, "row_version": expected_version as i64 },
                    doc! { "$set": bson::to_bson(&*payment).map_err(|e| CoreError::internal(e.to_string()))? },
                )
                .await?;
            if result.modified_count == 0 {
                payment.row_version = expected_version;
                return Err(CoreError::concurrency_conflict("Payment", payment._id));
            }
            Ok(())
        }
    })
    .await
}

fn require_status(payment: &Payment, expected: PaymentStatus, operation: &str) -> Result<(), CoreError> {
    if payment.status == expected {
        Ok(())
    } else {
        Err(CoreError::state_conflict(
            "Payment.InvalidTransition",
            format!("cannot {} a payment in status {:?}", operation, payment.status),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::OrderId;

    #[tokio::test]
    async fn create_cash_on_delivery_payment_is_pending() {
        let payment = create(
            OrderId::new(),
            4498,
            CurrencyCode::new("USD").unwrap(),
            PaymentMethodId::new(),
            PaymentMethodType::CashOnDelivery,
            false,
        )
        .await
        .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn create_with_auto_capture_short_circuits_to_completed() {
        // S1: CashOnDelivery is always `auto_capture: true` (spec §4.1
        // "Payment -> Complete [add_payment (auto-capture) + advance]").
        let payment = create(
            OrderId::new(),
            4498,
            CurrencyCode::new("USD").unwrap(),
            PaymentMethodId::new(),
            PaymentMethodType::CashOnDelivery,
            true,
        )
        .await
        .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.captured_at.is_some());
    }

    #[tokio::test]
    async fn capture_requires_authorized_status() {
        let mut payment = Payment::new(OrderId::new(), 1000, CurrencyCode::new("USD").unwrap(), PaymentMethodId::new());
        let err = capture(&mut payment).await.unwrap_err();
        assert_eq!(err.code(), "Payment.InvalidTransition");
    }

    #[tokio::test]
    async fn partial_refund_keeps_completed_status() {
        let mut payment = Payment::new(OrderId::new(), 5000, CurrencyCode::new("USD").unwrap(), PaymentMethodId::new());
        payment.status = PaymentStatus::Completed;
        refund(&mut payment, 2000, "partial return").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.refunded_amount, 2000);
    }

    #[tokio::test]
    async fn full_refund_transitions_to_refunded() {
        let mut payment = Payment::new(OrderId::new(), 5000, CurrencyCode::new("USD").unwrap(), PaymentMethodId::new());
        payment.status = PaymentStatus::Completed;
        refund(&mut payment, 5000, "full return").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn over_refund_is_rejected() {
        let mut payment = Payment::new(OrderId::new(), 5000, CurrencyCode::new("USD").unwrap(), PaymentMethodId::new());
        payment.status = PaymentStatus::Completed;
        let err = refund(&mut payment, 6000, "too much").await.unwrap_err();
        assert_eq!(err.code(), "Payment.OverRefund");
    }
}
