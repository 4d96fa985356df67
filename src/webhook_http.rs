//! Inbound payment gateway webhook endpoint (spec §4.4 "Webhook
//! reconciliation"), following the teacher's `http_event_service.rs`
//! `State`/`Json`/`StatusCode` handler idiom.

use axum::{debug_handler, extract::State, http::StatusCode, Json};
use bson::doc;
use mongodb::{Client, Collection, Database};
use serde::Deserialize;

use crate::db::UnitOfWork;
use crate::error::CoreError;
use crate::ids::PaymentId;
use crate::order::commands;
use crate::order::model::OrderStatus;
use crate::order::repo::Repositories;
use crate::order::state_machine;
use crate::payment::model::{Payment, PaymentStatus};
use crate::payment::orchestrator;
use crate::payment::webhook::{self, WebhookEvent, WebhookEventKind};

/// Service state for the webhook endpoint: the payments collection, the
/// shared secret the configured gateway signs webhooks with, and what it
/// needs to re-enter the order aggregate on a reconciled state change
/// (spec §4.4 step 4).
#[derive(Clone)]
pub struct WebhookState {
    pub payments: Collection<Payment>,
    pub db: Database,
    pub client: Client,
    pub gateway_secret: Vec<u8>,
}

#[derive(Deserialize, Debug)]
pub struct WebhookPayload {
    pub payment_id: PaymentId,
    pub kind: InboundWebhookKind,
    /// Provider event sequence/timestamp; used for the monotonicity check.
    pub sequence: i64,
    /// Raw HMAC-SHA256 signature bytes over the payload.
    pub signature: Vec<u8>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub enum InboundWebhookKind {
    IntentSucceeded,
    IntentFailed,
    AmountCapturableUpdated,
}

impl From<InboundWebhookKind> for WebhookEventKind {
    fn from(kind: InboundWebhookKind) -> Self {
        match kind {
            InboundWebhookKind::IntentSucceeded => WebhookEventKind::IntentSucceeded,
            InboundWebhookKind::IntentFailed => WebhookEventKind::IntentFailed,
            InboundWebhookKind::AmountCapturableUpdated => WebhookEventKind::AmountCapturableUpdated,
        }
    }
}

/// HTTP endpoint the gateway posts webhooks to. Reconciles the named
/// payment's state and persists it; a stale or duplicate delivery
/// (lower-or-equal sequence) is accepted as a no-op, per spec §4.4
/// property 8.
#[debug_handler]
pub async fn on_payment_webhook(
    State(state): State<WebhookState>,
    Json(body): Json<WebhookPayload>,
) -> Result<StatusCode, StatusCode> {
    let mut payment = state
        .payments
        .find_one(doc! { "_id": body.payment_id })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let event = WebhookEvent {
        payment_id: body.payment_id,
        kind: body.kind.into(),
        sequence: body.sequence,
        signature: body.signature,
    };

    let payload_bytes = body.sequence.to_le_bytes();
    let applied = match webhook::reconcile(&mut payment, &event, &payload_bytes, &state.gateway_secret) {
        Ok(applied) => applied,
        Err(CoreError::BusinessRule { code, .. }) if code == "Payment.InvalidWebhookSignature" => {
            return Err(StatusCode::UNAUTHORIZED)
        }
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    if applied {
        orchestrator::persist_payment_standalone(&state.payments, &mut payment)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if payment.status == PaymentStatus::Authorized || payment.status == PaymentStatus::Completed {
            advance_order_if_fully_paid(&state, payment.order_id)
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }
    }
    Ok(StatusCode::OK)
}

/// Re-enters the order aggregate after a reconciled payment state change:
/// if the order is waiting in `Confirm` and payments now cover its total,
/// advances it to `Complete`, which in turn finalizes shipment allocation
/// (spec §4.4 step 4, §4.1 "Completion").
async fn advance_order_if_fully_paid(state: &WebhookState, order_id: crate::ids::OrderId) -> Result<(), CoreError> {
    let repos = Repositories::new(&state.db);
    let order = repos
        .orders
        .find_one(doc! { "_id": order_id })
        .await?
        .ok_or_else(|| CoreError::not_found("Order", order_id))?;
    if order.status != OrderStatus::Confirm {
        return Ok(());
    }

    let payments: Vec<Payment> = {
        use futures::stream::TryStreamExt;
        repos
            .payments
            .find(doc! { "order_id": order_id })
            .await?
            .try_collect()
            .await?
    };
    if !state_machine::guard_payment_sufficiency(order.grand_total, &payments)? {
        return Ok(());
    }

    let mut uow = UnitOfWork::begin(&state.client).await?;
    commands::complete(&repos, &mut uow, order_id).await?;
    uow.commit().await?;
    Ok(())
}
