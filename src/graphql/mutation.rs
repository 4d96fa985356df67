//! Mutation root: dispatches every inbound command from spec §6's table to
//! its `order`/`payment`/`shipment` implementation, each wrapped in one
//! `UnitOfWork` transaction.

use async_graphql::{Context, Object};
use futures::stream::TryStreamExt;

use crate::authorization::authorize_user;
use crate::db::UnitOfWork;
use crate::error::CoreError;
use crate::event_bus::DomainEvent;
use crate::graphql::inputs::*;
use crate::ids::PaymentId;
use crate::inventory::commands as inventory_commands;
use crate::inventory::model::StockLocation;
use crate::money::CurrencyCode;
use crate::order::commands::{self, VariantPrice};
use crate::order::model::{Address, Order};
use crate::order::repo::Repositories;
use crate::payment::model::{Payment, PaymentStatus};
use crate::payment::orchestrator;
use crate::promotion::engine::CatalogContext;
use crate::shipment::model::Shipment;
use crate::shipment::state_machine;

fn repos(ctx: &Context<'_>) -> async_graphql::Result<Repositories> {
    let db = ctx.data::<mongodb::Database>()?;
    Ok(Repositories::new(db))
}

async fn begin_uow(ctx: &Context<'_>) -> async_graphql::Result<UnitOfWork> {
    let client = ctx.data::<mongodb::Client>()?;
    Ok(UnitOfWork::begin(client).await.map_err(CoreError::from)?)
}

/// Builds the promotion engine's `CatalogContext` from an optional input,
/// the same "caller resolves out-of-scope data upstream" convention
/// `VariantPrice` follows for pricing.
fn catalog_from_input(input: Option<CatalogContextInput>) -> CatalogContext {
    let Some(input) = input else {
        return CatalogContext::default();
    };
    CatalogContext::from_pairs(
        input.variant_taxons.into_iter().map(|v| (v.variant_id, v.taxon_ids)),
        input.taxon_ascendants.into_iter().map(|t| (t.taxon_id, t.ascendant_ids)),
    )
}

/// Rejects the mutation before any command runs if the caller is
/// authenticated as someone other than the order's owner (anonymous/guest
/// orders, `user_id: None`, accept any caller). Mirrors the same
/// `authorize_user` check `graphql::query` already applies to every read, so
/// a mutation can't bypass the ownership check a query would enforce.
async fn authorize_order(
    ctx: &Context<'_>,
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: crate::ids::OrderId,
) -> async_graphql::Result<()> {
    let order = repos
        .orders
        .find_one_with_session(bson::doc! { "_id": order_id }, None, &mut uow.session)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::not_found("Order", order_id))?;
    authorize_user(ctx, order.user_id)?;
    Ok(())
}

pub struct Mutation;

#[Object]
impl Mutation {
    async fn order_create(&self, ctx: &Context<'_>, input: CreateOrderInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        let currency = CurrencyCode::new(&input.currency)?;
        let order = commands::create_order(&repos, &mut uow, input.user_id, input.adhoc_customer_id, currency).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_add_line_item(&self, ctx: &Context<'_>, input: AddLineItemInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        // Variant pricing is out-of-scope catalog data; the caller resolves
        // it upstream and passes the snapshot through directly.
        let price = VariantPrice {
            variant_id: input.variant_id,
            unit_price: input.unit_price,
            active: input.active,
        };
        let catalog = catalog_from_input(input.catalog);
        let order = commands::add_line_item(&repos, &mut uow, input.order_id, price, input.quantity, &catalog).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_set_quantity(&self, ctx: &Context<'_>, input: SetQuantityInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let catalog = catalog_from_input(input.catalog);
        let order = commands::set_quantity(&repos, &mut uow, input.order_id, input.line_item_id, input.quantity, &catalog).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_remove_line_item(&self, ctx: &Context<'_>, input: RemoveLineItemInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let catalog = catalog_from_input(input.catalog);
        let order = commands::remove_line_item(&repos, &mut uow, input.order_id, input.line_item_id, &catalog).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_empty(&self, ctx: &Context<'_>, input: EmptyOrderInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let catalog = catalog_from_input(input.catalog);
        let order = commands::empty(&repos, &mut uow, input.order_id, &catalog).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_associate(&self, ctx: &Context<'_>, input: AssociateInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let catalog = catalog_from_input(input.catalog);
        let order = commands::associate(&repos, &mut uow, input.order_id, input.user_id, &[], &catalog).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_set_shipping_address(&self, ctx: &Context<'_>, input: SetShippingAddressInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let address = Address {
            name: input.address.name,
            street: input.address.street,
            city: input.address.city,
            postal_code: input.address.postal_code,
            country_code: input.address.country_code,
        };
        let order = commands::set_shipping_address(&repos, &mut uow, input.order_id, address).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_set_email(&self, ctx: &Context<'_>, input: SetEmailInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let order = commands::set_email(&repos, &mut uow, input.order_id, input.email).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_set_special_instructions(
        &self,
        ctx: &Context<'_>,
        input: SetSpecialInstructionsInput,
    ) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let order = commands::set_special_instructions(&repos, &mut uow, input.order_id, input.instructions).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_apply_coupon(&self, ctx: &Context<'_>, input: ApplyCouponInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let catalog = catalog_from_input(input.catalog);
        let order = commands::apply_coupon(&repos, &mut uow, input.order_id, input.code, &catalog).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_remove_coupon(&self, ctx: &Context<'_>, input: RemoveCouponInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let catalog = catalog_from_input(input.catalog);
        let order = commands::remove_coupon(&repos, &mut uow, input.order_id, &catalog).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_advance(&self, ctx: &Context<'_>, input: AdvanceInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let order = commands::advance(&repos, &mut uow, input.order_id).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_select_shipping_method(
        &self,
        ctx: &Context<'_>,
        input: SelectShippingMethodInput,
    ) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let catalog = catalog_from_input(input.catalog);
        let order = commands::select_shipping_method(
            &repos,
            &mut uow,
            input.order_id,
            input.shipment_method_id,
            input.cost,
            &catalog,
        )
        .await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_complete(&self, ctx: &Context<'_>, input: CompleteInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let order = commands::complete(&repos, &mut uow, input.order_id).await?;
        uow.commit().await?;
        Ok(order)
    }

    async fn order_cancel(&self, ctx: &Context<'_>, input: CancelInput) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        authorize_order(ctx, &repos, &mut uow, input.order_id).await?;
        let order = commands::cancel(&repos, &mut uow, input.order_id, input.reason).await?;
        uow.commit().await?;
        Ok(order)
    }

    /// Not part of the order aggregate's own command table, but the only
    /// other state transition the mutation root exposes: marks a `Ready`
    /// shipment `Shipped` and every `OnHand` inventory unit with it.
    async fn shipment_ship(&self, ctx: &Context<'_>, input: ShipmentShipInput) -> async_graphql::Result<Shipment> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;

        let mut shipment = repos
            .shipments
            .find_one(bson::doc! { "_id": input.shipment_id })
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("Shipment", input.shipment_id))?;

        let mut units = repos
            .inventory_units
            .find(bson::doc! { "shipment_id": shipment._id })
            .await
            .map_err(CoreError::from)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(CoreError::from)?;

        state_machine::ship(&mut shipment, &mut units, input.tracking_number)?;

        repos
            .shipments
            .replace_one(bson::doc! { "_id": shipment._id }, &shipment)
            .await
            .map_err(CoreError::from)?;
        for unit in &units {
            repos
                .inventory_units
                .replace_one(bson::doc! { "_id": unit._id }, unit)
                .await
                .map_err(CoreError::from)?;
        }

        uow.emit(DomainEvent::ShipmentShipped {
            shipment_id: shipment._id,
            order_id: shipment.order_id,
        });
        uow.commit().await?;
        Ok(shipment)
    }

    async fn payment_create(&self, ctx: &Context<'_>, input: PaymentCreateInput) -> async_graphql::Result<Payment> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        let order = repos
            .orders
            .find_one_with_session(bson::doc! { "_id": input.order_id }, None, &mut uow.session)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("Order", input.order_id))?;
        authorize_user(ctx, order.user_id)?;

        let method = repos
            .payment_methods
            .find_one_with_session(bson::doc! { "_id": input.payment_method_id }, None, &mut uow.session)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("PaymentMethod", input.payment_method_id))?;
        if !method.active {
            return Err(CoreError::business_rule("PaymentMethod.Inactive", "payment method is inactive").into());
        }

        let payment = orchestrator::create(
            input.order_id,
            input.amount,
            order.currency,
            input.payment_method_id,
            method.method_type,
            method.auto_capture,
        )
        .await?;
        repos
            .payments
            .insert_one_with_session(&payment, None, &mut uow.session)
            .await
            .map_err(CoreError::from)?;
        match payment.status {
            PaymentStatus::Authorized => uow.emit(DomainEvent::PaymentAuthorized {
                payment_id: payment._id,
                order_id: payment.order_id,
            }),
            PaymentStatus::Completed => uow.emit(DomainEvent::PaymentCaptured {
                payment_id: payment._id,
                order_id: payment.order_id,
            }),
            PaymentStatus::Failed => uow.emit(DomainEvent::PaymentFailed {
                payment_id: payment._id,
                order_id: payment.order_id,
            }),
            _ => {}
        }
        uow.commit().await?;
        Ok(payment)
    }

    async fn payment_capture(&self, ctx: &Context<'_>, input: PaymentCaptureInput) -> async_graphql::Result<Payment> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        let mut payment = load_payment(&repos, &mut uow, input.payment_id).await?;
        authorize_payment_owner(ctx, &repos, &mut uow, &payment).await?;
        let result = orchestrator::capture(&mut payment).await;
        uow.emit(match &result {
            Ok(()) => DomainEvent::PaymentCaptured {
                payment_id: payment._id,
                order_id: payment.order_id,
            },
            Err(_) => DomainEvent::PaymentFailed {
                payment_id: payment._id,
                order_id: payment.order_id,
            },
        });
        save_payment(&repos, &mut uow, &mut payment).await?;
        uow.commit().await?;
        result?;
        Ok(payment)
    }

    async fn payment_void(&self, ctx: &Context<'_>, input: PaymentVoidInput) -> async_graphql::Result<Payment> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        let mut payment = load_payment(&repos, &mut uow, input.payment_id).await?;
        authorize_payment_owner(ctx, &repos, &mut uow, &payment).await?;
        orchestrator::void(&mut payment).await?;
        save_payment(&repos, &mut uow, &mut payment).await?;
        uow.commit().await?;
        Ok(payment)
    }

    async fn payment_refund(&self, ctx: &Context<'_>, input: PaymentRefundInput) -> async_graphql::Result<Payment> {
        let repos = repos(ctx)?;
        let mut uow = begin_uow(ctx).await?;
        let mut payment = load_payment(&repos, &mut uow, input.payment_id).await?;
        authorize_payment_owner(ctx, &repos, &mut uow, &payment).await?;
        orchestrator::refund(&mut payment, input.amount, &input.reason).await?;
        save_payment(&repos, &mut uow, &mut payment).await?;
        uow.commit().await?;
        Ok(payment)
    }

    /// SUPPLEMENT (spec §3/§4.3): the minimal `StockLocation` lifecycle
    /// allocation needs somewhere to allocate from. Not part of the order
    /// aggregate's own transaction boundary, so this runs against the
    /// collection directly rather than through a `UnitOfWork`.
    async fn stock_location_create(
        &self,
        ctx: &Context<'_>,
        input: StockLocationCreateInput,
    ) -> async_graphql::Result<StockLocation> {
        let repos = repos(ctx)?;
        Ok(inventory_commands::create_stock_location(
            &repos.stock_locations,
            input.internal_name,
            input.presentation_name,
            input.is_default,
        )
        .await?)
    }

    async fn stock_location_set_default(
        &self,
        ctx: &Context<'_>,
        input: StockLocationSetDefaultInput,
    ) -> async_graphql::Result<StockLocation> {
        let repos = repos(ctx)?;
        Ok(inventory_commands::set_default_stock_location(&repos.stock_locations, input.stock_location_id).await?)
    }
}

async fn load_payment(repos: &Repositories, uow: &mut UnitOfWork, payment_id: PaymentId) -> async_graphql::Result<Payment> {
    Ok(repos
        .payments
        .find_one_with_session(bson::doc! { "_id": payment_id }, None, &mut uow.session)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::not_found("Payment", payment_id))?)
}

/// Loads `payment`'s order and authorizes the caller against its owner,
/// the same ownership check `authorize_order` applies to every order
/// mutation (spec §6 "Authorization": a payment belongs to whoever owns the
/// order it was opened against).
async fn authorize_payment_owner(
    ctx: &Context<'_>,
    repos: &Repositories,
    uow: &mut UnitOfWork,
    payment: &Payment,
) -> async_graphql::Result<()> {
    let order = repos
        .orders
        .find_one_with_session(bson::doc! { "_id": payment.order_id }, None, &mut uow.session)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::not_found("Order", payment.order_id))?;
    authorize_user(ctx, order.user_id)?;
    Ok(())
}

async fn save_payment(repos: &Repositories, uow: &mut UnitOfWork, payment: &mut Payment) -> async_graphql::Result<()> {
    Ok(orchestrator::persist_payment(&repos.payments, &mut uow.session, payment).await?)
}
