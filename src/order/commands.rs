//! Order commands (spec §4.1, §6 command table). Each function is one
//! unit of work: load the aggregate and whatever it touches, validate
//! guards, mutate, recompute totals, persist, append history, and emit
//! events — mirroring the teacher's per-mutation `collection.update_one`
//! style but wrapped in `UnitOfWork`.

use bson::doc;
use futures::stream::TryStreamExt;

use crate::db::{retry_on_conflict, UnitOfWork};
use crate::error::CoreError;
use crate::event_bus::DomainEvent;
use crate::ids::{LineItemId, OrderId, ShippingMethodId, UserId, VariantId};
use crate::inventory::engine as inventory_engine;
use crate::inventory::model::Originator;
use crate::money::CurrencyCode;
use crate::order::history::OrderHistory;
use crate::order::line_item::LineItem;
use crate::order::model::{Address, Order, OrderStatus};
use crate::order::repo::Repositories;
use crate::order::state_machine::{self, ALLOWED_TRANSITIONS};
use crate::order::totals;
use crate::promotion::engine::{self, CatalogContext};
use crate::shipment::allocation::{self, StockAvailability};
use crate::shipment::model::{InventoryUnit, InventoryUnitStatus, Shipment, ShipmentStatus};

/// Snapshots a variant's price in `currency`. Catalog pricing is out of
/// scope (spec Non-goals); the caller supplies it, the same way the order
/// aggregate only ever stores an id-based snapshot, never a live lookup.
pub struct VariantPrice {
    pub variant_id: VariantId,
    pub unit_price: i64,
    pub active: bool,
}

pub async fn create_order(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    user_id: Option<UserId>,
    adhoc_customer_id: Option<String>,
    currency: CurrencyCode,
) -> Result<Order, CoreError> {
    let number = format!("R{}", uow.correlation_id.to_string().split('-').next().unwrap_or_default());
    let order = Order::new_cart(number, user_id, adhoc_customer_id, currency);
    repos
        .orders
        .insert_one_with_session(&order, None, &mut uow.session)
        .await?;
    record_history(repos, uow, &order, None, OrderStatus::Cart, "order created").await?;
    Ok(order)
}

async fn load_order(repos: &Repositories, uow: &mut UnitOfWork, order_id: OrderId) -> Result<Order, CoreError> {
    repos
        .orders
        .find_one_with_session(doc! { "_id": order_id }, None, &mut uow.session)
        .await?
        .ok_or_else(|| CoreError::not_found("Order", order_id))
}

async fn load_line_items(repos: &Repositories, uow: &mut UnitOfWork, order_id: OrderId) -> Result<Vec<LineItem>, CoreError> {
    let cursor = repos
        .line_items
        .find_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
        .await?;
    Ok(cursor.stream(&mut uow.session).try_collect().await?)
}

async fn load_shipments(repos: &Repositories, uow: &mut UnitOfWork, order_id: OrderId) -> Result<Vec<Shipment>, CoreError> {
    let cursor = repos
        .shipments
        .find_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
        .await?;
    Ok(cursor.stream(&mut uow.session).try_collect().await?)
}

fn require_status(order: &Order, allowed: &[OrderStatus], command: &'static str) -> Result<(), CoreError> {
    if allowed.contains(&order.status) {
        Ok(())
    } else {
        Err(CoreError::state_conflict(
            "Order.InvalidState",
            format!("`{}` not permitted while order is {:?}", command, order.status),
        ))
    }
}

async fn record_history(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order: &Order,
    from: Option<OrderStatus>,
    to: OrderStatus,
    description: &str,
) -> Result<(), CoreError> {
    let history = OrderHistory::new(order.id(), from, to, description, order.user_id);
    repos
        .histories
        .insert_one_with_session(&history, None, &mut uow.session)
        .await?;
    Ok(())
}

/// `Rule::FirstOrder`'s predicate (spec §4.2: "no prior Complete order
/// exists for this user_id"). A guest order (`user_id: None`) never
/// qualifies — there is nothing to look up a prior order by.
async fn is_first_order(repos: &Repositories, uow: &mut UnitOfWork, order: &Order) -> Result<bool, CoreError> {
    let Some(user_id) = order.user_id else {
        return Ok(false);
    };
    let prior_complete = repos
        .orders
        .find_one_with_session(
            doc! { "user_id": user_id, "status": "Complete", "_id": { "$ne": order.id() } },
            None,
            &mut uow.session,
        )
        .await?;
    Ok(prior_complete.is_none())
}

/// Re-runs promotion evaluation and the totals recomputation, then
/// persists the order, its line items and its adjustment set. Every
/// mutating command funnels through here exactly once, which is what makes
/// recomputation idempotent (spec §4.1 "Totals recomputation").
///
/// `is_first_order` is not caller-supplied: whether a prior `Complete`
/// order exists for this user is a fact this aggregate can answer itself,
/// unlike catalog pricing or taxonomy (spec §4.2 `FirstOrder` rule).
/// `catalog` *is* caller-supplied, the same way `VariantPrice` is — taxon
/// classification is out-of-scope catalog data (spec §4.2 SUPPLEMENT).
async fn recompute_and_persist(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order: &mut Order,
    line_items: &mut Vec<LineItem>,
    catalog: &CatalogContext,
) -> Result<(), CoreError> {
    let shipments = load_shipments(repos, uow, order.id()).await?;
    let is_first_order = is_first_order(repos, uow, order).await?;

    let candidates: Vec<_> = repos
        .promotions
        .find_with_session(doc! { "active": true }, None, &mut uow.session)
        .await?
        .stream(&mut uow.session)
        .try_collect()
        .await?;

    let adjustments = engine::evaluate(
        order,
        line_items,
        &candidates,
        order.promo_code.as_deref(),
        is_first_order,
        catalog,
    )?;

    totals::recompute(order, line_items, &shipments, &adjustments);

    for adjustment in &adjustments {
        if let Some(promotion_id) = adjustment.promotion_id {
            uow.emit(DomainEvent::PromotionApplied {
                order_id: order.id(),
                promotion_id,
            });
        }
    }

    for line in line_items.iter() {
        repos
            .line_items
            .replace_one_with_session(doc! { "_id": line._id }, line, None, &mut uow.session)
            .await?;
    }
    repos
        .adjustments
        .delete_many_with_session(doc! { "order_id": order.id() }, None, &mut uow.session)
        .await?;
    if !adjustments.is_empty() {
        repos
            .adjustments
            .insert_many_with_session(&adjustments, None, &mut uow.session)
            .await?;
    }
    persist_order(repos, uow, order).await
}

/// Persists `order` with an optimistic `row_version` filter, retrying the
/// whole load-mutate-save cycle on conflict up to the shared retry budget
/// (spec §7 "Concurrency"). On a retried attempt the in-memory `order` is
/// refreshed to the current `row_version` before the write is re-applied,
/// the same reload-then-reapply shape `inventory::engine::apply_with_retry`
/// uses for stock items.
async fn persist_order(repos: &Repositories, uow: &mut UnitOfWork, order: &mut Order) -> Result<(), CoreError> {
    let repos = &*repos;
    let uow = &mut *uow;
    let order = &mut *order;
    retry_on_conflict(|attempt| {
        let repos = &*repos;
        let uow = &mut *uow;
        let order = &mut *order;
        async move {
            if attempt > 0 {
                let current = repos
                    .orders
                    .find_one_with_session(doc! { "_id": order.id() }, None, &mut uow.session)
                    .await?
                    .ok_or_else(|| CoreError::not_found("Order", order.id()))?;
                order.row_version = current.row_version;
            }
            let expected_version = order.row_version;
            order.row_version += 1;
            let result = repos
                .orders
                .update_one_with_session(
                    doc! { "_id": order.id(), "row_version": expected_version as i64 },
                    doc! { "$set": bson::to_bson(&*order).map_err(|e| CoreError::internal(e.to_string()))? },
                    None,
                    &mut uow.session,
                )
                .await?;
            if result.modified_count == 0 {
                order.row_version = expected_version;
                return Err(CoreError::concurrency_conflict("Order", order.id()));
            }
            Ok(())
        }
    })
    .await
}

pub async fn add_line_item(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    price: VariantPrice,
    quantity: u32,
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Cart], "add_line_item")?;
    if !price.active {
        return Err(CoreError::business_rule("Variant.Inactive", "variant is inactive"));
    }
    if quantity == 0 {
        return Err(CoreError::validation("quantity must be positive"));
    }

    let mut line_items = load_line_items(repos, uow, order_id).await?;
    let emitted_line_id;
    if let Some(existing) = line_items.iter_mut().find(|l| l.variant_id == price.variant_id) {
        existing.quantity += quantity;
        emitted_line_id = existing._id;
    } else {
        let line = LineItem::new(order_id, price.variant_id, quantity, price.unit_price);
        emitted_line_id = line._id;
        repos
            .line_items
            .insert_one_with_session(&line, None, &mut uow.session)
            .await?;
        line_items.push(line);
    }

    recompute_and_persist(repos, uow, &mut order, &mut line_items, catalog).await?;
    uow.emit(DomainEvent::LineItemAdded {
        order_id,
        line_item_id: emitted_line_id,
    });
    Ok(order)
}

pub async fn set_quantity(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    line_item_id: LineItemId,
    quantity: u32,
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Cart], "set_quantity")?;
    let mut line_items = load_line_items(repos, uow, order_id).await?;

    if quantity == 0 {
        line_items.retain(|l| l._id != line_item_id);
        repos
            .line_items
            .delete_one_with_session(doc! { "_id": line_item_id }, None, &mut uow.session)
            .await?;
        uow.emit(DomainEvent::LineItemRemoved { order_id, line_item_id });
    } else if let Some(line) = line_items.iter_mut().find(|l| l._id == line_item_id) {
        line.quantity = quantity;
    } else {
        return Err(CoreError::not_found("LineItem", line_item_id));
    }

    recompute_and_persist(repos, uow, &mut order, &mut line_items, catalog).await?;
    Ok(order)
}

pub async fn remove_line_item(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    line_item_id: LineItemId,
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Cart], "remove_line_item")?;
    let mut line_items = load_line_items(repos, uow, order_id).await?;
    line_items.retain(|l| l._id != line_item_id);
    repos
        .line_items
        .delete_one_with_session(doc! { "_id": line_item_id }, None, &mut uow.session)
        .await?;
    repos
        .adjustments
        .delete_many_with_session(doc! { "target_id": line_item_id }, None, &mut uow.session)
        .await?;
    recompute_and_persist(repos, uow, &mut order, &mut line_items, catalog).await?;
    uow.emit(DomainEvent::LineItemRemoved { order_id, line_item_id });
    Ok(order)
}

pub async fn empty(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Cart, OrderStatus::Address, OrderStatus::Delivery], "empty")?;
    repos
        .line_items
        .delete_many_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
        .await?;
    repos
        .adjustments
        .delete_many_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
        .await?;
    repos
        .shipments
        .delete_many_with_session(
            doc! { "order_id": order_id, "status": "Pending" },
            None,
            &mut uow.session,
        )
        .await?;
    let from = order.status;
    order.status = OrderStatus::Cart;
    let mut empty_lines = Vec::new();
    recompute_and_persist(repos, uow, &mut order, &mut empty_lines, catalog).await?;
    record_history(repos, uow, &order, Some(from), OrderStatus::Cart, "order emptied").await?;
    Ok(order)
}

/// Merges a guest cart into `user_id`'s existing Cart order in the same
/// currency, summing quantities; lines added less than 10 minutes ago
/// re-price to the current snapshot, older lines keep theirs (spec §4.1
/// "Guest carts").
pub async fn associate(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    user_id: UserId,
    current_prices: &[VariantPrice],
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    if order.user_id.is_some() {
        return Err(CoreError::state_conflict("Order.AlreadyAssociated", "order already has a user"));
    }

    let existing_cart = repos
        .orders
        .find_one_with_session(
            doc! { "user_id": user_id, "status": "Cart", "currency": order.currency.as_str() },
            None,
            &mut uow.session,
        )
        .await?;

    order.user_id = Some(user_id);

    if let Some(mut target) = existing_cart {
        let mut target_lines = load_line_items(repos, uow, target.id()).await?;
        let mut guest_lines = load_line_items(repos, uow, order_id).await?;
        for guest_line in guest_lines.drain(..) {
            let recently_added = (bson::DateTime::now().timestamp_millis() - guest_line.added_at.timestamp_millis())
                < 10 * 60 * 1000;
            if let Some(existing) = target_lines.iter_mut().find(|l| l.variant_id == guest_line.variant_id) {
                existing.quantity += guest_line.quantity;
                if recently_added {
                    if let Some(price) = current_prices.iter().find(|p| p.variant_id == guest_line.variant_id) {
                        existing.unit_price = price.unit_price;
                    }
                }
            } else {
                target_lines.push(guest_line);
            }
        }
        repos
            .line_items
            .delete_many_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
            .await?;
        repos
            .adjustments
            .delete_many_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
            .await?;
        for line in &target_lines {
            repos
                .line_items
                .replace_one_with_session(
                    doc! { "_id": line._id },
                    line,
                    mongodb::options::ReplaceOptions::builder().upsert(true).build(),
                    &mut uow.session,
                )
                .await?;
        }
        recompute_and_persist(repos, uow, &mut target, &mut target_lines, catalog).await?;
        repos
            .orders
            .delete_one_with_session(doc! { "_id": order_id }, None, &mut uow.session)
            .await?;
        return Ok(target);
    }

    persist_order(repos, uow, &mut order).await?;
    Ok(order)
}

pub async fn set_shipping_address(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    address: Address,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Cart, OrderStatus::Address, OrderStatus::Delivery], "set_shipping_address")?;
    state_machine::set_shipping_address(&mut order, address);
    persist_order(repos, uow, &mut order).await?;
    Ok(order)
}

/// `select_shipping_method` (spec §4.1 `Delivery -> Payment
/// [select_shipping_method + advance]`): assigns the chosen method and its
/// cost to every shipment allocation produced, then recomputes totals so
/// `shipment_total` reflects the real cost instead of allocation's
/// placeholder zero. Only after this has run for every shipment does
/// `guard_delivery_to_payment` allow `advance` past `Delivery`.
pub async fn select_shipping_method(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    shipment_method_id: ShippingMethodId,
    cost: i64,
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Delivery], "select_shipping_method")?;
    let shipments = load_shipments(repos, uow, order_id).await?;
    if shipments.is_empty() {
        return Err(CoreError::business_rule("Order.NoShipments", "no shipments to select a method for"));
    }
    for mut shipment in shipments {
        shipment.shipment_method_id = Some(shipment_method_id);
        shipment.cost = cost;
        repos
            .shipments
            .replace_one_with_session(doc! { "_id": shipment._id }, &shipment, None, &mut uow.session)
            .await?;
    }
    let mut line_items = load_line_items(repos, uow, order_id).await?;
    recompute_and_persist(repos, uow, &mut order, &mut line_items, catalog).await?;
    Ok(order)
}

pub async fn set_email(repos: &Repositories, uow: &mut UnitOfWork, order_id: OrderId, email: String) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    order.email = Some(email);
    persist_order(repos, uow, &mut order).await?;
    Ok(order)
}

pub async fn set_special_instructions(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    instructions: String,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    order.special_instructions = Some(instructions);
    persist_order(repos, uow, &mut order).await?;
    Ok(order)
}

pub async fn apply_coupon(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    code: String,
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Cart, OrderStatus::Address, OrderStatus::Delivery, OrderStatus::Payment], "apply_coupon")?;
    let previous_code = order.promo_code.clone();
    order.promo_code = Some(code);
    let mut line_items = load_line_items(repos, uow, order_id).await?;
    match recompute_and_persist(repos, uow, &mut order, &mut line_items, catalog).await {
        Ok(()) => Ok(order),
        Err(err) => {
            // Do not mutate state on a rejected coupon (spec §4.1).
            order.promo_code = previous_code;
            Err(err)
        }
    }
}

/// Dedicated remove-coupon command (Open Question decision in DESIGN.md):
/// clears `promo_code` and re-runs recomputation, rather than overloading
/// `apply_coupon` with an empty code.
pub async fn remove_coupon(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order_id: OrderId,
    catalog: &CatalogContext,
) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    order.promo_code = None;
    order.promotion_id = None;
    let mut line_items = load_line_items(repos, uow, order_id).await?;
    recompute_and_persist(repos, uow, &mut order, &mut line_items, catalog).await?;
    Ok(order)
}

/// `OrderAdvance`: re-evaluates guards for the next state in sequence and
/// transitions as far as they allow; idempotent (spec §4.1 "advance").
pub async fn advance(repos: &Repositories, uow: &mut UnitOfWork, order_id: OrderId) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    loop {
        let next = match order.status {
            OrderStatus::Cart => OrderStatus::Address,
            OrderStatus::Address => OrderStatus::Delivery,
            OrderStatus::Delivery => OrderStatus::Payment,
            OrderStatus::Payment => OrderStatus::Confirm,
            _ => break,
        };
        if !state_machine::is_allowed_transition(order.status, next) {
            break;
        }

        let line_items = load_line_items(repos, uow, order_id).await?;
        let mut shipments = load_shipments(repos, uow, order_id).await?;
        // Calling `advance()` straight from `Delivery` (not chained from the
        // `Address` transition below, e.g. a retry after a prior attempt
        // failed allocation) still needs shipments to exist before the
        // guard can say anything useful (S3).
        if next == OrderStatus::Payment && shipments.is_empty() {
            allocate_shipments(repos, uow, &order, &line_items).await?;
            shipments = load_shipments(repos, uow, order_id).await?;
        }
        let payments: Vec<_> = repos
            .payments
            .find_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
            .await?
            .stream(&mut uow.session)
            .try_collect()
            .await?;

        let guard_result = match next {
            OrderStatus::Address => state_machine::guard_cart_to_address(&line_items),
            OrderStatus::Delivery => state_machine::guard_address_to_delivery(&order),
            OrderStatus::Payment => state_machine::guard_delivery_to_payment(&shipments),
            OrderStatus::Confirm => state_machine::guard_payment_sufficiency(order.grand_total, &payments).map(|_| ()),
            _ => Ok(()),
        };
        guard_result?;

        let from = state_machine::transition(&mut order, next);
        persist_order(repos, uow, &mut order).await?;
        record_history(repos, uow, &order, Some(from), next, "advanced").await?;
        uow.emit(DomainEvent::OrderStateChanged { order_id, from, to: next });

        if next == OrderStatus::Delivery {
            allocate_shipments(repos, uow, &order, &line_items).await?;
        }
        if next == OrderStatus::Confirm {
            let auto_complete = state_machine::guard_payment_sufficiency(order.grand_total, &payments)?;
            if auto_complete {
                return complete(repos, uow, order_id).await;
            }
        }
    }
    Ok(order)
}

/// Creates shipments for the order's line items using the allocation
/// policy (spec §4.3 "Allocation to shipments"), reserving the stock each
/// plan entails. Fails `BusinessRule.OutOfStock` and leaves shipments
/// untouched if allocation cannot be satisfied (S3).
async fn allocate_shipments(
    repos: &Repositories,
    uow: &mut UnitOfWork,
    order: &Order,
    line_items: &[LineItem],
) -> Result<(), CoreError> {
    let stock_items: Vec<_> = repos
        .stock_items
        .find_with_session(doc! {}, None, &mut uow.session)
        .await?
        .stream(&mut uow.session)
        .try_collect()
        .await?;
    let locations: Vec<_> = repos
        .stock_locations
        .find_with_session(doc! {}, None, &mut uow.session)
        .await?
        .stream(&mut uow.session)
        .try_collect()
        .await?;

    let availability: Vec<StockAvailability> = stock_items
        .iter()
        .map(|item| StockAvailability {
            variant_id: item.variant_id,
            stock_location_id: item.stock_location_id,
            is_default_location: locations
                .iter()
                .find(|l| l._id == item.stock_location_id)
                .map(|l| l.is_default)
                .unwrap_or(false),
            available: item.count_available(),
            backorderable: item.backorderable,
            backorder_headroom: item.backorder_limit as i64,
        })
        .collect();

    let plan = allocation::allocate(line_items, &availability)?;

    for (location_id, shipment_plan) in plan.shipments {
        let mut quantities: std::collections::HashMap<VariantId, i64> = std::collections::HashMap::new();
        for planned_unit in &shipment_plan.units {
            *quantities.entry(planned_unit.variant_id).or_insert(0) += 1;
        }
        for (variant_id, quantity) in quantities {
            let stock_item = stock_items
                .iter()
                .find(|item| item.variant_id == variant_id && item.stock_location_id == location_id)
                .ok_or_else(|| CoreError::not_found("StockItem", variant_id))?;
            inventory_engine::apply_with_retry(uow, repos, stock_item._id, |item| {
                inventory_engine::reserve(item, quantity, Originator::Order(order.id()))
            })
            .await?;
        }

        let mut shipment = Shipment::new(order.id(), format!("SH{}", bson::Uuid::new()), location_id, 0);
        repos
            .shipments
            .insert_one_with_session(&shipment, None, &mut uow.session)
            .await?;
        for planned_unit in &shipment_plan.units {
            let status = if planned_unit.backordered {
                InventoryUnitStatus::Backordered
            } else {
                InventoryUnitStatus::OnHand
            };
            let mut unit = InventoryUnit::new(planned_unit.variant_id, planned_unit.line_item_id, status);
            unit.shipment_id = Some(shipment._id);
            repos
                .inventory_units
                .insert_one_with_session(&unit, None, &mut uow.session)
                .await?;
        }
        let units: Vec<_> = repos
            .inventory_units
            .find_with_session(doc! { "shipment_id": shipment._id }, None, &mut uow.session)
            .await?
            .stream(&mut uow.session)
            .try_collect()
            .await?;
        if crate::shipment::state_machine::mark_ready(&mut shipment, &units).is_ok() {
            repos
                .shipments
                .replace_one_with_session(doc! { "_id": shipment._id }, &shipment, None, &mut uow.session)
                .await?;
            uow.emit(DomainEvent::ShipmentReady {
                shipment_id: shipment._id,
                order_id: order.id(),
            });
        }
    }
    Ok(())
}

/// `OrderComplete`: `Confirm -> Complete`. Stamps `completed_at`, freezes
/// prices (no further mutation paths exist once terminal), and emits
/// `OrderCompleted` (spec §4.1 "Completion").
pub async fn complete(repos: &Repositories, uow: &mut UnitOfWork, order_id: OrderId) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    require_status(&order, &[OrderStatus::Confirm, OrderStatus::Payment], "complete")?;
    let from = state_machine::transition(&mut order, OrderStatus::Complete);
    order.completed_at = Some(bson::DateTime::now());
    persist_order(repos, uow, &mut order).await?;
    record_history(repos, uow, &order, Some(from), OrderStatus::Complete, "order completed").await?;
    uow.emit(DomainEvent::OrderStateChanged { order_id, from, to: OrderStatus::Complete });
    uow.emit(DomainEvent::OrderCompleted { order_id });

    if let Some(promotion_id) = order.promotion_id {
        repos
            .promotions
            .update_one_with_session(
                doc! { "_id": promotion_id },
                doc! { "$inc": { "usage_count": 1 } },
                None,
                &mut uow.session,
            )
            .await?;
    }
    Ok(order)
}

/// `OrderCancel`: any non-terminal state -> Canceled, blocked while a
/// Completed payment has net-captured > 0 (spec §4.1 guard, S6).
pub async fn cancel(repos: &Repositories, uow: &mut UnitOfWork, order_id: OrderId, reason: String) -> Result<Order, CoreError> {
    let mut order = load_order(repos, uow, order_id).await?;
    if order.status.is_terminal_for_cancel() {
        return Err(CoreError::state_conflict("Order.AlreadyTerminal", "order is already in a terminal state"));
    }
    let payments: Vec<_> = repos
        .payments
        .find_with_session(doc! { "order_id": order_id }, None, &mut uow.session)
        .await?
        .stream(&mut uow.session)
        .try_collect()
        .await?;
    state_machine::guard_cancelable(&payments)?;

    let was_complete = order.status == OrderStatus::Complete;
    let from = state_machine::transition(&mut order, OrderStatus::Canceled);
    order.canceled_at = Some(bson::DateTime::now());
    persist_order(repos, uow, &mut order).await?;
    record_history(repos, uow, &order, Some(from), OrderStatus::Canceled, &reason).await?;
    uow.emit(DomainEvent::OrderStateChanged { order_id, from, to: OrderStatus::Canceled });
    uow.emit(DomainEvent::OrderCanceled { order_id });

    if was_complete {
        if let Some(promotion_id) = order.promotion_id {
            repos
                .promotions
                .update_one_with_session(
                    doc! { "_id": promotion_id },
                    doc! { "$inc": { "usage_count": -1 } },
                    None,
                    &mut uow.session,
                )
                .await?;
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_transitions_cover_every_state_machine_edge() {
        assert!(ALLOWED_TRANSITIONS.contains(&(OrderStatus::Payment, OrderStatus::Complete)));
        assert!(ALLOWED_TRANSITIONS.contains(&(OrderStatus::Confirm, OrderStatus::Canceled)));
        assert!(ALLOWED_TRANSITIONS.contains(&(OrderStatus::Complete, OrderStatus::Canceled)));
    }

    #[test]
    fn complete_is_not_terminal_for_cancel() {
        // S6: a Complete order must still reach `guard_cancelable`'s
        // captured-payment check, not bounce off an earlier terminal guard.
        assert!(!OrderStatus::Complete.is_terminal_for_cancel());
        assert!(OrderStatus::Canceled.is_terminal_for_cancel());
        assert!(OrderStatus::Returned.is_terminal_for_cancel());
    }
}
