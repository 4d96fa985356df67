//! Checkout state machine guards and the allowed-transition table (spec
//! §4.1 "State machine" / "Guards per transition").

use crate::error::CoreError;
use crate::order::line_item::LineItem;
use crate::order::model::{Address, Order, OrderStatus};
use crate::payment::model::{Payment, PaymentStatus};
use crate::shipment::model::Shipment;

/// Every (from, to) pair §4.1's diagram permits. Testable property 9
/// ("state-machine closure") asserts every observed transition is a member
/// of this set.
pub const ALLOWED_TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Cart, OrderStatus::Address),
    (OrderStatus::Cart, OrderStatus::Canceled),
    (OrderStatus::Address, OrderStatus::Delivery),
    (OrderStatus::Address, OrderStatus::Cart),
    (OrderStatus::Address, OrderStatus::Canceled),
    (OrderStatus::Delivery, OrderStatus::Payment),
    (OrderStatus::Delivery, OrderStatus::Canceled),
    (OrderStatus::Payment, OrderStatus::Confirm),
    (OrderStatus::Payment, OrderStatus::Complete),
    (OrderStatus::Payment, OrderStatus::Canceled),
    (OrderStatus::Confirm, OrderStatus::Complete),
    (OrderStatus::Confirm, OrderStatus::Canceled),
    (OrderStatus::Complete, OrderStatus::AwaitingReturn),
    (OrderStatus::Complete, OrderStatus::Canceled),
    (OrderStatus::AwaitingReturn, OrderStatus::Returned),
];

pub fn is_allowed_transition(from: OrderStatus, to: OrderStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

fn guard_err(code: &'static str, message: impl Into<String>) -> CoreError {
    CoreError::business_rule(code, message)
}

/// Cart -> Address: at least one line item.
pub fn guard_cart_to_address(line_items: &[LineItem]) -> Result<(), CoreError> {
    if line_items.is_empty() {
        return Err(guard_err("Order.EmptyCart", "order has no line items"));
    }
    Ok(())
}

/// Address -> Delivery: shipping address present.
pub fn guard_address_to_delivery(order: &Order) -> Result<(), CoreError> {
    match &order.shipping_address {
        Some(_address) => Ok(()),
        None => Err(guard_err("Order.MissingShippingAddress", "no shipping address set")),
    }
}

/// Delivery -> Payment: exactly one selected shipping method per shipment.
pub fn guard_delivery_to_payment(shipments: &[Shipment]) -> Result<(), CoreError> {
    if shipments.is_empty() {
        return Err(guard_err("Order.NoShipments", "no shipments to select a method for"));
    }
    if shipments.iter().any(|s| s.shipment_method_id.is_none()) {
        return Err(guard_err(
            "Order.MissingShippingMethod",
            "every shipment must have exactly one selected shipping method",
        ));
    }
    Ok(())
}

/// Payment -> Confirm/Complete: `total > 0` requires sufficient
/// `{Authorized, Completed}` payments; `total == 0` requires none.
/// Returns whether the short-circuit straight-to-Complete applies (i.e. an
/// auto-capture payment already satisfies the order in full).
pub fn guard_payment_sufficiency(order_total: i64, payments: &[Payment]) -> Result<bool, CoreError> {
    if order_total == 0 {
        return Ok(true);
    }
    let covered: i64 = payments
        .iter()
        .filter(|p| matches!(p.status, PaymentStatus::Authorized | PaymentStatus::Completed))
        .map(|p| p.amount)
        .sum();
    if covered < order_total {
        return Err(guard_err(
            "Order.InsufficientPayment",
            format!("payments cover {} of required {}", covered, order_total),
        ));
    }
    let fully_captured = payments
        .iter()
        .any(|p| p.status == PaymentStatus::Completed) && covered >= order_total;
    Ok(fully_captured)
}

/// Any -> Canceled: no Completed captured payment with net-captured > 0
/// unless a refund already brought it back to zero.
pub fn guard_cancelable(payments: &[Payment]) -> Result<(), CoreError> {
    let net_captured: i64 = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.amount - p.refunded_amount)
        .sum();
    if net_captured > 0 {
        return Err(guard_err(
            "Order.CannotCancelWithCapturedPayment",
            format!("order has {} net captured across payments", net_captured),
        ));
    }
    Ok(())
}

/// Applies a validated transition. Callers must have already checked
/// `is_allowed_transition` and the relevant guard. `row_version` is left
/// untouched here — `persist_order`'s own optimistic-concurrency bump is the
/// single place that field advances, so its write filter always matches
/// what's actually in the database.
pub fn transition(order: &mut Order, to: OrderStatus) -> OrderStatus {
    let from = order.status;
    order.status = to;
    from
}

pub fn set_shipping_address(order: &mut Order, address: Address) {
    order.shipping_address = Some(address);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::CurrencyCode;

    #[test]
    fn closure_table_is_consistent_with_guard_usage() {
        assert!(is_allowed_transition(OrderStatus::Cart, OrderStatus::Address));
        assert!(!is_allowed_transition(OrderStatus::Cart, OrderStatus::Complete));
    }

    #[test]
    fn empty_cart_blocks_advance() {
        assert!(guard_cart_to_address(&[]).is_err());
    }

    #[test]
    fn zero_total_orders_need_no_payment() {
        assert!(guard_payment_sufficiency(0, &[]).unwrap());
    }

    #[test]
    fn cancel_blocked_by_net_captured_payment() {
        let mut payment = Payment::new(bson::Uuid::new(), 5000, CurrencyCode::new("USD").unwrap(), bson::Uuid::new());
        payment.status = PaymentStatus::Completed;
        let err = guard_cancelable(&[payment]).unwrap_err();
        assert_eq!(err.code(), "Order.CannotCancelWithCapturedPayment");
    }
}
