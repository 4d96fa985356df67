//! Deterministic, idempotent totals recomputation (spec §4.1 "Totals
//! recomputation", testable property 1 "Totals coherence", property 6
//! "Idempotent recomputation").

use crate::order::line_item::{Adjustment, AdjustmentTarget, LineItem};
use crate::order::model::Order;
use crate::shipment::model::{Shipment, ShipmentStatus};

/// Recomputes an order's totals in the six steps spec §4.1 names, given the
/// adjustment set the promotion engine just produced for this pass.
///
/// `promotion_adjustments` is taken as the authoritative adjustment set for
/// this recomputation: the promotion engine already performed natural-key
/// replacement (spec §4.2), so this function only has to fold them into
/// line/order totals, not merge them against a prior set itself.
pub fn recompute(
    order: &mut Order,
    line_items: &mut [LineItem],
    shipments: &[Shipment],
    promotion_adjustments: &[Adjustment],
) {
    // 1. Per-line totals: unit_price * quantity + Σ line-item adjustments.
    for line in line_items.iter_mut() {
        let line_adjustment_sum: i64 = promotion_adjustments
            .iter()
            .filter(|adj| adj.target == AdjustmentTarget::LineItem && adj.target_id == line._id)
            .map(|adj| adj.amount)
            .sum();
        line.line_total = line.unit_price * line.quantity as i64 + line_adjustment_sum;
    }

    // 2. item_total = Σ line totals.
    order.item_total = line_items.iter().map(|l| l.line_total).sum();

    // 3. shipment_total = Σ cost of non-canceled shipments.
    order.shipment_total = shipments
        .iter()
        .filter(|s| s.status != ShipmentStatus::Canceled)
        .map(|s| s.cost)
        .sum();

    // 4. Promotion evaluation already ran by the time this is called; the
    // caller passes its output in as `promotion_adjustments`.

    // 5. adjustment_total = Σ all adjustments (order- and line-item-level).
    order.adjustment_total = promotion_adjustments.iter().map(|adj| adj.amount).sum();

    // 6. grand_total.
    order.grand_total = order.item_total + order.shipment_total + order.adjustment_total;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::CurrencyCode;
    use crate::order::line_item::AdjustmentActionKind;

    fn usd_order() -> Order {
        Order::new_cart("R1".into(), None, Some("guest".into()), CurrencyCode::new("USD").unwrap())
    }

    #[test]
    fn totals_coherence_holds_with_no_adjustments() {
        let mut order = usd_order();
        let mut lines = vec![LineItem::new(order.id(), bson::Uuid::new(), 2, 1999)];
        recompute(&mut order, &mut lines, &[], &[]);
        assert_eq!(order.item_total, 3998);
        assert_eq!(order.shipment_total, 0);
        assert_eq!(order.adjustment_total, 0);
        assert_eq!(order.grand_total, 3998);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let mut order = usd_order();
        let mut lines = vec![LineItem::new(order.id(), bson::Uuid::new(), 1, 10000)];
        let adjustments = vec![Adjustment::new(
            order.id(),
            AdjustmentTarget::Order,
            order.id(),
            AdjustmentActionKind::OrderPercentDiscount,
            -1500,
            "SAVE20 capped",
            None,
        )];
        recompute(&mut order, &mut lines, &[], &adjustments);
        let first = (order.item_total, order.adjustment_total, order.grand_total);
        recompute(&mut order, &mut lines, &[], &adjustments);
        let second = (order.item_total, order.adjustment_total, order.grand_total);
        assert_eq!(first, second);
    }
}
