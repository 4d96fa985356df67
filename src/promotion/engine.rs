//! Promotion candidate selection, rule evaluation and action application
//! (spec component C5, §4.2).

use std::collections::HashMap;

use crate::error::CoreError;
use crate::ids::{TaxonId, VariantId};
use crate::money::scale_to_cap;
use crate::order::line_item::{Adjustment, AdjustmentActionKind, AdjustmentTarget, LineItem};
use crate::order::model::Order;
use crate::promotion::model::{Action, LineItemFilter, Promotion, Rule};

/// Read-only catalog data the engine needs but does not own (spec §4.2
/// SUPPLEMENT "Taxon tree": taxonomy is out-of-scope catalog data, so the
/// ascendant-closure map is computed elsewhere and handed in here).
#[derive(Debug, Default, Clone)]
pub struct CatalogContext {
    /// Direct taxon classifications per variant.
    pub variant_taxons: HashMap<VariantId, Vec<TaxonId>>,
    /// `taxon -> all ascendants (inclusive)`, precomputed by the catalog
    /// surface so this engine never walks a tree itself.
    pub taxon_ascendants: HashMap<TaxonId, Vec<TaxonId>>,
}

impl CatalogContext {
    /// Builds a context from flat `(id, ids)` pairs, the shape a caller
    /// outside this module (the order command layer, wiring catalog data it
    /// does not own) can assemble without reaching into `HashMap` directly.
    pub fn from_pairs(
        variant_taxons: impl IntoIterator<Item = (VariantId, Vec<TaxonId>)>,
        taxon_ascendants: impl IntoIterator<Item = (TaxonId, Vec<TaxonId>)>,
    ) -> Self {
        Self {
            variant_taxons: variant_taxons.into_iter().collect(),
            taxon_ascendants: taxon_ascendants.into_iter().collect(),
        }
    }

    fn variant_under_any(&self, variant_id: VariantId, taxons: &[TaxonId]) -> bool {
        let Some(direct) = self.variant_taxons.get(&variant_id) else {
            return false;
        };
        direct.iter().any(|taxon| {
            let ascendants = self
                .taxon_ascendants
                .get(taxon)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            taxons.contains(taxon) || ascendants.iter().any(|a| taxons.contains(a))
        })
    }
}

/// Evaluates every candidate promotion against `order`/`line_items` and
/// returns the full replacement adjustment set for this recomputation pass.
///
/// `is_first_order` is supplied by the caller (order commands), since
/// answering it requires querying other orders by `user_id`, which this
/// pure function intentionally does not do.
pub fn evaluate(
    order: &Order,
    line_items: &[LineItem],
    candidates: &[Promotion],
    coupon_code: Option<&str>,
    is_first_order: bool,
    catalog: &CatalogContext,
) -> Result<Vec<Adjustment>, CoreError> {
    let mut selected: Vec<&Promotion> = candidates
        .iter()
        .filter(|p| is_candidate(p, coupon_code, order.item_total))
        .collect();
    // Coupon-bound promotions sort above automatic ones; within a tier,
    // flat discounts before percentage discounts (spec §4.2 "Selection").
    selected.sort_by(|a, b| {
        let a_coupon = a.requires_code;
        let b_coupon = b.requires_code;
        b_coupon
            .cmp(&a_coupon)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| action_tier(&a.action).cmp(&action_tier(&b.action)))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    let mut adjustments = Vec::new();
    for promotion in selected {
        match evaluate_rules(promotion, order, line_items, is_first_order, catalog) {
            Ok(()) => {
                let produced = apply_action(promotion, order, line_items, catalog)?;
                adjustments.extend(produced);
            }
            Err(err) => {
                // A coupon promotion's rule failure is reported to the
                // caller (spec §4.1 apply_coupon); automatic promotions are
                // silently skipped.
                if promotion.requires_code && coupon_code == promotion.code.as_deref() {
                    return Err(err);
                }
            }
        }
    }
    Ok(adjustments)
}

fn action_tier(action: &Action) -> u8 {
    match action {
        Action::OrderFlatDiscount { .. } => 0,
        Action::FreeShipping => 0,
        Action::OrderPercentDiscount { .. } => 1,
        Action::LineItemPercentDiscount { .. } => 1,
    }
}

fn is_candidate(promotion: &Promotion, coupon_code: Option<&str>, item_total: i64) -> bool {
    if !promotion.active {
        return false;
    }
    let now = bson::DateTime::now();
    if let Some(starts_at) = promotion.starts_at {
        if now < starts_at {
            return false;
        }
    }
    if let Some(expires_at) = promotion.expires_at {
        if now >= expires_at {
            return false;
        }
    }
    if let Some(limit) = promotion.usage_limit {
        if promotion.usage_count >= limit {
            return false;
        }
    }
    if let Some(min_order_amount) = promotion.min_order_amount {
        if item_total < min_order_amount {
            return false;
        }
    }
    if promotion.requires_code {
        match (&promotion.code, coupon_code) {
            (Some(promo_code), Some(supplied)) => promo_code.eq_ignore_ascii_case(supplied),
            _ => false,
        }
    } else {
        true
    }
}

fn evaluate_rules(
    promotion: &Promotion,
    order: &Order,
    line_items: &[LineItem],
    is_first_order: bool,
    catalog: &CatalogContext,
) -> Result<(), CoreError> {
    for rule in &promotion.rules {
        let ok = match rule {
            Rule::UserLoggedIn => order.user_id.is_some(),
            Rule::FirstOrder => is_first_order,
            Rule::MinQuantity(n) => {
                line_items.iter().map(|l| l.quantity).sum::<u32>() >= *n
            }
            Rule::MinOrderAmount(m) => order.item_total >= *m,
            Rule::ProductInCart(ids) => line_items.iter().any(|l| ids.contains(&l.variant_id)),
            Rule::TaxonInCart(ids) => line_items
                .iter()
                .any(|l| catalog.variant_under_any(l.variant_id, ids)),
            Rule::UserAllowList(ids) => order
                .user_id
                .map(|user_id| ids.contains(&user_id))
                .unwrap_or(false),
        };
        if !ok {
            return Err(CoreError::business_rule(
                "Promotion.RuleNotSatisfied",
                format!("promotion `{}` rule not satisfied: {:?}", promotion.name, rule),
            ));
        }
    }
    Ok(())
}

fn apply_action(
    promotion: &Promotion,
    order: &Order,
    line_items: &[LineItem],
    catalog: &CatalogContext,
) -> Result<Vec<Adjustment>, CoreError> {
    let mut produced = match &promotion.action {
        Action::OrderPercentDiscount {
            pct_numerator,
            pct_denominator,
        } => {
            let discount = -order
                .money(order.item_total)
                .mul_rational(*pct_numerator, *pct_denominator)
                .amount_minor;
            vec![Adjustment::new(
                order.id(),
                AdjustmentTarget::Order,
                order.id(),
                AdjustmentActionKind::OrderPercentDiscount,
                discount,
                format!("{} percent discount", promotion.name),
                Some(promotion._id),
            )]
        }
        Action::OrderFlatDiscount { amount } => {
            let discount = -(*amount).min(order.item_total);
            vec![Adjustment::new(
                order.id(),
                AdjustmentTarget::Order,
                order.id(),
                AdjustmentActionKind::OrderFlatDiscount,
                discount,
                format!("{} flat discount", promotion.name),
                Some(promotion._id),
            )]
        }
        Action::LineItemPercentDiscount {
            pct_numerator,
            pct_denominator,
            filter,
        } => line_items
            .iter()
            .filter(|line| matches_filter(filter, line, catalog))
            .map(|line| {
                let before_adjustments = line.unit_price * line.quantity as i64;
                let discount = -order
                    .money(before_adjustments)
                    .mul_rational(*pct_numerator, *pct_denominator)
                    .amount_minor;
                Adjustment::new(
                    order.id(),
                    AdjustmentTarget::LineItem,
                    line._id,
                    AdjustmentActionKind::LineItemPercentDiscount,
                    discount,
                    format!("{} line discount", promotion.name),
                    Some(promotion._id),
                )
            })
            .collect(),
        Action::FreeShipping => vec![Adjustment::new(
            order.id(),
            AdjustmentTarget::Order,
            order.id(),
            AdjustmentActionKind::FreeShipping,
            -order.shipment_total,
            format!("{} free shipping", promotion.name),
            Some(promotion._id),
        )],
    };

    if let Some(cap) = promotion.max_discount_amount {
        let amounts: Vec<i64> = produced.iter().map(|a| a.amount.unsigned_abs() as i64).collect();
        let total: i64 = amounts.iter().sum();
        if total > cap {
            let scaled = scale_to_cap(&amounts, cap);
            for (adjustment, capped) in produced.iter_mut().zip(scaled) {
                adjustment.amount = -capped;
            }
        }
    }

    Ok(produced)
}

fn matches_filter(filter: &LineItemFilter, line: &LineItem, catalog: &CatalogContext) -> bool {
    match filter {
        LineItemFilter::AllLines => true,
        LineItemFilter::SpecificTaxons(taxons) => catalog.variant_under_any(line.variant_id, taxons),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::CurrencyCode;

    fn usd_order(item_total: i64) -> Order {
        let mut order = Order::new_cart("R1".into(), None, Some("guest".into()), CurrencyCode::new("USD").unwrap());
        order.item_total = item_total;
        order
    }

    fn coupon_promotion(pct_numerator: i64, max_discount: Option<i64>) -> Promotion {
        Promotion {
            _id: bson::Uuid::new(),
            name: "SAVE20".into(),
            code: Some("SAVE20".into()),
            description: None,
            min_order_amount: None,
            max_discount_amount: max_discount,
            starts_at: None,
            expires_at: None,
            usage_limit: None,
            usage_count: 0,
            active: true,
            requires_code: true,
            priority: 0,
            created_at: bson::DateTime::now(),
            action: Action::OrderPercentDiscount {
                pct_numerator,
                pct_denominator: 100,
            },
            rules: vec![],
        }
    }

    #[test]
    fn percent_coupon_applies_cap() {
        let order = usd_order(10000);
        let promo = coupon_promotion(20, Some(1500));
        let adjustments = evaluate(
            &order,
            &[],
            &[promo],
            Some("save20"),
            false,
            &CatalogContext::default(),
        )
        .unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].amount, -1500);
    }

    #[test]
    fn non_matching_coupon_code_is_not_a_candidate() {
        let order = usd_order(10000);
        let promo = coupon_promotion(20, None);
        let adjustments = evaluate(&order, &[], &[promo], Some("WRONG"), false, &CatalogContext::default()).unwrap();
        assert!(adjustments.is_empty());
    }

    #[test]
    fn below_min_order_amount_is_not_a_candidate() {
        let order = usd_order(500);
        let mut promo = coupon_promotion(20, None);
        promo.min_order_amount = Some(1000);
        let adjustments = evaluate(&order, &[], &[promo], Some("save20"), false, &CatalogContext::default()).unwrap();
        assert!(adjustments.is_empty());
    }

    #[test]
    fn line_item_discount_skips_lines_outside_the_filtered_taxon() {
        let order = usd_order(10000);
        let in_taxon = VariantId::new();
        let out_of_taxon = VariantId::new();
        let taxon = TaxonId::new();
        let mut catalog = CatalogContext::default();
        catalog.variant_taxons.insert(in_taxon, vec![taxon]);

        let lines = vec![
            LineItem::new(order.id(), in_taxon, 1, 1000),
            LineItem::new(order.id(), out_of_taxon, 1, 1000),
        ];
        let promo = Promotion {
            _id: bson::Uuid::new(),
            name: "TAXON10".into(),
            code: None,
            description: None,
            min_order_amount: None,
            max_discount_amount: None,
            starts_at: None,
            expires_at: None,
            usage_limit: None,
            usage_count: 0,
            active: true,
            requires_code: false,
            priority: 0,
            created_at: bson::DateTime::now(),
            action: Action::LineItemPercentDiscount {
                pct_numerator: 10,
                pct_denominator: 100,
                filter: LineItemFilter::SpecificTaxons(vec![taxon]),
            },
            rules: vec![],
        };

        let adjustments = evaluate(&order, &lines, &[promo], None, false, &catalog).unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].target_id, lines[0]._id);
    }

    #[test]
    fn not_yet_started_promotion_is_not_a_candidate() {
        let order = usd_order(10000);
        let mut promo = coupon_promotion(20, None);
        promo.starts_at = Some(bson::DateTime::from_millis(
            bson::DateTime::now().timestamp_millis() + 24 * 60 * 60 * 1000,
        ));
        let adjustments = evaluate(&order, &[], &[promo], Some("save20"), false, &CatalogContext::default()).unwrap();
        assert!(adjustments.is_empty());
    }
}
