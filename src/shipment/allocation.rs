//! Allocation of line-item units to shipments (spec §4.3 "Allocation to
//! shipments"). Pure planning logic: nothing here mutates stock counters or
//! persists anything — the caller applies the returned plan's reservations
//! (via `inventory::engine`) only after this function returns `Ok`, so a
//! `BusinessRule.OutOfStock` failure leaves shipments untouched.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::ids::{LineItemId, StockLocationId, VariantId};
use crate::order::line_item::LineItem;

/// A denormalized view of one (variant, location) stock item, as much as
/// the allocator needs to decide where to pull units from.
#[derive(Debug, Clone)]
pub struct StockAvailability {
    pub variant_id: VariantId,
    pub stock_location_id: StockLocationId,
    pub is_default_location: bool,
    pub available: i64,
    pub backorderable: bool,
    pub backorder_headroom: i64,
}

/// One unit assigned to a location, either from on-hand stock or as a new
/// backorder.
#[derive(Debug, Clone)]
pub struct PlannedUnit {
    pub variant_id: VariantId,
    pub line_item_id: LineItemId,
    pub backordered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShipmentPlan {
    pub units: Vec<PlannedUnit>,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationPlan {
    pub shipments: HashMap<StockLocationId, ShipmentPlan>,
}

/// Greedily assigns every unit of every line item to a stock location,
/// preferring (in order): the default location, locations already chosen
/// for this allocation (to minimize shipment count), then highest
/// available quantity. Falls back to backorder only if every unit of every
/// line item can be satisfied somewhere (on hand or backorder); otherwise
/// fails `BusinessRule.OutOfStock` naming the first unsatisfiable variant.
pub fn allocate(line_items: &[LineItem], stock: &[StockAvailability]) -> Result<AllocationPlan, CoreError> {
    let mut remaining: HashMap<StockLocationId, i64> = HashMap::new();
    let mut backorder_headroom: HashMap<StockLocationId, i64> = HashMap::new();
    for s in stock {
        *remaining.entry(s.stock_location_id).or_insert(0) += s.available;
        if s.backorderable {
            backorder_headroom
                .entry(s.stock_location_id)
                .and_modify(|h| *h = (*h).max(s.backorder_headroom))
                .or_insert(s.backorder_headroom);
        }
    }

    let mut used_locations: Vec<StockLocationId> = Vec::new();
    let mut plan = AllocationPlan::default();

    for line in line_items {
        let mut candidates: Vec<&StockAvailability> = stock
            .iter()
            .filter(|s| s.variant_id == line.variant_id)
            .collect();
        candidates.sort_by(|a, b| {
            let a_used = used_locations.contains(&a.stock_location_id);
            let b_used = used_locations.contains(&b.stock_location_id);
            b_used
                .cmp(&a_used)
                .then_with(|| b.is_default_location.cmp(&a.is_default_location))
                .then_with(|| b.available.cmp(&a.available))
        });

        let mut left = line.quantity as i64;
        for candidate in &candidates {
            if left == 0 {
                break;
            }
            let slot = remaining.entry(candidate.stock_location_id).or_insert(0);
            if *slot <= 0 {
                continue;
            }
            let take = left.min(*slot);
            *slot -= take;
            left -= take;
            used_locations.push(candidate.stock_location_id);
            plan.shipments
                .entry(candidate.stock_location_id)
                .or_default()
                .units
                .extend((0..take).map(|_| PlannedUnit {
                    variant_id: line.variant_id,
                    line_item_id: line._id,
                    backordered: false,
                }));
        }

        if left > 0 {
            // Try to satisfy the remainder as a backorder at any
            // backorderable location for this variant.
            if let Some(candidate) = candidates
                .iter()
                .find(|c| c.backorderable && backorder_headroom.get(&c.stock_location_id).copied().unwrap_or(0) >= left)
            {
                plan.shipments
                    .entry(candidate.stock_location_id)
                    .or_default()
                    .units
                    .extend((0..left).map(|_| PlannedUnit {
                        variant_id: line.variant_id,
                        line_item_id: line._id,
                        backordered: true,
                    }));
                left = 0;
            }
        }

        if left > 0 {
            return Err(CoreError::business_rule(
                "Stock.OutOfStock",
                format!("variant `{}` cannot be fully allocated ({} short)", line.variant_id, left),
            ));
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::OrderId;

    fn line(variant_id: VariantId, qty: u32) -> LineItem {
        LineItem::new(OrderId::new(), variant_id, qty, 1000)
    }

    #[test]
    fn allocates_fully_available_stock_to_one_location() {
        let variant = VariantId::new();
        let location = StockLocationId::new();
        let lines = vec![line(variant, 2)];
        let stock = vec![StockAvailability {
            variant_id: variant,
            stock_location_id: location,
            is_default_location: true,
            available: 5,
            backorderable: false,
            backorder_headroom: 0,
        }];
        let plan = allocate(&lines, &stock).unwrap();
        assert_eq!(plan.shipments[&location].units.len(), 2);
        assert!(plan.shipments[&location].units.iter().all(|u| !u.backordered));
    }

    #[test]
    fn falls_back_to_backorder_when_short() {
        let variant = VariantId::new();
        let location = StockLocationId::new();
        let lines = vec![line(variant, 2)];
        let stock = vec![StockAvailability {
            variant_id: variant,
            stock_location_id: location,
            is_default_location: true,
            available: 1,
            backorderable: true,
            backorder_headroom: 5,
        }];
        let plan = allocate(&lines, &stock).unwrap();
        let units = &plan.shipments[&location].units;
        assert_eq!(units.iter().filter(|u| u.backordered).count(), 1);
        assert_eq!(units.iter().filter(|u| !u.backordered).count(), 1);
    }

    #[test]
    fn fails_out_of_stock_when_unsatisfiable() {
        let variant = VariantId::new();
        let location = StockLocationId::new();
        let lines = vec![line(variant, 2)];
        let stock = vec![StockAvailability {
            variant_id: variant,
            stock_location_id: location,
            is_default_location: true,
            available: 1,
            backorderable: false,
            backorder_headroom: 0,
        }];
        let err = allocate(&lines, &stock).unwrap_err();
        assert_eq!(err.code(), "Stock.OutOfStock");
    }
}
