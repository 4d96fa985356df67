//! Stock movement operations and their optimistic-concurrency persistence
//! (spec component C4, §4.3, §5, §7).

use bson::doc;

use crate::db::{retry_on_conflict, UnitOfWork};
use crate::error::CoreError;
use crate::event_bus::DomainEvent;
use crate::inventory::model::{MovementAction, Originator, StockItem, StockMovement};
use crate::order::repo::Repositories;

/// `Adjust(±q, reason)`: changes `on_hand` by `q`. Fails if the result would
/// go negative.
pub fn adjust(item: &mut StockItem, delta: i64, reason: Option<String>) -> Result<StockMovement, CoreError> {
    let new_on_hand = item.quantity_on_hand + delta;
    if new_on_hand < 0 {
        return Err(CoreError::business_rule(
            "Stock.NegativeOnHand",
            format!("adjusting stock item `{}` by {} would make on_hand negative", item._id, delta),
        ));
    }
    item.quantity_on_hand = new_on_hand;
    item.row_version += 1;
    Ok(StockMovement::new(item._id, delta, Originator::Manual, MovementAction::Adjust, reason))
}

/// `Reserve(q, originator)`: increases `reserved` by `q`. Any overage past
/// on-hand must fit within `backorder_limit` and must be backorderable.
pub fn reserve(item: &mut StockItem, quantity: i64, originator: Originator) -> Result<StockMovement, CoreError> {
    let overage = item.backorder_overage(quantity);
    if overage > 0 {
        if !item.backorderable {
            return Err(CoreError::business_rule(
                "Stock.OutOfStock",
                format!("stock item `{}` cannot satisfy reservation of {}", item._id, quantity),
            ));
        }
        if overage > item.backorder_limit as i64 {
            return Err(CoreError::business_rule(
                "Stock.OutOfStock",
                format!(
                    "stock item `{}` reservation overage {} exceeds backorder_limit {}",
                    item._id, overage, item.backorder_limit
                ),
            ));
        }
    }
    item.quantity_reserved += quantity;
    item.row_version += 1;
    Ok(StockMovement::new(item._id, quantity, originator, MovementAction::Reserve, None))
}

/// `Release(q, originator)`: decreases `reserved` by `q`.
pub fn release(item: &mut StockItem, quantity: i64, originator: Originator) -> Result<StockMovement, CoreError> {
    if item.quantity_reserved - quantity < 0 {
        return Err(CoreError::internal(format!(
            "releasing {} from stock item `{}` would make reserved negative",
            quantity, item._id
        )));
    }
    item.quantity_reserved -= quantity;
    item.row_version += 1;
    Ok(StockMovement::new(item._id, -quantity, originator, MovementAction::Release, None))
}

/// `Transfer(q, src, dst)`: the two legs (`Adjust(-q, src)`,
/// `Adjust(+q, dst)`) are linked by a shared `transfer_id`; the caller is
/// responsible for persisting both atomically in the same unit of work.
pub fn transfer(
    src: &mut StockItem,
    dst: &mut StockItem,
    quantity: i64,
) -> Result<(StockMovement, StockMovement), CoreError> {
    let transfer_id = bson::Uuid::new();
    let mut src_movement = adjust(src, -quantity, Some("transfer out".into()))?;
    let mut dst_movement = adjust(dst, quantity, Some("transfer in".into()))?;
    src_movement.action = MovementAction::Transfer;
    dst_movement.action = MovementAction::Receive;
    src_movement.transfer_id = Some(transfer_id);
    dst_movement.transfer_id = Some(transfer_id);
    Ok((src_movement, dst_movement))
}

/// Loads a stock item, applies `op`, and persists the new counters with an
/// optimistic row-version filter, retrying on conflict up to the shared
/// retry budget (spec §4.3 "Concurrency", §7). The returned `StockMovement`
/// is inserted into the append-only ledger in the same session, and every
/// read/write goes through `uow.session` so a reservation never commits
/// ahead of (or survives the rollback of) the rest of the calling command's
/// transaction (spec §4.3 "either all lines reserve, or none do").
pub async fn apply_with_retry<F>(
    uow: &mut UnitOfWork,
    repos: &Repositories,
    stock_item_id: bson::Uuid,
    mut op: F,
) -> Result<StockMovement, CoreError>
where
    F: FnMut(&mut StockItem) -> Result<StockMovement, CoreError>,
{
    let uow = &mut *uow;
    let repos = &*repos;
    let movement = retry_on_conflict(|_attempt| {
        let op = &mut op;
        let uow = &mut *uow;
        let repos = &*repos;
        async move {
            let mut item = repos
                .stock_items
                .find_one_with_session(doc! { "_id": stock_item_id }, None, &mut uow.session)
                .await?
                .ok_or_else(|| CoreError::not_found("StockItem", stock_item_id))?;
            let expected_version = item.row_version;
            let movement = op(&mut item)?;
            let result = repos
                .stock_items
                .update_one_with_session(
                    doc! { "_id": stock_item_id, "row_version": expected_version as i64 },
                    doc! { "$set": bson::to_bson(&item).map_err(|e| CoreError::internal(e.to_string()))? },
                    None,
                    &mut uow.session,
                )
                .await?;
            if result.modified_count == 0 {
                return Err(CoreError::concurrency_conflict("StockItem", stock_item_id));
            }
            repos
                .stock_movements
                .insert_one_with_session(&movement, None, &mut uow.session)
                .await?;
            Ok(movement)
        }
    })
    .await?;
    uow.emit(DomainEvent::StockMoved {
        stock_item_id,
        delta: movement.quantity,
    });
    Ok(movement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{StockLocationId, VariantId};

    fn item() -> StockItem {
        StockItem::new(VariantId::new(), StockLocationId::new(), "SKU1".into())
    }

    #[test]
    fn adjust_fails_on_negative_on_hand() {
        let mut stock = item();
        stock.quantity_on_hand = 1;
        assert!(adjust(&mut stock, -5, None).is_err());
    }

    #[test]
    fn reserve_within_on_hand_succeeds() {
        let mut stock = item();
        stock.quantity_on_hand = 5;
        reserve(&mut stock, 3, Originator::Manual).unwrap();
        assert_eq!(stock.quantity_reserved, 3);
    }

    #[test]
    fn reserve_overage_without_backorder_fails() {
        let mut stock = item();
        stock.quantity_on_hand = 1;
        let err = reserve(&mut stock, 2, Originator::Manual).unwrap_err();
        assert_eq!(err.code(), "Stock.OutOfStock");
    }

    #[test]
    fn reserve_overage_within_backorder_limit_succeeds() {
        let mut stock = item();
        stock.quantity_on_hand = 1;
        stock.backorderable = true;
        stock.backorder_limit = 5;
        reserve(&mut stock, 3, Originator::Manual).unwrap();
        assert_eq!(stock.quantity_reserved, 3);
    }

    #[test]
    fn release_then_reserve_round_trips() {
        let mut stock = item();
        stock.quantity_on_hand = 5;
        reserve(&mut stock, 3, Originator::Manual).unwrap();
        release(&mut stock, 3, Originator::Manual).unwrap();
        assert_eq!(stock.quantity_reserved, 0);
    }

    #[test]
    fn transfer_moves_between_locations() {
        let mut src = item();
        src.quantity_on_hand = 10;
        let mut dst = item();
        let (src_movement, dst_movement) = transfer(&mut src, &mut dst, 4).unwrap();
        assert_eq!(src.quantity_on_hand, 6);
        assert_eq!(dst.quantity_on_hand, 4);
        assert_eq!(src_movement.transfer_id, dst_movement.transfer_id);
    }
}
