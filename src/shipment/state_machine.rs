//! Shipment and inventory-unit transition tables (spec §4.3).

use bson::DateTime as BsonDateTime;

use crate::error::CoreError;
use crate::shipment::model::{InventoryUnit, InventoryUnitStatus, Shipment, ShipmentStatus};

/// `Pending -> Ready` once every unit on the shipment is `OnHand`.
pub fn mark_ready(shipment: &mut Shipment, units: &[InventoryUnit]) -> Result<(), CoreError> {
    require(shipment.status == ShipmentStatus::Pending, shipment.status, ShipmentStatus::Ready)?;
    if !units.iter().all(|u| u.status == InventoryUnitStatus::OnHand) {
        return Err(CoreError::state_conflict(
            "Shipment.UnitsNotOnHand",
            "not every inventory unit on this shipment is on hand",
        ));
    }
    shipment.status = ShipmentStatus::Ready;
    shipment.ready_at = Some(BsonDateTime::now());
    shipment.row_version += 1;
    Ok(())
}

/// `Ready -> Shipped`, and every `OnHand` unit transitions to `Shipped`.
pub fn ship(
    shipment: &mut Shipment,
    units: &mut [InventoryUnit],
    tracking_number: String,
) -> Result<(), CoreError> {
    require(shipment.status == ShipmentStatus::Ready, shipment.status, ShipmentStatus::Shipped)?;
    shipment.status = ShipmentStatus::Shipped;
    shipment.tracking_number = Some(tracking_number);
    shipment.shipped_at = Some(BsonDateTime::now());
    shipment.row_version += 1;
    for unit in units.iter_mut() {
        unit.status = InventoryUnitStatus::Shipped;
        unit.state_changed_at = BsonDateTime::now();
    }
    Ok(())
}

/// `Shipped -> Delivered`.
pub fn mark_delivered(shipment: &mut Shipment) -> Result<(), CoreError> {
    require(shipment.status == ShipmentStatus::Shipped, shipment.status, ShipmentStatus::Delivered)?;
    shipment.status = ShipmentStatus::Delivered;
    shipment.delivered_at = Some(BsonDateTime::now());
    shipment.row_version += 1;
    Ok(())
}

/// `* -> Canceled`, releasing any reservations the caller holds for this
/// shipment's units. Canceling a `Shipped` shipment is not permitted; the
/// return flow is the only reverse path from there (spec §4.3).
pub fn cancel(shipment: &mut Shipment, units: &mut [InventoryUnit], reason: &str) -> Result<(), CoreError> {
    if matches!(shipment.status, ShipmentStatus::Shipped | ShipmentStatus::Delivered) {
        return Err(CoreError::state_conflict(
            "Shipment.CannotCancelShipped",
            format!("shipment already {:?}, cannot cancel: {}", shipment.status, reason),
        ));
    }
    shipment.status = ShipmentStatus::Canceled;
    shipment.canceled_at = Some(BsonDateTime::now());
    shipment.row_version += 1;
    for unit in units.iter_mut() {
        if matches!(unit.status, InventoryUnitStatus::OnHand | InventoryUnitStatus::Backordered) {
            unit.status = InventoryUnitStatus::Canceled;
            unit.state_changed_at = BsonDateTime::now();
        }
    }
    Ok(())
}

/// `Backordered -> OnHand` when a `Receive` movement completes the stock.
pub fn receive_backorder(unit: &mut InventoryUnit) -> Result<(), CoreError> {
    if unit.status != InventoryUnitStatus::Backordered {
        return Err(CoreError::state_conflict(
            "InventoryUnit.NotBackordered",
            format!("unit `{}` is {:?}, not Backordered", unit._id, unit.status),
        ));
    }
    unit.status = InventoryUnitStatus::OnHand;
    unit.state_changed_at = BsonDateTime::now();
    Ok(())
}

fn require(condition: bool, current: ShipmentStatus, target: ShipmentStatus) -> Result<(), CoreError> {
    if condition {
        Ok(())
    } else {
        Err(CoreError::state_conflict(
            "Shipment.InvalidTransition",
            format!("cannot transition shipment from {:?} to {:?}", current, target),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{LineItemId, VariantId};

    fn unit(status: InventoryUnitStatus) -> InventoryUnit {
        InventoryUnit::new(VariantId::new(), LineItemId::new(), status)
    }

    #[test]
    fn mark_ready_requires_all_units_on_hand() {
        let mut shipment = Shipment::new(bson::Uuid::new(), "S1".into(), bson::Uuid::new(), 500);
        let units = vec![unit(InventoryUnitStatus::Backordered)];
        assert!(mark_ready(&mut shipment, &units).is_err());
    }

    #[test]
    fn ship_transitions_units_to_shipped() {
        let mut shipment = Shipment::new(bson::Uuid::new(), "S1".into(), bson::Uuid::new(), 500);
        shipment.status = ShipmentStatus::Ready;
        let mut units = vec![unit(InventoryUnitStatus::OnHand)];
        ship(&mut shipment, &mut units, "TRACK1".into()).unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Shipped);
        assert_eq!(units[0].status, InventoryUnitStatus::Shipped);
    }

    #[test]
    fn cancel_shipped_shipment_is_rejected() {
        let mut shipment = Shipment::new(bson::Uuid::new(), "S1".into(), bson::Uuid::new(), 500);
        shipment.status = ShipmentStatus::Shipped;
        let mut units = vec![];
        let err = cancel(&mut shipment, &mut units, "customer request").unwrap_err();
        assert_eq!(err.code(), "Shipment.CannotCancelShipped");
    }
}
