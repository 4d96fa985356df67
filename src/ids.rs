use bson::Uuid;

/// UUID of an order.
pub type OrderId = Uuid;
/// UUID of a line item.
pub type LineItemId = Uuid;
/// UUID of an adjustment.
pub type AdjustmentId = Uuid;
/// UUID of an order history entry.
pub type OrderHistoryId = Uuid;
/// UUID of a promotion.
pub type PromotionId = Uuid;
/// UUID of a rule attached to a promotion.
pub type RuleId = Uuid;
/// UUID of a stock location.
pub type StockLocationId = Uuid;
/// UUID of a stock item.
pub type StockItemId = Uuid;
/// UUID of a stock movement.
pub type StockMovementId = Uuid;
/// UUID of a shipment.
pub type ShipmentId = Uuid;
/// UUID of an inventory unit.
pub type InventoryUnitId = Uuid;
/// UUID of a payment.
pub type PaymentId = Uuid;
/// UUID of a payment method configuration.
pub type PaymentMethodId = Uuid;
/// UUID of an encrypted gateway credential blob.
pub type GatewayConfigurationId = Uuid;

/// UUID of a variant, owned by the (out of scope) catalog surface.
pub type VariantId = Uuid;
/// UUID of an authenticated user, owned by the (out of scope) identity surface.
pub type UserId = Uuid;
/// UUID of a taxon, owned by the (out of scope) taxonomy surface.
pub type TaxonId = Uuid;
/// UUID of a shipping method, owned by the (out of scope) fulfillment
/// configuration surface.
pub type ShippingMethodId = Uuid;
