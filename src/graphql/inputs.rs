//! GraphQL input types for every command in spec §6's command table.

use async_graphql::InputObject;

use crate::ids::{LineItemId, OrderId, PaymentId, PaymentMethodId, ShipmentId, ShippingMethodId, TaxonId, UserId, VariantId};

#[derive(InputObject)]
pub struct CreateOrderInput {
    pub user_id: Option<UserId>,
    pub adhoc_customer_id: Option<String>,
    pub currency: String,
}

/// A variant's direct taxon classifications, one entry of the caller-supplied
/// `CatalogContext` the promotion engine evaluates `TaxonInCart`/
/// `SpecificTaxons` against (catalog/taxonomy ownership is out of scope;
/// see `promotion::engine::CatalogContext`).
#[derive(InputObject)]
pub struct VariantTaxonsInput {
    pub variant_id: VariantId,
    pub taxon_ids: Vec<TaxonId>,
}

/// A taxon's ascendant closure (inclusive), precomputed by the catalog
/// surface so the promotion engine never walks a tree itself.
#[derive(InputObject)]
pub struct TaxonAscendantsInput {
    pub taxon_id: TaxonId,
    pub ascendant_ids: Vec<TaxonId>,
}

#[derive(InputObject, Default)]
pub struct CatalogContextInput {
    pub variant_taxons: Vec<VariantTaxonsInput>,
    pub taxon_ascendants: Vec<TaxonAscendantsInput>,
}

#[derive(InputObject)]
pub struct AddLineItemInput {
    pub order_id: OrderId,
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Minor-unit price snapshot for this variant, supplied by the caller
    /// (catalog pricing is out of scope; see `order::commands::VariantPrice`).
    pub unit_price: i64,
    /// Whether the variant may currently be added to a cart.
    pub active: bool,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct SetQuantityInput {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub quantity: u32,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct RemoveLineItemInput {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct EmptyOrderInput {
    pub order_id: OrderId,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct AssociateInput {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct AddressInput {
    pub name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country_code: String,
}

#[derive(InputObject)]
pub struct SetShippingAddressInput {
    pub order_id: OrderId,
    pub address: AddressInput,
}

#[derive(InputObject)]
pub struct SetEmailInput {
    pub order_id: OrderId,
    pub email: String,
}

#[derive(InputObject)]
pub struct SetSpecialInstructionsInput {
    pub order_id: OrderId,
    pub instructions: String,
}

#[derive(InputObject)]
pub struct ApplyCouponInput {
    pub order_id: OrderId,
    pub code: String,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct RemoveCouponInput {
    pub order_id: OrderId,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct AdvanceInput {
    pub order_id: OrderId,
}

#[derive(InputObject)]
pub struct CompleteInput {
    pub order_id: OrderId,
}

#[derive(InputObject)]
pub struct CancelInput {
    pub order_id: OrderId,
    pub reason: String,
}

#[derive(InputObject)]
pub struct ShipmentShipInput {
    pub shipment_id: ShipmentId,
    pub tracking_number: String,
}

#[derive(InputObject)]
pub struct SelectShippingMethodInput {
    pub order_id: OrderId,
    pub shipment_method_id: ShippingMethodId,
    /// Minor-unit cost of the chosen method, applied to every shipment
    /// (catalog/rating of shipping methods is out of scope; the caller
    /// supplies the snapshot, the same way `AddLineItemInput` supplies
    /// `unit_price`).
    pub cost: i64,
    pub catalog: Option<CatalogContextInput>,
}

#[derive(InputObject)]
pub struct PaymentCreateInput {
    pub order_id: OrderId,
    pub payment_method_id: PaymentMethodId,
    pub amount: i64,
}

#[derive(InputObject)]
pub struct PaymentCaptureInput {
    pub payment_id: PaymentId,
}

#[derive(InputObject)]
pub struct PaymentRefundInput {
    pub payment_id: PaymentId,
    pub amount: i64,
    pub reason: String,
}

#[derive(InputObject)]
pub struct PaymentVoidInput {
    pub payment_id: PaymentId,
}

#[derive(InputObject)]
pub struct StockLocationCreateInput {
    pub internal_name: String,
    pub presentation_name: String,
    pub is_default: bool,
}

#[derive(InputObject)]
pub struct StockLocationSetDefaultInput {
    pub stock_location_id: crate::ids::StockLocationId,
}
