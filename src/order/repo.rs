//! Collection accessors for the order aggregate and everything it
//! recomputes against, grounded in the teacher's `db.collection::<T>(name)`
//! convention used throughout `query.rs`/`mutation.rs`.

use mongodb::{Collection, Database};

use crate::inventory::model::{StockItem, StockLocation, StockMovement};
use crate::order::history::OrderHistory;
use crate::order::line_item::{Adjustment, LineItem};
use crate::order::model::Order;
use crate::payment::model::{Payment, PaymentMethod};
use crate::promotion::model::Promotion;
use crate::shipment::model::{InventoryUnit, Shipment};

#[derive(Clone)]
pub struct Repositories {
    pub orders: Collection<Order>,
    pub line_items: Collection<LineItem>,
    pub adjustments: Collection<Adjustment>,
    pub histories: Collection<OrderHistory>,
    pub promotions: Collection<Promotion>,
    pub stock_locations: Collection<StockLocation>,
    pub stock_items: Collection<StockItem>,
    pub stock_movements: Collection<StockMovement>,
    pub shipments: Collection<Shipment>,
    pub inventory_units: Collection<InventoryUnit>,
    pub payments: Collection<Payment>,
    pub payment_methods: Collection<PaymentMethod>,
}

impl Repositories {
    pub fn new(db: &Database) -> Self {
        Self {
            orders: db.collection("orders"),
            line_items: db.collection("line_items"),
            adjustments: db.collection("adjustments"),
            histories: db.collection("order_histories"),
            promotions: db.collection("promotions"),
            stock_locations: db.collection("stock_locations"),
            stock_items: db.collection("stock_items"),
            stock_movements: db.collection("stock_movements"),
            shipments: db.collection("shipments"),
            inventory_units: db.collection("inventory_units"),
            payments: db.collection("payments"),
            payment_methods: db.collection("payment_methods"),
        }
    }
}
