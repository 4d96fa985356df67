pub mod base_connection;
pub mod line_item_connection;
pub mod order_connection;
