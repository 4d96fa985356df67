use async_graphql::SimpleObject;

use crate::graphql::connection::base_connection::{BaseConnection, PageInfo};
use crate::order::model::Order;

#[derive(SimpleObject)]
pub struct OrderConnection {
    pub nodes: Vec<Order>,
    pub page_info: PageInfo,
    pub total_count: u64,
}

impl From<BaseConnection<Order>> for OrderConnection {
    fn from(base: BaseConnection<Order>) -> Self {
        Self {
            nodes: base.nodes,
            page_info: base.page_info,
            total_count: base.total_count,
        }
    }
}
