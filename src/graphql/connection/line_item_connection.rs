use async_graphql::SimpleObject;

use crate::graphql::connection::base_connection::{BaseConnection, PageInfo};
use crate::order::line_item::LineItem;

#[derive(SimpleObject)]
pub struct LineItemConnection {
    pub nodes: Vec<LineItem>,
    pub page_info: PageInfo,
    pub total_count: u64,
}

impl From<BaseConnection<LineItem>> for LineItemConnection {
    fn from(base: BaseConnection<LineItem>) -> Self {
        Self {
            nodes: base.nodes,
            page_info: base.page_info,
            total_count: base.total_count,
        }
    }
}
