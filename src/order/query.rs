//! Read-only order queries, following the teacher's
//! `mongodb_cursor_pagination::PaginatedCursor` convention.

use bson::doc;
use mongodb_cursor_pagination::{CursorDirections, FindResult, PaginatedCursor};

use crate::error::CoreError;
use crate::ids::OrderId;
use crate::order::model::Order;
use crate::order::repo::Repositories;

pub async fn order_by_id(repos: &Repositories, order_id: OrderId) -> Result<Order, CoreError> {
    repos
        .orders
        .find_one(doc! { "_id": order_id })
        .await?
        .ok_or_else(|| CoreError::not_found("Order", order_id))
}

pub async fn orders_page(
    repos: &Repositories,
    user_id: Option<bson::Uuid>,
    limit: i64,
    cursor: Option<String>,
) -> Result<FindResult<Order>, CoreError> {
    let filter = user_id.map(|id| doc! { "user_id": id }).unwrap_or_default();
    let paginated = PaginatedCursor::new(
        Some(mongodb_cursor_pagination::FindOptions::builder().limit(limit).build()),
        cursor,
        Some(CursorDirections::Next),
    );
    Ok(paginated.find(&repos.orders, Some(&filter)).await?)
}
