//! Query root: order/line-item/shipment/stock/payment/promotion reads,
//! following the teacher's split between a thin `Query` object and the
//! actual lookups living in each module's `query.rs`/`repo.rs`.

use async_graphql::{Context, Object};
use bson::doc;
use futures::stream::TryStreamExt;

use crate::authorization::authorize_user;
use crate::error::CoreError;
use crate::graphql::connection::base_connection::{BaseConnection, FindResultWrapper};
use crate::graphql::connection::line_item_connection::LineItemConnection;
use crate::graphql::connection::order_connection::OrderConnection;
use crate::ids::{OrderId, PaymentId, ShipmentId, StockItemId, UserId};
use crate::inventory::model::StockItem;
use crate::order::line_item::LineItem;
use crate::order::model::Order;
use crate::order::query;
use crate::order::repo::Repositories;
use crate::payment::model::Payment;
use crate::promotion::model::Promotion;
use crate::shipment::model::Shipment;

fn repos(ctx: &Context<'_>) -> async_graphql::Result<Repositories> {
    let db = ctx.data::<mongodb::Database>()?;
    Ok(Repositories::new(db))
}

pub struct Query;

#[Object]
impl Query {
    async fn order(&self, ctx: &Context<'_>, id: OrderId) -> async_graphql::Result<Order> {
        let repos = repos(ctx)?;
        let order = query::order_by_id(&repos, id).await?;
        authorize_user(ctx, order.user_id)?;
        Ok(order)
    }

    async fn orders(
        &self,
        ctx: &Context<'_>,
        user_id: Option<UserId>,
        first: Option<i32>,
        after: Option<String>,
    ) -> async_graphql::Result<OrderConnection> {
        let repos = repos(ctx)?;
        let limit = first.unwrap_or(20).max(1) as i64;
        let find_result = query::orders_page(&repos, user_id, limit, after).await?;
        Ok(BaseConnection::from(FindResultWrapper(find_result)).into())
    }

    async fn line_items(&self, ctx: &Context<'_>, order_id: OrderId) -> async_graphql::Result<LineItemConnection> {
        let repos = repos(ctx)?;
        let order = query::order_by_id(&repos, order_id).await?;
        authorize_user(ctx, order.user_id)?;
        let nodes: Vec<LineItem> = repos
            .line_items
            .find(doc! { "order_id": order_id })
            .await
            .map_err(CoreError::from)?
            .try_collect()
            .await
            .map_err(CoreError::from)?;
        let total_count = nodes.len() as u64;
        Ok(LineItemConnection {
            nodes,
            page_info: crate::graphql::connection::base_connection::PageInfo {
                has_next_page: false,
                has_previous_page: false,
                start_cursor: None,
                end_cursor: None,
            },
            total_count,
        })
    }

    async fn shipments(&self, ctx: &Context<'_>, order_id: OrderId) -> async_graphql::Result<Vec<Shipment>> {
        let repos = repos(ctx)?;
        let order = query::order_by_id(&repos, order_id).await?;
        authorize_user(ctx, order.user_id)?;
        Ok(repos
            .shipments
            .find(doc! { "order_id": order_id })
            .await
            .map_err(CoreError::from)?
            .try_collect()
            .await
            .map_err(CoreError::from)?)
    }

    async fn shipment(&self, ctx: &Context<'_>, id: ShipmentId) -> async_graphql::Result<Shipment> {
        let repos = repos(ctx)?;
        Ok(repos
            .shipments
            .find_one(doc! { "_id": id })
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("Shipment", id))?)
    }

    async fn payments(&self, ctx: &Context<'_>, order_id: OrderId) -> async_graphql::Result<Vec<Payment>> {
        let repos = repos(ctx)?;
        let order = query::order_by_id(&repos, order_id).await?;
        authorize_user(ctx, order.user_id)?;
        Ok(repos
            .payments
            .find(doc! { "order_id": order_id })
            .await
            .map_err(CoreError::from)?
            .try_collect()
            .await
            .map_err(CoreError::from)?)
    }

    async fn payment(&self, ctx: &Context<'_>, id: PaymentId) -> async_graphql::Result<Payment> {
        let repos = repos(ctx)?;
        Ok(repos
            .payments
            .find_one(doc! { "_id": id })
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("Payment", id))?)
    }

    async fn stock_item(&self, ctx: &Context<'_>, id: StockItemId) -> async_graphql::Result<StockItem> {
        let repos = repos(ctx)?;
        Ok(repos
            .stock_items
            .find_one(doc! { "_id": id })
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("StockItem", id))?)
    }

    async fn stock_items(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<StockItem>> {
        let repos = repos(ctx)?;
        Ok(repos
            .stock_items
            .find(doc! {})
            .await
            .map_err(CoreError::from)?
            .try_collect()
            .await
            .map_err(CoreError::from)?)
    }

    async fn active_promotions(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<Promotion>> {
        let repos = repos(ctx)?;
        Ok(repos
            .promotions
            .find(doc! { "active": true })
            .await
            .map_err(CoreError::from)?
            .try_collect()
            .await
            .map_err(CoreError::from)?)
    }
}
