//! Generic cursor-pagination wrapper (reconstructed from call-site usage;
//! referenced throughout the teacher's `*_connection.rs` files but absent
//! from the retrieved pack). Wraps `mongodb_cursor_pagination::FindResult`
//! into an async-graphql `connection`-shaped object.

use async_graphql::SimpleObject;
use mongodb_cursor_pagination::FindResult;
use serde::{de::DeserializeOwned, Serialize};

/// Thin newtype so `Into<BaseConnection<T>>` can be implemented for the
/// pagination crate's `FindResult<T>` without an orphan-rule conflict, the
/// same indirection the teacher's `*_connection.rs` files used.
pub struct FindResultWrapper<T>(pub FindResult<T>);

#[derive(SimpleObject, Clone)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// Plain data holder, not itself a GraphQL output type: concrete
/// `*Connection` wrapper types in `graphql/connection/` each derive
/// `SimpleObject` and are built `From<BaseConnection<T>>`, since
/// async-graphql cannot derive an object type generically over `T`
/// without a `#[graphql(concrete(...))]` per instantiation.
pub struct BaseConnection<T> {
    pub nodes: Vec<T>,
    pub page_info: PageInfo,
    pub total_count: u64,
}

impl<T: DeserializeOwned + Serialize + Unpin + Send + Sync> From<FindResultWrapper<T>> for BaseConnection<T> {
    fn from(wrapper: FindResultWrapper<T>) -> Self {
        let find_result = wrapper.0;
        BaseConnection {
            nodes: find_result.items,
            page_info: PageInfo {
                has_next_page: find_result.page_info.has_next_page,
                has_previous_page: find_result.page_info.has_previous_page,
                start_cursor: find_result.page_info.start_cursor,
                end_cursor: find_result.page_info.end_cursor,
            },
            total_count: find_result.total_count as u64,
        }
    }
}
