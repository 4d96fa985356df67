//! Stock location lifecycle (SUPPLEMENT: `spec.md` §3 defines `StockLocation`
//! fully but only discusses allocation, not creation — allocation needs
//! somewhere to allocate from).

use bson::doc;
use mongodb::Collection;

use crate::error::CoreError;
use crate::inventory::model::StockLocation;

/// Inserts a new stock location. `is_default` demotes any existing default
/// location first, so "at most one default" holds without a unique index.
pub async fn create_stock_location(
    collection: &Collection<StockLocation>,
    internal_name: String,
    presentation_name: String,
    is_default: bool,
) -> Result<StockLocation, CoreError> {
    if is_default {
        collection
            .update_many(doc! { "is_default": true }, doc! { "$set": { "is_default": false } })
            .await?;
    }
    let location = StockLocation::new(internal_name, presentation_name, is_default);
    collection.insert_one(&location).await?;
    Ok(location)
}

/// Demotes every other location's `is_default` and promotes `location_id`.
pub async fn set_default_stock_location(
    collection: &Collection<StockLocation>,
    location_id: bson::Uuid,
) -> Result<StockLocation, CoreError> {
    let location = collection
        .find_one(doc! { "_id": location_id })
        .await?
        .ok_or_else(|| CoreError::not_found("StockLocation", location_id))?;
    if location.is_default {
        return Ok(location);
    }
    collection
        .update_many(doc! { "is_default": true }, doc! { "$set": { "is_default": false } })
        .await?;
    collection
        .update_one(doc! { "_id": location_id }, doc! { "$set": { "is_default": true } })
        .await?;
    Ok(collection
        .find_one(doc! { "_id": location_id })
        .await?
        .ok_or_else(|| CoreError::not_found("StockLocation", location_id))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_location_carries_the_requested_default_flag() {
        let location = StockLocation::new("WH1".into(), "Warehouse 1".into(), true);
        assert!(location.is_default);
    }
}
