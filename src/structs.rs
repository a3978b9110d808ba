use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub pwd_hash: String,
    pub created_at: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// A listing joined with the names of its category and owner.
///
/// `starting_price` is in cents.
#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Listing {
    pub id: i64,
    pub item_name: String,
    pub description: String,
    pub starting_price: i64,
    pub image_url: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub owner_id: i64,
    pub owner_username: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Bid {
    pub id: i64,
    pub listing_id: i64,
    pub bidder_id: i64,
    pub bidder_username: String,
    pub bid_amount: i64,
    pub created_at: String,
}

/// Validated input for a new listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    pub item_name: String,
    pub description: String,
    pub starting_price: i64,
    pub image_url: String,
    pub category_id: i64,
}
