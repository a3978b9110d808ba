use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteExecutor, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    errors::AppError,
    structs::{Bid, Category, Listing, NewListing, User},
    AppState,
};

const LISTING_SELECT: &str = "SELECT l.id, l.item_name, l.description, l.starting_price, \
     l.image_url, l.category_id, c.name AS category_name, l.owner_id, \
     u.username AS owner_username, l.active, l.created_at \
     FROM listings l \
     JOIN users u ON u.id = l.owner_id \
     LEFT JOIN categories c ON c.id = l.category_id";

const BID_SELECT: &str = "SELECT b.id, b.listing_id, b.bidder_id, \
     u.username AS bidder_username, b.bid_amount, b.created_at \
     FROM bids b \
     JOIN users u ON u.id = b.bidder_id";

/// Opens (creating if needed) a WAL-mode database and applies migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, AppError> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .read_only(false)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;

    sqlx::migrate!().run(&db_pool).await?;
    log::info!("Database migrated successfully");
    Ok(db_pool)
}

// --- users

pub async fn create_user(
    state: &AppState,
    username: &str,
    email: &str,
    pwd_hash: &str,
) -> Result<User, sqlx::Error> {
    let created_at = chrono::Utc::now().to_string();
    let pool = state.db_pool.clone();
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, pwd_hash, created_at) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(username)
    .bind(email)
    .bind(pwd_hash)
    .bind(&created_at)
    .fetch_one(&pool)
    .await?;
    log::info!("User created: {} (id {})", user.username, user.id);
    Ok(user)
}

pub async fn get_user_by_id(state: &AppState, id: i64) -> Result<Option<User>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?;
    Ok(user)
}

pub async fn get_user_by_username(
    state: &AppState,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(&pool)
        .await?;
    Ok(user)
}

// --- categories

pub async fn get_all_categories(state: &AppState) -> Result<Vec<Category>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let categories = sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY name")
        .fetch_all(&pool)
        .await?;
    Ok(categories)
}

pub async fn get_category_by_name(
    state: &AppState,
    name: &str,
) -> Result<Option<Category>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let category = sqlx::query_as::<_, Category>("SELECT id, name FROM categories WHERE name = $1")
        .bind(name)
        .fetch_optional(&pool)
        .await?;
    Ok(category)
}

// --- listings

pub async fn get_active_listings(state: &AppState) -> Result<Vec<Listing>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let query = format!("{} WHERE l.active = 1 ORDER BY l.id DESC", LISTING_SELECT);
    let listings = sqlx::query_as::<_, Listing>(&query)
        .fetch_all(&pool)
        .await?;
    Ok(listings)
}

pub async fn get_listings_by_category(
    state: &AppState,
    category_id: i64,
) -> Result<Vec<Listing>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let query = format!("{} WHERE l.category_id = $1 ORDER BY l.id DESC", LISTING_SELECT);
    let listings = sqlx::query_as::<_, Listing>(&query)
        .bind(category_id)
        .fetch_all(&pool)
        .await?;
    Ok(listings)
}

pub async fn fetch_listing<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<Option<Listing>, sqlx::Error> {
    let query = format!("{} WHERE l.id = $1", LISTING_SELECT);
    sqlx::query_as::<_, Listing>(&query)
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_listing_by_id(state: &AppState, id: i64) -> Result<Option<Listing>, sqlx::Error> {
    fetch_listing(&state.db_pool, id).await
}

pub async fn create_listing(
    state: &AppState,
    owner_id: i64,
    listing: &NewListing,
) -> Result<Listing, sqlx::Error> {
    let created_at = chrono::Utc::now().to_string();
    let mut tx = state.db_pool.begin().await?;
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO listings (item_name, description, starting_price, image_url, category_id, owner_id, active, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, 1, $7) RETURNING id",
    )
    .bind(&listing.item_name)
    .bind(&listing.description)
    .bind(listing.starting_price)
    .bind(&listing.image_url)
    .bind(listing.category_id)
    .bind(owner_id)
    .bind(&created_at)
    .fetch_one(&mut *tx)
    .await?;
    let created = fetch_listing(&mut *tx, id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    tx.commit().await?;
    log::info!("Listing created: {:?}", created);
    Ok(created)
}

/// Marks a listing inactive. Returns false if no such listing exists.
pub async fn deactivate_listing(state: &AppState, id: i64) -> Result<bool, sqlx::Error> {
    let pool = state.db_pool.clone();
    let result = sqlx::query("UPDATE listings SET active = 0 WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;
    log::info!("Listing with id {} deactivated", id);
    Ok(result.rows_affected() > 0)
}

// --- bids

pub async fn fetch_highest_bid<'e>(
    executor: impl SqliteExecutor<'e>,
    listing_id: i64,
) -> Result<Option<Bid>, sqlx::Error> {
    let query = format!(
        "{} WHERE b.listing_id = $1 ORDER BY b.bid_amount DESC LIMIT 1",
        BID_SELECT
    );
    sqlx::query_as::<_, Bid>(&query)
        .bind(listing_id)
        .fetch_optional(executor)
        .await
}

pub async fn get_highest_bid(state: &AppState, listing_id: i64) -> Result<Option<Bid>, sqlx::Error> {
    fetch_highest_bid(&state.db_pool, listing_id).await
}

/// Bid history of a listing, newest first.
pub async fn get_bids_for_listing(
    state: &AppState,
    listing_id: i64,
) -> Result<Vec<Bid>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let query = format!("{} WHERE b.listing_id = $1 ORDER BY b.id DESC", BID_SELECT);
    let bids = sqlx::query_as::<_, Bid>(&query)
        .bind(listing_id)
        .fetch_all(&pool)
        .await?;
    Ok(bids)
}

pub async fn fetch_bid<'e>(executor: impl SqliteExecutor<'e>, id: i64) -> Result<Bid, sqlx::Error> {
    let query = format!("{} WHERE b.id = $1", BID_SELECT);
    sqlx::query_as::<_, Bid>(&query)
        .bind(id)
        .fetch_one(executor)
        .await
}

/// Inserts the bid only if the listing is active, the amount reaches the
/// starting price and it beats every existing bid, all within one statement.
///
/// Returns the new bid id, or `None` when any of the conditions failed.
pub async fn insert_bid_if_highest<'e>(
    executor: impl SqliteExecutor<'e>,
    listing_id: i64,
    bidder_id: i64,
    bid_amount: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let created_at = chrono::Utc::now().to_string();
    let row: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO bids (listing_id, bidder_id, bid_amount, created_at) \
         SELECT l.id, $2, $3, $4 FROM listings l \
         WHERE l.id = $1 \
           AND l.active = 1 \
           AND $3 >= l.starting_price \
           AND $3 > COALESCE((SELECT MAX(b.bid_amount) FROM bids b WHERE b.listing_id = l.id), -1) \
         RETURNING id",
    )
    .bind(listing_id)
    .bind(bidder_id)
    .bind(bid_amount)
    .bind(&created_at)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(id,)| id))
}


#[cfg(test)]
mod tests {
    use super::testing;
    use super::*;

    #[actix_web::test]
    async fn migrations_seed_categories() {
        let state = testing::state().await;
        let names: Vec<String> = get_all_categories(&state)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"Electronics".to_owned()));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[actix_web::test]
    async fn file_database_uses_wal_and_a_shared_schema() {
        let (state, _dir) = testing::file_state().await;
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(mode, "wal");

        // two connections held at once see the same database
        let mut first = state.db_pool.acquire().await.unwrap();
        let mut second = state.db_pool.acquire().await.unwrap();
        sqlx::query("INSERT INTO categories (name) VALUES ('Antiques')")
            .execute(&mut *first)
            .await
            .unwrap();
        let found = sqlx::query("SELECT id FROM categories WHERE name = 'Antiques'")
            .fetch_optional(&mut *second)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[actix_web::test]
    async fn duplicate_username_violates_unique_constraint() {
        let state = testing::state().await;
        testing::user(&state, "alice").await;
        let err = create_user(&state, "alice", "", "x").await.unwrap_err();
        let is_unique = err
            .as_database_error()
            .map(|e| e.is_unique_violation())
            .unwrap_or(false);
        assert!(is_unique);
    }

    #[actix_web::test]
    async fn listing_joins_owner_and_category() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let listing = testing::listing(&state, &owner, 10_000).await;
        assert!(listing.active);
        assert_eq!(listing.owner_username, "alice");
        assert_eq!(listing.category_name.as_deref(), Some("Collectibles"));

        let fetched = get_listing_by_id(&state, listing.id).await.unwrap().unwrap();
        assert_eq!(fetched.item_name, "Pocket watch");
        assert!(get_listing_by_id(&state, listing.id + 100)
            .await
            .unwrap()
            .is_none());
    }

    #[actix_web::test]
    async fn deactivated_listings_leave_the_active_list() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let first = testing::listing(&state, &owner, 100).await;
        let second = testing::listing(&state, &owner, 200).await;

        let active: Vec<i64> = get_active_listings(&state)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(active, vec![second.id, first.id]);

        assert!(deactivate_listing(&state, first.id).await.unwrap());
        assert!(!deactivate_listing(&state, 9_999).await.unwrap());
        let active: Vec<i64> = get_active_listings(&state)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(active, vec![second.id]);
    }

    async fn raw_insert(
        pool: &sqlx::SqlitePool,
        listing_id: i64,
        bidder_id: i64,
        amount: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO bids (listing_id, bidder_id, bid_amount, created_at) VALUES ($1, $2, $3, 'now')",
        )
        .bind(listing_id)
        .bind(bidder_id)
        .bind(amount)
        .execute(pool)
        .await?;
        Ok(())
    }

    #[actix_web::test]
    async fn trigger_rejects_non_increasing_bids() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let listing = testing::listing(&state, &owner, 100).await;
        let pool = &state.db_pool;
        assert!(raw_insert(pool, listing.id, owner.id, 99).await.is_err());
        raw_insert(pool, listing.id, owner.id, 150).await.unwrap();
        assert!(raw_insert(pool, listing.id, owner.id, 150).await.is_err());
        raw_insert(pool, listing.id, owner.id, 151).await.unwrap();
    }

    #[actix_web::test]
    async fn conditional_insert_writes_nothing_when_outbid() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let bidder = testing::user(&state, "bob").await;
        let listing = testing::listing(&state, &owner, 100).await;

        let id = insert_bid_if_highest(&state.db_pool, listing.id, bidder.id, 120)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetch_bid(&state.db_pool, id).await.unwrap().bidder_username, "bob");
        assert!(insert_bid_if_highest(&state.db_pool, listing.id, bidder.id, 120)
            .await
            .unwrap()
            .is_none());
        assert!(insert_bid_if_highest(&state.db_pool, 9_999, bidder.id, 500)
            .await
            .unwrap()
            .is_none());
        assert_eq!(get_bids_for_listing(&state, listing.id).await.unwrap().len(), 1);
    }
}
