use sqlx::SqliteConnection;

use crate::{
    db,
    errors::{AppError, BidError},
    structs::{Bid, User},
    utils::Money,
    AppState,
};

/// Records a bid of `bid_amount` cents on a listing.
///
/// The checks and the insert run as one conditional statement inside a
/// transaction, so concurrent bidders cannot both beat the same maximum.
pub async fn place_bid(
    state: &AppState,
    bidder: &User,
    listing_id: i64,
    bid_amount: i64,
) -> Result<Bid, BidError> {
    if bid_amount > Money::MAX.0 {
        return Err(BidError::InvalidAmount);
    }
    let mut tx = state.db_pool.begin().await?;

    match db::insert_bid_if_highest(&mut *tx, listing_id, bidder.id, bid_amount).await? {
        Some(bid_id) => {
            let bid = db::fetch_bid(&mut *tx, bid_id).await?;
            tx.commit().await?;
            log::info!(
                "Bid {} of {} by user {} on listing {}",
                bid.id,
                Money(bid.bid_amount),
                bidder.id,
                listing_id
            );
            Ok(bid)
        }
        None => {
            let reason = rejection_reason(&mut *tx, listing_id, bid_amount).await?;
            tx.rollback().await?;
            log::info!(
                "Bid of {} by user {} on listing {} rejected: {}",
                Money(bid_amount),
                bidder.id,
                listing_id,
                reason
            );
            Err(reason)
        }
    }
}

/// Works out which rule a bid broke, in the order the rules are checked.
async fn rejection_reason(
    conn: &mut SqliteConnection,
    listing_id: i64,
    bid_amount: i64,
) -> Result<BidError, sqlx::Error> {
    let Some(listing) = db::fetch_listing(&mut *conn, listing_id).await? else {
        return Ok(BidError::ListingNotFound);
    };
    if !listing.active {
        return Ok(BidError::AuctionClosed);
    }
    if bid_amount < listing.starting_price {
        return Ok(BidError::BelowStartingPrice {
            starting_price: Money(listing.starting_price),
        });
    }
    match db::fetch_highest_bid(&mut *conn, listing_id).await? {
        Some(highest) if bid_amount <= highest.bid_amount => Ok(BidError::TooLow {
            highest: Money(highest.bid_amount),
        }),
        _ => {
            log::error!(
                "Bid of {} on listing {} was not inserted but breaks no rule",
                bid_amount,
                listing_id
            );
            Ok(BidError::App(AppError::InternalServerError))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::testing, listings};

    #[actix_web::test]
    async fn bid_at_starting_price_is_accepted() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let bidder = testing::user(&state, "bob").await;
        let listing = testing::listing(&state, &owner, 100).await;

        let rejected = place_bid(&state, &bidder, listing.id, 99).await;
        assert!(matches!(
            rejected,
            Err(BidError::BelowStartingPrice {
                starting_price: Money(100)
            })
        ));

        let bid = place_bid(&state, &bidder, listing.id, 100).await.unwrap();
        assert_eq!(bid.bid_amount, 100);
        assert_eq!(bid.listing_id, listing.id);
        assert_eq!(bid.bidder_username, "bob");
    }

    #[actix_web::test]
    async fn bid_must_exceed_current_highest() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let bidder = testing::user(&state, "bob").await;
        let rival = testing::user(&state, "carol").await;
        let listing = testing::listing(&state, &owner, 100).await;
        place_bid(&state, &bidder, listing.id, 150).await.unwrap();

        let rejected = place_bid(&state, &rival, listing.id, 150).await;
        assert!(matches!(
            rejected,
            Err(BidError::TooLow { highest: Money(150) })
        ));
        let bid = place_bid(&state, &rival, listing.id, 151).await.unwrap();
        assert_eq!(bid.bidder_id, rival.id);
    }

    #[actix_web::test]
    async fn unknown_listing_is_reported() {
        let state = testing::state().await;
        let bidder = testing::user(&state, "bob").await;
        assert!(matches!(
            place_bid(&state, &bidder, 42, 1_000).await,
            Err(BidError::ListingNotFound)
        ));
    }

    #[actix_web::test]
    async fn closed_auction_takes_no_bids() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let bidder = testing::user(&state, "bob").await;
        let listing = testing::listing(&state, &owner, 100).await;
        listings::close_listing(&state, &owner, listing.id)
            .await
            .unwrap();
        assert!(matches!(
            place_bid(&state, &bidder, listing.id, 500).await,
            Err(BidError::AuctionClosed)
        ));
    }

    #[actix_web::test]
    async fn accepted_bids_strictly_increase() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let bidder = testing::user(&state, "bob").await;
        let listing = testing::listing(&state, &owner, 100).await;

        for amount in [120, 110, 120, 200, 199, 201, 50, 300, 300] {
            let _ = place_bid(&state, &bidder, listing.id, amount).await;
        }

        let mut bids = db::get_bids_for_listing(&state, listing.id).await.unwrap();
        bids.reverse();
        let amounts: Vec<i64> = bids.iter().map(|b| b.bid_amount).collect();
        assert_eq!(amounts, vec![120, 200, 201, 300]);
        assert!(amounts.windows(2).all(|w| w[0] < w[1]));
    }

    #[actix_web::test]
    async fn amounts_above_the_cap_are_invalid() {
        let state = testing::state().await;
        let owner = testing::user(&state, "alice").await;
        let bidder = testing::user(&state, "bob").await;
        let listing = testing::listing(&state, &owner, 100).await;
        assert!(matches!(
            place_bid(&state, &bidder, listing.id, Money::MAX.0 + 1).await,
            Err(BidError::InvalidAmount)
        ));
        assert!(matches!(
            place_bid(&state, &bidder, listing.id, i64::MAX).await,
            Err(BidError::InvalidAmount)
        ));
        place_bid(&state, &bidder, listing.id, Money::MAX.0)
            .await
            .unwrap();
    }

    /// Spawns one `place_bid` per amount, each from its own bidder, and
    /// returns the amounts that were accepted.
    async fn bid_concurrently(state: &AppState, listing_id: i64, amounts: &[i64]) -> Vec<i64> {
        let mut handles = Vec::new();
        for (i, &amount) in amounts.iter().enumerate() {
            let bidder = testing::user(state, &format!("bidder{}", i)).await;
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                place_bid(&state, &bidder, listing_id, amount).await
            }));
        }

        let mut accepted = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(bid) => accepted.push(bid.bid_amount),
                Err(BidError::TooLow { .. }) => {}
                Err(e) => panic!("unexpected rejection: {:?}", e),
            }
        }
        accepted
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_equal_bids_accept_only_one() {
        let (state, _dir) = testing::file_state().await;
        let owner = testing::user(&state, "alice").await;
        let listing = testing::listing(&state, &owner, 100).await;

        let accepted = bid_concurrently(&state, listing.id, &[500; 10]).await;
        assert_eq!(accepted, vec![500]);
        let bids = db::get_bids_for_listing(&state, listing.id).await.unwrap();
        assert_eq!(bids.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bids_keep_amounts_strictly_increasing() {
        let (state, _dir) = testing::file_state().await;
        let owner = testing::user(&state, "alice").await;
        let listing = testing::listing(&state, &owner, 100).await;
        let amounts: Vec<i64> = (0..20).map(|i| 500 + i % 3).collect();

        let mut accepted = bid_concurrently(&state, listing.id, &amounts).await;
        assert!(!accepted.is_empty());

        let mut bids = db::get_bids_for_listing(&state, listing.id).await.unwrap();
        bids.reverse();
        let stored: Vec<i64> = bids.iter().map(|b| b.bid_amount).collect();
        assert!(stored.windows(2).all(|w| w[0] < w[1]), "{:?}", stored);
        accepted.sort();
        assert_eq!(stored, accepted);
    }
}
