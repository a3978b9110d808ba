use actix_multipart::form::tempfile::TempFile;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db,
    errors::{AppError, ValidationErrors},
    media,
    structs::{Bid, Category, Listing, NewListing, User},
    utils::Money,
    AppState,
};

const MAX_ITEM_NAME: usize = 64;
const MAX_DESCRIPTION: usize = 2_000;

/// Raw new-listing form, kept as strings so it can be re-rendered on error.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ListingForm {
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub starting_price: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("invalid listing")]
    Invalid(ValidationErrors),

    #[error(transparent)]
    App(#[from] AppError),
}

#[derive(Serialize, Debug)]
pub struct ListingDetail {
    pub listing: Listing,
    pub highest_bid: Option<Bid>,
    pub bids: Vec<Bid>,
    /// Smallest amount, in cents, the next bid may have. `None` once the
    /// highest bid has reached `Money::MAX`.
    pub minimum_bid: Option<i64>,
}

/// Validates the text fields. With `has_image_file` the uploaded file stands
/// in for the image URL, which is then ignored.
pub fn validate_listing(
    form: &ListingForm,
    categories: &[Category],
    has_image_file: bool,
) -> Result<NewListing, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let item_name = form.item_name.trim();
    if item_name.is_empty() {
        errors.add("item_name", "Item name is required.");
    } else if item_name.chars().count() > MAX_ITEM_NAME {
        errors.add(
            "item_name",
            format!("Item name must be at most {} characters.", MAX_ITEM_NAME),
        );
    }

    let description = form.description.trim();
    if description.is_empty() {
        errors.add("description", "Description is required.");
    } else if description.chars().count() > MAX_DESCRIPTION {
        errors.add(
            "description",
            format!("Description must be at most {} characters.", MAX_DESCRIPTION),
        );
    }

    let starting_price = match form.starting_price.parse::<Money>() {
        Ok(Money(cents)) if cents > 0 => Some(cents),
        Ok(_) => {
            errors.add("starting_price", "Starting price must be greater than zero.");
            None
        }
        Err(_) if form.starting_price.trim().is_empty() => {
            errors.add("starting_price", "Starting price is required.");
            None
        }
        Err(_) => {
            errors.add("starting_price", "Starting price must be an amount like 12.50.");
            None
        }
    };

    // the stored file's URL is filled in once it is saved
    let image_url = if has_image_file {
        ""
    } else {
        form.image_url.trim()
    };
    if !has_image_file {
        if image_url.is_empty() {
            errors.add("image_url", "Upload an image or give an image URL.");
        } else if !(image_url.starts_with("http://") || image_url.starts_with("https://"))
            || image_url.contains(char::is_whitespace)
        {
            errors.add("image_url", "Image URL must start with http:// or https://.");
        }
    }

    let category_id = form
        .category
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| categories.iter().any(|c| c.id == *id));
    if category_id.is_none() {
        errors.add("category", "Choose a category.");
    }

    match (starting_price, category_id) {
        (Some(starting_price), Some(category_id)) if errors.is_empty() => Ok(NewListing {
            item_name: item_name.to_owned(),
            description: description.to_owned(),
            starting_price,
            image_url: image_url.to_owned(),
            category_id,
        }),
        _ => Err(errors),
    }
}

/// Creates a listing from the form, storing `image` in the media dir when given.
pub async fn create_listing(
    state: &AppState,
    owner: &User,
    form: &ListingForm,
    image: Option<TempFile>,
) -> Result<Listing, ListingError> {
    let categories = db::get_all_categories(state).await.map_err(AppError::from)?;
    let image_check = image.as_ref().map(media::check_image);
    let validated = validate_listing(form, &categories, image.is_some());

    let (mut new_listing, extension) = match (validated, image_check) {
        (Ok(listing), None) => (listing, None),
        (Ok(listing), Some(Ok(extension))) => (listing, Some(extension)),
        (Ok(_), Some(Err(message))) => {
            let mut errors = ValidationErrors::default();
            errors.add("image", message);
            return Err(ListingError::Invalid(errors));
        }
        (Err(mut errors), check) => {
            if let Some(Err(message)) = check {
                errors.add("image", message);
            }
            return Err(ListingError::Invalid(errors));
        }
    };
    if let (Some(file), Some(extension)) = (image, extension) {
        new_listing.image_url = media::store_image(&state.media_dir, owner.id, file, extension)?;
    }

    let listing = db::create_listing(state, owner.id, &new_listing)
        .await
        .map_err(AppError::from)?;
    Ok(listing)
}

pub async fn list_active(state: &AppState) -> Result<Vec<Listing>, AppError> {
    Ok(db::get_active_listings(state).await?)
}

/// `None` when no category has that exact name.
pub async fn list_by_category(
    state: &AppState,
    name: &str,
) -> Result<Option<(Category, Vec<Listing>)>, AppError> {
    let Some(category) = db::get_category_by_name(state, name).await? else {
        return Ok(None);
    };
    let listings = db::get_listings_by_category(state, category.id).await?;
    Ok(Some((category, listings)))
}

pub async fn get_listing(state: &AppState, id: i64) -> Result<Option<ListingDetail>, AppError> {
    let Some(listing) = db::get_listing_by_id(state, id).await? else {
        return Ok(None);
    };
    let highest_bid = db::get_highest_bid(state, id).await?;
    let bids = db::get_bids_for_listing(state, id).await?;
    let minimum_bid = match &highest_bid {
        Some(bid) => bid.bid_amount.checked_add(1),
        None => Some(listing.starting_price),
    }
    .filter(|next| *next <= Money::MAX.0);
    Ok(Some(ListingDetail {
        listing,
        highest_bid,
        bids,
        minimum_bid,
    }))
}

/// Ends an auction. Only the owner may close it; closing twice is harmless.
pub async fn close_listing(state: &AppState, user: &User, id: i64) -> Result<Listing, AppError> {
    let listing = db::get_listing_by_id(state, id)
        .await?
        .ok_or(AppError::NotFound)?;
    if listing.owner_id != user.id {
        log::warn!("User {} tried to close listing {} they do not own", user.id, id);
        return Err(AppError::Forbidden);
    }
    if listing.active {
        db::deactivate_listing(state, id).await?;
    }
    Ok(Listing {
        active: false,
        ..listing
    })
}
