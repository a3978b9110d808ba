use actix_identity::Identity;
use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::{
    get,
    http::StatusCode,
    post,
    web::{self, Data},
    HttpMessage, HttpRequest, HttpResponse, Responder,
};
use serde::Deserialize;
use tera::Context;

use crate::{
    auth::{self, Login, Register},
    bidding, db,
    errors::{AppError, AuthError, BidError},
    listings::{self, ListingError, ListingForm},
    structs::{Category, User},
    utils::Money,
    AppState, TEMPLATES,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index_handler)
        .service(login_handler)
        .service(login_form_handler)
        .service(logout_handler)
        .service(register_handler)
        .service(register_form_handler)
        .service(categories_handler)
        .service(category_handler)
        .service(new_listing_handler)
        .service(new_listing_form_handler)
        .service(auction_handler)
        .service(bid_form_handler)
        .service(close_auction_handler);
}

fn base_context(title: &str, user: Option<&User>) -> Context {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("user", &user);
    context.insert("message", &None::<String>);
    context.insert("version", env!("CARGO_PKG_VERSION"));
    context
}

fn render(status: StatusCode, template: &str, context: &Context) -> Result<HttpResponse, AppError> {
    let rendered = TEMPLATES.render(template, context).map_err(|e| {
        log::error!("Failed to render template {}: {}", template, e);
        AppError::TemplateError(e)
    })?;
    Ok(HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(rendered))
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header(("Location", location))
        .finish()
}

fn not_found_page(user: Option<&User>) -> Result<HttpResponse, AppError> {
    let context = base_context("Not found", user);
    render(StatusCode::NOT_FOUND, "no_auction.html", &context)
}

#[get("/")]
pub async fn index_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = auth::current_user(&state, identity.as_ref()).await?;
    let auctions = listings::list_active(&state).await?;

    let mut context = base_context("Active Auctions", user.as_ref());
    context.insert("auctions", &auctions);
    render(StatusCode::OK, "index.html", &context)
}

#[get("/login")]
pub async fn login_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = auth::current_user(&state, identity.as_ref()).await?;
    render(StatusCode::OK, "login.html", &base_context("Log In", user.as_ref()))
}

#[post("/login")]
pub async fn login_form_handler(
    web::Form(form): web::Form<Login>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    match auth::authenticate(&state, &form).await {
        Ok(user) => {
            Identity::login(&request.extensions(), user.id.to_string())?;
            log::info!("User {} logged in", user.id);
            Ok(redirect("/"))
        }
        Err(AuthError::App(e)) => Err(e),
        Err(e) => {
            let mut context = base_context("Log In", None);
            context.insert("message", &e.to_string());
            render(StatusCode::OK, "login.html", &context)
        }
    }
}

#[post("/logout")]
pub async fn logout_handler(identity: Option<Identity>) -> impl Responder {
    if let Some(identity) = identity {
        identity.logout();
    }
    redirect("/")
}

#[get("/register")]
pub async fn register_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = auth::current_user(&state, identity.as_ref()).await?;
    render(StatusCode::OK, "register.html", &base_context("Register", user.as_ref()))
}

#[post("/register")]
pub async fn register_form_handler(
    web::Form(form): web::Form<Register>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    match auth::register(&state, &form).await {
        Ok(user) => {
            Identity::login(&request.extensions(), user.id.to_string())?;
            Ok(redirect("/"))
        }
        Err(AuthError::App(e)) => Err(e),
        Err(e) => {
            let mut context = base_context("Register", None);
            context.insert("message", &e.to_string());
            context.insert("username", form.username.trim());
            context.insert("email", form.email.trim());
            render(StatusCode::OK, "register.html", &context)
        }
    }
}

#[get("/categories")]
pub async fn categories_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = auth::current_user(&state, identity.as_ref()).await?;
    let categories = db::get_all_categories(&state).await?;

    let mut context = base_context("Categories", user.as_ref());
    context.insert("categories", &categories);
    render(StatusCode::OK, "categories.html", &context)
}

#[get("/category/{name}")]
pub async fn category_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    name: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let user = auth::current_user(&state, identity.as_ref()).await?;
    let Some((category, auctions)) = listings::list_by_category(&state, &name).await? else {
        return not_found_page(user.as_ref());
    };

    let mut context = base_context(&category.name, user.as_ref());
    context.insert("category", &category);
    context.insert("auctions", &auctions);
    render(StatusCode::OK, "category.html", &context)
}

fn new_listing_page(
    status: StatusCode,
    user: &User,
    categories: &[Category],
    form: &ListingForm,
    errors: Vec<String>,
) -> Result<HttpResponse, AppError> {
    let mut context = base_context("Create Listing", Some(user));
    context.insert("categories", categories);
    context.insert("form", form);
    context.insert("selected_category", &form.category.trim().parse::<i64>().ok());
    context.insert("errors", &errors);
    render(status, "new_listing.html", &context)
}

#[get("/new_listing")]
pub async fn new_listing_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let Some(user) = auth::current_user(&state, identity.as_ref()).await? else {
        return Ok(redirect("/login"));
    };
    let categories = db::get_all_categories(&state).await?;
    new_listing_page(
        StatusCode::OK,
        &user,
        &categories,
        &ListingForm::default(),
        Vec::new(),
    )
}

/// The new-listing form as posted with `multipart/form-data`.
#[derive(MultipartForm)]
pub struct ListingUpload {
    item_name: Option<Text<String>>,
    description: Option<Text<String>>,
    starting_price: Option<Text<String>>,
    image_url: Option<Text<String>>,
    category: Option<Text<String>>,
    #[multipart(limit = "5MiB")]
    image: Option<TempFile>,
}

impl ListingUpload {
    /// Splits the upload into the text form and the image, if one was chosen.
    fn into_parts(self) -> (ListingForm, Option<TempFile>) {
        fn text(field: Option<Text<String>>) -> String {
            field.map(|t| t.0).unwrap_or_default()
        }
        let form = ListingForm {
            item_name: text(self.item_name),
            description: text(self.description),
            starting_price: text(self.starting_price),
            image_url: text(self.image_url),
            category: text(self.category),
        };
        // browsers send an empty part when no file was picked
        let image = self.image.filter(|file| file.size > 0);
        (form, image)
    }
}

#[post("/new_listing")]
pub async fn new_listing_form_handler(
    MultipartForm(upload): MultipartForm<ListingUpload>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let Some(user) = auth::current_user(&state, identity.as_ref()).await? else {
        return Ok(redirect("/login"));
    };
    let (form, image) = upload.into_parts();
    match listings::create_listing(&state, &user, &form, image).await {
        Ok(listing) => Ok(redirect(&format!("/auction/{}", listing.id))),
        Err(ListingError::Invalid(errors)) => {
            let categories = db::get_all_categories(&state).await?;
            new_listing_page(
                StatusCode::BAD_REQUEST,
                &user,
                &categories,
                &form,
                errors.messages(),
            )
        }
        Err(ListingError::App(e)) => Err(e),
    }
}

/// Renders the auction page, or the not-found page for unknown ids.
async fn auction_page(
    state: &AppState,
    user: Option<&User>,
    raw_id: &str,
    status: StatusCode,
    message: Option<String>,
) -> Result<HttpResponse, AppError> {
    let Ok(id) = raw_id.parse::<i64>() else {
        return not_found_page(user);
    };
    let Some(detail) = listings::get_listing(state, id).await? else {
        return not_found_page(user);
    };

    let is_owner = user.map(|u| u.id == detail.listing.owner_id).unwrap_or(false);
    let mut context = base_context(&detail.listing.item_name, user);
    context.insert("auction", &detail.listing);
    context.insert("highest_bid", &detail.highest_bid);
    context.insert("bids", &detail.bids);
    context.insert(
        "minimum_bid",
        &detail.minimum_bid.map(|cents| Money(cents).to_string()),
    );
    context.insert("is_owner", &is_owner);
    context.insert("message", &message);
    render(status, "auction.html", &context)
}

#[get("/auction/{id}")]
pub async fn auction_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    id: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let user = auth::current_user(&state, identity.as_ref()).await?;
    auction_page(&state, user.as_ref(), &id, StatusCode::OK, None).await
}

#[derive(Deserialize)]
pub struct BidForm {
    #[serde(default)]
    bid_amount: String,
}

#[post("/auction/{id}")]
pub async fn bid_form_handler(
    web::Form(form): web::Form<BidForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    id: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let Some(user) = auth::current_user(&state, identity.as_ref()).await? else {
        return Ok(redirect("/login"));
    };
    let Ok(listing_id) = id.parse::<i64>() else {
        return not_found_page(Some(&user));
    };

    let result = match form.bid_amount.parse::<Money>() {
        Ok(Money(amount)) => bidding::place_bid(&state, &user, listing_id, amount).await,
        Err(_) => Err(BidError::InvalidAmount),
    };
    match result {
        Ok(_) => Ok(redirect(&format!("/auction/{}", listing_id))),
        Err(BidError::ListingNotFound) => not_found_page(Some(&user)),
        Err(BidError::App(e)) => Err(e),
        Err(e) => {
            auction_page(
                &state,
                Some(&user),
                &id,
                StatusCode::BAD_REQUEST,
                Some(e.to_string()),
            )
            .await
        }
    }
}

#[post("/auction/{id}/close")]
pub async fn close_auction_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    id: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let Some(user) = auth::current_user(&state, identity.as_ref()).await? else {
        return Ok(redirect("/login"));
    };
    let Ok(listing_id) = id.parse::<i64>() else {
        return not_found_page(Some(&user));
    };
    match listings::close_listing(&state, &user, listing_id).await {
        Ok(_) => Ok(redirect(&format!("/auction/{}", listing_id))),
        Err(AppError::NotFound) => not_found_page(Some(&user)),
        Err(e) => Err(e),
    }
}
