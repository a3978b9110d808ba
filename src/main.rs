#[macro_use]
extern crate lazy_static;
use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};

use tera::Tera;

use actix_files::{Files, NamedFile};
use actix_multipart::form::{tempfile::TempFileConfig, MultipartFormConfig};
use actix_web::{
    http::{Method, StatusCode},
    middleware,
    web::{self, Data},
    App, Either, HttpResponse, HttpServer, Responder,
};
use log::info;
use sqlx::SqlitePool;
use std::path::PathBuf;
mod auth;
mod bidding;
mod config;
mod db;
mod errors;
mod listings;
mod media;
mod routes;
mod structs;
mod utils;
use config::Config;
use errors::AppError;

#[derive(Debug, Clone)]
pub struct AppState {
    db_pool: SqlitePool,
    /// Where uploaded listing images are stored, served under `/media`.
    media_dir: PathBuf,
}

const DB_MAX_CONNECTIONS: u32 = 5;

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = match Tera::new("templates/**/*") {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera.register_filter("money", utils::money_filter);
        tera
    };
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| {
        log::error!("FATAL: {}", e);
        e
    })?;

    let db_pool = db::connect(&config.database_url, DB_MAX_CONNECTIONS)
        .await
        .map_err(|e| {
            log::error!("FATAL: could not open {}: {}", config.database_url, e);
            e
        })?;

    std::fs::create_dir_all(&config.media_dir).map_err(|e| {
        log::error!("FATAL: could not create {}: {}", config.media_dir.display(), e);
        e
    })?;

    // force template parsing before the first request
    lazy_static::initialize(&TEMPLATES);

    info!(
        "Starting HTTP server on http://{}:{}/",
        config.host, config.port
    );

    let session_key = config.session_key.clone();
    let secure_cookies = config.secure_cookies;
    let media_dir = config.media_dir.clone();
    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_secure(secure_cookies)
                    .build(),
            )
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "static"))
            .service(Files::new(media::MEDIA_URL_PREFIX, &media_dir))
            // uploads land in the media dir so storing one is a rename
            .app_data(TempFileConfig::default().directory(&media_dir))
            .app_data(MultipartFormConfig::default().total_limit(media::MAX_UPLOAD_BYTES))
            .app_data(Data::new(AppState {
                db_pool: db_pool.clone(),
                media_dir: media_dir.clone(),
            }))
            .configure(routes::configure)
            .default_service(web::to(default_handler))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}

async fn default_handler(req_method: Method) -> Result<impl Responder, std::io::Error> {
    match req_method {
        Method::GET => {
            let file = NamedFile::open("static/404.html")?
                .customize()
                .with_status(StatusCode::NOT_FOUND);
            Ok(Either::Left(file))
        }
        _ => Ok(Either::Right(HttpResponse::MethodNotAllowed().finish())),
    }
}
