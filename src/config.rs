use std::path::PathBuf;

use actix_web::cookie::Key;

use crate::errors::AppError;

const DEFAULT_DATABASE_URL: &str = "sqlite://auctions.db";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MEDIA_DIR: &str = "media";

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub session_key: Key,
    pub secure_cookies: bool,
    pub media_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());
        let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| AppError::ConfigError(format!("PORT {:?}: {}", raw, e)))?,
            None => DEFAULT_PORT,
        };

        let key_str = lookup("SESSION_KEY")
            .ok_or_else(|| AppError::ConfigError("SESSION_KEY is not set".to_owned()))?;
        // Key::from panics below 64 bytes
        let session_key = Key::try_from(key_str.as_bytes()).map_err(|_| {
            AppError::ConfigError("SESSION_KEY must be at least 64 bytes long".to_owned())
        })?;

        let secure_cookies = match lookup("SECURE_COOKIES").as_deref().map(str::trim) {
            None => true,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => {
                return Err(AppError::ConfigError(format!(
                    "SECURE_COOKIES must be true or false, got {:?}",
                    other
                )))
            }
        };

        let media_dir = PathBuf::from(
            lookup("MEDIA_DIR").unwrap_or_else(|| DEFAULT_MEDIA_DIR.to_owned()),
        );

        Ok(Config {
            database_url,
            host,
            port,
            session_key,
            secure_cookies,
            media_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = Config::from_lookup(lookup_from(&[("SESSION_KEY", KEY)])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.secure_cookies);
        assert_eq!(config.media_dir, PathBuf::from("media"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("SESSION_KEY", KEY),
            ("DATABASE_URL", "sqlite::memory:"),
            ("HOST", "127.0.0.1"),
            ("PORT", "3000"),
            ("SECURE_COOKIES", "false"),
            ("MEDIA_DIR", "/var/lib/auctions/media"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(!config.secure_cookies);
        assert_eq!(config.media_dir, PathBuf::from("/var/lib/auctions/media"));
    }

    #[test]
    fn missing_session_key_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[])).err().unwrap();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn short_session_key_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("SESSION_KEY", "short")]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("64 bytes"));
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = Config::from_lookup(lookup_from(&[("SESSION_KEY", KEY), ("PORT", "http")]));
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
