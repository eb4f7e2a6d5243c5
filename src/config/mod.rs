//! Configuration module for the grain analyzer.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::grain::{DEFAULT_CIRCLES, DEFAULT_MAX_IMAGE_PIXELS, MAX_CIRCLES};

/// Default upload limit: 25 MiB.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Largest accepted request body, in bytes
    pub max_upload_bytes: usize,
    /// Test circles per analysis when the request does not say
    pub default_circles: usize,
    /// Largest decoded image area (width × height) accepted for analysis
    pub max_image_pixels: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("GRAIN_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("GRAIN_DB_PATH")
            .unwrap_or_else(|_| "./data/grain.sqlite".to_string())
            .into();

        let index_path = env::var("GRAIN_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = env::var("GRAIN_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid GRAIN_BIND_ADDR format");

        let log_level = env::var("GRAIN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let max_upload_bytes = parse_or("GRAIN_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES);

        let default_circles =
            parse_or("GRAIN_DEFAULT_CIRCLES", DEFAULT_CIRCLES).clamp(1, MAX_CIRCLES);

        let max_image_pixels =
            parse_or("GRAIN_MAX_IMAGE_PIXELS", DEFAULT_MAX_IMAGE_PIXELS).max(1);

        Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            max_upload_bytes,
            default_circles,
            max_image_pixels,
        }
    }
}

/// Parse an optional numeric variable, falling back to `default` with a
/// warning when it is malformed.
fn parse_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            eprintln!("Ignoring invalid {}={:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
