//! Configuration module for the consent service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::CmpError;

/// Theme color the UI ships with; any other configured color is a customization.
pub const DEFAULT_COLOR: &str = "#2e7d32";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Publisher (site owner) name shown with the publisher purposes
    pub publisher_name: String,
    /// Purpose ids the publisher declares for its own processing
    pub publisher_purpose_ids: Vec<u16>,
    /// Explicit UI override; `None` leaves the decision to the cookie state
    pub force_show_ui: Option<bool>,
    /// UI theme color
    pub color: String,
    /// Remote vendor list document
    pub vendor_list_url: String,
    /// Remote purpose list document
    pub purpose_list_url: String,
    /// Path to the SQLite cookie storage
    pub db_path: PathBuf,
    /// Consent cookie lifetime in days
    pub cookie_max_age_days: u32,
    /// Pre-shared key for the command API (optional)
    pub api_psk: Option<String>,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            publisher_name: String::new(),
            publisher_purpose_ids: Vec::new(),
            force_show_ui: None,
            color: DEFAULT_COLOR.to_string(),
            vendor_list_url: "https://vendorlist.consensu.org/vendorlist.json".to_string(),
            purpose_list_url: "./purposes.json".to_string(),
            db_path: "./data/cookies.sqlite".into(),
            cookie_max_age_days: 390,
            api_psk: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, CmpError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let publisher_name = env::var("CMP_PUBLISHER_NAME").unwrap_or(defaults.publisher_name);

        let publisher_purpose_ids = match env::var("CMP_PUBLISHER_PURPOSE_IDS") {
            Ok(raw) => parse_id_list(&raw)?,
            Err(_) => defaults.publisher_purpose_ids,
        };

        let force_show_ui = match env::var("CMP_FORCE_SHOW_UI") {
            Ok(raw) => Some(parse_bool("CMP_FORCE_SHOW_UI", &raw)?),
            Err(_) => None,
        };

        let color = env::var("CMP_COLOR").unwrap_or(defaults.color);

        let vendor_list_url = env::var("CMP_VENDOR_LIST_URL").unwrap_or(defaults.vendor_list_url);
        let purpose_list_url =
            env::var("CMP_PURPOSE_LIST_URL").unwrap_or(defaults.purpose_list_url);

        let db_path = env::var("CMP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let cookie_max_age_days = match env::var("CMP_COOKIE_MAX_AGE_DAYS") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                CmpError::InvalidParameter(format!("Invalid CMP_COOKIE_MAX_AGE_DAYS: {}", raw))
            })?,
            Err(_) => defaults.cookie_max_age_days,
        };

        let api_psk = env::var("CMP_API_PSK").ok().filter(|s| !s.is_empty());

        let bind_addr = match env::var("CMP_BIND_ADDR") {
            Ok(raw) => raw.parse().map_err(|_| {
                CmpError::InvalidParameter(format!("Invalid CMP_BIND_ADDR format: {}", raw))
            })?,
            Err(_) => defaults.bind_addr,
        };

        let log_level = env::var("CMP_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            publisher_name,
            publisher_purpose_ids,
            force_show_ui,
            color,
            vendor_list_url,
            purpose_list_url,
            db_path,
            cookie_max_age_days,
            api_psk,
            bind_addr,
            log_level,
        })
    }

    /// Cookie lifetime as a chrono duration.
    pub fn cookie_max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cookie_max_age_days))
    }
}

/// Parse a comma separated list of purpose ids, ignoring blanks.
fn parse_id_list(raw: &str) -> Result<Vec<u16>, CmpError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .map_err(|_| CmpError::InvalidParameter(format!("Invalid purpose id: {}", s)))
        })
        .collect()
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, CmpError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CmpError::InvalidParameter(format!(
            "Invalid boolean for {}: {}",
            name, raw
        ))),
    }
}
