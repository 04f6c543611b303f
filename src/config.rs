//! Environment configuration
//!
//! Read once at startup. Binaries load `.env` via dotenv before calling
//! [`AppConfig::from_env`].

use crate::calculator::{ClassifierPolicy, DEFAULT_VENDOR_KEYWORDS};
use crate::error::BasError;
use crate::memory::DEFAULT_SESSION_IDLE_TTL;
use crate::Result;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub port: u16,
    pub policy: ClassifierPolicy,
    /// Allowed gap between total and amount ex GST + GST.
    pub total_tolerance: Decimal,
    /// Chat sessions untouched for this long are dropped.
    pub session_idle_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            port: DEFAULT_PORT,
            policy: ClassifierPolicy::default(),
            total_tolerance: Decimal::new(2, 2),
            session_idle_ttl: DEFAULT_SESSION_IDLE_TTL,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let gemini_api_key = lookup("GEMINI_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != "your_gemini_api_key_here");

        let gemini_model = lookup("GEMINI_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(defaults.gemini_model);

        let port = match lookup("PORT").or_else(|| lookup("API_PORT")) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| BasError::Config(format!("invalid PORT {:?}: {}", raw, e)))?,
            None => defaults.port,
        };

        let self_identifiers = lookup("BAS_SELF_IDENTIFIERS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let vendor_keywords = lookup("BAS_VENDOR_KEYWORDS")
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| DEFAULT_VENDOR_KEYWORDS.iter().map(|s| s.to_string()).collect());

        let total_tolerance = match lookup("BAS_TOTAL_TOLERANCE") {
            Some(raw) => Decimal::from_str(raw.trim())
                .map_err(|e| BasError::Config(format!("invalid BAS_TOTAL_TOLERANCE {:?}: {}", raw, e)))?,
            None => defaults.total_tolerance,
        };

        let session_idle_ttl = match lookup("BAS_SESSION_IDLE_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| BasError::Config(format!("invalid BAS_SESSION_IDLE_SECS {:?}: {}", raw, e)))?,
            None => defaults.session_idle_ttl,
        };

        Ok(Self {
            gemini_api_key,
            gemini_model,
            port,
            policy: ClassifierPolicy::new(self_identifiers, vendor_keywords),
            total_tolerance,
            session_idle_ttl,
        })
    }
}

/// Comma-separated list, blanks dropped, order kept.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
