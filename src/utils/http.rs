// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::GerritConfig;

/// Line Gerrit prepends to every JSON body to defeat cross-site script inclusion.
pub const MAGIC_PREFIX: &str = ")]}'";

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &GerritConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Remove the anti-XSSI prefix line if present.
pub fn strip_magic_prefix(body: &str) -> &str {
    match body.strip_prefix(MAGIC_PREFIX) {
        Some(rest) => rest.trim_start_matches(['\r', '\n']),
        None => body,
    }
}

/// Decode a Gerrit response body into JSON.
pub fn decode_json(url: &str, body: &str) -> Result<Value> {
    serde_json::from_str(strip_magic_prefix(body)).map_err(|e| AppError::parse(url, e))
}
