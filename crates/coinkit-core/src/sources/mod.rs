//! Source adapters
//!
//! Each adapter polls one upstream API and normalizes the answer into
//! [`MetricRecord`]s. Failures are per adapter and never abort a cycle.

mod aave;
mod dolomite;
mod euler;
mod jupiter;
mod metadao;
mod silo;

pub use aave::AaveAdapter;
pub use dolomite::DolomiteAdapter;
pub use euler::EulerAdapter;
pub use jupiter::JupiterAdapter;
pub use metadao::MetaDaoAdapter;
pub use silo::SiloAdapter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::SourcesConfig;
use crate::error::{Error, FetchError, Result};
use crate::models::MetricRecord;

/// Names of every built-in adapter, in polling order
pub const ADAPTER_NAMES: [&str; 6] = ["silo", "euler", "aave", "dolomite", "jupiter", "metadao"];

/// A polled upstream data source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name, also the routing tag of its records
    fn name(&self) -> &str;

    /// Poll the upstream once
    async fn fetch(&self) -> std::result::Result<Vec<MetricRecord>, FetchError>;
}

/// Build the HTTP client shared by all adapters
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("coinkit/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Instantiate the adapters enabled in the config, in configured order
pub fn from_config(config: &SourcesConfig) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let client = http_client(config.request_timeout)?;
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(config.enabled.len());

    for name in &config.enabled {
        let adapter: Arc<dyn SourceAdapter> = match name.to_lowercase().as_str() {
            "silo" => Arc::new(SiloAdapter::new(client.clone())),
            "euler" => Arc::new(EulerAdapter::new(client.clone())),
            "aave" => Arc::new(AaveAdapter::new(client.clone())),
            "dolomite" => Arc::new(DolomiteAdapter::new(client.clone())),
            "jupiter" => Arc::new(JupiterAdapter::new(client.clone())),
            "metadao" => Arc::new(MetaDaoAdapter::new(client.clone())),
            other => {
                warn!(adapter = other, "Unknown adapter in config");
                return Err(Error::config(format!("unknown source adapter '{other}'")));
            }
        };
        adapters.push(adapter);
    }

    Ok(adapters)
}

/// Send a request and decode a JSON body, mapping HTTP failures to [`FetchError`]
pub(crate) async fn fetch_json(
    request: reqwest::RequestBuilder,
) -> std::result::Result<Value, FetchError> {
    let response = request.send().await?.error_for_status()?;
    Ok(response.json::<Value>().await?)
}

/// Walk a JSON path, failing with a malformed-response error naming the path
pub(crate) fn pointer<'a>(value: &'a Value, path: &str) -> std::result::Result<&'a Value, FetchError> {
    value
        .pointer(path)
        .filter(|v| !v.is_null())
        .ok_or_else(|| FetchError::malformed(format!("missing {path}")))
}

/// Read a float from a JSON number or numeric string
pub(crate) fn to_f64(value: &Value) -> std::result::Result<f64, FetchError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FetchError::malformed(format!("{n} is not a float"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| FetchError::malformed(format!("'{s}' is not a number"))),
        other => Err(FetchError::malformed(format!("expected a number, got {other}"))),
    }
}

/// Read an unbounded integer as a float: JSON number, decimal string, `0x`
/// hex or `__bigint__`-prefixed string
///
/// Values past `u128` (uint256 "no cap" sentinels) still parse; precision
/// beyond an `f64` mantissa is dropped.
pub(crate) fn to_big_int(value: &Value) -> std::result::Result<f64, FetchError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v as f64)
            .or_else(|| n.as_i64().map(|v| v as f64))
            .or_else(|| n.as_f64().filter(|v| v.fract() == 0.0))
            .ok_or_else(|| FetchError::malformed(format!("{n} is not an integer"))),
        Value::String(s) => {
            let trimmed = s.trim();
            let trimmed = trimmed.strip_prefix("__bigint__").unwrap_or(trimmed);
            parse_digits(trimmed)
                .ok_or_else(|| FetchError::malformed(format!("'{trimmed}' is not an integer")))
        }
        other => Err(FetchError::malformed(format!("expected an integer, got {other}"))),
    }
}

fn parse_digits(s: &str) -> Option<f64> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let magnitude = match s.strip_prefix("0x") {
        Some(hex) if !hex.is_empty() => hex
            .chars()
            .try_fold(0.0_f64, |acc, c| c.to_digit(16).map(|d| acc * 16.0 + f64::from(d)))?,
        Some(_) => return None,
        None if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse::<f64>().ok()?,
        None => return None,
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// `used / cap`, 0 when the cap is not positive
pub(crate) fn utilization(used: f64, cap: f64) -> f64 {
    if cap > 0.0 {
        used / cap
    } else {
        0.0
    }
}
