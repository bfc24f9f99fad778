//! Dolomite (Berachain) stablecoin borrow APRs

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::{fetch_json, pointer, SourceAdapter};
use crate::error::FetchError;
use crate::models::{MetricRecord, Unit};

const BASE_URL: &str = "https://api.dolomite.io";
const RATES_PATH: &str = "/tokens/80094/interest-rates";

/// (token symbol, metric key)
const TARGETS: [(&str, &str); 4] = [
    ("USDC", "dolomite:usdc:borrow:rate"),
    ("BYUSD", "dolomite:byusd:borrow:rate"),
    ("rUSD", "dolomite:rusd:borrow:rate"),
    ("USDT", "dolomite:usdt:borrow:rate"),
];

/// Dolomite borrow rates
pub struct DolomiteAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl DolomiteAdapter {
    /// Adapter against the public Dolomite API
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    /// Adapter against another host (tests, proxies)
    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for DolomiteAdapter {
    fn name(&self) -> &str {
        "dolomite"
    }

    async fn fetch(&self) -> Result<Vec<MetricRecord>, FetchError> {
        let url = format!("{}{RATES_PATH}", self.base_url);
        let request = self.client.get(&url).query(&[("exclude-odolo", "false")]);
        let payload = fetch_json(request).await?;

        let rows = pointer(&payload, "/interestRates")?
            .as_array()
            .filter(|rows| !rows.is_empty())
            .ok_or_else(|| FetchError::malformed("interestRates is empty"))?;

        let mut found = HashMap::new();
        for row in rows {
            let Some(symbol) = row.pointer("/token/tokenSymbol").and_then(|s| s.as_str()) else {
                continue;
            };
            if !TARGETS.iter().any(|(target, _)| *target == symbol) {
                continue;
            }
            let rate = row
                .get("borrowInterestRate")
                .filter(|v| !v.is_null())
                .ok_or_else(|| FetchError::malformed(format!("missing borrowInterestRate for {symbol}")))?;
            found.insert(symbol, rate);
        }

        let missing: Vec<&str> = TARGETS
            .iter()
            .map(|(symbol, _)| *symbol)
            .filter(|symbol| !found.contains_key(symbol))
            .collect();
        if !missing.is_empty() {
            return Err(FetchError::malformed(format!(
                "markets not found: {}",
                missing.join(", ")
            )));
        }

        debug!(markets = found.len(), "Fetched Dolomite borrow rates");

        TARGETS
            .iter()
            .map(|(symbol, key)| {
                MetricRecord::from_raw(
                    *key,
                    format!("Dolomite {symbol} Borrow APR"),
                    Unit::Rate,
                    found[symbol].clone(),
                    Some(self.name().to_string()),
                )
                .map_err(|e| FetchError::malformed(e.to_string()))
            })
            .collect()
    }
}
