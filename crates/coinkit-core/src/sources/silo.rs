//! Silo Finance (Avalanche market 142) borrow APR

use async_trait::async_trait;
use tracing::debug;

use super::{fetch_json, pointer, to_big_int, SourceAdapter};
use crate::error::FetchError;
use crate::models::MetricRecord;

const BASE_URL: &str = "https://app.silo.finance";
const MARKET_PATH: &str = "/api/lending-market/avalanche/142";

/// `debtBaseApr` is scaled by 1e18
const APR_SCALE: f64 = 1e18;

/// Silo savUSD/USDC borrow rate
pub struct SiloAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl SiloAdapter {
    /// Adapter against the public Silo API
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
impl SourceAdapter for SiloAdapter {
    fn name(&self) -> &str {
        "silo"
    }

    async fn fetch(&self) -> Result<Vec<MetricRecord>, FetchError> {
        let url = format!("{}{MARKET_PATH}", self.base_url);
        let payload = fetch_json(self.client.get(&url)).await?;

        // silo1 is the USDC side of the market
        let rate = to_big_int(pointer(&payload, "/silo1/debtBaseApr")?)? / APR_SCALE;

        debug!(rate, "Fetched Silo borrow APR");

        Ok(vec![MetricRecord::rate(
            "silo:usdc:borrow:rate",
            "Silo savUSD/USDC Borrow APR",
            rate,
        )
        .with_adapter(self.name())])
    }
}
