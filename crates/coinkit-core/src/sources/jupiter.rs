//! Jupiter Lend (Fluid on Solana) syrupUSDC vault borrow APRs

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{fetch_json, to_f64, SourceAdapter};
use crate::error::FetchError;
use crate::models::MetricRecord;

const BASE_URL: &str = "https://api.solana.fluid.io";
const VAULTS_PATH: &str = "/v1/borrowing/vaults";

/// Rates are reported in basis points
const RATE_SCALE: f64 = 10_000.0;

/// (vault id, borrowed token)
const VAULTS: [(u32, &str); 5] = [
    (7, "USDC"),
    (30, "USDT"),
    (31, "USDG"),
    (60, "JupUSD"),
    (33, "USDS"),
];

/// Jupiter borrow rates
pub struct JupiterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl JupiterAdapter {
    /// Adapter against the public Jupiter Lend API
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

/// Prefer the liquidity-layer rate, fall back to the vault rate
fn borrow_rate(vault: &Value) -> Result<f64, FetchError> {
    let raw = ["borrowRateLiquidity", "borrowRate"]
        .iter()
        .find_map(|field| vault.get(*field).filter(|v| !v.is_null()))
        .ok_or_else(|| FetchError::malformed("missing borrowRate and borrowRateLiquidity"))?;
    Ok(to_f64(raw)? / RATE_SCALE)
}

#[async_trait]
impl SourceAdapter for JupiterAdapter {
    fn name(&self) -> &str {
        "jupiter"
    }

    async fn fetch(&self) -> Result<Vec<MetricRecord>, FetchError> {
        let mut records = Vec::with_capacity(VAULTS.len());

        for (id, symbol) in VAULTS {
            let url = format!("{}{VAULTS_PATH}/{id}", self.base_url);
            let payload = fetch_json(self.client.get(&url)).await?;
            let rate = borrow_rate(&payload)?;
            debug!(vault = id, symbol, rate, "Fetched Jupiter borrow APR");

            records.push(
                MetricRecord::rate(
                    format!("jupiter:syrupusdc:{}:borrow:rate", symbol.to_lowercase()),
                    format!("Jupiter syrupUSDC/{symbol} Borrow APR"),
                    rate,
                )
                .with_adapter(self.name()),
            );
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn liquidity_rate_takes_precedence() {
        let vault = json!({"borrowRateLiquidity": 450, "borrowRate": 900});
        assert_eq!(borrow_rate(&vault).unwrap(), 0.045);

        let vault = json!({"borrowRate": "900"});
        assert_eq!(borrow_rate(&vault).unwrap(), 0.09);

        assert!(borrow_rate(&json!({})).is_err());
    }

    #[tokio::test]
    async fn one_record_per_vault() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{VAULTS_PATH}/60")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"borrowRate": 700})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/borrowing/vaults/\d+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"borrowRateLiquidity": 500})))
            .mount(&server)
            .await;

        let adapter = JupiterAdapter::with_base_url(reqwest::Client::new(), server.uri());
        let records = adapter.fetch().await.unwrap();

        assert_eq!(records.len(), 5);
        assert_eq!(records[3].key, "jupiter:syrupusdc:jupusd:borrow:rate");
        assert_eq!(records[3].display_name, "Jupiter syrupUSDC/JupUSD Borrow APR");
        assert!(matches!(records[3].value, MetricValue::Rate(r) if r == 0.07));
        assert!(matches!(records[0].value, MetricValue::Rate(r) if r == 0.05));
        assert!(records.iter().all(|r| r.adapter_tag.as_deref() == Some("jupiter")));
    }
}
