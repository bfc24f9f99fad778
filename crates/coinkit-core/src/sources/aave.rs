//! Aave V3 Ethereum supply and borrow cap utilization for RLUSD and PYUSD

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{fetch_json, pointer, to_f64, utilization, SourceAdapter};
use crate::error::FetchError;
use crate::models::MetricRecord;

const BASE_URL: &str = "https://api.v3.aave.com";
const GRAPHQL_PATH: &str = "/graphql";

const CHAIN_ID: u64 = 1;
const MARKET: &str = "0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2";

/// (symbol, underlying token)
const TOKENS: [(&str, &str); 2] = [
    ("RLUSD", "0x8292bb45bf1ee4d140127049757c2e0ff06317ed"),
    ("PYUSD", "0x6c3ea9036406852006290770BEdFcAbA0e23A0e8"),
];

fn reserve_query(token: &str) -> String {
    format!(
        r#"query ReserveCaps {{
  reserve(request: {{ chainId: {CHAIN_ID}, market: "{MARKET}", underlyingToken: "{token}" }}) {{
    supplyInfo {{
      total {{ value }}
      supplyCap {{ amount {{ value }} }}
      supplyCapReached
    }}
    borrowInfo {{
      total {{ amount {{ value }} }}
      borrowCap {{ amount {{ value }} }}
      borrowCapReached
    }}
  }}
}}"#
    )
}

/// Utilization, forced to full when the upstream says the cap is reached
fn cap_ratio(reserve: &Value, used: &str, cap: &str, reached: &str) -> Result<f64, FetchError> {
    if pointer(reserve, reached)?.as_bool().unwrap_or(false) {
        return Ok(1.0);
    }
    let used = to_f64(pointer(reserve, used)?)?;
    let cap = to_f64(pointer(reserve, cap)?)?;
    Ok(utilization(used, cap))
}

/// Aave reserve caps
pub struct AaveAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl AaveAdapter {
    /// Adapter against the public Aave GraphQL API
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

    async fn reserve(&self, symbol: &str, token: &str) -> Result<Value, FetchError> {
        let url = format!("{}{GRAPHQL_PATH}", self.base_url);
        let request = self
            .client
            .post(&url)
            .json(&json!({ "query": reserve_query(token) }));

        let mut payload = fetch_json(request).await?;
        match payload.pointer_mut("/data/reserve").map(Value::take) {
            Some(reserve) if !reserve.is_null() => Ok(reserve),
            _ => Err(FetchError::malformed(format!("missing reserve for {symbol}"))),
        }
    }
}

#[async_trait]
impl SourceAdapter for AaveAdapter {
    fn name(&self) -> &str {
        "aave"
    }

    async fn fetch(&self) -> Result<Vec<MetricRecord>, FetchError> {
        let mut records = Vec::with_capacity(TOKENS.len() * 2);

        for (symbol, token) in TOKENS {
            let reserve = self.reserve(symbol, token).await?;

            let supply = cap_ratio(
                &reserve,
                "/supplyInfo/total/value",
                "/supplyInfo/supplyCap/amount/value",
                "/supplyInfo/supplyCapReached",
            )?;
            let borrow = cap_ratio(
                &reserve,
                "/borrowInfo/total/amount/value",
                "/borrowInfo/borrowCap/amount/value",
                "/borrowInfo/borrowCapReached",
            )?;
            debug!(symbol, supply, borrow, "Fetched Aave cap utilization");

            let lower = symbol.to_lowercase();
            records.push(
                MetricRecord::ratio(
                    format!("aave:{lower}:supply:cap_util"),
                    format!("Aave {symbol} Supply Cap Utilization"),
                    supply,
                )
                .with_adapter(self.name()),
            );
            records.push(
                MetricRecord::ratio(
                    format!("aave:{lower}:borrow:cap_util"),
                    format!("Aave {symbol} Borrow Cap Utilization"),
                    borrow,
                )
                .with_adapter(self.name()),
            );
        }

        Ok(records)
    }
}
