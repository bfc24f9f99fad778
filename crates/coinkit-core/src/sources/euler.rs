//! Euler Finance vaults: classic USDC borrow APY on Avalanche and the
//! Sentora yield vault supply caps on Ethereum

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{fetch_json, pointer, to_big_int, utilization, SourceAdapter};
use crate::error::FetchError;
use crate::models::MetricRecord;

const BASE_URL: &str = "https://app.euler.finance";
const VAULT_PATH: &str = "/api/v1/vault";

const CLASSIC_CHAIN_ID: u64 = 43114;
const CLASSIC_VAULT_IDS: [&str; 2] = [
    "0xbaC3983342b805E66F8756E265b3B0DdF4B685Fc",
    "0x37ca03aD51B8ff79aAD35FadaCBA4CEDF0C3e74e",
];
const BORROW_VAULT_SYMBOL: &str = "eUSDC-19";

/// Interest rates are ray-scaled
const APY_SCALE: f64 = 1e27;

const YIELD_CHAIN_ID: u64 = 1;
const YIELD_VAULT_IDS: [&str; 2] = [
    "0xba98fC35C9dfd69178AD5dcE9FA29c64554783b5",
    "0xaF5372792a29dC6b296d6FFD4AA3386aff8f9BB2",
];

/// (vault symbol, metric key, display name)
const YIELD_VAULTS: [(&str, &str, &str); 2] = [
    (
        "ePYUSD-6",
        "euler:sentora_pyusd:supply:cap_util",
        "Euler Sentora PYUSD Supply Cap Utilization",
    ),
    (
        "eRLUSD-7",
        "euler:sentora_rlusd:supply:cap_util",
        "Euler Sentora RLUSD Supply Cap Utilization",
    ),
];

/// Euler vault metrics
pub struct EulerAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl EulerAdapter {
    /// Adapter against the public Euler API
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

    /// Fetch a set of vaults and index them by `vaultSymbol`
    async fn vaults(
        &self,
        chain_id: u64,
        ids: &[&str],
        vault_type: Option<&str>,
    ) -> Result<HashMap<String, Value>, FetchError> {
        let url = format!("{}{VAULT_PATH}", self.base_url);
        let mut query = vec![
            ("chainId", chain_id.to_string()),
            ("vaults", ids.join(",")),
        ];
        if let Some(vault_type) = vault_type {
            query.push(("type", vault_type.to_string()));
        }

        let payload = fetch_json(self.client.get(&url).query(&query)).await?;
        let Value::Object(entries) = payload else {
            return Err(FetchError::malformed("vault response is not an object"));
        };

        Ok(entries
            .into_iter()
            .filter_map(|(_, vault)| {
                let symbol = vault.get("vaultSymbol")?.as_str()?.to_string();
                Some((symbol, vault))
            })
            .collect())
    }
}

fn require<'a>(vaults: &'a HashMap<String, Value>, symbol: &str) -> Result<&'a Value, FetchError> {
    vaults
        .get(symbol)
        .ok_or_else(|| FetchError::malformed(format!("vault {symbol} not found")))
}

/// `totalAssets / supplyCap`, clamped to 1
fn supply_cap_ratio(vault: &Value) -> Result<f64, FetchError> {
    let total = to_big_int(pointer(vault, "/totalAssets")?)?;
    let cap = to_big_int(pointer(vault, "/supplyCap")?)?;
    Ok(utilization(total, cap).min(1.0))
}

#[async_trait]
impl SourceAdapter for EulerAdapter {
    fn name(&self) -> &str {
        "euler"
    }

    async fn fetch(&self) -> Result<Vec<MetricRecord>, FetchError> {
        let mut records = Vec::with_capacity(1 + YIELD_VAULTS.len());

        let classic = self
            .vaults(CLASSIC_CHAIN_ID, &CLASSIC_VAULT_IDS, Some("classic"))
            .await?;
        let target = require(&classic, BORROW_VAULT_SYMBOL)?;
        let rate = to_big_int(pointer(target, "/irmInfo/interestRateInfo/0/borrowAPY")?)? / APY_SCALE;
        debug!(rate, "Fetched Euler borrow APY");

        records.push(
            MetricRecord::rate("euler:usdc:borrow:rate", "Euler USDC Borrow APY", rate)
                .with_adapter(self.name()),
        );

        let yield_vaults = self.vaults(YIELD_CHAIN_ID, &YIELD_VAULT_IDS, None).await?;
        for (symbol, key, name) in YIELD_VAULTS {
            let ratio = supply_cap_ratio(require(&yield_vaults, symbol)?)?;
            records.push(MetricRecord::ratio(key, name, ratio).with_adapter(self.name()));
        }

        Ok(records)
    }
}
