// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Price oracle for purchase conversion.
//!
//! Prices are held as integer milli-USD (1000x fixed point) so conversion
//! never touches floating point. Stablecoins are pinned at $1.000; native
//! token prices are refreshed out-of-band from the Coinbase exchange-rates
//! API by [`run_price_poller`]. The SUPS/USD price is operator-configured.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use alloy::primitives::U256;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Default SUPS price: $0.12.
pub const DEFAULT_SUPS_USD_MILLI: u64 = 120;

/// Exchange-rates endpoint; `{}` is the base currency symbol.
const EXCHANGE_RATES_URL: &str = "https://api.coinbase.com/v2/exchange-rates?currency=";

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("no price available for {0}")]
    PriceUnavailable(String),

    #[error("SUPS price is zero")]
    ZeroSupsPrice,
}

struct Prices {
    sups_usd_milli: u64,
    /// Symbol → milli-USD per whole token.
    token_usd_milli: HashMap<String, u64>,
}

/// Shared price table. Cheap to clone.
#[derive(Clone)]
pub struct PriceOracle {
    inner: Arc<RwLock<Prices>>,
}

impl PriceOracle {
    pub fn new(sups_usd_milli: u64) -> Self {
        let mut token_usd_milli = HashMap::new();
        // Stablecoins are pinned; the poller only moves native token prices
        token_usd_milli.insert("BUSD".to_string(), 1000);
        token_usd_milli.insert("USDC".to_string(), 1000);
        Self {
            inner: Arc::new(RwLock::new(Prices {
                sups_usd_milli,
                token_usd_milli,
            })),
        }
    }

    pub fn set_token_usd_milli(&self, symbol: &str, usd_milli: u64) {
        let mut prices = self.inner.write().expect("oracle lock poisoned");
        prices.token_usd_milli.insert(symbol.to_string(), usd_milli);
    }

    pub fn token_usd_milli(&self, symbol: &str) -> Option<u64> {
        let prices = self.inner.read().expect("oracle lock poisoned");
        prices.token_usd_milli.get(symbol).copied()
    }

    pub fn sups_usd_milli(&self) -> u64 {
        self.inner.read().expect("oracle lock poisoned").sups_usd_milli
    }

    /// Convert a token amount (in its smallest unit) to SUPS (18 decimals).
    ///
    /// Value goes through milli-USD, is rounded UP to whole cents, and the
    /// cent value is converted at the configured SUPS price. The cent
    /// ceiling means very small amounts round in the buyer's favor.
    pub fn token_to_sups(
        &self,
        symbol: &str,
        amount: U256,
        decimals: u8,
    ) -> Result<U256, OracleError> {
        let token_milli = self
            .token_usd_milli(symbol)
            .ok_or_else(|| OracleError::PriceUnavailable(symbol.to_string()))?;
        let sups_milli = self.sups_usd_milli();
        if sups_milli == 0 {
            return Err(OracleError::ZeroSupsPrice);
        }

        let unit = U256::from(10u64).pow(U256::from(decimals));
        let usd_milli = amount * U256::from(token_milli) / unit;

        // Ceiling at cent granularity (10 milli-USD per cent)
        let ten = U256::from(10u64);
        let usd_cents = (usd_milli + ten - U256::from(1u64)) / ten;

        // cents → SUPS wei: one cent is 10^19 / (sups price in milli-USD)
        Ok(usd_cents * U256::from(10u64).pow(U256::from(19u64)) / U256::from(sups_milli))
    }
}

#[derive(Deserialize)]
struct ExchangeRatesResponse {
    data: ExchangeRatesData,
}

#[derive(Deserialize)]
struct ExchangeRatesData {
    rates: HashMap<String, String>,
}

/// Parse a decimal USD string ("3512.87") into milli-USD.
fn parse_usd_milli(raw: &str) -> Option<u64> {
    let mut parts = raw.splitn(2, '.');
    let whole: u64 = parts.next()?.parse().ok()?;
    let frac = parts.next().unwrap_or("");
    let frac_milli: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<3}");
        padded[..3].parse().ok()?
    };
    whole.checked_mul(1000)?.checked_add(frac_milli)
}

/// Refresh one native token's USD price.
async fn fetch_usd_milli(http: &reqwest::Client, symbol: &str) -> Result<u64, String> {
    let url = format!("{EXCHANGE_RATES_URL}{symbol}");
    let response: ExchangeRatesResponse = http
        .get(&url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?
        .json()
        .await
        .map_err(|e| e.to_string())?;

    let usd = response
        .data
        .rates
        .get("USD")
        .ok_or_else(|| format!("no USD rate for {symbol}"))?;
    parse_usd_milli(usd).ok_or_else(|| format!("unparseable USD rate for {symbol}: {usd}"))
}

/// Background task keeping native token prices fresh.
pub async fn run_price_poller(
    oracle: PriceOracle,
    http: reqwest::Client,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "price poller starting");

    loop {
        for symbol in ["ETH", "BNB"] {
            match fetch_usd_milli(&http, symbol).await {
                Ok(usd_milli) => {
                    oracle.set_token_usd_milli(symbol, usd_milli);
                    tracing::debug!(%symbol, usd_milli, "price updated");
                }
                Err(e) => {
                    tracing::warn!(%symbol, error = %e, "price refresh failed, keeping last value");
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("price poller shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::one_sup;

    #[test]
    fn one_dollar_of_busd_buys_sups_at_configured_price() {
        let oracle = PriceOracle::new(DEFAULT_SUPS_USD_MILLI);
        // 1 BUSD = $1.000 = 100 cents; at $0.12 per SUP that is 8.333... SUPS
        let sups = oracle
            .token_to_sups("BUSD", one_sup(), 18)
            .unwrap();
        let expected = U256::from(100u64) * U256::from(10u64).pow(U256::from(19u64))
            / U256::from(DEFAULT_SUPS_USD_MILLI);
        assert_eq!(sups, expected);
        // Sanity: a little over 8.3 SUPS
        assert!(sups > one_sup() * U256::from(8u64));
        assert!(sups < one_sup() * U256::from(9u64));
    }

    #[test]
    fn usdc_six_decimals_converts() {
        let oracle = PriceOracle::new(100); // $0.10 per SUP
        // 5 USDC = $5 = 500 cents = 50 SUPS
        let five_usdc = U256::from(5_000_000u64);
        let sups = oracle.token_to_sups("USDC", five_usdc, 6).unwrap();
        assert_eq!(sups, one_sup() * U256::from(50u64));
    }

    #[test]
    fn sub_cent_amounts_round_up_to_one_cent() {
        let oracle = PriceOracle::new(100);
        // 0.001 USDC = 0.1 cents, ceilinged to 1 cent = 0.1 SUPS
        let dust = U256::from(1_000u64);
        let sups = oracle.token_to_sups("USDC", dust, 6).unwrap();
        assert_eq!(sups, one_sup() / U256::from(10u64));
    }

    #[test]
    fn native_price_updates_take_effect() {
        let oracle = PriceOracle::new(100);
        assert!(matches!(
            oracle.token_to_sups("ETH", one_sup(), 18),
            Err(OracleError::PriceUnavailable(_))
        ));

        oracle.set_token_usd_milli("ETH", 2_000_000); // $2000
        // 0.01 ETH = $20 = 2000 cents = 200 SUPS at $0.10
        let amount = one_sup() / U256::from(100u64);
        let sups = oracle.token_to_sups("ETH", amount, 18).unwrap();
        assert_eq!(sups, one_sup() * U256::from(200u64));
    }

    #[test]
    fn parse_usd_milli_handles_common_shapes() {
        assert_eq!(parse_usd_milli("3512.87"), Some(3_512_870));
        assert_eq!(parse_usd_milli("1"), Some(1_000));
        assert_eq!(parse_usd_milli("0.1"), Some(100));
        assert_eq!(parse_usd_milli("0.1234"), Some(123));
        assert_eq!(parse_usd_milli("abc"), None);
    }
}
