// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory for the embedded ledger database | `./data` |
//! | `PASSPORT_TESTNET` | Use Goerli/BSC-testnet instead of mainnets | `true` |
//! | `PASSPORT_ETH_NODE_URL` | Ethereum HTTP RPC endpoint | public node |
//! | `PASSPORT_BSC_NODE_URL` | BSC HTTP RPC endpoint | public node |
//! | `PASSPORT_SUP_CONTRACT_ADDR` | SUPS token contract override | per-network constant |
//! | `PASSPORT_PURCHASE_ADDR` | Purchase/deposit receiving address | dev address |
//! | `PASSPORT_REDEMPTION_ADDR` | Redemption payout address | dev address |
//! | `PASSPORT_WITHDRAW_ADDR` | Hot wallet address (withdrawal sender) | dev address |
//! | `PASSPORT_HOT_WALLET_PRIVATE_KEY` | Hot wallet key; withdrawals disabled if unset | unset |
//! | `PASSPORT_SIGNER_PRIVATE_KEY` | Withdrawal-authorization signing key | dev key |
//! | `PASSPORT_SUPS_USD_MILLI` | SUPS price in milli-USD | `120` ($0.12) |
//! | `PASSPORT_BRIDGE_POLL_SECS` | Transfer-log poll interval | `10` |
//! | `PASSPORT_CONFIRM_POLL_SECS` | Confirmation-depth poll interval | `15` |
//! | `PASSPORT_PRICE_POLL_SECS` | Price oracle refresh interval | `60` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::path::PathBuf;

use crate::bridge::oracle::DEFAULT_SUPS_USD_MILLI;
use crate::chain::{NetworkConfig, BSC_MAINNET, BSC_TESTNET, ETH_GOERLI, ETH_MAINNET};

/// Environment variable for the data directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub testnet: bool,
    pub eth_rpc_url: String,
    pub bsc_rpc_url: String,
    /// SUPS contract override; falls back to the per-network constant.
    pub sups_contract: Option<String>,
    pub purchase_address: String,
    pub redemption_address: String,
    pub hot_wallet_address: String,
    pub hot_wallet_private_key: Option<String>,
    pub signer_private_key: String,
    pub sups_usd_milli: u64,
    pub bridge_poll_secs: u64,
    pub confirm_poll_secs: u64,
    pub price_poll_secs: u64,
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        let testnet = env_or("PASSPORT_TESTNET", "true") == "true";
        let (eth, bsc) = networks(testnet);

        Self {
            data_dir: PathBuf::from(env_or(DATA_DIR_ENV, "./data")),
            testnet,
            eth_rpc_url: env_or("PASSPORT_ETH_NODE_URL", eth.rpc_url),
            bsc_rpc_url: env_or("PASSPORT_BSC_NODE_URL", bsc.rpc_url),
            sups_contract: env::var("PASSPORT_SUP_CONTRACT_ADDR").ok(),
            purchase_address: env_or(
                "PASSPORT_PURCHASE_ADDR",
                "0x52b38626D3167e5357FE7348624352B7062fE271",
            ),
            redemption_address: env_or(
                "PASSPORT_REDEMPTION_ADDR",
                "0x9DAcEA338E4DDd856B152Ce553C7540DF920Bb15",
            ),
            hot_wallet_address: env_or(
                "PASSPORT_WITHDRAW_ADDR",
                "0xc01c2f6DD7cCd2B9F8DB9aa1Da9933edaBc5079E",
            ),
            hot_wallet_private_key: env::var("PASSPORT_HOT_WALLET_PRIVATE_KEY").ok(),
            // Dev key; production deployments always override
            signer_private_key: env_or(
                "PASSPORT_SIGNER_PRIVATE_KEY",
                "0x5f3b57101caf01c3d91e50809e70d84fcc404dd108aa8a9aa3e1a6c482267f48",
            ),
            sups_usd_milli: env_parse("PASSPORT_SUPS_USD_MILLI", DEFAULT_SUPS_USD_MILLI),
            bridge_poll_secs: env_parse("PASSPORT_BRIDGE_POLL_SECS", 10),
            confirm_poll_secs: env_parse("PASSPORT_CONFIRM_POLL_SECS", 15),
            price_poll_secs: env_parse("PASSPORT_PRICE_POLL_SECS", 60),
        }
    }

    /// The two bridged networks for this deployment.
    pub fn networks(&self) -> (NetworkConfig, NetworkConfig) {
        networks(self.testnet)
    }

    /// Path of the embedded ledger database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("passport-ledger.redb")
    }
}

fn networks(testnet: bool) -> (NetworkConfig, NetworkConfig) {
    if testnet {
        (ETH_GOERLI, BSC_TESTNET)
    } else {
        (ETH_MAINNET, BSC_MAINNET)
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
