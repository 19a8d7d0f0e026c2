// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM chain access: network/token constants, the RPC client wrapper, the
//! ERC-20 interface, and the hot-wallet gateway used by withdrawals.

pub mod client;
pub mod erc20;
pub mod gateway;
pub mod types;

pub use client::EvmClient;
pub use gateway::{AlloyHotWallet, HotWalletGateway};
pub use types::{
    Erc20Token, NetworkConfig, BSC_MAINNET, BSC_TESTNET, BUSD_TOKEN, ETH_GOERLI, ETH_MAINNET,
    SUPS_TOKEN, USDC_TOKEN,
};

/// Errors that can occur during chain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("contract error: {0}")]
    Contract(String),

    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),
}
