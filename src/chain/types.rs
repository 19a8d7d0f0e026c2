// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Network and token constants for the two bridged chains.

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// Chain ID
    pub chain_id: u64,
    /// Native token symbol
    pub native_symbol: &'static str,
    /// Default RPC endpoint URL (deployments override via config)
    pub rpc_url: &'static str,
    /// Block explorer URL
    pub explorer_url: &'static str,
}

/// Ethereum mainnet configuration.
pub const ETH_MAINNET: NetworkConfig = NetworkConfig {
    name: "Ethereum",
    chain_id: 1,
    native_symbol: "ETH",
    rpc_url: "https://ethereum-rpc.publicnode.com",
    explorer_url: "https://etherscan.io",
};

/// Ethereum Goerli testnet configuration.
pub const ETH_GOERLI: NetworkConfig = NetworkConfig {
    name: "Ethereum Goerli",
    chain_id: 5,
    native_symbol: "ETH",
    rpc_url: "https://ethereum-goerli-rpc.publicnode.com",
    explorer_url: "https://goerli.etherscan.io",
};

/// BNB Smart Chain mainnet configuration.
pub const BSC_MAINNET: NetworkConfig = NetworkConfig {
    name: "BNB Smart Chain",
    chain_id: 56,
    native_symbol: "BNB",
    rpc_url: "https://bsc-dataseed.bnbchain.org",
    explorer_url: "https://bscscan.com",
};

/// BNB Smart Chain testnet configuration.
pub const BSC_TESTNET: NetworkConfig = NetworkConfig {
    name: "BNB Smart Chain Testnet",
    chain_id: 97,
    native_symbol: "BNB",
    rpc_url: "https://data-seed-prebsc-1-s1.bnbchain.org:8545",
    explorer_url: "https://testnet.bscscan.com",
};

/// An ERC-20 token the bridge watches.
#[derive(Debug, Clone)]
pub struct Erc20Token {
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u8,
    /// Mainnet contract address (Ethereum or BSC, whichever hosts the token)
    pub mainnet_address: Option<&'static str>,
    /// Testnet contract address
    pub testnet_address: Option<&'static str>,
}

impl Erc20Token {
    /// Contract address for the given chain, if deployed there.
    pub fn address_on(&self, chain_id: u64) -> Option<&'static str> {
        match chain_id {
            ETH_MAINNET_ID | BSC_MAINNET_ID => self.mainnet_address,
            ETH_GOERLI_ID | BSC_TESTNET_ID => self.testnet_address,
            _ => None,
        }
    }
}

const ETH_MAINNET_ID: u64 = 1;
const ETH_GOERLI_ID: u64 = 5;
const BSC_MAINNET_ID: u64 = 56;
const BSC_TESTNET_ID: u64 = 97;

/// The bridged SUPS token (BSC). Mainnet address is deployment-configured.
pub const SUPS_TOKEN: Erc20Token = Erc20Token {
    symbol: "SUPS",
    name: "Supremacy",
    decimals: 18,
    mainnet_address: None,
    testnet_address: Some("0x5e8b6999B44E011F485028bf1AF0aF601F845304"),
};

/// BUSD stablecoin (BSC).
pub const BUSD_TOKEN: Erc20Token = Erc20Token {
    symbol: "BUSD",
    name: "Binance USD",
    decimals: 18,
    mainnet_address: Some("0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56"),
    testnet_address: Some("0xeAf33Ba4AcA3fE3110EAddD7D4cf0897121583D0"),
};

/// USDC stablecoin (Ethereum).
pub const USDC_TOKEN: Erc20Token = Erc20Token {
    symbol: "USDC",
    name: "USD Coin",
    decimals: 6,
    mainnet_address: Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
    testnet_address: Some("0x8BB4eC208CDDE7761ac7f3346deBb9C931f80A33"),
};
