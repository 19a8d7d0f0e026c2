// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-side EVM client used by the bridge listeners and the confirmation
//! watcher.

use std::str::FromStr;

use alloy::{
    network::Ethereum,
    primitives::{Address, FixedBytes, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::{Filter, Log},
};

use super::erc20::IERC20;
use super::types::NetworkConfig;
use super::ChainError;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: FixedBytes<32> = FixedBytes::new([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

/// HTTP provider type with the default fillers.
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// HTTP RPC client for one chain.
pub struct EvmClient {
    network: NetworkConfig,
    provider: HttpProvider,
}

impl EvmClient {
    /// Connect to the given RPC endpoint.
    pub fn new(network: NetworkConfig, rpc_url: &str) -> Result<Self, ChainError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self { network, provider })
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Current chain head.
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    /// ERC-20 Transfer logs for one contract over a block range.
    pub async fn transfer_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(TRANSFER_TOPIC)
            .from_block(from_block)
            .to_block(to_block);

        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    /// Confirmation depth of a transaction: `None` before a receipt exists.
    pub async fn confirmations(&self, tx_hash: &str) -> Result<Option<u64>, ChainError> {
        let hash: FixedBytes<32> = tx_hash
            .parse()
            .map_err(|_| ChainError::InvalidAddress(format!("invalid tx hash: {tx_hash}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(included_in) = receipt.block_number else {
            return Ok(None);
        };

        let head = self.block_number().await?;
        Ok(Some(head.saturating_sub(included_in) + 1))
    }

    /// Native balance of an address.
    pub async fn native_balance(&self, address: &str) -> Result<U256, ChainError> {
        let addr = Address::from_str(address)
            .map_err(|e| ChainError::InvalidAddress(e.to_string()))?;

        self.provider
            .get_balance(addr)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    /// ERC-20 balance of an address.
    pub async fn erc20_balance(&self, contract: Address, owner: Address) -> Result<U256, ChainError> {
        let token = IERC20::new(contract, self.provider.clone());
        token
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))
    }
}
