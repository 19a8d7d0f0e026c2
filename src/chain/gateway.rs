// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hot-wallet gateway: the withdrawal orchestrator's view of the custody
//! wallet on one chain.
//!
//! On-chain submissions are serialized behind a mutex so only one transfer
//! is outstanding at a time; nonce sequencing per chain depends on this.

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, U256},
    providers::{
        fillers::{
            BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
            WalletFiller,
        },
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
};
use tokio::sync::Mutex;

use super::erc20::IERC20;
use super::types::NetworkConfig;
use super::ChainError;

/// Gas units held in reserve: one ERC-20 transfer plus headroom.
const GAS_RESERVE_UNITS: u64 = 100_000;

/// What the withdrawal flow needs from the hot wallet. Implemented over
/// alloy in production and faked in tests.
#[allow(async_fn_in_trait)]
pub trait HotWalletGateway {
    /// SUPS token balance held by the hot wallet.
    async fn sups_balance(&self) -> Result<U256, ChainError>;

    /// Whether the wallet's native balance covers gas for one transfer.
    async fn gas_funds_ok(&self) -> Result<bool, ChainError>;

    /// Submit a SUPS transfer to the recipient; returns the tx hash.
    async fn transfer_sups(&self, to: Address, amount: U256) -> Result<String, ChainError>;

    /// Receipt status: `None` while unmined, `Some(success)` once mined.
    async fn transfer_status(&self, tx_hash: &str) -> Result<Option<bool>, ChainError>;
}

/// Signing HTTP provider type (default fillers plus the wallet filler).
type WalletProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Ethereum>,
>;

/// Production hot wallet over an alloy signing provider.
pub struct AlloyHotWallet {
    network: NetworkConfig,
    provider: WalletProvider,
    wallet_address: Address,
    sups_contract: Address,
    submit_lock: Mutex<()>,
}

impl AlloyHotWallet {
    pub fn new(
        network: NetworkConfig,
        rpc_url: &str,
        sups_contract: Address,
        private_key_hex: &str,
    ) -> Result<Self, ChainError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::InvalidRpcUrl(e.to_string()))?;

        let key_bytes = alloy::hex::decode(private_key_hex.trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?;
        let signer = PrivateKeySigner::from_slice(&key_bytes)
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?;
        let wallet_address = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url);

        Ok(Self {
            network,
            provider,
            wallet_address,
            sups_contract,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> Address {
        self.wallet_address
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }
}

impl HotWalletGateway for AlloyHotWallet {
    async fn sups_balance(&self) -> Result<U256, ChainError> {
        let token = IERC20::new(self.sups_contract, self.provider.clone());
        token
            .balanceOf(self.wallet_address)
            .call()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))
    }

    async fn gas_funds_ok(&self) -> Result<bool, ChainError> {
        let balance = self
            .provider
            .get_balance(self.wallet_address)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(balance >= U256::from(gas_price) * U256::from(GAS_RESERVE_UNITS))
    }

    async fn transfer_sups(&self, to: Address, amount: U256) -> Result<String, ChainError> {
        // One outstanding submission per chain, or nonces collide
        let _guard = self.submit_lock.lock().await;

        let call = IERC20::transferCall { to, amount };
        let tx = TransactionRequest::default()
            .to(self.sups_contract)
            .input(call.abi_encode().into());

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainError::SubmissionFailed(e.to_string()))?;

        let tx_hash = format!("{:?}", pending.tx_hash());
        tracing::info!(
            chain = %self.network.name,
            to = %to,
            amount = %amount,
            tx_hash = %tx_hash,
            "hot wallet transfer submitted"
        );
        Ok(tx_hash)
    }

    async fn transfer_status(&self, tx_hash: &str) -> Result<Option<bool>, ChainError> {
        let hash = tx_hash
            .parse()
            .map_err(|_| ChainError::InvalidAddress(format!("invalid tx hash: {tx_hash}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(receipt.map(|r| r.status()))
    }
}
