// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Blockchain Bridge
//!
//! One [`BridgeListener`] per (chain, asset) polls ERC-20 Transfer events
//! and translates them into ledger transactions, with the on-chain tx hash
//! as the transaction reference so replayed events can never double-credit.
//! A [`confirmer::ConfirmationWatcher`] per chain tracks confirmation depth
//! for the recorded transfers; the two communicate only through the store.
//!
//! Listener loops are restart-on-error: any RPC failure logs, sleeps a
//! fixed backoff and resumes. They are never fatal to the process.

pub mod confirmer;
pub mod oracle;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainError, Erc20Token, EvmClient};
use crate::ledger::store::StoreError;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{
    ChainConfirmation, NewTransaction, TransactionGroup, TransactionStatus, ON_CHAIN_USER_ID,
    SALE_USER_ID,
};

use oracle::{OracleError, PriceOracle};

/// Fixed backoff after a failed poll.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Block chunk per `eth_getLogs` query.
const LOG_CHUNK_SIZE: u64 = 2000;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// How an observed transfer maps onto the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// External asset sent to the purchase address: sell SUPS for it.
    Purchase,
    /// Bridged SUPS sent to the purchase address: credit 1:1.
    Deposit,
    /// External asset paid out from the redemption address: debit SUPS.
    Redemption,
    /// SUPS leaving the hot wallet: a withdrawal landing on chain.
    WithdrawalSettlement,
}

/// Well-known addresses one listener classifies against.
#[derive(Debug, Clone)]
pub struct BridgeAddresses {
    pub purchase: Address,
    pub redemption: Address,
    pub hot_wallet: Address,
}

/// Watches one token contract on one chain and feeds the ledger.
pub struct BridgeListener {
    client: Arc<EvmClient>,
    ledger: Ledger,
    oracle: PriceOracle,
    token: Erc20Token,
    contract: Address,
    addresses: BridgeAddresses,
    poll_interval: Duration,
}

impl BridgeListener {
    pub fn new(
        client: Arc<EvmClient>,
        ledger: Ledger,
        oracle: PriceOracle,
        token: Erc20Token,
        contract: Address,
        addresses: BridgeAddresses,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            ledger,
            oracle,
            token,
            contract,
            addresses,
            poll_interval,
        }
    }

    /// Run until cancelled. Never returns an error; failures back off and
    /// the loop resumes.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            chain = %self.client.network().name,
            token = %self.token.symbol,
            contract = %self.contract,
            "bridge listener starting"
        );

        let mut last_block: Option<u64> = None;
        loop {
            if shutdown.is_cancelled() {
                tracing::info!(token = %self.token.symbol, "bridge listener shutting down");
                return;
            }

            let delay = match self.poll_step(&mut last_block).await {
                Ok(()) => self.poll_interval,
                Err(e) => {
                    tracing::error!(
                        chain = %self.client.network().name,
                        token = %self.token.symbol,
                        error = %e,
                        "bridge poll failed, backing off"
                    );
                    RESTART_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!(token = %self.token.symbol, "bridge listener shutting down");
                    return;
                }
            }
        }
    }

    /// One poll: scan at most one chunk of new blocks for transfers.
    async fn poll_step(&self, last_block: &mut Option<u64>) -> Result<(), BridgeError> {
        let head = self.client.block_number().await?;

        let start = match *last_block {
            // First poll: start at the head, history is not replayed
            None => {
                *last_block = Some(head);
                return Ok(());
            }
            Some(last) if last >= head => return Ok(()),
            Some(last) => last + 1,
        };
        let end = head.min(start + LOG_CHUNK_SIZE - 1);

        let logs = self.client.transfer_logs(self.contract, start, end).await?;
        for log in &logs {
            if let Err(e) = self.handle_transfer(log).await {
                tracing::error!(
                    token = %self.token.symbol,
                    tx_hash = ?log.transaction_hash,
                    error = %e,
                    "failed to ingest transfer"
                );
            }
        }

        *last_block = Some(end);
        Ok(())
    }

    fn classify(&self, from: Address, to: Address) -> Option<TransferKind> {
        let is_sups = self.token.symbol == "SUPS";
        if to == self.addresses.purchase {
            return Some(if is_sups {
                TransferKind::Deposit
            } else {
                TransferKind::Purchase
            });
        }
        if is_sups && from == self.addresses.hot_wallet {
            return Some(TransferKind::WithdrawalSettlement);
        }
        if !is_sups && from == self.addresses.redemption {
            return Some(TransferKind::Redemption);
        }
        None
    }

    async fn handle_transfer(&self, log: &Log) -> Result<(), BridgeError> {
        // Transfer has 3 topics: [event_sig, from, to]; data = value
        if log.topics().len() < 3 {
            return Ok(());
        }
        let from = Address::from_slice(&log.topics()[1][12..]);
        let to = Address::from_slice(&log.topics()[2][12..]);
        let value = if log.data().data.len() >= 32 {
            U256::from_be_slice(&log.data().data[..32])
        } else {
            U256::ZERO
        };

        let Some(tx_hash) = log.transaction_hash.map(|h| format!("{h:#x}")) else {
            return Ok(());
        };
        let block = log.block_number.unwrap_or_default();

        let Some(kind) = self.classify(from, to) else {
            return Ok(());
        };
        if value.is_zero() {
            return Ok(());
        }

        if kind == TransferKind::WithdrawalSettlement {
            // The ledger debit already happened when the withdrawal was
            // initiated; just tie the hash back to a signed-withdrawal row
            // if the client never reported it.
            match self
                .ledger
                .store()
                .fill_refund_tx_hash_by_amount(value, &tx_hash)
            {
                Ok(Some(refund)) => tracing::info!(
                    tx_hash = %tx_hash,
                    refund_id = %refund.id,
                    amount = %value,
                    "signed withdrawal settled on chain"
                ),
                Ok(None) => tracing::info!(
                    tx_hash = %tx_hash,
                    to = %to,
                    amount = %value,
                    "withdrawal settled on chain"
                ),
                Err(e) => tracing::warn!(
                    tx_hash = %tx_hash,
                    error = %e,
                    "failed to match settlement to a pending refund"
                ),
            }
            return Ok(());
        }

        // The counterparty wallet identifies the user; provision on first sight
        let user_address = match kind {
            TransferKind::Redemption => format!("{to:#x}"),
            _ => format!("{from:#x}"),
        };
        let user = self.ledger.store().resolve_or_provision_user(&user_address)?;
        self.ledger.ensure_cached(user.clone()).await?;

        let request = match kind {
            TransferKind::Purchase => {
                let sups = self
                    .oracle
                    .token_to_sups(self.token.symbol, value, self.token.decimals)?;
                NewTransaction::new(
                    user.id,
                    SALE_USER_ID,
                    sups,
                    tx_hash.clone(),
                    format!("purchase of SUPS with {}", self.token.symbol),
                )
                .with_group(TransactionGroup::Store)
            }
            TransferKind::Deposit => NewTransaction::new(
                user.id,
                ON_CHAIN_USER_ID,
                value,
                tx_hash.clone(),
                "SUPS deposit from chain",
            )
            .with_group(TransactionGroup::Deposit),
            TransferKind::Redemption => {
                let sups = self
                    .oracle
                    .token_to_sups(self.token.symbol, value, self.token.decimals)?;
                NewTransaction::new(
                    ON_CHAIN_USER_ID,
                    user.id,
                    sups,
                    tx_hash.clone(),
                    format!("redemption of SUPS for {}", self.token.symbol),
                )
                .with_group(TransactionGroup::AssetManagement)
            }
            TransferKind::WithdrawalSettlement => unreachable!(),
        };

        let amount = request.amount;
        let (credit, debit) = (request.to, request.from);

        let tx = match self.ledger.submit_transaction(request).await {
            Ok(tx) => tx,
            Err(LedgerError::DuplicateReference(_)) => {
                // Re-observed event; the first ingestion won
                tracing::debug!(tx_hash = %tx_hash, "transfer already ingested");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if tx.status != TransactionStatus::Success {
            tracing::warn!(
                tx_hash = %tx_hash,
                reason = tx.reason.as_deref().unwrap_or("unknown"),
                "bridge transaction recorded as failed"
            );
            return Ok(());
        }

        tracing::info!(
            kind = ?kind,
            tx_hash = %tx_hash,
            user_id = %user.id,
            amount = %amount,
            "on-chain transfer settled to ledger"
        );

        let confirmation = ChainConfirmation {
            tx_hash: tx_hash.clone(),
            tx_id: tx.id.clone(),
            block,
            chain_id: self.client.network().chain_id,
            confirmation_amount: 0,
            confirmed_at: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.ledger.store().insert_confirmation(&confirmation) {
            // The ledger row exists but confirmation tracking does not: back
            // the credit out so the two ledgers cannot silently diverge.
            tracing::error!(
                tx_hash = %tx_hash,
                tx_id = %tx.id,
                error = %e,
                "failed to record chain confirmation, reversing ledger credit"
            );
            let reversal = NewTransaction::new(
                debit,
                credit,
                amount,
                format!("{tx_hash}|reversal"),
                "FAILED TO INSERT CHAIN CONFIRM ENTRY",
            );
            let reversed = self.ledger.submit_transaction(reversal).await?;
            tracing::error!(
                original_reference = %tx_hash,
                reversal_reference = %reversed.transaction_reference,
                "compensating reversal issued"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::TRANSFER_TOPIC;
    use crate::chain::{EvmClient, BSC_TESTNET, BUSD_TOKEN, SUPS_TOKEN};
    use crate::events::EventSink;
    use crate::ledger::store::LedgerStore;
    use crate::models::one_sup;
    use alloy::primitives::{B256, LogData};
    use oracle::DEFAULT_SUPS_USD_MILLI;

    fn addr(n: u8) -> Address {
        Address::from_slice(&[n; 20])
    }

    struct Fixture {
        listener: BridgeListener,
        ledger: Ledger,
        _dir: tempfile::TempDir,
    }

    fn fixture(token: Erc20Token) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LedgerStore::open(&dir.path().join("ledger.redb")).unwrap());
        let ledger = Ledger::new(store, EventSink::new());
        let client = Arc::new(EvmClient::new(BSC_TESTNET, BSC_TESTNET.rpc_url).unwrap());
        let listener = BridgeListener::new(
            client,
            ledger.clone(),
            PriceOracle::new(DEFAULT_SUPS_USD_MILLI),
            token,
            addr(9),
            BridgeAddresses {
                purchase: addr(1),
                redemption: addr(2),
                hot_wallet: addr(3),
            },
            Duration::from_secs(5),
        );
        Fixture {
            listener,
            ledger,
            _dir: dir,
        }
    }

    /// An ERC-20 Transfer log as the node would deliver it.
    fn transfer_log(from: Address, to: Address, value: U256, tx_hash: B256) -> Log {
        let topics = vec![TRANSFER_TOPIC, from.into_word(), to.into_word()];
        let data = LogData::new_unchecked(topics, value.to_be_bytes::<32>().to_vec().into());
        Log {
            inner: alloy::primitives::Log {
                address: addr(9),
                data,
            },
            block_number: Some(1_000),
            transaction_hash: Some(tx_hash),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn classification_matches_addresses() {
        let busd = fixture(BUSD_TOKEN).listener;
        assert_eq!(
            busd.classify(addr(7), addr(1)),
            Some(TransferKind::Purchase)
        );
        assert_eq!(
            busd.classify(addr(2), addr(7)),
            Some(TransferKind::Redemption)
        );
        assert_eq!(busd.classify(addr(7), addr(8)), None);

        let sups = fixture(SUPS_TOKEN).listener;
        assert_eq!(sups.classify(addr(7), addr(1)), Some(TransferKind::Deposit));
        assert_eq!(
            sups.classify(addr(3), addr(7)),
            Some(TransferKind::WithdrawalSettlement)
        );
        // SUPS leaving a random wallet is not ours to settle
        assert_eq!(sups.classify(addr(7), addr(8)), None);
    }

    #[tokio::test]
    async fn replayed_transfer_credits_exactly_once() {
        let f = fixture(SUPS_TOKEN);
        let value = one_sup() * U256::from(25u64);
        let hash = B256::repeat_byte(0x11);
        let log = transfer_log(addr(7), addr(1), value, hash);

        // At-least-once delivery: the same event arrives twice
        f.listener.handle_transfer(&log).await.unwrap();
        f.listener.handle_transfer(&log).await.unwrap();

        let user = f
            .ledger
            .store()
            .user_by_address(&format!("{:#x}", addr(7)))
            .unwrap()
            .unwrap();
        assert_eq!(f.ledger.store().balance(user.id).unwrap().spendable(), value);
        assert_eq!(f.ledger.cached_balance(user.id).await.unwrap(), value);

        let tx_hash = format!("{hash:#x}");
        let row = f
            .ledger
            .store()
            .transaction_by_reference(&tx_hash)
            .unwrap()
            .unwrap();
        assert_eq!(row.credit, user.id);
        assert_eq!(row.debit, ON_CHAIN_USER_ID);
        assert_eq!(row.amount, value);

        let confirmation = f.ledger.store().confirmation(&tx_hash).unwrap().unwrap();
        assert_eq!(confirmation.tx_id, row.id);
        assert!(!confirmation.is_finalized());
    }

    #[tokio::test]
    async fn failed_confirmation_insert_reverses_the_credit() {
        let f = fixture(SUPS_TOKEN);
        let value = one_sup() * U256::from(40u64);
        let hash = B256::repeat_byte(0x22);
        let tx_hash = format!("{hash:#x}");

        // Occupy the confirmation slot so the insert after the credit fails
        f.ledger
            .store()
            .insert_confirmation(&ChainConfirmation {
                tx_hash: tx_hash.clone(),
                tx_id: "occupied".to_string(),
                block: 1,
                chain_id: BSC_TESTNET.chain_id,
                confirmation_amount: 0,
                confirmed_at: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let log = transfer_log(addr(7), addr(1), value, hash);
        f.listener.handle_transfer(&log).await.unwrap();

        let reversal = f
            .ledger
            .store()
            .transaction_by_reference(&format!("{tx_hash}|reversal"))
            .unwrap()
            .unwrap();
        assert_eq!(reversal.description, "FAILED TO INSERT CHAIN CONFIRM ENTRY");
        assert_eq!(reversal.status, TransactionStatus::Success);
        assert_eq!(reversal.amount, value);

        // Credit then reversal: the user nets zero everywhere
        let user = f
            .ledger
            .store()
            .user_by_address(&format!("{:#x}", addr(7)))
            .unwrap()
            .unwrap();
        assert_eq!(reversal.debit, user.id);
        assert_eq!(
            f.ledger.store().balance(user.id).unwrap().spendable(),
            U256::ZERO
        );
        assert_eq!(f.ledger.cached_balance(user.id).await.unwrap(), U256::ZERO);
    }
}
