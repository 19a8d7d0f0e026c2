// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # SUPS Ledger Core
//!
//! The ledger subsystem is three single-owner workers plus a durable store:
//!
//! - [`store::LedgerStore`]: append-only transaction ledger (redb), the
//!   authority for balances.
//! - [`processor::TransactionProcessor`]: the single serialized ledger
//!   writer.
//! - [`balance_cache::BalanceCache`]: in-memory balance view for connected
//!   users.
//! - [`held::HeldTransactionManager`]: optimistic hold/commit/release
//!   protocol bridging the two.
//!
//! [`Ledger`] wires them together once at startup; collaborators receive
//! cloned handles, never globals.

pub mod balance_cache;
pub mod held;
pub mod processor;
pub mod store;

use std::sync::Arc;

use alloy::primitives::U256;

use crate::events::{EventSink, LedgerEvent};
use crate::models::{NewTransaction, Transaction, TransactionStatus, User, UserId};

use balance_cache::BalanceCache;
use held::HeldTransactionManager;
use processor::TransactionProcessor;
use store::{LedgerStore, StoreError};

/// Errors surfaced by the ledger core.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Cache-level rejection; recoverable by the user.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The hot wallet cannot cover the requested withdrawal.
    #[error("insufficient withdrawal liquidity, try again later")]
    InsufficientLiquidity,

    /// The hot wallet cannot pay for gas.
    #[error("insufficient gas in hot wallet, try again later")]
    InsufficientGas,

    #[error("user not found")]
    UserNotFound,

    /// The ledger recorded the write with a failed status.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// On-chain send error; triggers a refund when funds were already debited.
    #[error("chain submission failed: {0}")]
    ChainSubmissionFailed(String),

    /// Confirmation bookkeeping failed; triggers a compensating reversal.
    #[error("failed to record chain confirmation: {0}")]
    ConfirmationRecordFailed(String),

    /// The reference was already settled; the original row stands.
    #[error("duplicate transaction reference: {0}")]
    DuplicateReference(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A worker's channel closed; only happens during shutdown.
    #[error("ledger worker stopped")]
    WorkerStopped,
}

/// Handles to the ledger core, constructed once at startup. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<LedgerStore>,
    cache: BalanceCache,
    held: HeldTransactionManager,
    processor: TransactionProcessor,
    events: EventSink,
}

impl Ledger {
    /// Spawn the worker set over the given store.
    pub fn new(store: Arc<LedgerStore>, events: EventSink) -> Self {
        let cache = BalanceCache::spawn(events.clone());
        let processor = TransactionProcessor::spawn(store.clone());
        let held = HeldTransactionManager::spawn(cache.clone(), processor.clone());
        Self {
            store,
            cache,
            held,
            processor,
            events,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Write a transfer to the ledger and reconcile the cache view.
    ///
    /// Returns the settled row; callers inspect `status` for flows where a
    /// failed write is not exceptional. The cache is only adjusted on
    /// success, and a cache that cannot absorb the debit (stale or missing
    /// entry) is logged, not fatal: the ledger is the authority.
    pub async fn submit_transaction(
        &self,
        request: NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        let tx = self.processor.submit_and_wait(request).await?;

        if tx.status == TransactionStatus::Success {
            if let Err(e) = self.cache.remove_funds(tx.debit, tx.amount).await {
                // System accounts rarely have a cache entry; that miss is routine
                if tx.debit.is_system() {
                    tracing::debug!(user_id = %tx.debit, tx_id = %tx.id, "system debit not cached");
                } else {
                    tracing::warn!(
                        user_id = %tx.debit,
                        tx_id = %tx.id,
                        error = %e,
                        "cache debit not reconciled after ledger write"
                    );
                }
            }
            self.cache.add_funds(tx.credit, tx.amount).await?;

            for party in [tx.debit, tx.credit] {
                if !party.is_system() {
                    self.events.emit(LedgerEvent::TransactionSettled {
                        user_id: party,
                        transaction: tx.clone(),
                    });
                }
            }
        }

        Ok(tx)
    }

    /// Reserve funds for a multi-step flow. See [`HeldTransactionManager::hold`].
    pub async fn hold_funds(&self, txs: Vec<NewTransaction>) -> Result<(), LedgerError> {
        self.held.hold(txs).await
    }

    /// Commit held funds to the ledger. See [`HeldTransactionManager::commit`].
    pub async fn commit_funds(
        &self,
        references: Vec<String>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.held.commit(references).await
    }

    /// Release held funds without a ledger write.
    pub async fn release_funds(&self, references: Vec<String>) -> Result<(), LedgerError> {
        self.held.release(references).await
    }

    /// Spendable balance: the cached view when present, otherwise the
    /// settled ledger balance.
    pub async fn cached_balance(&self, user_id: UserId) -> Result<U256, LedgerError> {
        if let Some(balance) = self.cache.balance(user_id).await? {
            return Ok(balance);
        }
        Ok(self.store.balance(user_id)?.spendable())
    }

    /// Connection-layer hook: seed the cache from the ledger on login.
    pub async fn on_user_authenticated(&self, user: User) -> Result<(), LedgerError> {
        let balance = self.store.balance(user.id)?.spendable();
        self.cache.insert(user, balance).await
    }

    /// Connection-layer hook: evict the cache entry on logout.
    pub async fn on_user_disconnected(&self, user_id: UserId) -> Result<(), LedgerError> {
        self.cache.remove(user_id).await
    }

    /// Make sure a user is cached without clobbering a live entry, replaying
    /// any in-flight holds over the stored balance. Used by the bridge when
    /// crediting users who may not be connected.
    pub async fn ensure_cached(&self, user: User) -> Result<(), LedgerError> {
        let deltas = self.held.deltas_for(user.id).await?;
        let balance = self.store.balance(user.id)?.spendable();
        self.cache.update_if_absent(user, balance, deltas).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{one_sup, TREASURY_USER_ID};
    use uuid::Uuid;

    fn sups(n: u64) -> U256 {
        one_sup() * U256::from(n)
    }

    fn test_ledger() -> (Ledger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LedgerStore::open(&dir.path().join("ledger.redb")).unwrap());
        (Ledger::new(store, EventSink::new()), dir)
    }

    fn test_user() -> User {
        let id = UserId(Uuid::new_v4());
        User {
            id,
            username: id.to_string(),
            public_address: None,
            role: crate::models::UserRole::Member,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn submit_reconciles_cache_for_connected_users() {
        let (ledger, _dir) = test_ledger();
        let user = test_user();
        let id = user.id;

        ledger.on_user_authenticated(user).await.unwrap();
        assert_eq!(ledger.cached_balance(id).await.unwrap(), U256::ZERO);

        let nt = NewTransaction::new(id, TREASURY_USER_ID, sups(25), "payout-1", "payout");
        let tx = ledger.submit_transaction(nt).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(ledger.cached_balance(id).await.unwrap(), sups(25));
    }

    #[tokio::test]
    async fn cached_balance_falls_back_to_ledger_when_not_connected() {
        let (ledger, _dir) = test_ledger();
        let id = UserId(Uuid::new_v4());

        let nt = NewTransaction::new(id, TREASURY_USER_ID, sups(7), "payout-2", "payout");
        ledger.submit_transaction(nt).await.unwrap();

        // Never authenticated: add_funds created an implicit cache entry,
        // but even after eviction the stored balance answers
        ledger.on_user_disconnected(id).await.unwrap();
        assert_eq!(ledger.cached_balance(id).await.unwrap(), sups(7));
    }

    #[tokio::test]
    async fn authentication_seeds_cache_from_ledger() {
        let (ledger, _dir) = test_ledger();
        let user = test_user();
        let id = user.id;

        let nt = NewTransaction::new(id, TREASURY_USER_ID, sups(12), "payout-3", "payout");
        ledger.submit_transaction(nt).await.unwrap();
        ledger.on_user_disconnected(id).await.unwrap();

        ledger.on_user_authenticated(user).await.unwrap();
        assert_eq!(ledger.cached_balance(id).await.unwrap(), sups(12));
    }

    #[tokio::test]
    async fn failed_submit_leaves_cache_untouched() {
        let (ledger, _dir) = test_ledger();
        let user = test_user();
        let id = user.id;
        ledger.on_user_authenticated(user).await.unwrap();

        let nt = NewTransaction::new(TREASURY_USER_ID, id, sups(5), "spend-1", "no funds");
        let tx = ledger.submit_transaction(nt).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(ledger.cached_balance(id).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn ensure_cached_replays_holds() {
        let (ledger, _dir) = test_ledger();
        let user = test_user();
        let id = user.id;

        // Fund on the ledger and in the cache, hold part of it, then evict
        ledger.on_user_authenticated(user.clone()).await.unwrap();
        let nt = NewTransaction::new(id, TREASURY_USER_ID, sups(100), "payout-4", "payout");
        ledger.submit_transaction(nt).await.unwrap();

        let hold = NewTransaction::new(TREASURY_USER_ID, id, sups(40), "hold-1", "purchase");
        ledger.hold_funds(vec![hold]).await.unwrap();
        ledger.on_user_disconnected(id).await.unwrap();

        // Fresh entry must already reflect the in-flight hold
        ledger.ensure_cached(user).await.unwrap();
        assert_eq!(ledger.cached_balance(id).await.unwrap(), sups(60));

        ledger.release_funds(vec!["hold-1".to_string()]).await.unwrap();
        assert_eq!(ledger.cached_balance(id).await.unwrap(), sups(100));
    }
}
