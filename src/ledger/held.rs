// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Held-Transaction Manager
//!
//! Tracks in-flight, not-yet-committed transfers keyed by their
//! `transaction_reference`. A hold applies its balance delta to the cache
//! optimistically; commit forwards the underlying request to the transaction
//! processor, release reverses the delta without ever touching the ledger.
//!
//! A single worker owns the map. Invariant: every code path that takes an
//! entry out of the map either commits it or reverses its delta, never both
//! and never neither; entries must not outlive their purchase flow or the
//! cache permanently diverges from the ledger.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::models::{HeldTransaction, NewTransaction, Transaction, TransactionStatus, UserId};

use super::balance_cache::{BalanceCache, HeldDelta};
use super::processor::TransactionProcessor;
use super::LedgerError;

const HELD_QUEUE_DEPTH: usize = 256;

enum HeldRequest {
    Hold {
        txs: Vec<NewTransaction>,
        ack: oneshot::Sender<Result<(), LedgerError>>,
    },
    Commit {
        references: Vec<String>,
        ack: oneshot::Sender<Result<Vec<Transaction>, LedgerError>>,
    },
    Release {
        references: Vec<String>,
        ack: oneshot::Sender<()>,
    },
    DeltasFor {
        user_id: UserId,
        ack: oneshot::Sender<Vec<HeldDelta>>,
    },
}

/// Handle to the held-transaction worker. Cheap to clone.
#[derive(Clone)]
pub struct HeldTransactionManager {
    tx: mpsc::Sender<HeldRequest>,
}

impl HeldTransactionManager {
    pub fn spawn(cache: BalanceCache, processor: TransactionProcessor) -> Self {
        let (tx, rx) = mpsc::channel(HELD_QUEUE_DEPTH);
        tokio::spawn(run_worker(rx, cache, processor));
        Self { tx }
    }

    /// Hold a batch of transfers, applying each delta to the cache.
    ///
    /// The batch aborts at the first transfer whose debit fails; deltas
    /// already applied for earlier items stay applied and stay in the map,
    /// so the caller must treat a failed hold as fatal to the whole batch
    /// and release every reference it passed in.
    pub async fn hold(&self, txs: Vec<NewTransaction>) -> Result<(), LedgerError> {
        let (ack, response) = oneshot::channel();
        self.tx
            .send(HeldRequest::Hold { txs, ack })
            .await
            .map_err(|_| LedgerError::WorkerStopped)?;
        response.await.map_err(|_| LedgerError::WorkerStopped)?
    }

    /// Commit held transfers to the ledger.
    ///
    /// Every reference passed in is removed from the map: committed ones
    /// keep their cache delta, failed ones have it reversed. Returns the
    /// committed rows, or the first failure after all references were dealt
    /// with.
    pub async fn commit(&self, references: Vec<String>) -> Result<Vec<Transaction>, LedgerError> {
        let (ack, response) = oneshot::channel();
        self.tx
            .send(HeldRequest::Commit { references, ack })
            .await
            .map_err(|_| LedgerError::WorkerStopped)?;
        response.await.map_err(|_| LedgerError::WorkerStopped)?
    }

    /// Reverse held transfers without writing to the ledger.
    pub async fn release(&self, references: Vec<String>) -> Result<(), LedgerError> {
        let (ack, response) = oneshot::channel();
        self.tx
            .send(HeldRequest::Release { references, ack })
            .await
            .map_err(|_| LedgerError::WorkerStopped)?;
        response.await.map_err(|_| LedgerError::WorkerStopped)
    }

    /// Net effect of all current holds on one user, for seeding a fresh
    /// cache entry.
    pub async fn deltas_for(&self, user_id: UserId) -> Result<Vec<HeldDelta>, LedgerError> {
        let (ack, response) = oneshot::channel();
        self.tx
            .send(HeldRequest::DeltasFor { user_id, ack })
            .await
            .map_err(|_| LedgerError::WorkerStopped)?;
        response.await.map_err(|_| LedgerError::WorkerStopped)
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<HeldRequest>,
    cache: BalanceCache,
    processor: TransactionProcessor,
) {
    let mut held: HashMap<String, HeldTransaction> = HashMap::new();

    while let Some(request) = rx.recv().await {
        match request {
            HeldRequest::Hold { txs, ack } => {
                let _ = ack.send(hold_batch(&mut held, &cache, txs).await);
            }
            HeldRequest::Commit { references, ack } => {
                let _ = ack.send(commit_refs(&mut held, &cache, &processor, references).await);
            }
            HeldRequest::Release { references, ack } => {
                for reference in references {
                    match held.remove(&reference) {
                        Some(entry) => {
                            reverse_delta(&cache, &entry).await;
                            tracing::debug!(%reference, "hold released");
                        }
                        None => {
                            tracing::debug!(%reference, "release for unknown reference, ignored");
                        }
                    }
                }
                let _ = ack.send(());
            }
            HeldRequest::DeltasFor { user_id, ack } => {
                let mut deltas = Vec::new();
                for entry in held.values() {
                    if entry.from == user_id {
                        deltas.push(HeldDelta {
                            credit: false,
                            amount: entry.amount,
                        });
                    }
                    if entry.to == user_id {
                        deltas.push(HeldDelta {
                            credit: true,
                            amount: entry.amount,
                        });
                    }
                }
                let _ = ack.send(deltas);
            }
        }
    }
}

async fn hold_batch(
    held: &mut HashMap<String, HeldTransaction>,
    cache: &BalanceCache,
    txs: Vec<NewTransaction>,
) -> Result<(), LedgerError> {
    for nt in txs {
        if held.contains_key(&nt.transaction_reference) {
            return Err(LedgerError::DuplicateReference(nt.transaction_reference));
        }

        // Aborts the batch here on failure; earlier items stay held and
        // their deltas stay applied. The caller releases them explicitly.
        cache.remove_funds(nt.from, nt.amount).await?;
        cache.add_funds(nt.to, nt.amount).await?;

        tracing::debug!(
            reference = %nt.transaction_reference,
            from = %nt.from,
            to = %nt.to,
            amount = %nt.amount,
            "funds held"
        );
        held.insert(
            nt.transaction_reference.clone(),
            HeldTransaction {
                to: nt.to,
                from: nt.from,
                amount: nt.amount,
                transaction_reference: nt.transaction_reference,
                description: nt.description,
                group: nt.group,
                held_at: chrono::Utc::now(),
            },
        );
    }
    Ok(())
}

async fn commit_refs(
    held: &mut HashMap<String, HeldTransaction>,
    cache: &BalanceCache,
    processor: &TransactionProcessor,
    references: Vec<String>,
) -> Result<Vec<Transaction>, LedgerError> {
    let mut committed = Vec::new();
    let mut first_error: Option<LedgerError> = None;

    for reference in references {
        let Some(entry) = held.remove(&reference) else {
            tracing::debug!(%reference, "commit for unknown reference, ignored");
            continue;
        };

        match processor.submit_and_wait(entry.to_new_transaction()).await {
            Ok(tx) if tx.status == TransactionStatus::Success => {
                committed.push(tx);
            }
            Ok(tx) => {
                let reason = tx.reason.clone().unwrap_or_else(|| "unknown".to_string());
                tracing::warn!(%reference, %reason, "held commit rejected by ledger, reversing");
                reverse_delta(cache, &entry).await;
                first_error.get_or_insert(LedgerError::TransactionFailed(reason));
            }
            Err(e) => {
                tracing::error!(%reference, error = %e, "held commit failed, reversing");
                reverse_delta(cache, &entry).await;
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(committed),
    }
}

/// Restore the pre-hold cache state for one entry.
async fn reverse_delta(cache: &BalanceCache, entry: &HeldTransaction) {
    if let Err(e) = cache.remove_funds(entry.to, entry.amount).await {
        // The recipient spent the optimistic credit before reversal landed;
        // the cache has diverged and needs operator attention.
        tracing::error!(
            reference = %entry.transaction_reference,
            to = %entry.to,
            amount = %entry.amount,
            error = %e,
            "failed to reverse optimistic credit"
        );
    }
    if let Err(e) = cache.add_funds(entry.from, entry.amount).await {
        tracing::error!(
            reference = %entry.transaction_reference,
            from = %entry.from,
            error = %e,
            "failed to restore sender balance"
        );
    }
}
