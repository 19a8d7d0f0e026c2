// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transaction Processor
//!
//! The single serialized writer for the ledger. Requests are processed one
//! at a time, so no two ledger writes can race; this queue is the global
//! serialization point (and throughput ceiling) of the whole system.
//!
//! The processor never touches the balance cache; the cache is a view, the
//! ledger is the authority, and reconciliation between them is the caller's
//! concern (the facade for direct submits, the held-transaction manager for
//! commits).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::models::{NewTransaction, Transaction, TransactionResult};

use super::store::{LedgerStore, StoreError};
use super::LedgerError;

/// Queue depth for the processor; submitters block once this fills.
const PROCESSOR_QUEUE_DEPTH: usize = 512;

/// Handle to the processor worker. Cheap to clone.
#[derive(Clone)]
pub struct TransactionProcessor {
    tx: mpsc::Sender<NewTransaction>,
}

impl TransactionProcessor {
    /// Spawn the worker task over the given store.
    pub fn spawn(store: Arc<LedgerStore>) -> Self {
        let (tx, rx) = mpsc::channel(PROCESSOR_QUEUE_DEPTH);
        tokio::spawn(run_worker(rx, store));
        Self { tx }
    }

    /// Enqueue a request without waiting for the outcome.
    pub async fn submit(&self, request: NewTransaction) -> Result<(), LedgerError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| LedgerError::WorkerStopped)
    }

    /// Enqueue a request and wait for the resulting ledger row.
    ///
    /// A row is returned even when the store recorded it as failed; callers
    /// decide what a failed status means for their flow.
    pub async fn submit_and_wait(
        &self,
        mut request: NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        let (result_tx, result_rx) = oneshot::channel();
        request.result = Some(result_tx);
        self.submit(request).await?;
        result_rx.await.map_err(|_| LedgerError::WorkerStopped)?
    }
}

async fn run_worker(mut rx: mpsc::Receiver<NewTransaction>, store: Arc<LedgerStore>) {
    while let Some(mut request) = rx.recv().await {
        let result_slot = request.result.take();
        let result: TransactionResult = match store.insert_transaction(&request) {
            Ok(tx) => {
                tracing::debug!(
                    tx_id = %tx.id,
                    reference = %tx.transaction_reference,
                    status = ?tx.status,
                    "ledger write"
                );
                Ok(tx)
            }
            Err(StoreError::DuplicateReference(reference)) => {
                // Expected under at-least-once event delivery; the first row won
                tracing::debug!(%reference, "duplicate transaction reference, write skipped");
                Err(LedgerError::DuplicateReference(reference))
            }
            Err(e) => {
                tracing::error!(
                    reference = %request.transaction_reference,
                    error = %e,
                    "ledger write failed"
                );
                Err(LedgerError::Store(e))
            }
        };

        if let Some(slot) = result_slot {
            // A dropped receiver just means the caller stopped waiting
            let _ = slot.send(result);
        }
    }
}
