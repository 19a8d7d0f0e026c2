// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confirmation-depth watcher.
//!
//! One watcher per chain. Each poll it loads every non-finalized
//! [`crate::models::ChainConfirmation`] for its chain, asks the client how
//! deep the transaction is now, and finalizes the row once depth reaches
//! [`CONFIRMATION_DEPTH`]. It talks to the transfer listener only through
//! the store, so either side can restart without losing state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::chain::EvmClient;
use crate::ledger::store::LedgerStore;

use super::BridgeError;

/// Blocks after inclusion before a transfer is considered final.
pub const CONFIRMATION_DEPTH: u64 = 6;

/// Fixed backoff after a failed poll.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

pub struct ConfirmationWatcher {
    client: Arc<EvmClient>,
    store: Arc<LedgerStore>,
    poll_interval: Duration,
}

impl ConfirmationWatcher {
    pub fn new(client: Arc<EvmClient>, store: Arc<LedgerStore>, poll_interval: Duration) -> Self {
        Self {
            client,
            store,
            poll_interval,
        }
    }

    /// Run until cancelled; poll failures back off and the loop resumes.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            chain = %self.client.network().name,
            "confirmation watcher starting"
        );

        loop {
            let delay = match self.poll_step().await {
                Ok(()) => self.poll_interval,
                Err(e) => {
                    tracing::error!(
                        chain = %self.client.network().name,
                        error = %e,
                        "confirmation poll failed, backing off"
                    );
                    RESTART_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("confirmation watcher shutting down");
                    return;
                }
            }
        }
    }

    async fn poll_step(&self) -> Result<(), BridgeError> {
        let chain_id = self.client.network().chain_id;
        let pending = self.store.pending_confirmations(chain_id)?;

        for row in pending {
            let depth = match self.client.confirmations(&row.tx_hash).await? {
                Some(depth) => depth,
                // Receipt not visible yet (or reorged away); try again later
                None => continue,
            };

            let finalize = depth >= CONFIRMATION_DEPTH;
            let updated = self
                .store
                .update_confirmation_depth(&row.tx_hash, depth, finalize)?;

            if finalize {
                tracing::info!(
                    tx_hash = %row.tx_hash,
                    tx_id = %row.tx_id,
                    depth,
                    "chain transfer finalized"
                );
            } else {
                tracing::debug!(
                    tx_hash = %row.tx_hash,
                    depth = updated.confirmation_amount,
                    "confirmation depth updated"
                );
            }
        }

        Ok(())
    }
}
