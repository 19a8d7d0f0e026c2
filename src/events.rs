// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbound ledger events.
//!
//! Actors emit events after a state transition instead of performing pub/sub
//! I/O inline; the [`NotificationHub`] fans them out to whatever connection
//! layer is attached (out of scope here, so it logs and re-broadcasts).

use alloy::primitives::U256;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::models::{Transaction, User, UserId};

/// Capacity of the event channel; slow subscribers miss events rather than
/// backpressuring the balance-cache worker.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An event emitted by the ledger core after a state transition.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// A user snapshot was inserted or replaced in the balance cache.
    UserUpdated { user: User },
    /// A user's cached balance changed.
    BalanceChanged { user_id: UserId, balance: U256 },
    /// A ledger row was committed for a non-system party.
    TransactionSettled { user_id: UserId, transaction: Transaction },
}

/// Sending half handed to the actors.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<LedgerEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Emit an event; dropped silently when nobody is subscribed.
    pub fn emit(&self, event: LedgerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan-out task bridging ledger events to the connection layer.
pub struct NotificationHub {
    rx: broadcast::Receiver<LedgerEvent>,
}

impl NotificationHub {
    pub fn new(sink: &EventSink) -> Self {
        Self { rx: sink.subscribe() }
    }

    /// Run until the cancellation token is triggered.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Ok(LedgerEvent::UserUpdated { user }) => {
                        tracing::debug!(user_id = %user.id, "user snapshot updated");
                    }
                    Ok(LedgerEvent::BalanceChanged { user_id, balance }) => {
                        tracing::debug!(user_id = %user_id, balance = %balance, "balance changed");
                    }
                    Ok(LedgerEvent::TransactionSettled { user_id, transaction }) => {
                        tracing::debug!(
                            user_id = %user_id,
                            tx_id = %transaction.id,
                            reference = %transaction.transaction_reference,
                            "transaction settled"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "notification hub lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = shutdown.cancelled() => {
                    tracing::info!("notification hub shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe();

        let user_id = UserId(Uuid::new_v4());
        sink.emit(LedgerEvent::BalanceChanged {
            user_id,
            balance: U256::from(42u64),
        });

        match rx.recv().await.unwrap() {
            LedgerEvent::BalanceChanged { user_id: id, balance } => {
                assert_eq!(id, user_id);
                assert_eq!(balance, U256::from(42u64));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let sink = EventSink::new();
        sink.emit(LedgerEvent::BalanceChanged {
            user_id: UserId(Uuid::new_v4()),
            balance: U256::ZERO,
        });
    }
}
