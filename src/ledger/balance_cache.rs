// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Balance Cache
//!
//! In-memory view of every connected user's spendable SUPS balance.
//!
//! A single worker task owns the `UserId → UserCacheEntry` map and processes
//! one request at a time from an mpsc queue; callers block on a oneshot
//! acknowledgement, giving synchronous semantics without a lock. The map is
//! never touched from any other task.
//!
//! The worker does no I/O. After a state transition it emits a
//! [`LedgerEvent`] on the broadcast sink; system accounts (treasury,
//! on-chain, sale) never have their balances broadcast.

use std::collections::HashMap;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::events::{EventSink, LedgerEvent};
use crate::models::{User, UserId};

use super::LedgerError;

/// Queue depth for the cache worker; callers block once this fills.
const CACHE_QUEUE_DEPTH: usize = 256;

/// A user snapshot plus cached balance, owned exclusively by the worker.
#[derive(Debug, Clone)]
pub struct UserCacheEntry {
    /// Profile snapshot; `None` when the entry was created implicitly by a
    /// funds movement before the user connected.
    pub user: Option<User>,
    pub balance: U256,
    pub last_updated: DateTime<Utc>,
}

/// An uncommitted hold's effect on one user, replayed into a freshly-loaded
/// cache entry so it already reflects in-flight holds.
#[derive(Debug, Clone, Copy)]
pub struct HeldDelta {
    /// True when the hold credits this user, false when it debits them.
    pub credit: bool,
    pub amount: U256,
}

enum CacheRequest {
    Insert {
        user: User,
        balance: U256,
        ack: oneshot::Sender<()>,
    },
    UpdateIfAbsent {
        user: User,
        balance: U256,
        held_deltas: Vec<HeldDelta>,
        ack: oneshot::Sender<()>,
    },
    AddFunds {
        user_id: UserId,
        amount: U256,
        ack: oneshot::Sender<()>,
    },
    RemoveFunds {
        user_id: UserId,
        amount: U256,
        ack: oneshot::Sender<Result<U256, LedgerError>>,
    },
    Remove {
        user_id: UserId,
        ack: oneshot::Sender<()>,
    },
    Balance {
        user_id: UserId,
        ack: oneshot::Sender<Option<U256>>,
    },
}

/// Handle to the balance-cache worker. Cheap to clone.
#[derive(Clone)]
pub struct BalanceCache {
    tx: mpsc::Sender<CacheRequest>,
}

impl BalanceCache {
    /// Spawn the worker task and return a handle to it.
    pub fn spawn(events: EventSink) -> Self {
        let (tx, rx) = mpsc::channel(CACHE_QUEUE_DEPTH);
        tokio::spawn(run_worker(rx, events));
        Self { tx }
    }

    /// Add or replace the cache entry for a user.
    pub async fn insert(&self, user: User, balance: U256) -> Result<(), LedgerError> {
        self.request(|ack| CacheRequest::Insert { user, balance, ack })
            .await
    }

    /// Insert only if not already cached, replaying the supplied held deltas
    /// over the seed balance.
    pub async fn update_if_absent(
        &self,
        user: User,
        balance: U256,
        held_deltas: Vec<HeldDelta>,
    ) -> Result<(), LedgerError> {
        self.request(|ack| CacheRequest::UpdateIfAbsent {
            user,
            balance,
            held_deltas,
            ack,
        })
        .await
    }

    /// Increase a cached balance.
    pub async fn add_funds(&self, user_id: UserId, amount: U256) -> Result<(), LedgerError> {
        self.request(|ack| CacheRequest::AddFunds {
            user_id,
            amount,
            ack,
        })
        .await
    }

    /// Decrease a cached balance. Fails with [`LedgerError::InsufficientFunds`]
    /// and leaves the balance unchanged when the amount exceeds it.
    pub async fn remove_funds(&self, user_id: UserId, amount: U256) -> Result<U256, LedgerError> {
        self.request(|ack| CacheRequest::RemoveFunds {
            user_id,
            amount,
            ack,
        })
        .await?
    }

    /// Evict a user's entry (on disconnect).
    pub async fn remove(&self, user_id: UserId) -> Result<(), LedgerError> {
        self.request(|ack| CacheRequest::Remove { user_id, ack })
            .await
    }

    /// Read the cached balance, if the user is cached.
    pub async fn balance(&self, user_id: UserId) -> Result<Option<U256>, LedgerError> {
        self.request(|ack| CacheRequest::Balance { user_id, ack })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CacheRequest,
    ) -> Result<T, LedgerError> {
        let (ack, response) = oneshot::channel();
        self.tx
            .send(build(ack))
            .await
            .map_err(|_| LedgerError::WorkerStopped)?;
        response.await.map_err(|_| LedgerError::WorkerStopped)
    }
}

async fn run_worker(mut rx: mpsc::Receiver<CacheRequest>, events: EventSink) {
    let mut cache: HashMap<UserId, UserCacheEntry> = HashMap::new();

    while let Some(request) = rx.recv().await {
        match request {
            CacheRequest::Insert { user, balance, ack } => {
                let user_id = user.id;
                cache.insert(
                    user_id,
                    UserCacheEntry {
                        user: Some(user.clone()),
                        balance,
                        last_updated: Utc::now(),
                    },
                );
                if !user_id.is_system() {
                    events.emit(LedgerEvent::UserUpdated { user });
                    events.emit(LedgerEvent::BalanceChanged { user_id, balance });
                }
                let _ = ack.send(());
            }
            CacheRequest::UpdateIfAbsent {
                user,
                balance,
                held_deltas,
                ack,
            } => {
                if !cache.contains_key(&user.id) {
                    let user_id = user.id;
                    let balance = apply_deltas(user_id, balance, &held_deltas);
                    cache.insert(
                        user_id,
                        UserCacheEntry {
                            user: Some(user.clone()),
                            balance,
                            last_updated: Utc::now(),
                        },
                    );
                    if !user_id.is_system() {
                        events.emit(LedgerEvent::UserUpdated { user });
                        events.emit(LedgerEvent::BalanceChanged { user_id, balance });
                    }
                }
                let _ = ack.send(());
            }
            CacheRequest::AddFunds {
                user_id,
                amount,
                ack,
            } => {
                let entry = cache.entry(user_id).or_insert_with(|| UserCacheEntry {
                    user: None,
                    balance: U256::ZERO,
                    last_updated: Utc::now(),
                });
                entry.balance += amount;
                entry.last_updated = Utc::now();
                let balance = entry.balance;
                if !user_id.is_system() {
                    events.emit(LedgerEvent::BalanceChanged { user_id, balance });
                }
                let _ = ack.send(());
            }
            CacheRequest::RemoveFunds {
                user_id,
                amount,
                ack,
            } => {
                let result = match cache.get_mut(&user_id) {
                    Some(entry) if entry.balance >= amount => {
                        entry.balance -= amount;
                        entry.last_updated = Utc::now();
                        Ok(entry.balance)
                    }
                    Some(_) => Err(LedgerError::InsufficientFunds),
                    None => Err(LedgerError::InsufficientFunds),
                };
                if let Ok(balance) = result {
                    if !user_id.is_system() {
                        events.emit(LedgerEvent::BalanceChanged { user_id, balance });
                    }
                }
                let _ = ack.send(result);
            }
            CacheRequest::Remove { user_id, ack } => {
                cache.remove(&user_id);
                let _ = ack.send(());
            }
            CacheRequest::Balance { user_id, ack } => {
                let _ = ack.send(cache.get(&user_id).map(|e| e.balance));
            }
        }
    }
}

fn apply_deltas(user_id: UserId, seed: U256, deltas: &[HeldDelta]) -> U256 {
    let mut balance = seed;
    for delta in deltas {
        if delta.credit {
            balance += delta.amount;
        } else if balance >= delta.amount {
            balance -= delta.amount;
        } else {
            // A hold larger than the stored balance means the hold was taken
            // against a stale view; clamp rather than underflow.
            tracing::warn!(
                user_id = %user_id,
                balance = %balance,
                delta = %delta.amount,
                "held delta exceeds stored balance while seeding cache entry"
            );
            balance = U256::ZERO;
        }
    }
    balance
}
