// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `transactions`: tx_id → serialized Transaction
//! - `tx_refs`: transaction_reference → tx_id (uniqueness index)
//! - `balances`: user_id → signed decimal balance string
//! - `users`: user_id → serialized User
//! - `user_addrs`: lowercase public address → user_id
//! - `chain_confirmations`: on-chain tx hash → serialized ChainConfirmation
//! - `pending_refunds`: refund id → serialized PendingRefund
//!
//! Every ledger write is a single redb write transaction: the row insert,
//! the reference-uniqueness check and the balance mutation commit atomically.
//! The store decides `status`/`reason` server-side; a transfer that would
//! take a non-system debit balance negative is recorded as a failed row and
//! leaves balances untouched.

use std::path::Path;
use std::str::FromStr;

use alloy::primitives::U256;
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::models::{
    ChainConfirmation, NewTransaction, PendingRefund, Transaction, TransactionStatus, User, UserId,
};

/// Primary ledger table: tx_id → serialized Transaction (JSON bytes).
const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// Uniqueness index: transaction_reference → tx_id.
const TX_REFS: TableDefinition<&str, &str> = TableDefinition::new("tx_refs");

/// Account balances: user_id → signed decimal string (system accounts may go negative).
const BALANCES: TableDefinition<&str, &str> = TableDefinition::new("balances");

/// Users: user_id → serialized User.
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Address index: lowercase public address → user_id.
const USER_ADDRS: TableDefinition<&str, &str> = TableDefinition::new("user_addrs");

/// Confirmation tracking: on-chain tx hash → serialized ChainConfirmation.
const CHAIN_CONFIRMATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("chain_confirmations");

/// Withdrawal bookkeeping: refund id → serialized PendingRefund.
const PENDING_REFUNDS: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_refunds");

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("duplicate transaction reference: {0}")]
    DuplicateReference(String),

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A ledger balance. Only system accounts ever hold a negative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedBalance {
    pub negative: bool,
    pub magnitude: U256,
}

impl SignedBalance {
    pub const ZERO: Self = Self {
        negative: false,
        magnitude: U256::ZERO,
    };

    pub fn positive(magnitude: U256) -> Self {
        Self {
            negative: false,
            magnitude,
        }
    }

    /// Spendable amount: zero when the balance is negative.
    pub fn spendable(&self) -> U256 {
        if self.negative {
            U256::ZERO
        } else {
            self.magnitude
        }
    }

    fn add(&self, amount: U256) -> Self {
        if self.negative {
            if amount >= self.magnitude {
                Self::positive(amount - self.magnitude)
            } else {
                Self {
                    negative: true,
                    magnitude: self.magnitude - amount,
                }
            }
        } else {
            Self::positive(self.magnitude + amount)
        }
    }

    fn sub(&self, amount: U256) -> Self {
        if self.negative {
            Self {
                negative: true,
                magnitude: self.magnitude + amount,
            }
        } else if amount > self.magnitude {
            Self {
                negative: true,
                magnitude: amount - self.magnitude,
            }
        } else {
            Self::positive(self.magnitude - amount)
        }
    }

    fn encode(&self) -> String {
        if self.negative && !self.magnitude.is_zero() {
            format!("-{}", self.magnitude)
        } else {
            self.magnitude.to_string()
        }
    }

    fn decode(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(rest) => Self {
                negative: true,
                magnitude: U256::from_str(rest).unwrap_or(U256::ZERO),
            },
            None => Self::positive(U256::from_str(raw).unwrap_or(U256::ZERO)),
        }
    }
}

/// Embedded ACID ledger store.
pub struct LedgerStore {
    db: Database,
}

impl LedgerStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(TX_REFS)?;
            let _ = write_txn.open_table(BALANCES)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_ADDRS)?;
            let _ = write_txn.open_table(CHAIN_CONFIRMATIONS)?;
            let _ = write_txn.open_table(PENDING_REFUNDS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    // =========================================================================
    // Ledger writes
    // =========================================================================

    /// Append one ledger row for the given request.
    ///
    /// Rejects a duplicate reference outright (no second row). An
    /// insufficient non-system debit balance yields a `Failed` row with a
    /// reason; balances are only mutated on `Success`.
    pub fn insert_transaction(&self, nt: &NewTransaction) -> StoreResult<Transaction> {
        if nt.amount.is_zero() {
            return Err(StoreError::NonPositiveAmount);
        }

        let id = format!(
            "{}|{}",
            uuid::Uuid::new_v4(),
            Utc::now().timestamp_subsec_nanos()
        );

        let write_txn = self.db.begin_write()?;
        let tx = {
            let mut refs = write_txn.open_table(TX_REFS)?;
            if refs.get(nt.transaction_reference.as_str())?.is_some() {
                return Err(StoreError::DuplicateReference(
                    nt.transaction_reference.clone(),
                ));
            }

            let mut balances = write_txn.open_table(BALANCES)?;
            let debit_key = nt.from.to_string();
            let credit_key = nt.to.to_string();

            let debit_balance = read_balance(&balances, &debit_key)?;
            let (status, reason) = if !nt.from.is_system() && debit_balance.spendable() < nt.amount
            {
                (
                    TransactionStatus::Failed,
                    Some("insufficient funds".to_string()),
                )
            } else {
                (TransactionStatus::Success, None)
            };

            if status == TransactionStatus::Success {
                let credit_balance = read_balance(&balances, &credit_key)?;
                let new_debit = debit_balance.sub(nt.amount).encode();
                let new_credit = credit_balance.add(nt.amount).encode();
                balances.insert(debit_key.as_str(), new_debit.as_str())?;
                balances.insert(credit_key.as_str(), new_credit.as_str())?;
            }

            let tx = Transaction {
                id: id.clone(),
                credit: nt.to,
                debit: nt.from,
                amount: nt.amount,
                status,
                reason,
                transaction_reference: nt.transaction_reference.clone(),
                description: nt.description.clone(),
                group: nt.group,
                sub_group: nt.sub_group.clone(),
                created_at: Utc::now(),
            };

            let json = serde_json::to_vec(&tx)?;
            let mut txs = write_txn.open_table(TRANSACTIONS)?;
            txs.insert(id.as_str(), json.as_slice())?;
            refs.insert(nt.transaction_reference.as_str(), id.as_str())?;
            tx
        };
        write_txn.commit()?;
        Ok(tx)
    }

    /// Look up a ledger row by id.
    pub fn transaction(&self, tx_id: &str) -> StoreResult<Option<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        match table.get(tx_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a ledger row by its caller-chosen reference.
    pub fn transaction_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let refs = read_txn.open_table(TX_REFS)?;
        let tx_id = match refs.get(reference)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        drop(refs);
        let table = read_txn.open_table(TRANSACTIONS)?;
        match table.get(tx_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Settled balance for one account.
    pub fn balance(&self, user_id: UserId) -> StoreResult<SignedBalance> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BALANCES)?;
        let key = user_id.to_string();
        match table.get(key.as_str())? {
            Some(v) => Ok(SignedBalance::decode(v.value())),
            None => Ok(SignedBalance::ZERO),
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert or replace a user, maintaining the address index.
    pub fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let json = serde_json::to_vec(user)?;
        let key = user.id.to_string();
        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            users.insert(key.as_str(), json.as_slice())?;

            if let Some(addr) = &user.public_address {
                let addr = addr.to_lowercase();
                let mut addrs = write_txn.open_table(USER_ADDRS)?;
                addrs.insert(addr.as_str(), key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        let key = user_id.to_string();
        match table.get(key.as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a user by public address (case insensitive).
    pub fn user_by_address(&self, address: &str) -> StoreResult<Option<User>> {
        let addr = address.to_lowercase();
        let read_txn = self.db.begin_read()?;
        let addrs = read_txn.open_table(USER_ADDRS)?;
        let user_id = match addrs.get(addr.as_str())? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        drop(addrs);
        let users = read_txn.open_table(USERS)?;
        match users.get(user_id.as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve a user by address, provisioning a new one on first sight.
    pub fn resolve_or_provision_user(&self, address: &str) -> StoreResult<User> {
        if let Some(user) = self.user_by_address(address)? {
            return Ok(user);
        }
        let user = User::from_public_address(address);
        self.upsert_user(&user)?;
        tracing::info!(user_id = %user.id, address = %user.username, "auto-provisioned user from on-chain activity");
        Ok(user)
    }

    // =========================================================================
    // Chain confirmations
    // =========================================================================

    /// Insert a confirmation row; duplicates by tx hash are rejected.
    pub fn insert_confirmation(&self, confirmation: &ChainConfirmation) -> StoreResult<()> {
        let json = serde_json::to_vec(confirmation)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHAIN_CONFIRMATIONS)?;
            if table.get(confirmation.tx_hash.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "chain confirmation {}",
                    confirmation.tx_hash
                )));
            }
            table.insert(confirmation.tx_hash.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All non-finalized confirmations on the given chain.
    pub fn pending_confirmations(&self, chain_id: u64) -> StoreResult<Vec<ChainConfirmation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHAIN_CONFIRMATIONS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let confirmation: ChainConfirmation = serde_json::from_slice(entry.1.value())?;
            if confirmation.chain_id == chain_id && !confirmation.is_finalized() {
                out.push(confirmation);
            }
        }
        Ok(out)
    }

    /// Record the latest observed depth, finalizing once past the threshold.
    ///
    /// Finalization is monotonic: an already-set `confirmed_at` is never
    /// cleared or overwritten.
    pub fn update_confirmation_depth(
        &self,
        tx_hash: &str,
        depth: u64,
        finalize: bool,
    ) -> StoreResult<ChainConfirmation> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(CHAIN_CONFIRMATIONS)?;
            let existing_bytes = {
                let existing = table
                    .get(tx_hash)?
                    .ok_or_else(|| StoreError::NotFound(format!("chain confirmation {tx_hash}")))?;
                existing.value().to_vec()
            };

            let mut confirmation: ChainConfirmation = serde_json::from_slice(&existing_bytes)?;
            confirmation.confirmation_amount = depth;
            if finalize && confirmation.confirmed_at.is_none() {
                confirmation.confirmed_at = Some(Utc::now());
            }

            let json = serde_json::to_vec(&confirmation)?;
            table.insert(tx_hash, json.as_slice())?;
            confirmation
        };
        write_txn.commit()?;
        Ok(updated)
    }

    pub fn confirmation(&self, tx_hash: &str) -> StoreResult<Option<ChainConfirmation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHAIN_CONFIRMATIONS)?;
        match table.get(tx_hash)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Pending refunds
    // =========================================================================

    pub fn insert_pending_refund(&self, refund: &PendingRefund) -> StoreResult<()> {
        let json = serde_json::to_vec(refund)?;
        let key = refund.id.to_string();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_REFUNDS)?;
            if table.get(key.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("pending refund {key}")));
            }
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn pending_refund(&self, id: uuid::Uuid) -> StoreResult<Option<PendingRefund>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_REFUNDS)?;
        let key = id.to_string();
        match table.get(key.as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Fill in the client-reported on-chain tx hash. Updated once; a second
    /// report is rejected.
    pub fn set_refund_tx_hash(&self, id: uuid::Uuid, tx_hash: &str) -> StoreResult<PendingRefund> {
        self.mutate_refund(id, |refund| {
            if refund.tx_hash.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "pending refund {id} already has a tx hash"
                )));
            }
            refund.tx_hash = Some(tx_hash.to_string());
            Ok(())
        })
    }

    /// Attach a settlement hash to the oldest matching unfilled refund row.
    ///
    /// Used by the bridge when SUPS leave the hot wallet without the client
    /// having reported a hash first: matches on amount among rows that have
    /// neither a hash nor a refund yet.
    pub fn fill_refund_tx_hash_by_amount(
        &self,
        amount: U256,
        tx_hash: &str,
    ) -> StoreResult<Option<PendingRefund>> {
        let candidate = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(PENDING_REFUNDS)?;
            let mut oldest: Option<PendingRefund> = None;
            for entry in table.iter()? {
                let entry = entry?;
                let refund: PendingRefund = serde_json::from_slice(entry.1.value())?;
                if refund.tx_hash.is_none()
                    && refund.refunded_at.is_none()
                    && refund.amount == amount
                    && oldest
                        .as_ref()
                        .is_none_or(|o| refund.created_at < o.created_at)
                {
                    oldest = Some(refund);
                }
            }
            oldest
        };

        match candidate {
            Some(refund) => Ok(Some(self.set_refund_tx_hash(refund.id, tx_hash)?)),
            None => Ok(None),
        }
    }

    /// Mark a refund as executed (the compensating credit was issued).
    pub fn mark_refunded(&self, id: uuid::Uuid) -> StoreResult<PendingRefund> {
        self.mutate_refund(id, |refund| {
            refund.refunded_at = Some(Utc::now());
            Ok(())
        })
    }

    fn mutate_refund(
        &self,
        id: uuid::Uuid,
        mutate: impl FnOnce(&mut PendingRefund) -> StoreResult<()>,
    ) -> StoreResult<PendingRefund> {
        let key = id.to_string();
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(PENDING_REFUNDS)?;
            let existing_bytes = {
                let existing = table
                    .get(key.as_str())?
                    .ok_or_else(|| StoreError::NotFound(format!("pending refund {id}")))?;
                existing.value().to_vec()
            };
            let mut refund: PendingRefund = serde_json::from_slice(&existing_bytes)?;
            mutate(&mut refund)?;
            let json = serde_json::to_vec(&refund)?;
            table.insert(key.as_str(), json.as_slice())?;
            refund
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

fn read_balance<T>(table: &T, key: &str) -> StoreResult<SignedBalance>
where
    T: ReadableTable<&'static str, &'static str>,
{
    match table.get(key)? {
        Some(v) => Ok(SignedBalance::decode(v.value())),
        None => Ok(SignedBalance::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{one_sup, NewTransaction, ON_CHAIN_USER_ID, TREASURY_USER_ID};
    use uuid::Uuid;

    fn temp_store() -> (LedgerStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(&dir.path().join("ledger.redb")).unwrap();
        (store, dir)
    }

    fn fund(store: &LedgerStore, user: UserId, sups: u64) {
        let nt = NewTransaction::new(
            user,
            TREASURY_USER_ID,
            one_sup() * U256::from(sups),
            format!("seed|{}", Uuid::new_v4()),
            "seed funds",
        );
        let tx = store.insert_transaction(&nt).unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
    }

    #[test]
    fn successful_transfer_moves_balance() {
        let (store, _dir) = temp_store();
        let alice = UserId(Uuid::new_v4());
        let bob = UserId(Uuid::new_v4());
        fund(&store, alice, 100);

        let nt = NewTransaction::new(bob, alice, one_sup() * U256::from(30u64), "t1", "transfer");
        let tx = store.insert_transaction(&nt).unwrap();

        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(
            store.balance(alice).unwrap().spendable(),
            one_sup() * U256::from(70u64)
        );
        assert_eq!(
            store.balance(bob).unwrap().spendable(),
            one_sup() * U256::from(30u64)
        );
    }

    #[test]
    fn overdraft_records_failed_row_and_keeps_balances() {
        let (store, _dir) = temp_store();
        let alice = UserId(Uuid::new_v4());
        let bob = UserId(Uuid::new_v4());
        fund(&store, alice, 10);

        let nt = NewTransaction::new(bob, alice, one_sup() * U256::from(50u64), "t2", "too much");
        let tx = store.insert_transaction(&nt).unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.reason.as_deref(), Some("insufficient funds"));
        assert_eq!(
            store.balance(alice).unwrap().spendable(),
            one_sup() * U256::from(10u64)
        );
        assert_eq!(store.balance(bob).unwrap().spendable(), U256::ZERO);

        // The failed row is still durable and findable by reference
        let row = store.transaction_by_reference("t2").unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Failed);
    }

    #[test]
    fn duplicate_reference_is_rejected_without_second_row() {
        let (store, _dir) = temp_store();
        let alice = UserId(Uuid::new_v4());
        fund(&store, alice, 100);

        let nt1 = NewTransaction::new(
            ON_CHAIN_USER_ID,
            alice,
            one_sup() * U256::from(5u64),
            "dup",
            "first",
        );
        let first = store.insert_transaction(&nt1).unwrap();

        // Same reference, different amount: must not double-settle the intent
        let nt2 = NewTransaction::new(
            ON_CHAIN_USER_ID,
            alice,
            one_sup() * U256::from(9u64),
            "dup",
            "second",
        );
        let err = store.insert_transaction(&nt2).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReference(_)));

        let row = store.transaction_by_reference("dup").unwrap().unwrap();
        assert_eq!(row.id, first.id);
        assert_eq!(
            store.balance(alice).unwrap().spendable(),
            one_sup() * U256::from(95u64)
        );
    }

    #[test]
    fn zero_amount_is_rejected() {
        let (store, _dir) = temp_store();
        let alice = UserId(Uuid::new_v4());
        let nt = NewTransaction::new(ON_CHAIN_USER_ID, alice, U256::ZERO, "z", "zero");
        assert!(matches!(
            store.insert_transaction(&nt),
            Err(StoreError::NonPositiveAmount)
        ));
    }

    #[test]
    fn credits_equal_debits_across_rows() {
        let (store, _dir) = temp_store();
        let alice = UserId(Uuid::new_v4());
        let bob = UserId(Uuid::new_v4());
        fund(&store, alice, 100);
        fund(&store, bob, 40);

        let nt = NewTransaction::new(bob, alice, one_sup() * U256::from(25u64), "c1", "transfer");
        store.insert_transaction(&nt).unwrap();

        // Treasury issued 140; users hold 140 between them. Nothing created
        // or destroyed outside the system account.
        let treasury = store.balance(TREASURY_USER_ID).unwrap();
        assert!(treasury.negative);
        assert_eq!(treasury.magnitude, one_sup() * U256::from(140u64));
        let users_total = store.balance(alice).unwrap().spendable()
            + store.balance(bob).unwrap().spendable();
        assert_eq!(users_total, one_sup() * U256::from(140u64));
    }

    #[test]
    fn user_provisioning_is_first_seen_wins() {
        let (store, _dir) = temp_store();
        let addr = "0xAAAA000000000000000000000000000000000001";

        let first = store.resolve_or_provision_user(addr).unwrap();
        let second = store.resolve_or_provision_user(&addr.to_lowercase()).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn confirmation_depth_updates_and_finalizes_once() {
        let (store, _dir) = temp_store();
        let confirmation = ChainConfirmation {
            tx_hash: "0xhash".to_string(),
            tx_id: "tx-1".to_string(),
            block: 100,
            chain_id: 1,
            confirmation_amount: 0,
            confirmed_at: None,
            created_at: Utc::now(),
        };
        store.insert_confirmation(&confirmation).unwrap();

        let pending = store.pending_confirmations(1).unwrap();
        assert_eq!(pending.len(), 1);

        let updated = store.update_confirmation_depth("0xhash", 3, false).unwrap();
        assert!(!updated.is_finalized());

        let finalized = store.update_confirmation_depth("0xhash", 6, true).unwrap();
        assert!(finalized.is_finalized());
        let first_confirmed_at = finalized.confirmed_at;

        // Further updates keep the original confirmed_at
        let again = store.update_confirmation_depth("0xhash", 9, true).unwrap();
        assert_eq!(again.confirmed_at, first_confirmed_at);
        assert!(store.pending_confirmations(1).unwrap().is_empty());
    }

    #[test]
    fn duplicate_confirmation_is_rejected() {
        let (store, _dir) = temp_store();
        let confirmation = ChainConfirmation {
            tx_hash: "0xsame".to_string(),
            tx_id: "tx-1".to_string(),
            block: 1,
            chain_id: 56,
            confirmation_amount: 0,
            confirmed_at: None,
            created_at: Utc::now(),
        };
        store.insert_confirmation(&confirmation).unwrap();
        assert!(matches!(
            store.insert_confirmation(&confirmation),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn refund_tx_hash_is_set_once() {
        let (store, _dir) = temp_store();
        let refund = PendingRefund {
            id: Uuid::new_v4(),
            user_id: UserId(Uuid::new_v4()),
            amount: one_sup() * U256::from(50u64),
            expires_at: Utc::now() + chrono::Duration::minutes(5),
            tx_hash: None,
            refunded_at: None,
            created_at: Utc::now(),
        };
        store.insert_pending_refund(&refund).unwrap();

        let updated = store.set_refund_tx_hash(refund.id, "0xabc").unwrap();
        assert_eq!(updated.tx_hash.as_deref(), Some("0xabc"));

        assert!(matches!(
            store.set_refund_tx_hash(refund.id, "0xdef"),
            Err(StoreError::AlreadyExists(_))
        ));

        let refunded = store.mark_refunded(refund.id).unwrap();
        assert!(refunded.refunded_at.is_some());
    }

    #[test]
    fn settlement_fills_oldest_matching_refund() {
        let (store, _dir) = temp_store();
        let user = UserId(Uuid::new_v4());
        let amount = one_sup() * U256::from(40u64);

        let first = PendingRefund {
            id: Uuid::new_v4(),
            user_id: user,
            amount,
            expires_at: Utc::now() + chrono::Duration::minutes(5),
            tx_hash: None,
            refunded_at: None,
            created_at: Utc::now() - chrono::Duration::seconds(10),
        };
        store.insert_pending_refund(&first).unwrap();

        let second = PendingRefund {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            ..first.clone()
        };
        store.insert_pending_refund(&second).unwrap();

        let matched = store
            .fill_refund_tx_hash_by_amount(amount, "0xsettled")
            .unwrap()
            .unwrap();
        assert_eq!(matched.id, first.id);
        assert_eq!(matched.tx_hash.as_deref(), Some("0xsettled"));

        // No row matches a different amount
        assert!(store
            .fill_refund_tx_hash_by_amount(one_sup(), "0xother")
            .unwrap()
            .is_none());

        // The filled row is skipped on the next settlement
        let next = store
            .fill_refund_tx_hash_by_amount(amount, "0xsettled2")
            .unwrap()
            .unwrap();
        assert_eq!(next.id, second.id);
    }

    #[test]
    fn signed_balance_arithmetic() {
        let five = SignedBalance::positive(U256::from(5u64));
        let neg = five.sub(U256::from(8u64));
        assert!(neg.negative);
        assert_eq!(neg.magnitude, U256::from(3u64));
        assert_eq!(neg.spendable(), U256::ZERO);

        let back = neg.add(U256::from(10u64));
        assert!(!back.negative);
        assert_eq!(back.magnitude, U256::from(7u64));

        let encoded = neg.encode();
        assert_eq!(encoded, "-3");
        assert_eq!(SignedBalance::decode(&encoded), neg);
    }
}
