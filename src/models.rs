// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Core domain types for the SUPS ledger.
//!
//! SUPS amounts are 18-decimal fixed-point unsigned integers carried as
//! [`U256`] everywhere; they are serialized as decimal strings.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Number of decimals in the SUPS fixed-point representation.
pub const SUPS_DECIMALS: u8 = 18;

/// Identifier of a passport user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Parse from a string UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// True for the protected system accounts (treasury, on-chain, sale).
    ///
    /// System accounts never have balance changes broadcast and are the only
    /// accounts allowed to go negative on the ledger (currency issuance).
    pub fn is_system(&self) -> bool {
        *self == TREASURY_USER_ID || *self == ON_CHAIN_USER_ID || *self == SALE_USER_ID
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The treasury account: source of purchase payouts.
pub const TREASURY_USER_ID: UserId = UserId(Uuid::from_u128(0xad734a10_9e54_47cd_9e55_31334f5eec21));

/// The on-chain account: counterparty for deposits, withdrawals and redemptions.
pub const ON_CHAIN_USER_ID: UserId = UserId(Uuid::from_u128(0x2fa1a63e_a4fa_4618_921f_4b4d28132069));

/// The token-sale account.
pub const SALE_USER_ID: UserId = UserId(Uuid::from_u128(0x1a6a9c57_7a77_4e94_b637_fca8d4b4f7f1));

/// Access level carried on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Normal platform member.
    Member,
    /// Full administrative access.
    Admin,
}

/// A passport user as held in the ledger store and the balance cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Lowercase hex public address, if the user has linked a wallet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Auto-provision a user first seen through on-chain activity.
    ///
    /// The address doubles as the username until the user claims the account.
    pub fn from_public_address(address: &str) -> Self {
        let addr = address.to_lowercase();
        Self {
            id: UserId(Uuid::new_v4()),
            username: addr.clone(),
            public_address: Some(addr),
            role: UserRole::Member,
            created_at: Utc::now(),
        }
    }
}

/// Status of a settled ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failed,
}

/// Grouping tag carried on ledger rows for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionGroup {
    Store,
    Deposit,
    Withdrawal,
    Battle,
    AssetManagement,
    Testing,
}

/// A settled ledger row. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// `uuid|nanos` identifier assigned by the processor.
    pub id: String,
    /// Credited account.
    pub credit: UserId,
    /// Debited account.
    pub debit: UserId,
    /// SUPS amount, 18-decimal fixed point.
    #[serde(with = "u256_string")]
    pub amount: U256,
    pub status: TransactionStatus,
    /// Failure explanation when `status == Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Caller-chosen unique reference identifying one logical transfer.
    pub transaction_reference: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<TransactionGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_group: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a processed transaction, delivered on the request's result slot.
pub type TransactionResult = Result<Transaction, crate::ledger::LedgerError>;

/// A transfer request headed for the transaction processor.
///
/// Not persisted; the processor turns it into a [`Transaction`] row.
#[derive(Debug)]
pub struct NewTransaction {
    /// Account to credit.
    pub to: UserId,
    /// Account to debit.
    pub from: UserId,
    pub amount: U256,
    pub transaction_reference: String,
    pub description: String,
    pub group: Option<TransactionGroup>,
    pub sub_group: Option<String>,
    /// Synchronous callers attach a result slot; fire-and-forget callers don't.
    pub result: Option<oneshot::Sender<TransactionResult>>,
}

impl NewTransaction {
    pub fn new(
        to: UserId,
        from: UserId,
        amount: U256,
        reference: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            to,
            from,
            amount,
            transaction_reference: reference.into(),
            description: description.into(),
            group: None,
            sub_group: None,
            result: None,
        }
    }

    pub fn with_group(mut self, group: TransactionGroup) -> Self {
        self.group = Some(group);
        self
    }
}

/// A hold kept alive between `hold` and `commit`/`release`.
///
/// The optimistic delta (debit `from`, credit `to`) has already been applied
/// to the balance cache for as long as the reference is in the held map.
#[derive(Debug, Clone)]
pub struct HeldTransaction {
    pub to: UserId,
    pub from: UserId,
    pub amount: U256,
    pub transaction_reference: String,
    pub description: String,
    pub group: Option<TransactionGroup>,
    pub held_at: DateTime<Utc>,
}

impl HeldTransaction {
    /// Rebuild the processor request this hold was created from.
    pub fn to_new_transaction(&self) -> NewTransaction {
        NewTransaction {
            to: self.to,
            from: self.from,
            amount: self.amount,
            transaction_reference: self.transaction_reference.clone(),
            description: self.description.clone(),
            group: self.group,
            sub_group: None,
            result: None,
        }
    }
}

/// Confirmation-depth tracking row for a bridged on-chain transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfirmation {
    /// On-chain transaction hash.
    pub tx_hash: String,
    /// Ledger transaction this confirms.
    pub tx_id: String,
    /// Block the transfer was observed in.
    pub block: u64,
    pub chain_id: u64,
    /// Latest observed confirmation depth.
    pub confirmation_amount: u64,
    /// Set exactly once, when depth reaches the finality threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChainConfirmation {
    pub fn is_finalized(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

/// A withdrawal issued a signature, awaiting the client's on-chain submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRefund {
    pub id: Uuid,
    pub user_id: UserId,
    #[serde(with = "u256_string")]
    pub amount: U256,
    /// Signature expiry; the client must submit before this.
    pub expires_at: DateTime<Utc>,
    /// Filled in once the client (or the bridge listener) reports the hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Serialize `U256` as a decimal string; 18-decimal amounts overflow u64.
pub mod u256_string {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<U256>().map_err(de::Error::custom)
    }
}

/// Parse a decimal string into a SUPS amount, rejecting signs and fractions.
pub fn parse_sups(raw: &str) -> Option<U256> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<U256>().ok()
}

/// One whole SUP in fixed-point units.
pub fn one_sup() -> U256 {
    U256::from(10u64).pow(U256::from(SUPS_DECIMALS))
}
