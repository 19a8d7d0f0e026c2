// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Withdrawal Orchestrator
//!
//! A linear state machine with no backtracking once the on-chain transfer
//! is submitted: validate → check cache balance → check hot-wallet
//! liquidity and gas → debit the ledger → submit the transfer → poll for a
//! receipt. A receipt with zero status triggers a compensating credit back
//! to the user; running out of poll attempts does not, because the transfer
//! may yet land.
//!
//! The poll loop is parameterized by interval and attempt count so tests
//! drive it with a fake gateway and a tiny interval.

pub mod signer;

use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use uuid::Uuid;

use crate::chain::{ChainError, HotWalletGateway};
use crate::ledger::store::StoreError;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{
    parse_sups, NewTransaction, PendingRefund, TransactionGroup, TransactionStatus, User, UserId,
    ON_CHAIN_USER_ID,
};

use signer::{SignedWithdrawal, WithdrawSigner, SIGNATURE_TTL_MINUTES};

/// Default receipt poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default receipt poll attempts (~60s with the default interval).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;

#[derive(Debug, thiserror::Error)]
pub enum WithdrawError {
    #[error("amount must be a positive integer")]
    InvalidAmount,

    #[error("user not found")]
    UserNotFound,

    #[error("user has no linked wallet address")]
    NoWalletAddress,

    #[error("withdrawal transaction reverted on chain")]
    Reverted,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminal outcome of a server-submitted withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// Receipt seen with success status.
    Confirmed { tx_hash: String },
    /// No definitive receipt within the poll budget; the caller watches
    /// asynchronously. Funds stay debited.
    Pending { tx_hash: String },
}

/// Drives withdrawals against one chain's hot wallet.
pub struct WithdrawalOrchestrator<G: HotWalletGateway> {
    ledger: Ledger,
    gateway: G,
    signer: WithdrawSigner,
    poll_interval: Duration,
    max_attempts: u32,
}

impl<G: HotWalletGateway> WithdrawalOrchestrator<G> {
    pub fn new(ledger: Ledger, gateway: G, signer: WithdrawSigner) -> Self {
        Self {
            ledger,
            gateway,
            signer,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the receipt poll schedule.
    pub fn with_poll(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_attempts = max_attempts;
        self
    }

    /// Server-submitted withdrawal: debit the ledger, transfer from the hot
    /// wallet, poll for the receipt.
    pub async fn withdraw(
        &self,
        public_address: &str,
        amount_raw: &str,
    ) -> Result<WithdrawOutcome, WithdrawError> {
        let (user, destination, amount) = self.validate(public_address, amount_raw).await?;

        let reference = format!("sup|withdraw|{}", Uuid::new_v4());
        let request = NewTransaction::new(
            ON_CHAIN_USER_ID,
            user.id,
            amount,
            reference.clone(),
            "SUPS withdrawal",
        )
        .with_group(TransactionGroup::Withdrawal);

        let tx = self.ledger.submit_transaction(request).await?;
        if tx.status != TransactionStatus::Success {
            // No on-chain action was taken, nothing to refund
            return Err(LedgerError::TransactionFailed(
                tx.reason.unwrap_or_else(|| "unknown".to_string()),
            )
            .into());
        }

        let tx_hash = match self.gateway.transfer_sups(destination, amount).await {
            Ok(hash) => hash,
            Err(e) => {
                self.refund(user.id, amount, &reference, &e.to_string())
                    .await;
                return Err(LedgerError::ChainSubmissionFailed(e.to_string()).into());
            }
        };

        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            match self.gateway.transfer_status(&tx_hash).await {
                Ok(Some(true)) => {
                    tracing::info!(
                        user_id = %user.id,
                        tx_hash = %tx_hash,
                        amount = %amount,
                        "withdrawal confirmed"
                    );
                    return Ok(WithdrawOutcome::Confirmed { tx_hash });
                }
                Ok(Some(false)) => {
                    self.refund(user.id, amount, &reference, "transaction reverted on chain")
                        .await;
                    return Err(WithdrawError::Reverted);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tx_hash = %tx_hash, attempt, error = %e, "receipt poll failed");
                }
            }
        }

        tracing::warn!(
            user_id = %user.id,
            tx_hash = %tx_hash,
            "withdrawal unconfirmed within poll budget, reporting pending"
        );
        Ok(WithdrawOutcome::Pending { tx_hash })
    }

    /// Client-submitted withdrawal: debit the ledger, record a pending
    /// refund and hand back a signed authorization with a short expiry.
    pub async fn issue_withdrawal_signature(
        &self,
        public_address: &str,
        amount_raw: &str,
    ) -> Result<SignedWithdrawal, WithdrawError> {
        let (user, destination, amount) = self.validate(public_address, amount_raw).await?;

        let refund_id = Uuid::new_v4();
        let reference = format!("sup|withdraw|{refund_id}");
        let request = NewTransaction::new(
            ON_CHAIN_USER_ID,
            user.id,
            amount,
            reference,
            "SUPS withdrawal (signed)",
        )
        .with_group(TransactionGroup::Withdrawal);

        let tx = self.ledger.submit_transaction(request).await?;
        if tx.status != TransactionStatus::Success {
            return Err(LedgerError::TransactionFailed(
                tx.reason.unwrap_or_else(|| "unknown".to_string()),
            )
            .into());
        }

        let signed = self.signer.sign_withdrawal(refund_id, destination, amount)?;
        self.ledger.store().insert_pending_refund(&PendingRefund {
            id: refund_id,
            user_id: user.id,
            amount,
            expires_at: signed.expires_at,
            tx_hash: None,
            refunded_at: None,
            created_at: Utc::now(),
        })?;

        tracing::info!(
            user_id = %user.id,
            refund_id = %refund_id,
            amount = %amount,
            ttl_minutes = SIGNATURE_TTL_MINUTES,
            "withdrawal signature issued"
        );
        Ok(signed)
    }

    /// Client follow-up report of the on-chain hash for a signed withdrawal.
    pub fn report_submission(&self, refund_id: Uuid, tx_hash: &str) -> Result<(), WithdrawError> {
        self.ledger.store().set_refund_tx_hash(refund_id, tx_hash)?;
        Ok(())
    }

    /// Steps 1-4: parse the amount, resolve the user, check the cached
    /// balance, then hot-wallet liquidity and gas.
    async fn validate(
        &self,
        public_address: &str,
        amount_raw: &str,
    ) -> Result<(User, Address, U256), WithdrawError> {
        let amount = parse_sups(amount_raw)
            .filter(|a| !a.is_zero())
            .ok_or(WithdrawError::InvalidAmount)?;

        let user = self
            .ledger
            .store()
            .user_by_address(public_address)?
            .ok_or(WithdrawError::UserNotFound)?;
        let destination: Address = user
            .public_address
            .as_deref()
            .ok_or(WithdrawError::NoWalletAddress)?
            .parse()
            .map_err(|_| WithdrawError::NoWalletAddress)?;

        if self.ledger.cached_balance(user.id).await? < amount {
            return Err(LedgerError::InsufficientFunds.into());
        }

        if self.gateway.sups_balance().await? < amount {
            return Err(LedgerError::InsufficientLiquidity.into());
        }
        if !self.gateway.gas_funds_ok().await? {
            return Err(LedgerError::InsufficientGas.into());
        }

        Ok((user, destination, amount))
    }

    /// Emit the compensating credit after a failed on-chain transfer.
    async fn refund(&self, user_id: UserId, amount: U256, original_reference: &str, reason: &str) {
        let refund_reference = format!("REFUND {reason} - {original_reference}");
        let request = NewTransaction::new(
            user_id,
            ON_CHAIN_USER_ID,
            amount,
            refund_reference.clone(),
            format!("refund of failed withdrawal: {reason}"),
        )
        .with_group(TransactionGroup::Withdrawal);

        match self.ledger.submit_transaction(request).await {
            Ok(tx) if tx.status == TransactionStatus::Success => {
                tracing::error!(
                    user_id = %user_id,
                    original_reference = %original_reference,
                    refund_reference = %refund_reference,
                    %reason,
                    "withdrawal failed, compensating credit issued"
                );
            }
            Ok(tx) => {
                tracing::error!(
                    user_id = %user_id,
                    original_reference = %original_reference,
                    refund_reference = %refund_reference,
                    reason = tx.reason.as_deref().unwrap_or("unknown"),
                    "withdrawal refund recorded as failed, manual intervention required"
                );
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    original_reference = %original_reference,
                    refund_reference = %refund_reference,
                    error = %e,
                    "withdrawal refund write failed, manual intervention required"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::ledger::store::LedgerStore;
    use crate::models::{one_sup, TREASURY_USER_ID};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;

    const TEST_KEY: &str = "0x5f3b57101caf01c3d91e50809e70d84fcc404dd108aa8a9aa3e1a6c482267f48";
    const USER_ADDR: &str = "0x729c49ceae31895a822b173b1396be4ea6061c9c";

    /// Scripted hot wallet: receipt statuses are popped per poll.
    struct FakeGateway {
        sups: U256,
        gas_ok: bool,
        fail_submit: bool,
        statuses: Mutex<VecDeque<Option<bool>>>,
    }

    impl FakeGateway {
        fn new(sups: u64, statuses: Vec<Option<bool>>) -> Self {
            Self {
                sups: one_sup() * U256::from(sups),
                gas_ok: true,
                fail_submit: false,
                statuses: Mutex::new(statuses.into()),
            }
        }
    }

    impl HotWalletGateway for FakeGateway {
        async fn sups_balance(&self) -> Result<U256, ChainError> {
            Ok(self.sups)
        }

        async fn gas_funds_ok(&self) -> Result<bool, ChainError> {
            Ok(self.gas_ok)
        }

        async fn transfer_sups(&self, _to: Address, _amount: U256) -> Result<String, ChainError> {
            if self.fail_submit {
                return Err(ChainError::SubmissionFailed("node rejected".to_string()));
            }
            Ok("0xfakehash".to_string())
        }

        async fn transfer_status(&self, _tx_hash: &str) -> Result<Option<bool>, ChainError> {
            Ok(self.statuses.lock().unwrap().pop_front().flatten())
        }
    }

    struct Fixture {
        ledger: Ledger,
        user: User,
        _dir: tempfile::TempDir,
    }

    /// Ledger with one connected user holding 100 SUPS.
    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LedgerStore::open(&dir.path().join("ledger.redb")).unwrap());
        let ledger = Ledger::new(store, EventSink::new());

        let user = User::from_public_address(USER_ADDR);
        ledger.store().upsert_user(&user).unwrap();
        let seed = NewTransaction::new(
            user.id,
            TREASURY_USER_ID,
            one_sup() * U256::from(100u64),
            "seed|withdrawal-test",
            "seed",
        );
        ledger.submit_transaction(seed).await.unwrap();
        ledger.on_user_authenticated(user.clone()).await.unwrap();

        Fixture {
            ledger,
            user,
            _dir: dir,
        }
    }

    fn orchestrator(
        ledger: Ledger,
        gateway: FakeGateway,
    ) -> WithdrawalOrchestrator<FakeGateway> {
        WithdrawalOrchestrator::new(ledger, gateway, WithdrawSigner::new(TEST_KEY).unwrap())
            .with_poll(Duration::from_millis(1), 3)
    }

    fn sups(n: u64) -> U256 {
        one_sup() * U256::from(n)
    }

    #[tokio::test]
    async fn reverted_receipt_refunds_the_debit() {
        let f = fixture().await;
        let gateway = FakeGateway::new(1000, vec![None, Some(false)]);
        let orch = orchestrator(f.ledger.clone(), gateway);

        let err = orch
            .withdraw(USER_ADDR, &sups(50).to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::Reverted));

        // Debit then compensating credit: cache and ledger both back at 100
        assert_eq!(f.ledger.cached_balance(f.user.id).await.unwrap(), sups(100));
        assert_eq!(
            f.ledger.store().balance(f.user.id).unwrap().spendable(),
            sups(100)
        );
    }

    #[tokio::test]
    async fn confirmed_receipt_settles_the_withdrawal() {
        let f = fixture().await;
        let gateway = FakeGateway::new(1000, vec![None, Some(true)]);
        let orch = orchestrator(f.ledger.clone(), gateway);

        let outcome = orch
            .withdraw(USER_ADDR, &sups(50).to_string())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WithdrawOutcome::Confirmed {
                tx_hash: "0xfakehash".to_string()
            }
        );
        assert_eq!(f.ledger.cached_balance(f.user.id).await.unwrap(), sups(50));
    }

    #[tokio::test]
    async fn exhausted_polls_report_pending_without_refund() {
        let f = fixture().await;
        let gateway = FakeGateway::new(1000, vec![None, None, None, None]);
        let orch = orchestrator(f.ledger.clone(), gateway);

        let outcome = orch
            .withdraw(USER_ADDR, &sups(50).to_string())
            .await
            .unwrap();
        assert!(matches!(outcome, WithdrawOutcome::Pending { .. }));

        // The transfer may yet land: funds stay debited
        assert_eq!(f.ledger.cached_balance(f.user.id).await.unwrap(), sups(50));
    }

    #[tokio::test]
    async fn submission_failure_refunds_immediately() {
        let f = fixture().await;
        let mut gateway = FakeGateway::new(1000, vec![]);
        gateway.fail_submit = true;
        let orch = orchestrator(f.ledger.clone(), gateway);

        let err = orch
            .withdraw(USER_ADDR, &sups(50).to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WithdrawError::Ledger(LedgerError::ChainSubmissionFailed(_))
        ));
        assert_eq!(f.ledger.cached_balance(f.user.id).await.unwrap(), sups(100));
    }

    #[tokio::test]
    async fn preflight_checks_reject_before_any_debit() {
        let f = fixture().await;

        // Unparseable amounts
        let orch = orchestrator(f.ledger.clone(), FakeGateway::new(1000, vec![]));
        for bad in ["", "-5", "1.5", "abc"] {
            assert!(matches!(
                orch.withdraw(USER_ADDR, bad).await.unwrap_err(),
                WithdrawError::InvalidAmount
            ));
        }

        // Unknown address
        let err = orch
            .withdraw("0x0000000000000000000000000000000000000042", "1")
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::UserNotFound));

        // More than the cached balance
        let err = orch
            .withdraw(USER_ADDR, &sups(200).to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WithdrawError::Ledger(LedgerError::InsufficientFunds)
        ));

        // Hot wallet too poor
        let orch = orchestrator(f.ledger.clone(), FakeGateway::new(10, vec![]));
        let err = orch
            .withdraw(USER_ADDR, &sups(50).to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WithdrawError::Ledger(LedgerError::InsufficientLiquidity)
        ));

        // No gas
        let mut gateway = FakeGateway::new(1000, vec![]);
        gateway.gas_ok = false;
        let orch = orchestrator(f.ledger.clone(), gateway);
        let err = orch
            .withdraw(USER_ADDR, &sups(50).to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WithdrawError::Ledger(LedgerError::InsufficientGas)
        ));

        // Nothing above touched the balance
        assert_eq!(f.ledger.cached_balance(f.user.id).await.unwrap(), sups(100));
    }

    #[tokio::test]
    async fn signature_issuance_debits_and_records_pending_refund() {
        let f = fixture().await;
        let orch = orchestrator(f.ledger.clone(), FakeGateway::new(1000, vec![]));

        let signed = orch
            .issue_withdrawal_signature(USER_ADDR, &sups(40).to_string())
            .await
            .unwrap();

        assert_eq!(f.ledger.cached_balance(f.user.id).await.unwrap(), sups(60));

        let refund = f
            .ledger
            .store()
            .pending_refund(signed.refund_id)
            .unwrap()
            .unwrap();
        assert_eq!(refund.user_id, f.user.id);
        assert_eq!(refund.amount, sups(40));
        assert!(refund.tx_hash.is_none());

        orch.report_submission(signed.refund_id, "0xclienthash")
            .unwrap();
        let refund = f
            .ledger
            .store()
            .pending_refund(signed.refund_id)
            .unwrap()
            .unwrap();
        assert_eq!(refund.tx_hash.as_deref(), Some("0xclienthash"));
    }
}
