// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Withdrawal authorization signing.
//!
//! The token contract releases SUPS against an operator signature over
//! `(recipient, amount, nonce, expiry)`. Signatures carry a short expiry so
//! an unsubmitted authorization cannot be hoarded.

use alloy::primitives::{keccak256, Address, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::chain::ChainError;

/// How long an issued signature stays valid.
pub const SIGNATURE_TTL_MINUTES: i64 = 5;

/// A signed withdrawal authorization handed to the client for submission.
#[derive(Debug, Clone)]
pub struct SignedWithdrawal {
    /// Pending-refund row this authorization is tracked by.
    pub refund_id: Uuid,
    pub to: Address,
    pub amount: U256,
    pub nonce: U256,
    pub expires_at: DateTime<Utc>,
    /// 65-byte signature, 0x-prefixed hex.
    pub signature: String,
}

/// Signs withdrawal authorizations with the operator key.
pub struct WithdrawSigner {
    signer: PrivateKeySigner,
}

impl WithdrawSigner {
    pub fn new(private_key_hex: &str) -> Result<Self, ChainError> {
        let key_bytes = alloy::hex::decode(private_key_hex.trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?;
        let signer = PrivateKeySigner::from_slice(&key_bytes)
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Issue an authorization expiring [`SIGNATURE_TTL_MINUTES`] from now.
    pub fn sign_withdrawal(
        &self,
        refund_id: Uuid,
        to: Address,
        amount: U256,
    ) -> Result<SignedWithdrawal, ChainError> {
        let nonce = U256::from(refund_id.as_u128());
        let expires_at = Utc::now() + Duration::minutes(SIGNATURE_TTL_MINUTES);

        // Packed encoding matching the contract's ecrecover check
        let mut message = Vec::with_capacity(20 + 32 * 3);
        message.extend_from_slice(to.as_slice());
        message.extend_from_slice(&amount.to_be_bytes::<32>());
        message.extend_from_slice(&nonce.to_be_bytes::<32>());
        message.extend_from_slice(&U256::from(expires_at.timestamp() as u64).to_be_bytes::<32>());
        let digest = keccak256(&message);

        let signature = self
            .signer
            .sign_message_sync(digest.as_slice())
            .map_err(|e| ChainError::SubmissionFailed(e.to_string()))?;

        Ok(SignedWithdrawal {
            refund_id,
            to,
            amount,
            nonce,
            expires_at,
            signature: format!("0x{}", alloy::hex::encode(signature.as_bytes())),
        })
    }
}
