// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Passport Ledger
//!
//! SUPS custody core for the game-platform passport service: an append-only
//! ledger with a single serialized writer, an actor-owned balance cache, the
//! hold/commit/release protocol for multi-step purchases, bridge listeners
//! translating on-chain transfers into ledger transactions with
//! confirmation-depth tracking, and the on-chain withdrawal orchestrator.
//!
//! The HTTP/WebSocket surface is a separate concern; it drives this crate
//! through [`ledger::Ledger`] and [`withdrawal::WithdrawalOrchestrator`]
//! handles and consumes [`events::LedgerEvent`] broadcasts.

pub mod bridge;
pub mod chain;
pub mod config;
pub mod events;
pub mod ledger;
pub mod models;
pub mod withdrawal;
