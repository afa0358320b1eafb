//! x402 facilitator with sponsored gas.
//!
//! This crate verifies and settles [x402](https://www.x402.org) payments on
//! EVM chains, with a twist: the on-chain `transferWithAuthorization` call is
//! funded by a **sponsor wallet** routed through a remote signing service, so
//! the payer never needs gas.
//!
//! # Overview
//!
//! The x402 protocol enables HTTP-native payments using the
//! `402 Payment Required` status code. A payer signs an EIP-3009
//! authorization off-chain; a vendor forwards it here; this service checks it
//! is well-formed, solvent, timely, and unreplayed, then submits it on-chain
//! and reports the outcome, correctly even across RPC races and client
//! retries.
//!
//! # Modules
//!
//! - [`networks`] — registry of supported chains and their USDC deployments.
//! - [`chain`] — CAIP-2 identifiers and the read-only chain interface.
//! - [`types`] — protocol wire types: payloads, requirements, receipts.
//! - [`verify`] — EIP-712 verification of payment authorizations.
//! - [`sponsor`] — sponsor wallet resolution.
//! - [`oracle`] — the remote signer oracle adapter.
//! - [`settlement`] — the settlement engine: dedup, state machine, recovery.
//! - [`gate`] — tiered rate limits and monthly quotas.
//! - [`ledger`] — idempotent analytics writes.
//! - [`facilitator`] / [`facilitator_local`] — the facilitator trait and its
//!   local implementation with protocol routing.
//! - [`handlers`] — the Axum HTTP boundary.

pub mod chain;
pub mod config;
pub mod facilitator;
pub mod facilitator_local;
pub mod gate;
pub mod handlers;
pub mod ledger;
pub mod networks;
pub mod oracle;
pub mod provider_cache;
pub mod settlement;
pub mod sig_down;
pub mod sponsor;
pub mod telemetry;
pub mod timestamp;
pub mod trace_id;
pub mod types;
pub mod verify;
