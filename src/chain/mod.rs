//! Blockchain access for x402 payment processing.
//!
//! The facilitator only ever touches the chain through the narrow [`ChainOps`]
//! interface: a handful of read-only views on the token contract plus receipt
//! and log lookups. The single state-changing call, `transferWithAuthorization`,
//! is broadcast by the signer oracle, not by us, so no provider here carries
//! signing keys.

use alloy_primitives::U256;
use async_trait::async_trait;
use std::time::Duration;

use crate::networks::Network;
use crate::types::{EvmAddress, HexEncodedNonce, TokenAmount, TransactionHash};

pub mod chain_id;
pub mod evm;

/// Condensed view of an on-chain transaction receipt.
#[derive(Debug, Clone)]
pub struct ReceiptSummary {
    pub transaction_hash: TransactionHash,
    pub success: bool,
    pub gas_used: u64,
    pub gas_cost_wei: U256,
}

/// Errors raised by chain reads.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Transport or node-side failure of a JSON-RPC call.
    #[error("RPC call failed: {0}")]
    Rpc(String),
    /// The receipt did not appear before the deadline.
    #[error("Timed out waiting for receipt of {0}")]
    ReceiptTimeout(TransactionHash),
}

/// Read-only chain interface used by verification and settlement.
///
/// One implementation per configured network; all of them share a process-wide
/// JSON-RPC client. Test doubles implement this trait to exercise the
/// settlement engine without a node.
#[async_trait]
pub trait ChainOps: Send + Sync {
    /// The network this instance reads.
    fn network(&self) -> Network;

    /// `ERC20.balanceOf(owner)` on `token`.
    async fn balance_of(&self, token: EvmAddress, owner: EvmAddress) -> Result<U256, ChainError>;

    /// `ERC3009.authorizationState(authorizer, nonce)` on `token`.
    ///
    /// `true` means the nonce is used or canceled and is permanently terminal.
    async fn authorization_state(
        &self,
        token: EvmAddress,
        authorizer: EvmAddress,
        nonce: HexEncodedNonce,
    ) -> Result<bool, ChainError>;

    /// The token's reported EIP-712 `version()`, for assets outside the
    /// static registry.
    async fn eip712_version(&self, token: EvmAddress) -> Result<String, ChainError>;

    /// Scan the trailing `lookback_blocks` blocks for a
    /// `Transfer(from, to, value)` log on `token`, newest match wins.
    async fn find_transfer(
        &self,
        token: EvmAddress,
        from: EvmAddress,
        to: EvmAddress,
        value: TokenAmount,
        lookback_blocks: u64,
    ) -> Result<Option<TransactionHash>, ChainError>;

    /// Poll for the receipt of `tx` until `deadline` elapses.
    async fn wait_for_receipt(
        &self,
        tx: TransactionHash,
        deadline: Duration,
    ) -> Result<ReceiptSummary, ChainError>;
}
