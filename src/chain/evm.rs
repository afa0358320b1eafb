//! Alloy-backed implementation of [`ChainOps`] for EVM networks.
//!
//! One provider per configured network, built once at startup and shared.
//! Providers are read-only: the facilitator never holds gas keys, so there is
//! no wallet filler here. Settlement transactions enter the mempool through
//! the signer oracle.

use alloy_primitives::{FixedBytes, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockNumberOrTag, Filter};
use alloy_sol_types::{SolEvent, sol};
use async_trait::async_trait;
use std::future::IntoFuture;
use std::time::Duration;
use tracing::{Instrument, instrument};

use crate::chain::{ChainError, ChainOps, ReceiptSummary};
use crate::networks::Network;
use crate::types::{EvmAddress, HexEncodedNonce, TokenAmount, TransactionHash};

sol! {
    /// Minimal ERC-3009 + ERC-20 interface for USDC-style tokens.
    ///
    /// Only the functions this facilitator actually touches are declared.
    /// Overload order matters: the bytes-signature variant is `_0`, the
    /// `(v, r, s)` variant is `_1`.
    ///
    /// References:
    /// - ERC-3009: <https://eips.ethereum.org/EIPS/eip-3009>
    /// - USDC `FiatTokenV2_2`: <https://github.com/circlefin/stablecoin-evm>
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEIP3009 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function version() external view returns (string);
        function balanceOf(address account) external view returns (uint256);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature
        ) external;
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}

/// How often the receipt poll re-queries the node.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline applied to every individual JSON-RPC call, so a stalled node
/// cannot pin a settlement task indefinitely.
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

async fn with_deadline<T, F>(call: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    tokio::time::timeout(RPC_CALL_TIMEOUT, call)
        .await
        .map_err(|_| ChainError::Rpc(format!("call exceeded {RPC_CALL_TIMEOUT:?}")))?
}

/// A shared, read-only JSON-RPC provider for one EVM network.
#[derive(Debug, Clone)]
pub struct EvmChainProvider {
    inner: RootProvider,
    network: Network,
}

impl EvmChainProvider {
    /// Connect to `rpc_url` and bind the provider to `network`.
    pub async fn try_new(
        rpc_url: &str,
        network: Network,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let client = RpcClient::builder()
            .connect(rpc_url)
            .await
            .map_err(|e| format!("Failed to connect to {network}: {e}"))?;
        let inner = RootProvider::new(client);
        Ok(Self { inner, network })
    }

    fn rpc_err(e: impl std::fmt::Debug) -> ChainError {
        ChainError::Rpc(format!("{e:?}"))
    }
}

#[async_trait]
impl ChainOps for EvmChainProvider {
    fn network(&self) -> Network {
        self.network
    }

    #[instrument(skip_all, err, fields(token = %token, owner = %owner, otel.kind = "client"))]
    async fn balance_of(&self, token: EvmAddress, owner: EvmAddress) -> Result<U256, ChainError> {
        let contract = IEIP3009::new(token.0, &self.inner);
        with_deadline(async {
            contract
                .balanceOf(owner.0)
                .call()
                .await
                .map_err(Self::rpc_err)
        })
        .await
    }

    #[instrument(skip_all, err, fields(token = %token, authorizer = %authorizer, nonce = %nonce, otel.kind = "client"))]
    async fn authorization_state(
        &self,
        token: EvmAddress,
        authorizer: EvmAddress,
        nonce: HexEncodedNonce,
    ) -> Result<bool, ChainError> {
        let contract = IEIP3009::new(token.0, &self.inner);
        with_deadline(async {
            contract
                .authorizationState(authorizer.0, FixedBytes(nonce.0))
                .call()
                .await
                .map_err(Self::rpc_err)
        })
        .await
    }

    #[instrument(skip_all, err, fields(token = %token, otel.kind = "client"))]
    async fn eip712_version(&self, token: EvmAddress) -> Result<String, ChainError> {
        let contract = IEIP3009::new(token.0, &self.inner);
        with_deadline(async { contract.version().call().await.map_err(Self::rpc_err) }).await
    }

    /// Scan recent blocks for a matching `Transfer` log.
    ///
    /// Used by reconciliation to recover the transaction hash of a settlement
    /// that the chain reports as consumed while our own submission path
    /// reported a failure.
    #[instrument(skip_all, err, fields(
        token = %token,
        from = %from,
        to = %to,
        value = %value,
        lookback_blocks,
        otel.kind = "client",
    ))]
    async fn find_transfer(
        &self,
        token: EvmAddress,
        from: EvmAddress,
        to: EvmAddress,
        value: TokenAmount,
        lookback_blocks: u64,
    ) -> Result<Option<TransactionHash>, ChainError> {
        with_deadline(async {
            let latest = self
                .inner
                .get_block_number()
                .await
                .map_err(Self::rpc_err)?;
            let from_block = latest.saturating_sub(lookback_blocks);
            let filter = Filter::new()
                .address(token.0)
                .event_signature(IEIP3009::Transfer::SIGNATURE_HASH)
                .topic1(from.0.into_word())
                .topic2(to.0.into_word())
                .from_block(BlockNumberOrTag::Number(from_block))
                .to_block(BlockNumberOrTag::Latest);
            let logs = self.inner.get_logs(&filter).await.map_err(Self::rpc_err)?;
            let wanted: U256 = value.into();
            let found = logs
                .iter()
                .rev()
                .filter(|log| {
                    IEIP3009::Transfer::decode_log_data(&log.inner.data)
                        .map(|transfer| transfer.value == wanted)
                        .unwrap_or(false)
                })
                .find_map(|log| log.transaction_hash)
                .map(TransactionHash::from);
            Ok(found)
        })
        .await
    }

    #[instrument(skip_all, err, fields(tx = %tx, otel.kind = "client"))]
    async fn wait_for_receipt(
        &self,
        tx: TransactionHash,
        deadline: Duration,
    ) -> Result<ReceiptSummary, ChainError> {
        let started = tokio::time::Instant::now();
        loop {
            let receipt = with_deadline(async {
                self.inner
                    .get_transaction_receipt(FixedBytes(tx.0))
                    .into_future()
                    .instrument(tracing::info_span!("get_transaction_receipt", tx = %tx))
                    .await
                    .map_err(Self::rpc_err)
            })
            .await?;
            if let Some(receipt) = receipt {
                let gas_used = receipt.gas_used;
                let gas_cost_wei =
                    U256::from(receipt.effective_gas_price) * U256::from(gas_used);
                return Ok(ReceiptSummary {
                    transaction_hash: TransactionHash(receipt.transaction_hash.0),
                    success: receipt.status(),
                    gas_used,
                    gas_cost_wei,
                });
            }
            if started.elapsed() >= deadline {
                return Err(ChainError::ReceiptTimeout(tx));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
