//! Remote signer oracle: the only path by which transactions reach the chain.
//!
//! The facilitator itself holds no gas keys. A sponsor wallet's key material
//! lives inside a remote signing service; we hand it the calldata for
//! `transferWithAuthorization` and get back a transaction hash once the
//! service has signed and broadcast. The adapter then watches the chain for
//! the receipt. It never retries on its own: retries are the settlement
//! engine's prerogative, because only the engine can consult the chain first.

use alloy_primitives::{Bytes, FixedBytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::chain::{ChainError, ChainOps};
use crate::chain::evm::IEIP3009;
use crate::facilitator::PaymentError;
use crate::sponsor::SponsorWallet;
use crate::types::{EvmAddress, ExactEvmPayload, TransactionHash};

/// A settlement transaction that reached the chain, with its gas accounting.
#[derive(Debug, Clone)]
pub struct SettledTx {
    pub tx_hash: TransactionHash,
    pub gas_used: u64,
    pub gas_cost_wei: U256,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The oracle refused or failed the submission; the message is passed
    /// through verbatim for the reconciliation policy to interpret.
    #[error("Signer oracle rejected submission: {0}")]
    Rejected(String),
    /// The oracle could not be reached.
    #[error("Signer oracle unreachable: {0}")]
    Transport(String),
}

/// Interface to the remote signing service.
#[async_trait]
pub trait SignerOracle: Send + Sync {
    /// Sign and broadcast `calldata` to `to` from the sponsor wallet bound to
    /// `wallet.signer_handle`. Returns the broadcast transaction hash.
    async fn submit(
        &self,
        wallet: &SponsorWallet,
        chain_id: u64,
        to: EvmAddress,
        calldata: Bytes,
    ) -> Result<TransactionHash, OracleError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTxRequest<'a> {
    signer_handle: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signer_user_share: Option<&'a str>,
    chain_id: u64,
    to: EvmAddress,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTxResponse {
    transaction_hash: Option<TransactionHash>,
    error: Option<String>,
}

/// HTTP client for the signer oracle service.
#[derive(Debug, Clone)]
pub struct HttpSignerOracle {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl HttpSignerOracle {
    pub fn new(endpoint: Url, api_key: String, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl SignerOracle for HttpSignerOracle {
    #[instrument(skip_all, err, fields(
        sponsor = %wallet.sponsor_address,
        chain_id,
        to = %to,
        otel.kind = "client",
    ))]
    async fn submit(
        &self,
        wallet: &SponsorWallet,
        chain_id: u64,
        to: EvmAddress,
        calldata: Bytes,
    ) -> Result<TransactionHash, OracleError> {
        let body = SubmitTxRequest {
            signer_handle: &wallet.signer_handle,
            signer_user_share: wallet.signer_user_share.as_deref(),
            chain_id,
            to,
            data: format!("0x{}", hex::encode(&calldata)),
        };
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OracleError::Rejected(format!("{status}: {detail}")));
        }
        let parsed: SubmitTxResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        match (parsed.transaction_hash, parsed.error) {
            (Some(hash), _) => Ok(hash),
            // A missing or malformed error string is passed through verbatim.
            (None, Some(error)) => Err(OracleError::Rejected(error)),
            (None, None) => Err(OracleError::Rejected(
                "oracle returned neither hash nor error".into(),
            )),
        }
    }
}

/// ABI-encode the `(v, r, s)` overload of `transferWithAuthorization` for the
/// given authorization payload.
pub fn transfer_calldata(payload: &ExactEvmPayload) -> Bytes {
    let authorization = &payload.authorization;
    let (v, r, s) = payload.signature.vrs();
    let call = IEIP3009::transferWithAuthorization_1Call {
        from: authorization.from.0,
        to: authorization.to.0,
        value: authorization.value.into(),
        validAfter: authorization.valid_after.into(),
        validBefore: authorization.valid_before.into(),
        nonce: FixedBytes(authorization.nonce.0),
        v,
        r: FixedBytes(r),
        s: FixedBytes(s),
    };
    call.abi_encode().into()
}

/// Submit an authorization through the oracle and wait for its receipt.
///
/// One submission, one receipt wait, no retry. A reverted receipt, a missing
/// receipt, and an oracle rejection all come back as errors for the
/// settlement engine to reconcile against the chain.
#[instrument(skip_all, err, fields(
    sponsor = %wallet.sponsor_address,
    token = %token,
    payer = %payload.authorization.from,
))]
pub async fn execute<C, O>(
    chain: &C,
    oracle: &O,
    wallet: &SponsorWallet,
    token: EvmAddress,
    payload: &ExactEvmPayload,
    receipt_deadline: Duration,
) -> Result<SettledTx, PaymentError>
where
    C: ChainOps + ?Sized,
    O: SignerOracle + ?Sized,
{
    let calldata = transfer_calldata(payload);
    let chain_id = chain.network().chain_id();
    let tx_hash = oracle
        .submit(wallet, chain_id, token, calldata)
        .await
        .map_err(|e| PaymentError::Submission(e.to_string()))?;

    let receipt = chain
        .wait_for_receipt(tx_hash, receipt_deadline)
        .await
        .map_err(|e| match e {
            ChainError::ReceiptTimeout(tx) => PaymentError::Timeout(format!("no receipt for {tx}")),
            ChainError::Rpc(detail) => PaymentError::ContractCall(detail),
        })?;

    if receipt.success {
        Ok(SettledTx {
            tx_hash: receipt.transaction_hash,
            gas_used: receipt.gas_used,
            gas_cost_wei: receipt.gas_cost_wei,
        })
    } else {
        Err(PaymentError::Reverted(format!(
            "receipt status 0 for {}",
            receipt.transaction_hash
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{EvmSignature, ExactEvmPayloadAuthorization, HexEncodedNonce, TokenAmount};

    #[test]
    fn test_transfer_calldata_encodes_vrs_overload() {
        let mut signature = [0x11u8; 65];
        signature[64] = 27;
        let payload = ExactEvmPayload {
            signature: EvmSignature(signature),
            authorization: ExactEvmPayloadAuthorization {
                from: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap(),
                to: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".parse().unwrap(),
                value: TokenAmount::from(1_000_000u64),
                valid_after: UnixTimestamp(0),
                valid_before: UnixTimestamp(9_999_999_999),
                nonce: HexEncodedNonce([0x22; 32]),
            },
        };
        let calldata = transfer_calldata(&payload);
        // 4-byte selector + 9 words of arguments.
        assert_eq!(calldata.len(), 4 + 9 * 32);
        assert_eq!(
            &calldata[0..4],
            IEIP3009::transferWithAuthorization_1Call::SELECTOR.as_slice()
        );
        // v rides in the last byte of its left-padded word.
        assert_eq!(calldata[4 + 6 * 32 + 31], 27);
    }
}
