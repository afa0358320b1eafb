//! Type definitions for the x402 protocol as used by this facilitator.
//!
//! This mirrors the structures and validation logic from the official x402 SDKs.
//! The key objects are `PaymentPayload`, `PaymentRequirements`, `VerifyResponse`,
//! and `SettleResponse`, which encode payment intent, authorization, and the
//! result of verification/settlement, plus the V2 receipt returned by `/settle`.
//!
//! This module supports ERC-3009 style authorization for tokens (EIP-712 typed
//! signatures), and provides serialization logic compatible with external clients.

use alloy_primitives::{Address, U256, hex};
use alloy_sol_types::sol;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use url::Url;

use crate::chain::chain_id::ChainId;
use crate::networks::Network;
use crate::timestamp::UnixTimestamp;

/// Maximum number of decimal digits accepted for an atomic token amount.
pub const MAX_ATOMIC_DIGITS: usize = 78;

/// Protocol versions accepted by this facilitator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X402Version {
    V1,
    V2,
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported x402Version: {0}")]
pub struct X402VersionError(pub u8);

impl TryFrom<u8> for X402Version {
    type Error = X402VersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(X402Version::V1),
            2 => Ok(X402Version::V2),
            _ => Err(X402VersionError(value)),
        }
    }
}

impl From<X402Version> for u8 {
    fn from(value: X402Version) -> Self {
        match value {
            X402Version::V1 => 1,
            X402Version::V2 => 2,
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8((*self).into())
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        X402Version::try_from(num).map_err(Error::custom)
    }
}

/// Enumerates payment schemes.
///
/// `exact` settles an ERC-3009 authorization for the exact signed value.
/// `deferred` is advertised only for chains with an escrow deployment; its
/// execution path lives outside this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
    Deferred,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Exact => "exact",
            Scheme::Deferred => "deferred",
        };
        write!(f, "{s}")
    }
}

/// Wrapper around [`Address`] providing lowercase display/serialization.
///
/// Addresses are lowercased on ingress; equality is byte-wise and therefore
/// case-insensitive with respect to the wire form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EvmAddress(pub Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<Address> for EvmAddress {
    fn from(address: Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl std::str::FromStr for EvmAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EvmAddress(s.parse::<Address>()?))
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Address>()
            .map(EvmAddress)
            .map_err(|_| Error::custom("Invalid EVM address"))
    }
}

/// A 65-byte ECDSA signature over EIP-712 typed data, `r ‖ s ‖ v`.
///
/// Serialized as a 0x-prefixed hex string of 130 characters. The recovery byte
/// is normalized to `{27, 28}` on ingress: some signers emit `{0, 1}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl EvmSignature {
    /// Split into the `(v, r, s)` triple used by the on-chain
    /// `transferWithAuthorization(..., uint8 v, bytes32 r, bytes32 s)` overload.
    pub fn vrs(&self) -> (u8, [u8; 32], [u8; 32]) {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&self.0[0..32]);
        s.copy_from_slice(&self.0[32..64]);
        (self.0[64], r, s)
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("Invalid regex for EVM signature")
        });

        if !SIG_REGEX.is_match(&s) {
            return Err(Error::custom(
                "Invalid EVM signature format: must be 0x-prefixed and 130 hex chars",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| Error::custom("Failed to decode EVM signature hex string"))?;
        let mut array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| Error::custom("Signature must be exactly 65 bytes"))?;
        // Normalize the recovery id: 0/1 -> 27/28.
        if array[64] < 27 {
            array[64] += 27;
        }
        if array[64] != 27 && array[64] != 28 {
            return Err(Error::custom("Signature recovery byte out of range"));
        }
        Ok(EvmSignature(array))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte client-chosen nonce, hex-encoded with 0x prefix.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid nonce regex"));

        if !NONCE_REGEX.is_match(&s) {
            return Err(Error::custom("Invalid nonce format"));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| Error::custom("Invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::custom("Invalid length for nonce"))?;
        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl Display for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// An amount of atomic token units (USDC uses 6 decimals).
///
/// Parsed from a decimal string to prevent precision loss in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenAmount(pub U256);

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || s.len() > MAX_ATOMIC_DIGITS {
            return Err(Error::custom("Invalid atomic amount length"));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::custom(
                "Amount must be a non-negative decimal integer",
            ));
        }
        U256::from_str_radix(&s, 10)
            .map(TokenAmount)
            .map_err(|_| Error::custom("Amount does not fit uint256"))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

/// EIP-712 structured data for an ERC-3009 authorization.
/// Defines who can transfer how much USDC and when.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayloadAuthorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// Full payload required to settle an ERC-3009 transfer:
/// the signature and the EIP-712 struct it covers.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: EvmSignature,
    pub authorization: ExactEvmPayloadAuthorization,
}

/// A signed request to transfer a specific amount of funds on-chain.
/// Includes the scheme, network, and signed payload contents.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactEvmPayload,
}

/// Metadata of a known token deployment, including its EIP-712 domain fields.
#[derive(Debug, Clone)]
pub struct TokenAsset {
    pub address: EvmAddress,
    pub network: Network,
    pub decimals: u8,
    pub eip712: TokenAssetEip712,
}

/// EIP-712 domain `name` and `version` of a token deployment.
#[derive(Debug, Clone)]
pub struct TokenAssetEip712 {
    pub name: String,
    pub version: String,
}

/// Requirements set by the vendor for an acceptable payment.
///
/// The facilitator never invents these; they arrive alongside the payload and
/// are validated against it.
#[derive(Debug, Serialize, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: TokenAmount,
    pub resource: Url,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: EvmAddress,
    pub max_timeout_seconds: u64,
    pub asset: EvmAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Request body shared by `POST /verify` and `POST /settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub x402_version: X402Version,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Request body for settlement; identical in shape to [`VerifyRequest`].
pub type SettleRequest = VerifyRequest;

/// A 32-byte EVM transaction hash, encoded as a 0x-prefixed hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHash(pub [u8; 32]);

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

        if !TX_HASH_REGEX.is_match(&s) {
            return Err(Error::custom("Invalid transaction hash format"));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| Error::custom("Invalid hex in transaction hash"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::custom("Transaction hash must be exactly 32 bytes"))?;
        Ok(TransactionHash(array))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<alloy_primitives::B256> for TransactionHash {
    fn from(value: alloy_primitives::B256) -> Self {
        TransactionHash(value.0)
    }
}

/// Wire-level failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Field check, signature recovery, or domain mismatch.
    InvalidAuthorization,
    /// On-chain balance below the authorized value.
    InsufficientBalance,
    /// `validAfter` is in the future.
    NotYetValid,
    /// `validBefore` has passed.
    Expired,
    /// The nonce is already used or canceled on-chain.
    NonceUsed,
    /// No sponsor wallet will fund gas for this payer.
    NoSponsor,
    /// Signer oracle or RPC failure that survived reconciliation.
    SubmissionError,
    /// Receipt status 0 and the nonce remained unused on-chain.
    Reverted,
    /// A deadline elapsed and reconciliation found no settled state.
    Timeout,
    /// Per-minute request cap exceeded.
    RateLimited,
    /// Monthly transaction budget exceeded.
    QuotaExceeded,
    /// Payload and requirements resolve to different chains.
    NetworkMismatch,
    /// Payload and requirements declare different schemes.
    SchemeMismatch,
    /// The scheme is not executable by this facilitator.
    UnsupportedScheme,
    /// Anything else.
    Internal,
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Leverage serde to get the snake_case variant name.
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json.trim_matches('"'))
    }
}

/// Returned after verifying a `PaymentPayload` against `PaymentRequirements`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorReason>,
    pub payer: Option<EvmAddress>,
}

impl VerifyResponse {
    pub fn valid(payer: EvmAddress) -> Self {
        VerifyResponse {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer),
        }
    }

    pub fn invalid(reason: ErrorReason, payer: Option<EvmAddress>) -> Self {
        VerifyResponse {
            is_valid: false,
            invalid_reason: Some(reason),
            payer,
        }
    }
}

/// Terminal outcome of a settlement attempt, as produced by the settlement
/// engine. The HTTP boundary wraps this into a [`SettleReceipt`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    pub payer: EvmAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHash>,
    pub network: Network,
}

/// The V2 settlement receipt returned by `POST /settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleReceipt {
    pub version: String,
    pub request_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub network: ReceiptNetwork,
    pub payment: ReceiptPayment,
    pub settlement: ReceiptSettlement,
}

/// Network section of a settlement receipt: all three naming forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptNetwork {
    pub name: String,
    pub chain_id: u64,
    pub caip2: ChainId,
}

impl From<Network> for ReceiptNetwork {
    fn from(network: Network) -> Self {
        ReceiptNetwork {
            name: network.name().to_string(),
            chain_id: network.chain_id(),
            caip2: network.caip2(),
        }
    }
}

/// Payment section of a settlement receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPayment {
    pub scheme: Scheme,
    pub payer: EvmAddress,
    pub amount: TokenAmount,
    pub asset: EvmAddress,
}

/// Settlement section of a settlement receipt.
///
/// `transaction` may be `null` even on success: when the chain reports the
/// authorization as consumed but the transfer log fell outside the recovery
/// scan window, the chain remains the ledger of record and the payment is
/// reported settled without a hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSettlement {
    pub success: bool,
    pub transaction: Option<TransactionHash>,
    pub block_explorer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
}

/// One payment method supported by this facilitator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
}

/// Response of `GET /supported`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

/// Body of a `402 Payment Required` rejection emitted by the quota gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub error: ErrorReason,
    pub used: u64,
    pub limit: i64,
    pub period_end: chrono::DateTime<chrono::Utc>,
    pub accepts: Vec<PaymentRequirements>,
}

/// A simple error structure returned on unexpected or fatal server errors.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

sol!(
    /// Solidity-compatible struct definition for ERC-3009 `transferWithAuthorization`.
    ///
    /// This matches the EIP-3009 format used in EIP-712 typed data:
    /// it defines the authorization to transfer tokens from `from` to `to`
    /// for a specific `value`, valid only between `validAfter` and `validBefore`
    /// and identified by a unique `nonce`.
    ///
    /// This struct is primarily used to reconstruct the typed data domain/message
    /// when verifying a client's signature.
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_json() -> serde_json::Value {
        serde_json::json!({
            "x402Version": 2,
            "scheme": "exact",
            "network": "base-sepolia",
            "payload": {
                "signature": format!("0x{}", "11".repeat(64) + "1b"),
                "authorization": {
                    "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                    "value": "1000000",
                    "validAfter": "0",
                    "validBefore": "9999999999",
                    "nonce": format!("0x{}", "22".repeat(32)),
                }
            }
        })
    }

    #[test]
    fn test_payment_payload_roundtrip() {
        let payload: PaymentPayload = serde_json::from_value(payload_json()).unwrap();
        let encoded = serde_json::to_value(&payload).unwrap();
        let decoded: PaymentPayload = serde_json::from_value(encoded.clone()).unwrap();
        assert_eq!(serde_json::to_value(&decoded).unwrap(), encoded);
        assert_eq!(payload.network, Network::BaseSepolia);
        assert_eq!(payload.payload.authorization.value, TokenAmount::from(1_000_000u64));
    }

    #[test]
    fn test_payload_accepts_caip2_network() {
        let mut json = payload_json();
        json["network"] = serde_json::json!("eip155:84532");
        let payload: PaymentPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.network, Network::BaseSepolia);
        // Serialization always emits the legacy name.
        let encoded = serde_json::to_value(&payload).unwrap();
        assert_eq!(encoded["network"], "base-sepolia");
    }

    #[test]
    fn test_signature_v_normalization() {
        let raw = format!("\"0x{}00\"", "11".repeat(64));
        let sig: EvmSignature = serde_json::from_str(&raw).unwrap();
        assert_eq!(sig.0[64], 27);
        let raw = format!("\"0x{}1c\"", "11".repeat(64));
        let sig: EvmSignature = serde_json::from_str(&raw).unwrap();
        assert_eq!(sig.0[64], 28);
        let raw = format!("\"0x{}05\"", "11".repeat(64));
        assert!(serde_json::from_str::<EvmSignature>(&raw).is_err());
    }

    #[test]
    fn test_signature_vrs_split() {
        let mut bytes = [0u8; 65];
        bytes[0] = 0xaa;
        bytes[32] = 0xbb;
        bytes[64] = 27;
        let sig = EvmSignature(bytes);
        let (v, r, s) = sig.vrs();
        assert_eq!(v, 27);
        assert_eq!(r[0], 0xaa);
        assert_eq!(s[0], 0xbb);
    }

    #[test]
    fn test_token_amount_rejects_garbage() {
        assert!(serde_json::from_str::<TokenAmount>("\"\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"-5\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"1.5\"").is_err());
        let ok: TokenAmount = serde_json::from_str("\"1000000\"").unwrap();
        assert_eq!(ok, TokenAmount::from(1_000_000u64));
    }

    #[test]
    fn test_error_reason_wire_names() {
        assert_eq!(ErrorReason::NonceUsed.to_string(), "nonce_used");
        assert_eq!(ErrorReason::QuotaExceeded.to_string(), "quota_exceeded");
        assert_eq!(
            serde_json::to_string(&ErrorReason::NetworkMismatch).unwrap(),
            "\"network_mismatch\""
        );
    }

    #[test]
    fn test_address_lowercased_on_egress() {
        let address: EvmAddress = "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E".parse().unwrap();
        assert_eq!(
            address.to_string(),
            "0xb97ef9ef8734c71904d8002f8b6bc66dd9c48a6e"
        );
    }
}
