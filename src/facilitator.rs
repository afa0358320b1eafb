//! Core trait defining the verification and settlement interface, and the
//! error type shared by the execution path.
//!
//! Implementors are responsible for validating incoming payment payloads
//! against the declared requirements ([`Facilitator::verify`]) and executing
//! on-chain transfers ([`Facilitator::settle`]).

use std::sync::Arc;
use std::time::SystemTimeError;

use crate::networks::Network;
use crate::types::{
    ErrorReason, EvmAddress, Scheme, SettleRequest, SettleResponse, SupportedResponse,
    VerifyRequest, VerifyResponse, X402Version,
};

/// Asynchronous interface for x402 payment facilitators.
///
/// Payment-level rejections (bad signature, empty wallet, spent nonce, …) are
/// carried inside the response bodies; [`PaymentError`] values returned as
/// `Err` are reserved for conditions the caller cannot act on.
pub trait Facilitator {
    /// Verifies a proposed x402 payment payload against payment requirements.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, PaymentError>> + Send;

    /// Executes an on-chain x402 settlement for a payment payload.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, PaymentError>> + Send;

    /// Lists the payment kinds this facilitator can handle.
    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, PaymentError>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, PaymentError>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, PaymentError>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, PaymentError>> + Send {
        self.as_ref().supported()
    }
}

/// All failure modes of the verification and settlement path.
///
/// Each variant maps onto exactly one wire-level [`ErrorReason`]; the variant
/// payloads carry the detail that goes to logs, never to the caller.
#[derive(thiserror::Error, Debug)]
pub enum PaymentError {
    /// The x402 version of the envelope disagrees with the inner payload.
    #[error("Incompatible x402 version (envelope: {envelope}, payload: {payload})")]
    IncompatibleVersion {
        envelope: X402Version,
        payload: X402Version,
    },
    /// The scheme declared in the payload is incompatible with the requirements.
    #[error("Incompatible payload scheme (payload: {payload}, requirements: {requirements})")]
    IncompatibleScheme {
        payload: Scheme,
        requirements: Scheme,
    },
    /// The network declared in the payload doesn't match the requirements.
    #[error("Incompatible payload network (payload: {payload}, requirements: {requirements})")]
    IncompatibleNetwork {
        payload: Network,
        requirements: Network,
    },
    /// The `pay_to` recipient in the requirements doesn't match the payload `to`.
    #[error("Incompatible payload receivers (payload: {payload}, requirements: {requirements})")]
    IncompatibleReceivers {
        payload: EvmAddress,
        requirements: EvmAddress,
    },
    /// The scheme is advertised but not executable by this service.
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(Scheme),
    /// No provider is configured for the requested network.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(Network),
    /// EIP-712 signature is invalid or recovered a different signer.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    /// The authorization window has not opened yet.
    #[error("Not active yet: {0}")]
    NotYetValid(String),
    /// The authorization window has closed.
    #[error("Expired: {0}")]
    Expired(String),
    /// The payer's on-chain balance is below the authorized value.
    #[error("Insufficient funds")]
    InsufficientFunds,
    /// The payload's `value` exceeds the maximum the vendor asked for.
    #[error("Authorized value exceeds maximum required")]
    ExcessiveValue,
    /// The authorization nonce is already used or canceled on-chain.
    #[error("Authorization nonce already used or canceled")]
    NonceUsed,
    /// No sponsor wallet is willing to fund gas for this payer.
    #[error("No sponsor wallet for payer {0}")]
    NoSponsor(EvmAddress),
    /// A read-only RPC interaction failed.
    #[error("Contract call failed: {0}")]
    ContractCall(String),
    /// The signer oracle rejected or failed the submission.
    #[error("Submission failed: {0}")]
    Submission(String),
    /// The settlement transaction reverted and the nonce stayed unused.
    #[error("Transaction reverted: {0}")]
    Reverted(String),
    /// A deadline elapsed with no receipt and no settled state on-chain.
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Failed to read the system clock.
    #[error("Can not get system clock")]
    ClockError(#[source] SystemTimeError),
}

impl PaymentError {
    /// The wire-level reason this error surfaces as.
    pub fn reason(&self) -> ErrorReason {
        match self {
            PaymentError::IncompatibleVersion { .. }
            | PaymentError::IncompatibleReceivers { .. }
            | PaymentError::InvalidSignature(_)
            | PaymentError::ExcessiveValue => ErrorReason::InvalidAuthorization,
            PaymentError::IncompatibleScheme { .. } => ErrorReason::SchemeMismatch,
            PaymentError::IncompatibleNetwork { .. } | PaymentError::UnsupportedNetwork(_) => {
                ErrorReason::NetworkMismatch
            }
            PaymentError::UnsupportedScheme(_) => ErrorReason::UnsupportedScheme,
            PaymentError::NotYetValid(_) => ErrorReason::NotYetValid,
            PaymentError::Expired(_) => ErrorReason::Expired,
            PaymentError::InsufficientFunds => ErrorReason::InsufficientBalance,
            PaymentError::NonceUsed => ErrorReason::NonceUsed,
            PaymentError::NoSponsor(_) => ErrorReason::NoSponsor,
            PaymentError::ContractCall(_) | PaymentError::Submission(_) => {
                ErrorReason::SubmissionError
            }
            PaymentError::Reverted(_) => ErrorReason::Reverted,
            PaymentError::Timeout(_) => ErrorReason::Timeout,
            PaymentError::ClockError(_) => ErrorReason::Internal,
        }
    }

    /// Whether this error is a verdict on the payment itself rather than an
    /// operational fault. Payment verdicts ride in a `200` response body.
    pub fn is_payment_verdict(&self) -> bool {
        !matches!(self, PaymentError::ClockError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping_is_stable() {
        assert_eq!(
            PaymentError::InsufficientFunds.reason(),
            ErrorReason::InsufficientBalance
        );
        assert_eq!(PaymentError::NonceUsed.reason(), ErrorReason::NonceUsed);
        assert_eq!(
            PaymentError::IncompatibleScheme {
                payload: Scheme::Exact,
                requirements: Scheme::Deferred,
            }
            .reason(),
            ErrorReason::SchemeMismatch
        );
        assert_eq!(
            PaymentError::Reverted("status 0".into()).reason(),
            ErrorReason::Reverted
        );
    }
}
