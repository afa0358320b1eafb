//! Off-chain verification of payment authorizations.
//!
//! Runs every precondition a payment must satisfy before it is worth
//! submitting on-chain:
//! - recipient and value against the vendor's requirements,
//! - EIP-712 signature recovery against the declared payer,
//! - on-chain balance of the payer,
//! - the `validAfter`/`validBefore` window,
//! - the replay state of the authorization nonce.
//!
//! Everything here is pure except two read-only RPC calls (balance and
//! authorization state) plus an optional `version()` fetch for assets outside
//! the static registry.

use alloy_primitives::{FixedBytes, Signature, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};
use tracing::instrument;

use crate::chain::ChainOps;
use crate::facilitator::PaymentError;
use crate::networks::USDCDeployment;
use crate::timestamp::UnixTimestamp;
use crate::types::{
    EvmAddress, ExactEvmPayload, ExactEvmPayloadAuthorization, PaymentPayload,
    PaymentRequirements, TransferWithAuthorization,
};

/// Runs all preconditions for a successful payment and returns the payer.
///
/// Order: field checks, signature recovery, balance, timing, replay. RPC
/// failures during the balance read surface as errors; a failing
/// `authorizationState` view is logged and skipped, since the settlement
/// engine re-checks it on every failure path anyway.
#[instrument(skip_all, err, fields(
    network = %payload.network,
    payer = %payload.payload.authorization.from,
))]
pub async fn assert_valid_payment<C: ChainOps + ?Sized>(
    chain: &C,
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<EvmAddress, PaymentError> {
    let authorization = &payload.payload.authorization;

    // Field checks against the vendor's requirements.
    if authorization.to != requirements.pay_to {
        return Err(PaymentError::IncompatibleReceivers {
            payload: authorization.to,
            requirements: requirements.pay_to,
        });
    }
    if authorization.value > requirements.max_amount_required {
        return Err(PaymentError::ExcessiveValue);
    }

    // Signature recovery under the token's EIP-712 domain.
    let domain = resolve_domain(chain, payload, requirements).await?;
    assert_signature(&payload.payload, &domain)?;

    // Solvency.
    let balance = chain
        .balance_of(requirements.asset, authorization.from)
        .await
        .map_err(|e| PaymentError::ContractCall(e.to_string()))?;
    let value: U256 = authorization.value.into();
    if balance < value {
        return Err(PaymentError::InsufficientFunds);
    }

    // Validity window.
    assert_time(authorization)?;

    // Replay.
    match chain
        .authorization_state(requirements.asset, authorization.from, authorization.nonce)
        .await
    {
        Ok(true) => return Err(PaymentError::NonceUsed),
        Ok(false) => {}
        Err(e) => {
            // Tokens without the ERC-3009 view cannot answer; settlement
            // re-checks the chain on every failure path.
            tracing::warn!(
                error = %e,
                asset = %requirements.asset,
                "authorizationState unavailable, proceeding without replay pre-check"
            );
        }
    }

    Ok(authorization.from)
}

/// Constructs the EIP-712 domain used to check the payment signature.
///
/// Resolution order for `name`/`version`: the vendor's `extra` metadata, then
/// the static USDC registry when the asset matches it, then the token's own
/// `version()` view.
#[instrument(skip_all, err, fields(network = %payload.network, asset = %requirements.asset))]
async fn resolve_domain<C: ChainOps + ?Sized>(
    chain: &C,
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<Eip712Domain, PaymentError> {
    let usdc = USDCDeployment::by_network(payload.network);
    let name = requirements
        .extra
        .as_ref()
        .and_then(|e| e.get("name")?.as_str().map(str::to_string))
        .unwrap_or_else(|| usdc.eip712.name.clone());
    let version = requirements
        .extra
        .as_ref()
        .and_then(|extra| extra.get("version"))
        .and_then(|version| version.as_str().map(|s| s.to_string()));
    let version = if let Some(extra_version) = version {
        extra_version
    } else if usdc.address() == requirements.asset {
        usdc.eip712.version.clone()
    } else {
        chain
            .eip712_version(requirements.asset)
            .await
            .map_err(|e| PaymentError::ContractCall(e.to_string()))?
    };
    let chain_id = payload.network.chain_id();
    let domain = eip712_domain! {
        name: name,
        version: version,
        chain_id: chain_id,
        verifying_contract: requirements.asset.0,
    };
    Ok(domain)
}

/// Verifies the EIP-712 signature in the payment payload.
///
/// Recovers the signing address and checks it matches the declared `from`.
#[instrument(skip_all, err)]
fn assert_signature(payload: &ExactEvmPayload, domain: &Eip712Domain) -> Result<(), PaymentError> {
    let signature = Signature::from_raw_array(&payload.signature.0)
        .map_err(|e| PaymentError::InvalidSignature(format!("{e}")))?;
    let authorization = &payload.authorization;
    let transfer_with_authorization = TransferWithAuthorization {
        from: authorization.from.0,
        to: authorization.to.0,
        value: authorization.value.into(),
        validAfter: authorization.valid_after.into(),
        validBefore: authorization.valid_before.into(),
        nonce: FixedBytes(authorization.nonce.0),
    };
    let eip712_hash = transfer_with_authorization.eip712_signing_hash(domain);
    let recovered_address = signature
        .recover_address_from_prehash(&eip712_hash)
        .map_err(|e| PaymentError::InvalidSignature(format!("{e}")))?;
    let expected_address = authorization.from.0;
    if recovered_address != expected_address {
        Err(PaymentError::InvalidSignature(format!(
            "Address mismatch: recovered: {recovered_address} expected: {expected_address}"
        )))
    } else {
        Ok(())
    }
}

/// Validates that the current time is within `validAfter..=validBefore`.
#[instrument(skip_all, err)]
fn assert_time(authorization: &ExactEvmPayloadAuthorization) -> Result<(), PaymentError> {
    let now = UnixTimestamp::try_now().map_err(PaymentError::ClockError)?;
    if now.0 < authorization.valid_after.0 {
        return Err(PaymentError::NotYetValid(format!(
            "valid_after {} > now {}",
            authorization.valid_after, now
        )));
    }
    if now.0 > authorization.valid_before.0 {
        return Err(PaymentError::Expired(format!(
            "now {} > valid_before {}",
            now, authorization.valid_before
        )));
    }
    Ok(())
}
