//! Error taxonomy and classification.
//!
//! A closed error enum for every user-facing failure kind, plus the one
//! classification function that maps raw provider error signals onto it.
//! Downstream code matches on `WalletError` and never re-inspects raw
//! provider error shapes.

use thiserror::Error;

use crate::types::ChainId;

/// Typed error enum for wallet operations, allowing callers to match on
/// specific failure modes instead of inspecting opaque provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    /// No injected wallet provider (or local keystore) is available.
    #[error("no wallet provider found: {0}")]
    NoProviderFound(String),

    /// The user declined the authorization or signing prompt.
    #[error("the user rejected the request")]
    UserRejected,

    /// The provider could not switch to the requested chain.
    #[error("failed to switch to the requested chain: {0}")]
    ChainSwitchFailed(String),

    /// The active session chain differs from the required chain.
    #[error("session is on chain {session}, but chain {required} is required")]
    WrongChain { session: ChainId, required: ChainId },

    /// A transaction was submitted without an active session.
    #[error("no active wallet session")]
    NotConnected,

    /// The provider reported insufficient funds for the transaction.
    #[error("insufficient funds for this transaction")]
    InsufficientFunds,

    /// Gas estimation failed; the transaction would likely not succeed.
    #[error("gas estimation failed")]
    GasEstimationFailed,

    /// Any other provider-level submission failure.
    #[error("transaction submission failed: {0}")]
    SubmissionError(String),

    /// The transaction was included but reverted on-chain.
    #[error("transaction reverted on-chain")]
    OnChainRevert,

    /// The receipt check itself failed; the hash may be re-checked.
    #[error("could not check transaction status: {0}")]
    ConfirmationCheckError(String),

    /// A read-only remote call failed.
    #[error("remote call failed: {0}")]
    RemoteCallFailed(String),

    /// An equivalent intent is already in flight for this account.
    #[error("an equivalent transaction is already in flight")]
    DuplicateIntent,
}

/// Raw error signal surfaced by the wallet provider, before
/// classification. Mirrors the provider's numeric code plus free-text
/// message; only `classify_submission`/`classify_read` may inspect it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("provider error (code {code:?}): {message}")]
pub struct ProviderFailure {
    pub code: Option<i64>,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        ProviderFailure {
            code,
            message: message.into(),
        }
    }
}

// ─── Classification Table ────────────────────────────────────────

/// EIP-1193 code the provider returns when the user rejects a prompt.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Internal JSON-RPC error code; in practice, insufficient funds.
pub const INTERNAL_RPC_CODE: i64 = -32603;

/// Message marker for gas estimation failures.
pub const GAS_MARKER: &str = "gas";

/// Classify a raw provider failure from a state-changing submission.
///
/// Table order matters: stable codes first, then the message marker,
/// then the generic fallback. Nothing is ever swallowed.
pub fn classify_submission(raw: &ProviderFailure) -> WalletError {
    match raw.code {
        Some(USER_REJECTED_CODE) => WalletError::UserRejected,
        Some(INTERNAL_RPC_CODE) => WalletError::InsufficientFunds,
        _ if raw.message.to_lowercase().contains(GAS_MARKER) => WalletError::GasEstimationFailed,
        _ => WalletError::SubmissionError(raw.message.clone()),
    }
}

/// Classify a raw provider failure from a read-only call.
pub fn classify_read(raw: &ProviderFailure) -> WalletError {
    WalletError::RemoteCallFailed(raw.message.clone())
}
