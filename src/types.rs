//! LuckyCoin Wallet - Type Definitions
//!
//! Shared types for the wallet session and transaction lifecycle
//! controller: the session read model, transaction intents and records,
//! token amounts, and the events that drive the session state machine.

use alloy_primitives::utils::{format_ether, parse_ether, UnitsError};
use alloy_primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Chain identifier of the target ledger network.
pub type ChainId = u64;

// ─── Session ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Active,
}

/// The derived read model of the wallet session.
///
/// Invariant: `account` and `chain_id` are `Some` if and only if
/// `status` is `Active`. All constructors preserve this; the session
/// store never publishes a partially active snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub status: SessionStatus,
    pub account: Option<Address>,
    pub chain_id: Option<ChainId>,
    /// Last known LKT balance as an exact decimal string, if read.
    pub balance: Option<String>,
}

impl Session {
    pub fn disconnected() -> Self {
        Session {
            status: SessionStatus::Disconnected,
            account: None,
            chain_id: None,
            balance: None,
        }
    }

    pub fn connecting() -> Self {
        Session {
            status: SessionStatus::Connecting,
            account: None,
            chain_id: None,
            balance: None,
        }
    }

    pub fn active(account: Address, chain_id: ChainId) -> Self {
        Session {
            status: SessionStatus::Active,
            account: Some(account),
            chain_id: Some(chain_id),
            balance: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

// ─── Token Amounts ───────────────────────────────────────────────

/// An LKT token amount, held exactly in wei-scale units (18 decimals).
///
/// Construction parses a decimal string with `parse_ether`, so no
/// precision is lost; display formats back with `format_ether`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenAmount(U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256::ZERO);

    /// Parse an exact decimal LKT amount, e.g. `"2"` or `"0.000001"`.
    pub fn from_lkt(s: &str) -> Result<Self, UnitsError> {
        parse_ether(s).map(TokenAmount)
    }

    /// Wrap a raw wei-scale amount (as returned by `balanceOf`).
    pub fn from_wei(wei: U256) -> Self {
        TokenAmount(wei)
    }

    pub fn wei(&self) -> U256 {
        self.0
    }

    /// The native (ETH) value that purchases this amount at the fixed
    /// 1 ETH = `LKT_PER_ETH` LKT rate.
    ///
    /// Returns `None` when the division would lose precision; callers
    /// must treat that as an invalid amount, never round.
    pub fn native_value(&self) -> Option<U256> {
        let rate = U256::from(crate::contract::LKT_PER_ETH);
        if self.0 % rate != U256::ZERO {
            return None;
        }
        Some(self.0 / rate)
    }

    /// Exact decimal string form, e.g. `"2.000000000000000000"`.
    pub fn to_decimal_string(&self) -> String {
        format_ether(self.0)
    }
}

// ─── Transaction Intents & Records ───────────────────────────────

/// What the caller is asking the contract to do.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IntentKind {
    /// Purchase `amount` LKT with native value.
    BuyToken(TokenAmount),
    /// Purchase one randomized blessing message.
    BuyMessage,
}

/// An immutable description of a requested transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionIntent {
    pub kind: IntentKind,
    pub requested_at: DateTime<Utc>,
}

impl TransactionIntent {
    pub fn new(kind: IntentKind) -> Self {
        TransactionIntent {
            kind,
            requested_at: Utc::now(),
        }
    }
}

/// Lifecycle phase of a transaction record. Moves forward only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxPhase {
    Created,
    Submitted,
    PendingConfirmation,
    Confirmed,
    Failed(WalletError),
}

impl TxPhase {
    /// Position in the forward-only phase order. `Confirmed` and
    /// `Failed` share the terminal rank.
    pub fn rank(&self) -> u8 {
        match self {
            TxPhase::Created => 0,
            TxPhase::Submitted => 1,
            TxPhase::PendingConfirmation => 2,
            TxPhase::Confirmed | TxPhase::Failed(_) => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxPhase::Confirmed | TxPhase::Failed(_))
    }
}

/// The pipeline's record of a single submitted (or failed) intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub intent: TransactionIntent,
    pub hash: Option<TxHash>,
    pub phase: TxPhase,
    /// Intent-specific result fetched after confirmation, e.g. the
    /// blessing message text for `BuyMessage`.
    pub result_payload: Option<String>,
}

impl TransactionRecord {
    pub fn created(intent: TransactionIntent) -> Self {
        TransactionRecord {
            intent,
            hash: None,
            phase: TxPhase::Created,
            result_payload: None,
        }
    }
}

// ─── Receipts ────────────────────────────────────────────────────

/// Authoritative outcome read from a transaction receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

// ─── Events ──────────────────────────────────────────────────────

/// Out-of-band change notification from the wallet provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The active account changed; `None` means the provider lost the
    /// account entirely (session must drop to Disconnected).
    AccountsChanged(Option<Address>),
    ChainChanged(ChainId),
}

/// One entry on the ordered event stream the session store consumes.
/// Every suspend point completes by sending one of these.
#[derive(Debug)]
pub enum SessionEvent {
    /// A connect attempt has started.
    ConnectRequested,
    /// A connect attempt succeeded.
    ConnectCompleted { account: Address, chain_id: ChainId },
    /// A connect attempt failed; the session drops back to Disconnected.
    ConnectFailed,
    /// The caller disconnected.
    DisconnectRequested,
    /// The provider reported an out-of-band change.
    Provider(ProviderEvent),
    /// A balance read finished. `generation` identifies the trigger so
    /// stale completions can be discarded.
    BalanceRead {
        generation: u64,
        account: Address,
        result: Result<TokenAmount, WalletError>,
    },
    /// Re-read the balance for the active account (post-confirmation).
    RefreshBalance,
}

// ─── Log Level ───────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    pub rpc_url: String,
    pub contract_address: String,
    pub chain_id: ChainId,
    pub keystore_path: String,
    pub log_level: LogLevel,
}

/// Returns the default `WalletConfig` targeting Sepolia and the
/// deployed LuckyCoin contract.
pub fn default_config() -> WalletConfig {
    WalletConfig {
        rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
        contract_address: format!("{:?}", crate::contract::CONTRACT_ADDRESS),
        chain_id: crate::contract::REQUIRED_CHAIN_ID,
        keystore_path: "~/.luckycoin/wallet.json".to_string(),
        log_level: LogLevel::Info,
    }
}

// ─── Display Helpers ─────────────────────────────────────────────

/// Shorten a checksummed address for display: `0x512C...a8BbD1`.
pub fn short_address(addr: &Address) -> String {
    let s = addr.to_checksum(None);
    format!("{}...{}", &s[..6], &s[s.len() - 6..])
}
