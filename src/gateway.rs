//! Provider Gateway
//!
//! Wraps the wallet provider behind the `WalletProvider` trait and
//! tracks local authorization state. The live implementation is backed
//! by a local keystore (`~/.luckycoin/wallet.json`) plus a JSON-RPC
//! endpoint; an interactive confirmation prompt stands in for the
//! wallet's approval UI. Raw provider failures are surfaced untouched;
//! only the transaction pipeline classifies them.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::primitives::utils::format_ether;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::{RpcError, TransportErrorKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use colored::Colorize;
use dialoguer::Confirm;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::error::{ProviderFailure, WalletError};
use crate::types::{ChainId, ProviderEvent, ReceiptStatus};

/// Interval between receipt polls while waiting for inclusion.
const INCLUSION_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Side-effect notice returned by `disconnect`. Clearing local state
/// cannot revoke the wallet's own site authorization; that is a user
/// action outside this system's control.
pub const DISCONNECT_NOTICE: &str = "Local authorization cleared. The wallet itself may still \
     list this application as connected; remove it from the wallet's connected sites to fully \
     revoke access.";

// ─── Provider Trait ─────────────────────────────────────────────────

/// The seam between the session/transaction machinery and whatever
/// wallet actually signs. Authorization outcomes are already typed
/// (they are the gateway's contract); transaction and read failures
/// stay raw for the pipeline to classify.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Request authorization for `chain`, prompting the user.
    async fn authorize(&self, chain: ChainId) -> Result<(Address, ChainId), WalletError>;

    /// Restore a previously authorized session without prompting.
    /// `Ok(None)` means no prior authorization; that is not an error.
    async fn restore(&self) -> Result<Option<(Address, ChainId)>, WalletError>;

    /// Clear local authorization state.
    async fn deauthorize(&self);

    /// Read-only contract call. Idempotent, side-effect free.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderFailure>;

    /// Sign and broadcast a state-changing transaction.
    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<TxHash, ProviderFailure>;

    /// Resolve on the first network inclusion event for `hash`.
    async fn wait_for_inclusion(&self, hash: TxHash) -> Result<(), ProviderFailure>;

    /// One authoritative receipt read. `Ok(None)` means the node does
    /// not (or no longer) knows the receipt.
    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<ReceiptStatus>, ProviderFailure>;

    /// Stream of out-of-band account/chain change notifications.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent>;
}

// ─── Keystore ───────────────────────────────────────────────────────

/// On-disk keystore representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoreData {
    /// Hex-encoded private key with "0x" prefix.
    pub private_key: String,
    /// ISO-8601 timestamp of when this keystore was created.
    pub created_at: String,
    /// ISO-8601 timestamp of the last authorization, if any. Cleared
    /// on disconnect; presence is what `restore` checks for.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub authorized_at: Option<String>,
}

/// Load the keystore file, if present.
pub fn load_keystore(path: &Path) -> Result<Option<KeystoreData>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).context("Failed to read keystore file")?;
    let data: KeystoreData =
        serde_json::from_str(&contents).context("Failed to parse keystore JSON")?;
    Ok(Some(data))
}

/// Persist the keystore with owner-only permissions.
pub fn save_keystore(path: &Path, data: &KeystoreData) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir).context("Failed to create keystore directory")?;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
                .context("Failed to set directory permissions")?;
        }
    }
    let json = serde_json::to_string_pretty(data).context("Failed to serialize keystore")?;
    fs::write(path, &json).context("Failed to write keystore file")?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .context("Failed to set keystore file permissions")?;
    Ok(())
}

/// Generate a fresh random keystore and persist it.
pub fn create_keystore(path: &Path) -> Result<(PrivateKeySigner, KeystoreData)> {
    let signer = PrivateKeySigner::random();
    let private_key_bytes = signer.credential().to_bytes();
    let data = KeystoreData {
        private_key: format!("0x{}", hex::encode(private_key_bytes)),
        created_at: Utc::now().to_rfc3339(),
        authorized_at: None,
    };
    save_keystore(path, &data)?;
    Ok((signer, data))
}

fn parse_signer(data: &KeystoreData) -> Result<PrivateKeySigner> {
    data.private_key
        .parse()
        .context("Failed to parse private key from keystore")
}

// ─── Keystore-Backed Provider ───────────────────────────────────────

/// Live `WalletProvider` backed by a local keystore and a JSON-RPC
/// endpoint. The signing prompt is a terminal confirmation.
pub struct KeystoreProvider {
    rpc_url: String,
    keystore_path: PathBuf,
    signer: Mutex<Option<PrivateKeySigner>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProviderEvent>>>,
}

impl KeystoreProvider {
    pub fn new(rpc_url: impl Into<String>, keystore_path: impl Into<PathBuf>) -> Self {
        KeystoreProvider {
            rpc_url: rpc_url.into(),
            keystore_path: keystore_path.into(),
            signer: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn read_provider(&self) -> Result<impl Provider, ProviderFailure> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ProviderFailure::new(None, format!("invalid RPC URL: {e}")))?;
        Ok(ProviderBuilder::new().connect_http(url))
    }

    async fn rpc_chain_id(&self) -> Result<ChainId, ProviderFailure> {
        let provider = self.read_provider()?;
        provider.get_chain_id().await.map_err(failure_from_rpc)
    }

    fn load_or_create_signer(&self) -> Result<(PrivateKeySigner, KeystoreData), WalletError> {
        match load_keystore(&self.keystore_path) {
            Ok(Some(data)) => {
                let signer = parse_signer(&data)
                    .map_err(|e| WalletError::NoProviderFound(e.to_string()))?;
                Ok((signer, data))
            }
            Ok(None) => {
                info!("No keystore found, generating a new wallet");
                create_keystore(&self.keystore_path)
                    .map_err(|e| WalletError::NoProviderFound(e.to_string()))
            }
            Err(e) => Err(WalletError::NoProviderFound(e.to_string())),
        }
    }
}

#[async_trait]
impl WalletProvider for KeystoreProvider {
    async fn authorize(&self, chain: ChainId) -> Result<(Address, ChainId), WalletError> {
        let (signer, mut data) = self.load_or_create_signer()?;
        let address = signer.address();

        let approved = Confirm::new()
            .with_prompt(format!(
                "  {} Authorize LuckyCoin to use wallet {} on chain {}?",
                "\u{2192}".cyan(),
                crate::types::short_address(&address).white(),
                chain
            ))
            .default(true)
            .interact()
            .map_err(|_| WalletError::UserRejected)?;
        if !approved {
            return Err(WalletError::UserRejected);
        }

        // The RPC endpoint is fixed, so "switching" means verifying it
        // actually serves the requested chain.
        let actual = self
            .rpc_chain_id()
            .await
            .map_err(|e| WalletError::ChainSwitchFailed(e.message))?;
        if actual != chain {
            return Err(WalletError::ChainSwitchFailed(format!(
                "endpoint serves chain {actual}, requested {chain}"
            )));
        }

        data.authorized_at = Some(Utc::now().to_rfc3339());
        if let Err(e) = save_keystore(&self.keystore_path, &data) {
            warn!("Failed to persist authorization: {e}");
        }

        *self.signer.lock().unwrap() = Some(signer);
        Ok((address, chain))
    }

    async fn restore(&self) -> Result<Option<(Address, ChainId)>, WalletError> {
        let data = match load_keystore(&self.keystore_path) {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(None),
            Err(e) => return Err(WalletError::NoProviderFound(e.to_string())),
        };
        if data.authorized_at.is_none() {
            return Ok(None);
        }

        let signer =
            parse_signer(&data).map_err(|e| WalletError::NoProviderFound(e.to_string()))?;
        let address = signer.address();

        // Report the chain the endpoint actually serves; a mismatch
        // against the required chain is the pipeline's concern.
        let chain = self
            .rpc_chain_id()
            .await
            .map_err(|e| WalletError::RemoteCallFailed(e.message))?;

        *self.signer.lock().unwrap() = Some(signer);
        Ok(Some((address, chain)))
    }

    async fn deauthorize(&self) {
        *self.signer.lock().unwrap() = None;
        match load_keystore(&self.keystore_path) {
            Ok(Some(mut data)) => {
                data.authorized_at = None;
                if let Err(e) = save_keystore(&self.keystore_path, &data) {
                    warn!("Failed to clear keystore authorization: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read keystore during disconnect: {e}"),
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderFailure> {
        let provider = self.read_provider()?;
        let tx = TransactionRequest::default().to(to).input(data.into());
        provider.call(tx).await.map_err(failure_from_rpc)
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<TxHash, ProviderFailure> {
        let signer = self
            .signer
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderFailure::new(None, "wallet is not authorized"))?;

        // The signing prompt. Declining maps to the standard rejection
        // code so classification matches an injected wallet's behavior.
        let approved = Confirm::new()
            .with_prompt(format!(
                "  {} Sign transaction to {} (value: {} ETH)?",
                "\u{2192}".cyan(),
                crate::types::short_address(&to).white(),
                format_ether(value)
            ))
            .default(true)
            .interact()
            .unwrap_or(false);
        if !approved {
            return Err(ProviderFailure::new(
                Some(crate::error::USER_REJECTED_CODE),
                "user rejected transaction signing",
            ));
        }

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ProviderFailure::new(None, format!("invalid RPC URL: {e}")))?;
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

        let tx = TransactionRequest::default()
            .to(to)
            .input(data.into())
            .value(value);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(failure_from_rpc)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_inclusion(&self, hash: TxHash) -> Result<(), ProviderFailure> {
        let provider = self.read_provider()?;
        loop {
            let receipt = provider
                .get_transaction_receipt(hash)
                .await
                .map_err(failure_from_rpc)?;
            if receipt.is_some() {
                return Ok(());
            }
            debug!("Transaction {hash:?} not yet included, polling again");
            sleep(INCLUSION_POLL_INTERVAL).await;
        }
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<ReceiptStatus>, ProviderFailure> {
        let provider = self.read_provider()?;
        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(failure_from_rpc)?;
        Ok(receipt.map(|r| {
            if r.status() {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Reverted
            }
        }))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

/// Map an alloy RPC error onto the raw provider failure shape,
/// preserving the JSON-RPC error code when one is present.
fn failure_from_rpc(e: RpcError<TransportErrorKind>) -> ProviderFailure {
    if let Some(payload) = e.as_error_resp() {
        ProviderFailure::new(Some(payload.code), payload.message.to_string())
    } else {
        ProviderFailure::new(None, e.to_string())
    }
}

// ─── Gateway ────────────────────────────────────────────────────────

/// One gateway instance is constructed at application start and
/// injected into the session store and transaction pipeline.
pub struct ProviderGateway {
    provider: Arc<dyn WalletProvider>,
    authorized: Mutex<Option<(Address, ChainId)>>,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        ProviderGateway {
            provider,
            authorized: Mutex::new(None),
        }
    }

    /// Request wallet authorization for `chain`.
    pub async fn connect(&self, chain: ChainId) -> Result<(Address, ChainId), WalletError> {
        let (account, chain) = self.provider.authorize(chain).await?;
        info!("Wallet connected: {} on chain {}", account, chain);
        *self.authorized.lock().unwrap() = Some((account, chain));
        Ok((account, chain))
    }

    /// Attempt to restore a prior session without prompting. Failures
    /// are logged and treated as "no prior session", never surfaced.
    pub async fn connect_silently(&self) -> Option<(Address, ChainId)> {
        match self.provider.restore().await {
            Ok(Some((account, chain))) => {
                debug!("Restored prior session: {} on chain {}", account, chain);
                *self.authorized.lock().unwrap() = Some((account, chain));
                Some((account, chain))
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Failed to connect eagerly: {e}");
                None
            }
        }
    }

    /// Clear local authorization. Returns the side-effect notice about
    /// wallet-side revocation being outside this system's control.
    pub async fn disconnect(&self) -> &'static str {
        self.provider.deauthorize().await;
        *self.authorized.lock().unwrap() = None;
        info!("Wallet disconnected");
        DISCONNECT_NOTICE
    }

    pub fn current_account(&self) -> Option<Address> {
        self.authorized.lock().unwrap().map(|(account, _)| account)
    }

    pub fn current_chain(&self) -> Option<ChainId> {
        self.authorized.lock().unwrap().map(|(_, chain)| chain)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent> {
        self.provider.subscribe()
    }
}

// ─── Test Support ───────────────────────────────────────────────────
