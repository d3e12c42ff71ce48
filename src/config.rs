//! Wallet Configuration
//!
//! Loads and saves the wallet configuration from `~/.luckycoin/luckycoin.json`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::types::{default_config, WalletConfig};

/// Directory name under the user's home for all wallet data.
const LUCKYCOIN_DIR_NAME: &str = ".luckycoin";

/// Config file name within the wallet directory.
const CONFIG_FILENAME: &str = "luckycoin.json";

/// Returns the wallet base directory: `~/.luckycoin`.
pub fn get_luckycoin_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    home.join(LUCKYCOIN_DIR_NAME)
}

/// Returns the full path to the config file: `~/.luckycoin/luckycoin.json`.
pub fn get_config_path() -> PathBuf {
    get_luckycoin_dir().join(CONFIG_FILENAME)
}

/// Expand a leading `~` to the user's home directory.
pub fn resolve_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        let home = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "/root".to_string());
        format!("{}{}", home, rest)
    } else {
        path.to_string()
    }
}

/// Load the wallet config from disk.
///
/// Reads `~/.luckycoin/luckycoin.json` and merges missing fields with
/// defaults. Returns `None` if the file does not exist or cannot be
/// parsed.
pub fn load_config() -> Option<WalletConfig> {
    let config_path = get_config_path();
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&config_path).ok()?;
    let mut config: WalletConfig = serde_json::from_str(&contents).ok()?;

    // Merge defaults for unset fields
    let defaults = default_config();

    if config.rpc_url.is_empty() {
        config.rpc_url = defaults.rpc_url;
    }
    if config.contract_address.is_empty() {
        config.contract_address = defaults.contract_address;
    }
    if config.chain_id == 0 {
        config.chain_id = defaults.chain_id;
    }
    if config.keystore_path.is_empty() {
        config.keystore_path = defaults.keystore_path;
    }

    Some(config)
}

/// Load the config, falling back to defaults when no file exists.
pub fn load_or_default() -> WalletConfig {
    load_config().unwrap_or_else(default_config)
}

/// Save the wallet config, creating `~/.luckycoin` if needed.
pub fn save_config(config: &WalletConfig) -> Result<()> {
    let dir = get_luckycoin_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create luckycoin directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
            .context("Failed to set directory permissions")?;
    }

    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(get_config_path(), json).context("Failed to write config file")?;
    Ok(())
}
