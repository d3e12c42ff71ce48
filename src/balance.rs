//! Balance Reader
//!
//! Performs the one read-only remote call this system needs: the LKT
//! `balanceOf` for an account. Idempotent and safe to retry; failures
//! surface as `RemoteCallFailed`.

use std::sync::Arc;

use alloy_primitives::Address;
use tracing::debug;

use crate::contract;
use crate::error::{classify_read, WalletError};
use crate::gateway::WalletProvider;
use crate::types::TokenAmount;

#[derive(Clone)]
pub struct BalanceReader {
    provider: Arc<dyn WalletProvider>,
    contract: Address,
}

impl BalanceReader {
    pub fn new(provider: Arc<dyn WalletProvider>, contract: Address) -> Self {
        BalanceReader { provider, contract }
    }

    /// Fetch the LKT balance for `account`.
    pub async fn read(&self, account: Address) -> Result<TokenAmount, WalletError> {
        let data = contract::balance_of_calldata(account);
        let raw = self
            .provider
            .call(self.contract, data)
            .await
            .map_err(|e| classify_read(&e))?;
        let wei = contract::decode_balance(&raw)?;
        debug!("Balance for {account}: {wei} wei");
        Ok(TokenAmount::from_wei(wei))
    }
}
