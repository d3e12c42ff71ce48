//! LuckyCoin Contract Interface
//!
//! The fixed remote contract this wallet talks to: ABI, deployed
//! address, required chain, and the LKT/ETH conversion rate. The
//! interface is static; it is never renegotiated at runtime.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::error::WalletError;

// ─── Network Constants ──────────────────────────────────────────────

const fn hex_literal_20(s: &str) -> [u8; 20] {
    let bytes = s.as_bytes();
    let mut out = [0u8; 20];
    let mut i = 0;
    while i < 20 {
        let hi = hex_val(bytes[i * 2]);
        let lo = hex_val(bytes[i * 2 + 1]);
        out[i] = (hi << 4) | lo;
        i += 1;
    }
    out
}

const fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex character"),
    }
}

/// The deployed LuckyCoin contract (Sepolia).
pub const CONTRACT_ADDRESS: Address =
    Address::new(hex_literal_20("512C152C6cF44B2FF165c8017128988E0ca8BbD1"));

/// Sepolia chain id. A session on any other chain is mismatched and
/// not eligible for transactions.
pub const REQUIRED_CHAIN_ID: u64 = 11155111;

/// Fixed conversion rate: 1 ETH buys 10 LKT.
pub const LKT_PER_ETH: u64 = 10;

/// Etherscan base URL for confirmed transaction links.
pub const ETHERSCAN_TX_URL: &str = "https://sepolia.etherscan.io/tx";

// ─── ABI ────────────────────────────────────────────────────────────

sol! {
    #[allow(missing_docs)]
    interface ILuckyCoin {
        function balanceOf(address owner) external view returns (uint256);
        function buy() external payable;
        function buyMessage() external;
        function getLastMessage() external view returns (string);
    }
}

// ─── Calldata Builders & Decoders ───────────────────────────────────

pub fn balance_of_calldata(owner: Address) -> Bytes {
    Bytes::from(ILuckyCoin::balanceOfCall { owner }.abi_encode())
}

pub fn buy_calldata() -> Bytes {
    Bytes::from(ILuckyCoin::buyCall {}.abi_encode())
}

pub fn buy_message_calldata() -> Bytes {
    Bytes::from(ILuckyCoin::buyMessageCall {}.abi_encode())
}

pub fn get_last_message_calldata() -> Bytes {
    Bytes::from(ILuckyCoin::getLastMessageCall {}.abi_encode())
}

/// Decode the single `uint256` returned by `balanceOf`.
pub fn decode_balance(data: &[u8]) -> Result<U256, WalletError> {
    let bytes32: [u8; 32] = data
        .try_into()
        .map_err(|_| WalletError::RemoteCallFailed("malformed balanceOf response".to_string()))?;
    Ok(U256::from_be_bytes::<32>(bytes32))
}

/// Decode the `string` returned by `getLastMessage`.
pub fn decode_last_message(data: &[u8]) -> Result<String, WalletError> {
    ILuckyCoin::getLastMessageCall::abi_decode_returns(data)
        .map_err(|e| WalletError::RemoteCallFailed(format!("malformed getLastMessage response: {e}")))
}

/// Etherscan link for a transaction hash.
pub fn etherscan_tx_link(hash: &alloy::primitives::TxHash) -> String {
    format!("{}/{:?}", ETHERSCAN_TX_URL, hash)
}

/// Convenience for mocks and tests: encode a `uint256` return value.
pub fn encode_balance_return(value: U256) -> Bytes {
    Bytes::from(value.to_be_bytes::<32>().to_vec())
}

/// Convenience for mocks and tests: ABI-encode a `string` return value.
pub fn encode_message_return(message: &str) -> Bytes {
    let bytes = message.as_bytes();
    let mut out = Vec::with_capacity(64 + bytes.len().div_ceil(32) * 32);
    // offset to the string head
    out.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
    // length
    out.extend_from_slice(&U256::from(bytes.len() as u64).to_be_bytes::<32>());
    // padded contents
    out.extend_from_slice(bytes);
    let pad = (32 - bytes.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(pad));
    Bytes::from(out)
}

/// True when the calldata targets the given function selector.
pub fn selector_matches(data: &[u8], selector: [u8; 4]) -> bool {
    data.len() >= 4 && data[..4] == selector
}

pub const BALANCE_OF_SELECTOR: [u8; 4] = ILuckyCoin::balanceOfCall::SELECTOR;
pub const BUY_SELECTOR: [u8; 4] = ILuckyCoin::buyCall::SELECTOR;
pub const BUY_MESSAGE_SELECTOR: [u8; 4] = ILuckyCoin::buyMessageCall::SELECTOR;
pub const GET_LAST_MESSAGE_SELECTOR: [u8; 4] = ILuckyCoin::getLastMessageCall::SELECTOR;
