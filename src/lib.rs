//! LuckyCoin Wallet -- Session & Transaction Lifecycle Controller
//!
//! Connects a wallet, keeps the LKT balance read model in sync, and
//! drives buy/blessing transactions through submission, inclusion, and
//! confirmation against the LuckyCoin contract on Sepolia.

pub mod types;
pub mod error;
pub mod config;
pub mod contract;
pub mod gateway;
pub mod balance;
pub mod session;
pub mod pipeline;
