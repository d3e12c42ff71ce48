//! LuckyCoin Wallet CLI
//!
//! The terminal projection over the session store and transaction
//! pipeline. Handles CLI args, constructs the one provider gateway for
//! the process lifetime, and renders session and transaction state.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use luckycoin::balance::BalanceReader;
use luckycoin::config;
use luckycoin::contract;
use luckycoin::error::WalletError;
use luckycoin::gateway::{KeystoreProvider, ProviderGateway, WalletProvider};
use luckycoin::pipeline::TransactionPipeline;
use luckycoin::session::{SessionHandle, SessionStore};
use luckycoin::types::{
    short_address, ChainId, IntentKind, ReceiptStatus, Session, SessionEvent, TokenAmount,
    TransactionIntent, TxPhase,
};

const VERSION: &str = "0.1.0";

/// LuckyCoin Wallet -- buy LKT and random blessing messages on Sepolia
#[derive(Parser, Debug)]
#[command(
    name = "luckycoin",
    version = VERSION,
    about = "LuckyCoin wallet: LKT balance, token purchase, random blessing messages"
)]
struct Cli {
    /// Show the current session status and balance
    #[arg(long)]
    status: bool,

    /// Connect the wallet (prompts for authorization)
    #[arg(long)]
    connect: bool,

    /// Disconnect the wallet
    #[arg(long)]
    disconnect: bool,

    /// Buy LKT; amount in LKT, e.g. --buy 2
    #[arg(long, value_name = "LKT")]
    buy: Option<String>,

    /// Buy one random blessing message
    #[arg(long)]
    bless: bool,

    /// Re-check the receipt for a transaction hash
    #[arg(long, value_name = "TX_HASH")]
    recheck: Option<String>,
}

/// Everything a command needs: the gateway plus a running session
/// store and the pipeline wired to it.
struct App {
    gateway: ProviderGateway,
    handle: SessionHandle,
    pipeline: TransactionPipeline,
    required_chain: ChainId,
}

fn build_app() -> Result<App> {
    let config = config::load_or_default();
    let contract_address: Address = config
        .contract_address
        .parse()
        .with_context(|| format!("Invalid contract address in config: {}", config.contract_address))?;
    let keystore_path = config::resolve_path(&config.keystore_path);
    let provider: Arc<dyn WalletProvider> =
        Arc::new(KeystoreProvider::new(config.rpc_url.clone(), keystore_path));

    let gateway = ProviderGateway::new(Arc::clone(&provider));
    let reader = BalanceReader::new(Arc::clone(&provider), contract_address);
    let (store, events_rx, handle) = SessionStore::new(reader);

    // Forward out-of-band provider notifications onto the session's
    // single ordered event stream.
    forward_provider_events(&gateway, handle.events.clone());

    tokio::spawn(store.run(events_rx));

    let pipeline = TransactionPipeline::new(
        provider,
        contract_address,
        config.chain_id,
        handle.snapshot.clone(),
        handle.events.clone(),
    );

    Ok(App {
        gateway,
        handle,
        pipeline,
        required_chain: config.chain_id,
    })
}

fn forward_provider_events(
    gateway: &ProviderGateway,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut provider_rx = gateway.subscribe();
    tokio::spawn(async move {
        while let Some(event) = provider_rx.recv().await {
            let _ = events.send(SessionEvent::Provider(event));
        }
    });
}

/// Establish an active session: eager reconnect first, then an
/// interactive connect if allowed. Returns only once the store has
/// published the Active snapshot, so a submit issued next never
/// observes the stale Disconnected state.
async fn establish_session(app: &mut App, interactive: bool) -> Result<()> {
    if let Some((account, chain_id)) = app.gateway.connect_silently().await {
        let _ = app
            .handle
            .events
            .send(SessionEvent::ConnectCompleted { account, chain_id });
        return await_active(app).await;
    }

    if !interactive {
        bail!("no wallet session; run: luckycoin --connect");
    }

    let _ = app.handle.events.send(SessionEvent::ConnectRequested);
    match app.gateway.connect(app.required_chain).await {
        Ok((account, chain_id)) => {
            let _ = app
                .handle
                .events
                .send(SessionEvent::ConnectCompleted { account, chain_id });
            await_active(app).await
        }
        Err(e) => {
            let _ = app.handle.events.send(SessionEvent::ConnectFailed);
            Err(e).context("Failed to connect wallet")
        }
    }
}

/// Wait for the store to publish an Active snapshot.
async fn await_active(app: &mut App) -> Result<()> {
    app.handle
        .snapshot
        .wait_for(Session::is_active)
        .await
        .map(|_| ())
        .context("session store stopped")
}

/// Wait for the session snapshot to carry a balance, bounded so a
/// failed read does not hang the CLI.
async fn await_balance(app: &mut App) -> Option<String> {
    let wait = timeout(Duration::from_secs(30), async {
        loop {
            if let Some(balance) = app.handle.snapshot.borrow().balance.clone() {
                return balance;
            }
            if app.handle.snapshot.changed().await.is_err() {
                return String::new();
            }
        }
    })
    .await;
    wait.ok().filter(|b| !b.is_empty())
}

fn print_profile(app: &App, balance: Option<&str>) {
    let snapshot = app.handle.snapshot.borrow().clone();
    let status = if snapshot.is_active() {
        "Connected".green()
    } else {
        "Disconnected".red()
    };
    println!();
    println!("  {}", "User Profile".bold());
    println!("  Status  : {}", status);
    if let Some(account) = snapshot.account {
        println!("  Address : {}", short_address(&account).white());
    }
    if let Some(chain) = snapshot.chain_id {
        println!("  Chain   : {}", chain);
    }
    println!(
        "  LKT Coin: {}",
        balance.or(snapshot.balance.as_deref()).unwrap_or("unavailable")
    );
    println!();
}

async fn cmd_status(app: &mut App) -> Result<()> {
    if establish_session(app, false).await.is_err() {
        println!("Not connected. Run: luckycoin --connect");
        return Ok(());
    }
    let balance = await_balance(app).await;
    print_profile(app, balance.as_deref());
    Ok(())
}

async fn cmd_connect(app: &mut App) -> Result<()> {
    establish_session(app, true).await?;
    let balance = await_balance(app).await;
    print_profile(app, balance.as_deref());
    Ok(())
}

async fn cmd_disconnect(app: &mut App) -> Result<()> {
    let notice = app.gateway.disconnect().await;
    let _ = app.handle.events.send(SessionEvent::DisconnectRequested);
    println!("{}", "Disconnected.".yellow());
    println!("{}", notice.dimmed());
    Ok(())
}

async fn run_intent(app: &mut App, intent: TransactionIntent) -> Result<()> {
    establish_session(app, true).await?;

    let (key, hash) = match app.pipeline.submit(intent).await {
        Ok(ok) => ok,
        Err(e) => bail!("{e}"),
    };
    println!("Transaction hash: {hash:?}");
    println!("{}", "Waiting for network confirmation...".dimmed());

    let record = app
        .pipeline
        .monitor(&key)
        .await
        .context("Monitoring failed")?;

    match record.phase {
        TxPhase::Confirmed => {
            println!("{}", "Confirmed!".green().bold());
            if let Some(message) = record.result_payload {
                println!();
                println!("  {}", message.bold());
                println!();
            }
            println!("View on Etherscan: {}", contract::etherscan_tx_link(&hash));
            if let Some(balance) = await_balance(app).await {
                println!("LKT Coin balance: {balance}");
            }
        }
        TxPhase::Failed(reason @ WalletError::ConfirmationCheckError(_)) => {
            // The transaction may still have landed; only the check failed.
            println!(
                "{}",
                format!("Check later with: luckycoin --recheck {hash:?}").dimmed()
            );
            bail!("{reason}");
        }
        TxPhase::Failed(reason) => bail!("{reason}"),
        other => bail!("unexpected final phase {other:?}"),
    }
    Ok(())
}

async fn cmd_buy(app: &mut App, amount: &str) -> Result<()> {
    let amount = TokenAmount::from_lkt(amount)
        .with_context(|| format!("Invalid LKT amount: {amount}"))?;
    if amount == TokenAmount::ZERO {
        bail!("amount must be greater than zero");
    }
    println!(
        "Buying {} LKT (1 ETH = {} LKT)...",
        amount.to_decimal_string(),
        contract::LKT_PER_ETH
    );
    run_intent(app, TransactionIntent::new(IntentKind::BuyToken(amount))).await
}

async fn cmd_bless(app: &mut App) -> Result<()> {
    println!("Buying one random blessing message...");
    run_intent(app, TransactionIntent::new(IntentKind::BuyMessage)).await
}

async fn cmd_recheck(app: &mut App, hash: &str) -> Result<()> {
    let hash: TxHash = hash
        .parse()
        .with_context(|| format!("Invalid transaction hash: {hash}"))?;
    match app.pipeline.recheck(hash).await? {
        ReceiptStatus::Success => {
            println!("{}", "Confirmed!".green().bold());
            println!("View on Etherscan: {}", contract::etherscan_tx_link(&hash));
            Ok(())
        }
        ReceiptStatus::Reverted => bail!("{}", WalletError::OnChainRevert),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .init();

    // Write the defaults on first run so users have a file to edit.
    if !config::get_config_path().exists() {
        if let Err(e) = config::save_config(&config) {
            warn!("Failed to write default config: {e}");
        }
    }

    let cli = Cli::parse();
    let mut app = build_app()?;

    if cli.status {
        cmd_status(&mut app).await
    } else if cli.connect {
        cmd_connect(&mut app).await
    } else if cli.disconnect {
        cmd_disconnect(&mut app).await
    } else if let Some(amount) = cli.buy.as_deref() {
        cmd_buy(&mut app, amount).await
    } else if cli.bless {
        cmd_bless(&mut app).await
    } else if let Some(hash) = cli.recheck.as_deref() {
        cmd_recheck(&mut app, hash).await
    } else {
        cmd_status(&mut app).await
    }
}
