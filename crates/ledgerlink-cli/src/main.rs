//! Ledgerlink - watch-only cross-chain transaction sync from the terminal.
//!
//! Follows the addresses listed in the configuration file, merges their
//! history from the chain gateways, and reconciles home-chain transfer
//! messages against the transactions they reference.

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use ledgerlink_chain::{EngineDeps, GetTxOptions, Session, SyncEngine, WatchOnlySigner, build_rpcs, home_gateway};
use ledgerlink_core::config::{get_config_path, load_config, save_config};
use ledgerlink_core::{AppConfig, ChainId, Direction, MessageKind, SystemClock, Transaction, format_amount};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Chain argument accepting any ticker, case-insensitively.
#[derive(Debug, Clone, Copy)]
struct ChainArg(ChainId);

impl FromStr for ChainArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<ChainId>().map(ChainArg)
    }
}

#[derive(Parser, Debug)]
#[command(name = "ledgerlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Home-chain account to act as (defaults to the watched ADM address)
    #[arg(short, long)]
    user: Option<String>,

    /// Gateway URL override for the selected chain
    #[arg(long)]
    gateway: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show balances of every watched chain, or of one chain
    Balance {
        #[arg(short, long)]
        chain: Option<ChainArg>,
    },
    /// Fetch and list transaction history
    History {
        #[arg(short, long)]
        chain: ChainArg,
        /// Additional older pages to fetch after the newest one
        #[arg(long, default_value = "0")]
        older: u32,
    },
    /// Query one transaction from the node
    Status {
        #[arg(short, long)]
        chain: ChainArg,
        id: String,
    },
    /// Show the chat with a contact, transfers reconciled against their chains
    Chat { partner: String },
    /// Follow an address on a chain
    Watch { chain: ChainArg, address: String },
    /// Stop following a chain
    Unwatch { chain: ChainArg },
    /// Print the configuration file path and contents
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("ledgerlink=info".parse()?)
        .add_directive("ledgerlink_chain=info".parse()?)
        .add_directive("ledgerlink_core=info".parse()?);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = load_config().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    config.validate()?;

    match args.command {
        Command::Watch { chain, address } => {
            config.watch(chain.0, address.clone());
            save_config(&config)?;
            println!("Watching {} on {}", address, chain.0);
            Ok(())
        }
        Command::Unwatch { chain } => {
            if config.unwatch(chain.0) {
                save_config(&config)?;
                println!("No longer watching {}", chain.0);
            } else {
                println!("{} was not watched", chain.0);
            }
            Ok(())
        }
        Command::Config => {
            println!("# {}", get_config_path()?.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Balance { chain } => {
            let chains = match chain {
                Some(c) => vec![c.0],
                None => watched_chains(&config),
            };
            if chains.is_empty() {
                return Err(eyre!("No watched chains; add one with `ledgerlink watch <chain> <address>`"));
            }
            if let (Some(url), [only]) = (&args.gateway, chains.as_slice()) {
                config.gateways.insert(*only, url.clone());
            }
            let engine = connect(&config, &chains, args.user.as_deref()).await?;
            run_balance(&engine, &chains, args.json).await;
            engine.pause();
            Ok(())
        }
        Command::History { chain, older } => {
            override_gateway(&mut config, chain.0, args.gateway.as_deref());
            let engine = connect(&config, &[chain.0], args.user.as_deref()).await?;
            let result = run_history(&engine, chain.0, older, args.json).await;
            engine.pause();
            result
        }
        Command::Status { chain, id } => {
            override_gateway(&mut config, chain.0, args.gateway.as_deref());
            let engine = connect(&config, &[chain.0], args.user.as_deref()).await?;
            let result = run_status(&engine, chain.0, &id, args.json).await;
            engine.pause();
            result
        }
        Command::Chat { partner } => {
            override_gateway(&mut config, ChainId::Adm, args.gateway.as_deref());
            let mut chains = watched_chains(&config);
            if !chains.contains(&ChainId::Adm) {
                chains.push(ChainId::Adm);
            }
            let engine = connect(&config, &chains, args.user.as_deref()).await?;
            let result = run_chat(&engine, &partner, args.json).await;
            engine.pause();
            result
        }
    }
}

fn watched_chains(config: &AppConfig) -> Vec<ChainId> {
    ChainId::all()
        .iter()
        .copied()
        .filter(|c| config.watched.contains_key(c) || config.watched.contains_key(&c.binding_chain()))
        .collect()
}

fn override_gateway(config: &mut AppConfig, chain: ChainId, url: Option<&str>) {
    if let Some(url) = url {
        config.gateways.insert(chain, url.to_string());
    }
}

/// Build an engine for `chains` and log in watch-only.
async fn connect(config: &AppConfig, chains: &[ChainId], user: Option<&str>) -> Result<SyncEngine> {
    let user = user
        .map(str::to_string)
        .or_else(|| config.watched.get(&ChainId::Adm).cloned())
        .unwrap_or_default();

    let home = Arc::new(home_gateway(config));
    let engine = SyncEngine::new(EngineDeps {
        rpcs: build_rpcs(config, chains),
        kvs: home.clone(),
        signer: Arc::new(WatchOnlySigner::from_config(config)),
        transport: home,
        clock: Arc::new(SystemClock),
        config: config.clone(),
    })?;

    engine.after_login(Session::watch_only(user)).await?;
    Ok(engine)
}

async fn run_balance(engine: &SyncEngine, chains: &[ChainId], json: bool) {
    let mut rows = Vec::new();
    for &chain in chains {
        let Some(module) = engine.module(chain) else {
            continue;
        };
        let address = module.state().address.unwrap_or_default();
        match module.update_balance().await {
            Ok(balance) => {
                if json {
                    rows.push(serde_json::json!({
                        "chain": chain.symbol(),
                        "address": address,
                        "balance": format_amount(balance, chain.decimals()),
                    }));
                } else {
                    println!(
                        "{:<5} {:<44} {}",
                        chain.symbol(),
                        address,
                        format_amount(balance, chain.decimals())
                    );
                }
            }
            Err(e) => {
                tracing::warn!("{} balance failed: {}", chain, e);
                if !json {
                    println!("{:<5} {:<44} error: {}", chain.symbol(), address, e);
                }
            }
        }
    }
    if json {
        println!("{}", serde_json::Value::Array(rows));
    }
}

async fn run_history(engine: &SyncEngine, chain: ChainId, older: u32, json: bool) -> Result<()> {
    let module = engine.module(chain).ok_or_else(|| eyre!("No module for {}", chain))?;

    let mut merged = module.fetch_recent().await?;
    for _ in 0..older {
        if module.state().bottom_reached {
            break;
        }
        merged += module.fetch_older().await?;
    }
    tracing::info!("Merged {} {} transactions", merged, chain);

    let transactions = module.transactions();
    if json {
        println!("{}", serde_json::to_string_pretty(&transactions)?);
        return Ok(());
    }

    if let Some(address) = module.state().address {
        println!("{} history for {}", chain, address);
    }
    for tx in &transactions {
        print_transaction(chain, tx);
    }
    if module.state().bottom_reached {
        println!("(end of history)");
    }
    Ok(())
}

async fn run_status(engine: &SyncEngine, chain: ChainId, id: &str, json: bool) -> Result<()> {
    let module = engine.module(chain).ok_or_else(|| eyre!("No module for {}", chain))?;
    let options = GetTxOptions {
        update_only: true,
        ..GetTxOptions::forced()
    };
    let tx = module.get_transaction(id, options).await?;

    match (tx, json) {
        (Some(tx), true) => println!("{}", serde_json::to_string_pretty(&tx)?),
        (Some(tx), false) => print_transaction(chain, &tx),
        (None, _) => return Err(eyre!("Transaction {} not found on {}", id, chain)),
    }
    Ok(())
}

async fn run_chat(engine: &SyncEngine, partner: &str, json: bool) -> Result<()> {
    engine.refresh().await?;
    let items = engine.partner_activity(partner);

    if json {
        let rows: Vec<_> = items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "message": item.message,
                    "status": item.status.status,
                    "inconsistent_reason": item.status.inconsistent_reason.map(|r| r.as_str()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for item in &items {
        let when = item.message.timestamp.map(format_time).unwrap_or_else(|| "-".to_string());
        let who = &item.message.sender_id;
        let body = match &item.message.kind {
            MessageKind::Text { text, .. } => text.clone(),
            MessageKind::Reaction { emoji, .. } => emoji.clone(),
            MessageKind::Transfer(intent) => format!("{} {} ({})", intent.amount, intent.asset, intent.hash),
        };
        let mut line = format!("{} {:<12} {:<10} {}", when, who, item.status.status.label(), body);
        if let Some(reason) = item.status.inconsistent_reason {
            line.push_str(&format!(" [{}]", reason.as_str()));
        }
        println!("{}", line);
    }
    Ok(())
}

fn print_transaction(chain: ChainId, tx: &Transaction) {
    let when = tx.timestamp.map(format_time).unwrap_or_else(|| "-".to_string());
    let amount = tx
        .amount
        .map(|a| format_amount(a, chain.decimals()))
        .unwrap_or_else(|| "?".to_string());
    let arrow = match tx.direction {
        Some(Direction::To) => "<-",
        Some(Direction::From) => "->",
        None => "  ",
    };
    println!(
        "{} {:<10} {} {:>20} {} {}",
        when,
        tx.status.label(),
        arrow,
        amount,
        tx.partner.as_deref().unwrap_or("?"),
        tx.id
    );
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_arg_is_case_insensitive() {
        assert_eq!("usdt".parse::<ChainArg>().unwrap().0, ChainId::Usdt);
        assert!("xyz".parse::<ChainArg>().is_err());
    }

    #[test]
    fn test_watched_eth_covers_tokens() {
        let mut config = AppConfig::default();
        config.watch(ChainId::Eth, "0xabc".into());
        config.watch(ChainId::Btc, "1Abc".into());
        let chains = watched_chains(&config);
        assert!(chains.contains(&ChainId::Btc));
        assert!(chains.contains(&ChainId::Dai));
        assert!(!chains.contains(&ChainId::Lsk));
    }
}
