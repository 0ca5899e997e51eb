//! sBTC bridge client CLI
//!
//! Configuration comes from the environment (a `.env` file is loaded when
//! present); see `BridgeConfig::from_env`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::Address;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sbtc_bridge::common::{init_from_config, log_startup};
use sbtc_bridge::types::{parse_btc, parse_sats, sats_to_display};
use sbtc_bridge::wallet::HttpProviderBridge;
use sbtc_bridge::{
    create_signer, derive_deposit_output, BridgeConfig, BridgeError, DepositFlow, DepositParameters,
    DepositPoller, DepositRequest, DepositStatusMachine, ResilientHttpClient, StacksClient,
    StacksPrincipal, WalletContext, WalletProvider,
};

#[derive(Parser)]
#[command(name = "sbtc-bridge")]
#[command(about = "sBTC deposit client: derive, send, register and track deposits")]
struct Cli {
    /// Emit pretty JSON instead of plain text where supported
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DepositArgs {
    /// Stacks principal receiving sBTC
    #[arg(short, long)]
    recipient: String,

    /// Compressed reclaim public key (hex), repeat for a multisig reclaim
    #[arg(short = 'k', long = "reclaim-key", required = true)]
    reclaim_keys: Vec<String>,

    /// Reclaim signatures required
    #[arg(short, long, default_value = "1")]
    threshold: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the deposit address and scripts
    Address {
        #[command(flatten)]
        deposit: DepositArgs,

        /// Signer aggregate key (hex); fetched from sbtc-registry when omitted
        #[arg(long)]
        aggregate_key: Option<String>,
    },

    /// Compare Emily's chain tip with the Stacks node
    Sync,

    /// Show the effective configuration
    Config,

    /// Show Emily's record of a deposit
    Status {
        #[arg(long)]
        txid: String,

        #[arg(long, default_value = "0")]
        vout: u32,
    },

    /// Poll a deposit until it is confirmed or reclaim-eligible
    Track {
        #[arg(long)]
        txid: String,

        #[arg(long, default_value = "0")]
        vout: u32,

        /// Also report Bitcoin confirmation depth
        #[arg(long)]
        confirmations: bool,
    },

    /// Register an already broadcast deposit with Emily
    Register {
        #[command(flatten)]
        deposit: DepositArgs,

        #[arg(long)]
        txid: String,

        #[arg(long)]
        vout: u32,

        /// Deposited amount, in sats or as BTC with a decimal point
        #[arg(long)]
        amount: String,

        /// Aggregate key the deposit was derived under (hex); the current
        /// key is fetched from sbtc-registry when omitted
        #[arg(long)]
        aggregate_key: Option<String>,
    },

    /// Pay a deposit through a wallet provider, then register it
    Deposit {
        #[command(flatten)]
        deposit: DepositArgs,

        /// Amount, in sats or as BTC with a decimal point (e.g. 0.001)
        #[arg(long)]
        amount: String,

        /// leather, xverse, fordefi or asigna
        #[arg(long, env = "WALLET_PROVIDER")]
        provider: String,

        /// JSON-RPC endpoint relaying requests to the wallet
        #[arg(long, env = "WALLET_ENDPOINT")]
        wallet_endpoint: String,

        /// Asigna multisig vault address
        #[arg(long, env = "ASIGNA_MULTISIG_ADDRESS")]
        multisig_address: Option<String>,

        /// Seconds the user has to approve in the wallet
        #[arg(long, default_value = "300")]
        approval_timeout: u64,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Address { .. } => "address",
            Commands::Sync => "sync",
            Commands::Config => "config",
            Commands::Status { .. } => "status",
            Commands::Track { .. } => "track",
            Commands::Register { .. } => "register",
            Commands::Deposit { .. } => "deposit",
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error [{}]: {}", e.error_code(), e);
        if e.is_retryable() {
            eprintln!("this error is transient, retrying may succeed");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> sbtc_bridge::Result<()> {
    let config = BridgeConfig::from_env()?;
    config.validate()?;
    init_from_config(&config)?;
    log_startup(&config, cli.command.name());

    match cli.command {
        Commands::Address {
            deposit,
            aggregate_key,
        } => run_address(&config, deposit, aggregate_key, cli.json).await,
        Commands::Sync => run_sync(&config, cli.json).await,
        Commands::Config => {
            config.print_summary();
            Ok(())
        }
        Commands::Status { txid, vout } => {
            let flow = DepositFlow::from_config(&config);
            let record = flow.emily().get_deposit(&txid, vout).await?;
            print_json(&record);
            Ok(())
        }
        Commands::Track {
            txid,
            vout,
            confirmations,
        } => run_track(&config, txid, vout, confirmations).await,
        Commands::Register {
            deposit,
            txid,
            vout,
            amount,
            aggregate_key,
        } => {
            let flow = DepositFlow::from_config(&config);
            let request = deposit_request(&deposit, parse_amount(&amount)?)?;
            let prepared = match aggregate_key {
                Some(hex_key) => {
                    flow.prepare_with_aggregate_key(&request, decode_hex("aggregate key", &hex_key)?)
                        .await?
                }
                None => flow.prepare(&request).await?,
            };
            let record = flow.register(&prepared, &txid, vout).await?;
            print_json(&record);
            Ok(())
        }
        Commands::Deposit {
            deposit,
            amount,
            provider,
            wallet_endpoint,
            multisig_address,
            approval_timeout,
        } => {
            let flow = DepositFlow::from_config(&config);
            let amount = parse_amount(&amount)?;
            let provider = WalletProvider::from_str(&provider).map_err(BridgeError::validation)?;
            let multisig_address = multisig_address
                .map(|a| parse_address(&config, &a))
                .transpose()?;

            let bridge = HttpProviderBridge::new(
                ResilientHttpClient::with_policy(config.retry_policy.clone()),
                &wallet_endpoint,
                Duration::from_secs(approval_timeout),
            );
            let signer = create_signer(WalletContext {
                provider,
                bridge: Arc::new(bridge),
                explorer: Some(flow.explorer().clone()),
                multisig_address,
            })?;

            let prepared = flow.prepare(&deposit_request(&deposit, amount)?).await?;
            println!("Deposit address: {}", prepared.address());

            let receipt = flow.execute(signer.as_ref(), &prepared).await?;
            println!("Sent {} as {}:{}", sats_to_display(amount), receipt.txid, receipt.vout);
            print_json(&receipt.record);
            Ok(())
        }
    }
}

async fn run_address(
    config: &BridgeConfig,
    args: DepositArgs,
    aggregate_key: Option<String>,
    json: bool,
) -> sbtc_bridge::Result<()> {
    let aggregate_pubkey = match aggregate_key {
        Some(hex_key) => decode_hex("aggregate key", &hex_key)?,
        None => {
            let stacks = StacksClient::new(
                ResilientHttpClient::with_policy(config.retry_policy.clone()),
                &config.stacks_api_url,
            );
            stacks
                .get_current_aggregate_key(&config.sbtc_contract_deployer)
                .await?
        }
    };

    let request = deposit_request(&args, 0)?;
    let params = DepositParameters {
        aggregate_pubkey,
        recipient: request.recipient.to_clarity_bytes(),
        max_fee: config.deposit_max_fee,
        lock_time: config.reclaim_lock_time,
        reclaim_pubkeys: request.reclaim_pubkeys,
        threshold: request.threshold,
    };
    let output = derive_deposit_output(&params, config.network.bitcoin_network())?;

    #[derive(Serialize)]
    struct AddressOutput {
        address: String,
        deposit_script: String,
        reclaim_script: String,
        merkle_root: Option<String>,
    }
    let out = AddressOutput {
        address: output.address.to_string(),
        deposit_script: hex::encode(output.deposit_script.as_bytes()),
        reclaim_script: hex::encode(output.reclaim_script.as_bytes()),
        merkle_root: output.merkle_root_hex(),
    };

    if json {
        print_json(&out);
    } else {
        println!("Address:        {}", out.address);
        println!("Deposit script: {}", out.deposit_script);
        println!("Reclaim script: {}", out.reclaim_script);
    }
    Ok(())
}

async fn run_sync(config: &BridgeConfig, json: bool) -> sbtc_bridge::Result<()> {
    let flow = DepositFlow::from_config(config);
    let status = flow.sync_checker().sync_status().await?;

    if json {
        print_json(&serde_json::json!({
            "stacks_height": status.stacks_height,
            "indexer_height": status.indexer_height,
            "in_sync": status.in_sync(),
        }));
    } else {
        println!("Stacks tip: {}", status.stacks_height);
        println!("Emily tip:  {}", status.indexer_height);
        println!("In sync:    {}", status.in_sync());
    }

    flow.sync_checker().ensure_synced().await?;
    Ok(())
}

async fn run_track(config: &BridgeConfig, txid: String, vout: u32, confirmations: bool) -> sbtc_bridge::Result<()> {
    let flow = DepositFlow::from_config(config);
    let mut poller = DepositPoller::new(Arc::new(flow.emily().clone()), config.polling_interval);
    if confirmations {
        poller = poller.with_confirmations(Arc::new(flow.explorer().clone()));
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            ctrl_c.cancel();
        }
    });

    let mut handle = poller.spawn(DepositStatusMachine::new(txid, vout), cancel);
    let mut updates = handle.subscribe();
    print_json(&*updates.borrow_and_update());

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_json(&snapshot);
            }
            Some(signal) = handle.next_reclaim() => {
                println!("Deposit is reclaim-eligible:");
                print_json(&signal);
            }
        }
    }
    while let Some(signal) = handle.next_reclaim().await {
        println!("Deposit is reclaim-eligible:");
        print_json(&signal);
    }

    let snapshot = handle.join().await?;
    println!("Final status: {}", snapshot.status);
    Ok(())
}

fn deposit_request(args: &DepositArgs, amount_sats: u64) -> sbtc_bridge::Result<DepositRequest> {
    let recipient = StacksPrincipal::from_str(&args.recipient)
        .map_err(|e| BridgeError::validation(format!("recipient {}: {}", args.recipient, e)))?;
    let reclaim_pubkeys = args
        .reclaim_keys
        .iter()
        .map(|k| decode_hex("reclaim key", k))
        .collect::<sbtc_bridge::Result<Vec<_>>>()?;

    Ok(DepositRequest {
        recipient,
        amount_sats,
        reclaim_pubkeys,
        threshold: args.threshold,
    })
}

fn parse_amount(value: &str) -> sbtc_bridge::Result<u64> {
    let lower = value.trim().to_lowercase();
    let parsed = match lower.strip_suffix("btc") {
        Some(btc) => parse_btc(btc),
        None if lower.contains('.') => parse_btc(&lower),
        None => parse_sats(lower.trim_end_matches("sats")),
    };
    parsed.ok_or_else(|| BridgeError::validation(format!("invalid amount: {}", value)))
}

fn decode_hex(what: &str, value: &str) -> sbtc_bridge::Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| BridgeError::validation(format!("{} {}: {}", what, value, e)))
}

fn parse_address(config: &BridgeConfig, value: &str) -> sbtc_bridge::Result<Address> {
    Address::from_str(value)
        .and_then(|a| a.require_network(config.network.bitcoin_network()))
        .map_err(|e| BridgeError::validation(format!("address {}: {}", value, e)))
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}
