mod analysis;
mod api;
mod cli;
mod config;
mod contract;
mod db;
mod flow;
mod http;
mod meter;
mod model;
mod notify;
mod ticker;
mod transcript;
mod wallet;

use anyhow::Result;
use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "x4pn", about = "Pay-per-second VPN session client")]
pub struct Args {
    #[arg(
        short,
        long,
        help = "Run ';'-separated commands and exit (e.g. \"wallet connect; status\")"
    )]
    pub command: Option<String>,

    #[arg(long, env = "X4PN_API_URL", help = "Backend base URL")]
    pub api_url: Option<String>,

    #[arg(long, env = "X4PN_WALLET_BRIDGE", help = "Wallet bridge URL")]
    pub wallet_bridge: Option<String>,

    #[arg(long, env = "X4PN_RELAY_URL", help = "Transaction relay URL")]
    pub relay_url: Option<String>,

    #[arg(long, env = "X4PN_TARGET", help = "Fallback session target address")]
    pub target: Option<String>,

    #[arg(long, value_name = "MS", help = "Length of the analysis display")]
    pub analysis_delay_ms: Option<u64>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Transcripts directory")]
    pub transcripts_dir: Option<PathBuf>,

    #[arg(long, help = "Verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (print resolved settings)")]
    pub debug: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: {:#}; using defaults", e);
            config::Config::default()
        })
    };

    // CLI and environment override files
    if let Some(url) = &args.api_url {
        cfg.api.base_url = url.clone();
    }
    if let Some(url) = &args.wallet_bridge {
        cfg.wallet.bridge_url = url.clone();
    }
    if let Some(url) = &args.relay_url {
        cfg.contract.relay_url = url.clone();
    }
    if let Some(target) = &args.target {
        cfg.contract.default_target = Some(target.clone());
    }
    if let Some(ms) = args.analysis_delay_ms {
        cfg.analysis.delay_ms = ms;
    }

    if let Err(errors) = cfg.validate() {
        for error in &errors {
            eprintln!("Config error {}", error);
        }
        return Err(anyhow::anyhow!(
            "Invalid configuration ({} errors)",
            errors.len()
        ));
    }

    if args.debug {
        eprintln!("[DEBUG] Backend: {}", cfg.api.base_url);
        eprintln!("[DEBUG] Wallet bridge: {}", cfg.wallet.bridge_url);
        eprintln!("[DEBUG] Relay: {}", cfg.contract.relay_url);
        eprintln!("[DEBUG] Default target: {:?}", cfg.contract.default_target);
        eprintln!("[DEBUG] Billing: {:?}", cfg.billing);
        eprintln!("[DEBUG] Analysis delay: {}ms", cfg.analysis.delay_ms);
    }

    let database = db::Database::from_env();

    let root = std::env::current_dir()?;
    let transcripts_dir = args
        .transcripts_dir
        .clone()
        .unwrap_or_else(|| root.join(".x4pn").join("sessions"));
    std::fs::create_dir_all(&transcripts_dir)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let transcript_path = transcripts_dir.join(format!("{}.jsonl", run_id));
    let transcript = transcript::Transcript::new(&transcript_path, &run_id)?;

    let timeout = Duration::from_millis(cfg.api.timeout_ms);
    let wallet = wallet::Wallet::new(Box::new(wallet::BridgeWallet::new(
        &cfg.wallet.bridge_url,
        timeout,
    )));
    let contract = contract::RelayContract::new(&cfg.contract.relay_url, timeout);
    let backend = api::HttpBackend::new(&cfg.api.base_url, timeout);
    let options = flow::FlowOptions {
        analysis_delay: Duration::from_millis(cfg.analysis.delay_ms),
        default_rate_per_second: cfg.billing.default_rate_per_second,
        default_target: cfg.contract.default_target.clone(),
        low_balance_secs: cfg.billing.low_balance_secs,
        tick_period: ticker::TICK_PERIOD,
    };
    let controller = flow::Controller::new(wallet, Box::new(contract), Box::new(backend), options);

    let ctx = cli::Context {
        args,
        config: cfg,
        run_id,
        transcript: RefCell::new(transcript),
        controller: RefCell::new(controller),
        database,
    };

    if let Some(commands) = ctx.args.command.clone() {
        cli::run_once(&ctx, &commands)
    } else {
        cli::run_repl(ctx)
    }
}
