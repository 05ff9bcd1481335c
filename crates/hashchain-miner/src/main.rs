use anyhow::Result;
use clap::Parser;
use hashchain_core::{
    unix_millis, Block, CancelToken, Capped, Chain, DifficultyPolicy, Escalating, Fixed,
    LedgerError, MiningOptions, Payload,
};
use serde_json::json;
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

type MinerChain = Chain<Box<dyn DifficultyPolicy>>;

#[derive(Parser, Debug)]
#[command(name = "hashchain-miner")]
#[command(about = "Mines blocks onto an in-memory proof-of-work chain and dumps it on exit")]
struct Args {
    /// Stop after appending this many blocks. Runs until interrupted when omitted.
    #[arg(long)]
    blocks: Option<u64>,

    /// Seconds between progress lines while a block is being mined
    #[arg(long, default_value_t = hashchain_core::constants::DEFAULT_PROGRESS_INTERVAL_SECS)]
    progress_secs: u64,

    /// Mine every block at this difficulty instead of escalating with chain length
    #[arg(long, conflicts_with = "max_difficulty")]
    fixed_difficulty: Option<u32>,

    /// Escalate with chain length, but never above this difficulty
    #[arg(long)]
    max_difficulty: Option<u32>,

    /// Give up on a block after this many seconds
    #[arg(long)]
    block_timeout_secs: Option<u64>,

    /// Write the final chain dump to this file instead of stdout
    #[arg(long)]
    dump: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct MinerSettings {
    blocks: Option<u64>,
    progress_interval: Duration,
    block_timeout: Option<Duration>,
}

impl Args {
    fn policy(&self) -> Box<dyn DifficultyPolicy> {
        match (self.fixed_difficulty, self.max_difficulty) {
            (Some(difficulty), _) => Box::new(Fixed(difficulty)),
            (None, Some(max)) => Box::new(Capped { max }),
            (None, None) => Box::new(Escalating),
        }
    }

    fn settings(&self) -> MinerSettings {
        MinerSettings {
            blocks: self.blocks,
            progress_interval: Duration::from_secs(self.progress_secs),
            block_timeout: self.block_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn entity_payload() -> Payload {
    let mut data = Payload::new();
    data.insert("Name".to_string(), json!("Entity"));
    data.insert("CurrentAccount".to_string(), json!(10));
    data.insert("TransactionTo".to_string(), json!(0));
    data.insert("Transaction".to_string(), json!(0));
    data
}

/// Appends blocks until the block limit is reached or a mine is cancelled or
/// times out. Returns how many blocks were appended.
fn mine_blocks(
    chain: &mut MinerChain,
    settings: &MinerSettings,
    cancel: &CancelToken,
) -> Result<u64> {
    let mut appended = 0u64;
    while settings.blocks.map_or(true, |limit| appended < limit) && !cancel.is_cancelled() {
        let mut options = MiningOptions::default()
            .with_progress_interval(settings.progress_interval)
            .with_cancel(cancel.clone());
        if let Some(timeout) = settings.block_timeout {
            options = options.with_timeout(timeout);
        }

        let block = Block::new(unix_millis(), entity_payload());
        let started = Instant::now();
        match chain.append_with(block, &options) {
            Ok(report) => {
                appended += 1;
                info!(
                    "Added block {}. Hash computation time: {} milliseconds ({} hashes)",
                    chain.len(),
                    started.elapsed().as_millis(),
                    report.attempts
                );
            }
            Err(
                LedgerError::MiningCancelled { .. } | LedgerError::MiningDeadlineExceeded { .. },
            ) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(appended)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = args.settings();
    let mut chain: MinerChain = Chain::with_policy(args.policy());

    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping miner");
                cancel.cancel();
            }
        }
    });

    let (chain, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = mine_blocks(&mut chain, &settings, &cancel);
        (chain, outcome)
    })
    .await?;

    match &outcome {
        Ok(appended) => info!(
            appended,
            length = chain.len(),
            valid = chain.is_valid(),
            "mining stopped"
        ),
        Err(err) => warn!(%err, length = chain.len(), "mining failed"),
    }

    let dump = chain.dump()?;
    match &args.dump {
        Some(path) => {
            tokio::fs::write(path, dump).await?;
            info!("chain written to {}", path.display());
        }
        None => println!("{dump}"),
    }

    outcome.map(|_| ())
}
