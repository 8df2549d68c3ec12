//! deltablob: versioned blob storage with rsync-style deltas
//!
//! Commands:
//!   put <id> <file>                        - store a local file create-only
//!   get <id> [--out <file>]                - fetch a blob (stdout by default)
//!   signature <basis> [--out <file>]       - compute and store a basis signature
//!   delta <basis> <target-file> <delta>    - store the delta from basis to target
//!   patch <basis> <delta> <output>         - rebuild a version from basis + delta
//!   inspect <delta> [--json]               - summarise a stored delta
//!   health                                 - check the storage backend
//!   config show                            - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use deltablob_core::config::DeltaBlobConfig;
use deltablob_delta::{decode_delta, encode_signature, DeltaInstruction};
use deltablob_storage::BlobVersionStore;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "deltablob",
    version,
    about = "Versioned blob storage with rsync-style deltas",
    long_about = "deltablob: store blob versions create-only and move between them with signatures and deltas"
)]
struct Cli {
    /// Path to deltablob.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "DELTABLOB_CONFIG",
        default_value = "/etc/deltablob/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log].level
    #[arg(long, env = "DELTABLOB_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides [log].format
    #[arg(long, env = "DELTABLOB_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a local file as a new blob (fails if the id already has content)
    Put {
        /// Blob id (`key` or `container/key`)
        id: String,
        /// Local file to upload
        file: PathBuf,
    },

    /// Fetch a blob
    Get {
        id: String,
        /// Write to this file instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Compute the signature of a basis blob
    ///
    /// By default the signature is stored next to the basis under
    /// `<basis><signature_suffix>`.
    Signature {
        basis: String,
        /// Block size in bytes (overrides [delta].block_size)
        #[arg(long, short = 'b')]
        block_size: Option<usize>,
        /// Write the encoded signature to a local file instead of storing it
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Encode a local file as a delta against a stored basis
    Delta {
        basis: String,
        /// Local file holding the new version
        target: PathBuf,
        /// Blob id for the stored delta
        delta: String,
        /// Block size when no stored signature exists (overrides [delta].block_size)
        #[arg(long, short = 'b')]
        block_size: Option<usize>,
    },

    /// Rebuild a version from a basis and a delta, storing it at <output>
    Patch {
        basis: String,
        delta: String,
        output: String,
        /// Check copied blocks against the stored basis signature
        #[arg(long)]
        verify: bool,
    },

    /// Summarise a stored delta
    Inspect {
        delta: String,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
        /// List every instruction
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Check that the storage backend is reachable
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !cli.config.exists() {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Put { id, file } => cmd_put(&config, &id, &file).await,
        Commands::Get { id, out } => cmd_get(&config, &id, out.as_deref()).await,
        Commands::Signature {
            basis,
            block_size,
            out,
        } => {
            if let Some(bs) = block_size {
                config.delta.block_size = bs;
            }
            cmd_signature(&config, &basis, out.as_deref()).await
        }
        Commands::Delta {
            basis,
            target,
            delta,
            block_size,
        } => {
            if let Some(bs) = block_size {
                config.delta.block_size = bs;
            }
            cmd_delta(&config, &basis, &target, &delta).await
        }
        Commands::Patch {
            basis,
            delta,
            output,
            verify,
        } => {
            config.delta.verify_basis |= verify;
            cmd_patch(&config, &basis, &delta, &output).await
        }
        Commands::Inspect {
            delta,
            json,
            verbose,
        } => cmd_inspect(&config, &delta, json, verbose).await,
        Commands::Health => cmd_health(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config + logging ──────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<DeltaBlobConfig> {
    if path.exists() {
        DeltaBlobConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
    } else {
        Ok(DeltaBlobConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so `get` can stream blob bytes on stdout
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Store with a Ctrl-C cancellation token attached
fn open_store(config: &DeltaBlobConfig) -> Result<BlobVersionStore> {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let store = BlobVersionStore::from_config(config).with_context(|| {
        format!("opening {:?} storage backend", config.storage.backend)
    })?;
    Ok(store.with_cancellation(token))
}

// ── `deltablob put` / `get` ───────────────────────────────────────────────────

async fn cmd_put(config: &DeltaBlobConfig, id: &str, file: &Path) -> Result<()> {
    let store = open_store(config)?;
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let len = bytes.len();

    let identity = store
        .write_blob_create_only(id, bytes)
        .await
        .with_context(|| format!("storing {id}"))?;
    println!("stored {identity} ({len} bytes)");
    Ok(())
}

async fn cmd_get(config: &DeltaBlobConfig, id: &str, out: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let bytes = store
        .read_blob(id)
        .await
        .with_context(|| format!("reading {id}"))?;

    match out {
        Some(path) => {
            tokio::fs::write(path, &bytes)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(blob = id, bytes = bytes.len(), path = %path.display(), "blob saved");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes).context("writing to stdout")?;
            stdout.flush().context("flushing stdout")?;
        }
    }
    Ok(())
}

// ── `deltablob signature` / `delta` / `patch` ─────────────────────────────────

async fn cmd_signature(config: &DeltaBlobConfig, basis: &str, out: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;

    match out {
        Some(path) => {
            let signature = store
                .compute_signature(basis, config.delta.block_size)
                .await
                .with_context(|| format!("computing signature of {basis}"))?;
            tokio::fs::write(path, encode_signature(&signature))
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!(
                "signature of {basis}: {} blocks of {} bytes -> {}",
                signature.blocks().len(),
                signature.block_size(),
                path.display()
            );
        }
        None => {
            let identity = store
                .store_signature(basis)
                .await
                .with_context(|| format!("storing signature of {basis}"))?;
            println!("signature of {basis} stored at {identity}");
        }
    }
    Ok(())
}

async fn cmd_delta(
    config: &DeltaBlobConfig,
    basis: &str,
    target: &Path,
    delta: &str,
) -> Result<()> {
    let store = open_store(config)?;
    let bytes = tokio::fs::read(target)
        .await
        .with_context(|| format!("reading {}", target.display()))?;

    let stats = store
        .store_delta(basis, &bytes, delta)
        .await
        .with_context(|| format!("encoding {} against {basis}", target.display()))?;
    println!(
        "delta {delta}: {} bytes copied, {} bytes inserted ({} instructions)",
        stats.copied_bytes,
        stats.inserted_bytes,
        stats.copy_count + stats.insert_count
    );
    Ok(())
}

async fn cmd_patch(
    config: &DeltaBlobConfig,
    basis: &str,
    delta: &str,
    output: &str,
) -> Result<()> {
    let store = open_store(config)?;
    let written = store
        .restore(basis, delta, output)
        .await
        .with_context(|| format!("applying {delta} to {basis}"))?;
    println!("restored {output} ({written} bytes)");
    Ok(())
}

// ── `deltablob inspect` ───────────────────────────────────────────────────────

async fn cmd_inspect(
    config: &DeltaBlobConfig,
    delta: &str,
    json: bool,
    verbose: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let bytes = store
        .read_blob(delta)
        .await
        .with_context(|| format!("reading {delta}"))?;
    let script = decode_delta(&bytes).with_context(|| format!("decoding {delta}"))?;
    let stats = script.stats();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("serializing delta stats")?
        );
    } else {
        println!("delta:           {delta}");
        println!("output length:   {}", stats.expected_output_length);
        println!("copies:          {} ({} bytes)", stats.copy_count, stats.copied_bytes);
        println!("inserts:         {} ({} bytes)", stats.insert_count, stats.inserted_bytes);
        println!("encoded size:    {}", bytes.len());
    }

    if verbose {
        for (i, instruction) in script.instructions().iter().enumerate() {
            match instruction {
                DeltaInstruction::CopyBlock {
                    basis_offset,
                    length,
                } => println!("{i:>6}  copy    offset={basis_offset} length={length}"),
                DeltaInstruction::InsertData { bytes } => {
                    println!("{i:>6}  insert  length={}", bytes.len())
                }
            }
        }
    }
    Ok(())
}

// ── `deltablob health` / `config show` ────────────────────────────────────────

async fn cmd_health(config: &DeltaBlobConfig) -> Result<()> {
    let op = deltablob_storage::build_operator(&config.storage)
        .with_context(|| format!("opening {:?} storage backend", config.storage.backend))?;
    deltablob_storage::check_health(&op).await?;
    println!("storage: healthy ({:?})", config.storage.backend);
    Ok(())
}

fn cmd_config_show(config: &DeltaBlobConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
