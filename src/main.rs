use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use postdedup::services::{Cluster, Journal};
use postdedup::{Checkpoints, DedupEngine, InterruptCoordinator, PipelineConfig, RunSummary};
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "postdedup",
    version,
    about = "Perceptual-hash deduplication of social media post images"
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline: intra-post dedup, ad filter, cross-post relocation
    Run {
        #[command(flatten)]
        corpus: CorpusArgs,
        /// Only show what would be removed or moved
        #[arg(long)]
        dry_run: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Write the run summary as JSON
        #[arg(long, value_name = "FILE")]
        summary_json: Option<PathBuf>,
    },

    /// List clusters of reposted posts without changing anything
    Clusters {
        #[command(flatten)]
        corpus: CorpusArgs,
    },

    /// Work with the action journal
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List every recorded removal and relocation
    List {
        /// State directory holding history.jsonl
        #[arg(long, value_name = "DIR")]
        state_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct CorpusArgs {
    /// JSON config file; flags given here override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Base image directory (repeatable)
    #[arg(short, long = "base", value_name = "DIR")]
    base: Vec<PathBuf>,
    /// Directory of known advertisement/watermark images (repeatable)
    #[arg(long = "ads", value_name = "DIR")]
    ads: Vec<PathBuf>,
    /// Where relocated duplicates go (default: `<first base>/duplicates`)
    #[arg(short, long, value_name = "DIR")]
    quarantine: Option<PathBuf>,
    /// Where caches and the journal live (default: `<first base>/.postdedup`)
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,
    /// File name prefix before the group id
    #[arg(long)]
    prefix: Option<String>,
    /// Hash side length; the fingerprint has size² bits
    #[arg(long)]
    hash_size: Option<u32>,
    /// Max Hamming distance for duplicates within a post and for ad matches
    #[arg(long)]
    intra_threshold: Option<u32>,
    /// Max Hamming distance for duplicates across posts
    #[arg(long)]
    inter_threshold: Option<u32>,
    /// Hide progress bars
    #[arg(long)]
    quiet: bool,
}

impl CorpusArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if !self.base.is_empty() {
            config.base_dirs = self.base;
        }
        if !self.ads.is_empty() {
            config.special_dirs = self.ads;
        }
        match self.quarantine {
            Some(dir) => config.quarantine_dir = dir,
            None if self.config.is_none() => {
                if let Some(base) = config.base_dirs.first() {
                    config.quarantine_dir = base.join("duplicates");
                }
            }
            None => {}
        }
        if self.state_dir.is_some() {
            config.state_dir = self.state_dir;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if let Some(size) = self.hash_size {
            config.hash_size = size;
        }
        if let Some(t) = self.intra_threshold {
            config.intra_post_threshold = t;
        }
        if let Some(t) = self.inter_threshold {
            config.inter_post_threshold = t;
        }
        config.quiet |= self.quiet;
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_secs()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            corpus,
            dry_run,
            yes,
            summary_json,
        } => {
            let mut config = corpus.into_config()?;
            config.dry_run = dry_run;

            println!("▶ Deduplicating:");
            for dir in &config.base_dirs {
                println!("   ▶ {}", dir.display());
            }
            println!("   📦 Quarantine → {}", config.quarantine_dir.display());

            if !dry_run && !yes && std::io::stdin().is_terminal() {
                let proceed = Confirm::new()
                    .with_prompt("Near-duplicates will be deleted and reposts moved. Continue?")
                    .default(false)
                    .interact()?;
                if !proceed {
                    println!("Aborted; nothing was changed.");
                    return Ok(());
                }
            }

            let summary = run_pipeline(config)?;
            print_summary(&summary);
            if let Some(path) = summary_json {
                let json = serde_json::to_string_pretty(&summary)?;
                fs::write(&path, json + "\n")
                    .with_context(|| format!("Failed to write summary {:?}", path))?;
                println!("\n✅ Summary written to {}", path.display());
            }
        }

        Commands::Clusters { corpus } => {
            let mut config = corpus.into_config()?;
            config.dry_run = true;
            let summary = run_pipeline(config)?;
            if summary.clusters.is_empty() {
                println!("No reposted posts found.");
            } else {
                println!("Found {} cluster(s):", summary.clusters.len());
                for cluster in &summary.clusters {
                    print_cluster(cluster);
                }
            }
        }

        Commands::History { command } => match command {
            HistoryCmd::List { state_dir } => {
                let path = state_dir.join("history.jsonl");
                let records = Journal::read_all(&path)
                    .with_context(|| format!("Could not read history file {:?}", path))?;
                println!("🗂️  Action history ({} entries):", records.len());
                for (i, rec) in records.iter().enumerate() {
                    let to = rec
                        .to
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "removed".to_string());
                    println!(
                        "[{}] {} {}\n     post: {}{}\n     {} → {}\n     why: {}\n",
                        i,
                        rec.timestamp,
                        rec.stage,
                        rec.post,
                        rec.cluster
                            .as_ref()
                            .map(|c| format!(" ({})", c))
                            .unwrap_or_default(),
                        rec.from.display(),
                        to,
                        rec.reason
                    );
                }
            }
        },
    }

    Ok(())
}

fn run_pipeline(config: PipelineConfig) -> Result<RunSummary> {
    let coordinator = InterruptCoordinator::new();
    coordinator
        .install()
        .context("Failed to install signal handler")?;
    let mut engine = DedupEngine::open(config, Checkpoints::new(coordinator))
        .context("Failed to load persisted state")?;
    let summary = engine.run().context("Pipeline failed")?;
    Ok(summary)
}

fn print_cluster(cluster: &Cluster) {
    println!("\n✨ Cluster {}:", cluster.label());
    println!("   🏆 Keeping → {}", cluster.canonical);
    for key in cluster.duplicates() {
        println!("   📦 {}", key);
    }
}

fn print_summary(summary: &RunSummary) {
    let dry = if summary.dry_run { " [dry-run]" } else { "" };
    println!("\n📊 Summary{}:", dry);
    println!(
        "   images: {} scanned ({} re-attached from quarantine), {} hashed, {} cached",
        summary.scanned, summary.reattached, summary.hashed, summary.cached
    );
    println!(
        "   skipped: {} unreadable, {} bad names, {} delimiters",
        summary.unreadable, summary.bad_names, summary.delimiters
    );
    println!(
        "   removed: {} within posts, {} special patterns ({} references)",
        summary.intra_post.changed, summary.ad_filter.changed, summary.special_references
    );
    println!(
        "   clusters: {}, relocated: {} ({} already in quarantine, {} missing)",
        summary.clusters.len(),
        summary.relocation.changed,
        summary.relocation.skipped,
        summary.relocation.missing
    );
    println!("   ⏱ took {:.2}s", summary.elapsed_secs);

    if let Some(stage) = summary.stopped_at {
        println!(
            "\n⚠️  Interrupted during {:?}; state saved, rerun to continue.",
            stage
        );
    } else if summary.dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
    } else {
        println!("\n✅ Done.");
    }
}
