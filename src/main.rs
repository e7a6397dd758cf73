//! # Lexsignal CLI (`lxs`)
//!
//! The `lxs` binary is the primary interface for Lexsignal. It provides
//! commands for database initialization, document and score ingestion,
//! word-token propagation, aggregation, baseline construction, and event
//! detection.
//!
//! ## Usage
//!
//! ```bash
//! lxs --config ./config/lxs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lxs init` | Create the SQLite database and run schema migrations |
//! | `lxs load <file>` | Register collector documents from JSONL |
//! | `lxs classify <file>` | Attach classifier score vectors from JSONL |
//! | `lxs propagate` | Tokenize classified documents into word tokens |
//! | `lxs aggregate` | Roll up dimension scores over a period |
//! | `lxs baseline <dim>` | Build a percentile reference distribution |
//! | `lxs detect <dim>` | Test a window for an anomalous shift |
//! | `lxs stats` | Corpus overview |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! lxs init --config ./config/lxs.toml
//!
//! # Ingest a collector dump, then classifier scores with token propagation
//! lxs load dumps/2024-06.jsonl
//! lxs classify scores/2024-06.jsonl --with-tokens
//!
//! # Daily rollup for June
//! lxs aggregate --from 2024-06-01 --to 2024-06-30 --group-by day
//!
//! # Baseline over the first five months, then test a June window
//! lxs baseline certainty --from 2024-01-01 --to 2024-05-31
//! lxs detect certainty --from 2024-06-09 --to 2024-06-15 \
//!     --baseline-from 2024-01-01 --baseline-to 2024-05-31
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use lexsignal::aggregate::{self, AggregateOptions, DocumentFilter, GroupBy};
use lexsignal::baseline::build_baseline;
use lexsignal::config::{self, Config};
use lexsignal::db;
use lexsignal::detect::{evaluate, sample_control_windows, DetectionOptions};
use lexsignal::ingest;
use lexsignal::migrate;
use lexsignal::models::PeriodRange;
use lexsignal::report;

/// Lexsignal CLI — storage and anomaly analysis for linguistically scored
/// forum documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lxs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lxs",
    about = "Lexsignal — storage and anomaly analysis for linguistically scored forum documents",
    version,
    long_about = "Lexsignal stores documents collected from public forums together with \
    multi-dimensional linguistic score vectors produced by an external classifier, deduplicates \
    identical vectors, rolls scores up per period, builds long-run baseline distributions, and \
    tests candidate time windows for statistically anomalous shifts."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lxs.toml`. Dimension names, the dedup key, and
    /// detection thresholds are read from this file.
    #[arg(long, global = true, default_value = "./config/lxs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// classifications, document_classifications, word_tokens). This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Register collector documents from a JSONL file.
    ///
    /// Each line is one document with `source`, `source_id`, `created_at`,
    /// and optional `title`, `author`, `topic`, `body`. Re-loading the same
    /// `(source, source_id)` updates the stored document in place.
    Load {
        /// Path to the JSONL file.
        input: PathBuf,

        /// Maximum number of lines to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Parse and count without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Attach classifier score vectors from a JSONL file.
    ///
    /// Each line carries a `document_id` and a `scores` object mapping
    /// dimension names to values. Identical vectors share one stored record.
    /// A document that already has a classification is skipped unless
    /// `--overwrite` is given.
    Classify {
        /// Path to the JSONL file.
        input: PathBuf,

        /// Replace existing classification links (and tokens, with
        /// `--with-tokens`) instead of skipping.
        #[arg(long)]
        overwrite: bool,

        /// Also tokenize each document body into word tokens.
        #[arg(long)]
        with_tokens: bool,

        /// Maximum number of lines to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Tokenize classified document bodies into word tokens.
    ///
    /// Every token inherits the document's classification, enabling
    /// word-level aggregation.
    Propagate {
        /// Document id to propagate.
        document_id: Option<String>,

        /// Propagate every classified document that has a body and no
        /// tokens yet.
        #[arg(long)]
        all_pending: bool,

        /// Delete and rewrite existing tokens instead of rejecting.
        #[arg(long)]
        replace: bool,
    },

    /// Roll up dimension scores over a period.
    ///
    /// Only classified documents participate. Groups below the configured
    /// sample floor are flagged low-confidence, never dropped.
    Aggregate {
        /// Period start (YYYY-MM-DD, inclusive).
        #[arg(long)]
        from: String,

        /// Period end (YYYY-MM-DD, inclusive).
        #[arg(long)]
        to: String,

        /// Grouping axis: `all`, `day`, `topic`, or `word`.
        #[arg(long, default_value = "all")]
        group_by: String,

        /// Restrict to one document topic.
        #[arg(long)]
        topic: Option<String>,

        /// Restrict to one collector source.
        #[arg(long)]
        source: Option<String>,

        /// Restrict to occurrences of one word (token-level scan).
        #[arg(long)]
        word: Option<String>,

        /// Report per-dimension medians too (holds values in memory).
        #[arg(long)]
        median: bool,

        /// Print the result as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Build a percentile reference distribution for one dimension.
    Baseline {
        /// Dimension name (e.g. `certainty`).
        dimension: String,

        /// Reference period start (YYYY-MM-DD, inclusive).
        #[arg(long)]
        from: String,

        /// Reference period end (YYYY-MM-DD, inclusive).
        #[arg(long)]
        to: String,

        /// Restrict to one document topic.
        #[arg(long)]
        topic: Option<String>,

        /// Restrict to one collector source.
        #[arg(long)]
        source: Option<String>,

        /// Print the distribution as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Test a candidate window for an anomalous shift in one dimension.
    ///
    /// The window is compared against a baseline built over the reference
    /// period and against control windows sampled from it. The window must
    /// not overlap the reference period.
    Detect {
        /// Dimension name (e.g. `certainty`).
        dimension: String,

        /// Window start (YYYY-MM-DD, inclusive).
        #[arg(long)]
        from: String,

        /// Window end (YYYY-MM-DD, inclusive).
        #[arg(long)]
        to: String,

        /// Reference period start (YYYY-MM-DD, inclusive).
        #[arg(long)]
        baseline_from: String,

        /// Reference period end (YYYY-MM-DD, inclusive).
        #[arg(long)]
        baseline_to: String,

        /// Restrict to one document topic.
        #[arg(long)]
        topic: Option<String>,

        /// Restrict to one collector source.
        #[arg(long)]
        source: Option<String>,

        /// Seed for control-window sampling (overrides config; reproducible
        /// runs).
        #[arg(long)]
        seed: Option<u64>,

        /// Print the verdict as JSON instead of a report.
        #[arg(long)]
        json: bool,
    },

    /// Show corpus statistics: counts, classification coverage, dedup ratio.
    Stats,
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s))
}

fn parse_period(from: &str, to: &str) -> Result<PeriodRange> {
    PeriodRange::new(parse_date(from)?, parse_date(to)?)
}

fn parse_group_by(s: &str) -> Result<GroupBy> {
    match s {
        "all" => Ok(GroupBy::None),
        "day" => Ok(GroupBy::Day),
        "topic" => Ok(GroupBy::Topic),
        "word" => Ok(GroupBy::Word),
        other => anyhow::bail!("unknown group-by '{}', expected all|day|topic|word", other),
    }
}

async fn run_aggregate(
    cfg: &Config,
    period: PeriodRange,
    group_by: GroupBy,
    filter: DocumentFilter,
    median: bool,
    json: bool,
) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let opts = AggregateOptions {
        min_samples: cfg.aggregation.min_samples,
        include_median: median,
    };
    let groups = aggregate::aggregate(&pool, period, group_by, &filter, &opts).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("aggregate {}: no classified data", period);
        return Ok(());
    }

    println!("aggregate {}", period);
    for (key, agg) in &groups {
        let marker = if agg.low_confidence {
            "  [low confidence]"
        } else {
            ""
        };
        println!("  {} (n={}){}", key, agg.count, marker);
        for (dimension, dim) in &agg.dimensions {
            match dim.median {
                Some(median) => println!(
                    "    {:<24} mean {:>8.4}  median {:>8.4}  (n={})",
                    dimension, dim.mean, median, dim.count
                ),
                None => println!(
                    "    {:<24} mean {:>8.4}  (n={})",
                    dimension, dim.mean, dim.count
                ),
            }
        }
    }
    Ok(())
}

async fn run_baseline(
    cfg: &Config,
    dimension: &str,
    reference: PeriodRange,
    filter: DocumentFilter,
    json: bool,
) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let baseline = build_baseline(&pool, dimension, reference, &filter).await?;
    pool.close().await;

    let Some(baseline) = baseline else {
        println!(
            "baseline {} {}: no classified data in reference period",
            dimension, reference
        );
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&baseline)?);
        return Ok(());
    }

    println!("baseline {} {}", baseline.dimension, baseline.period);
    println!("  days with data: {}", baseline.n_periods);
    println!("  mean:           {:.4}", baseline.mean);
    for (p, value) in baseline.thresholds() {
        println!("  p{}:            {:>8.4}", p, value);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_detect(
    cfg: &Config,
    dimension: &str,
    window: PeriodRange,
    reference: PeriodRange,
    filter: DocumentFilter,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(cfg).await?;

    let Some(baseline) = build_baseline(&pool, dimension, reference, &filter).await? else {
        pool.close().await;
        anyhow::bail!(
            "no classified data for '{}' in reference period {}",
            dimension,
            reference
        );
    };

    let mut rng = match seed.or(cfg.detection.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let controls = sample_control_windows(
        &mut rng,
        reference,
        window.days(),
        cfg.detection.control_windows,
        &window,
    );

    let opts = DetectionOptions {
        significance_level: cfg.detection.significance_level,
        min_samples: cfg.aggregation.min_samples,
    };
    let result = evaluate(&pool, window, &baseline, &controls, &filter, &opts).await?;
    pool.close().await;

    let Some(result) = result else {
        println!("detect {} {}: no classified data in window", dimension, window);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("detect {} {}", result.dimension, result.window);
    println!(
        "  window mean:      {:.4}  (docs: {})",
        result.window_mean, result.window_docs
    );
    println!(
        "  baseline mean:    {:.4}  ({})",
        result.baseline_mean, result.reference
    );
    println!("  change:           {:+.1}%", result.pct_change * 100.0);
    println!("  t-statistic:      {:.3}", result.t_statistic);
    println!("  p-value:          {:.3e}", result.p_value);
    println!("  effect size (d):  {:.3}", result.effect_size);
    println!(
        "  exceeds p95:      {}  (threshold {:.4})",
        yes_no(result.exceeds_p95),
        baseline.p95
    );
    println!(
        "  exceeds controls: {}  ({} controls)",
        yes_no(result.exceeds_all_controls),
        result.control_means.len()
    );
    println!("  significant:      {}", yes_no(result.significant));
    if result.low_confidence {
        println!("  low confidence:   yes");
    }
    println!(
        "  anomalous:        {}",
        if result.anomalous { "YES" } else { "no" }
    );
    Ok(())
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load {
            input,
            limit,
            dry_run,
        } => {
            ingest::run_load(&cfg, &input, limit, dry_run).await?;
        }
        Commands::Classify {
            input,
            overwrite,
            with_tokens,
            limit,
        } => {
            ingest::run_classify(&cfg, &input, overwrite, with_tokens, limit).await?;
        }
        Commands::Propagate {
            document_id,
            all_pending,
            replace,
        } => {
            ingest::run_propagate(&cfg, document_id, all_pending, replace).await?;
        }
        Commands::Aggregate {
            from,
            to,
            group_by,
            topic,
            source,
            word,
            median,
            json,
        } => {
            let period = parse_period(&from, &to)?;
            let group_by = parse_group_by(&group_by)?;
            let filter = DocumentFilter {
                topic,
                source,
                word,
            };
            run_aggregate(&cfg, period, group_by, filter, median, json).await?;
        }
        Commands::Baseline {
            dimension,
            from,
            to,
            topic,
            source,
            json,
        } => {
            let reference = parse_period(&from, &to)?;
            let filter = DocumentFilter {
                topic,
                source,
                word: None,
            };
            run_baseline(&cfg, &dimension, reference, filter, json).await?;
        }
        Commands::Detect {
            dimension,
            from,
            to,
            baseline_from,
            baseline_to,
            topic,
            source,
            seed,
            json,
        } => {
            let window = parse_period(&from, &to)?;
            let reference = parse_period(&baseline_from, &baseline_to)?;
            let filter = DocumentFilter {
                topic,
                source,
                word: None,
            };
            run_detect(&cfg, &dimension, window, reference, filter, seed, json).await?;
        }
        Commands::Stats => {
            report::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
