use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use data_loader::{parse_catalog, resolve_log_sources, Catalog, UserId};
use fairness::{AuditReport, FairnessAuditor, LightUserPolicy, DEFAULT_LIGHT_THRESHOLD, MISSING_GENRE_PROBABILITY};
use server::{build_gateway, GatewayConfig, RecommendationGateway, ServedRecommendation};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::info;

/// ReelRecs - experiment gateway and exposure-fairness audit
#[derive(Parser)]
#[command(name = "reel-recs")]
#[command(about = "A/B recommendation gateway with provenance logging and fairness audit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway until Ctrl-C
    Serve {
        /// Gateway configuration file
        #[arg(short, long, default_value = "reel-recs.toml")]
        config: PathBuf,

        /// Override the configured listen address
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Serve one request through the gateway and print it
    Recommend {
        #[arg(short, long, default_value = "reel-recs.toml")]
        config: PathBuf,

        /// User ID to get recommendations for
        #[arg(long)]
        user_id: UserId,

        /// MovieLens movies.dat used to show titles
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Compare light users' genre exposure with everyone's
    Audit {
        /// Ratings dataset used to count ratings per user
        #[arg(long)]
        data: PathBuf,

        /// Exposure log files or glob patterns
        #[arg(long, num_args = 1.., required = true)]
        logs: Vec<String>,

        /// Users with at most this many ratings are light
        #[arg(long, default_value_t = DEFAULT_LIGHT_THRESHOLD)]
        threshold: u32,

        /// Print the per-genre table and per-file counts
        #[arg(long)]
        breakdown: bool,
    },

    /// Fire concurrent requests through the gateway and report latency
    Benchmark {
        #[arg(short, long, default_value = "reel-recs.toml")]
        config: PathBuf,

        /// Number of requests to make
        #[arg(long, default_value = "100")]
        requests: usize,

        /// Number of requests in flight at once
        #[arg(long, default_value = "10")]
        concurrent: usize,

        /// User ids are drawn from 1..=max_user_id
        #[arg(long, default_value = "6040")]
        max_user_id: UserId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => handle_serve(&config, listen).await?,
        Commands::Recommend {
            config,
            user_id,
            catalog,
        } => handle_recommend(&config, user_id, catalog.as_deref()).await?,
        Commands::Audit {
            data,
            logs,
            threshold,
            breakdown,
        } => handle_audit(&data, &logs, threshold, breakdown)?,
        Commands::Benchmark {
            config,
            requests,
            concurrent,
            max_user_id,
        } => handle_benchmark(&config, requests, concurrent, max_user_id).await?,
    }

    Ok(())
}

fn load_gateway(config_path: &Path) -> Result<(GatewayConfig, RecommendationGateway)> {
    let start = Instant::now();
    let config = GatewayConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let gateway = build_gateway(&config).context("Failed to build gateway")?;
    eprintln!(
        "{} Loaded {} models in {:?}",
        "✓".green(),
        gateway.registry().len(),
        start.elapsed()
    );
    Ok((config, gateway))
}

/// Handle the 'serve' command
async fn handle_serve(config_path: &Path, listen: Option<SocketAddr>) -> Result<()> {
    let (config, gateway) = load_gateway(config_path)?;
    let addr = listen.unwrap_or(config.listen_addr);

    server::serve(gateway, addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await
    .with_context(|| format!("Gateway on {} failed", addr))?;

    Ok(())
}

/// Handle the 'recommend' command
async fn handle_recommend(config_path: &Path, user_id: UserId, catalog: Option<&Path>) -> Result<()> {
    if user_id == 0 {
        bail!("User id must be positive");
    }
    let (_, gateway) = load_gateway(config_path)?;
    let catalog = catalog
        .map(|path| parse_catalog(path).with_context(|| format!("Failed to load {}", path.display())))
        .transpose()?;

    let served = gateway.recommend(user_id).await;
    gateway.shutdown().await;
    let served = served.context("Recommendation failed")?;

    print_recommendation(&served, catalog.as_ref());
    Ok(())
}

/// Handle the 'audit' command
fn handle_audit(data: &Path, logs: &[String], threshold: u32, breakdown: bool) -> Result<()> {
    let sources = resolve_log_sources(logs).context("Failed to select exposure logs")?;
    let auditor = FairnessAuditor::from_dataset(data, LightUserPolicy::new(threshold))
        .with_context(|| format!("Failed to load ratings from {}", data.display()))?;

    let report = auditor.audit_sources(&sources).context("Audit failed")?;

    println!("{}", report.summary_line());
    eprintln!(
        "{} entries from {} files, {} light ({} skipped)",
        report.tally.entries,
        report.tally.sources.len(),
        report.tally.light_entries,
        report.skipped()
    );
    if breakdown {
        print_breakdown(&report);
    }
    Ok(())
}

/// Handle the 'benchmark' command
async fn handle_benchmark(
    config_path: &Path,
    requests: usize,
    concurrent: usize,
    max_user_id: UserId,
) -> Result<()> {
    if requests == 0 || max_user_id == 0 {
        bail!("--requests and --max-user-id must be positive");
    }
    let (_, gateway) = load_gateway(config_path)?;

    let user_ids: Vec<UserId> = (0..requests)
        .map(|_| rand::random::<u32>() % max_user_id + 1)
        .collect();

    let permits = Arc::new(Semaphore::new(concurrent.max(1)));
    let run_start = Instant::now();
    let mut handles = Vec::with_capacity(requests);
    for user_id in user_ids {
        let gateway = gateway.clone();
        let permits = Arc::clone(&permits);
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await?;
            let start = Instant::now();
            let served = gateway.recommend(user_id).await;
            Ok::<_, anyhow::Error>((start.elapsed(), served.is_ok()))
        }));
    }

    let mut timings = Vec::with_capacity(requests);
    let mut failures = 0usize;
    for handle in handles {
        let (elapsed, ok) = handle.await??;
        timings.push(elapsed);
        if !ok {
            failures += 1;
        }
    }
    let wall_time = run_start.elapsed();
    let stats = gateway.shutdown().await;

    timings.sort();
    let total: Duration = timings.iter().sum();
    let avg_latency = total / timings.len() as u32;
    let throughput = requests as f64 / wall_time.as_secs_f64();

    println!("{}", "Benchmark results:".bold().blue());
    println!("Requests: {} ({} failed)", requests, failures);
    println!("Wall time: {:?}", wall_time);
    println!("Average latency: {:?}", avg_latency);
    println!("P50 latency: {:?}", percentile(&timings, 0.50));
    println!("P95 latency: {:?}", percentile(&timings, 0.95));
    println!("P99 latency: {:?}", percentile(&timings, 0.99));
    println!("Throughput: {:.2} requests/second", throughput);
    println!(
        "Provenance: {} written, {} dropped, {} failed",
        stats.provenance.written, stats.provenance.dropped, stats.provenance.failed
    );

    Ok(())
}

/// Nearest-rank percentile of sorted timings
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

fn print_recommendation(served: &ServedRecommendation, catalog: Option<&Catalog>) {
    println!("{}", format!("Recommendations for user {}:", served.user_id).bold().blue());
    let variant = served.variant().to_string();
    match &served.assignment.fallback {
        Some(reason) => println!("Variant: {} {}", variant.yellow(), format!("(fallback: {})", reason).yellow()),
        None => println!("Variant: {}", variant.green()),
    }
    println!("Model version: {}", served.model_version);
    println!("Data version: {}", served.data_version);

    for (i, item) in served.recommendations.iter().enumerate() {
        let rank = (i + 1).to_string().green();
        let movie = item
            .parse()
            .ok()
            .and_then(|id| catalog.and_then(|c| c.get_movie(id)));
        match movie {
            Some(movie) => {
                let genres = movie
                    .genres
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{}. {} [{}] (movie {})", rank, movie.title, genres, item);
            }
            None => println!("{}. movie {}", rank, item),
        }
    }
}

fn print_breakdown(report: &AuditReport) {
    let genres: BTreeSet<&str> = report
        .light
        .iter()
        .chain(report.global.iter())
        .map(|(genre, _)| genre)
        .collect();

    eprintln!("{}", format!("Light users: <= {} ratings", report.threshold).bold().blue());
    eprintln!("{:<14} {:>8} {:>8} {:>9}", "genre", "light", "global", "p·ln(p/q)");
    for genre in genres {
        let p = report.light.get(genre).unwrap_or(0.0);
        let q = report.global.get(genre).unwrap_or(0.0);
        let contribution = if p > 0.0 {
            p * (p / report.global.get(genre).unwrap_or(MISSING_GENRE_PROBABILITY)).ln()
        } else {
            0.0
        };
        let line = format!("{:<14} {:>8.3} {:>8.3} {:>9.3}", genre, p, q, contribution);
        if contribution > 0.0 {
            eprintln!("{}", line.yellow());
        } else {
            eprintln!("{}", line);
        }
    }

    eprintln!("{}", "Sources:".bold().blue());
    for source in &report.tally.sources {
        let skipped = if source.stats.skipped > 0 {
            source.stats.skipped.to_string().red()
        } else {
            source.stats.skipped.to_string().normal()
        };
        eprintln!(
            "  {} {} entries, {} skipped",
            source.path.display(),
            source.stats.entries,
            skipped
        );
    }
}
