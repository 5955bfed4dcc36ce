use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use margatsni::config::Config;
use margatsni::matcher::{self, MatcherConfig};
use margatsni::monitor::Monitor;
use margatsni::types::{Candidate, MatchResult};
use margatsni::{SearchClient, SheetsClient};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "margatsni")]
#[command(about = "Finds Instagram profiles for people listed in a Google Sheet", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the sheet on an interval and process unfinished rows until interrupted
    Run {
        #[arg(
            long,
            value_name = "SECONDS",
            help = "Override the poll interval from the environment",
            value_parser = clap::value_parser!(u64).range(5..)
        )]
        interval: Option<u64>,
    },
    /// Execute a single poll cycle and exit
    Once,
    /// Search and score candidates for one name without touching the sheet
    Search {
        #[arg(help = "Name to search for")]
        name: String,

        #[arg(long, help = "Location to narrow the search")]
        location: Option<String>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

#[derive(Serialize)]
struct ScoredCandidate<'a> {
    score: f64,
    #[serde(flatten)]
    candidate: &'a Candidate,
}

#[derive(Serialize)]
struct SearchReport<'a> {
    candidates: Vec<ScoredCandidate<'a>>,
    verdict: &'a MatchResult,
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn build_monitor(config: &Config) -> Monitor {
    let sheets = SheetsClient::new(config).unwrap_or_else(|e| {
        log::error!("Error creating sheets client: {}", e);
        process::exit(1);
    });
    let search = SearchClient::new(config).unwrap_or_else(|e| {
        log::error!("Error creating search client: {}", e);
        process::exit(1);
    });
    Monitor::new(sheets, search, config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let mut config = Config::from_env().unwrap_or_else(|e| {
        log::error!("Configuration error: {}", e);
        process::exit(1);
    });

    match cli.command {
        Commands::Run { interval } => {
            if let Some(secs) = interval {
                config.poll_interval = Duration::from_secs(secs);
            }

            let mut monitor = build_monitor(&config);
            log::info!(
                "Monitoring spreadsheet {} every {:?}",
                config.spreadsheet_id,
                config.poll_interval
            );
            monitor
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
        }

        Commands::Once => {
            let mut monitor = build_monitor(&config);
            match monitor.run_cycle().await {
                Ok(stats) => print!("{}", stats),
                Err(e) => {
                    log::error!("Poll cycle failed: {}", e);
                    process::exit(1);
                }
            }
        }

        Commands::Search {
            name,
            location,
            format,
        } => {
            let search = SearchClient::new(&config).unwrap_or_else(|e| {
                log::error!("Error creating search client: {}", e);
                process::exit(1);
            });

            log::info!("Searching for '{}'...", name);
            let candidates = search
                .find_candidates(&name, location.as_deref())
                .await
                .unwrap_or_else(|e| {
                    log::error!("Search failed: {}", e);
                    process::exit(1);
                });

            let matcher_config = MatcherConfig {
                accept_threshold: config.accept_threshold,
                tie_margin: config.tie_margin,
            };
            let verdict = matcher::select_best(0, &name, None, &candidates, matcher_config);

            match format {
                OutputFormat::Json => {
                    let report = SearchReport {
                        candidates: candidates
                            .iter()
                            .map(|c| ScoredCandidate {
                                score: matcher::score(&name, c),
                                candidate: c,
                            })
                            .collect(),
                        verdict: &verdict,
                    };
                    serialize_json(&report);
                }
                OutputFormat::Text => {
                    if candidates.is_empty() {
                        println!("No candidate profiles found.");
                    } else {
                        for (i, candidate) in candidates.iter().enumerate() {
                            println!(
                                "{:>3}. {:.2}  {} (@{})",
                                i + 1,
                                matcher::score(&name, candidate),
                                candidate.display_name,
                                candidate.username
                            );
                        }
                    }
                    println!();
                    println!("Verdict: {}", verdict);
                }
            }
        }
    }
}
