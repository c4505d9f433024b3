//! Snipbox CLI
//!
//! Serves the HTTP and WebSocket front end, or runs single jobs locally.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snipbox::job::{Action, Compiler, Job, JobRequest, Language};
use snipbox::runner::{JobContext, Runner};
use snipbox::{Config, EXAMPLE_CONFIG, filter};
use tokio::net::TcpListener;
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

mod http;
mod ws;

#[derive(Parser)]
#[command(name = "snipbox")]
#[command(about = "Sandboxed compile, run and analysis of C/C++ snippets")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Address to listen on (default: from configuration)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path (default: snipbox.toml)
        #[arg(short, long, default_value = "snipbox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run one job locally and print its report
    Run {
        /// Source file
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language: c or cpp (default: from the file extension)
        #[arg(short, long, value_parser = parse_wire::<Language>)]
        lang: Option<Language>,

        /// compile, assembly, both, format, lint, memcheck, debug or trace
        #[arg(short, long, default_value = "compile", value_parser = parse_wire::<Action>)]
        action: Action,

        /// gcc or clang
        #[arg(long, default_value = "gcc", value_parser = parse_wire::<Compiler>)]
        compiler: Compiler,

        /// Optimisation flag
        #[arg(short = 'O', long, default_value = "-O0", allow_hyphen_values = true)]
        optimization: String,
    },

    /// Run only the pre-filter on a source file
    Check {
        /// Source file
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },

    /// Show effective configuration
    ShowConfig,
}

/// Parse a CLI value the way the wire format spells it
fn parse_wire<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unsupported value '{value}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::from_env().context("failed to load configuration")?
    };

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            lang,
            action,
            compiler,
            optimization,
        } => run_local(config, &source, lang, action, compiler, optimization).await,
        Commands::Check { source } => check(&config, &source).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn serve(config: Config, bind: Option<String>) -> Result<()> {
    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let state = http::AppState::new(config);
    let app = http::router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "snipbox listening");

    axum::serve(listener, app).await.context("server error")
}

fn language_of(source: &Path) -> Result<Language> {
    match source.extension().and_then(|ext| ext.to_str()) {
        Some("c") | Some("h") => Ok(Language::C),
        Some("cpp") | Some("cc") | Some("cxx") | Some("hpp") => Ok(Language::Cpp),
        _ => anyhow::bail!(
            "cannot tell the language of '{}', pass --lang",
            source.display()
        ),
    }
}

async fn run_local(
    config: Config,
    source: &Path,
    lang: Option<Language>,
    action: Action,
    compiler: Compiler,
    optimization: String,
) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;
    let lang = match lang {
        Some(lang) => lang,
        None => language_of(source)?,
    };

    let job = Job::from_request(JobRequest {
        code,
        lang,
        compiler,
        optimization,
        action,
    })
    .context("invalid job")?;

    info!(job = %job.id(), %action, "running job");
    let runner = Runner::new(config);

    match runner.run_job(&job, JobContext::default()).await {
        Ok(report) => {
            print!("{}", report.to_text());
            if report.has_failed_outcome() {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(error) => {
            if let Some(report) = error.report() {
                eprint!("{}", report.to_text());
            }
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}

async fn check(config: &Config, source: &Path) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    match filter::check(&code, &config.source_limits) {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(rejection) => {
            println!("Rejected: {rejection}");
            std::process::exit(1);
        }
    }
}

fn show_config(config: &Config) {
    let limits = &config.limits;
    println!("Resource limits:");
    println!("  CPU time limit: {:?} s", limits.time_limit);
    println!("  Wall time limit: {:?} s", limits.wall_time_limit);
    println!("  Memory limit: {:?} KB", limits.memory_limit);
    println!("  RSS limit: {:?} KB", limits.rss_limit);
    println!("  Stack limit: {:?} KB", limits.stack_limit);
    println!("  Max processes: {:?}", limits.max_processes);
    println!("  Max output: {:?} KB", limits.max_output);
    println!();
    println!(
        "Source limits: {} chars, {} lines",
        config.source_limits.max_chars, config.source_limits.max_lines
    );
    println!(
        "Concurrency: {} jobs, {:?} queue timeout",
        config.max_concurrent_jobs,
        config.queue_timeout()
    );
    println!("Workspaces: {}", config.temp_root.display());
    println!();
    println!(
        "Session: ping every {:?}, {:?} grace, {:?} idle",
        config.session.heartbeat_interval(),
        config.session.heartbeat_grace(),
        config.session.idle_timeout()
    );
    println!("Listen address: {}", config.server.bind);
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
