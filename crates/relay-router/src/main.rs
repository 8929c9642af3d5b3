//! Relay - command-line front end for the router
//!
//! # Usage
//!
//! ```bash
//! # Show endpoint activation and health
//! relay health
//!
//! # One-shot prompt through the ranked endpoints
//! relay generate "Summarise RFC 8785 in one line"
//!
//! # Pin an endpoint and model
//! relay chat --model deepseek/deepseek-chat --system "Be terse" "Hello"
//!
//! # Performance report as Prometheus text
//! relay report --format prometheus
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use relay_llm::HttpTransport;
use relay_router::{
    ChatMessage, ChatResponse, EndpointStatus, GenerationOptions, Router, RouterConfig,
};

/// Relay - resilient routing across LLM providers
#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Route prompts across LLM providers with failover",
    long_about = "Relay sends each request to the best healthy provider endpoint,\n\
                  retrying with backoff and failing over when one stops answering."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, env = "RELAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show endpoint activation and health
    Health,

    /// Generate a completion for one prompt
    Generate(GenerateArgs),

    /// Complete a short conversation
    Chat(ChatArgs),

    /// Print the performance report
    Report(ReportArgs),
}

#[derive(Args)]
struct SamplingArgs {
    /// "auto" or "<endpoint>/<model>"
    #[arg(short, long, default_value = "auto")]
    model: String,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Nucleus sampling cutoff
    #[arg(long)]
    top_p: Option<f32>,
}

impl SamplingArgs {
    fn options(&self) -> GenerationOptions {
        let mut options = GenerationOptions::default();
        if let Some(max_tokens) = self.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(top_p) = self.top_p {
            options = options.with_top_p(top_p);
        }
        options
    }
}

#[derive(Args)]
struct GenerateArgs {
    prompt: String,

    #[command(flatten)]
    sampling: SamplingArgs,
}

#[derive(Args)]
struct ChatArgs {
    /// User message
    message: String,

    /// Optional system prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Print the full response as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    sampling: SamplingArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Json,
    Prometheus,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(short, long, value_enum, default_value = "json")]
    format: ReportFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = RouterConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let client = reqwest::Client::builder()
        .user_agent(concat!("relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    let router = Router::builder()
        .config(config)
        .transport(Arc::new(HttpTransport::with_client(client)))
        .build()
        .context("building router")?;

    let result = match cli.command {
        Commands::Health => {
            print_health(&router.health_status());
            Ok(())
        }
        Commands::Generate(args) => generate(&router, args).await,
        Commands::Chat(args) => chat(&router, args).await,
        Commands::Report(args) => report(&router, args),
    };

    router.shutdown().await;
    result
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
}

async fn generate(router: &Router, args: GenerateArgs) -> Result<()> {
    let text = router
        .generate(&args.prompt, &args.sampling.model, args.sampling.options())
        .await?;
    println!("{text}");
    Ok(())
}

async fn chat(router: &Router, args: ChatArgs) -> Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(args.message));

    let response = router
        .chat_complete(messages, &args.sampling.model, args.sampling.options())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn report(router: &Router, args: ReportArgs) -> Result<()> {
    let report = router.performance_report();
    match args.format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        ReportFormat::Prometheus => print!("{}", report.to_prometheus()),
    }
    Ok(())
}

fn print_health(endpoints: &[EndpointStatus]) {
    println!("{}", "Endpoints".bold().cyan());
    println!("{}", "═".repeat(50).cyan());

    if endpoints.is_empty() {
        println!("  {} No endpoints configured", "⚠".yellow().bold());
        return;
    }

    for status in endpoints {
        let marker = match (status.configured, status.health.healthy) {
            (true, true) => "✓".green().bold(),
            (true, false) => "✗".red().bold(),
            (false, _) => "-".dimmed(),
        };
        println!(
            "  {} {} {} {}",
            marker,
            status.name.bold(),
            format!("(priority {})", status.priority).dimmed(),
            status.default_model.green()
        );

        match &status.activation_error {
            Some(error) => println!("      {}", error.yellow()),
            None => println!(
                "      {} {:.0}  {} {:.1}%  {} {:.0}ms",
                "score".dimmed(),
                status.score,
                "success".dimmed(),
                status.health.success_rate() * 100.0,
                "latency".dimmed(),
                status.health.avg_latency_ms
            ),
        }
    }
}

fn print_response(response: &ChatResponse) {
    println!("{}", response.content);
    eprintln!();
    eprintln!(
        "{} {} {} {}ms",
        "ℹ".blue().bold(),
        format!("{} / {}", response.endpoint, response.model).dimmed(),
        "in".dimmed(),
        response.latency_ms
    );
    if let Some(usage) = response.usage {
        eprintln!(
            "  {} {} prompt + {} completion",
            "tokens".dimmed(),
            usage.prompt_tokens,
            usage.completion_tokens
        );
    }
}
