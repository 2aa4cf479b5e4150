mod display;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use regwatch_core::bulk::FailurePolicy;
use regwatch_core::metrics::DEFAULT_JOB;
use regwatch_core::output::{HumanFormatter, JsonFormatter, OutputFormat, OutputFormatter};
use regwatch_core::style::Palette;
use regwatch_core::{
    normalize_domain, BatchExecutor, Config, ConfigDomain, DomainGauges, MetricsSink, Monitor,
    PushGateway, RuleTemplate, WhoisClient,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::display::{BatchProgress, LogWriterFactory};

#[derive(Parser)]
#[command(name = "regwatch")]
#[command(about = "Track domain expiry and registration state from WHOIS, using extraction templates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    options: Options,
}

#[derive(Args)]
struct Options {
    /// Domain list and desired state (YAML)
    #[arg(long, global = true, env = "REGWATCH_CONFIG", default_value = "domains.yml")]
    config: PathBuf,

    /// Extraction template for WHOIS responses
    #[arg(long, global = true, env = "REGWATCH_TEMPLATE", default_value = "whois.textfsm")]
    template: PathBuf,

    /// Pushgateway base URL
    #[arg(
        long,
        global = true,
        env = "REGWATCH_PUSHGATEWAY",
        default_value = "http://localhost:9091"
    )]
    pushgateway: String,

    /// Pushgateway job name
    #[arg(long, global = true, env = "REGWATCH_JOB", default_value = DEFAULT_JOB)]
    job: String,

    /// Print raw WHOIS responses and skip the metrics push
    #[arg(long, global = true)]
    debug_whois: bool,

    /// Stop the batch at the first domain that fails
    #[arg(long, global = true)]
    fail_fast: bool,

    /// Number of WHOIS queries in flight
    #[arg(long, global = true, default_value_t = 4)]
    concurrency: usize,

    /// Pause before each WHOIS query, in milliseconds
    #[arg(long, global = true, default_value_t = 0)]
    rate_limit_ms: u64,

    /// WHOIS timeout per operation, in seconds
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    /// Follow registry referrals to the registrar's WHOIS server
    #[arg(long, global = true)]
    follow_referrals: bool,

    /// Query this WHOIS server for every domain
    #[arg(long, global = true, hide = true)]
    whois_server: Option<String>,

    /// WHOIS server port
    #[arg(long, global = true, hide = true)]
    whois_port: Option<u16>,

    /// Output format (human or json)
    #[arg(short, long, global = true, default_value = "human")]
    format: String,

    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every configured domain and push metrics (default)
    Run,
    /// Evaluate a single domain and print its report
    Check {
        /// Domain name to evaluate
        domain: String,
        /// Read the WHOIS response from this file instead of querying
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Run the template over a WHOIS dump and print the extracted records
    Parse {
        /// File holding a raw WHOIS response
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.options;

    let default_level = match options.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(LogWriterFactory)
        .init();

    if options.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let command = cli.command.unwrap_or(Commands::Run);
    let result = match command {
        Commands::Run => run(&options).await,
        Commands::Check { domain, input } => check(&options, &domain, input.as_deref()).await,
        Commands::Parse { input } => parse(&options, &input),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {}", "Error:".bad(), describe(&e));
            ExitCode::FAILURE
        }
    }
}

/// The error and its causes on one line, skipping causes already quoted
/// by the message above them.
fn describe(error: &anyhow::Error) -> String {
    let mut message = error.to_string();
    for cause in error.chain().skip(1) {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
    }
    message
}

fn output_format(options: &Options) -> anyhow::Result<OutputFormat> {
    options
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
}

fn formatter(options: &Options, format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Human if options.no_color || !std::io::stdout().is_terminal() => {
            Box::new(HumanFormatter::new().without_colors())
        }
        OutputFormat::Human => Box::new(HumanFormatter::new()),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
    }
}

fn load_template(path: &Path) -> anyhow::Result<Arc<RuleTemplate>> {
    let template = RuleTemplate::load(path)
        .with_context(|| format!("loading template {}", path.display()))?;
    Ok(Arc::new(template))
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("loading configuration {}", path.display()))
}

fn whois_client(options: &Options) -> WhoisClient {
    let mut client = WhoisClient::new()
        .with_timeout(Duration::from_secs(options.timeout.max(1)))
        .with_referrals(options.follow_referrals);
    if let Some(server) = &options.whois_server {
        client = client.with_server(server.clone());
    }
    if let Some(port) = options.whois_port {
        client = client.with_port(port);
    }
    client
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Evaluates the whole configuration and publishes the gauges.
async fn run(options: &Options) -> anyhow::Result<bool> {
    let format = output_format(options)?;
    let formatter = formatter(options, format);
    let template = load_template(&options.template)?;
    let config = load_config(&options.config)?;
    let monitor = Arc::new(Monitor::new(template, config.fields.clone())?);

    let policy = if options.fail_fast {
        FailurePolicy::FailFast
    } else {
        FailurePolicy::Isolate
    };
    let executor = BatchExecutor::new(whois_client(options), monitor)
        .with_concurrency(options.concurrency)
        .with_rate_limit(Duration::from_millis(options.rate_limit_ms))
        .with_policy(policy)
        .with_raw_responses(options.debug_whois);

    info!(domains = config.domains.len(), "Evaluating configured domains");
    let progress = BatchProgress::start(config.domains.len(), std::io::stderr().is_terminal());
    let batch = executor
        .execute(&config.domains, Some(progress.callback()))
        .await;
    drop(progress);

    // JSON output already carries the raw responses.
    if options.debug_whois && format == OutputFormat::Human {
        for outcome in &batch.outcomes {
            if let Some(raw) = &outcome.raw_response {
                println!("{}", format!("=== {} ===", outcome.domain).heading());
                println!("{}", raw.trim_end());
            }
        }
    }
    println!("{}", formatter.format_batch(&batch));

    if let Some(reason) = &batch.aborted {
        warn!(reason = %reason, "Batch aborted, metrics not pushed");
        return Ok(false);
    }

    let gauges = DomainGauges::new()?;
    if !gauges.observe_batch(&batch, Utc::now()) {
        warn!(
            failed = batch.failures().count(),
            "Not every domain was evaluated, last-parsed timestamp left unset"
        );
    }

    if options.debug_whois {
        info!("Raw WHOIS output requested, skipping metrics push");
        return Ok(true);
    }

    let gateway = PushGateway::new(&options.pushgateway, &options.job)?;
    gateway
        .push(&gauges)
        .await
        .with_context(|| format!("pushing metrics to {}", gateway.endpoint()))?;

    Ok(true)
}

/// Evaluates one domain against its configured desired state.
async fn check(options: &Options, domain: &str, input: Option<&Path>) -> anyhow::Result<bool> {
    let format = output_format(options)?;
    let formatter = formatter(options, format);
    let template = load_template(&options.template)?;
    let config = load_config(&options.config)?;
    let monitor = Monitor::new(template, config.fields.clone())?;

    let name = normalize_domain(domain)?;
    let expected = match config.domain(&name) {
        Some(entry) => entry.clone(),
        None => {
            warn!(domain = %name, "Domain is not configured, comparing against no expectations");
            ConfigDomain::new(name.clone())
        }
    };

    let raw = match input {
        Some(path) => read_input(path)?,
        None => whois_client(options)
            .lookup(&name)
            .await
            .with_context(|| format!("looking up {}", name))?,
    };
    if options.debug_whois {
        eprintln!("{}", format!("=== {} ===", name).heading());
        eprintln!("{}", raw.trim_end());
    }

    let report = monitor.evaluate(&expected, &raw)?;
    println!("{}", formatter.format_report(&report));
    Ok(true)
}

/// Prints every record the template extracts from a local dump.
fn parse(options: &Options, input: &Path) -> anyhow::Result<bool> {
    let format = output_format(options)?;
    let formatter = formatter(options, format);
    let template = load_template(&options.template)?;
    let raw = read_input(input)?;

    let records = regwatch_core::extract(&raw, &template)
        .with_context(|| format!("extracting records from {}", input.display()))?;
    println!("{}", formatter.format_records(&records));
    Ok(true)
}
