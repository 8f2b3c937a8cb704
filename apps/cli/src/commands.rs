//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use feedgraph_core::pipeline::{IngestResult, ProgressReporter};
use feedgraph_core::publisher::to_pretty_json;
use feedgraph_feed::{FeedSource, HttpFeedSource};
use feedgraph_shared::{AppConfig, ContentId, IngestConfig, init_config, load_config};
use feedgraph_store::IpfsHttpStore;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// feedgraph: publish syndication feeds as content-addressed graphs.
#[derive(Parser)]
#[command(
    name = "feedgraph",
    version,
    about = "Ingest RSS/Atom/JSON feeds into an IPFS-style content-addressed store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch a feed, store its attachments, and publish the feed document.
    Ingest {
        /// Feed URL.
        url: String,

        /// Maximum concurrent enclosure fetches.
        #[arg(short, long)]
        concurrency: Option<u32>,

        /// Content store HTTP API (overrides the config file).
        #[arg(long, env = "FEEDGRAPH_API_URL")]
        api_url: Option<String>,

        /// Also print the published document as JSON.
        #[arg(long)]
        print_json: bool,
    },

    /// Assemble a feed document without fetching attachments or storing anything.
    Preview {
        /// Feed URL.
        url: String,
    },

    /// Print a feed as parsed, before assembly.
    #[command(name = "to-json")]
    ToJson {
        /// Feed URL.
        url: String,
    },

    /// Read a published feed document back from the store.
    Show {
        /// Root CID printed by `ingest`.
        cid: String,

        /// Content store HTTP API (overrides the config file).
        #[arg(long, env = "FEEDGRAPH_API_URL")]
        api_url: Option<String>,
    },

    /// Print the JSON Schema of the published feed document.
    Schema,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "feedgraph=info",
        1 => "feedgraph=debug",
        _ => "feedgraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest {
            url,
            concurrency,
            api_url,
            print_json,
        } => cmd_ingest(&url, concurrency, api_url.as_deref(), print_json).await,
        Command::Preview { url } => cmd_preview(&url).await,
        Command::ToJson { url } => cmd_to_json(&url).await,
        Command::Show { cid, api_url } => cmd_show(&cid, api_url.as_deref()).await,
        Command::Schema => cmd_schema(),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Runtime settings: config file, then flag overrides.
fn ingest_config(config: &AppConfig, concurrency: Option<u32>) -> IngestConfig {
    let mut ingest = IngestConfig::from(config);
    if let Some(concurrency) = concurrency {
        ingest.concurrency = concurrency.max(1);
    }
    ingest
}

/// Reject anything that is not an absolute http(s) URL.
///
/// The caller keeps using the URL as typed: the feed identity is derived from
/// it, and normalization (trailing slash, case) would change that identity.
fn check_feed_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(eyre!(
            "unsupported scheme '{other}' in '{url}': expected http or https"
        )),
    }
}

fn store_for(config: &AppConfig, api_url: Option<&str>) -> Result<IpfsHttpStore> {
    let api_url = api_url.unwrap_or(&config.store.api_url);
    Ok(IpfsHttpStore::new(api_url, config.store.pin)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(
    url: &str,
    concurrency: Option<u32>,
    api_url: Option<&str>,
    print_json: bool,
) -> Result<()> {
    check_feed_url(url)?;
    let config = load_config()?;
    let ingest = ingest_config(&config, concurrency);
    let store = Arc::new(store_for(&config, api_url)?);
    let source = HttpFeedSource::new()?;

    info!(
        %url,
        store = %store.api_url(),
        concurrency = ingest.concurrency,
        "ingesting feed"
    );

    let reporter = CliProgress::new();
    let result =
        feedgraph_core::ingest(url, &ingest, &source, store, &reporter).await?;

    if print_json {
        println!("{}", result.document_json);
    }
    println!("{}", result.root);

    eprintln!();
    eprintln!("  Feed published!");
    eprintln!("  Title:      {}", result.title);
    eprintln!("  Feed ID:    {}", result.feed_id);
    eprintln!("  Items:      {}", result.item_count);
    eprintln!("  Downgraded: {}", result.diagnostics.len());
    eprintln!("  Root:       {}", result.root);
    eprintln!("  Run:        {}", result.run_id);
    eprintln!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    eprintln!();

    Ok(())
}

async fn cmd_preview(url: &str) -> Result<()> {
    check_feed_url(url)?;
    let config = load_config()?;
    let source = HttpFeedSource::new()?;

    let document =
        feedgraph_core::preview(url, &ingest_config(&config, None), &source).await?;
    println!("{}", to_pretty_json(&document)?);
    Ok(())
}

async fn cmd_to_json(url: &str) -> Result<()> {
    check_feed_url(url)?;
    let config = load_config()?;
    let source = HttpFeedSource::new()?;

    let feed = source
        .fetch_feed(url, ingest_config(&config, None).feed_timeout)
        .await?;
    println!("{}", serde_json::to_string_pretty(&feed)?);
    Ok(())
}

async fn cmd_show(cid: &str, api_url: Option<&str>) -> Result<()> {
    let root: ContentId = cid.parse()?;
    let config = load_config()?;
    let store = store_for(&config, api_url)?;

    let document = feedgraph_core::read_document(&store, &root).await?;
    println!("{}", to_pretty_json(&document)?);
    Ok(())
}

fn cmd_schema() -> Result<()> {
    let schema = feedgraph_core::document_schema();
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_assembled(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Resolving enclosures [{current}/{total}]"));
    }

    fn done(&self, _result: &IngestResult) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        // Fatal errors skip `done`; don't leave a spinner behind.
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}
