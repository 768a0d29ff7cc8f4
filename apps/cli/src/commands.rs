//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tracing::info;

use cortap_consolidate::{AreaCatalog, Consolidator};
use cortap_core::{DataService, ProgressReporter, SubjectData};
use cortap_fetcher::{FetchSummary, RemoteClient};
use cortap_shared::{
    AppConfig, CacheConfig, CanonicalDocument, Finding, RemoteConfig, ValidationConfig,
    init_config, load_config, resolve_secret,
};
use cortap_storage::{CacheStore, open_blob_store};
use cortap_validator::SchemaValidator;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// cortap: compliance review data service.
#[derive(Parser)]
#[command(
    name = "cortap",
    version,
    about = "Fetch, consolidate, cache, and validate compliance review data.",
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
    /// Get a subject's canonical document, from cache when fresh.
    Fetch {
        /// Subject (project) identifier.
        subject: String,

        /// Bypass the cache and rebuild from the remote API.
        #[arg(long)]
        force: bool,

        /// Correlation id to tag logs and requests with.
        #[arg(long)]
        correlation_id: Option<String>,

        /// Header override as key=value (repeatable).
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Invalidate the cache, then rebuild from the remote API.
    Refresh {
        subject: String,

        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Drop a subject's cached document.
    Invalidate { subject: String },

    /// Check schema and template completeness for a subject.
    Validate {
        subject: String,

        /// Template identifier to score against.
        #[arg(short, long, default_value = "draft-audit-report")]
        template: String,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the review-area catalog in use.
    Catalog,

    /// Start the HTTP server.
    Serve {
        /// Address to bind (overrides `[server] bind`).
        #[arg(long)]
        bind: Option<String>,
    },

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
        0 => "cortap=info",
        1 => "cortap=debug",
        _ => "cortap=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

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
        Command::Fetch {
            subject,
            force,
            correlation_id,
            overrides,
            json,
        } => cmd_fetch(&subject, force, correlation_id.as_deref(), &overrides, json).await,
        Command::Refresh {
            subject,
            correlation_id,
        } => cmd_refresh(&subject, correlation_id.as_deref()).await,
        Command::Invalidate { subject } => cmd_invalidate(&subject).await,
        Command::Validate {
            subject,
            template,
            json,
        } => cmd_validate(&subject, &template, json).await,
        Command::Catalog => cmd_catalog(),
        Command::Serve { bind } => cmd_serve(bind.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Construct the data service and its collaborators from config.
async fn build_service(
    config: &AppConfig,
    progress: Option<Arc<dyn ProgressReporter>>,
) -> Result<DataService> {
    let token = resolve_secret(&config.remote.api_key_env, "Remote API key")?;
    let client = RemoteClient::new(RemoteConfig::from(config), token)?;

    let catalog = AreaCatalog::from_config(&config.catalog)?;
    let consolidator = Consolidator::new(catalog).with_header_defaults(config.header_defaults());

    let cache = build_cache(config).await?;
    let validator = SchemaValidator::new(ValidationConfig::from(config));

    let service = DataService::new(Arc::new(client), consolidator, cache, validator);
    Ok(match progress {
        Some(progress) => service.with_progress(progress),
        None => service,
    })
}

/// Open the cache alone. Needs no remote credentials.
async fn build_cache(config: &AppConfig) -> Result<CacheStore> {
    let store = open_blob_store(config).await?;
    Ok(CacheStore::new(store, CacheConfig::from(config)))
}

/// Parse `key=value` overrides. Values that parse as JSON keep their type.
fn parse_overrides(pairs: &[String]) -> Result<Map<String, Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| eyre!("invalid override '{pair}': expected KEY=VALUE"))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into()));
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_fetch(
    subject: &str,
    force: bool,
    correlation_id: Option<&str>,
    overrides: &[String],
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    let overrides = parse_overrides(overrides)?;
    let service = build_service(&config, Some(Arc::new(CliProgress::new()))).await?;

    info!(subject, force, "fetching subject data");
    let data = service
        .get_subject_data(subject, &overrides, force, correlation_id)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        print_subject(&data);
    }
    Ok(())
}

fn print_subject(data: &SubjectData) {
    let doc = &data.document;
    println!();
    println!("  Project:      {} ({})", doc.project.recipient_name, doc.project_id);
    println!("  Review type:  {}", doc.project.review_type);
    println!("  Region:       {}", doc.project.region_number);
    println!("  Catalog:      {}", doc.catalog_version);
    println!("  Review areas: {}", doc.metadata.total_review_areas);
    println!("  Deficiencies: {}", doc.metadata.deficiency_count);
    for area in &doc.metadata.deficiency_areas {
        println!("    - {area}");
    }
    match data.cache.cache_age_seconds {
        Some(age) if data.cache.cached => println!("  Cache:        hit ({age}s old)"),
        _ => println!(
            "  Cache:        miss ({})",
            data.cache.miss_reason.unwrap_or("unknown")
        ),
    }
    println!("  Correlation:  {}", data.correlation_id);
    println!();
}

async fn cmd_refresh(subject: &str, correlation_id: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config, Some(Arc::new(CliProgress::new()))).await?;

    let outcome = service.refresh(subject, correlation_id).await?;

    println!();
    println!("  Subject refreshed!");
    println!("  Project:      {}", outcome.document.project_id);
    println!("  Invalidated:  {}", outcome.invalidated);
    println!("  Records:      {}", outcome.records_fetched);
    println!("  Unmapped:     {}", outcome.unmapped_records);
    println!("  Review areas: {}", outcome.review_areas);
    println!("  Deficiencies: {}", outcome.document.metadata.deficiency_count);
    println!("  Correlation:  {}", outcome.correlation_id);
    println!();
    Ok(())
}

async fn cmd_invalidate(subject: &str) -> Result<()> {
    let config = load_config()?;
    let cache = build_cache(&config).await?;

    if cache.invalidate(subject).await {
        println!("Cache invalidated for {subject}");
    } else {
        println!("Nothing cached for {subject}");
    }
    Ok(())
}

async fn cmd_validate(subject: &str, template: &str, json: bool) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config, Some(Arc::new(CliProgress::new()))).await?;

    let summary = service.check(subject, template, None).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let completeness = &summary.completeness;
    println!();
    println!("  Schema valid:   {}", summary.schema.valid);
    for error in &summary.schema.errors {
        println!("    error:   {error}");
    }
    for warning in &summary.schema.warnings {
        println!("    warning: {warning}");
    }
    println!("  Template:       {}", completeness.template_id);
    println!("  Quality score:  {}", completeness.data_quality_score);
    println!("  Can generate:   {}", completeness.can_generate);
    for field in &completeness.missing_critical_fields {
        println!("    missing (critical): {field}");
    }
    for field in &completeness.missing_optional_fields {
        println!("    missing (optional): {field}");
    }
    println!();
    Ok(())
}

fn cmd_catalog() -> Result<()> {
    let config = load_config()?;
    let catalog = AreaCatalog::from_config(&config.catalog)?;

    println!("Catalog {} ({} areas)", catalog.version(), catalog.len());
    for area in catalog.areas() {
        let prefixes: Vec<&str> = catalog
            .prefixes()
            .iter()
            .filter(|(_, target)| *target == area)
            .map(|(prefix, _)| prefix.as_str())
            .collect();
        println!("  {area:<40} {}", prefixes.join(", "));
    }
    Ok(())
}

async fn cmd_serve(bind: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let bind = bind.unwrap_or(&config.server.bind).to_string();
    let service = Arc::new(build_service(&config, None).await?);

    println!("Serving on http://{bind}/api/v1");
    crate::server::serve(service, &bind)
        .await
        .map_err(|e| eyre!("server error on {bind}: {e}"))
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn fetched(&self, summary: &FetchSummary) {
        self.spinner.set_message(format!(
            "Fetched {}/{} records ({} failed)",
            summary.fetched,
            summary.listed,
            summary.failures.len()
        ));
    }

    fn done(&self, document: &CanonicalDocument, cached: bool) {
        let deficient = document
            .assessments
            .iter()
            .filter(|a| a.finding == Finding::Deficient)
            .count();
        let source = if cached { "cache" } else { "remote" };
        self.spinner.finish_with_message(format!(
            "{} review areas, {deficient} deficient ({source})",
            document.assessments.len()
        ));
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortap_shared::CacheBackendKind;

    #[test]
    fn cli_parses_fetch_flags() {
        let cli = Cli::try_parse_from([
            "cortap", "-v", "fetch", "33", "--force", "--set", "region_number=4", "--json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Fetch {
                subject,
                force,
                overrides,
                json,
                correlation_id,
            } => {
                assert_eq!(subject, "33");
                assert!(force);
                assert!(json);
                assert!(correlation_id.is_none());
                assert_eq!(overrides, vec!["region_number=4"]);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn validate_defaults_template() {
        let cli = Cli::try_parse_from(["cortap", "validate", "33"]).unwrap();
        match cli.command {
            Command::Validate { template, .. } => assert_eq!(template, "draft-audit-report"),
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn overrides_keep_json_types() {
        let map = parse_overrides(&[
            "region_number=4".into(),
            "recipient_name=Metro Transit".into(),
            "team_members=[\"A\",\"B\"]".into(),
        ])
        .unwrap();
        assert_eq!(map["region_number"], 4);
        assert_eq!(map["recipient_name"], "Metro Transit");
        assert_eq!(map["team_members"][1], "B");
    }

    fn memory_config_without_token() -> AppConfig {
        let mut config = AppConfig::default();
        config.cache.backend = CacheBackendKind::Memory;
        config.remote.api_key_env = "CORTAP_TEST_TOKEN_THAT_IS_NEVER_SET".into();
        config
    }

    #[tokio::test]
    async fn invalidate_needs_no_remote_token() {
        let config = memory_config_without_token();
        assert!(build_service(&config, None).await.is_err());

        let cache = build_cache(&config).await.unwrap();
        assert!(!cache.invalidate("33").await);
    }

    #[test]
    fn malformed_override_is_rejected() {
        assert!(parse_overrides(&["no-equals-sign".into()]).is_err());
    }
}
