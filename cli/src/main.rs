//! Lantern CLI
//!
//! Command-line interface for querying log sources through the Lantern
//! fetchers. Every command loads a source definition from a JSON file and
//! prints its result as JSON.
//!
//! # Usage
//!
//! ```bash
//! lantern --help
//! lantern validate --source app.json --query "level = error"
//! lantern fetch --source app.json --from now-15m --limit 50
//! lantern graph --source pods.json --from now-1h --group-by namespace
//! ```

#![deny(unsafe_code)]

mod time;

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use shared::columns::resolve_group_by;
use shared::config::FetcherSettings;
use shared::models::{
    AutocompleteRequest, ContextFilters, DataRequest, GraphDataRequest, Source, DEFAULT_LIMIT,
};
use shared::Fetchers;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::TimeBound;

/// Lantern CLI - query log sources from the command line
#[derive(Parser)]
#[command(name = "lantern")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "LANTERN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a filter against a source
    Validate {
        #[command(flatten)]
        source: SourceArg,
        /// Filter text
        #[arg(short, long, default_value = "")]
        query: String,
    },
    /// Probe reachability and schema of a source's backend
    TestConnection {
        #[command(flatten)]
        source: SourceArg,
    },
    /// Suggest values of a column
    Autocomplete {
        #[command(flatten)]
        source: SourceArg,
        /// Column to suggest values for
        #[arg(short, long)]
        column: String,
        /// Text the values must contain
        #[arg(long, default_value = "")]
        value: String,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Fetch matching rows, newest first
    Fetch {
        #[command(flatten)]
        source: SourceArg,
        #[command(flatten)]
        query: QueryArgs,
        /// Maximum number of rows
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
        /// Timezone used to format row times
        #[arg(long, default_value = "UTC")]
        tz: Tz,
        /// ORDER BY override for SQL sources
        #[arg(long)]
        order_by: Option<String>,
    },
    /// Count matching rows over time
    Graph {
        #[command(flatten)]
        source: SourceArg,
        #[command(flatten)]
        query: QueryArgs,
        /// Column reference to split series by, e.g. `labels:app`
        #[arg(short, long)]
        group_by: Option<String>,
    },
    /// List selectable values of a context field
    Context {
        #[command(flatten)]
        source: SourceArg,
        /// Context field, e.g. `container` or `deployment`
        #[arg(short, long)]
        field: String,
    },
}

#[derive(Args)]
struct SourceArg {
    /// Path to the source definition (JSON)
    #[arg(short, long, env = "LANTERN_SOURCE")]
    source: PathBuf,
}

#[derive(Args)]
struct RangeArgs {
    /// Start of the range: `now`, `now-<n>[smhd]` or epoch milliseconds
    #[arg(long, default_value = "now-15m")]
    from: TimeBound,
    /// End of the range: `now`, `now-<n>[smhd]` or epoch milliseconds
    #[arg(long, default_value = "now")]
    to: TimeBound,
}

#[derive(Args)]
struct QueryArgs {
    /// Filter text
    #[arg(short, long)]
    query: Option<String>,
    /// Raw SQL predicate, for sources that allow it
    #[arg(long)]
    raw_filter: Option<String>,
    /// Context filter as `field=value`, repeatable
    #[arg(long = "context", value_parser = parse_context)]
    context: Vec<(String, String)>,
    #[command(flatten)]
    range: RangeArgs,
}

impl RangeArgs {
    fn resolve(&self) -> (i64, i64) {
        let now = Utc::now();
        (self.from.resolve(now), self.to.resolve(now))
    }
}

impl QueryArgs {
    fn filter(&self) -> Result<Option<filter::Filter>> {
        self.query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .map(|q| filter::parse(q).context("Invalid query"))
            .transpose()
    }

    fn context_filters(&self) -> ContextFilters {
        let mut filters = ContextFilters::new();
        for (field, value) in &self.context {
            filters.entry(field.clone()).or_default().push(value.clone());
        }
        filters
    }
}

fn parse_context(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(field, value)| (field.trim().to_string(), value.trim().to_string()))
        .filter(|(field, _)| !field.is_empty())
        .ok_or_else(|| format!("Expected field=value, got '{input}'"))
}

fn load_source(path: &Path) -> Result<Arc<Source>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file {}", path.display()))?;
    let source: Source = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse source file {}", path.display()))?;
    source
        .validate_source()
        .with_context(|| format!("Invalid source '{}'", source.slug))?;
    Ok(Arc::new(source))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run(command: Commands, fetchers: &Fetchers) -> Result<()> {
    match command {
        Commands::Validate { source, query } => {
            let source = load_source(&source.source)?;
            let validation = fetchers
                .for_source(&source)
                .validate_query(&source, &query)
                .await;
            print_json(&validation)
        }
        Commands::TestConnection { source } => {
            let source = load_source(&source.source)?;
            let result = fetchers
                .for_source(&source)
                .test_connection(&source.backend)
                .await;
            print_json(&result)
        }
        Commands::Autocomplete {
            source,
            column,
            value,
            range,
        } => {
            let source = load_source(&source.source)?;
            let (from, to) = range.resolve();
            let request = AutocompleteRequest::new(Arc::clone(&source), column, from, to, value);
            let response = fetchers.for_source(&source).autocomplete(&request).await?;
            print_json(&response)
        }
        Commands::Fetch {
            source,
            query,
            limit,
            tz,
            order_by,
        } => {
            let source = load_source(&source.source)?;
            let (from, to) = query.range.resolve();
            let mut request = DataRequest::new(Arc::clone(&source), from, to).with_limit(limit);
            request.filter = query.filter()?;
            request.raw_filter = query.raw_filter.clone();
            request.context_filters = query.context_filters();
            if let Some(order_by) = order_by {
                request = request.with_order_by(order_by);
            }

            tracing::info!(source = %source.slug, from, to, limit, "Fetching rows");
            let response = fetchers.for_source(&source).fetch_data(&request, tz).await?;
            print_json(&response)
        }
        Commands::Graph {
            source,
            query,
            group_by,
        } => {
            let source = load_source(&source.source)?;
            let (from, to) = query.range.resolve();
            let mut request = GraphDataRequest::new(Arc::clone(&source), from, to);
            request.filter = query.filter()?;
            request.raw_filter = query.raw_filter.clone();
            request.context_filters = query.context_filters();
            if let Some(reference) = group_by.as_deref().filter(|g| !g.trim().is_empty()) {
                request = request.with_group_by(resolve_group_by(&source, reference)?);
            }

            tracing::info!(source = %source.slug, from, to, "Fetching graph data");
            let response = fetchers.for_source(&source).fetch_graph_data(&request).await?;
            print_json(&response)
        }
        Commands::Context { source, field } => {
            let source = load_source(&source.source)?;
            let options = fetchers
                .for_source(&source)
                .context_options(&source, &field)
                .await?;
            print_json(&options)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = FetcherSettings::from_env().context("Invalid fetcher settings")?;
    let fetchers = Fetchers::new(settings);
    run(cli.command, &fetchers).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["lantern"]).is_err());
    }

    #[test]
    fn test_cli_fetch_command() {
        let cli = Cli::try_parse_from([
            "lantern",
            "fetch",
            "--source",
            "app.json",
            "--query",
            "level = error",
            "--from",
            "now-1h",
            "--context",
            "namespace=shop",
            "--context",
            "namespace=billing",
            "--tz",
            "Europe/Berlin",
        ])
        .unwrap();

        let Commands::Fetch {
            source,
            query,
            limit,
            tz,
            ..
        } = cli.command
        else {
            panic!("expected fetch command");
        };
        assert_eq!(source.source, PathBuf::from("app.json"));
        assert_eq!(limit, DEFAULT_LIMIT);
        assert_eq!(tz, chrono_tz::Europe::Berlin);
        assert_eq!(query.range.from, TimeBound::Ago(3_600_000));
        assert_eq!(query.range.to, TimeBound::Now);
        assert_eq!(
            query.context_filters()["namespace"],
            vec!["shop".to_string(), "billing".to_string()]
        );
        assert!(query.filter().unwrap().is_some());
    }

    #[test]
    fn test_cli_graph_command() {
        let cli = Cli::try_parse_from([
            "lantern",
            "graph",
            "-s",
            "pods.json",
            "--group-by",
            "labels:app",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Graph { group_by: Some(ref g), .. } if g == "labels:app"
        ));
    }

    #[test]
    fn test_cli_log_format_before_or_after_subcommand() {
        let before =
            Cli::try_parse_from(["lantern", "--log-format", "json", "fetch", "-s", "a.json"]).unwrap();
        let after =
            Cli::try_parse_from(["lantern", "fetch", "-s", "a.json", "--log-format", "json"]).unwrap();
        assert_eq!(before.log_format, LogFormat::Json);
        assert_eq!(after.log_format, LogFormat::Json);
    }

    #[test]
    fn test_cli_rejects_bad_input() {
        assert!(Cli::try_parse_from(["lantern", "fetch", "-s", "a.json", "--from", "soon"]).is_err());
        assert!(
            Cli::try_parse_from(["lantern", "fetch", "-s", "a.json", "--context", "=x"]).is_err()
        );
        assert!(Cli::try_parse_from(["lantern", "fetch", "-s", "a.json", "--tz", "Mars/Base"]).is_err());
    }

    #[test]
    fn test_parse_context() {
        assert_eq!(
            parse_context("pod_name = api-0"),
            Ok(("pod_name".to_string(), "api-0".to_string()))
        );
        assert!(parse_context("novalue").is_err());
    }
}
