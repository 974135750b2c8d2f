//! hyperdoc command-line tool
//!
//! Renders documents from a TOML schema and a JSON record set, or prints
//! the compiled plan for a filter/sort query string.
//!
//! # Examples
//!
//! ```bash
//! # Collection with a filter and an include
//! hyperdoc render --schema demos/schema.toml --records demos/records.json \
//!     --type node--article --query 'filter[status]=1&include=uid&sort=-created'
//!
//! # One record
//! hyperdoc render --schema demos/schema.toml --records demos/records.json \
//!     --type node--article --id 1
//!
//! # Compiled plan only
//! hyperdoc plan --schema demos/schema.toml --type node--article \
//!     --query 'filter[f1][condition][path]=title&filter[f1][condition][value]=Hello'
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hyperdoc::document::{NormalizationContext, ResourceIdentifier, Viewer};
use hyperdoc::links::{DefaultLinkBuilder, LinkBuilder};
use hyperdoc::query::{build_query, RequestParams};
use hyperdoc::schema::{SchemaLookup, SchemaRegistry};
use hyperdoc::storage::StorageQuery;
use hyperdoc::{Config, DocumentAssembler, MemoryStore, QueryPlan};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// hyperdoc - hypermedia JSON documents over typed records
#[derive(Parser, Debug)]
#[command(name = "hyperdoc")]
#[command(version = hyperdoc::VERSION)]
#[command(about = "Render hypermedia JSON documents and compile filter queries", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "HYPERDOC_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory; overrides `log.dir`
    #[arg(long, global = true, env = "HYPERDOC_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides `log.level`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a document from a record set
    Render(RenderArgs),

    /// Print the compiled query plan
    Plan(PlanArgs),

    /// Show version
    Version,
}

/// Render command arguments
#[derive(Args, Debug)]
struct RenderArgs {
    /// Schema file (TOML)
    #[arg(long)]
    schema: PathBuf,

    /// Record set (JSON array of {type, id, fields})
    #[arg(long)]
    records: PathBuf,

    /// Resource type to render
    #[arg(long = "type")]
    type_name: String,

    /// Render one record instead of a collection
    #[arg(long)]
    id: Option<String>,

    /// With --id: render the targets of this relationship
    #[arg(long, requires = "id", conflicts_with = "relationship")]
    related: Option<String>,

    /// With --id: render the linkage of this relationship
    #[arg(long, requires = "id")]
    relationship: Option<String>,

    /// Query string with filter, sort, include, fields and page parameters
    #[arg(long, short, default_value = "")]
    query: String,

    /// Viewer name
    #[arg(long)]
    viewer: Option<String>,

    /// Viewer roles
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Print compact JSON
    #[arg(long)]
    compact: bool,
}

/// Plan command arguments
#[derive(Args, Debug)]
struct PlanArgs {
    /// Schema file (TOML)
    #[arg(long)]
    schema: PathBuf,

    /// Resource type to query
    #[arg(long = "type")]
    type_name: String,

    /// Query string with filter, sort and page parameters
    #[arg(long, short, default_value = "")]
    query: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    setup_logging(&cli, &config)?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Render(args) => render_command(&config, args),
        Commands::Plan(args) => plan_command(&config, args),
        Commands::Version => {
            println!("hyperdoc {}", hyperdoc::VERSION);
            Ok(())
        }
    }
}

/// Setup logging on stderr, plus a daily rolling file when a directory is set
fn setup_logging(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| config.log.dir.as_ref().map(PathBuf::from));

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &dir, "hyperdoc.log");
            Some(fmt::layer().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.log.level)
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Render command - build and print a document
fn render_command(config: &Config, args: RenderArgs) -> anyhow::Result<()> {
    let schema = SchemaRegistry::from_toml_file(&args.schema)
        .with_context(|| format!("loading schema {}", args.schema.display()))?;
    let store = MemoryStore::from_json_file(&args.records)
        .with_context(|| format!("loading records {}", args.records.display()))?
        .with_schema(schema.clone());
    info!(records = store.len(), "Record set loaded");

    let resource_type = schema.resource_type(&args.type_name)?;
    let params = RequestParams::from_query_string(&args.query)?;

    let viewer = args
        .roles
        .iter()
        .fold(args.viewer.map(Viewer::new).unwrap_or_default(), |v, role| {
            v.with_role(role)
        });

    let links = DefaultLinkBuilder::new(&config.links.base_url);
    let mut request_url = links.type_link(&args.type_name);
    if let Some(id) = &args.id {
        request_url = format!("{}/{}", request_url, id);
    }
    if !args.query.is_empty() {
        request_url = format!("{}?{}", request_url, args.query.trim_start_matches('?'));
    }

    let context = NormalizationContext::from_params(viewer, &params).with_request_url(request_url);
    context.validate_includes(&*schema, resource_type, config.query.max_include_depth)?;

    let assembler = DocumentAssembler::new(&*schema, &store).with_links(&links);

    let document = match &args.id {
        Some(id) => {
            let identifier = ResourceIdentifier::new(&args.type_name, id);
            let record = store
                .get(&identifier)
                .with_context(|| format!("no record {}", identifier))?;

            if let Some(field) = &args.related {
                assembler.assemble_related(record, field, &context)?
            } else if let Some(field) = &args.relationship {
                assembler.assemble_relationship(record, field, &context)?
            } else {
                assembler.assemble_individual(record, &context)?
            }
        }
        None => {
            let query = build_query(
                &*schema,
                resource_type,
                &params,
                store.query(&args.type_name),
                &config.query,
            )?;
            let page = query.plan().range();
            let records = query.execute()?;
            let context = match page {
                Some(page) => context.with_page(page),
                None => context,
            };
            assembler.assemble_collection(&args.type_name, &records, &context)?
        }
    };

    info!(tags = ?document.cache_tags, "Cache tags");

    let output = if args.compact {
        serde_json::to_string(&document)?
    } else {
        serde_json::to_string_pretty(&document)?
    };
    println!("{}", output);
    Ok(())
}

/// Plan command - compile a query string and print the plan
fn plan_command(config: &Config, args: PlanArgs) -> anyhow::Result<()> {
    let schema = SchemaRegistry::from_toml_file(&args.schema)
        .with_context(|| format!("loading schema {}", args.schema.display()))?;
    let resource_type = schema.resource_type(&args.type_name)?;
    let params = RequestParams::from_query_string(&args.query)?;

    let plan = build_query(
        &*schema,
        resource_type,
        &params,
        QueryPlan::new(&args.type_name),
        &config.query,
    )?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
