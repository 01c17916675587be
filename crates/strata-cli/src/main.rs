//! Strata - scoped configuration inspector
//!
//! Usage:
//!   strata validate --schema app.toml
//!   strata resolve 'class[name=App]/default/global/user[name=alice]'
//!   strata set 'class[name=App]/default/global' port 8080
//!   strata scopes user --property name=alice
//!   strata check-refs [TYPE]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strata_core::prelude::*;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Scoped configuration inspector", long_about = None)]
struct Cli {
    /// Settings file (default: <config dir>/strata/strata.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Schema file describing the configuration classes
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate the schema
    Validate,

    /// Merge every stored level down to a scope path
    Resolve {
        /// Scope path, e.g. class[name=App]/default/global
        path: String,

        /// Bypass the scope cache
        #[arg(long)]
        no_cache: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Store a simple property value at a scope path
    Set {
        /// Scope path to write at
        path: String,
        /// Top-level simple property
        property: String,
        /// New value
        value: String,
    },

    /// Delete the snapshot stored at a scope path
    #[command(alias = "rm")]
    Delete {
        path: String,

        /// Also delete every snapshot below the path
        #[arg(long)]
        children: bool,
    },

    /// List stored scope paths containing a scope
    Scopes {
        /// Scope name (global, user, instance, ...)
        scope: String,

        /// Required segment property
        #[arg(long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
    },

    /// Check declared cross-references for cycles
    CheckRefs {
        /// Only check this type (default: every type)
        type_name: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    run_cli(cli)
}

fn run_cli(cli: Cli) -> Result<()> {
    let settings_path = match &cli.settings {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    tracing::debug!(settings = %settings_path.display(), "Using settings file");

    match cli.command {
        Commands::Validate => {
            let ctx = load_context(&settings_path, cli.schema)?;
            println!("✓ Schema is valid ({} types)", ctx.schema().types().count());
            ctx.cycle_detector().check_all()?;
            println!("✓ No cross-reference cycles");
        }
        Commands::Resolve {
            path,
            no_cache,
            format,
        } => {
            let ctx = load_context(&settings_path, cli.schema)?;
            run_resolve(&ctx, &path, no_cache, format)?;
        }
        Commands::Set {
            path,
            property,
            value,
        } => {
            let ctx = load_context(&settings_path, cli.schema)?;
            run_set(&ctx, &path, &property, &value)?;
        }
        Commands::Delete { path, children } => {
            let settings = Settings::load(&settings_path)?;
            let backend = FileBackend::new(settings.store_root()?);
            let path = parse_path(&path)?;
            let removed = backend.delete(&path, children)?;
            println!("✓ Deleted {removed} snapshot(s) at {path}");
        }
        Commands::Scopes { scope, properties } => {
            let settings = Settings::load(&settings_path)?;
            let backend = FileBackend::new(settings.store_root()?);
            let properties = parse_properties(&properties)?;
            let paths = backend.list_scopes(&scope, &properties)?;
            if paths.is_empty() {
                println!("No stored scopes match '{scope}'");
            }
            for path in paths {
                println!("{path}");
            }
        }
        Commands::CheckRefs { type_name } => {
            let ctx = load_context(&settings_path, cli.schema)?;
            let detector = ctx.cycle_detector();
            match type_name {
                Some(name) => detector.check_type(&name)?,
                None => detector.check_all()?,
            }
            println!("✓ No cross-reference cycles");
        }
    }
    Ok(())
}

fn load_context(settings_path: &std::path::Path, schema: Option<PathBuf>) -> Result<AppContext> {
    let schema = schema.ok_or_else(|| anyhow::anyhow!("Missing required option: --schema"))?;
    AppContext::from_files(settings_path, &schema)
}

fn parse_path(text: &str) -> Result<ScopePath> {
    text.parse::<ScopePath>()
        .with_context(|| format!("Invalid scope path: {text}"))
}

fn parse_properties(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got '{pair}'"))
        })
        .collect()
}

fn run_resolve(ctx: &AppContext, path: &str, no_cache: bool, format: OutputFormat) -> Result<()> {
    let path = parse_path(path)?;
    let observer = Arc::new(RecordingObserver::new());
    let service = ctx.observed_config_service(Arc::new(ctx.file_backend()?), observer.clone());
    if no_cache {
        service.set_cache_enabled(false);
    }

    let Some(resolved) = service.load(&path, path.class_name())? else {
        println!("Nothing stored for {path} or any of its ancestors");
        return Ok(());
    };

    match format {
        OutputFormat::Table => {
            println!("Scope:   {path}");
            println!("Defined: {}", resolved.node.scope_path());
            if resolved.is_new {
                println!("(no snapshot stored at this scope; showing inherited values)");
            }
            println!();
            println!("{:<30} {:<30} Defined at", "Property", "Value");
            println!("{}", "-".repeat(90));
            print_node("", &resolved.node);
            for result in observer.take() {
                println!(
                    "\n! Stale values: {} merged, {} replaced by parent values",
                    result.number_of_merged_properties, result.number_of_discarded_properties
                );
            }
        }
        OutputFormat::Json => {
            let stale = observer.take();
            let output = serde_json::json!({
                "scope_path": path,
                "is_new": resolved.is_new,
                "stored_version": resolved.stored_version,
                "node": resolved.node,
                "staleness": stale,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_node(prefix: &str, node: &ConfigNode) {
    let origin = node.scope_path();
    match &node.value {
        NodeValue::Simple { value } => {
            println!("{:<30} {:<30} {}", prefix, value.as_deref().unwrap_or("-"), origin);
        }
        NodeValue::Complex { properties, .. } => {
            for (name, child) in properties {
                let key = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                print_node(&key, child);
            }
        }
        NodeValue::List { items } | NodeValue::Set { items } => match items {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    print_node(&format!("{prefix}[{i}]"), item);
                }
            }
            None => println!("{:<30} {:<30} {}", prefix, "(absent)", origin),
        },
        NodeValue::Map { entries } => match entries {
            Some(entries) => {
                for (key, entry) in entries {
                    print_node(&format!("{prefix}[{key}]"), entry);
                }
            }
            None => println!("{:<30} {:<30} {}", prefix, "(absent)", origin),
        },
    }
}

fn run_set(ctx: &AppContext, path: &str, property: &str, value: &str) -> Result<()> {
    let path = parse_path(path)?;
    let type_name = path.class_name().to_string();
    let descriptor = ctx.schema().require(&type_name)?;
    let declared = descriptor
        .get(property)
        .ok_or_else(|| anyhow::anyhow!("'{type_name}' has no property '{property}'"))?;
    if declared.kind != NodeKind::Simple {
        anyhow::bail!(
            "'{type_name}.{property}' is a {} property; only simple properties can be set",
            declared.kind
        );
    }

    let backend = Arc::new(ctx.file_backend()?);
    let current = backend
        .load_configuration(&path)?
        .unwrap_or_else(|| ConfigNode::complex(&path, &type_name));
    let updated = current.with_property(
        property,
        ConfigNode::simple(&path, &declared.type_name, Some(value)),
    );

    let service = ctx.config_service(backend);
    let saved = service.save(&path, &type_name, &updated)?;
    println!("✓ Saved {path} (version {})", saved.version());
    Ok(())
}
