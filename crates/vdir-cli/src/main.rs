//! vdir CLI
//!
//! Command-line access to a virtual directory:
//! - Validating partition configurations and showing each entry's source graph
//! - Searching, finding and binding against a JSON table snapshot

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vdir_engine::{Engine, EngineConfig, Entry, Scope, SearchRequest};
use vdir_mapping::{parse_filter, Dn, Partition};
use vdir_storage::{MemoryBackend, StorageConfig};

#[derive(Parser)]
#[command(name = "vdir")]
#[command(author, version, about = "vdir: a virtual directory over relational sources")]
struct Cli {
    /// Log engine decisions (overridden by VDIR_LOG / RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a partition, then print every entry's source graph.
    Check {
        /// Partition configuration (JSON)
        partition: PathBuf,
    },

    /// Search below a base DN.
    Search {
        #[command(flatten)]
        directory: DirectoryArgs,
        /// Base DN
        base: String,
        #[arg(short, long, value_enum, default_value_t = ScopeArg::Sub)]
        scope: ScopeArg,
        /// LDAP filter
        #[arg(short, long, default_value = "(objectClass=*)")]
        filter: String,
        /// Attributes to return (comma separated); `1.1` for DNs only
        #[arg(short, long, value_delimiter = ',')]
        attributes: Vec<String>,
        /// Maximum rows fetched from the backend
        #[arg(long)]
        size_limit: Option<usize>,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve one DN.
    Find {
        #[command(flatten)]
        directory: DirectoryArgs,
        dn: String,
        #[arg(long)]
        json: bool,
    },

    /// Check a password against an entry's userPassword.
    Bind {
        #[command(flatten)]
        directory: DirectoryArgs,
        dn: String,
        #[arg(short, long)]
        password: String,
    },
}

#[derive(Args)]
struct DirectoryArgs {
    /// Partition configuration (JSON)
    #[arg(short = 'P', long)]
    partition: PathBuf,
    /// Table snapshot (JSON)
    #[arg(short = 'D', long)]
    data: PathBuf,
    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Base,
    One,
    Sub,
}

impl From<ScopeArg> for Scope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Base => Scope::Base,
            ScopeArg::One => Scope::OneLevel,
            ScopeArg::Sub => Scope::Subtree,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check { partition } => cmd_check(&partition),
        Commands::Search {
            directory,
            base,
            scope,
            filter,
            attributes,
            size_limit,
            json,
        } => {
            let engine = open(&directory)?;
            let mut request = SearchRequest::new(Dn::parse(&base)?, scope.into())
                .with_filter(parse_filter(&filter)?)
                .with_attributes(attributes);
            if let Some(limit) = size_limit {
                request = request.with_size_limit(limit);
            }
            let entries = engine.search(&request)?;
            print_entries(&entries, json)?;
            eprintln!("{} {} entries", "ok".green().bold(), entries.len());
            Ok(())
        }
        Commands::Find {
            directory,
            dn,
            json,
        } => {
            let engine = open(&directory)?;
            let entry = engine.find(&Dn::parse(&dn)?)?;
            print_entries(std::slice::from_ref(&entry), json)
        }
        Commands::Bind {
            directory,
            dn,
            password,
        } => {
            let engine = open(&directory)?;
            let dn = Dn::parse(&dn)?;
            engine.bind(&dn, &password)?;
            println!("{} bound as {}", "ok".green().bold(), dn.to_string().bold());
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = env::var("VDIR_LOG")
        .or_else(|_| env::var("RUST_LOG"))
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_partition(path: &Path) -> Result<Partition> {
    Partition::load(path).with_context(|| format!("loading partition {}", path.display()))
}

fn open(args: &DirectoryArgs) -> Result<Engine> {
    let partition = load_partition(&args.partition)?;
    if !args.data.exists() {
        anyhow::bail!("snapshot {} does not exist", args.data.display());
    }
    let backend = MemoryBackend::new(StorageConfig {
        snapshot_path: Some(args.data.clone()),
        auto_flush: false,
    })?;
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    Ok(Engine::new(Arc::new(partition), Arc::new(backend)).with_config(config))
}

// ============================================================================
// Output
// ============================================================================

fn cmd_check(path: &Path) -> Result<()> {
    let partition = Arc::new(load_partition(path)?);
    let engine = Engine::new(partition.clone(), Arc::new(MemoryBackend::in_memory()));

    for id in partition.entry_ids() {
        let mapping = partition.entry(id);
        if partition.is_static(id) {
            println!("{} {}", mapping.dn.to_string().bold(), "(static)".dimmed());
            continue;
        }
        println!("{}", mapping.dn.to_string().bold());

        let graph = engine.graph(id);
        if let Some(primary) = graph.primary() {
            let node = graph.node(primary);
            println!("  primary: {} ({})", node.alias.cyan(), node.source_name);
        }
        for node_id in graph.node_ids() {
            let node = graph.node(node_id);
            let origin = if node.local { "local" } else { "inherited" };
            let join = if node.required { "required" } else { "optional" };
            println!("  {:<8} {:<16} {origin} {join}", node.alias, node.source_name);
        }
        for edge in graph.edges() {
            for rel in &edge.relationships {
                println!("  {}", rel.to_string().yellow());
            }
        }
    }

    eprintln!(
        "{} partition `{}`: {} entries",
        "ok".green().bold(),
        partition.name(),
        partition.len()
    );
    Ok(())
}

fn print_entries(entries: &[Entry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    for entry in entries {
        println!("{} {}", "dn:".bold(), entry.dn);
        for (name, values) in entry.attributes.iter() {
            for value in values {
                println!("{name}: {value}");
            }
        }
        println!();
    }
    Ok(())
}
