use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use refbase::codec::Payload;
use refbase::config::{
    EmbedderConfig, EmbedderKind, RefMode, StoreConfig, DEFAULT_DB_PATH, DEFAULT_DIMENSIONS, DEFAULT_EMBED_MODEL,
    DEFAULT_EMBED_URL, DEFAULT_TIMEOUT_SECS,
};
use refbase::filter::DEFAULT_SORT_FIELD;
use refbase::manager::DEFAULT_THRESHOLD;
use refbase::QueryManager;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Content-addressed record store with similarity search", long_about = None)]
struct Args {
    /// Snapshot file
    #[clap(long, global = true, env = "REFBASE_DB", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    #[clap(long, global = true, env = "REFBASE_EMBEDDER", value_enum, default_value_t = EmbedderKind::Http)]
    embedder: EmbedderKind,

    /// Base URL of an OpenAI-compatible embeddings server
    #[clap(long, global = true, env = "REFBASE_EMBED_URL", default_value = DEFAULT_EMBED_URL)]
    embed_url: String,

    #[clap(long, global = true, env = "REFBASE_EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,

    /// Vector width for the hash embedder
    #[clap(long, global = true, default_value_t = DEFAULT_DIMENSIONS)]
    dimensions: usize,

    #[clap(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    #[clap(long, global = true, value_enum, default_value_t = RefMode::Timestamped)]
    ref_mode: RefMode,

    /// Embed each bucket's sample once per process instead of once per query
    #[clap(long, global = true)]
    cache_bucket_vectors: bool,

    #[clap(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Clone, Debug)]
enum Cmd {
    /// Add a record and print its ref
    Add {
        /// JSON value (string, number, array or object)
        value: String,
        /// Store VALUE as text instead of parsing it as JSON
        #[clap(long)]
        text: bool,
        /// Text to fingerprint a non-text record under
        #[clap(long)]
        hint: Option<String>,
        /// Ref of the record this one follows
        #[clap(long)]
        prev: Option<String>,
    },
    /// Print one record
    Get { reference: String },
    /// Print the payloads from REFERENCE back to the root of its chain
    Chain { reference: String },
    /// List records
    List {
        #[clap(long = "type")]
        type_tag: Option<String>,
        #[clap(long, default_value = DEFAULT_SORT_FIELD)]
        sort_by: String,
        #[clap(long)]
        asc: bool,
    },
    /// Record count per type
    Types,
    /// Records similar to TEXT
    Similar {
        text: String,
        #[clap(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Records written after a unix timestamp
    After { ts: i64 },
    Stats,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,refbase=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    let store = StoreConfig::new(&args.db)
        .with_ref_mode(args.ref_mode)
        .with_bucket_cache(args.cache_bucket_vectors);
    let embedder = EmbedderConfig {
        kind: args.embedder,
        url: args.embed_url.clone(),
        model: args.embed_model.clone(),
        dimensions: args.dimensions,
        timeout_secs: args.timeout_secs,
    };
    let qm = QueryManager::open(store, &embedder)
        .with_context(|| format!("opening store at {}", args.db.display()))?;

    run(&qm, args.command)
}

fn run(qm: &QueryManager, command: Cmd) -> Result<()> {
    match command {
        Cmd::Add { value, text, hint, prev } => {
            let payload = if text {
                Payload::Text(value)
            } else {
                let parsed: Value = serde_json::from_str(&value).context("VALUE is not JSON; pass --text to store it as text")?;
                Payload::from(parsed)
            };
            let reference = qm.add_record(payload, hint.as_deref(), prev.as_deref())?;
            info!(reference = %reference, "added");
            print_json(&serde_json::json!({ "ref": reference }))
        }
        Cmd::Get { reference } => match qm.get_record_by_ref(&reference) {
            Some(record) => print_json(&record),
            None => bail!("no record with ref {}", reference),
        },
        Cmd::Chain { reference } => print_json(&qm.get_chain(&reference)?),
        Cmd::List { type_tag, sort_by, asc } => {
            let records = match type_tag {
                Some(tag) => qm.get_records_by_type(&tag, &sort_by, !asc),
                None => qm.get_all_records(&sort_by, !asc),
            };
            print_json(&records)
        }
        Cmd::Types => print_json(&qm.get_record_types()?),
        Cmd::Similar { text, threshold, limit } => {
            let results = match limit {
                Some(n) => qm.query_similar_limit(&text, threshold, n)?,
                None => qm.query_similar(&text, threshold)?,
            };
            print_json(&results)
        }
        Cmd::After { ts } => print_json(&qm.get_records_after(ts)),
        Cmd::Stats => print_json(&qm.stats()?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
