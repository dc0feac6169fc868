use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use refbase::config::{
    EmbedderConfig, EmbedderKind, RefMode, StoreConfig, DEFAULT_DB_PATH, DEFAULT_DIMENSIONS, DEFAULT_EMBED_MODEL,
    DEFAULT_EMBED_URL, DEFAULT_TIMEOUT_SECS,
};
use refbase::filter::DEFAULT_SORT_FIELD;
use refbase::manager::DEFAULT_THRESHOLD;
use refbase::parser::{self, Command};
use refbase::QueryManager;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Interactive shell over a refbase snapshot", long_about = None)]
struct Args {
    #[clap(long, env = "REFBASE_DB", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    #[clap(long, env = "REFBASE_EMBEDDER", value_enum, default_value_t = EmbedderKind::Http)]
    embedder: EmbedderKind,

    #[clap(long, env = "REFBASE_EMBED_URL", default_value = DEFAULT_EMBED_URL)]
    embed_url: String,

    #[clap(long, env = "REFBASE_EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,

    #[clap(long, default_value_t = DEFAULT_DIMENSIONS)]
    dimensions: usize,

    #[clap(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    #[clap(long, value_enum, default_value_t = RefMode::Timestamped)]
    ref_mode: RefMode,

    #[clap(long)]
    cache_bucket_vectors: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,refbase=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    print_banner();

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

    let qm = match QueryManager::open(store, &embedder) {
        Ok(qm) => {
            println!("[\u{2713}] Opened {} ({} records)", qm.db().path().display(), qm.db().len());
            qm
        }
        Err(e) => {
            println!("[\u{2717}] Could not open store at {}: {}", args.db.display(), e);
            return Err(e.into());
        }
    };
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock();
    let mut buffer = String::new();

    loop {
        print!("refbase> ");
        io::stdout().flush()?;
        buffer.clear();

        if lines.read_line(&mut buffer)? == 0 {
            break;
        }
        if buffer.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&qm, cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                let upper = buffer.trim_start().to_uppercase();
                if upper.starts_with("ADD {") || upper.starts_with("ADD JSON {") {
                    println!("    \u{2139}\u{fe0f}  Hint: Wrap JSON in single quotes: ADD JSON '{{\"name\": \"Buddy\"}}'");
                } else if upper.starts_with("SIMILAR") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'SIMILAR \"dog\" THRESHOLD 0.5 LIMIT 5'");
                }
            }
        }
    }
    Ok(())
}

fn print_banner() {
    println!("\n==================================================");
    println!("   refbase shell - content-addressed records");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. ADD:     ADD \"text\" | ADD 3.5 | ADD [0.1, 0.2] | ADD JSON '{{...}}'");
    println!("            ... [HINT \"text to index under\"] [PREV sha3:...]");
    println!("2. GET:     GET sha3:...");
    println!("3. CHAIN:   CHAIN sha3:...");
    println!("4. LIST:    LIST [TYPE j] [SORT BY timestamp] [ASC|DESC]");
    println!("5. TYPES:   Record count per type");
    println!("6. STATS:   Records, buckets and types");
    println!("7. SIMILAR: SIMILAR \"text\" [THRESHOLD {}] [LIMIT 5]", DEFAULT_THRESHOLD);
    println!("8. EXIT:    Quit\n");
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn execute_command(qm: &QueryManager, cmd: Command) -> Result<()> {
    match cmd {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Add { payload, hint, prev } => {
            let reference = qm.add_record(payload, hint.as_deref(), prev.as_deref())?;
            println!("[\u{2713} OK] Added {}", reference);
            Ok(())
        }
        Command::Get { reference } => {
            match qm.get_record_by_ref(&reference) {
                Some(record) => print_json(&record)?,
                None => println!("[\u{2717}] Ref not found."),
            }
            Ok(())
        }
        Command::Chain { reference } => {
            let chain = qm.walk_chain(&reference)?;
            if chain.is_empty() {
                println!("[\u{2717}] Ref not found.");
                return Ok(());
            }
            for (i, (r, payload)) in chain.refs.iter().zip(&chain.payloads).enumerate() {
                println!("  {} | {} | {}", i + 1, r, serde_json::to_string(payload)?);
            }
            if let Some(at) = chain.cycle {
                println!("[\u{26a0}\u{fe0f}] Chain loops back to {}", at);
            }
            Ok(())
        }
        Command::List { type_tag, sort_by, descending } => {
            let sort_by = sort_by.as_deref().unwrap_or(DEFAULT_SORT_FIELD);
            let records = match type_tag {
                Some(tag) => qm.get_records_by_type(&tag, sort_by, descending),
                None => qm.get_all_records(sort_by, descending),
            };
            println!("\n{} records:", records.len());
            for r in &records {
                println!("  \u{2022} {} [{}] {} {}", r.reference, r.type_tag, r.timestamp_iso, serde_json::to_string(&r.data)?);
            }
            println!();
            Ok(())
        }
        Command::Types => print_json(&qm.get_record_types()?),
        Command::Stats => print_json(&qm.stats()?),
        Command::Similar { text, threshold, limit } => {
            let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
            let results = match limit {
                Some(n) => qm.query_similar_limit(&text, threshold, n)?,
                None => qm.query_similar(&text, threshold)?,
            };
            println!("\nFound {} matches:", results.len());
            for r in &results {
                println!("  \u{2022} {} (Sim: {:.4}) {}", r.reference, r.similarity, serde_json::to_string(&r.data)?);
            }
            println!();
            Ok(())
        }
        Command::Exit => Ok(()),
    }
}
