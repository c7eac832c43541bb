//! ai-batch CLI — 批处理提交、状态查询、结果下载与取消的命令行工具
//!
//! Usage:
//!   ai-batch-cli submit <adapter> <items.jsonl> [--model M] [--config F] [--wait]
//!   ai-batch-cli status <adapter> <batch-id> [--config F]
//!   ai-batch-cli results <adapter> <batch-id> [--config F]
//!   ai-batch-cli cancel <adapter> <batch-id> [--config F]
//!   ai-batch-cli providers

use ai_batch::config::{load_settings, AdapterSettings};
use ai_batch::{registry, BatchItem, BatchQueueOptions};
use anyhow::{bail, Context};
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let outcome = match args[1].as_str() {
        "submit" => cmd_submit(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "results" => cmd_results(&args[2..]).await,
        "cancel" => cmd_cancel(&args[2..]).await,
        "providers" | "list" => {
            cmd_providers();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("ai-batch-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"ai-batch-cli — 批处理命令行工具

USAGE:
    ai-batch-cli <COMMAND> [OPTIONS]

COMMANDS:
    submit <adapter> <items.jsonl>   Submit one BatchItem per line
        --model <model>              Model override
        --webhook <url>              POST the finished job here
        --wait                       Block until terminal and print results
    status <adapter> <batch-id>      Show the current job snapshot
    results <adapter> <batch-id>     Print results of a terminal batch
    cancel <adapter> <batch-id>      Request cancellation
    providers                        List registered adapters
    version                          Show version information
    help                             Show this help message

OPTIONS:
    --config <file.yaml>             Provider settings (otherwise environment)

ENVIRONMENT:
    RUST_LOG                         Log filter, e.g. ai_batch=debug"#
    );
}

/// Value following `--name`, if present.
fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_switch(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

/// Positional arguments with flags and their values removed.
fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--wait" => {}
            a if a.starts_with("--") => {
                iter.next();
            }
            a => out.push(a),
        }
    }
    out
}

fn setup(args: &[String]) -> anyhow::Result<()> {
    if let Some(path) = flag(args, "--config") {
        let settings = AdapterSettings::from_yaml_file(path)
            .with_context(|| format!("loading settings from {path}"))?;
        load_settings(settings);
    }
    registry::initialize_adapters();
    Ok(())
}

fn target<'a>(args: &'a [String], what: &str) -> anyhow::Result<(&'a str, &'a str)> {
    match positional(args).as_slice() {
        [adapter, arg, ..] => Ok((*adapter, *arg)),
        _ => bail!("expected <adapter> <{what}>"),
    }
}

fn read_items(path: &Path) -> anyhow::Result<Vec<BatchItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}", path.display(), n + 1))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_submit(args: &[String]) -> anyhow::Result<()> {
    let (name, file) = target(args, "items.jsonl")?;
    setup(args)?;
    let adapter = registry::get_batch_adapter(name)?;
    let items = read_items(Path::new(file))?;

    let mut options = BatchQueueOptions::new();
    if let Some(model) = flag(args, "--model") {
        options = options.with_model(model);
    }
    if let Some(url) = flag(args, "--webhook") {
        options = options.with_webhook_url(url);
    }

    let submission = adapter.submit(items, options).await?;
    print_json(&submission.job)?;
    if !has_switch(args, "--wait") {
        return Ok(());
    }

    let results = submission.completion.await?;
    let failed = results.iter().filter(|r| !r.is_completed()).count();
    for r in &results {
        println!("{}", serde_json::to_string(r)?);
    }
    eprintln!("{} results, {} failed", results.len(), failed);
    Ok(())
}

async fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let (name, id) = target(args, "batch-id")?;
    setup(args)?;
    let job = registry::get_batch_adapter(name)?.get_status(id).await?;
    print_json(&job)
}

async fn cmd_results(args: &[String]) -> anyhow::Result<()> {
    let (name, id) = target(args, "batch-id")?;
    setup(args)?;
    for r in registry::get_batch_adapter(name)?.get_results(id).await? {
        println!("{}", serde_json::to_string(&r)?);
    }
    Ok(())
}

async fn cmd_cancel(args: &[String]) -> anyhow::Result<()> {
    let (name, id) = target(args, "batch-id")?;
    setup(args)?;
    registry::get_batch_adapter(name)?.cancel(id).await?;
    println!("cancel requested for {id}");
    Ok(())
}

fn cmd_providers() {
    registry::initialize_adapters();
    for name in registry::registered_adapters() {
        let flex = registry::adapter_entry(&name)
            .map(|e| e.flex_implementation.is_some())
            .unwrap_or(false);
        println!("{name}{}", if flex { " (flex)" } else { "" });
    }
}
