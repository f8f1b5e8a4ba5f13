//! Command-line entry point.
//!
//! Reads the request from argv (or stdin when no arguments are given),
//! runs one harness pass, and prints the final answer to stdout. Progress
//! goes to stderr (pretty) or stdout as JSONL when HARNESS_JSONL is set.

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use quorum::llm::OpenAiClient;
use quorum::progress::ConsoleSink;
use quorum::{run, HarnessConfig, RunArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = HarnessConfig::from_env().context("configuration")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let input = if args.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading request from stdin")?;
        buf.trim().to_string()
    } else {
        args.join(" ")
    };
    if input.is_empty() {
        anyhow::bail!("no request given (pass it as arguments or on stdin)");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, aborting run");
                cancel.cancel();
            }
        });
    }

    let sink = Arc::new(ConsoleSink::new(config.pretty, config.jsonl, config.verbosity));
    let client = Arc::new(OpenAiClient::new(config.api_key.clone()));

    match run(client, RunArgs { input, config, sink, cancel: Some(cancel) }).await {
        Ok(outcome) => {
            println!("{}", outcome.final_answer);
            Ok(())
        }
        Err(e) if e.is_aborted() => {
            eprintln!("aborted");
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}
