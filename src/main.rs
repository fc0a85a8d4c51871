//! # Blog Harvester
//!
//! Harvests posts from blogs on the Naver blog platform. The blog's RSS feed
//! lists the posts; each post body is then located through a chain of
//! retrieval strategies (frame views, content APIs, mobile pages, a relay)
//! and reduced to clean plain text.
//!
//! ## Usage
//!
//! ```sh
//! blog_harvester serve
//! blog_harvester harvest --source https://blog.naver.com/some_handle -k sale --since 2024-02-01
//! blog_harvester fetch https://blog.naver.com/some_handle/223000000000
//! ```
//!
//! ## Architecture
//!
//! 1. **Feed**: fetch and parse the blog's RSS feed ([`feed`])
//! 2. **Filtering**: keywords, a start date and de-duplication ([`harvest`])
//! 3. **Retrieval**: one post at a time through the strategy chain ([`retrieval`])
//! 4. **Extraction**: markup to normalized text ([`extract`])
//! 5. **Output**: progress events over SSE or stdout, JSON reports ([`progress`], [`outputs`])

use chrono::Local;
use clap::Parser;
use std::error::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod extract;
mod feed;
mod harvest;
mod models;
mod outputs;
mod progress;
mod retrieval;
mod retry;
mod server;
mod utils;

use cli::{Cli, Command, HarvestArgs};
use config::Config;
use error::HarvestError;
use harvest::{HarvestQuery, Harvester};
use models::{BlogSource, DateLowerBound, KeywordFilter};
use outputs::json;
use progress::ProgressSink;
use retrieval::{HttpFetcher, failure_message};
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = Config::load(args.config.as_deref()).await?;

    match args.command {
        Command::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            server::serve(&config).await?;
        }
        Command::Harvest(harvest_args) => run_harvest(&config, harvest_args).await?,
        Command::Fetch { post_url } => run_fetch(&config, &post_url).await?,
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Sources named on the command line, or every configured source.
fn resolve_sources(config: &Config, urls: &[String]) -> Result<Vec<BlogSource>, HarvestError> {
    if urls.is_empty() {
        config
            .sources
            .iter()
            .map(|s| BlogSource::from_config(s, &config.endpoints))
            .collect()
    } else {
        urls.iter()
            .map(|u| BlogSource::from_url(u, &config.endpoints))
            .collect()
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling harvest");
            token.cancel();
        }
    });
}

#[instrument(level = "info", skip_all)]
async fn run_harvest(config: &Config, args: HarvestArgs) -> Result<(), Box<dyn Error>> {
    let sources = resolve_sources(config, &args.sources)?;
    if sources.is_empty() {
        return Err(HarvestError::Validation(
            "no sources: pass --source or list sources in the config file".into(),
        )
        .into());
    }
    let since = args
        .since
        .as_deref()
        .map(DateLowerBound::parse)
        .transpose()?;
    if let Some(dir) = &args.json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir,
                error = %e,
                "JSON output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e.into());
        }
    }

    let harvester = Harvester::new(HttpFetcher::new(config.harvest.request_timeout())?, config);
    let query = HarvestQuery::new(KeywordFilter::new(&args.keywords), since);
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let today = Local::now().date_naive();
    info!(sources = sources.len(), "Starting harvest");

    let mut failed = 0usize;
    for source in &sources {
        if cancel.is_cancelled() {
            break;
        }
        let session = cancel.child_token();
        let outcome = if args.stream {
            let (sink, mut rx) = ProgressSink::channel(config.harvest.channel_capacity, session);
            let printer = tokio::spawn(async move {
                let mut out = tokio::io::stdout();
                while let Some(event) = rx.recv().await {
                    match event.sse_frame() {
                        Ok(frame) => {
                            out.write_all(frame.as_bytes()).await?;
                            out.flush().await?;
                        }
                        Err(e) => warn!(event = event.name(), error = %e, "Could not encode event"),
                    }
                }
                Ok::<_, std::io::Error>(())
            });
            let outcome = harvester.harvest_stream(source, &query, sink).await;
            printer.await??;
            outcome
        } else {
            harvester
                .harvest_stream(source, &query, ProgressSink::detached(session))
                .await
        };

        match outcome {
            Ok(report) => {
                info!(source = %source.id, posts = report.posts.len(), "Source harvested");
                if let Some(dir) = &args.json_output_dir {
                    json::write_report(&report, &source.id, today, dir).await?;
                } else if !args.stream {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Err(HarvestError::TransportAborted) => break,
            Err(e) => {
                error!(source = %source.id, error = %e, "Harvest failed; continuing with next source");
                failed += 1;
            }
        }
    }

    info!(total = sources.len(), failed, "Harvest run finished");
    if failed == sources.len() {
        return Err(format!("all {failed} sources failed").into());
    }
    Ok(())
}

#[instrument(level = "info", skip_all, fields(url = %post_url))]
async fn run_fetch(config: &Config, post_url: &str) -> Result<(), Box<dyn Error>> {
    let harvester = Harvester::new(HttpFetcher::new(config.harvest.request_timeout())?, config);
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    match harvester.chain().retrieve(post_url, &cancel).await {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(e) => {
            println!("{}", failure_message(post_url));
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::SourceConfig;

    #[test]
    fn test_resolve_sources_prefers_cli() {
        let mut config = Config::default();
        config.sources.push(SourceConfig {
            url: "https://blog.naver.com/configured".into(),
            id: None,
            display_name: None,
            feed_url: None,
        });

        let from_cli =
            resolve_sources(&config, &["https://blog.naver.com/explicit".to_string()]).unwrap();
        assert_eq!(from_cli.len(), 1);
        assert_eq!(from_cli[0].id, "explicit");

        let from_config = resolve_sources(&config, &[]).unwrap();
        assert_eq!(from_config[0].id, "configured");
    }

    #[test]
    fn test_resolve_sources_rejects_bad_url() {
        let err = resolve_sources(&Config::default(), &["https://example.com/x".to_string()])
            .unwrap_err();
        assert!(matches!(err, HarvestError::Validation(_)));
    }
}
