use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_kinesis::Client;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use kinesis_shard_rate::cli::{Cli, Command, OutputFormat, PullArgs, ReportArgs};
use kinesis_shard_rate::{
    analyse, read_log, report, BatchFetcher, RecordLogWriter, ShardCursor, StreamDescriptor,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level when set
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("invalid log level: {}", cli.log_level))?,
    };
    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Command::Pull(args) => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            rt.block_on(pull(args))
        }
        Command::Report(args) => run_report(args),
    }
}

async fn pull(args: PullArgs) -> Result<()> {
    let config = args.resolve().context("resolving pull settings")?;
    let anchor = config.anchor(Utc::now())?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, stopping after the current call");
            let _ = shutdown_tx.send(true);
        }
    });

    let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let client = Arc::new(Client::new(&aws));

    let descriptor = StreamDescriptor::describe(client.as_ref(), &config.stream_name)
        .await
        .with_context(|| format!("describing stream {}", config.stream_name))?;

    let mut cursor = ShardCursor::open(
        client.as_ref(),
        &descriptor,
        config.shard_id.as_deref(),
        anchor,
        &config.fetch,
        &config.retry,
        &mut shutdown_rx,
    )
    .await
    .with_context(|| format!("positioning cursor on stream {}", config.stream_name))?;

    let path = config.output_path();
    let mut writer = if args.append {
        RecordLogWriter::open_append(&path)
    } else {
        RecordLogWriter::create(&path)
    }
    .with_context(|| format!("opening record log {}", path.display()))?;

    let fetcher = BatchFetcher::new(client, config.fetch.clone());
    let summary = fetcher
        .pull(&mut cursor, &mut writer, &mut shutdown_rx)
        .await
        .with_context(|| {
            format!(
                "pulling from shard {} of {} ({} rows written to {})",
                cursor.shard_id(),
                config.stream_name,
                writer.rows_written(),
                path.display()
            )
        })?;

    info!(path = %path.display(), rows = writer.rows_written(), "Record log written");

    println!(
        "{} records ({} bytes) from {} in {:.1}s: {}",
        summary.records,
        summary.bytes,
        summary.shard_id,
        summary.elapsed.as_secs_f64(),
        summary.stop_reason
    );
    if let (Some(first), Some(last)) = (summary.first_arrival, summary.last_arrival) {
        println!("arrivals {} .. {}", first, last);
    }
    println!("written to {}", path.display());

    Ok(())
}

fn run_report(args: ReportArgs) -> Result<()> {
    let config = args.resolve().context("resolving report settings")?;
    let records = read_log(&args.file)
        .with_context(|| format!("reading record log {}", args.file.display()))?;

    let analysis = analyse(&records, &config)?;
    let rendered = match args.format {
        OutputFormat::Text => report::render_text(&analysis, args.show_buckets),
        OutputFormat::Json => report::render_json(&analysis, args.show_buckets)?,
    };
    print!("{}", rendered);

    Ok(())
}
