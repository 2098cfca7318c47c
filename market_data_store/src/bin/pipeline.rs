use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use market_data_retriever::models::data_type::DataType;
use market_data_retriever::models::timeframe::TimeFrame;
use market_data_retriever::retriever::Retriever;
use market_data_retriever::store::ObjectStoreGateway;
use market_data_retriever::store::s3::S3ObjectStore;
use market_data_retriever::validate::RowValidator;
use market_data_store::config::{self, PipelineConfig};
use market_data_store::db::migrate;
use market_data_store::db::pool::ConnectionPool;
use market_data_store::executor::RetryingExecutor;
use market_data_store::loader::{BulkLoader, ConflictPolicy, LoadOptions, LoadReport};
use market_data_store::sink::PgBarSink;
use market_data_store::{failures, quality, queries};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Market data ingestion pipeline CLI")]
struct Cli {
    /// Pipeline configuration file (TOML, env-substituted).
    #[arg(long, value_name = "FILE", default_value = "configs/pipeline.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run pending schema migrations.
    Migrate,

    /// Retrieve a date range and bulk-load it.
    Ingest {
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value = "day_aggs")]
        data_type: DataType,
        #[arg(long, default_value = "update")]
        on_conflict: ConflictPolicy,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Throughput cap in rows per second.
        #[arg(long)]
        throttle: Option<f64>,
    },

    /// Report business days with no stored rows.
    Gaps {
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    match cli.cmd {
        Cmd::Migrate => {
            migrate::run(&cfg.database.connection.url()).await?;
        }
        Cmd::Ingest {
            ticker,
            start,
            end,
            data_type,
            on_conflict,
            batch_size,
            throttle,
        } => {
            let report = ingest(
                &cfg, &ticker, start, end, data_type, on_conflict, batch_size, throttle,
            )
            .await?;
            print_report(&report);
        }
        Cmd::Gaps { ticker, start, end } => {
            let pool = ConnectionPool::connect(&cfg.database.connection.url(), &cfg.database.pool)?;
            let mut conn = pool.checkout().await?;
            let gaps = queries::data_gaps(
                &mut conn,
                &ticker,
                &TimeFrame::day().to_string(),
                &cfg.ingest.source_label,
                start,
                end,
            )
            .await?;
            if gaps.is_empty() {
                println!("no gaps for {ticker} between {start} and {end}");
            } else {
                println!("{} missing business days for {ticker}:", gaps.len());
                for gap in gaps {
                    println!("  {gap}");
                }
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn ingest(
    cfg: &PipelineConfig,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
    data_type: DataType,
    on_conflict: ConflictPolicy,
    batch_size: Option<usize>,
    throttle: Option<f64>,
) -> Result<LoadReport> {
    let timeframe = match data_type {
        DataType::DayAggs => TimeFrame::day(),
        DataType::MinuteAggs => TimeFrame::minute(),
        other => bail!("data type {other} is not loadable; only aggregate feeds are ingested"),
    };

    // 1) Retrieve and validate the range.
    let store = S3ObjectStore::new(&cfg.object_store);
    let gateway = ObjectStoreGateway::new(store, cfg.object_store.paths.clone());
    let validator = RowValidator::new(&cfg.ingest);
    let retriever = Retriever::new(gateway, validator, &cfg.ingest);
    let outcome = retriever.fetch_range(ticker, start, end, data_type).await?;

    // 2) Record failures and quality tallies, resolve healed dates.
    let pool = ConnectionPool::connect(&cfg.database.connection.url(), &cfg.database.pool)?;
    pool.warm_up().await?;
    {
        let mut conn = pool.checkout().await?;
        failures::record_batch(&mut conn, &outcome.failures).await?;
        quality::insert_metrics_batch(&mut conn, ticker, data_type, &outcome.quality).await?;
        for (date, _) in &outcome.quality {
            failures::mark_resolved(&mut conn, ticker, *date, data_type).await?;
        }
    }

    // 3) Bulk-load the validated table.
    let loader = BulkLoader::new(PgBarSink::new(RetryingExecutor::new(pool)));
    let mut opts = LoadOptions::new(timeframe, cfg.ingest.source_label.clone(), on_conflict);
    opts.batch_size = batch_size;
    opts.throttle_rows_per_second = throttle;
    let report = loader.load(&outcome.bars, &opts).await?;

    if !outcome.failures.is_empty() {
        eprintln!(
            "warning: {} date(s) could not be retrieved (recorded in failed_downloads)",
            outcome.failures.len()
        );
    }
    Ok(report)
}

fn print_report(report: &LoadReport) {
    println!(
        "loaded {}/{} rows in {:.2}s ({:.0} rows/sec), {} failed",
        report.successful,
        report.total_rows,
        report.duration.as_secs_f64(),
        report.rows_per_second,
        report.failed
    );
    for failure in &report.failed_details {
        println!(
            "  row {}: {} {} [{}] {} - {}",
            failure.index,
            failure.ticker,
            failure.timestamp,
            failure.timeframe,
            failure.category,
            failure.error
        );
    }
}
