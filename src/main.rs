use std::process::ExitCode;

use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use entsoe_etl::config::{LogLevel, Settings};
use entsoe_etl::jobs::etl_pipeline::{EtlPipeline, RunMode};
use entsoe_etl::services::entsoe_client::EntsoeClient;
use entsoe_etl::services::storage::StorageWriter;
use entsoe_etl::services::transformer::Transformer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Load a single day (yesterday unless --date is given)
    Daily,
    /// Backfill an inclusive date range
    Historical,
}

#[derive(Parser, Debug)]
#[command(
    name = "entsoe-etl",
    about = "Load ENTSO-E balancing reserves and day-ahead prices into PostgreSQL"
)]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Daily)]
    mode: Mode,

    /// Day to load in daily mode (YYYY-MM-DD). Defaults to yesterday (UTC).
    #[arg(long)]
    date: Option<NaiveDate>,

    /// First day of a historical run (YYYY-MM-DD). Defaults to DEFAULT_START_DATE.
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day of a historical run (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Country code overriding COUNTRY_CODE (e.g. DE, FR)
    #[arg(long)]
    country: Option<String>,
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},sqlx=warn", level.as_directive()).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn resolve_mode(cli: &Cli, settings: &Settings) -> Option<RunMode> {
    let today = Utc::now().date_naive();

    match cli.mode {
        Mode::Daily => {
            let date = match cli.date {
                Some(date) => date,
                None => today.pred_opt()?,
            };
            Some(RunMode::Daily(date))
        }
        Mode::Historical => Some(RunMode::Historical {
            start: cli.start_date.unwrap_or(settings.default_start_date),
            end: cli.end_date.unwrap_or(today),
        }),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = Settings::from_env();
    init_tracing(
        settings
            .as_ref()
            .map(|s| s.log_level)
            .unwrap_or(LogLevel::Info),
    );

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?settings, "Loaded settings");

    let country = match settings.resolve_country(cli.country.as_deref()) {
        Ok(country) => country,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(mode) = resolve_mode(&cli, &settings) else {
        tracing::error!("Could not determine the date to load");
        return ExitCode::FAILURE;
    };

    let client = match EntsoeClient::new(&settings, country.clone()) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut pipeline = EtlPipeline::new(
        client,
        Transformer::new(),
        StorageWriter::new(&settings),
        country,
    );

    let outcome = tokio::select! {
        result = pipeline.run(mode) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    pipeline.cleanup().await;

    match outcome {
        None => {
            tracing::warn!("Interrupted, remaining dates were not processed");
            ExitCode::FAILURE
        }
        Some(Ok(report)) if report.is_success() => {
            tracing::info!("🎉 ETL run completed successfully");
            ExitCode::SUCCESS
        }
        Some(Ok(report)) => {
            tracing::error!(
                failed = ?report.failed_dates(),
                "ETL run finished with {} failed date(s)",
                report.error_count()
            );
            ExitCode::FAILURE
        }
        Some(Err(e)) => {
            tracing::error!("ETL run aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
