use std::{error::Error, process::ExitCode, time::Duration};

use clap::Parser;
use duckdb::AccessMode;
use log::{error, info};
use meteo_import::{
    db::{
        prod_db::ProdDb,
        tomorrow_io::{
            forecast_client::{redact_apikey, TomorrowIoClient},
            weather_forecast_archive::{forecast_url, ConfigPolicy, ImportLimits},
        },
    },
    error::ImportError,
    utils::{lib_duckdb::open_with_retry, run_timer::RunTimer},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Max number of API calls in a calendar day
    #[arg(long, default_value_t = 500)]
    max_calls_per_day: u32,

    /// Max number of regions refreshed in one run
    #[arg(long, default_value_t = 25)]
    max_calls_per_hour: u32,

    /// Pause between two API calls, in milliseconds
    #[arg(long, default_value_t = 1000)]
    call_delay_ms: u64,

    /// Stop if the API configuration is missing or invalid
    #[arg(long)]
    strict_config: bool,

    /// Only log the regions that would be downloaded
    #[arg(long)]
    dry_run: bool,
}

fn run(args: &Args) -> Result<(), ImportError> {
    ProdDb::load_env(&args.env)?;

    let mut archive = ProdDb::tomorrow_io_weather();
    archive.limits = ImportLimits {
        max_calls_per_day: args.max_calls_per_day,
        max_calls_per_hour: args.max_calls_per_hour,
        call_delay: Duration::from_millis(args.call_delay_ms),
    };

    let conn = open_with_retry(
        &archive.duckdb_path,
        8,
        Duration::from_millis(25),
        AccessMode::ReadWrite,
    )?;
    archive.create_table(&conn)?;

    let policy = if args.strict_config {
        ConfigPolicy::FailFast
    } else {
        ConfigPolicy::Degrade
    };
    let config = archive.load_config(&conn, policy)?;
    let now = archive.now()?;

    if args.dry_run {
        let (_, coordinates) = archive.next_batch(&conn, now.date())?;
        let template = archive.url_template(&config);
        for coordinate in &coordinates {
            info!(
                "Would download weather for {} ({}): {}",
                coordinate.subdivision_name,
                coordinate.subdivision_code,
                redact_apikey(&forecast_url(&template, &coordinate.latlng))
            );
        }
        info!("{} regions to refresh", coordinates.len());
        return Ok(());
    }

    let client = TomorrowIoClient::new(Duration::from_secs(60))?;
    archive.import(&conn, &client, &config, now)?;
    Ok(())
}

/// Run this job every hour
fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let _timer = RunTimer::start("update_tomorrow_io_weather");
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Caught error: {}", e);
            let mut source = e.source();
            while let Some(s) = source {
                error!("  caused by: {}", s);
                source = s.source();
            }
            ExitCode::FAILURE
        }
    }
}
