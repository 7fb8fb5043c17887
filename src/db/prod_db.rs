use std::env;
use std::path::Path;

use crate::db::tomorrow_io::weather_forecast_archive::{
    ImportLimits, TomorrowIoWeatherArchive, DEFAULT_BASE_URL,
};
use crate::error::ImportError;

pub struct ProdDb {}

impl ProdDb {
    /// Load `.env/<env>.env`, e.g. `.env/prod.env`, into the process
    /// environment.  A job can't run without it.
    pub fn load_env(env: &str) -> Result<(), ImportError> {
        ProdDb::load_env_file(&format!(".env/{}.env", env))
    }

    pub fn load_env_file(path: &str) -> Result<(), ImportError> {
        dotenvy::from_path(Path::new(path)).map_err(|source| ImportError::EnvFile {
            path: path.to_string(),
            source,
        })
    }

    /// Settings come from the environment, see [ProdDb::load_env].
    pub fn tomorrow_io_weather() -> TomorrowIoWeatherArchive {
        TomorrowIoWeatherArchive {
            duckdb_path: env::var("TOMORROW_IO_DUCKDB_PATH")
                .unwrap_or_else(|_| "Archive/DuckDB/tomorrow_io/weather.duckdb".to_string()),
            base_url: env::var("TOMORROW_IO_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            timezone: env::var("TOMORROW_IO_TIMEZONE")
                .unwrap_or_else(|_| "Europe/Amsterdam".to_string()),
            limits: ImportLimits::default(),
        }
    }
}
