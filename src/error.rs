use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to load environment file {path}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Configuration for {0} not found")]
    ConfigurationMissing(String),

    #[error("Failed to decode JSON configuration for {name}")]
    ConfigurationInvalid {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Request to {url} failed")]
    Fetch {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("DuckDB error: {0}")]
    Db(#[from] duckdb::Error),

    #[error("Date/time error: {0}")]
    Time(#[from] jiff::Error),

    #[error("Failed to build HTTP client")]
    Http(#[from] reqwest::Error),
}
