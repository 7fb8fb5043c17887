use std::collections::HashMap;
use std::error::Error;
use std::thread;
use std::time::Duration;

use duckdb::{params, Connection, OptionalExt};
use jiff::civil::{Date, DateTime};
use jiff::tz::TimeZone;
use jiff::Zoned;
use log::{error, info};
use serde::Deserialize;
use serde_json::Value;

use crate::db::tomorrow_io::forecast_client::ForecastSource;
use crate::error::ImportError;

/// Name of the row in the `config` table holding the API settings.
pub const CONFIG_NAME: &str = "tomorrow.io";

/// Replaced by the `<lat>,<lng>` of a region in the url template.
pub const LATLNG_PLACEHOLDER: &str = "<<LATLNG>>";

pub const DEFAULT_BASE_URL: &str = "https://api.tomorrow.io/v4";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Quotas of the Tomorrow.io free plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportLimits {
    pub max_calls_per_day: u32,
    /// Max number of regions refreshed in one run.  The job runs every hour.
    pub max_calls_per_hour: u32,
    /// Pause after each call.  The API allows 3 calls per second.
    pub call_delay: Duration,
}

impl Default for ImportLimits {
    fn default() -> Self {
        ImportLimits {
            max_calls_per_day: 500,
            max_calls_per_hour: 25,
            call_delay: Duration::from_secs(1),
        }
    }
}

/// What to do when the API configuration row is missing or not valid JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigPolicy {
    /// Log the error and continue with an empty api key.
    #[default]
    Degrade,
    FailFast,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomorrowIoConfig {
    #[serde(default)]
    pub apikey: String,
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

/// A region that needs a fresh forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub country_code: String,
    pub subdivision_code: String,
    pub subdivision_name: String,
    pub latlng: String,
    /// Id of the existing forecast row, if any
    pub id: Option<i64>,
    /// Last time the forecast row was written, if any
    pub timestamp: Option<DateTime>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub id: i64,
    pub country_code: String,
    pub subdivision_code: String,
    pub timelines: String,
    pub timestamp: DateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub api_calls_today: i64,
    pub candidates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl ImportSummary {
    pub fn processed(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Forecasts for ISO 3166-2 subdivisions, one row per subdivision.
/// See https://docs.tomorrow.io/reference/weather-forecast
pub struct TomorrowIoWeatherArchive {
    pub duckdb_path: String,
    pub base_url: String,
    /// Time zone that defines "today" for the daily quota, e.g. Europe/Amsterdam
    pub timezone: String,
    pub limits: ImportLimits,
}

impl TomorrowIoWeatherArchive {
    pub fn create_table(&self, conn: &Connection) -> Result<(), ImportError> {
        conn.execute_batch(
            r#"
            CREATE SEQUENCE IF NOT EXISTS vendor_tomorrow_io_weather_id_seq START 1;
            CREATE TABLE IF NOT EXISTS vendor_tomorrow_io_weather (
                id BIGINT PRIMARY KEY DEFAULT nextval('vendor_tomorrow_io_weather_id_seq'),
                iso3166_1_alpha_2_code VARCHAR NOT NULL,
                iso3166_2_subdivision_code VARCHAR NOT NULL UNIQUE,
                timelines VARCHAR,
                "timestamp" TIMESTAMP NOT NULL,
            );"#,
        )?;
        Ok(())
    }

    /// Current wall clock time in the archive time zone.
    pub fn now(&self) -> Result<DateTime, ImportError> {
        let tz = TimeZone::get(&self.timezone)?;
        Ok(Zoned::now().with_time_zone(tz).datetime())
    }

    /// Read the API settings from the `config` table.  With
    /// [ConfigPolicy::Degrade] a missing or malformed row is logged and an
    /// empty configuration is returned, so the downloads will fail later.
    pub fn load_config(
        &self,
        conn: &Connection,
        policy: ConfigPolicy,
    ) -> Result<TomorrowIoConfig, ImportError> {
        match read_config(conn) {
            Err(e) if policy == ConfigPolicy::Degrade && is_config_error(&e) => {
                let detail = e.source().map(|s| format!(" - {}", s)).unwrap_or_default();
                error!("Error: {}{}", e, detail);
                Ok(TomorrowIoConfig::default())
            }
            res => res,
        }
    }

    /// The request url, still with the [LATLNG_PLACEHOLDER] in it.
    pub fn url_template(&self, config: &TomorrowIoConfig) -> String {
        format!(
            "{}/weather/forecast?location={}&apikey={}",
            self.base_url.trim_end_matches('/'),
            LATLNG_PLACEHOLDER,
            config.apikey
        )
    }

    /// Number of API calls made on `today`, i.e. the number of rows written
    /// on that day.
    pub fn api_call_count_today(&self, conn: &Connection, today: Date) -> Result<i64, ImportError> {
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM vendor_tomorrow_io_weather
            WHERE CAST("timestamp" AS DATE) = CAST(? AS DATE)"#,
            params![today.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Regions without a forecast or with a forecast from before `today`, never
    /// fetched ones first, then the oldest.  Regions without coordinates are
    /// skipped.
    pub fn next_coordinates(
        &self,
        conn: &Connection,
        today: Date,
        limit: usize,
    ) -> Result<Vec<Coordinate>, ImportError> {
        let query = format!(
            r#"
            SELECT r.iso3166_1_alpha_2_code,
                r.iso3166_2_subdivision_code,
                r.iso3166_2_subdivision_name,
                r.latlng,
                w.id,
                strftime(w."timestamp", '{}')
            FROM destination_regions_level2 r
            LEFT JOIN vendor_tomorrow_io_weather w
                ON w.iso3166_2_subdivision_code = r.iso3166_2_subdivision_code
            WHERE (w."timestamp" IS NULL OR CAST(w."timestamp" AS DATE) < CAST(? AS DATE))
            AND COALESCE(r.latlng, '') <> ''
            ORDER BY w."timestamp" ASC NULLS FIRST, r.iso3166_2_subdivision_code ASC
            LIMIT {};"#,
            TIMESTAMP_FORMAT, limit
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map(params![today.to_string()], |row| {
                let coordinate = Coordinate {
                    country_code: row.get(0)?,
                    subdivision_code: row.get(1)?,
                    subdivision_name: row.get(2)?,
                    latlng: row.get(3)?,
                    id: row.get(4)?,
                    timestamp: None,
                };
                Ok((coordinate, row.get::<usize, Option<String>>(5)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(mut coordinate, ts)| {
                coordinate.timestamp = ts
                    .map(|s| DateTime::strptime(TIMESTAMP_FORMAT, s))
                    .transpose()?;
                Ok::<Coordinate, ImportError>(coordinate)
            })
            .collect()
    }

    /// How many regions can be refreshed in this run given the calls already
    /// made today.
    pub fn batch_size(&self, api_calls_today: i64) -> usize {
        let left_today = (i64::from(self.limits.max_calls_per_day) - api_calls_today).max(0);
        left_today.min(i64::from(self.limits.max_calls_per_hour)) as usize
    }

    /// Return today's call count and the regions to refresh in this run.  No
    /// regions if the daily quota is used up.
    pub fn next_batch(
        &self,
        conn: &Connection,
        today: Date,
    ) -> Result<(i64, Vec<Coordinate>), ImportError> {
        let api_calls_today = self.api_call_count_today(conn, today)?;
        info!("Today's number of API calls: {}", api_calls_today);
        if api_calls_today >= i64::from(self.limits.max_calls_per_day) {
            info!(
                "Daily limit of {} API calls reached, nothing to do",
                self.limits.max_calls_per_day
            );
            return Ok((api_calls_today, Vec::new()));
        }
        let coordinates = self.next_coordinates(conn, today, self.batch_size(api_calls_today))?;
        Ok((api_calls_today, coordinates))
    }

    pub fn insert_forecast(
        &self,
        conn: &Connection,
        coordinate: &Coordinate,
        timelines: &str,
        now: DateTime,
    ) -> Result<usize, ImportError> {
        let n = conn.execute(
            r#"
            INSERT INTO vendor_tomorrow_io_weather
                (iso3166_1_alpha_2_code, iso3166_2_subdivision_code, timelines, "timestamp")
            VALUES (?, ?, ?, CAST(? AS TIMESTAMP))"#,
            params![
                coordinate.country_code,
                coordinate.subdivision_code,
                timelines,
                now.strftime(TIMESTAMP_FORMAT).to_string()
            ],
        )?;
        Ok(n)
    }

    /// Replace the payload of an existing row.  The timestamp is set too,
    /// otherwise the region would be picked again in the next run.
    pub fn update_forecast(
        &self,
        conn: &Connection,
        id: i64,
        timelines: &str,
        now: DateTime,
    ) -> Result<usize, ImportError> {
        let n = conn.execute(
            r#"
            UPDATE vendor_tomorrow_io_weather
            SET timelines = ?, "timestamp" = CAST(? AS TIMESTAMP)
            WHERE id = ?"#,
            params![timelines, now.strftime(TIMESTAMP_FORMAT).to_string(), id],
        )?;
        Ok(n)
    }

    #[cfg(test)]
    pub fn get_forecast(
        &self,
        conn: &Connection,
        subdivision_code: &str,
    ) -> Result<Option<ForecastRecord>, ImportError> {
        let row = conn
            .query_row(
                &format!(
                    r#"
                    SELECT id, iso3166_1_alpha_2_code, iso3166_2_subdivision_code,
                        COALESCE(timelines, ''), strftime("timestamp", '{}')
                    FROM vendor_tomorrow_io_weather
                    WHERE iso3166_2_subdivision_code = ?"#,
                    TIMESTAMP_FORMAT
                ),
                params![subdivision_code],
                |row| {
                    Ok((
                        row.get::<usize, i64>(0)?,
                        row.get::<usize, String>(1)?,
                        row.get::<usize, String>(2)?,
                        row.get::<usize, String>(3)?,
                        row.get::<usize, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, country_code, subdivision_code, timelines, ts)) => Ok(Some(ForecastRecord {
                id,
                country_code,
                subdivision_code,
                timelines,
                timestamp: DateTime::strptime(TIMESTAMP_FORMAT, ts)?,
            })),
            None => Ok(None),
        }
    }

    /// Download the forecast for the next batch of regions and store it.
    /// A failed download is logged and skipped, a failed write aborts the run.
    pub fn import(
        &self,
        conn: &Connection,
        source: &impl ForecastSource,
        config: &TomorrowIoConfig,
        now: DateTime,
    ) -> Result<ImportSummary, ImportError> {
        let (api_calls_today, coordinates) = self.next_batch(conn, now.date())?;
        let mut summary = ImportSummary {
            api_calls_today,
            candidates: coordinates.len(),
            ..Default::default()
        };

        let template = self.url_template(config);
        for coordinate in coordinates {
            info!("Downloading weather for {}", coordinate.subdivision_name);
            let url = forecast_url(&template, &coordinate.latlng);
            match source.fetch(&url) {
                Ok(contents) => match (coordinate.id, coordinate.timestamp) {
                    (Some(id), Some(_)) => {
                        self.update_forecast(conn, id, &contents, now)?;
                        summary.updated += 1;
                    }
                    _ => {
                        self.insert_forecast(conn, &coordinate, &contents, now)?;
                        summary.inserted += 1;
                    }
                },
                Err(e) => {
                    let detail = e.source().map(|s| format!(" ({})", s)).unwrap_or_default();
                    error!(
                        "Error: Failed to download weather data for {}: {}{}",
                        coordinate.subdivision_name, e, detail
                    );
                    summary.failed += 1;
                }
            }
            thread::sleep(self.limits.call_delay);
        }

        info!("- {} rows processed", summary.processed());
        Ok(summary)
    }
}

/// Put the coordinates of a region in the url template.
pub fn forecast_url(template: &str, latlng: &str) -> String {
    template.replace(LATLNG_PLACEHOLDER, latlng)
}

fn is_config_error(e: &ImportError) -> bool {
    matches!(
        e,
        ImportError::ConfigurationMissing(_) | ImportError::ConfigurationInvalid { .. }
    )
}

fn read_config(conn: &Connection) -> Result<TomorrowIoConfig, ImportError> {
    let configuration: Option<String> = conn
        .query_row(
            "SELECT configuration FROM config WHERE name = ?",
            params![CONFIG_NAME],
            |row| row.get::<usize, Option<String>>(0),
        )
        .optional()?
        .flatten();

    match configuration {
        Some(s) if !s.trim().is_empty() => {
            serde_json::from_str(&s).map_err(|source| ImportError::ConfigurationInvalid {
                name: CONFIG_NAME.to_string(),
                source,
            })
        }
        _ => Err(ImportError::ConfigurationMissing(CONFIG_NAME.to_string())),
    }
}
