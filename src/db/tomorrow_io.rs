pub mod forecast_client;
pub mod weather_forecast_archive;
