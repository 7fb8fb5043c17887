pub mod lib_duckdb;
pub mod run_timer;
