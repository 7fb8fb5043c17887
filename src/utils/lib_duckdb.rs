use std::time::Duration;

use duckdb::{AccessMode, Config, Connection};
use log::warn;

/// Open a DuckDB file, waiting for other jobs holding the write lock to finish.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        let config = Config::default().access_mode(same_mode(&access_mode))?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "Failed to open {} ({}), attempt {}/{}, retrying in {:?}",
                    duckdb_path, e, attempts, max_attempts, wait_duration
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

/// `AccessMode` is not `Clone`, and `Config` takes it by value.
fn same_mode(mode: &AccessMode) -> AccessMode {
    match mode {
        AccessMode::Automatic => AccessMode::Automatic,
        AccessMode::ReadOnly => AccessMode::ReadOnly,
        AccessMode::ReadWrite => AccessMode::ReadWrite,
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, time::Duration};

    use duckdb::AccessMode;

    use super::*;

    #[test]
    fn open_new_file() -> Result<(), Box<dyn Error>> {
        let path = std::env::temp_dir().join(format!("lib_duckdb_{}.duckdb", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let conn = open_with_retry(&path, 3, Duration::from_millis(1), AccessMode::ReadWrite)?;
        let n: i64 = conn.query_row("SELECT 42", [], |row| row.get(0))?;
        assert_eq!(n, 42);
        drop(conn);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn read_only_connection_rejects_writes() -> Result<(), Box<dyn Error>> {
        let path = std::env::temp_dir().join(format!("lib_duckdb_ro_{}.duckdb", std::process::id()));
        let path = path.to_string_lossy().to_string();
        drop(open_with_retry(&path, 1, Duration::from_millis(1), AccessMode::ReadWrite)?);
        let conn = open_with_retry(&path, 3, Duration::from_millis(1), AccessMode::ReadOnly)?;
        assert!(conn.execute_batch("CREATE TABLE t (x INTEGER);").is_err());
        drop(conn);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn read_only_missing_file_fails() {
        let path = std::env::temp_dir().join("lib_duckdb_does_not_exist.duckdb");
        let res = open_with_retry(
            &path.to_string_lossy(),
            2,
            Duration::from_millis(1),
            AccessMode::ReadOnly,
        );
        assert!(res.is_err());
    }
}
