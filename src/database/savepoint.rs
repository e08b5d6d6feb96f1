//! Savepoint-scoped units of work
//!
//! Savepoints nest, so a helper that opens one can be called from inside
//! another transaction.

use rusqlite::Connection;

use crate::error::Result;

/// Runs `work` inside `SAVEPOINT name`, rolling back to it on error.
///
/// `name` must be a plain SQL identifier.
pub fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    work: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;

    match work(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
            Ok(value)
        }
        Err(e) => {
            // A failed rollback is logged; the work's error is returned.
            if let Err(rollback_err) = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
            )) {
                tracing::warn!(
                    "Failed to roll back savepoint {} after error '{}': {}",
                    name,
                    e,
                    rollback_err
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::error::Error;

    fn department_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM departments", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn commits_on_success() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let before = department_count(&conn);

        with_savepoint(&conn, "ok_path", |conn| {
            conn.execute("INSERT INTO departments (name) VALUES ('Ops')", [])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(department_count(&conn), before + 1);
    }

    #[test]
    fn rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let before = department_count(&conn);

        let result: Result<()> = with_savepoint(&conn, "err_path", |conn| {
            conn.execute("INSERT INTO departments (name) VALUES ('Ops')", [])?;
            Err(Error::validation("boom"))
        });

        assert!(result.is_err());
        assert_eq!(department_count(&conn), before);
    }

    #[test]
    fn failed_rollback_keeps_the_original_error() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();

        let result: Result<()> = with_savepoint(&conn, "gone", |conn| {
            conn.execute_batch("RELEASE SAVEPOINT gone")?;
            Err(Error::validation("work failed"))
        });

        match result {
            Err(Error::Validation(message)) => assert_eq!(message, "work failed"),
            other => panic!("expected the work's validation error, got {:?}", other),
        }
        assert!(conn.is_autocommit());
    }
}
