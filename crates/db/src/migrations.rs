use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "roles",
        "organizational_units",
        "users",
        "user_roles",
        "approval_steps",
        "request_type_entry_unit",
        "requests",
        "request_transitions",
        "idx_organizational_units_single_root",
        "idx_requests_submitter_id",
        "idx_requests_current_unit_id",
        "idx_requests_current_approver_id",
        "idx_requests_delegated_to_id",
        "idx_request_transitions_request_id",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("query sqlite_master")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in ["organizational_units", "users", "approval_steps", "requests", "request_transitions"]
        {
            assert_eq!(table_count(&pool, table).await, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn plan_steps_must_reference_existing_units() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let orphan = sqlx::query(
            "INSERT INTO approval_steps (request_type, step_number, unit_id) VALUES ('drop', 1, 'unit-gone')",
        )
        .execute(&pool)
        .await;
        assert!(orphan.is_err(), "foreign keys should be enforced on every connection");

        let step_zero = sqlx::query(
            "INSERT INTO approval_steps (request_type, step_number, unit_id) VALUES ('drop', 0, 'unit-gone')",
        )
        .execute(&pool)
        .await;
        assert!(step_zero.is_err(), "step numbers start at 1");
    }

    #[tokio::test]
    async fn schema_allows_a_single_root_unit() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let insert = "INSERT INTO organizational_units (id, name, parent_id, created_at)
                      VALUES (?, ?, ?, '2026-01-01T00:00:00Z')";
        sqlx::query(insert).bind("unit-root").bind("Root").bind(None::<String>).execute(&pool).await.expect("root");
        sqlx::query(insert)
            .bind("unit-child")
            .bind("Child")
            .bind(Some("unit-root"))
            .execute(&pool)
            .await
            .expect("child");

        let second_root =
            sqlx::query(insert).bind("unit-island").bind("Island").bind(None::<String>).execute(&pool).await;
        assert!(second_root.is_err(), "only one unit may have no parent");
    }

    #[tokio::test]
    async fn schema_rejects_unknown_request_status() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO users (id, name, active, created_at) VALUES ('u1', 'U', 1, '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .expect("user");
        let result = sqlx::query(
            "INSERT INTO requests (
                id, submitter_id, request_type, status, current_step_number, payload_json,
                tags_json, version, created_at, updated_at
             ) VALUES ('r1', 'u1', 'drop', 'archived', 0, '{}', '[]', 0,
                       '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;

        assert!(result.is_err(), "status CHECK constraint should reject `archived`");
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
