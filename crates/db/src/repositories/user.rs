use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use formflow_core::domain::unit::UnitId;
use formflow_core::domain::user::{Role, User, UserId};

use super::{column, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn roles_of(&self, id: &UserId) -> Result<BTreeSet<Role>, RepositoryError> {
        let rows = sqlx::query("SELECT role_name FROM user_roles WHERE user_id = ?")
            .bind(&id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = column(row, "role_name")?;
                Role::parse(&name)
                    .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{name}`")))
            })
            .collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<User, RepositoryError> {
        let id = UserId(column(row, "id")?);
        let email: Option<String> = column(row, "email")?;
        let active: i64 = column(row, "active")?;
        let unit_id: Option<String> = column(row, "unit_id")?;
        let roles = self.roles_of(&id).await?;

        Ok(User {
            id,
            name: column(row, "name")?,
            email: email.unwrap_or_default(),
            active: active != 0,
            roles,
            unit_id: unit_id.map(UnitId),
        })
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, email, active, unit_id FROM users WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let email = (!user.email.is_empty()).then_some(user.email.as_str());

        sqlx::query(
            "INSERT INTO users (id, name, email, active, unit_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 active = excluded.active,
                 unit_id = excluded.unit_id",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(email)
        .bind(i64::from(user.active))
        .bind(user.unit_id.as_ref().map(|id| id.0.as_str()))
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(&user.id.0)
            .execute(&mut *tx)
            .await?;

        for role in &user.roles {
            sqlx::query(
                "INSERT INTO roles (name, description) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
            )
            .bind(role.as_str())
            .bind(role.description())
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO user_roles (user_id, role_name) VALUES (?, ?)")
                .bind(&user.id.0)
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_by_unit(&self, unit_id: &UnitId) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, email, active, unit_id FROM users WHERE unit_id = ? ORDER BY name, id",
        )
        .bind(&unit_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(self.hydrate(row).await?);
        }
        Ok(users)
    }

    async fn ensure_role(&self, role: Role) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO roles (name, description) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(role.as_str())
        .bind(role.description())
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() > 0)
    }
}
