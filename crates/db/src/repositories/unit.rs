use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
use formflow_core::domain::user::UserId;
use formflow_core::org::OrgTree;

use super::{column, OrgUnitRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrgUnitRepository {
    pool: DbPool,
}

impl SqlOrgUnitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn unit_from_row(row: &SqliteRow) -> Result<OrganizationalUnit, RepositoryError> {
    let parent_id: Option<String> = column(row, "parent_id")?;
    let manager_id: Option<String> = column(row, "manager_id")?;

    Ok(OrganizationalUnit {
        id: UnitId(column(row, "id")?),
        name: column(row, "name")?,
        parent_id: parent_id.map(UnitId),
        manager_id: manager_id.map(UserId),
    })
}

#[async_trait::async_trait]
impl OrgUnitRepository for SqlOrgUnitRepository {
    async fn find_by_id(&self, id: &UnitId) -> Result<Option<OrganizationalUnit>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, parent_id, manager_id FROM organizational_units WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(unit_from_row).transpose()
    }

    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<OrganizationalUnit>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, parent_id, manager_id FROM organizational_units WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(unit_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<OrganizationalUnit>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, parent_id, manager_id FROM organizational_units ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(unit_from_row).collect()
    }

    async fn insert(&self, unit: OrganizationalUnit) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO organizational_units (id, name, parent_id, manager_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&unit.id.0)
        .bind(&unit.name)
        .bind(unit.parent_id.as_ref().map(|id| id.0.as_str()))
        .bind(unit.manager_id.as_ref().map(|id| id.0.as_str()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_manager(&self, id: &UnitId, manager_id: &UserId) -> Result<(), RepositoryError> {
        let updated = sqlx::query("UPDATE organizational_units SET manager_id = ? WHERE id = ?")
            .bind(&manager_id.0)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::not_found("organizational unit", id.0.clone()));
        }
        Ok(())
    }

    async fn reparent(
        &self,
        id: &UnitId,
        parent_id: Option<&UnitId>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock before the tree is read.
        let claimed = sqlx::query("UPDATE organizational_units SET parent_id = parent_id WHERE id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            return Err(RepositoryError::not_found("organizational unit", id.0.clone()));
        }

        let rows = sqlx::query("SELECT id, name, parent_id, manager_id FROM organizational_units")
            .fetch_all(&mut *tx)
            .await?;
        let units = rows.iter().map(unit_from_row).collect::<Result<Vec<_>, _>>()?;
        OrgTree::from_units(units)?.reparent(id, parent_id)?;

        sqlx::query("UPDATE organizational_units SET parent_id = ? WHERE id = ?")
            .bind(parent_id.map(|parent| parent.0.as_str()))
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
    use formflow_core::domain::user::{User, UserId};
    use formflow_core::org::{OrgTree, TreeError};
    use tempfile::TempDir;

    use super::SqlOrgUnitRepository;
    use crate::repositories::{OrgUnitRepository, RepositoryError, SqlUserRepository, UserRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn insert_then_find_by_id_and_name() {
        let repo = SqlOrgUnitRepository::new(setup().await);
        let root = OrganizationalUnit::root("unit-root", "Academic and Student Services");
        let advising = OrganizationalUnit::child("unit-advising", "Advising", &root.id);

        repo.insert(root.clone()).await.expect("insert root");
        repo.insert(advising.clone()).await.expect("insert child");

        assert_eq!(repo.find_by_id(&advising.id).await.expect("find"), Some(advising.clone()));
        assert_eq!(repo.find_by_name("Advising").await.expect("find by name"), Some(advising));
        assert_eq!(repo.list().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn insert_rejects_missing_parent() {
        let repo = SqlOrgUnitRepository::new(setup().await);
        let orphan = OrganizationalUnit::child("unit-x", "Orphan", &UnitId("unit-nowhere".into()));

        let error = repo.insert(orphan).await.expect_err("foreign key");
        assert!(matches!(error, RepositoryError::Database(_)));
    }

    #[tokio::test]
    async fn set_manager_overwrites_and_reports_missing_units() {
        let pool = setup().await;
        let repo = SqlOrgUnitRepository::new(pool.clone());
        let users = SqlUserRepository::new(pool);
        let root = OrganizationalUnit::root("unit-root", "Academic and Student Services");
        repo.insert(root.clone()).await.expect("insert root");
        users.save(User::new("mgr-1", "First")).await.expect("save user");
        users.save(User::new("mgr-2", "Second")).await.expect("save user");

        repo.set_manager(&root.id, &UserId("mgr-1".into())).await.expect("assign");
        repo.set_manager(&root.id, &UserId("mgr-2".into())).await.expect("reassign");

        let stored = repo.find_by_id(&root.id).await.expect("find").expect("present");
        assert_eq!(stored.manager_id, Some(UserId("mgr-2".into())));

        let missing = repo.set_manager(&UnitId("unit-gone".into()), &UserId("mgr-1".into())).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn reparent_checks_cycles_and_roots_against_stored_tree() {
        let repo = SqlOrgUnitRepository::new(setup().await);
        let root = OrganizationalUnit::root("unit-root", "Academic and Student Services");
        let advising = OrganizationalUnit::child("unit-advising", "Advising", &root.id);
        let peer = OrganizationalUnit::child("unit-peer", "Peer Advising", &advising.id);
        for unit in [root.clone(), advising.clone(), peer.clone()] {
            repo.insert(unit).await.expect("insert");
        }

        let cycle = repo.reparent(&advising.id, Some(&peer.id)).await;
        assert!(matches!(cycle, Err(RepositoryError::Tree(TreeError::Cycle { .. }))));
        let detached = repo.reparent(&peer.id, None).await;
        assert!(matches!(detached, Err(RepositoryError::Tree(TreeError::SecondRoot { .. }))));
        let missing = repo.reparent(&UnitId("unit-gone".into()), Some(&root.id)).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound { .. })));

        repo.reparent(&peer.id, Some(&root.id)).await.expect("flatten");
        let stored = repo.find_by_id(&peer.id).await.expect("find").expect("present");
        assert_eq!(stored.parent_id, Some(root.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn opposite_concurrent_reparents_cannot_both_commit() {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}", dir.path().join("formflow.db").display());
        let pool = connect_with_settings(&url, 2, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let repo = Arc::new(SqlOrgUnitRepository::new(pool));
        let root = OrganizationalUnit::root("unit-root", "Root");
        let left = OrganizationalUnit::child("unit-left", "Left", &root.id);
        let right = OrganizationalUnit::child("unit-right", "Right", &root.id);
        for unit in [root.clone(), left.clone(), right.clone()] {
            repo.insert(unit).await.expect("insert");
        }

        let (left_moved, right_moved) = tokio::join!(
            repo.reparent(&left.id, Some(&right.id)),
            repo.reparent(&right.id, Some(&left.id)),
        );

        assert!(left_moved.is_ok() ^ right_moved.is_ok(), "exactly one move may commit");
        let refused = left_moved.err().or(right_moved.err()).expect("one move refused");
        assert!(matches!(refused, RepositoryError::Tree(TreeError::Cycle { .. })));

        let tree = OrgTree::from_units(repo.list().await.expect("list")).expect("tree still loads");
        assert!(tree.is_root(&root.id));
    }
}
