use sqlx::sqlite::SqliteRow;

use formflow_core::domain::form::{DocumentRef, FormPayload, TagSet};
use formflow_core::domain::request::{Request, RequestId, RequestStatus, RequestType};
use formflow_core::domain::transition::{RequestTransition, TransitionId};
use formflow_core::domain::unit::UnitId;
use formflow_core::domain::user::UserId;
use formflow_core::flows::RequestEvent;

use super::{column, timestamp, unsigned, RepositoryError, RequestRepository};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, submitter_id, request_type, status, current_step_number,
     current_unit_id, current_approver_id, delegated_to_id, payload_json, tags_json,
     document_name, signature_ref, version, created_at, updated_at";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn list_where(
        &self,
        predicate: &str,
        binds: &[&str],
    ) -> Result<Vec<Request>, RepositoryError> {
        let sql =
            format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE {predicate} ORDER BY created_at, id");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(request_from_row).collect()
    }
}

fn request_from_row(row: &SqliteRow) -> Result<Request, RepositoryError> {
    let raw_type: String = column(row, "request_type")?;
    let request_type = RequestType::parse(&raw_type)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request type `{raw_type}`")))?;
    let raw_status: String = column(row, "status")?;
    let status = RequestStatus::parse(&raw_status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{raw_status}`")))?;

    let payload_json: String = column(row, "payload_json")?;
    let payload = FormPayload::from_json(&payload_json)
        .map_err(|e| RepositoryError::Decode(format!("payload_json: {e}")))?;
    let tags_json: String = column(row, "tags_json")?;
    let tags: TagSet = serde_json::from_str(&tags_json)
        .map_err(|e| RepositoryError::Decode(format!("tags_json: {e}")))?;

    let document_name: Option<String> = column(row, "document_name")?;
    let signature_ref: Option<String> = column(row, "signature_ref")?;
    let current_unit_id: Option<String> = column(row, "current_unit_id")?;
    let current_approver_id: Option<String> = column(row, "current_approver_id")?;
    let delegated_to_id: Option<String> = column(row, "delegated_to_id")?;

    Ok(Request {
        id: RequestId(column(row, "id")?),
        submitter_id: UserId(column(row, "submitter_id")?),
        request_type,
        status,
        current_step_number: unsigned(row, "current_step_number")?,
        current_unit_id: current_unit_id.map(UnitId),
        current_approver_id: current_approver_id.map(UserId),
        delegated_to_id: delegated_to_id.map(UserId),
        payload,
        tags,
        document: document_name.map(|document_name| DocumentRef { document_name, signature_ref }),
        version: unsigned(row, "version")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn transition_from_row(row: &SqliteRow) -> Result<RequestTransition, RepositoryError> {
    let status = |name: &str| -> Result<RequestStatus, RepositoryError> {
        let raw: String = column(row, name)?;
        RequestStatus::parse(&raw)
            .ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown status `{raw}`")))
    };
    let raw_event: String = column(row, "event")?;
    let event = RequestEvent::parse(&raw_event)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown event `{raw_event}`")))?;
    let from_unit_id: Option<String> = column(row, "from_unit_id")?;
    let to_unit_id: Option<String> = column(row, "to_unit_id")?;

    Ok(RequestTransition {
        id: TransitionId(column(row, "id")?),
        request_id: RequestId(column(row, "request_id")?),
        event,
        from_status: status("from_status")?,
        to_status: status("to_status")?,
        from_unit_id: from_unit_id.map(UnitId),
        to_unit_id: to_unit_id.map(UnitId),
        step_number: unsigned(row, "step_number")?,
        actor_id: UserId(column(row, "actor_id")?),
        correlation_id: column(row, "correlation_id")?,
        version: unsigned(row, "version")?,
        occurred_at: timestamp(row, "occurred_at")?,
    })
}

fn tags_json(tags: &TagSet) -> Result<String, RepositoryError> {
    serde_json::to_string(tags).map_err(|e| RepositoryError::Decode(format!("tags_json: {e}")))
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn insert(&self, request: &Request) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO requests (
                id, submitter_id, request_type, status, current_step_number,
                current_unit_id, current_approver_id, delegated_to_id, payload_json, tags_json,
                document_name, signature_ref, version, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.submitter_id.0)
        .bind(request.request_type.as_str())
        .bind(request.status.as_str())
        .bind(i64::from(request.current_step_number))
        .bind(request.current_unit_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.current_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.delegated_to_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.payload.to_json())
        .bind(tags_json(&request.tags)?)
        .bind(request.document.as_ref().map(|doc| doc.document_name.as_str()))
        .bind(request.document.as_ref().and_then(|doc| doc.signature_ref.as_deref()))
        .bind(i64::from(request.version))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_if_version(
        &self,
        request: &Request,
        expected_version: u32,
        transition: &RequestTransition,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE requests SET
                status = ?,
                current_step_number = ?,
                current_unit_id = ?,
                current_approver_id = ?,
                delegated_to_id = ?,
                payload_json = ?,
                tags_json = ?,
                document_name = ?,
                signature_ref = ?,
                version = ?,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(request.status.as_str())
        .bind(i64::from(request.current_step_number))
        .bind(request.current_unit_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.current_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.delegated_to_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.payload.to_json())
        .bind(tags_json(&request.tags)?)
        .bind(request.document.as_ref().map(|doc| doc.document_name.as_str()))
        .bind(request.document.as_ref().and_then(|doc| doc.signature_ref.as_deref()))
        .bind(i64::from(request.version))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM requests WHERE id = ?")
                .bind(&request.id.0)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => RepositoryError::VersionConflict {
                    request_id: request.id.clone(),
                    expected: expected_version,
                },
                None => RepositoryError::not_found("request", request.id.0.clone()),
            });
        }

        sqlx::query(
            "INSERT INTO request_transitions (
                id, request_id, event, from_status, to_status, from_unit_id, to_unit_id,
                step_number, actor_id, correlation_id, version, occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id.0)
        .bind(&transition.request_id.0)
        .bind(transition.event.as_str())
        .bind(transition.from_status.as_str())
        .bind(transition.to_status.as_str())
        .bind(transition.from_unit_id.as_ref().map(|id| id.0.as_str()))
        .bind(transition.to_unit_id.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(transition.step_number))
        .bind(&transition.actor_id.0)
        .bind(&transition.correlation_id)
        .bind(i64::from(transition.version))
        .bind(transition.occurred_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_by_submitter(
        &self,
        submitter_id: &UserId,
    ) -> Result<Vec<Request>, RepositoryError> {
        self.list_where("submitter_id = ?", &[submitter_id.0.as_str()]).await
    }

    async fn list_for_unit(&self, unit_id: &UnitId) -> Result<Vec<Request>, RepositoryError> {
        self.list_where("current_unit_id = ? AND status <> 'draft'", &[unit_id.0.as_str()]).await
    }

    async fn list_delegated_to(&self, user_id: &UserId) -> Result<Vec<Request>, RepositoryError> {
        self.list_where("delegated_to_id = ? AND status <> 'draft'", &[user_id.0.as_str()]).await
    }

    async fn list_for_approver(&self, user_id: &UserId) -> Result<Vec<Request>, RepositoryError> {
        self.list_where(
            "status = 'pending'
             AND (delegated_to_id = ? OR (delegated_to_id IS NULL AND current_approver_id = ?))",
            &[user_id.0.as_str(), user_id.0.as_str()],
        )
        .await
    }

    async fn list_transitions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, event, from_status, to_status, from_unit_id, to_unit_id,
                    step_number, actor_id, correlation_id, version, occurred_at
             FROM request_transitions
             WHERE request_id = ?
             ORDER BY version ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transition_from_row).collect()
    }
}
