use crate::domain::{ImportJobStatus, Provider};
use crate::entities::library_import_jobs;
use crate::error::{CoreError, CoreResult};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

pub struct ImportJobRepository {
    conn: DatabaseConnection,
}

impl ImportJobRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, id: &str) -> CoreResult<Option<library_import_jobs::Model>> {
        Ok(library_import_jobs::Entity::find_by_id(id.to_string())
            .one(&self.conn)
            .await?)
    }

    pub async fn create(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> CoreResult<library_import_jobs::Model> {
        let model = library_import_jobs::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            provider: Set(provider.to_string()),
            status: Set(ImportJobStatus::Pending.to_string()),
            error_message: Set(None),
            created_at: Set(Utc::now()),
            completed_at: Set(None),
        };
        Ok(model.insert(&self.conn).await?)
    }

    /// Terminal states also stamp `completed_at`.
    pub async fn set_status(
        &self,
        id: &str,
        status: ImportJobStatus,
        error: Option<String>,
    ) -> CoreResult<()> {
        let row = self
            .get(id)
            .await?
            .ok_or(CoreError::not_found("import job"))?;

        let mut model: library_import_jobs::ActiveModel = row.into();
        model.status = Set(status.to_string());
        model.error_message = Set(error);
        if matches!(
            status,
            ImportJobStatus::Completed | ImportJobStatus::Failed
        ) {
            model.completed_at = Set(Some(Utc::now()));
        }
        model.update(&self.conn).await?;
        Ok(())
    }
}
