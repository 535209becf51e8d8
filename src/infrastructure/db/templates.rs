use crate::domain::error::{AppError, Result};
use crate::domain::template::{StoredTemplateFile, TemplateLanguage, TemplateType};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Lookup of uploaded template files by type and language.
#[async_trait]
pub trait TemplateMetadataStore: Send + Sync {
    async fn find_active(
        &self,
        template_type: TemplateType,
        language: TemplateLanguage,
    ) -> Result<Option<StoredTemplateFile>>;
}

/// Reads the admin-managed `templates` table:
/// `(id, template_type, language, file_name, storage_path, is_active, is_default, updated_at)`.
pub struct PgTemplateMetadataRepository {
    pool: PgPool,
}

impl PgTemplateMetadataRepository {
    /// The pool connects on first use, so an unreachable database only
    /// disables the remote tier instead of failing startup.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to parse metadata database URL: {}", e))
            })?;
        info!("Template metadata store configured");
        Ok(Self { pool })
    }
}

#[async_trait]
impl TemplateMetadataStore for PgTemplateMetadataRepository {
    async fn find_active(
        &self,
        template_type: TemplateType,
        language: TemplateLanguage,
    ) -> Result<Option<StoredTemplateFile>> {
        let entity = sqlx::query_as::<_, TemplateFileEntity>(
            "SELECT id, template_type, language, file_name, storage_path
             FROM templates
             WHERE template_type = $1 AND language = $2 AND is_active = TRUE
             ORDER BY is_default DESC, updated_at DESC
             LIMIT 1",
        )
        .bind(template_type.code())
        .bind(language.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to query templates: {}", e)))?;

        entity.map(StoredTemplateFile::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct TemplateFileEntity {
    id: String,
    template_type: String,
    language: String,
    file_name: String,
    storage_path: String,
}

impl TryFrom<TemplateFileEntity> for StoredTemplateFile {
    type Error = AppError;

    fn try_from(e: TemplateFileEntity) -> Result<Self> {
        Ok(Self {
            id: e.id,
            template_type: e.template_type.parse()?,
            language: TemplateLanguage::try_from(e.language)?,
            file_name: e.file_name,
            storage_path: e.storage_path,
        })
    }
}
