use crate::domain::answer::AnswerMap;
use crate::domain::error::{AppError, Result};
use crate::domain::language::Language;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DRAFTS_SCHEMA: &str = include_str!("../../../resources/drafts/schema.sql");

/// Answer map of one inspection session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub session_id: String,
    pub language: Language,
    pub answers: AnswerMap,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub struct DraftRepository {
    pool: SqlitePool,
}

impl DraftRepository {
    pub async fn init(db_path: &Path) -> Result<Self> {
        let db_url = db_path
            .to_str()
            .map(|path| format!("sqlite://{}", path.replace('\\', "/")))
            .ok_or_else(|| {
                AppError::DatabaseError("Drafts database path is not valid UTF-8".to_string())
            })?;

        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to parse connection string: {}", e))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;

        for statement in DRAFTS_SCHEMA.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql).execute(&pool).await.map_err(|e| {
                AppError::DatabaseError(format!("Failed to apply drafts schema: {}", e))
            })?;
        }

        Ok(Self { pool })
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Draft>> {
        let entity = sqlx::query_as::<_, DraftEntity>(
            "SELECT session_id, language, answers_json, updated_at FROM drafts WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch draft: {}", e)))?;

        entity.map(Draft::try_from).transpose()
    }

    /// Inserts or overwrites the draft of `session_id`.
    pub async fn save(&self, session_id: &str, language: Language, answers: &AnswerMap) -> Result<Draft> {
        let answers_json = serde_json::to_string(answers)?;
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO drafts (session_id, language, answers_json, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                language = excluded.language,
                answers_json = excluded.answers_json,
                updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(language.code())
        .bind(&answers_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to save draft: {}", e)))?;

        Ok(Draft {
            session_id: session_id.to_string(),
            language,
            answers: answers.clone(),
            updated_at: now,
        })
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM drafts WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete draft: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct DraftEntity {
    session_id: String,
    language: String,
    answers_json: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<DraftEntity> for Draft {
    type Error = AppError;

    fn try_from(e: DraftEntity) -> Result<Self> {
        Ok(Self {
            session_id: e.session_id,
            language: e.language.parse().unwrap_or_default(),
            answers: serde_json::from_str(&e.answers_json)?,
            updated_at: e.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::answer::AnswerValue;

    #[tokio::test]
    async fn test_save_get_overwrite_delete() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DraftRepository::init(&dir.path().join("drafts.db")).await.unwrap();
        assert!(repo.get("s1").await.unwrap().is_none());

        let mut answers = AnswerMap::new();
        answers.insert("Q1".to_string(), AnswerValue::from("yes"));
        answers.insert("Q2".to_string(), AnswerValue::Number(15.0));
        repo.save("s1", Language::Hu, &answers).await.unwrap();

        let draft = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(draft.language, Language::Hu);
        assert_eq!(draft.answers, answers);

        answers.insert("Q1".to_string(), AnswerValue::from("no"));
        repo.save("s1", Language::Hu, &answers).await.unwrap();
        let draft = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(draft.answers["Q1"], AnswerValue::from("no"));
        assert_eq!(draft.answers["Q2"], AnswerValue::Number(15.0));

        assert!(repo.delete("s1").await.unwrap());
        assert!(!repo.delete("s1").await.unwrap());
    }
}
