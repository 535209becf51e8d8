use crate::application::use_cases::visibility::{VisibilityOutcome, VisibilityResolver};
use crate::domain::answer::AnswerMap;
use crate::domain::error::{AppError, Result};
use crate::domain::language::Language;
use crate::domain::question::QuestionDefinition;
use crate::infrastructure::db::drafts::{Draft, DraftRepository};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftUpdate {
    pub draft: Draft,
    pub visibility: VisibilityOutcome,
}

/// Per-session answer maps. Every update runs the visibility resolver with
/// fill-if-empty before the map is persisted.
pub struct DraftService {
    repo: Arc<DraftRepository>,
    resolver: VisibilityResolver,
}

impl DraftService {
    pub fn new(repo: Arc<DraftRepository>) -> Self {
        Self {
            repo,
            resolver: VisibilityResolver::new(),
        }
    }

    pub async fn get(&self, session_id: &str) -> Result<Draft> {
        self.repo
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Draft not found: {}", session_id)))
    }

    /// Merges `incoming` over the stored answers (incoming wins per key).
    pub async fn update_answers(
        &self,
        session_id: &str,
        language: Language,
        questions: &[QuestionDefinition],
        incoming: AnswerMap,
    ) -> Result<DraftUpdate> {
        let mut answers = self
            .repo
            .get(session_id)
            .await?
            .map(|draft| draft.answers)
            .unwrap_or_default();
        let changed = incoming.len();
        answers.extend(incoming);

        let (visibility, filled) = self.resolver.resolve_and_fill(questions, &answers);
        let draft = self.repo.save(session_id, language, &filled).await?;
        info!(
            session_id,
            changed,
            hidden = visibility.hidden_questions.len(),
            "Draft answers updated"
        );
        Ok(DraftUpdate {
            draft,
            visibility: visibility.as_ref().clone(),
        })
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        self.repo.delete(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::answer::AnswerValue;
    use crate::domain::question::QuestionType;

    fn questions() -> Vec<QuestionDefinition> {
        let mut q1 = QuestionDefinition::new("Q1", QuestionType::BooleanChoice);
        q1.conditional_group_key = Some("machine_room".to_string());
        let mut q2 = QuestionDefinition::new("Q2", QuestionType::Measurement);
        q2.group_key = Some("machine_room".to_string());
        let mut q3 = QuestionDefinition::new("Q3", QuestionType::Text);
        q3.group_key = Some("machine_room".to_string());
        vec![q1, q2, q3]
    }

    fn answers(entries: &[(&str, AnswerValue)]) -> AnswerMap {
        entries
            .iter()
            .map(|(id, value)| (id.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_retracting_controller_keeps_real_answers() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DraftRepository::init(&dir.path().join("drafts.db")).await.unwrap();
        let service = DraftService::new(Arc::new(repo));
        let questions = questions();

        let first = service
            .update_answers(
                "s1",
                Language::De,
                &questions,
                answers(&[("Q1", AnswerValue::from("yes")), ("Q2", AnswerValue::Number(15.0))]),
            )
            .await
            .unwrap();
        assert!(first.visibility.is_visible("Q2"));
        assert!(!first.draft.answers.contains_key("Q3"));

        let second = service
            .update_answers("s1", Language::De, &questions, answers(&[("Q1", AnswerValue::from("no"))]))
            .await
            .unwrap();
        assert!(!second.visibility.is_visible("Q2"));
        assert_eq!(second.draft.answers["Q3"], AnswerValue::not_applicable());

        let stored = service.get("s1").await.unwrap();
        assert_eq!(stored.answers["Q2"], AnswerValue::Number(15.0));
        assert_eq!(stored.answers["Q1"], AnswerValue::from("no"));
    }

    #[tokio::test]
    async fn test_missing_draft_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DraftRepository::init(&dir.path().join("drafts.db")).await.unwrap();
        let service = DraftService::new(Arc::new(repo));
        assert!(matches!(service.get("nope").await, Err(AppError::NotFound(_))));
        assert!(!service.delete("nope").await.unwrap());
    }
}
