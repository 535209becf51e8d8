//! Conditional visibility of questionnaire groups.
//!
//! A controller question (choice type with a `conditionalGroupKey`) switches the
//! group whose `groupKey` equals that key. Questions in a switched-off group are
//! hidden; hidden questions without an answer receive the `not_applicable`
//! sentinel. Existing answers are never overwritten.

use crate::domain::answer::{has_answer, AnswerMap, AnswerValue};
use crate::domain::question::QuestionDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const TRUTHY_TOKENS: [&str; 6] = ["true", "yes", "ja", "igen", "1", "x"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityOutcome {
    /// Ids in questionnaire order.
    pub visible_questions: Vec<String>,
    pub hidden_questions: Vec<String>,
    pub active_condition_keys: BTreeSet<String>,
}

impl VisibilityOutcome {
    pub fn is_visible(&self, question_id: &str) -> bool {
        self.visible_questions.iter().any(|id| id == question_id)
    }
}

pub fn is_truthy(value: &AnswerValue) -> bool {
    match value {
        AnswerValue::Bool(flag) => *flag,
        AnswerValue::Number(number) => *number == 1.0,
        AnswerValue::Text(text) => {
            let lowered = text.trim().to_lowercase();
            TRUTHY_TOKENS.contains(&lowered.as_str())
        }
    }
}

pub fn resolve_visibility(
    questions: &[QuestionDefinition],
    answers: &AnswerMap,
) -> VisibilityOutcome {
    let controllers: Vec<&QuestionDefinition> =
        questions.iter().filter(|question| question.is_controller()).collect();

    let universe: BTreeSet<&str> = controllers
        .iter()
        .filter_map(|question| question.conditional_group_key.as_deref())
        .collect();

    let active_condition_keys: BTreeSet<String> = controllers
        .iter()
        .filter(|question| answers.get(&question.id).map(is_truthy).unwrap_or(false))
        .filter_map(|question| question.conditional_group_key.clone())
        .collect();

    let mut outcome = VisibilityOutcome {
        active_condition_keys,
        ..Default::default()
    };

    for question in questions {
        let hidden = !question.is_controller()
            && question
                .group_key
                .as_deref()
                .map(|key| universe.contains(key) && !outcome.active_condition_keys.contains(key))
                .unwrap_or(false);

        if hidden {
            outcome.hidden_questions.push(question.id.clone());
        } else {
            outcome.visible_questions.push(question.id.clone());
        }
    }

    outcome
}

/// Returns `answers` with the sentinel written into every hidden, unanswered question.
pub fn fill_hidden_with_sentinel(outcome: &VisibilityOutcome, answers: &AnswerMap) -> AnswerMap {
    let mut filled = answers.clone();
    for question_id in &outcome.hidden_questions {
        if !has_answer(&filled, question_id) {
            filled.insert(question_id.clone(), AnswerValue::not_applicable());
        }
    }
    filled
}

struct Memo {
    questions: Vec<QuestionDefinition>,
    answers: AnswerMap,
    outcome: Arc<VisibilityOutcome>,
}

/// Memoizing front for [`resolve_visibility`], cheap to call on every answer change.
#[derive(Default)]
pub struct VisibilityResolver {
    last: Mutex<Option<Memo>>,
}

impl VisibilityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &self,
        questions: &[QuestionDefinition],
        answers: &AnswerMap,
    ) -> Arc<VisibilityOutcome> {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(memo) = last.as_ref() {
            if memo.questions.as_slice() == questions && &memo.answers == answers {
                return Arc::clone(&memo.outcome);
            }
        }

        let outcome = Arc::new(resolve_visibility(questions, answers));
        *last = Some(Memo {
            questions: questions.to_vec(),
            answers: answers.clone(),
            outcome: Arc::clone(&outcome),
        });
        outcome
    }

    /// Resolves and applies fill-if-empty in one step.
    pub fn resolve_and_fill(
        &self,
        questions: &[QuestionDefinition],
        answers: &AnswerMap,
    ) -> (Arc<VisibilityOutcome>, AnswerMap) {
        let outcome = self.resolve(questions, answers);
        let filled = fill_hidden_with_sentinel(&outcome, answers);
        (outcome, filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::question::QuestionType;

    fn controller(id: &str, key: &str) -> QuestionDefinition {
        let mut question = QuestionDefinition::new(id, QuestionType::TriStateChoice);
        question.conditional_group_key = Some(key.to_string());
        question
    }

    fn member(id: &str, key: &str) -> QuestionDefinition {
        let mut question = QuestionDefinition::new(id, QuestionType::Number);
        question.group_key = Some(key.to_string());
        question
    }

    fn questions() -> Vec<QuestionDefinition> {
        vec![
            controller("Q1", "pit"),
            member("Q2", "pit"),
            member("Q3", "pit"),
            QuestionDefinition::new("Q4", QuestionType::Text),
            member("Q5", "unrelated_group"),
        ]
    }

    fn answers(pairs: &[(&str, AnswerValue)]) -> AnswerMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_truthy_vocabulary() {
        for token in ["yes", "IGEN", "Ja", "true", "1", "x", " X "] {
            assert!(is_truthy(&AnswerValue::from(token)), "{token} should be truthy");
        }
        assert!(is_truthy(&AnswerValue::Bool(true)));
        for token in ["no", "nem", "0", "", "ok"] {
            assert!(!is_truthy(&AnswerValue::from(token)), "{token} should be falsy");
        }
        assert!(!is_truthy(&AnswerValue::Bool(false)));
    }

    #[test]
    fn test_truthy_controller_shows_group() {
        let outcome = resolve_visibility(&questions(), &answers(&[("Q1", "igen".into())]));
        assert!(outcome.is_visible("Q2"));
        assert!(outcome.is_visible("Q3"));
        assert!(outcome.active_condition_keys.contains("pit"));
        assert!(outcome.hidden_questions.is_empty());
    }

    #[test]
    fn test_unset_controller_hides_group_but_not_itself() {
        let outcome = resolve_visibility(&questions(), &AnswerMap::new());
        assert!(outcome.is_visible("Q1"));
        assert!(outcome.is_visible("Q4"));
        assert_eq!(outcome.hidden_questions, vec!["Q2", "Q3"]);
        // groups nobody controls stay visible
        assert!(outcome.is_visible("Q5"));
    }

    #[test]
    fn test_controller_is_never_hidden_by_its_own_group() {
        let mut own = controller("C1", "cabin");
        own.group_key = Some("cabin".to_string());
        let outcome = resolve_visibility(&[own], &AnswerMap::new());
        assert!(outcome.is_visible("C1"));
    }

    #[test]
    fn test_fill_only_empty_hidden_questions() {
        let current = answers(&[("Q1", "no".into()), ("Q2", 15.0.into())]);
        let outcome = resolve_visibility(&questions(), &current);
        let filled = fill_hidden_with_sentinel(&outcome, &current);

        assert_eq!(filled["Q2"], AnswerValue::Number(15.0));
        assert!(filled["Q3"].is_not_applicable());
        assert!(!filled.contains_key("Q4"));
    }

    #[test]
    fn test_fill_is_idempotent() {
        let current = answers(&[("Q1", "no".into())]);
        let outcome = resolve_visibility(&questions(), &current);
        let once = fill_hidden_with_sentinel(&outcome, &current);
        let twice = fill_hidden_with_sentinel(&resolve_visibility(&questions(), &once), &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_resolve_is_pure() {
        let qs = questions();
        let current = answers(&[("Q1", "yes".into())]);
        let before = (qs.clone(), current.clone());
        let first = resolve_visibility(&qs, &current);
        let second = resolve_visibility(&qs, &current);
        assert_eq!(first, second);
        assert_eq!(before, (qs, current));
    }

    #[test]
    fn test_retraction_keeps_sentinels_and_real_answers() {
        let qs = questions();
        let resolver = VisibilityResolver::new();

        let (_, filled) = resolver.resolve_and_fill(&qs, &answers(&[("Q1", "no".into())]));
        let mut current = filled;
        current.insert("Q1".to_string(), "yes".into());
        current.insert("Q2".to_string(), 15.0.into());

        let (outcome, current) = resolver.resolve_and_fill(&qs, &current);
        assert!(outcome.is_visible("Q3"));
        // sentinel stays until the caller clears it
        assert!(current["Q3"].is_not_applicable());

        let mut retracted = current;
        retracted.insert("Q1".to_string(), "no".into());
        let (outcome, retracted) = resolver.resolve_and_fill(&qs, &retracted);
        assert!(!outcome.is_visible("Q2"));
        assert_eq!(retracted["Q2"], AnswerValue::Number(15.0));
    }

    #[test]
    fn test_memo_returns_same_outcome_for_equal_inputs() {
        let qs = questions();
        let current = answers(&[("Q1", "ja".into())]);
        let resolver = VisibilityResolver::new();
        let first = resolver.resolve(&qs, &current);
        let second = resolver.resolve(&qs.clone(), &current.clone());
        assert!(Arc::ptr_eq(&first, &second));

        let third = resolver.resolve(&qs, &AnswerMap::new());
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
