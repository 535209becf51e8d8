use crate::application::use_cases::formula::{parse_formula, FormulaError};
use crate::domain::answer::{AnswerMap, AnswerValue};
use crate::domain::document::CalculationFlag;
use crate::domain::question::{QuestionDefinition, QuestionType};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalculationOutcome {
    /// Rounded results keyed by question id.
    pub values: BTreeMap<String, f64>,
    pub flags: Vec<CalculationFlag>,
}

impl CalculationOutcome {
    pub fn out_of_range(&self) -> impl Iterator<Item = &CalculationFlag> {
        self.flags
            .iter()
            .filter(|flag| matches!(flag, CalculationFlag::OutOfRange { .. }))
    }

    /// Writes every computed value into `answers` as a number and clears the
    /// answer of every field left blank. Hidden fields keep their sentinel.
    pub fn apply_to(&self, answers: &mut AnswerMap) {
        for (question_id, value) in &self.values {
            if is_hidden(answers, question_id) {
                continue;
            }
            answers.insert(question_id.clone(), AnswerValue::Number(*value));
        }
        for flag in &self.flags {
            if let CalculationFlag::Blank { question_id, .. } = flag {
                if !is_hidden(answers, question_id) {
                    answers.remove(question_id);
                }
            }
        }
    }
}

fn is_hidden(answers: &AnswerMap, question_id: &str) -> bool {
    answers
        .get(question_id)
        .map(AnswerValue::is_not_applicable)
        .unwrap_or(false)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Evaluates every calculated question against the current answers.
///
/// Calculated questions may feed each other; evaluation repeats until no
/// further question can be resolved. A formula whose inputs never resolve is
/// left blank and flagged. A calculated input is only ever read from this
/// evaluation, never from a previously stored answer. Questions carrying the
/// not-applicable sentinel are skipped.
pub fn evaluate_calculations(
    questions: &[QuestionDefinition],
    answers: &AnswerMap,
) -> CalculationOutcome {
    let all_ids: HashSet<String> = questions.iter().map(|q| q.id.clone()).collect();
    let calculated: Vec<&QuestionDefinition> = questions
        .iter()
        .filter(|q| q.question_type == QuestionType::Calculated)
        .filter(|q| !is_hidden(answers, &q.id))
        .filter(|q| {
            q.calculation_formula
                .as_deref()
                .map(|formula| !formula.trim().is_empty())
                .unwrap_or(false)
        })
        .collect();
    let calculated_ids: HashSet<&str> = questions
        .iter()
        .filter(|q| q.question_type == QuestionType::Calculated)
        .map(|q| q.id.as_str())
        .collect();

    let mut outcome = CalculationOutcome::default();
    let mut pending: Vec<&QuestionDefinition> = calculated;
    let mut last_errors: BTreeMap<String, FormulaError> = BTreeMap::new();

    loop {
        let mut progressed = false;
        let mut still_pending = Vec::new();

        for question in pending {
            let formula = question.calculation_formula.as_deref().unwrap_or_default();
            let known: HashSet<String> = if question.calculation_inputs.is_empty() {
                all_ids.clone()
            } else {
                question.calculation_inputs.iter().cloned().collect()
            };

            let expr = match parse_formula(formula, &known) {
                Ok(expr) => expr,
                Err(err) => {
                    warn!(question_id = %question.id, formula, error = %err, "Rejected formula");
                    outcome.flags.push(CalculationFlag::Blank {
                        question_id: question.id.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let lookup = |name: &str| {
                if calculated_ids.contains(name) {
                    return outcome.values.get(name).copied();
                }
                answers.get(name).and_then(AnswerValue::as_number)
            };

            match expr.evaluate(&lookup) {
                Ok(value) => {
                    let value = round2(value);
                    debug!(question_id = %question.id, value, "Calculated value");
                    if is_out_of_range(value, question.min_value, question.max_value) {
                        outcome.flags.push(CalculationFlag::OutOfRange {
                            question_id: question.id.clone(),
                            value,
                            min: question.min_value,
                            max: question.max_value,
                        });
                    }
                    outcome.values.insert(question.id.clone(), value);
                    last_errors.remove(&question.id);
                    progressed = true;
                }
                Err(err) => {
                    last_errors.insert(question.id.clone(), err);
                    still_pending.push(question);
                }
            }
        }

        if still_pending.is_empty() || !progressed {
            for question in still_pending {
                let reason = last_errors
                    .get(&question.id)
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| "inputs unavailable".to_string());
                outcome.flags.push(CalculationFlag::Blank {
                    question_id: question.id.clone(),
                    reason,
                });
            }
            break;
        }
        pending = still_pending;
    }

    outcome
}

fn is_out_of_range(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map(|min| value < min).unwrap_or(false) || max.map(|max| value > max).unwrap_or(false)
}
