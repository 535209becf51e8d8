use crate::domain::answer::{format_number, AnswerValue, TriState};
use crate::domain::language::Language;
use crate::domain::question::{QuestionDefinition, QuestionType};
use std::fmt;

/// What ends up in a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(text) => f.write_str(text),
            CellValue::Number(value) => f.write_str(&format_number(*value)),
        }
    }
}

pub fn tri_state_token(state: TriState, language: Language) -> &'static str {
    match state {
        TriState::Ok => language.affirmative(),
        TriState::NotOk => language.negative(),
        TriState::NotApplicable => language.not_applicable(),
    }
}

/// Localized rendering of an answer. Choice answers become display tokens,
/// never their internal codes. Blank answers render nothing.
pub fn display_value(
    question: &QuestionDefinition,
    answer: &AnswerValue,
    language: Language,
) -> Option<CellValue> {
    if answer.is_blank() {
        return None;
    }
    if answer.is_not_applicable() {
        return Some(CellValue::Text(language.not_applicable().to_string()));
    }

    let value = match question.question_type {
        QuestionType::TriStateChoice | QuestionType::BooleanChoice => match answer.as_tri_state() {
            Some(state) => CellValue::Text(tri_state_token(state, language).to_string()),
            None => CellValue::Text(answer.to_string()),
        },
        QuestionType::Measurement | QuestionType::Calculated | QuestionType::Number => {
            match answer.as_number() {
                Some(number) => CellValue::Number(number),
                None => CellValue::Text(answer.to_string()),
            }
        }
        QuestionType::Text => match answer {
            AnswerValue::Bool(true) => CellValue::Text(language.affirmative().to_string()),
            AnswerValue::Bool(false) => CellValue::Text(language.negative().to_string()),
            other => CellValue::Text(other.to_string()),
        },
    };
    Some(value)
}

/// Display text including the unit, for plain tables.
pub fn display_text(question: &QuestionDefinition, answer: &AnswerValue, language: Language) -> String {
    match display_value(question, answer, language) {
        Some(CellValue::Number(value)) => match question.unit.as_deref() {
            Some(unit) if !unit.trim().is_empty() => format!("{} {}", format_number(value), unit.trim()),
            _ => format_number(value),
        },
        Some(CellValue::Text(text)) => text,
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_answers_use_localized_tokens() {
        let question = QuestionDefinition::new("Q1", QuestionType::TriStateChoice);
        assert_eq!(
            display_value(&question, &AnswerValue::from("ok"), Language::Hu),
            Some(CellValue::Text("Igen".to_string()))
        );
        assert_eq!(
            display_value(&question, &AnswerValue::from("not_ok"), Language::De),
            Some(CellValue::Text("Nein".to_string()))
        );
        assert_eq!(
            display_value(&question, &AnswerValue::not_applicable(), Language::En),
            Some(CellValue::Text("N/A".to_string()))
        );
    }

    #[test]
    fn test_numeric_answers_stay_numbers() {
        let mut question = QuestionDefinition::new("Q2", QuestionType::Measurement);
        question.unit = Some("mm".to_string());
        let answer = AnswerValue::from("15,5");
        assert_eq!(display_value(&question, &answer, Language::De), Some(CellValue::Number(15.5)));
        assert_eq!(display_text(&question, &answer, Language::De), "15.5 mm");
        assert_eq!(display_value(&question, &AnswerValue::from(" "), Language::De), None);
    }
}
