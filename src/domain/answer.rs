use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Token stored for questions that were hidden while unanswered.
pub const NOT_APPLICABLE: &str = "not_applicable";

/// A single answer scalar as captured by the questionnaire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AnswerValue {
    pub fn not_applicable() -> Self {
        AnswerValue::Text(NOT_APPLICABLE.to_string())
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, AnswerValue::Text(text) if text == NOT_APPLICABLE)
    }

    /// Empty strings count as "no answer".
    pub fn is_blank(&self) -> bool {
        matches!(self, AnswerValue::Text(text) if text.trim().is_empty())
    }

    /// Numeric view of the answer. Text accepts a decimal comma.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(value) if value.is_finite() => Some(*value),
            AnswerValue::Number(_) | AnswerValue::Bool(_) => None,
            AnswerValue::Text(text) => {
                let normalized = text.trim().replace(',', ".");
                if normalized.is_empty() {
                    return None;
                }
                normalized.parse::<f64>().ok().filter(|value| value.is_finite())
            }
        }
    }

    pub fn as_tri_state(&self) -> Option<TriState> {
        match self {
            AnswerValue::Bool(true) => Some(TriState::Ok),
            AnswerValue::Bool(false) => Some(TriState::NotOk),
            AnswerValue::Number(_) => None,
            AnswerValue::Text(text) => TriState::parse(text),
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Bool(value) => write!(f, "{}", value),
            AnswerValue::Number(value) => f.write_str(&format_number(*value)),
            AnswerValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        AnswerValue::Number(value)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Bool(value)
    }
}

/// Question id -> answer. Keys need not cover every question.
pub type AnswerMap = BTreeMap<String, AnswerValue>;

/// True when the map holds a real (non-blank) value for `question_id`.
pub fn has_answer(answers: &AnswerMap, question_id: &str) -> bool {
    answers
        .get(question_id)
        .map(|value| !value.is_blank())
        .unwrap_or(false)
}

/// Answer of a single inspected item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    Ok,
    NotOk,
    NotApplicable,
}

impl TriState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "ok" | "yes" | "igen" | "ja" | "true" | "1" | "x" | "io" | "i.o." => Some(TriState::Ok),
            "not_ok" | "notok" | "nok" | "no" | "nem" | "nein" | "false" | "0" | "nio"
            | "n.i.o." => Some(TriState::NotOk),
            "not_applicable" | "na" | "n/a" | "n.a." | "-" | "nv" | "entfällt" => {
                Some(TriState::NotApplicable)
            }
            _ => None,
        }
    }
}

/// Renders numbers without a trailing `.0` and with at most two decimals.
pub fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        let text = format!("{:.2}", rounded);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_answer_values() {
        let answers: AnswerMap =
            serde_json::from_str(r#"{"Q1": "yes", "Q2": 15, "Q3": true}"#).unwrap();
        assert_eq!(answers["Q1"], AnswerValue::Text("yes".to_string()));
        assert_eq!(answers["Q2"], AnswerValue::Number(15.0));
        assert_eq!(answers["Q3"], AnswerValue::Bool(true));
    }

    #[test]
    fn test_as_number_accepts_decimal_comma() {
        assert_eq!(AnswerValue::from("12,5").as_number(), Some(12.5));
        assert_eq!(AnswerValue::from("abc").as_number(), None);
        assert_eq!(AnswerValue::Bool(true).as_number(), None);
    }

    #[test]
    fn test_tri_state_parse() {
        assert_eq!(TriState::parse("Igen"), Some(TriState::Ok));
        assert_eq!(TriState::parse("not_ok"), Some(TriState::NotOk));
        assert_eq!(TriState::parse("n/a"), Some(TriState::NotApplicable));
        assert_eq!(TriState::parse("maybe"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(21.0), "21");
        assert_eq!(format_number(3.456), "3.46");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn test_blank_is_not_an_answer() {
        let mut answers = AnswerMap::new();
        answers.insert("Q1".to_string(), AnswerValue::from("  "));
        assert!(!has_answer(&answers, "Q1"));
        assert!(!has_answer(&answers, "Q2"));
    }
}
