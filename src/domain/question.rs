use crate::domain::language::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of question kinds a questionnaire row can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    TriStateChoice,
    BooleanChoice,
    Measurement,
    Calculated,
    Number,
    Text,
}

impl QuestionType {
    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionType::TriStateChoice | QuestionType::BooleanChoice)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            QuestionType::Measurement | QuestionType::Calculated | QuestionType::Number
        )
    }
}

/// Text keyed by language, e.g. a question title.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(pub BTreeMap<Language, String>);

impl LocalizedText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(language: Language, text: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(language, text.into());
        Self(map)
    }

    pub fn insert(&mut self, language: Language, text: impl Into<String>) {
        self.0.insert(language, text.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|text| text.trim().is_empty())
    }

    /// Requested language first, then English, then whatever is present.
    pub fn resolve(&self, language: Language) -> Option<&str> {
        self.0
            .get(&language)
            .or_else(|| self.0.get(&Language::En))
            .or_else(|| self.0.values().next())
            .map(|text| text.as_str())
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<LocalizedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// Set only on controller questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_group_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub multi_cell: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_formula: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calculation_inputs: Vec<String>,
}

impl QuestionDefinition {
    pub fn new(id: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            id: id.into(),
            question_type,
            title: LocalizedText::new(),
            required: false,
            placeholder: None,
            group_name: None,
            group_order: None,
            group_key: None,
            conditional_group_key: None,
            cell_reference: None,
            sheet_name: None,
            multi_cell: false,
            unit: None,
            min_value: None,
            max_value: None,
            calculation_formula: None,
            calculation_inputs: Vec::new(),
        }
    }

    /// A controller decides whether the group named by its conditional key is shown.
    pub fn is_controller(&self) -> bool {
        self.conditional_group_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
            && self.question_type.is_choice()
    }

    pub fn display_title(&self, language: Language) -> &str {
        self.title.resolve(language).unwrap_or(&self.id)
    }

    /// Target cells of this question. `multiCell` questions list several
    /// addresses separated by `,` or `;` and receive the same value in each.
    pub fn target_cells(&self) -> Vec<String> {
        let Some(reference) = self.cell_reference.as_deref() else {
            return Vec::new();
        };
        if self.multi_cell {
            reference
                .split([',', ';'])
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        } else {
            let trimmed = reference.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_requires_choice_type() {
        let mut question = QuestionDefinition::new("Q1", QuestionType::TriStateChoice);
        question.conditional_group_key = Some("machine_room".to_string());
        assert!(question.is_controller());

        question.question_type = QuestionType::Text;
        assert!(!question.is_controller());
    }

    #[test]
    fn test_localized_text_falls_back_to_english() {
        let mut title = LocalizedText::single(Language::En, "Shaft pit");
        assert_eq!(title.resolve(Language::Hu), Some("Shaft pit"));
        title.insert(Language::Hu, "Aknagödör");
        assert_eq!(title.resolve(Language::Hu), Some("Aknagödör"));
    }

    #[test]
    fn test_multi_cell_targets() {
        let mut question = QuestionDefinition::new("Q7", QuestionType::Text);
        question.cell_reference = Some("B5; C5,D5".to_string());
        assert_eq!(question.target_cells(), vec!["B5; C5,D5".to_string()]);

        question.multi_cell = true;
        assert_eq!(question.target_cells(), vec!["B5", "C5", "D5"]);
    }

    #[test]
    fn test_deserialize_camel_case_definition() {
        let json = r#"{
            "id": "Q2",
            "type": "measurement",
            "title": {"de": "Abstand"},
            "groupKey": "pit",
            "cellReference": "C7",
            "minValue": 10,
            "maxValue": 20
        }"#;
        let question: QuestionDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(question.question_type, QuestionType::Measurement);
        assert_eq!(question.group_key.as_deref(), Some("pit"));
        assert_eq!(question.min_value, Some(10.0));
    }
}
