use crate::domain::error::AppError;
use crate::domain::language::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const MULTILINGUAL: &str = "multilingual";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    /// Questionnaire source workbook (question configuration rows).
    Questions,
    /// Spreadsheet acceptance protocol.
    Protocol,
    /// Fixed-layout grounding-check form.
    FormPdf,
}

impl TemplateType {
    pub fn code(&self) -> &'static str {
        match self {
            TemplateType::Questions => "questions",
            TemplateType::Protocol => "protocol",
            TemplateType::FormPdf => "form_pdf",
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TemplateType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "questions" | "question" | "questionnaire" => Ok(TemplateType::Questions),
            "protocol" | "protocols" => Ok(TemplateType::Protocol),
            "form_pdf" | "pdf" | "grounding" => Ok(TemplateType::FormPdf),
            other => Err(AppError::ValidationError(format!(
                "Unknown template type: {}",
                other
            ))),
        }
    }
}

/// Language of a stored template, or the `multilingual` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TemplateLanguage {
    Specific(Language),
    Multilingual,
}

impl TemplateLanguage {
    pub fn code(&self) -> &'static str {
        match self {
            TemplateLanguage::Specific(language) => language.code(),
            TemplateLanguage::Multilingual => MULTILINGUAL,
        }
    }

    /// A multilingual template serves every language.
    pub fn serves(&self, language: Language) -> bool {
        match self {
            TemplateLanguage::Specific(own) => *own == language,
            TemplateLanguage::Multilingual => true,
        }
    }
}

impl TryFrom<String> for TemplateLanguage {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().eq_ignore_ascii_case(MULTILINGUAL) {
            return Ok(TemplateLanguage::Multilingual);
        }
        value.parse::<Language>().map(TemplateLanguage::Specific)
    }
}

impl From<TemplateLanguage> for String {
    fn from(value: TemplateLanguage) -> Self {
        value.code().to_string()
    }
}

impl From<Language> for TemplateLanguage {
    fn from(value: Language) -> Self {
        TemplateLanguage::Specific(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub template_type: TemplateType,
    pub language: TemplateLanguage,
    pub file_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lift_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TemplateRecord {
    pub fn matches(&self, template_type: TemplateType, language: Language) -> bool {
        self.is_active && self.template_type == template_type && self.language.serves(language)
    }
}

/// Where a resolved template binary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    Bundled,
    Cache,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    #[default]
    LocalFirst,
    CacheFirst,
    RemoteOnly,
}

impl FromStr for LoadStrategy {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "local_first" | "local" => Ok(LoadStrategy::LocalFirst),
            "cache_first" | "cache" => Ok(LoadStrategy::CacheFirst),
            "remote_only" | "remote" => Ok(LoadStrategy::RemoteOnly),
            other => Err(AppError::ValidationError(format!(
                "Unknown load strategy: {}",
                other
            ))),
        }
    }
}

/// What a caller asks the resolution service for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateQuery {
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(rename = "type")]
    pub template_type: TemplateType,
    pub language: Language,
    #[serde(default)]
    pub strategy: Option<LoadStrategy>,
}

impl TemplateQuery {
    pub fn new(template_type: TemplateType, language: Language) -> Self {
        Self {
            template_id: None,
            template_type,
            language,
            strategy: None,
        }
    }

    pub fn with_id(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    /// `type-language` composite used to match cached file names.
    pub fn composite_key(&self) -> String {
        format!("{}-{}", self.template_type.code(), self.language.code())
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub bytes: Vec<u8>,
    pub source: TemplateSource,
    pub file_name: String,
    /// Set when every tier failed and the static fallback answered.
    pub used_fallback: bool,
}

impl ResolvedTemplate {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Active template file as recorded by the metadata store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTemplateFile {
    pub id: String,
    pub template_type: TemplateType,
    pub language: TemplateLanguage,
    pub file_name: String,
    pub storage_path: String,
}

// Registry document

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRegistryDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub templates: RegistryTemplates,
    #[serde(default)]
    pub settings: RegistrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RegistryTemplates {
    #[serde(default)]
    pub questions: Vec<RegistryEntry>,
    #[serde(default)]
    pub protocols: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySettings {
    #[serde(default)]
    pub load_strategy: LoadStrategy,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub offline_support: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            load_strategy: LoadStrategy::default(),
            cache_enabled: true,
            offline_support: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub name: String,
    pub file_name: String,
    /// Language code of the entry, or `multilingual`.
    #[serde(rename = "type")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lift_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    /// `name_<lang>` variants.
    #[serde(flatten)]
    pub localized_names: BTreeMap<String, serde_json::Value>,
}

impl RegistryEntry {
    pub fn localized_name(&self, language: Language) -> &str {
        self.localized_names
            .get(&format!("name_{}", language.code()))
            .and_then(|value| value.as_str())
            .unwrap_or(&self.name)
    }

    pub fn to_record(&self, template_type: TemplateType) -> Option<TemplateRecord> {
        let language = TemplateLanguage::try_from(self.language.clone()).ok()?;
        Some(TemplateRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            template_type,
            language,
            file_name: self.file_name.clone(),
            is_active: true,
            is_default: self.is_default,
            lift_type: self.lift_type.clone(),
            description: self.description.clone(),
        })
    }
}

impl TemplateRegistryDocument {
    pub fn records(&self) -> Vec<TemplateRecord> {
        self.templates
            .questions
            .iter()
            .filter_map(|entry| entry.to_record(TemplateType::Questions))
            .chain(
                self.templates
                    .protocols
                    .iter()
                    .filter_map(|entry| entry.to_record(TemplateType::Protocol)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_document_parses() {
        let json = r#"{
            "version": "2",
            "lastUpdated": "2026-01-10",
            "templates": {
                "questions": [
                    {"id": "q-unified", "name": "Questions", "name_de": "Fragen",
                     "fileName": "questions.xlsx", "type": "multilingual", "isDefault": true}
                ],
                "protocols": [
                    {"id": "p-de", "name": "Protokoll", "fileName": "protokoll_de.xlsx", "type": "de"}
                ]
            },
            "settings": {"loadStrategy": "cache_first", "cacheEnabled": false, "offlineSupport": true}
        }"#;
        let document: TemplateRegistryDocument = serde_json::from_str(json).unwrap();
        assert_eq!(document.settings.load_strategy, LoadStrategy::CacheFirst);
        assert_eq!(document.templates.questions[0].localized_name(Language::De), "Fragen");
        assert_eq!(document.templates.questions[0].localized_name(Language::Hu), "Questions");

        let records = document.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].language, TemplateLanguage::Multilingual);
        assert_eq!(records[1].template_type, TemplateType::Protocol);
        assert!(records[1].matches(TemplateType::Protocol, Language::De));
        assert!(!records[1].matches(TemplateType::Protocol, Language::Hu));
    }

    #[test]
    fn test_composite_key() {
        let query = TemplateQuery::new(TemplateType::Protocol, Language::Hu);
        assert_eq!(query.composite_key(), "protocol-hu");
    }

    #[test]
    fn test_template_language_round_trip_strings() {
        let language: TemplateLanguage = serde_json::from_str("\"Multilingual\"").unwrap();
        assert_eq!(language, TemplateLanguage::Multilingual);
        assert_eq!(serde_json::to_string(&TemplateLanguage::Specific(Language::Hu)).unwrap(), "\"hu\"");
    }
}
