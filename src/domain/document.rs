use crate::domain::answer::TriState;
use serde::{Deserialize, Serialize};

/// One value bound for one cell address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMapping {
    pub question_id: String,
    pub cell_reference: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CellWriteResponse {
    pub success: bool,
    pub written_cells: usize,
    pub errors: Vec<String>,
    pub missing_mappings: Vec<String>,
}

/// A cell or form field named by mapping data that the template lacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialWriteFailure {
    pub target: String,
    pub reason: String,
}

impl PartialWriteFailure {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for PartialWriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.target, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculationFlag {
    /// Rendered, but outside the declared bounds.
    OutOfRange {
        question_id: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Left blank because an input was missing or the formula was rejected.
    Blank { question_id: String, reason: String },
}

impl CalculationFlag {
    pub fn question_id(&self) -> &str {
        match self {
            CalculationFlag::OutOfRange { question_id, .. } => question_id,
            CalculationFlag::Blank { question_id, .. } => question_id,
        }
    }
}

/// One line of the protocol's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorListEntry {
    pub question_id: String,
    pub title: String,
    pub note: String,
}

/// Fidelity tier that produced a workbook, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FidelityTier {
    MarkupPatch,
    CellRewrite,
    BareWorkbook,
}

impl FidelityTier {
    pub fn code(&self) -> &'static str {
        match self {
            FidelityTier::MarkupPatch => "markup_patch",
            FidelityTier::CellRewrite => "cell_rewrite",
            FidelityTier::BareWorkbook => "bare_workbook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationReport {
    pub fidelity: FidelityTier,
    pub written_cells: usize,
    pub failures: Vec<PartialWriteFailure>,
    pub calculation_flags: Vec<CalculationFlag>,
    pub error_list: Vec<ErrorListEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemarkEntry {
    pub location_code: String,
    pub text: String,
}

/// Answer for one inspected item of the fixed-layout form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionItemAnswer {
    pub question_id: String,
    pub status: TriState,
    /// Overrides the item's built-in label in the remarks table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFillReport {
    pub filled_fields: usize,
    pub remarks: Vec<RemarkEntry>,
    pub remarks_dropped: usize,
    pub failures: Vec<PartialWriteFailure>,
}

/// A finished artifact ready for download.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: &'static str,
}

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";
