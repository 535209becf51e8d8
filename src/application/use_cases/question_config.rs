use crate::application::use_cases::formula::is_bare_identifier;
use crate::application::use_cases::header_roles::{resolve_header_roles, HeaderRole, HeaderRoleMap};
use crate::domain::error::{AppError, Result};
use crate::domain::language::Language;
use crate::domain::question::{LocalizedText, QuestionDefinition, QuestionType};
use crate::shared::text::normalize_token;
use calamine::{Data, Reader, Xlsx};
use serde::Serialize;
use std::io::Cursor;
use tracing::{info, warn};

/// Type tokens as they appear in questionnaire sheets, already normalized.
const TYPE_SYNONYMS: &[(QuestionType, &[&str])] = &[
    (
        QuestionType::TriStateChoice,
        &["yesnona", "igennemna", "janeinna", "tristate", "tristatechoice", "radio"],
    ),
    (
        QuestionType::BooleanChoice,
        &["truefalse", "boolean", "booleanchoice", "bool", "checkbox", "yesno", "igennem", "janein"],
    ),
    (QuestionType::Measurement, &["measurement", "measure", "meres", "messung"]),
    (
        QuestionType::Calculated,
        &["calculated", "calculation", "computed", "szamitott", "berechnet", "formula"],
    ),
    (
        QuestionType::Number,
        &["number", "numeric", "int", "integer", "decimal", "szam", "zahl"],
    ),
    (QuestionType::Text, &["text", "string", "szoveg", "freitext"]),
];

pub fn parse_question_type(raw: &str) -> Option<QuestionType> {
    let token = normalize_token(raw);
    if token.is_empty() {
        return None;
    }
    TYPE_SYNONYMS
        .iter()
        .find(|(_, synonyms)| synonyms.contains(&token.as_str()))
        .map(|(question_type, _)| *question_type)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionConfigReport {
    pub sheet_name: String,
    pub questions: Vec<QuestionDefinition>,
    /// One line per skipped row.
    pub warnings: Vec<String>,
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        normalize_token(raw).as_str(),
        "true" | "yes" | "igen" | "ja" | "1" | "x" | "y" | "i" | "wahr"
    )
}

fn parse_decimal(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

struct RowView<'a> {
    cells: &'a [String],
    roles: &'a HeaderRoleMap,
}

impl<'a> RowView<'a> {
    fn get(&self, role: HeaderRole) -> &'a str {
        self.roles
            .column(role)
            .and_then(|index| self.cells.get(index))
            .map(|cell| cell.as_str())
            .unwrap_or("")
    }

    fn localized(&self, generic: HeaderRole, per_language: fn(Language) -> HeaderRole) -> LocalizedText {
        let mut text = LocalizedText::new();
        for language in Language::ALL {
            if let Some(value) = non_empty(self.get(per_language(language))) {
                text.insert(language, value);
            }
        }
        if let Some(value) = non_empty(self.get(generic)) {
            // The generic column fills whatever the language columns left open.
            for language in Language::ALL {
                if !text.0.contains_key(&language) {
                    text.insert(language, value.clone());
                }
            }
        }
        text
    }
}

/// Parses questionnaire rows. The first row holds the headers.
pub fn parse_question_rows(rows: &[Vec<String>]) -> Result<(Vec<QuestionDefinition>, Vec<String>)> {
    let Some((headers, body)) = rows.split_first() else {
        return Err(AppError::ConfigurationError(
            "Question sheet is empty".to_string(),
        ));
    };
    let roles = resolve_header_roles(headers)?;

    let mut questions = Vec::new();
    let mut warnings = Vec::new();

    for (offset, cells) in body.iter().enumerate() {
        // 1-based sheet row, header included
        let row_number = offset + 2;
        let row = RowView { cells, roles: &roles };

        let Some(id) = non_empty(row.get(HeaderRole::Id)) else {
            continue;
        };

        let raw_type = row.get(HeaderRole::Type);
        let Some(question_type) = parse_question_type(raw_type) else {
            warn!(row = row_number, question_id = %id, raw_type, "Skipping row with unknown question type");
            warnings.push(format!(
                "row {}: unknown question type '{}' for {}",
                row_number,
                raw_type.trim(),
                id
            ));
            continue;
        };

        let mut question = QuestionDefinition::new(id, question_type);
        question.title = row.localized(HeaderRole::Title, HeaderRole::title_for);
        question.required = parse_flag(row.get(HeaderRole::Required));
        question.placeholder = non_empty(row.get(HeaderRole::Placeholder));

        let group_name = row.localized(HeaderRole::GroupName, HeaderRole::group_name_for);
        question.group_name = if group_name.is_empty() { None } else { Some(group_name) };
        question.group_order = parse_decimal(row.get(HeaderRole::GroupOrder)).map(|value| value as i64);
        question.group_key = non_empty(row.get(HeaderRole::GroupKey));
        question.conditional_group_key = non_empty(row.get(HeaderRole::ConditionalGroupKey));

        question.cell_reference = non_empty(row.get(HeaderRole::CellReference));
        question.sheet_name = non_empty(row.get(HeaderRole::SheetName));
        question.multi_cell = parse_flag(row.get(HeaderRole::MultiCell));

        question.unit = non_empty(row.get(HeaderRole::Unit));
        question.min_value = parse_decimal(row.get(HeaderRole::MinValue));
        question.max_value = parse_decimal(row.get(HeaderRole::MaxValue));
        question.calculation_formula = non_empty(row.get(HeaderRole::CalculationFormula));
        question.calculation_inputs = row
            .get(HeaderRole::CalculationInputs)
            .split([',', ';', ' '])
            .map(str::trim)
            .filter(|input| !input.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(formula) = question.calculation_formula.as_deref() {
            for input in &question.calculation_inputs {
                if !is_bare_identifier(input) && !formula.contains(&format!("[{}]", input)) {
                    warn!(row = row_number, question_id = %question.id, input = %input, "Formula input must be bracketed");
                    warnings.push(format!(
                        "row {}: input '{}' of {} must be written as [{}] in the formula",
                        row_number, input, question.id, input
                    ));
                }
            }
        }

        questions.push(question);
    }

    Ok((questions, warnings))
}

pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) => crate::domain::answer::format_number(*value),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    }
}

/// Reads the questionnaire-source workbook. Uses `sheet_name` when given,
/// otherwise the first worksheet.
pub fn load_question_config(bytes: &[u8], sheet_name: Option<&str>) -> Result<QuestionConfigReport> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).map_err(|e| {
        AppError::ConfigurationError(format!("Failed to open question workbook: {}", e))
    })?;

    let sheet_name = match sheet_name {
        Some(name) => name.to_string(),
        None => workbook.sheet_names().first().cloned().ok_or_else(|| {
            AppError::ConfigurationError("No worksheet found in question workbook".to_string())
        })?,
    };

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        AppError::ConfigurationError(format!("Failed to read sheet '{}': {}", sheet_name, e))
    })?;

    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let (questions, warnings) = parse_question_rows(&rows)?;
    info!(
        sheet = %sheet_name,
        questions = questions.len(),
        skipped = warnings.len(),
        "Loaded question configuration"
    );

    Ok(QuestionConfigReport {
        sheet_name,
        questions,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_type_synonyms() {
        assert_eq!(parse_question_type("Yes/No/NA"), Some(QuestionType::TriStateChoice));
        assert_eq!(parse_question_type("true_false"), Some(QuestionType::BooleanChoice));
        assert_eq!(parse_question_type("Mérés"), Some(QuestionType::Measurement));
        assert_eq!(parse_question_type("Számított"), Some(QuestionType::Calculated));
        assert_eq!(parse_question_type("Zahl"), Some(QuestionType::Number));
        assert_eq!(parse_question_type("Freitext"), Some(QuestionType::Text));
        assert_eq!(parse_question_type("dropdown"), None);
        assert_eq!(parse_question_type(""), None);
    }

    #[test]
    fn test_unknown_type_rows_are_skipped_with_warning() {
        let data = rows(&[
            &["ID", "Title", "Title (HU)", "Type", "Cell", "Min", "Max", "Group Key"],
            &["Q1", "Pit present", "Aknagödör", "yes_no_na", "B5", "", "", ""],
            &["Q2", "Pit depth", "", "measurement", "C7", "10", "20,5", "pit"],
            &["Q3", "Colour", "", "dropdown", "D1", "", "", ""],
            &["", "blank id", "", "text", "", "", "", ""],
        ]);
        let (questions, warnings) = parse_question_rows(&data).unwrap();

        assert_eq!(questions.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("row 4"));

        let q1 = &questions[0];
        assert_eq!(q1.title.resolve(Language::Hu), Some("Aknagödör"));
        assert_eq!(q1.title.resolve(Language::De), Some("Pit present"));
        assert_eq!(q1.cell_reference.as_deref(), Some("B5"));

        let q2 = &questions[1];
        assert_eq!(q2.question_type, QuestionType::Measurement);
        assert_eq!(q2.min_value, Some(10.0));
        assert_eq!(q2.max_value, Some(20.5));
        assert_eq!(q2.group_key.as_deref(), Some("pit"));
    }

    #[test]
    fn test_unbracketed_special_input_is_flagged() {
        let data = rows(&[
            &["ID", "Title", "Type", "Formula", "Inputs"],
            &["Q-1", "Width", "number", "", ""],
            &["2A", "Depth", "number", "", ""],
            &["AREA", "Area", "calculated", "Q-1 * [2A]", "Q-1, 2A"],
            &["VOL", "Volume", "calculated", "[Q-1] * [2A] * 2", "Q-1; 2A"],
        ]);
        let (questions, warnings) = parse_question_rows(&data).unwrap();

        assert_eq!(questions.len(), 4);
        assert_eq!(questions[2].calculation_inputs, vec!["Q-1", "2A"]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("row 4"));
        assert!(warnings[0].contains("[Q-1]"));
    }

    #[test]
    fn test_missing_required_headers_is_configuration_error() {
        let data = rows(&[&["Title", "Type"], &["Pit", "text"]]);
        assert!(matches!(
            parse_question_rows(&data),
            Err(AppError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_load_from_workbook() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let header = [
            "id",
            "title",
            "type",
            "conditionalGroupKey",
            "groupKey",
            "calculationFormula",
            "calculationInputs",
            "required",
        ];
        for (col, text) in header.iter().enumerate() {
            sheet.write_string(0, col as u16, *text).unwrap();
        }
        sheet.write_string(1, 0, "Q1").unwrap();
        sheet.write_string(1, 1, "Has pit").unwrap();
        sheet.write_string(1, 2, "tristate").unwrap();
        sheet.write_string(1, 3, "pit").unwrap();
        sheet.write_string(1, 7, "igen").unwrap();
        sheet.write_string(2, 0, "Q9").unwrap();
        sheet.write_string(2, 1, "Total").unwrap();
        sheet.write_string(2, 2, "calculated").unwrap();
        sheet.write_string(2, 4, "pit").unwrap();
        sheet.write_string(2, 5, "Q2 + Q3").unwrap();
        sheet.write_string(2, 6, "Q2, Q3").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let report = load_question_config(&bytes, None).unwrap();
        assert_eq!(report.questions.len(), 2);
        assert!(report.questions[0].is_controller());
        assert!(report.questions[0].required);
        assert_eq!(report.questions[1].calculation_inputs, vec!["Q2", "Q3"]);
    }

    #[test]
    fn test_garbage_bytes_fail_with_configuration_error() {
        assert!(matches!(
            load_question_config(b"not a workbook", None),
            Err(AppError::ConfigurationError(_))
        ));
    }
}
