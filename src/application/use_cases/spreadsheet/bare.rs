use super::display::display_text;
use crate::domain::answer::AnswerMap;
use crate::domain::document::ErrorListEntry;
use crate::domain::error::{AppError, Result};
use crate::domain::language::Language;
use crate::domain::question::QuestionDefinition;
use rust_xlsxwriter::{Format, FormatBorder, Workbook, XlsxError};

fn xlsx_err(e: XlsxError) -> AppError {
    AppError::Internal(format!("Workbook write failed: {}", e))
}

/// Last-resort protocol: question/answer table, error list, signature block.
/// Returns the workbook and the number of answers written.
pub fn synthesize_workbook(
    questions: &[QuestionDefinition],
    answers: &AnswerMap,
    error_list: &[ErrorListEntry],
    language: Language,
    date: &str,
) -> Result<(Vec<u8>, usize)> {
    let labels = language.labels();
    let header = Format::new().set_bold().set_border_bottom(FormatBorder::Thin);
    let bold = Format::new().set_bold();
    let signature_line = Format::new().set_border_bottom(FormatBorder::Thin);

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(labels.protocol).map_err(xlsx_err)?;
    sheet.set_column_width(0, 60).map_err(xlsx_err)?;
    sheet.set_column_width(1, 30).map_err(xlsx_err)?;

    sheet
        .write_string_with_format(0, 0, labels.question, &header)
        .map_err(xlsx_err)?;
    sheet
        .write_string_with_format(0, 1, labels.answer, &header)
        .map_err(xlsx_err)?;

    let mut row: u32 = 1;
    let mut written = 0;
    for question in questions {
        sheet
            .write_string(row, 0, question.display_title(language))
            .map_err(xlsx_err)?;
        if let Some(answer) = answers.get(&question.id) {
            let text = display_text(question, answer, language);
            if !text.is_empty() {
                sheet.write_string(row, 1, &text).map_err(xlsx_err)?;
                written += 1;
            }
        }
        row += 1;
    }

    row += 1;
    sheet
        .write_string_with_format(row, 0, labels.error_list, &bold)
        .map_err(xlsx_err)?;
    row += 1;
    for entry in error_list {
        sheet.write_string(row, 0, &entry.title).map_err(xlsx_err)?;
        sheet.write_string(row, 1, &entry.note).map_err(xlsx_err)?;
        row += 1;
    }

    row += 2;
    for (label, value) in [
        (labels.inspector, ""),
        (labels.date, date),
        (labels.signature, ""),
    ] {
        sheet
            .write_string_with_format(row, 0, label, &bold)
            .map_err(xlsx_err)?;
        sheet
            .write_string_with_format(row, 1, value, &signature_line)
            .map_err(xlsx_err)?;
        row += 2;
    }

    let bytes = workbook.save_to_buffer().map_err(xlsx_err)?;
    Ok((bytes, written))
}
