//! Second fidelity tier: reload the template through calamine and write a
//! fresh workbook with rust_xlsxwriter. Values, formulas and sheet names carry
//! over; cell formatting does not.

use super::display::CellValue;
use super::CellWrite;
use crate::domain::document::PartialWriteFailure;
use crate::domain::error::{AppError, Result};
use calamine::{Data, Reader, Xlsx};
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use std::io::Cursor;

fn xlsx_err(e: XlsxError) -> AppError {
    AppError::Internal(format!("Workbook write failed: {}", e))
}

#[derive(Debug)]
pub struct RewriteOutcome {
    pub bytes: Vec<u8>,
    pub written_cells: usize,
    pub failures: Vec<PartialWriteFailure>,
}

fn copy_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &Data) -> Result<()> {
    match cell {
        Data::Empty | Data::Error(_) => {}
        Data::String(text) => {
            sheet.write_string(row, col, text).map_err(xlsx_err)?;
        }
        Data::Float(value) => {
            sheet.write_number(row, col, *value).map_err(xlsx_err)?;
        }
        Data::Int(value) => {
            sheet.write_number(row, col, *value as f64).map_err(xlsx_err)?;
        }
        Data::Bool(value) => {
            sheet.write_boolean(row, col, *value).map_err(xlsx_err)?;
        }
        Data::DateTime(value) => {
            sheet.write_number(row, col, value.as_f64()).map_err(xlsx_err)?;
        }
        Data::DateTimeIso(text) | Data::DurationIso(text) => {
            sheet.write_string(row, col, text).map_err(xlsx_err)?;
        }
    }
    Ok(())
}

pub fn rewrite_workbook(template: &[u8], writes: &[CellWrite]) -> Result<RewriteOutcome> {
    let mut source: Xlsx<_> = Xlsx::new(Cursor::new(template))
        .map_err(|e| AppError::ParseError(format!("Failed to open template: {}", e)))?;
    let sheet_names = source.sheet_names();
    if sheet_names.is_empty() {
        return Err(AppError::ParseError("Template has no worksheets".to_string()));
    }

    let mut workbook = Workbook::new();
    let mut written_cells = 0;
    let mut failures = Vec::new();

    for (index, name) in sheet_names.iter().enumerate() {
        let range = source
            .worksheet_range(name)
            .map_err(|e| AppError::ParseError(format!("Failed to read sheet '{}': {}", name, e)))?;
        // formulas are optional; a sheet without any still rewrites
        let formulas = source.worksheet_formula(name).ok();

        let sheet = workbook.add_worksheet();
        sheet.set_name(name).map_err(xlsx_err)?;

        if let Some((row_offset, col_offset)) = range.start() {
            for (row, col, cell) in range.used_cells() {
                let row = row_offset + row as u32;
                let col = (col_offset + col as u32) as u16;
                copy_cell(sheet, row, col, cell)?;
            }
        }

        if let Some(formulas) = formulas {
            if let Some((row_offset, col_offset)) = formulas.start() {
                for (row, col, formula) in formulas.used_cells() {
                    if formula.trim().is_empty() {
                        continue;
                    }
                    let row = row_offset + row as u32;
                    let col = (col_offset + col as u32) as u16;
                    sheet
                        .write_formula(row, col, format!("={}", formula).as_str())
                        .map_err(xlsx_err)?;
                }
            }
        }

        for write in writes {
            let targets_this_sheet = match write.cell.sheet.as_deref() {
                None => index == 0,
                Some(sheet_name) => name == sheet_name || name.eq_ignore_ascii_case(sheet_name),
            };
            if !targets_this_sheet {
                continue;
            }
            let (row, col) = write.cell.zero_based();
            let result = match &write.value {
                CellValue::Number(value) => sheet.write_number(row, col, *value),
                CellValue::Text(text) => sheet.write_string(row, col, text),
            };
            result.map_err(xlsx_err)?;
            written_cells += 1;
        }
    }

    for write in writes {
        if let Some(sheet_name) = write.cell.sheet.as_deref() {
            let known = sheet_names
                .iter()
                .any(|name| name == sheet_name || name.eq_ignore_ascii_case(sheet_name));
            if !known {
                failures.push(PartialWriteFailure::new(
                    format!("{} ({})", write.cell, write.question_id),
                    "sheet not found in template",
                ));
            }
        }
    }

    let bytes = workbook.save_to_buffer().map_err(xlsx_err)?;
    Ok(RewriteOutcome {
        bytes,
        written_cells,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::spreadsheet::cell_ref::CellRef;
    use calamine::DataType;

    fn template() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().set_name("Protokoll").unwrap();
        sheet.write_string(0, 0, "Anlage").unwrap();
        sheet.write_number(1, 0, 2.0).unwrap();
        sheet.write_formula(1, 1, "=A2*2").unwrap();
        let second = workbook.add_worksheet().set_name("Messwerte").unwrap();
        second.write_string(3, 3, "keep").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    fn write(question_id: &str, cell: &str, value: CellValue) -> CellWrite {
        CellWrite {
            question_id: question_id.to_string(),
            cell: CellRef::parse(cell).unwrap(),
            value,
        }
    }

    #[test]
    fn test_rewrite_keeps_values_formulas_and_sheets() {
        let writes = vec![
            write("Q1", "B5", CellValue::Text("Ja".to_string())),
            write("Q2", "Messwerte!A1", CellValue::Number(15.0)),
            write("Q3", "Nowhere!A1", CellValue::Number(1.0)),
        ];
        let outcome = rewrite_workbook(&template(), &writes).unwrap();
        assert_eq!(outcome.written_cells, 2);
        assert_eq!(outcome.failures.len(), 1);

        let mut reread: Xlsx<_> = Xlsx::new(Cursor::new(outcome.bytes)).unwrap();
        assert_eq!(reread.sheet_names(), vec!["Protokoll", "Messwerte"]);

        let first = reread.worksheet_range("Protokoll").unwrap();
        assert_eq!(first.get_value((0, 0)).and_then(|c| c.get_string()), Some("Anlage"));
        assert_eq!(first.get_value((4, 1)).and_then(|c| c.get_string()), Some("Ja"));
        let formulas = reread.worksheet_formula("Protokoll").unwrap();
        assert_eq!(formulas.get_value((1, 1)).map(|f| f.as_str()), Some("A2*2"));

        let second = reread.worksheet_range("Messwerte").unwrap();
        assert_eq!(second.get_value((0, 0)).and_then(|c| c.get_float()), Some(15.0));
        assert_eq!(second.get_value((3, 3)).and_then(|c| c.get_string()), Some("keep"));
    }

    #[test]
    fn test_unreadable_template_fails() {
        assert!(rewrite_workbook(b"garbage", &[]).is_err());
    }
}
