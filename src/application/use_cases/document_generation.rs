//! Generation requests end to end: resolve templates, load the questionnaire,
//! populate or fill, and hand back the artifact with its report.

use crate::application::use_cases::pdf_form::{fill_form, FilledForm};
use crate::application::use_cases::question_config::{load_question_config, QuestionConfigReport};
use crate::application::use_cases::spreadsheet::cell_ref::CellRef;
use crate::application::use_cases::spreadsheet::display::CellValue;
use crate::application::use_cases::spreadsheet::xml_patch::patch_workbook;
use crate::application::use_cases::spreadsheet::{populate, CellWrite, PopulatedWorkbook};
use crate::application::use_cases::template_resolution::TemplateResolutionService;
use crate::domain::answer::{format_number, AnswerMap};
use crate::domain::document::{
    CellMapping, CellWriteResponse, FormFillReport, GeneratedDocument, InspectionItemAnswer,
    PopulationReport, PDF_CONTENT_TYPE, XLSX_CONTENT_TYPE,
};
use crate::domain::error::{AppError, Result};
use crate::domain::language::Language;
use crate::domain::template::{
    LoadStrategy, ResolvedTemplate, TemplateQuery, TemplateSource, TemplateType,
};
use crate::infrastructure::renderer::PdfRenderer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProtocolRequest {
    pub language: Language,
    pub answers: AnswerMap,
    pub template_id: Option<String>,
    pub strategy: Option<LoadStrategy>,
}

#[derive(Debug)]
pub struct ProtocolOutput {
    pub document: GeneratedDocument,
    pub report: PopulationReport,
    pub template_source: TemplateSource,
    pub used_fallback: bool,
}

#[derive(Debug)]
pub struct GroundingOutput {
    pub document: GeneratedDocument,
    pub report: FormFillReport,
}

#[derive(Debug)]
pub struct CellWriteOutput {
    pub response: CellWriteResponse,
    pub workbook: Vec<u8>,
}

fn join_err(e: tokio::task::JoinError) -> AppError {
    AppError::Internal(format!("Document task failed: {}", e))
}

fn stamp() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

/// Mapping values that read back identically as numbers are written as numbers.
fn mapping_value(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(number) if number.is_finite() && format_number(number) == trimmed => {
            CellValue::Number(number)
        }
        _ => CellValue::Text(raw.to_string()),
    }
}

pub struct DocumentGenerationService {
    templates: Arc<TemplateResolutionService>,
    renderer: PdfRenderer,
}

impl DocumentGenerationService {
    pub fn new(templates: Arc<TemplateResolutionService>, renderer: PdfRenderer) -> Self {
        Self {
            templates,
            renderer,
        }
    }

    pub fn templates(&self) -> &Arc<TemplateResolutionService> {
        &self.templates
    }

    async fn template(
        &self,
        template_type: TemplateType,
        language: Language,
        template_id: Option<&str>,
        strategy: Option<LoadStrategy>,
    ) -> ResolvedTemplate {
        let mut query = TemplateQuery::new(template_type, language);
        query.template_id = template_id.map(str::to_string);
        query.strategy = strategy;
        self.templates.resolve(&query).await
    }

    /// Question definitions from the questionnaire-source workbook.
    pub async fn load_questions(&self, language: Language) -> Result<QuestionConfigReport> {
        let template = self.template(TemplateType::Questions, language, None, None).await;
        if template.is_empty() {
            return Err(AppError::ConfigurationError(
                "Question workbook is unavailable".to_string(),
            ));
        }
        tokio::task::spawn_blocking(move || load_question_config(&template.bytes, None))
            .await
            .map_err(join_err)?
    }

    pub async fn generate_protocol(&self, request: ProtocolRequest) -> Result<ProtocolOutput> {
        let questions = self.load_questions(request.language).await?.questions;
        let template = self
            .template(
                TemplateType::Protocol,
                request.language,
                request.template_id.as_deref(),
                request.strategy,
            )
            .await;
        let template_source = template.source;
        let used_fallback = template.used_fallback;
        if used_fallback {
            warn!(file = %template.file_name, "Protocol generated from fallback template");
        }

        let language = request.language;
        let answers = request.answers;
        let populated: PopulatedWorkbook = tokio::task::spawn_blocking(move || {
            let template = (!template.bytes.is_empty()).then_some(template.bytes.as_slice());
            populate(template, &questions, &answers, language)
        })
        .await
        .map_err(join_err)??;

        info!(
            language = language.code(),
            fidelity = populated.report.fidelity.code(),
            written_cells = populated.report.written_cells,
            "Protocol generated"
        );
        Ok(ProtocolOutput {
            document: GeneratedDocument {
                bytes: populated.bytes,
                file_name: format!("protocol-{}-{}.xlsx", language.code(), stamp()),
                content_type: XLSX_CONTENT_TYPE,
            },
            report: populated.report,
            template_source,
            used_fallback,
        })
    }

    /// The populated protocol converted to PDF by the external renderer.
    pub async fn generate_protocol_pdf(&self, request: ProtocolRequest) -> Result<ProtocolOutput> {
        let mut output = self.generate_protocol(request).await?;
        let pdf = self.renderer.workbook_to_pdf(&output.document.bytes).await?;
        output.document = GeneratedDocument {
            bytes: pdf,
            file_name: output.document.file_name.replace(".xlsx", ".pdf"),
            content_type: PDF_CONTENT_TYPE,
        };
        Ok(output)
    }

    pub async fn generate_grounding(
        &self,
        language: Language,
        metadata: BTreeMap<String, String>,
        items: Vec<InspectionItemAnswer>,
    ) -> Result<GroundingOutput> {
        let template = self.template(TemplateType::FormPdf, language, None, None).await;
        if template.is_empty() {
            return Err(AppError::ConfigurationError(
                "Grounding-check form is unavailable".to_string(),
            ));
        }

        let filled: FilledForm =
            tokio::task::spawn_blocking(move || fill_form(&template.bytes, &metadata, &items))
                .await
                .map_err(join_err)??;
        Ok(GroundingOutput {
            document: GeneratedDocument {
                bytes: filled.bytes,
                file_name: format!("grounding-check-{}.pdf", stamp()),
                content_type: PDF_CONTENT_TYPE,
            },
            report: filled.report,
        })
    }

    /// Writes explicit cell mappings into the protocol template.
    pub async fn write_cells(
        &self,
        language: Language,
        template_id: Option<&str>,
        mappings: Vec<CellMapping>,
    ) -> Result<CellWriteOutput> {
        let template = self
            .template(TemplateType::Protocol, language, template_id, None)
            .await;
        if template.is_empty() {
            return Err(AppError::ConfigurationError(
                "Protocol template is unavailable".to_string(),
            ));
        }

        let mut response = CellWriteResponse::default();
        let mut writes = Vec::new();
        for mapping in mappings {
            if mapping.cell_reference.trim().is_empty() {
                response.missing_mappings.push(mapping.question_id);
                continue;
            }
            match CellRef::parse(&mapping.cell_reference) {
                Ok(mut cell) => {
                    if cell.sheet.is_none() {
                        cell.sheet = mapping.sheet_name.clone();
                    }
                    writes.push(CellWrite {
                        question_id: mapping.question_id,
                        cell,
                        value: mapping_value(&mapping.value),
                    });
                }
                Err(e) => response
                    .errors
                    .push(format!("{}: {}", mapping.question_id, e)),
            }
        }

        let outcome = tokio::task::spawn_blocking(move || patch_workbook(&template.bytes, &writes))
            .await
            .map_err(join_err)?
            .map_err(|e| AppError::ConfigurationError(format!("Protocol template unreadable: {}", e)))?;

        response.written_cells = outcome.written_cells;
        response
            .errors
            .extend(outcome.failures.iter().map(|failure| failure.to_string()));
        response.success = response.errors.is_empty();
        info!(
            written_cells = response.written_cells,
            errors = response.errors.len(),
            missing = response.missing_mappings.len(),
            "Cells written"
        );
        Ok(CellWriteOutput {
            response,
            workbook: outcome.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::answer::AnswerValue;
    use crate::domain::document::FidelityTier;
    use crate::infrastructure::object_storage::LocalObjectStorage;
    use crate::infrastructure::template_cache::TemplateCache;
    use crate::infrastructure::template_registry::RegistryCache;
    use calamine::{DataType, Reader, Xlsx};
    use rust_xlsxwriter::{Format, Workbook};
    use std::io::Cursor;
    use std::path::Path;

    /// Q1 controls the `machine_room` group that Q2 belongs to.
    fn question_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let rows: [&[&str]; 3] = [
            &["ID", "Title (DE)", "Type", "Cell", "Group Key", "Conditional Group Key", "Unit"],
            &["Q1", "Maschinenraum vorhanden", "yes_no_na", "B5", "", "machine_room", ""],
            &["Q2", "Raumhöhe", "measurement", "C7", "machine_room", "", "cm"],
        ];
        for (r, row) in rows.iter().enumerate() {
            for (c, text) in row.iter().enumerate() {
                if !text.is_empty() {
                    sheet.write_string(r as u32, c as u16, *text).unwrap();
                }
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    fn protocol_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet().set_name("Protokoll").unwrap();
        sheet.write_string_with_format(0, 0, "Abnahmeprotokoll", &bold).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    fn service(bundled: &Path, cache: &Path) -> DocumentGenerationService {
        let templates = TemplateResolutionService::new(
            Arc::new(RegistryCache::new(bundled.join("template-registry.json"))),
            bundled,
            TemplateCache::new(cache),
            None,
            Arc::new(LocalObjectStorage::new(bundled.join("storage"))),
        );
        DocumentGenerationService::new(Arc::new(templates), PdfRenderer::new("soffice"))
    }

    fn fixture() -> (tempfile::TempDir, DocumentGenerationService) {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("templates");
        std::fs::create_dir_all(&bundled).unwrap();
        std::fs::write(bundled.join("questions-unified.xlsx"), question_workbook()).unwrap();
        std::fs::write(bundled.join("protocol-de.xlsx"), protocol_workbook()).unwrap();
        let service = service(&bundled, &dir.path().join("cache"));
        (dir, service)
    }

    fn cell(bytes: &[u8], sheet: &str, row: u32, col: u32) -> Option<calamine::Data> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec())).unwrap();
        let range = workbook.worksheet_range(sheet).unwrap();
        range.get_value((row, col)).cloned()
    }

    #[tokio::test]
    async fn test_controlled_answer_is_merged_into_protocol() {
        let (_dir, service) = fixture();
        let mut answers = AnswerMap::new();
        answers.insert("Q1".to_string(), AnswerValue::from("yes"));
        answers.insert("Q2".to_string(), AnswerValue::from("15"));

        let output = service
            .generate_protocol(ProtocolRequest {
                language: Language::De,
                answers,
                template_id: None,
                strategy: None,
            })
            .await
            .unwrap();

        assert_eq!(output.template_source, TemplateSource::Bundled);
        assert_eq!(output.report.fidelity, FidelityTier::MarkupPatch);
        assert_eq!(output.report.written_cells, 2);
        let bytes = &output.document.bytes;
        assert_eq!(
            cell(bytes, "Protokoll", 4, 1).and_then(|c| c.get_string().map(str::to_string)),
            Some("Ja".to_string())
        );
        assert_eq!(cell(bytes, "Protokoll", 6, 2).and_then(|c| c.get_float()), Some(15.0));
    }

    #[tokio::test]
    async fn test_write_cells_reports_missing_and_invalid_mappings() {
        let (_dir, service) = fixture();
        let mappings = vec![
            CellMapping {
                question_id: "Q1".to_string(),
                cell_reference: "B5".to_string(),
                value: "Ja".to_string(),
                sheet_name: None,
            },
            CellMapping {
                question_id: "Q2".to_string(),
                cell_reference: "C7".to_string(),
                value: "15".to_string(),
                sheet_name: None,
            },
            CellMapping {
                question_id: "Q3".to_string(),
                cell_reference: String::new(),
                value: "x".to_string(),
                sheet_name: None,
            },
            CellMapping {
                question_id: "Q4".to_string(),
                cell_reference: "A1".to_string(),
                value: "x".to_string(),
                sheet_name: Some("Fehlt".to_string()),
            },
        ];

        let output = service.write_cells(Language::De, None, mappings).await.unwrap();
        assert_eq!(output.response.written_cells, 2);
        assert_eq!(output.response.missing_mappings, vec!["Q3".to_string()]);
        assert_eq!(output.response.errors.len(), 1);
        assert!(!output.response.success);
        assert_eq!(cell(&output.workbook, "Protokoll", 6, 2).and_then(|c| c.get_float()), Some(15.0));
    }

    #[tokio::test]
    async fn test_grounding_without_form_is_configuration_error() {
        let (_dir, service) = fixture();
        let err = service
            .generate_grounding(Language::De, BTreeMap::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigurationError(_)));
    }

    #[test]
    fn test_mapping_values_keep_text_that_is_not_a_clean_number() {
        assert_eq!(mapping_value("15"), CellValue::Number(15.0));
        assert_eq!(mapping_value("2.5"), CellValue::Number(2.5));
        assert_eq!(mapping_value("007"), CellValue::Text("007".to_string()));
        assert_eq!(mapping_value("Ja"), CellValue::Text("Ja".to_string()));
    }
}
