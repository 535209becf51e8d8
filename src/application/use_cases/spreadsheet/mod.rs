//! Spreadsheet population: answers in, populated protocol workbook out.
//!
//! Tiers, best first: patch the workbook markup in place, rewrite every cell
//! through a fresh object model, or synthesize a bare workbook when there is
//! no template at all.

pub mod bare;
pub mod cell_ref;
pub mod display;
pub mod rewrite;
pub mod xml_patch;

use crate::application::use_cases::calculation::evaluate_calculations;
use crate::application::use_cases::fallback::{first_success, FnStrategy, Strategy};
use crate::application::use_cases::visibility::{fill_hidden_with_sentinel, resolve_visibility};
use crate::domain::answer::{AnswerMap, TriState};
use crate::domain::document::{
    CalculationFlag, ErrorListEntry, FidelityTier, PartialWriteFailure, PopulationReport,
};
use crate::domain::error::{AppError, Result};
use crate::domain::language::Language;
use crate::domain::question::{QuestionDefinition, QuestionType};
use cell_ref::CellRef;
use display::{display_value, CellValue};
use tracing::{info, warn};

/// One value bound for one resolved cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub question_id: String,
    pub cell: CellRef,
    pub value: CellValue,
}

/// Localized writes for every answered question that names a cell.
/// Unparseable references become failures; the rest still get written.
pub fn build_cell_writes(
    questions: &[QuestionDefinition],
    answers: &AnswerMap,
    language: Language,
) -> (Vec<CellWrite>, Vec<PartialWriteFailure>) {
    let mut writes = Vec::new();
    let mut failures = Vec::new();

    for question in questions {
        let Some(answer) = answers.get(&question.id) else {
            continue;
        };
        let Some(value) = display_value(question, answer, language) else {
            continue;
        };
        for target in question.target_cells() {
            match CellRef::parse(&target) {
                Ok(mut cell) => {
                    if cell.sheet.is_none() {
                        cell.sheet = question
                            .sheet_name
                            .as_deref()
                            .map(str::trim)
                            .filter(|name| !name.is_empty())
                            .map(str::to_string);
                    }
                    writes.push(CellWrite {
                        question_id: question.id.clone(),
                        cell,
                        value: value.clone(),
                    });
                }
                Err(e) => failures.push(PartialWriteFailure::new(
                    format!("{} ({})", target, question.id),
                    e.to_string(),
                )),
            }
        }
    }

    (writes, failures)
}

fn bound_text(bound: Option<f64>) -> String {
    bound
        .map(crate::domain::answer::format_number)
        .unwrap_or_default()
}

/// `not_ok` choice answers first (questionnaire order), then out-of-range calculations.
pub fn build_error_list(
    questions: &[QuestionDefinition],
    answers: &AnswerMap,
    flags: &[CalculationFlag],
    language: Language,
) -> Vec<ErrorListEntry> {
    let labels = language.labels();
    let mut entries: Vec<ErrorListEntry> = questions
        .iter()
        .filter(|question| question.question_type == QuestionType::TriStateChoice)
        .filter(|question| {
            answers
                .get(&question.id)
                .and_then(|answer| answer.as_tri_state())
                == Some(TriState::NotOk)
        })
        .map(|question| ErrorListEntry {
            question_id: question.id.clone(),
            title: question.display_title(language).to_string(),
            note: labels.not_ok.to_string(),
        })
        .collect();

    for flag in flags {
        if let CalculationFlag::OutOfRange {
            question_id,
            value,
            min,
            max,
        } = flag
        {
            let title = questions
                .iter()
                .find(|question| &question.id == question_id)
                .map(|question| question.display_title(language).to_string())
                .unwrap_or_else(|| question_id.clone());
            entries.push(ErrorListEntry {
                question_id: question_id.clone(),
                title,
                note: format!(
                    "{}: {} [{}..{}]",
                    labels.out_of_range,
                    crate::domain::answer::format_number(*value),
                    bound_text(*min),
                    bound_text(*max)
                ),
            });
        }
    }
    entries
}

struct LadderInput<'a> {
    template: Option<&'a [u8]>,
    writes: &'a [CellWrite],
    questions: &'a [QuestionDefinition],
    answers: &'a AnswerMap,
    error_list: &'a [ErrorListEntry],
    language: Language,
    date: &'a str,
}

impl LadderInput<'_> {
    fn template(&self) -> Result<&[u8]> {
        self.template
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| AppError::NotFound("No template to populate".to_string()))
    }
}

struct TierOutput {
    tier: FidelityTier,
    bytes: Vec<u8>,
    written_cells: usize,
    failures: Vec<PartialWriteFailure>,
}

#[derive(Debug)]
pub struct PopulatedWorkbook {
    pub bytes: Vec<u8>,
    pub report: PopulationReport,
}

/// Populates `template` (or synthesizes a workbook when there is none) with
/// `answers`, after visibility fill and calculations. Signed with today's date.
pub fn populate(
    template: Option<&[u8]>,
    questions: &[QuestionDefinition],
    answers: &AnswerMap,
    language: Language,
) -> Result<PopulatedWorkbook> {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    populate_on(template, questions, answers, language, &today)
}

pub fn populate_on(
    template: Option<&[u8]>,
    questions: &[QuestionDefinition],
    answers: &AnswerMap,
    language: Language,
    date: &str,
) -> Result<PopulatedWorkbook> {
    let visibility = resolve_visibility(questions, answers);
    let mut effective = fill_hidden_with_sentinel(&visibility, answers);

    let calculations = evaluate_calculations(questions, &effective);
    calculations.apply_to(&mut effective);

    let error_list = build_error_list(questions, &effective, &calculations.flags, language);
    let (writes, mut failures) = build_cell_writes(questions, &effective, language);

    let input = LadderInput {
        template,
        writes: &writes,
        questions,
        answers: &effective,
        error_list: &error_list,
        language,
        date,
    };

    let markup = FnStrategy::new("markup_patch", |input: &LadderInput| {
        let outcome = xml_patch::patch_workbook(input.template()?, input.writes)?;
        Ok(TierOutput {
            tier: FidelityTier::MarkupPatch,
            bytes: outcome.bytes,
            written_cells: outcome.written_cells,
            failures: outcome.failures,
        })
    });
    let cell_rewrite = FnStrategy::new("cell_rewrite", |input: &LadderInput| {
        let outcome = rewrite::rewrite_workbook(input.template()?, input.writes)?;
        Ok(TierOutput {
            tier: FidelityTier::CellRewrite,
            bytes: outcome.bytes,
            written_cells: outcome.written_cells,
            failures: outcome.failures,
        })
    });
    let synthesized = FnStrategy::new("bare_workbook", |input: &LadderInput| {
        if input.template().is_ok() {
            return Err(AppError::ConfigurationError(
                "Template is present but unreadable".to_string(),
            ));
        }
        let (bytes, written_cells) = bare::synthesize_workbook(
            input.questions,
            input.answers,
            input.error_list,
            input.language,
            input.date,
        )?;
        Ok(TierOutput {
            tier: FidelityTier::BareWorkbook,
            bytes,
            written_cells,
            failures: Vec::new(),
        })
    });

    let ladder: [&dyn Strategy<LadderInput, TierOutput>; 3] = [&markup, &cell_rewrite, &synthesized];
    let success = first_success(&ladder, &input).map_err(|exhausted| {
        warn!(reason = %exhausted.summary(), "Every workbook tier failed");
        AppError::ConfigurationError(format!(
            "Template could not be populated ({})",
            exhausted.summary()
        ))
    })?;

    let output = success.value;
    if !success.failures.is_empty() {
        warn!(
            tier = output.tier.code(),
            skipped = success.failures.len(),
            "Workbook populated below full fidelity"
        );
    }
    failures.extend(output.failures);
    info!(
        tier = output.tier.code(),
        written_cells = output.written_cells,
        failures = failures.len(),
        errors = error_list.len(),
        "Workbook populated"
    );

    Ok(PopulatedWorkbook {
        bytes: output.bytes,
        report: PopulationReport {
            fidelity: output.tier,
            written_cells: output.written_cells,
            failures,
            calculation_flags: calculations.flags,
            error_list,
        },
    })
}
