//! Fixed-layout form filling (grounding-check PDF).
//!
//! Every inspected item owns an OK and a not-OK text field. Failing items
//! additionally land in the remarks table, which has a fixed number of rows;
//! remarks past the last row are dropped.

pub mod field_map;

use crate::domain::answer::TriState;
use crate::domain::document::{
    FormFillReport, InspectionItemAnswer, PartialWriteFailure, RemarkEntry,
};
use crate::domain::error::{AppError, Result};
use field_map::{
    item_fields, metadata_field, NOT_APPLICABLE_MARKER, OK_MARKER, REMARK_SLOTS,
};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

fn pdf_err(e: lopdf::Error) -> AppError {
    AppError::ConfigurationError(format!("PDF template unreadable: {}", e))
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
pub fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|byte| *byte as char).collect()
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    let mut current = object;
    // bounded in case of reference cycles
    for _ in 0..16 {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

fn acro_form_id(doc: &Document) -> Result<Option<ObjectId>> {
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(pdf_err)?;
    let catalog = doc.get_dictionary(root_id).map_err(pdf_err)?;
    Ok(catalog.get(b"AcroForm").ok().and_then(|form| form.as_reference().ok()))
}

fn acro_form(doc: &Document) -> Result<Option<&Dictionary>> {
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(pdf_err)?;
    let catalog = doc.get_dictionary(root_id).map_err(pdf_err)?;
    Ok(catalog
        .get(b"AcroForm")
        .ok()
        .and_then(|form| resolve(doc, form))
        .and_then(|form| form.as_dict().ok()))
}

/// Fully qualified field name -> field object, walking `Fields` and `Kids`.
pub fn field_index(doc: &Document) -> Result<BTreeMap<String, ObjectId>> {
    let mut index = BTreeMap::new();
    let Some(form) = acro_form(doc)? else {
        return Ok(index);
    };
    let Ok(fields) = form.get(b"Fields").and_then(Object::as_array) else {
        return Ok(index);
    };

    let mut visited = HashSet::new();
    let mut stack: Vec<(ObjectId, Option<String>)> = fields
        .iter()
        .rev()
        .filter_map(|field| field.as_reference().ok())
        .map(|id| (id, None))
        .collect();

    while let Some((id, parent)) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Ok(field) = doc.get_dictionary(id) else {
            continue;
        };
        let partial = match field.get(b"T") {
            Ok(Object::String(bytes, _)) => Some(decode_text_string(bytes)),
            _ => None,
        };
        let name = match (&parent, partial) {
            (Some(parent), Some(partial)) => Some(format!("{}.{}", parent, partial)),
            (None, Some(partial)) => Some(partial),
            (parent, None) => parent.clone(),
        };

        let kids: Vec<ObjectId> = field
            .get(b"Kids")
            .and_then(Object::as_array)
            .map(|kids| kids.iter().filter_map(|kid| kid.as_reference().ok()).collect())
            .unwrap_or_default();
        let named_kids = kids.iter().any(|kid| {
            doc.get_dictionary(*kid)
                .map(|kid| kid.has(b"T"))
                .unwrap_or(false)
        });

        if named_kids {
            for kid in kids.into_iter().rev() {
                stack.push((kid, name.clone()));
            }
        } else if let Some(name) = name {
            index.entry(name).or_insert(id);
        }
    }
    Ok(index)
}

fn set_field_value(doc: &mut Document, field_id: ObjectId, value: &str) -> Result<()> {
    let widget_ids: Vec<ObjectId> = doc
        .get_dictionary(field_id)
        .map_err(pdf_err)?
        .get(b"Kids")
        .and_then(Object::as_array)
        .map(|kids| kids.iter().filter_map(|kid| kid.as_reference().ok()).collect())
        .unwrap_or_default();

    let field = doc
        .get_object_mut(field_id)
        .and_then(Object::as_dict_mut)
        .map_err(pdf_err)?;
    field.set("V", encode_text_string(value));
    // stale appearance streams would keep showing the old value
    field.remove(b"AP");

    for widget_id in widget_ids {
        if let Ok(widget) = doc.get_object_mut(widget_id).and_then(Object::as_dict_mut) {
            widget.remove(b"AP");
        }
    }
    Ok(())
}

fn set_need_appearances(doc: &mut Document) -> Result<()> {
    if let Some(form_id) = acro_form_id(doc)? {
        let form = doc
            .get_object_mut(form_id)
            .and_then(Object::as_dict_mut)
            .map_err(pdf_err)?;
        form.set("NeedAppearances", Object::Boolean(true));
        return Ok(());
    }

    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(pdf_err)?;
    let catalog = doc
        .get_object_mut(root_id)
        .and_then(Object::as_dict_mut)
        .map_err(pdf_err)?;
    if let Ok(form) = catalog.get_mut(b"AcroForm").and_then(Object::as_dict_mut) {
        form.set("NeedAppearances", Object::Boolean(true));
    }
    Ok(())
}

struct FormWriter<'a> {
    doc: &'a mut Document,
    fields: BTreeMap<String, ObjectId>,
    filled: usize,
    failures: Vec<PartialWriteFailure>,
}

impl FormWriter<'_> {
    /// A field the template lacks is recorded, never fatal.
    fn write(&mut self, field_name: &str, value: &str) -> Result<()> {
        match self.fields.get(field_name) {
            Some(id) => {
                set_field_value(self.doc, *id, value)?;
                self.filled += 1;
            }
            None => {
                warn!(field = field_name, "Form field missing from template");
                self.failures
                    .push(PartialWriteFailure::new(field_name, "field not found in form"));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FilledForm {
    pub bytes: Vec<u8>,
    pub report: FormFillReport,
}

/// Fills metadata, item markers and the remarks table of the form in `template`.
/// Remarks are collected in `items` order.
pub fn fill_form(
    template: &[u8],
    metadata: &BTreeMap<String, String>,
    items: &[InspectionItemAnswer],
) -> Result<FilledForm> {
    let mut doc = Document::load_mem(template).map_err(pdf_err)?;
    let fields = field_index(&doc)?;
    if fields.is_empty() {
        return Err(AppError::ConfigurationError(
            "PDF template has no form fields".to_string(),
        ));
    }

    let mut writer = FormWriter {
        doc: &mut doc,
        fields,
        filled: 0,
        failures: Vec::new(),
    };

    for (key, value) in metadata {
        match metadata_field(key) {
            Some(field) => writer.write(field, value)?,
            None => writer.failures.push(PartialWriteFailure::new(
                key.as_str(),
                "no form field mapped for metadata key",
            )),
        }
    }

    let mut remarks = Vec::new();
    for answer in items {
        let Some(item) = item_fields(&answer.question_id) else {
            writer.failures.push(PartialWriteFailure::new(
                answer.question_id.as_str(),
                "no form fields mapped for item",
            ));
            continue;
        };
        match answer.status {
            TriState::Ok => writer.write(item.ok_field, OK_MARKER)?,
            TriState::NotApplicable => writer.write(item.ok_field, NOT_APPLICABLE_MARKER)?,
            TriState::NotOk => {
                writer.write(item.not_ok_field, OK_MARKER)?;
                let text = answer
                    .display_text
                    .as_deref()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .unwrap_or(item.label);
                remarks.push(RemarkEntry {
                    location_code: item.location_code.to_string(),
                    text: text.to_string(),
                });
            }
        }
    }

    let remarks_dropped = remarks.len().saturating_sub(REMARK_SLOTS.len());
    remarks.truncate(REMARK_SLOTS.len());
    for (slot, remark) in REMARK_SLOTS.iter().zip(&remarks) {
        writer.write(slot.punkt_field, &remark.location_code)?;
        writer.write(slot.bemerkung_field, &remark.text)?;
    }

    let filled_fields = writer.filled;
    let failures = writer.failures;
    set_need_appearances(&mut doc)?;

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| AppError::Internal(format!("Failed to write PDF: {}", e)))?;

    info!(
        filled_fields,
        remarks = remarks.len(),
        remarks_dropped,
        failures = failures.len(),
        "Form filled"
    );
    Ok(FilledForm {
        bytes,
        report: FormFillReport {
            filled_fields,
            remarks,
            remarks_dropped,
            failures,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::field_map::{ITEM_FIELDS, METADATA_FIELDS};
    use super::*;
    use lopdf::dictionary;

    fn form_fixture(field_names: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut field_refs = Vec::new();
        for name in field_names {
            let id = doc.add_object(dictionary! {
                "FT" => "Tx",
                "Type" => "Annot",
                "Subtype" => "Widget",
                "T" => Object::string_literal(*name),
                "Rect" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(80), Object::Integer(12)],
                "AP" => dictionary! {},
            });
            field_refs.push(Object::Reference(id));
        }

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(595), Object::Integer(842)],
            "Annots" => field_refs.clone(),
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let form_id = doc.add_object(dictionary! {
            "Fields" => field_refs,
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "AcroForm" => form_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn full_form() -> Vec<u8> {
        let mut names: Vec<&str> = Vec::new();
        for item in ITEM_FIELDS {
            names.push(item.ok_field);
            names.push(item.not_ok_field);
        }
        names.extend(METADATA_FIELDS.iter().map(|(_, field)| *field));
        for slot in REMARK_SLOTS {
            names.push(slot.punkt_field);
            names.push(slot.bemerkung_field);
        }
        form_fixture(&names)
    }

    fn value_of(bytes: &[u8], field: &str) -> Option<String> {
        let doc = Document::load_mem(bytes).unwrap();
        let index = field_index(&doc).unwrap();
        let id = index.get(field)?;
        match doc.get_dictionary(*id).unwrap().get(b"V") {
            Ok(Object::String(raw, _)) => Some(decode_text_string(raw)),
            _ => None,
        }
    }

    fn answer(question_id: &str, status: TriState) -> InspectionItemAnswer {
        InspectionItemAnswer {
            question_id: question_id.to_string(),
            status,
            display_text: None,
        }
    }

    #[test]
    fn test_tri_state_markers_and_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("inspector".to_string(), "Kovács Péter".to_string());
        metadata.insert("unknownKey".to_string(), "x".to_string());
        let items = vec![
            answer("G01", TriState::Ok),
            answer("G02", TriState::NotOk),
            answer("G03", TriState::NotApplicable),
        ];

        let filled = fill_form(&full_form(), &metadata, &items).unwrap();
        let report = &filled.report;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.remarks.len(), 1);
        assert_eq!(report.remarks[0].location_code, "1.2");
        assert_eq!(report.remarks[0].text, "Schaltschrank");

        let bytes = &filled.bytes;
        assert_eq!(value_of(bytes, "MR_Hauptschalter_iO").as_deref(), Some("X"));
        assert_eq!(value_of(bytes, "MR_Hauptschalter_niO"), None);
        assert_eq!(value_of(bytes, "MR_Schaltschrank_niO").as_deref(), Some("X"));
        assert_eq!(value_of(bytes, "MR_Antrieb_iO").as_deref(), Some("-"));
        assert_eq!(value_of(bytes, "Pruefer").as_deref(), Some("Kovács Péter"));
        assert_eq!(value_of(bytes, "Punkt1").as_deref(), Some("1.2"));
        assert_eq!(value_of(bytes, "Bemerkung1").as_deref(), Some("Schaltschrank"));

        let doc = Document::load_mem(bytes).unwrap();
        let form = acro_form(&doc).unwrap().unwrap();
        assert_eq!(form.get(b"NeedAppearances").unwrap(), &Object::Boolean(true));
        let id = field_index(&doc).unwrap()["Pruefer"];
        assert!(!doc.get_dictionary(id).unwrap().has(b"AP"));
    }

    #[test]
    fn test_remarks_beyond_capacity_are_dropped_in_order() {
        let items: Vec<InspectionItemAnswer> = ITEM_FIELDS
            .iter()
            .take(12)
            .map(|item| answer(item.question_id, TriState::NotOk))
            .collect();

        let filled = fill_form(&full_form(), &BTreeMap::new(), &items).unwrap();
        assert_eq!(filled.report.remarks.len(), REMARK_SLOTS.len());
        assert_eq!(filled.report.remarks_dropped, 2);
        assert!(filled.report.failures.is_empty());
        assert_eq!(value_of(&filled.bytes, "Punkt1").as_deref(), Some("1.1"));
        assert_eq!(value_of(&filled.bytes, "Punkt10").as_deref(), Some("3.1"));
    }

    #[test]
    fn test_missing_field_is_reported_not_fatal() {
        let template = form_fixture(&["MR_Hauptschalter_iO"]);
        let items = vec![answer("G01", TriState::Ok), answer("G05", TriState::Ok)];
        let filled = fill_form(&template, &BTreeMap::new(), &items).unwrap();
        assert_eq!(filled.report.filled_fields, 1);
        assert_eq!(filled.report.failures.len(), 1);
        assert_eq!(filled.report.failures[0].target, "MR_Geschwindigkeitsbegrenzer_iO");
    }

    #[test]
    fn test_unreadable_template_is_configuration_error() {
        let err = fill_form(b"%PDF-garbage", &BTreeMap::new(), &[]).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationError(_)));
    }

    #[test]
    fn test_text_string_round_trip_for_non_ascii() {
        let Object::String(bytes, _) = encode_text_string("Prüfer") else {
            panic!("expected string");
        };
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_text_string(&bytes), "Prüfer");
    }
}
