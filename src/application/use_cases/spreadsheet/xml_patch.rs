//! Format-preserving population by editing worksheet markup in place.
//!
//! Only the targeted `<c>` elements are rewritten. Every other part of the
//! package is copied byte for byte, so styles, merged ranges, drawings and
//! conditional formats survive untouched. A replaced cell keeps its `s`
//! (style) attribute; only its type and value change.
//!
//! Overwriting a formula cell also removes its entry from `xl/calcChain.xml`.
//! When no entry is left the part, its relationship and its content type
//! override are dropped; spreadsheet applications rebuild the chain on load.

use super::cell_ref::{column_letters, split_a1};
use super::display::CellValue;
use super::CellWrite;
use crate::domain::document::PartialWriteFailure;
use crate::domain::error::{AppError, Result};
use calamine::{Reader as _, Xlsx};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

type ColumnWrites = BTreeMap<u32, CellValue>;
type RowWrites = BTreeMap<u32, ColumnWrites>;

const CALC_CHAIN_PART: &str = "xl/calcChain.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

fn xml_err(e: impl Display) -> AppError {
    AppError::ParseError(format!("Workbook markup error: {}", e))
}

fn zip_err(e: impl Display) -> AppError {
    AppError::ParseError(format!("Workbook package error: {}", e))
}

#[derive(Debug)]
pub struct PatchOutcome {
    pub bytes: Vec<u8>,
    pub written_cells: usize,
    pub failures: Vec<PartialWriteFailure>,
}

struct SheetEntry {
    name: String,
    part: String,
    /// `sheetId` from the workbook; calcChain entries refer to sheets by it.
    sheet_id: String,
}

/// Worksheet name -> package part (`xl/worksheets/sheet1.xml`), in workbook order.
pub fn sheet_parts(package: &[u8]) -> Result<Vec<(String, String)>> {
    let mut archive = ZipArchive::new(Cursor::new(package)).map_err(zip_err)?;
    Ok(sheet_parts_from(&mut archive)?
        .into_iter()
        .map(|sheet| (sheet.name, sheet.part))
        .collect())
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name).map_err(zip_err)?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(content)
}

fn sheet_parts_from(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Vec<SheetEntry>> {
    let workbook = read_entry(archive, "xl/workbook.xml")?;
    let rels = read_entry(archive, WORKBOOK_RELS_PART)?;

    let mut targets: BTreeMap<String, String> = BTreeMap::new();
    let mut reader = Reader::from_str(&rels);
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
                        b"Target" => {
                            target = Some(attr.unescape_value().map_err(xml_err)?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            _ => {}
        }
    }

    let mut sheets = Vec::new();
    let mut reader = Reader::from_str(&workbook);
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                let mut sheet_id = None;
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"name" {
                        name = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                    } else if attr.key.as_ref() == b"sheetId" {
                        sheet_id = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                    } else if attr.key.local_name().as_ref() == b"id" && attr.key.prefix().is_some() {
                        rel_id = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                    }
                }
                let part = rel_id
                    .and_then(|id| targets.get(&id).cloned())
                    .map(|target| match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    });
                if let (Some(name), Some(part)) = (name, part) {
                    let sheet_id = sheet_id.unwrap_or_else(|| (sheets.len() + 1).to_string());
                    sheets.push(SheetEntry {
                        name,
                        part,
                        sheet_id,
                    });
                }
            }
            _ => {}
        }
    }

    if sheets.is_empty() {
        return Err(AppError::ParseError(
            "Workbook declares no worksheets".to_string(),
        ));
    }
    Ok(sheets)
}

/// Applies `writes` to the package. Writes naming an unknown sheet become failures.
pub fn patch_workbook(template: &[u8], writes: &[CellWrite]) -> Result<PatchOutcome> {
    let mut archive = ZipArchive::new(Cursor::new(template)).map_err(zip_err)?;
    let sheets = sheet_parts_from(&mut archive)?;

    let mut failures = Vec::new();
    let mut per_part: BTreeMap<String, RowWrites> = BTreeMap::new();
    for write in writes {
        let part = match write.cell.sheet.as_deref() {
            None => sheets.first().map(|entry| entry.part.clone()),
            Some(sheet) => sheets
                .iter()
                .find(|entry| entry.name == sheet || entry.name.eq_ignore_ascii_case(sheet))
                .map(|entry| entry.part.clone()),
        };
        match part {
            Some(part) => {
                per_part
                    .entry(part)
                    .or_default()
                    .entry(write.cell.row)
                    .or_default()
                    .insert(write.cell.col, write.value.clone());
            }
            None => failures.push(PartialWriteFailure::new(
                format!("{} ({})", write.cell, write.question_id),
                "sheet not found in template",
            )),
        }
    }

    let mut replaced: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut removed: BTreeSet<String> = BTreeSet::new();
    let mut written_cells = 0;
    let mut dropped_formulas: BTreeSet<(String, String)> = BTreeSet::new();
    for (part, rows) in &per_part {
        let xml = read_entry(&mut archive, part)?;
        let patch = patch_sheet_xml(&xml, rows)?;
        written_cells += patch.written;
        if let Some(entry) = sheets.iter().find(|entry| &entry.part == part) {
            for address in patch.overwritten_formulas {
                dropped_formulas.insert((entry.sheet_id.clone(), address));
            }
        }
        replaced.insert(part.clone(), patch.markup);
    }

    let has_calc_chain = archive.file_names().any(|name| name == CALC_CHAIN_PART);
    if has_calc_chain && !dropped_formulas.is_empty() {
        let chain = read_entry(&mut archive, CALC_CHAIN_PART)?;
        let (markup, kept) = prune_calc_chain(&chain, &dropped_formulas)?;
        if kept > 0 {
            replaced.insert(CALC_CHAIN_PART.to_string(), markup);
        } else {
            removed.insert(CALC_CHAIN_PART.to_string());
            let rels = read_entry(&mut archive, WORKBOOK_RELS_PART)?;
            replaced.insert(
                WORKBOOK_RELS_PART.to_string(),
                drop_elements(&rels, b"Relationship", |e| {
                    attribute_text(e, b"Target")
                        .is_some_and(|target| target.trim_start_matches('/').ends_with("calcChain.xml"))
                })?,
            );
            if archive.file_names().any(|name| name == CONTENT_TYPES_PART) {
                let types = read_entry(&mut archive, CONTENT_TYPES_PART)?;
                replaced.insert(
                    CONTENT_TYPES_PART.to_string(),
                    drop_elements(&types, b"Override", |e| {
                        attribute_text(e, b"PartName").as_deref() == Some("/xl/calcChain.xml")
                    })?,
                );
            }
        }
    }

    let bytes = rebuild_package(&mut archive, &replaced, &removed)?;
    verify_readable(&bytes)?;

    Ok(PatchOutcome {
        bytes,
        written_cells,
        failures,
    })
}

fn rebuild_package(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    replaced: &BTreeMap<String, Vec<u8>>,
    removed: &BTreeSet<String>,
) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let name = archive.by_index_raw(index).map_err(zip_err)?.name().to_string();
        if removed.contains(&name) {
            continue;
        }
        match replaced.get(&name) {
            Some(content) => {
                writer.start_file(name, options).map_err(zip_err)?;
                writer.write_all(content)?;
            }
            None => {
                let entry = archive.by_index_raw(index).map_err(zip_err)?;
                writer.raw_copy_file(entry).map_err(zip_err)?;
            }
        }
    }

    let cursor = writer.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

fn verify_readable(bytes: &[u8]) -> Result<()> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| AppError::ParseError(format!("Patched workbook does not open: {}", e)))?;
    let names = workbook.sheet_names();
    for name in names {
        workbook
            .worksheet_range(&name)
            .map_err(|e| AppError::ParseError(format!("Patched sheet '{}' unreadable: {}", name, e)))?;
    }
    Ok(())
}

/// Removes the calcChain entries of `dropped` (`sheetId`, address) pairs.
/// An entry without `i` belongs to the sheet of the entry before it, so every
/// kept entry is written with an explicit `i`. Returns the markup and the
/// number of entries kept.
fn prune_calc_chain(xml: &str, dropped: &BTreeSet<(String, String)>) -> Result<(Vec<u8>, usize)> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut sheet_id = String::new();
    let mut kept = 0usize;
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => return Err(xml_err("unterminated calcChain entry")),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                if let Some(id) = attribute_text(e, b"i") {
                    sheet_id = id;
                }
                let address = attribute_text(e, b"r").unwrap_or_default();
                let is_start = matches!(event, Event::Start(_));
                if dropped.contains(&(sheet_id.clone(), address)) {
                    if is_start {
                        skip_depth = 1;
                    }
                    continue;
                }
                let mut entry = copy_without(e, &[b"i".as_slice()]);
                if !sheet_id.is_empty() {
                    entry.push_attribute(("i", sheet_id.as_str()));
                }
                kept += 1;
                let entry = if is_start {
                    Event::Start(entry)
                } else {
                    Event::Empty(entry)
                };
                writer.write_event(entry).map_err(xml_err)?;
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }
    Ok((writer.into_inner(), kept))
}

/// Copies `xml`, leaving out every `local_name` element that `matches`.
fn drop_elements(xml: &str, local_name: &[u8], matches: impl Fn(&BytesStart) -> bool) -> Result<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => return Err(xml_err("unterminated element")),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Empty(ref e) if e.local_name().as_ref() == local_name && matches(e) => {}
            Event::Start(ref e) if e.local_name().as_ref() == local_name && matches(e) => {
                skip_depth = 1;
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }
    Ok(writer.into_inner())
}

fn attribute_text(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|attr| String::from_utf8(attr.value.into_owned()).ok())
}

fn copy_without(e: &BytesStart, skipped: &[&[u8]]) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut copy = BytesStart::new(name);
    for attr in e.attributes().flatten() {
        if !skipped.contains(&attr.key.as_ref()) {
            copy.push_attribute(attr);
        }
    }
    copy
}

/// A rewritten worksheet part.
#[derive(Debug)]
pub struct SheetPatch {
    pub markup: Vec<u8>,
    pub written: usize,
    /// Addresses of replaced cells that carried a formula.
    pub overwritten_formulas: BTreeSet<String>,
}

struct SheetPatcher {
    writer: Writer<Vec<u8>>,
    pending: RowWrites,
    row_cells: Option<ColumnWrites>,
    current_row: u32,
    last_col: u32,
    written: usize,
    /// Prefix of the worksheet root (`x` for `<x:worksheet>`); new elements reuse it.
    prefix: Option<String>,
    overwritten_formulas: BTreeSet<String>,
}

impl SheetPatcher {
    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event).map_err(xml_err)
    }

    fn tag(&self, local: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, local),
            None => local.to_string(),
        }
    }

    /// Writes a `<c>` for `value`, inheriting every attribute of `original`
    /// except the cell type.
    fn write_cell(&mut self, original: Option<&BytesStart>, row: u32, col: u32, value: &CellValue) -> Result<()> {
        let cell_tag = self.tag("c");
        let mut start = BytesStart::new(cell_tag.clone());
        start.push_attribute(("r", format!("{}{}", column_letters(col), row).as_str()));
        if let Some(original) = original {
            for attr in original.attributes().flatten() {
                if !matches!(attr.key.as_ref(), b"r" | b"t") {
                    start.push_attribute(attr);
                }
            }
        }

        match value {
            CellValue::Number(number) => {
                let value_tag = self.tag("v");
                self.emit(Event::Start(start))?;
                self.emit(Event::Start(BytesStart::new(value_tag.clone())))?;
                self.emit(Event::Text(BytesText::new(&number.to_string())))?;
                self.emit(Event::End(BytesEnd::new(value_tag)))?;
            }
            CellValue::Text(text) => {
                let inline_tag = self.tag("is");
                let text_tag = self.tag("t");
                start.push_attribute(("t", "inlineStr"));
                self.emit(Event::Start(start))?;
                self.emit(Event::Start(BytesStart::new(inline_tag.clone())))?;
                self.emit(Event::Start(
                    BytesStart::new(text_tag.clone()).with_attributes([("xml:space", "preserve")]),
                ))?;
                self.emit(Event::Text(BytesText::new(text)))?;
                self.emit(Event::End(BytesEnd::new(text_tag)))?;
                self.emit(Event::End(BytesEnd::new(inline_tag)))?;
            }
        }
        self.emit(Event::End(BytesEnd::new(cell_tag)))?;
        self.written += 1;
        Ok(())
    }

    /// New rows for every pending row number below `before`.
    fn flush_rows_before(&mut self, before: u32) -> Result<()> {
        let rows: Vec<u32> = self.pending.range(..before).map(|(row, _)| *row).collect();
        for row in rows {
            let Some(cells) = self.pending.remove(&row) else {
                continue;
            };
            let row_tag = self.tag("row");
            self.emit(Event::Start(
                BytesStart::new(row_tag.clone()).with_attributes([("r", row.to_string().as_str())]),
            ))?;
            for (col, value) in &cells {
                self.write_cell(None, row, *col, value)?;
            }
            self.emit(Event::End(BytesEnd::new(row_tag)))?;
        }
        Ok(())
    }

    fn flush_cells_before(&mut self, before: u32) -> Result<()> {
        let Some(cells) = self.row_cells.as_mut() else {
            return Ok(());
        };
        let columns: Vec<u32> = cells.range(..before).map(|(col, _)| *col).collect();
        let mut inserts = Vec::new();
        for col in columns {
            if let Some(value) = cells.remove(&col) {
                inserts.push((col, value));
            }
        }
        let row = self.current_row;
        for (col, value) in inserts {
            self.write_cell(None, row, col, &value)?;
        }
        Ok(())
    }

    fn open_row(&mut self, e: BytesStart<'_>, is_empty: bool) -> Result<()> {
        let row = attribute_text(&e, b"r")
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(self.current_row + 1);
        self.flush_rows_before(row)?;
        self.current_row = row;
        self.last_col = 0;

        match self.pending.remove(&row) {
            Some(cells) => {
                // spans is only an optimisation hint and may be wrong after inserts
                let start = copy_without(&e, &[b"spans".as_slice()]);
                let end = start.to_end().into_owned();
                self.emit(Event::Start(start))?;
                if is_empty {
                    self.row_cells = Some(cells);
                    self.flush_cells_before(u32::MAX)?;
                    self.row_cells = None;
                    self.emit(Event::End(end))?;
                } else {
                    self.row_cells = Some(cells);
                }
            }
            None => {
                self.row_cells = None;
                if is_empty {
                    self.emit(Event::Empty(e))?;
                } else {
                    self.emit(Event::Start(e))?;
                }
            }
        }
        Ok(())
    }

    /// Returns true when the original cell was replaced and its content must be skipped.
    fn visit_cell(&mut self, e: BytesStart<'_>, is_empty: bool) -> Result<bool> {
        let col = attribute_text(&e, b"r")
            .and_then(|address| split_a1(&address))
            .map(|(_, col)| col)
            .unwrap_or(self.last_col + 1);
        self.last_col = col;

        self.flush_cells_before(col)?;
        let replacement = self.row_cells.as_mut().and_then(|cells| cells.remove(&col));
        match replacement {
            Some(value) => {
                let row = self.current_row;
                self.write_cell(Some(&e), row, col, &value)?;
                Ok(!is_empty)
            }
            None => {
                if is_empty {
                    self.emit(Event::Empty(e))?;
                } else {
                    self.emit(Event::Start(e))?;
                }
                Ok(false)
            }
        }
    }
}

/// Rewrites one worksheet part.
pub fn patch_sheet_xml(xml: &str, writes: &RowWrites) -> Result<SheetPatch> {
    let mut reader = Reader::from_str(xml);
    let mut patcher = SheetPatcher {
        writer: Writer::new(Vec::with_capacity(xml.len() + 512)),
        pending: writes.clone(),
        row_cells: None,
        current_row: 0,
        last_col: 0,
        written: 0,
        prefix: None,
        overwritten_formulas: BTreeSet::new(),
    };
    let mut in_sheet_data = false;
    let mut in_row = false;
    let mut skip_depth = 0usize;
    let mut skipped_cell = String::new();

    loop {
        let event = reader.read_event().map_err(xml_err)?;

        if skip_depth > 0 {
            match event {
                Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"f" => {
                    patcher.overwritten_formulas.insert(skipped_cell.clone());
                    if matches!(event, Event::Start(_)) {
                        skip_depth += 1;
                    }
                }
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => return Err(xml_err("unterminated cell")),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"worksheet" => {
                patcher.prefix = e
                    .name()
                    .prefix()
                    .map(|prefix| String::from_utf8_lossy(prefix.as_ref()).into_owned());
                patcher.emit(Event::Start(e))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                in_sheet_data = true;
                patcher.emit(Event::Start(e))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                let end = e.to_end().into_owned();
                patcher.emit(Event::Start(e))?;
                patcher.flush_rows_before(u32::MAX)?;
                patcher.emit(Event::End(end))?;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                patcher.flush_rows_before(u32::MAX)?;
                in_sheet_data = false;
                patcher.emit(Event::End(e))?;
            }
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                in_row = true;
                patcher.open_row(e, false)?;
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                patcher.open_row(e, true)?;
            }
            Event::End(e) if in_row && e.local_name().as_ref() == b"row" => {
                patcher.flush_cells_before(u32::MAX)?;
                patcher.row_cells = None;
                in_row = false;
                patcher.emit(Event::End(e))?;
            }
            Event::Start(e) if in_row && e.local_name().as_ref() == b"c" => {
                let address = attribute_text(&e, b"r");
                if patcher.visit_cell(e, false)? {
                    skip_depth = 1;
                    skipped_cell = address.unwrap_or_else(|| {
                        format!("{}{}", column_letters(patcher.last_col), patcher.current_row)
                    });
                }
            }
            Event::Empty(e) if in_row && e.local_name().as_ref() == b"c" => {
                patcher.visit_cell(e, true)?;
            }
            other => patcher.emit(other)?,
        }
    }

    Ok(SheetPatch {
        markup: patcher.writer.into_inner(),
        written: patcher.written,
        overwritten_formulas: patcher.overwritten_formulas,
    })
}
