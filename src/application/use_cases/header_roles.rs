//! Header-role resolution for questionnaire source sheets.
//!
//! Each logical column role has a list of accepted aliases. Headers and
//! aliases are compared after [`normalize_token`]; an exact match is tried
//! across all roles first, then containment in either direction, where the
//! longest overlapping alias wins.
//!
//! A trailing language marker (`Frage (HU)`, `title_en`) decides the
//! language of a title or group-name column, whatever language the alias
//! itself is in.

use crate::domain::error::{AppError, Result};
use crate::domain::language::Language;
use crate::shared::text::normalize_token;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderRole {
    Id,
    TitleHu,
    TitleDe,
    TitleEn,
    Title,
    Type,
    Required,
    Placeholder,
    CellReference,
    SheetName,
    MultiCell,
    GroupNameHu,
    GroupNameDe,
    GroupNameEn,
    GroupName,
    GroupOrder,
    ConditionalGroupKey,
    GroupKey,
    Unit,
    MinValue,
    MaxValue,
    CalculationFormula,
    CalculationInputs,
}

impl HeaderRole {
    pub fn title_for(language: Language) -> HeaderRole {
        match language {
            Language::Hu => HeaderRole::TitleHu,
            Language::De => HeaderRole::TitleDe,
            Language::En => HeaderRole::TitleEn,
        }
    }

    pub fn group_name_for(language: Language) -> HeaderRole {
        match language {
            Language::Hu => HeaderRole::GroupNameHu,
            Language::De => HeaderRole::GroupNameDe,
            Language::En => HeaderRole::GroupNameEn,
        }
    }

    /// The same role in `language`, for the roles that come in per-language variants.
    fn localized(self, language: Language) -> HeaderRole {
        match self {
            HeaderRole::Title | HeaderRole::TitleHu | HeaderRole::TitleDe | HeaderRole::TitleEn => {
                HeaderRole::title_for(language)
            }
            HeaderRole::GroupName
            | HeaderRole::GroupNameHu
            | HeaderRole::GroupNameDe
            | HeaderRole::GroupNameEn => HeaderRole::group_name_for(language),
            other => other,
        }
    }
}

/// Role -> accepted aliases. More specific roles come before generic ones so
/// `title_de` is claimed by [`HeaderRole::TitleDe`] before `title` sees it.
pub const HEADER_ALIASES: &[(HeaderRole, &[&str])] = &[
    (HeaderRole::Id, &["id", "questionid", "kerdesazonosito", "azonosito", "frageid", "kennung"]),
    (HeaderRole::TitleHu, &["titlehu", "cimhu", "kerdeshu", "questionhu", "titelhu"]),
    (HeaderRole::TitleDe, &["titlede", "cimde", "frage", "fragede", "titelde", "questionde"]),
    (HeaderRole::TitleEn, &["titleen", "cimen", "questionen", "titelen"]),
    (HeaderRole::Title, &["title", "titel", "cim", "kerdes", "question", "bezeichnung"]),
    (HeaderRole::Type, &["type", "typ", "tipus", "questiontype", "fragetyp", "kerdestipus"]),
    (HeaderRole::Required, &["required", "kotelezo", "pflicht", "pflichtfeld", "mandatory"]),
    (HeaderRole::Placeholder, &["placeholder", "hint", "hinweis", "platzhalter"]),
    (HeaderRole::CellReference, &["cellreference", "cellref", "cell", "cella", "zelle", "zellbezug"]),
    (HeaderRole::SheetName, &["sheetname", "sheet", "munkalap", "tabellenblatt", "blatt"]),
    (HeaderRole::MultiCell, &["multicell", "tobbcella", "mehrzellen", "multiplecells"]),
    (HeaderRole::GroupNameHu, &["groupnamehu", "csoportnevhu", "csoporthu"]),
    (HeaderRole::GroupNameDe, &["groupnamede", "gruppenname", "gruppende", "gruppennamede"]),
    (HeaderRole::GroupNameEn, &["groupnameen", "groupen"]),
    (HeaderRole::GroupName, &["groupname", "group", "csoport", "csoportnev", "gruppe"]),
    (HeaderRole::GroupOrder, &["grouporder", "order", "sorrend", "reihenfolge", "csoportsorrend"]),
    (HeaderRole::ConditionalGroupKey, &["conditionalgroupkey", "conditionkey", "feltetelkulcs", "bedingungsschluessel"]),
    (HeaderRole::GroupKey, &["groupkey", "csoportkulcs", "gruppenschluessel"]),
    (HeaderRole::Unit, &["unit", "mertekegyseg", "einheit"]),
    (HeaderRole::MinValue, &["minvalue", "min", "minimum", "minertek", "mindestwert"]),
    (HeaderRole::MaxValue, &["maxvalue", "max", "maximum", "maxertek", "hoechstwert"]),
    (HeaderRole::CalculationFormula, &["calculationformula", "formula", "keplet", "formel"]),
    (HeaderRole::CalculationInputs, &["calculationinputs", "inputs", "bemenetek", "eingaben"]),
];

/// Aliases shorter than this only match exactly; `id` would otherwise hit
/// every header containing those two letters.
const MIN_CONTAINMENT_LEN: usize = 4;

/// Resolved role -> zero-based column index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderRoleMap {
    columns: BTreeMap<HeaderRole, usize>,
}

impl HeaderRoleMap {
    pub fn column(&self, role: HeaderRole) -> Option<usize> {
        self.columns.get(&role).copied()
    }

    pub fn contains(&self, role: HeaderRole) -> bool {
        self.columns.contains_key(&role)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn has_any_title(&self) -> bool {
        [
            HeaderRole::Title,
            HeaderRole::TitleHu,
            HeaderRole::TitleDe,
            HeaderRole::TitleEn,
        ]
        .iter()
        .any(|role| self.contains(*role))
    }
}

/// Length of the overlap when one side contains the other.
fn containment_len(header: &str, alias: &str) -> Option<usize> {
    if header.len() < MIN_CONTAINMENT_LEN || alias.len() < MIN_CONTAINMENT_LEN {
        return None;
    }
    if header.contains(alias) {
        Some(alias.len())
    } else if alias.contains(header) {
        Some(header.len())
    } else {
        None
    }
}

/// Language named by the last word of a raw header: `Frage (HU)`, `title_de`.
fn language_marker(header: &str) -> Option<Language> {
    let lowered = header.to_lowercase();
    let last = lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .last()?;
    Language::ALL.into_iter().find(|language| language.code() == last)
}

fn role_for_header(role: HeaderRole, marker: Option<Language>) -> HeaderRole {
    match marker {
        Some(language) => role.localized(language),
        None => role,
    }
}

struct Candidate {
    index: usize,
    role: HeaderRole,
    overlap: usize,
    rank: usize,
}

pub fn resolve_header_roles<S: AsRef<str>>(headers: &[S]) -> Result<HeaderRoleMap> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|header| normalize_token(header.as_ref()))
        .collect();
    let markers: Vec<Option<Language>> = headers
        .iter()
        .map(|header| language_marker(header.as_ref()))
        .collect();

    let mut map = HeaderRoleMap::default();
    let mut claimed = vec![false; normalized.len()];

    // exact pass
    for (role, aliases) in HEADER_ALIASES {
        for (index, header) in normalized.iter().enumerate() {
            if claimed[index] || header.is_empty() || !aliases.contains(&header.as_str()) {
                continue;
            }
            let role = role_for_header(*role, markers[index]);
            if !map.contains(role) {
                claimed[index] = true;
                map.columns.insert(role, index);
                break;
            }
        }
    }

    // containment pass, longest overlap first
    let mut candidates = Vec::new();
    for (rank, (role, aliases)) in HEADER_ALIASES.iter().enumerate() {
        for (index, header) in normalized.iter().enumerate() {
            if claimed[index] {
                continue;
            }
            let overlap = aliases
                .iter()
                .filter_map(|alias| containment_len(header, alias))
                .max();
            if let Some(overlap) = overlap {
                candidates.push(Candidate {
                    index,
                    role: role_for_header(*role, markers[index]),
                    overlap,
                    rank,
                });
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.overlap
            .cmp(&a.overlap)
            .then(a.rank.cmp(&b.rank))
            .then(a.index.cmp(&b.index))
    });
    for candidate in candidates {
        if claimed[candidate.index] || map.contains(candidate.role) {
            continue;
        }
        claimed[candidate.index] = true;
        map.columns.insert(candidate.role, candidate.index);
    }

    let mut missing = Vec::new();
    if !map.contains(HeaderRole::Id) {
        missing.push("id");
    }
    if !map.has_any_title() {
        missing.push("title");
    }
    if !map.contains(HeaderRole::Type) {
        missing.push("type");
    }
    if !missing.is_empty() {
        return Err(AppError::ConfigurationError(format!(
            "Question sheet is missing required columns: {}",
            missing.join(", ")
        )));
    }

    Ok(map)
}
