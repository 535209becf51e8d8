use crate::domain::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the inspection forms are delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Hu,
    #[default]
    De,
    En,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Hu, Language::De, Language::En];

    pub fn code(&self) -> &'static str {
        match self {
            Language::Hu => "hu",
            Language::De => "de",
            Language::En => "en",
        }
    }

    /// Display token for an affirmative / `ok` answer.
    pub fn affirmative(&self) -> &'static str {
        match self {
            Language::Hu => "Igen",
            Language::De => "Ja",
            Language::En => "Yes",
        }
    }

    /// Display token for a negative / `not_ok` answer.
    pub fn negative(&self) -> &'static str {
        match self {
            Language::Hu => "Nem",
            Language::De => "Nein",
            Language::En => "No",
        }
    }

    pub fn not_applicable(&self) -> &'static str {
        match self {
            Language::Hu => "N.A.",
            Language::De => "Entfällt",
            Language::En => "N/A",
        }
    }

    pub fn labels(&self) -> DocumentLabels {
        match self {
            Language::Hu => DocumentLabels {
                protocol: "Jegyzőkönyv",
                question: "Kérdés",
                answer: "Válasz",
                error_list: "Hibalista",
                out_of_range: "Tartományon kívüli érték",
                not_ok: "Nem megfelelő",
                inspector: "Ellenőr",
                date: "Dátum",
                signature: "Aláírás",
            },
            Language::De => DocumentLabels {
                protocol: "Protokoll",
                question: "Frage",
                answer: "Antwort",
                error_list: "Mängelliste",
                out_of_range: "Wert außerhalb des Bereichs",
                not_ok: "Nicht in Ordnung",
                inspector: "Prüfer",
                date: "Datum",
                signature: "Unterschrift",
            },
            Language::En => DocumentLabels {
                protocol: "Protocol",
                question: "Question",
                answer: "Answer",
                error_list: "Error list",
                out_of_range: "Value out of range",
                not_ok: "Not OK",
                inspector: "Inspector",
                date: "Date",
                signature: "Signature",
            },
        }
    }
}

/// Fixed captions used when a document has to be synthesized without a template.
#[derive(Debug, Clone, Copy)]
pub struct DocumentLabels {
    pub protocol: &'static str,
    pub question: &'static str,
    pub answer: &'static str,
    pub error_list: &'static str,
    pub out_of_range: &'static str,
    pub not_ok: &'static str,
    pub inspector: &'static str,
    pub date: &'static str,
    pub signature: &'static str,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "hu" | "hun" | "hungarian" | "magyar" => Ok(Language::Hu),
            "de" | "deu" | "ger" | "german" | "deutsch" => Ok(Language::De),
            "en" | "eng" | "english" => Ok(Language::En),
            other => Err(AppError::ValidationError(format!(
                "Unsupported language: {}",
                other
            ))),
        }
    }
}
