//! Download ladder for storage paths whose file names were mangled on upload.
//!
//! Candidates are tried in a fixed order: the path as stored, percent-encoded
//! per segment, double-UTF-8 undone, transliterated to ASCII, and finally with
//! every non-ASCII character removed. A candidate identical to an earlier one
//! is skipped without a request.

use crate::application::use_cases::fallback::{first_success_async, AsyncStrategy};
use crate::domain::error::{AppError, Result};
use crate::infrastructure::object_storage::ObjectStorage;
use crate::shared::text::strip_diacritics;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::info;

/// Unreserved characters stay literal; everything else in a segment is encoded.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn percent_encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Windows-1252 characters in 0x80..=0x9F, mapped back to their byte.
fn cp1252_byte(ch: char) -> Option<u8> {
    let byte = match ch {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Reverses UTF-8 bytes that were read as Latin-1/Windows-1252 and encoded again.
/// Returns `None` when the input does not look double encoded.
pub fn fix_double_utf8(path: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(path.len());
    for ch in path.chars() {
        let code = ch as u32;
        if code <= 0xFF {
            bytes.push(code as u8);
        } else {
            bytes.push(cp1252_byte(ch)?);
        }
    }
    let repaired = String::from_utf8(bytes).ok()?;
    if repaired == path {
        None
    } else {
        Some(repaired)
    }
}

pub fn transliterate(path: &str) -> String {
    strip_diacritics(path)
}

pub fn strip_non_ascii(path: &str) -> String {
    path.chars().filter(|ch| ch.is_ascii()).collect()
}

/// Ordered repair candidates for `path`. Repeats of an earlier candidate are `None`.
pub fn repair_candidates(path: &str) -> Vec<(&'static str, Option<String>)> {
    let raw: Vec<(&'static str, Option<String>)> = vec![
        ("original", Some(path.to_string())),
        ("percent_encoded", Some(percent_encode_path(path))),
        ("double_utf8_fixed", fix_double_utf8(path)),
        ("transliterated", Some(transliterate(path))),
        ("non_ascii_stripped", Some(strip_non_ascii(path))),
    ];

    let mut seen: Vec<String> = Vec::new();
    raw.into_iter()
        .map(|(name, candidate)| {
            let candidate = candidate.filter(|value| !value.is_empty() && !seen.contains(value));
            if let Some(value) = &candidate {
                seen.push(value.clone());
            }
            (name, candidate)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RepairedDownload {
    pub bytes: Vec<u8>,
    /// Path that finally answered.
    pub path: String,
    pub strategy: String,
}

struct RepairStep<'a> {
    name: &'static str,
    candidate: Option<String>,
    storage: &'a dyn ObjectStorage,
}

#[async_trait]
impl<'a> AsyncStrategy<str, Vec<u8>> for RepairStep<'a> {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, _original: &str) -> Result<Vec<u8>> {
        match &self.candidate {
            Some(candidate) => self.storage.download(candidate).await,
            None => Err(AppError::NotFound(
                "no distinct candidate for this repair".to_string(),
            )),
        }
    }
}

/// Downloads `path`, walking the repair ladder when the stored name fails.
pub async fn download_with_repair(
    storage: &dyn ObjectStorage,
    path: &str,
) -> Result<RepairedDownload> {
    let steps: Vec<RepairStep<'_>> = repair_candidates(path)
        .into_iter()
        .map(|(name, candidate)| RepairStep {
            name,
            candidate,
            storage,
        })
        .collect();
    let chain: Vec<&dyn AsyncStrategy<str, Vec<u8>>> = steps
        .iter()
        .map(|step| step as &dyn AsyncStrategy<str, Vec<u8>>)
        .collect();

    match first_success_async(&chain, path).await {
        Ok(success) => {
            let answered = steps
                .iter()
                .find(|step| step.name == success.strategy)
                .and_then(|step| step.candidate.clone())
                .unwrap_or_else(|| path.to_string());
            if !success.failures.is_empty() {
                info!(
                    original = path,
                    repaired = %answered,
                    strategy = %success.strategy,
                    "Downloaded template after filename repair"
                );
            }
            Ok(RepairedDownload {
                bytes: success.value,
                path: answered,
                strategy: success.strategy,
            })
        }
        Err(exhausted) => Err(exhausted.into_error(&format!("download of '{}'", path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStorage {
        objects: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    impl MemoryStorage {
        fn with(path: &str, bytes: &[u8]) -> Self {
            let mut storage = Self::default();
            storage.objects.insert(path.to_string(), bytes.to_vec());
            storage
        }
    }

    #[async_trait]
    impl ObjectStorage for MemoryStorage {
        fn backend(&self) -> &str {
            "memory"
        }

        async fn download(&self, path: &str) -> Result<Vec<u8>> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(path.to_string());
            }
            self.objects
                .get(path)
                .cloned()
                .ok_or_else(|| AppError::NotFound(path.to_string()))
        }
    }

    const MANGLED: &str = "protocol/Ã\u{81}tvÃ©teli jegyzÅ‘kÃ¶nyv.xlsx";
    const CLEAN: &str = "protocol/Átvételi jegyzőkönyv.xlsx";

    #[test]
    fn test_fix_double_utf8() {
        assert_eq!(fix_double_utf8(MANGLED).as_deref(), Some(CLEAN));
        assert_eq!(fix_double_utf8("plain.xlsx"), None);
        // already proper UTF-8 with characters beyond Latin-1
        assert_eq!(fix_double_utf8(CLEAN), None);
    }

    #[test]
    fn test_percent_encoding_keeps_separators() {
        assert_eq!(
            percent_encode_path("protocol/a b+ö.xlsx"),
            "protocol/a%20b%2B%C3%B6.xlsx"
        );
    }

    #[test]
    fn test_candidates_skip_duplicates() {
        let candidates = repair_candidates("plain.xlsx");
        assert_eq!(candidates[0].1.as_deref(), Some("plain.xlsx"));
        assert!(candidates[1..].iter().all(|(_, candidate)| candidate.is_none()));

        let candidates = repair_candidates(CLEAN);
        assert_eq!(
            candidates[3].1.as_deref(),
            Some("protocol/Atveteli jegyzokonyv.xlsx")
        );
        assert_eq!(
            candidates[4].1.as_deref(),
            Some("protocol/tvteli jegyzknyv.xlsx")
        );
    }

    #[tokio::test]
    async fn test_double_utf8_strategy_wins_after_original_and_encoded_fail() {
        let storage = MemoryStorage::with(CLEAN, b"template");
        let download = download_with_repair(&storage, MANGLED).await.unwrap();

        assert_eq!(download.bytes, b"template");
        assert_eq!(download.strategy, "double_utf8_fixed");
        assert_eq!(download.path, CLEAN);
        let requests = storage.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0], MANGLED);
    }

    #[tokio::test]
    async fn test_exhausted_ladder_reports_every_step() {
        let storage = MemoryStorage::default();
        let err = download_with_repair(&storage, CLEAN).await.unwrap_err();
        match err {
            AppError::ResolutionExhausted(msg) => {
                assert!(msg.contains("original"));
                assert!(msg.contains("non_ascii_stripped"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
