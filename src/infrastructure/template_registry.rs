use crate::domain::language::Language;
use crate::domain::template::{
    TemplateLanguage, TemplateRecord, TemplateRegistryDocument, TemplateType,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

fn record(
    id: &str,
    name: &str,
    template_type: TemplateType,
    language: TemplateLanguage,
    file_name: &str,
    is_default: bool,
) -> TemplateRecord {
    TemplateRecord {
        id: id.to_string(),
        name: name.to_string(),
        template_type,
        language,
        file_name: file_name.to_string(),
        is_active: true,
        is_default,
        lift_type: None,
        description: None,
    }
}

/// Templates compiled into the installation. The registry document may
/// override any of them by id.
pub fn static_templates() -> Vec<TemplateRecord> {
    vec![
        record(
            "questions-unified",
            "Inspection questionnaire",
            TemplateType::Questions,
            TemplateLanguage::Multilingual,
            "questions-unified.xlsx",
            true,
        ),
        record(
            "protocol-hu",
            "Átvételi jegyzőkönyv",
            TemplateType::Protocol,
            TemplateLanguage::Specific(Language::Hu),
            "protocol-hu.xlsx",
            false,
        ),
        record(
            "protocol-de",
            "Abnahmeprotokoll",
            TemplateType::Protocol,
            TemplateLanguage::Specific(Language::De),
            "protocol-de.xlsx",
            true,
        ),
        record(
            "protocol-en",
            "Acceptance protocol",
            TemplateType::Protocol,
            TemplateLanguage::Specific(Language::En),
            "protocol-en.xlsx",
            false,
        ),
        record(
            "grounding-check",
            "Erdungsprüfung",
            TemplateType::FormPdf,
            TemplateLanguage::Multilingual,
            "grounding-check.pdf",
            true,
        ),
    ]
}

/// Static list overlaid with registry records; on an id collision the registry wins.
/// Order: static records first (in their order), then registry-only records.
pub fn merge_records(
    static_records: &[TemplateRecord],
    registry: &TemplateRegistryDocument,
) -> Vec<TemplateRecord> {
    let overrides: BTreeMap<String, TemplateRecord> = registry
        .records()
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect();

    let mut merged: Vec<TemplateRecord> = static_records
        .iter()
        .map(|record| overrides.get(&record.id).cloned().unwrap_or_else(|| record.clone()))
        .collect();
    for record in registry.records() {
        if !static_records.iter().any(|existing| existing.id == record.id) {
            merged.push(record);
        }
    }
    merged
}

/// Process-lifetime copy of the registry document.
///
/// Loaded from disk on first use, swapped wholesale by [`RegistryCache::replace`]
/// and dropped by [`RegistryCache::invalidate`] so the next read reloads it.
pub struct RegistryCache {
    path: PathBuf,
    current: RwLock<Option<Arc<TemplateRegistryDocument>>>,
}

impl RegistryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub async fn get(&self) -> Arc<TemplateRegistryDocument> {
        if let Some(document) = self.current.read().await.as_ref() {
            return Arc::clone(document);
        }

        let mut slot = self.current.write().await;
        // another request may have loaded it while we waited
        if let Some(document) = slot.as_ref() {
            return Arc::clone(document);
        }
        let document = Arc::new(self.load_from_disk().await);
        *slot = Some(Arc::clone(&document));
        document
    }

    pub async fn replace(&self, document: TemplateRegistryDocument) {
        info!(
            version = %document.version,
            templates = document.records().len(),
            "Template registry replaced"
        );
        *self.current.write().await = Some(Arc::new(document));
    }

    pub async fn invalidate(&self) {
        *self.current.write().await = None;
        info!(path = %self.path.display(), "Template registry invalidated");
    }

    pub async fn is_loaded(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// A missing or malformed document degrades to an empty registry.
    async fn load_from_disk(&self) -> TemplateRegistryDocument {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Template registry not readable, using static templates only");
                return TemplateRegistryDocument::default();
            }
        };
        match serde_json::from_str::<TemplateRegistryDocument>(&raw) {
            Ok(document) => {
                info!(
                    path = %self.path.display(),
                    version = %document.version,
                    templates = document.records().len(),
                    "Template registry loaded"
                );
                document
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Template registry is malformed, using static templates only");
                TemplateRegistryDocument::default()
            }
        }
    }
}
