//! Locates template binaries across the bundled directory, the on-disk cache
//! and remote object storage. Resolution never fails: when every tier is
//! exhausted the static fallback answers, possibly with an empty binary.

use crate::application::use_cases::fallback::{first_success_async, AsyncStrategy};
use crate::application::use_cases::filename_repair::download_with_repair;
use crate::domain::error::{AppError, Result};
use crate::domain::template::{
    LoadStrategy, ResolvedTemplate, TemplateLanguage, TemplateQuery, TemplateRecord,
    TemplateSource,
};
use crate::infrastructure::db::templates::TemplateMetadataStore;
use crate::infrastructure::object_storage::ObjectStorage;
use crate::infrastructure::template_cache::TemplateCache;
use crate::infrastructure::template_registry::{merge_records, static_templates, RegistryCache};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

type Tier<'a> = &'a dyn AsyncStrategy<TemplateQuery, ResolvedTemplate>;

pub struct TemplateResolutionService {
    registry: Arc<RegistryCache>,
    bundled_dir: PathBuf,
    cache: TemplateCache,
    metadata: Option<Arc<dyn TemplateMetadataStore>>,
    storage: Arc<dyn ObjectStorage>,
    default_strategy: LoadStrategy,
    cache_enabled: bool,
}

impl TemplateResolutionService {
    pub fn new(
        registry: Arc<RegistryCache>,
        bundled_dir: impl Into<PathBuf>,
        cache: TemplateCache,
        metadata: Option<Arc<dyn TemplateMetadataStore>>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            registry,
            bundled_dir: bundled_dir.into(),
            cache,
            metadata,
            storage,
            default_strategy: LoadStrategy::default(),
            cache_enabled: true,
        }
    }

    pub fn with_defaults(mut self, strategy: LoadStrategy, cache_enabled: bool) -> Self {
        self.default_strategy = strategy;
        self.cache_enabled = cache_enabled;
        self
    }

    pub fn registry(&self) -> &Arc<RegistryCache> {
        &self.registry
    }

    /// Static templates overlaid with the registry document.
    pub async fn list_templates(&self) -> Vec<TemplateRecord> {
        let registry = self.registry.get().await;
        merge_records(&static_templates(), &registry)
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.cache.clear()
    }

    pub async fn resolve(&self, query: &TemplateQuery) -> ResolvedTemplate {
        let registry = self.registry.get().await;
        let records = merge_records(&static_templates(), &registry);

        // request > registry document > configuration
        let strategy = query.strategy.unwrap_or(if registry.version.is_empty() {
            self.default_strategy
        } else {
            registry.settings.load_strategy
        });
        let cache_enabled = self.cache_enabled && registry.settings.cache_enabled;

        let bundled = BundledTier {
            records: &records,
            bundled_dir: &self.bundled_dir,
        };
        let cached = CacheTier { cache: &self.cache };
        let remote = RemoteTier {
            metadata: self.metadata.as_deref(),
            storage: self.storage.as_ref(),
            cache: cache_enabled.then_some(&self.cache),
        };

        let bundled: Tier<'_> = &bundled;
        let cached: Tier<'_> = &cached;
        let remote: Tier<'_> = &remote;
        let chain: Vec<Tier<'_>> = match strategy {
            LoadStrategy::LocalFirst => vec![bundled, cached, remote],
            LoadStrategy::CacheFirst => vec![cached, bundled, remote],
            LoadStrategy::RemoteOnly => vec![remote],
        };

        match first_success_async(&chain, query).await {
            Ok(success) => {
                info!(
                    template_type = query.template_type.code(),
                    language = query.language.code(),
                    tier = %success.strategy,
                    file = %success.value.file_name,
                    "Template resolved"
                );
                success.value
            }
            Err(exhausted) => {
                warn!(
                    template_type = query.template_type.code(),
                    language = query.language.code(),
                    reason = %exhausted.summary(),
                    "Template tiers exhausted, using static fallback"
                );
                static_fallback(&records, &self.bundled_dir, query).await
            }
        }
    }
}

/// Preferred record for `query`: the requested id, or an active record of the
/// type serving the language. Language-specific beats multilingual, default beats the rest.
fn select_record<'a>(records: &'a [TemplateRecord], query: &TemplateQuery) -> Option<&'a TemplateRecord> {
    if let Some(id) = query.template_id.as_deref() {
        return records.iter().find(|record| record.id == id);
    }
    let mut candidates: Vec<&TemplateRecord> = records
        .iter()
        .filter(|record| record.matches(query.template_type, query.language))
        .collect();
    candidates.sort_by_key(|record| {
        (
            record.language == TemplateLanguage::Multilingual,
            !record.is_default,
        )
    });
    candidates.into_iter().next()
}

async fn read_bundled(dir: &Path, file_name: &str) -> Result<Vec<u8>> {
    let path = dir.join(file_name);
    match tokio::fs::read(&path).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(AppError::NotFound(format!("{} is empty", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AppError::NotFound(format!("{} does not exist", path.display())))
        }
        Err(e) => Err(AppError::IoError(format!("Failed to read {}: {}", path.display(), e))),
    }
}

struct BundledTier<'a> {
    records: &'a [TemplateRecord],
    bundled_dir: &'a Path,
}

#[async_trait]
impl<'a> AsyncStrategy<TemplateQuery, ResolvedTemplate> for BundledTier<'a> {
    fn name(&self) -> &str {
        "bundled"
    }

    async fn attempt(&self, query: &TemplateQuery) -> Result<ResolvedTemplate> {
        let record = select_record(self.records, query).ok_or_else(|| {
            AppError::NotFound(format!("No bundled template for {}", query.composite_key()))
        })?;
        let bytes = read_bundled(self.bundled_dir, &record.file_name).await?;
        Ok(ResolvedTemplate {
            bytes,
            source: TemplateSource::Bundled,
            file_name: record.file_name.clone(),
            used_fallback: false,
        })
    }
}

struct CacheTier<'a> {
    cache: &'a TemplateCache,
}

#[async_trait]
impl<'a> AsyncStrategy<TemplateQuery, ResolvedTemplate> for CacheTier<'a> {
    fn name(&self) -> &str {
        "cache"
    }

    async fn attempt(&self, query: &TemplateQuery) -> Result<ResolvedTemplate> {
        let composite = query.composite_key();
        let mut needles: Vec<&str> = Vec::new();
        if let Some(id) = query.template_id.as_deref() {
            needles.push(id);
        }
        needles.push(&composite);

        let hit = self
            .cache
            .find(&needles)?
            .ok_or_else(|| AppError::NotFound(format!("No cached template for {}", composite)))?;
        let bytes = self.cache.read(&hit)?;
        Ok(ResolvedTemplate {
            bytes,
            source: TemplateSource::Cache,
            file_name: hit.file_name,
            used_fallback: false,
        })
    }
}

struct RemoteTier<'a> {
    metadata: Option<&'a dyn TemplateMetadataStore>,
    storage: &'a dyn ObjectStorage,
    cache: Option<&'a TemplateCache>,
}

#[async_trait]
impl<'a> AsyncStrategy<TemplateQuery, ResolvedTemplate> for RemoteTier<'a> {
    fn name(&self) -> &str {
        "remote"
    }

    async fn attempt(&self, query: &TemplateQuery) -> Result<ResolvedTemplate> {
        let metadata = self.metadata.ok_or_else(|| {
            AppError::NotFound("Remote template store is not configured".to_string())
        })?;

        let record = match metadata
            .find_active(query.template_type, TemplateLanguage::Specific(query.language))
            .await?
        {
            Some(record) => record,
            None => metadata
                .find_active(query.template_type, TemplateLanguage::Multilingual)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "No active remote template for {}",
                        query.composite_key()
                    ))
                })?,
        };

        let download = download_with_repair(self.storage, &record.storage_path).await?;

        if let Some(cache) = self.cache {
            let key = query
                .template_id
                .clone()
                .unwrap_or_else(|| query.composite_key());
            if let Err(e) = cache.store(&key, &record.file_name, &download.bytes) {
                warn!(file = %record.file_name, error = %e, "Failed to cache downloaded template");
            }
        }

        Ok(ResolvedTemplate {
            bytes: download.bytes,
            source: TemplateSource::Remote,
            file_name: record.file_name,
            used_fallback: false,
        })
    }
}

/// First readable bundled record of the requested type (any language, in
/// record order). Without any record of that type the very first record is
/// used. When nothing reads, the binary is empty.
async fn static_fallback(
    records: &[TemplateRecord],
    bundled_dir: &Path,
    query: &TemplateQuery,
) -> ResolvedTemplate {
    let mut candidates: Vec<&TemplateRecord> = records
        .iter()
        .filter(|record| record.template_type == query.template_type)
        .collect();
    if candidates.is_empty() {
        candidates.extend(records.first());
    }

    for record in &candidates {
        match read_bundled(bundled_dir, &record.file_name).await {
            Ok(bytes) => {
                return ResolvedTemplate {
                    bytes,
                    source: TemplateSource::Bundled,
                    file_name: record.file_name.clone(),
                    used_fallback: true,
                }
            }
            Err(e) => {
                warn!(file = %record.file_name, error = %e, "Static fallback template unavailable")
            }
        }
    }

    ResolvedTemplate {
        bytes: Vec::new(),
        source: TemplateSource::Bundled,
        file_name: candidates
            .first()
            .map(|record| record.file_name.clone())
            .unwrap_or_default(),
        used_fallback: true,
    }
}
