use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::application::{
    DocumentGenerationService, DraftService, TemplateResolutionService, VisibilityResolver,
};
use crate::domain::error::Result;
use crate::infrastructure::config::{AppConfig, StorageBackend};
use crate::infrastructure::db::drafts::DraftRepository;
use crate::infrastructure::db::templates::{PgTemplateMetadataRepository, TemplateMetadataStore};
use crate::infrastructure::object_storage::{HttpObjectStorage, LocalObjectStorage, ObjectStorage};
use crate::infrastructure::renderer::PdfRenderer;
use crate::infrastructure::storage::ensure_data_dirs;
use crate::infrastructure::template_cache::TemplateCache;
use crate::infrastructure::template_registry::RegistryCache;
use crate::interfaces::http::{add_log, HttpState, LogEntry};

pub async fn setup(config: &AppConfig) -> Result<HttpState> {
    let logs: Arc<Mutex<Vec<LogEntry>>> = Arc::new(Mutex::new(Vec::new()));

    let drafts_dir = config
        .database
        .drafts_path
        .parent()
        .map(|dir| dir.to_path_buf())
        .unwrap_or_default();
    let mut dirs = vec![
        config.templates.bundled_dir.as_path(),
        config.templates.cache_dir.as_path(),
    ];
    if !drafts_dir.as_os_str().is_empty() {
        dirs.push(drafts_dir.as_path());
    }
    if config.storage.backend == StorageBackend::Local {
        dirs.push(config.storage.local_root.as_path());
    }
    ensure_data_dirs(&dirs)?;

    let storage: Arc<dyn ObjectStorage> = match config.storage.backend {
        StorageBackend::Http => Arc::new(HttpObjectStorage::new(
            &config.storage.base_url,
            &config.storage.bucket,
            config.storage.api_key.clone(),
        )),
        StorageBackend::Local => Arc::new(LocalObjectStorage::new(&config.storage.local_root)),
    };

    let metadata: Option<Arc<dyn TemplateMetadataStore>> = match &config.database.metadata_url {
        Some(url) if !url.trim().is_empty() => {
            Some(Arc::new(PgTemplateMetadataRepository::connect_lazy(url)?))
        }
        _ => {
            warn!("No template metadata database configured; remote tier disabled");
            None
        }
    };

    let templates = TemplateResolutionService::new(
        Arc::new(RegistryCache::new(config.registry_file())),
        config.templates.bundled_dir.clone(),
        TemplateCache::new(config.templates.cache_dir.clone()),
        metadata,
        storage,
    )
    .with_defaults(
        config.templates.load_strategy,
        config.templates.cache_enabled,
    );

    let drafts = DraftRepository::init(&config.database.drafts_path).await?;

    info!(
        bundled_dir = %config.templates.bundled_dir.display(),
        storage = ?config.storage.backend,
        strategy = ?config.templates.load_strategy,
        "Services initialized"
    );
    add_log(&logs, "INFO", "Bootstrap", "Services initialized");

    Ok(HttpState {
        documents: Arc::new(DocumentGenerationService::new(
            Arc::new(templates),
            PdfRenderer::new(config.renderer.soffice_bin.clone()),
        )),
        drafts: Arc::new(DraftService::new(Arc::new(drafts))),
        visibility: Arc::new(VisibilityResolver::new()),
        logs,
    })
}
