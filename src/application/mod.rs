pub mod use_cases;

pub use use_cases::document_generation::DocumentGenerationService;
pub use use_cases::draft::DraftService;
pub use use_cases::template_resolution::TemplateResolutionService;
pub use use_cases::visibility::VisibilityResolver;
