pub mod calculation;
pub mod document_generation;
pub mod draft;
pub mod fallback;
pub mod filename_repair;
pub mod formula;
pub mod header_roles;
pub mod pdf_form;
pub mod question_config;
pub mod spreadsheet;
pub mod template_resolution;
pub mod visibility;
