pub mod bootstrap;
pub mod config;
pub mod db;
pub mod object_storage;
pub mod renderer;
pub mod storage;
pub mod template_cache;
pub mod template_registry;
