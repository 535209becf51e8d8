pub mod answer;
pub mod document;
pub mod error;
pub mod language;
pub mod question;
pub mod template;
