pub mod assertion;
pub mod caller;
pub mod config;
pub mod directive;
pub mod directives;
pub mod engine;
pub mod error;
pub mod fixture;
pub mod harness;
pub mod i18n;
pub mod parser;
pub mod path;
pub mod report;
pub mod substitution;
pub mod types;
pub mod value;

// Re-export the localization macros
pub use crate::i18n::{t, t_with_args};
