//! Business logic services

pub mod dates;
pub mod email_sender;
pub mod email_templates;
pub mod import_processor;
pub mod job_history;
pub mod normalizer;
pub mod notifier;
pub mod pipeline;
pub mod recorder;
pub mod run_tracker;
pub mod schema;
pub mod spreadsheet;
pub mod upsert;
pub mod validator;

#[cfg(test)]
pub mod testing;
