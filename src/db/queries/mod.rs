//! Database queries

pub mod audit_log;
pub mod entity;
pub mod import_log;
pub mod import_run;
