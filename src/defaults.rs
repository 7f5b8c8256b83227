/// Deliveries of one import job before the failure path fires
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Concurrent import jobs per worker process
pub const DEFAULT_IMPORT_WORKERS: usize = 4;

pub const DEFAULT_UPLOAD_DIR: &str = "./storage/uploads";

/// Dates are shown, and compared for audit, in this form
pub const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y";

pub const STORAGE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Capability every import submission needs on top of the type's own
pub const IMPORT_CAPABILITY: &str = "data_import_access";

pub const ALLOWED_EXTENSIONS: &[&str] = &["csv", "xlsx"];

/// Realtime channel and event name for completion toasts
pub const BROADCAST_SUBJECT: &str = "data-import";
pub const BROADCAST_EVENT: &str = "DataImport";

pub const SUBMITTED_MESSAGE: &str =
    "Import is in progress. You will be notified when it is complete.";

/// Base delay before a failed job is redelivered; doubled per attempt
pub fn retry_delay(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_secs(5 * 2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_backs_off() {
        assert_eq!(retry_delay(1).as_secs(), 5);
        assert_eq!(retry_delay(2).as_secs(), 10);
        assert_eq!(retry_delay(3).as_secs(), 20);
    }
}
