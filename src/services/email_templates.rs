//! Transactional email templates.
//!
//! `render()` returns an `EmailMessage` ready to pass to `EmailSender::send`.

use crate::services::email_sender::EmailMessage;

// =============================================================================
// Import failed
// =============================================================================

/// Sent to the actor when an import cannot be completed
pub struct ImportFailedEmail<'a> {
    pub to: &'a str,
    pub username: &'a str,
    pub import_type: &'a str,
    pub file_name: &'a str,
    pub error_message: &'a str,
}

impl<'a> ImportFailedEmail<'a> {
    pub fn render(&self) -> EmailMessage {
        let html = format!(
            r#"<h1>Import Failed Notification</h1>
<p>Hello {name},</p>
<p>We regret to inform you that an error occurred during the import process.</p>
<p><strong>File:</strong> {file} ({import_type})</p>
<p><strong>Error Message:</strong><br>{error}</p>
<p>Please review the error and try again.</p>"#,
            name = escape_html(self.username),
            file = escape_html(self.file_name),
            import_type = escape_html(self.import_type),
            error = escape_html(self.error_message),
        );
        let text = format!(
            "Hello {},\n\nWe regret to inform you that an error occurred during the import process.\n\nFile: {} ({})\n\nError Message:\n{}\n\nPlease review the error and try again.",
            self.username, self.file_name, self.import_type, self.error_message
        );

        EmailMessage {
            to: self.to.to_string(),
            subject: "Import Failed Notification".to_string(),
            html,
            text,
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_failed_email_contents() {
        let msg = ImportFailedEmail {
            to: "ana@example.com",
            username: "Ana",
            import_type: "orders",
            file_name: "orders.csv",
            error_message: "Missing required column: sku",
        }
        .render();

        assert_eq!(msg.to, "ana@example.com");
        assert_eq!(msg.subject, "Import Failed Notification");
        assert!(msg.text.starts_with("Hello Ana,"));
        assert!(msg.text.contains("Missing required column: sku"));
        assert!(msg.text.contains("File: orders.csv (orders)"));
        assert!(msg.html.contains("Please review the error and try again."));
    }

    #[test]
    fn test_error_message_is_escaped_in_html() {
        let msg = ImportFailedEmail {
            to: "a@example.com",
            username: "A",
            import_type: "orders",
            file_name: "<b>.csv",
            error_message: "<script>",
        }
        .render();
        assert!(msg.html.contains("&lt;script&gt;"));
        assert!(msg.html.contains("&lt;b&gt;.csv"));
        assert!(msg.text.contains("<script>"));
    }
}
