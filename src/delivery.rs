//! DeliveryService (C7): validates preconditions, then hands a single book
//! off to an [`SmtpClient`] session (§4.5).

use crate::error::DeliveryError;
use crate::model::{DeliveryResult, FormatTag, SmtpConfig};
use crate::provider::SecretStore;
use crate::smtp::mime::build_message_body;
use crate::smtp::SmtpClient;
use std::path::Path;

const MAX_ATTACHMENT_BYTES: u64 = 50 * 1024 * 1024;
const KINDLE_SUFFIXES: [&str; 2] = ["@kindle.com", "@free.kindle.com"];
const INTRO_TEXT: &str = "Sent from your library.";

/// Validates and executes a single Kindle-by-email delivery.
pub struct DeliveryService {
    smtp_config: Option<SmtpConfig>,
}

impl DeliveryService {
    /// Build a service from the configured (non-secret) SMTP settings.
    pub fn new(smtp_config: Option<SmtpConfig>) -> Self {
        Self { smtp_config }
    }

    /// Send `source_path` to `destination`, following §4.5's precondition
    /// ordering exactly: destination shape, source existence, size limit,
    /// compatibility warning, then configuration/credentials.
    pub async fn send(
        &self,
        source_path: &Path,
        destination: &str,
        book_title: &str,
        format: FormatTag,
        secrets: &dyn SecretStore,
    ) -> Result<DeliveryResult, DeliveryError> {
        if !is_kindle_destination(destination) {
            return Err(DeliveryError::InvalidDestination(destination.to_string()));
        }

        let metadata = tokio::fs::metadata(source_path)
            .await
            .map_err(|_| DeliveryError::SourceMissing(source_path.to_path_buf()))?;

        if metadata.len() > MAX_ATTACHMENT_BYTES {
            return Err(DeliveryError::FileTooLarge(metadata.len()));
        }

        if !format.kindle_compatible() {
            tracing::warn!(
                format = %format,
                "delivering a non-Kindle-compatible format; the device may reject it"
            );
        }

        let config = self.smtp_config.as_ref().ok_or(DeliveryError::NotConfigured)?;
        let password = secrets
            .get(crate::provider::SMTP_PASSWORD_ACCOUNT)
            .ok_or(DeliveryError::NotConfigured)?;

        let bytes = tokio::fs::read(source_path)
            .await
            .map_err(|_| DeliveryError::SourceMissing(source_path.to_path_buf()))?;

        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("book.{format}"));

        let boundary = crate::smtp::mime::generate_boundary();
        let body = build_message_body(&boundary, INTRO_TEXT, &file_name, format.mime_type(), &bytes);
        let content_type = format!("multipart/mixed; boundary=\"{boundary}\"");
        let full_body = format!("Content-Type: {content_type}\r\n\r\n{body}");

        let mut client = SmtpClient::connect(config, &password).await?;
        let result = client
            .send_message(&config.username, destination, book_title, book_title, &full_body)
            .await;

        match result {
            Ok(result) => {
                let _ = client.close().await;
                Ok(result)
            }
            Err(e) => {
                let _ = client.close().await;
                Err(e.into())
            }
        }
    }
}

fn is_kindle_destination(destination: &str) -> bool {
    let lower = destination.to_ascii_lowercase();
    KINDLE_SUFFIXES.iter().any(|suffix| {
        lower
            .strip_suffix(suffix)
            .is_some_and(|local| !local.is_empty() && !local.contains('@'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FileSecretStore, SMTP_PASSWORD_ACCOUNT};

    #[test]
    fn kindle_destination_requires_recognized_suffix_and_local_part() {
        assert!(is_kindle_destination("reader@kindle.com"));
        assert!(is_kindle_destination("reader@free.kindle.com"));
        assert!(!is_kindle_destination("reader@gmail.com"));
        assert!(!is_kindle_destination("@kindle.com"));
        assert!(!is_kindle_destination("a@b@kindle.com"));
    }

    #[tokio::test]
    async fn invalid_destination_is_rejected_before_touching_the_filesystem() {
        let service = DeliveryService::new(None);
        let dir = tempfile::tempdir().unwrap();
        let secrets = FileSecretStore::new(dir.path().join("secrets.json"));

        let missing_path = dir.path().join("does-not-exist.epub");
        let result = service
            .send(&missing_path, "reader@gmail.com", "Title", FormatTag::Epub, &secrets)
            .await;

        assert!(matches!(result, Err(DeliveryError::InvalidDestination(_))));
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_at_the_exact_boundary() {
        let service = DeliveryService::new(None);
        let dir = tempfile::tempdir().unwrap();
        let secrets = FileSecretStore::new(dir.path().join("secrets.json"));

        let path = dir.path().join("big.epub");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_ATTACHMENT_BYTES + 1).unwrap();

        let result = service
            .send(&path, "reader@kindle.com", "Title", FormatTag::Epub, &secrets)
            .await;
        assert!(matches!(result, Err(DeliveryError::FileTooLarge(_))));
    }

    #[tokio::test]
    async fn exactly_max_size_passes_the_size_check_and_fails_on_configuration_instead() {
        let service = DeliveryService::new(None);
        let dir = tempfile::tempdir().unwrap();
        let secrets = FileSecretStore::new(dir.path().join("secrets.json"));

        let path = dir.path().join("exact.epub");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_ATTACHMENT_BYTES).unwrap();

        let result = service
            .send(&path, "reader@kindle.com", "Title", FormatTag::Epub, &secrets)
            .await;
        assert!(matches!(result, Err(DeliveryError::NotConfigured)));
    }

    #[tokio::test]
    async fn missing_password_is_reported_as_not_configured() {
        let smtp_config = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "me@example.com".into(),
            use_tls: true,
        };
        let service = DeliveryService::new(Some(smtp_config));
        let dir = tempfile::tempdir().unwrap();
        let secrets = FileSecretStore::new(dir.path().join("secrets.json"));
        assert!(secrets.get(SMTP_PASSWORD_ACCOUNT).is_none());

        let path = dir.path().join("book.epub");
        std::fs::write(&path, b"small").unwrap();

        let result = service
            .send(&path, "reader@kindle.com", "Title", FormatTag::Epub, &secrets)
            .await;
        assert!(matches!(result, Err(DeliveryError::NotConfigured)));
    }
}
