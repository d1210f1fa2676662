//! End-to-end scenarios exercising the public surface against the default
//! in-process collaborators, one test per literal scenario.

use chrono::Utc;
use folio_core::cache::ConversionCache;
use folio_core::converter::{ConvertOptions, Converter};
use folio_core::delivery::DeliveryService;
use folio_core::error::{ConverterError, DeliveryError};
use folio_core::metadata::{LookupOptions, MetadataAggregator, MetadataProvider};
use folio_core::model::{BookDescriptor, BookMetadata, FormatTag};
use folio_core::provider::{BookAccess, BookProvider, FileSecretStore};
use folio_core::server::{create_router, AppState};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A fixed, in-memory `BookProvider` for scenarios that need literal ids.
struct StubProvider {
    books: HashMap<String, (BookDescriptor, PathBuf, FormatTag)>,
}

impl StubProvider {
    fn new(entries: Vec<(BookDescriptor, PathBuf, FormatTag)>) -> Self {
        let books = entries.into_iter().map(|e| (e.0.id.clone(), e)).collect();
        Self { books }
    }
}

impl BookProvider for StubProvider {
    fn list(&self) -> Vec<BookDescriptor> {
        self.books.values().map(|(d, _, _)| d.clone()).collect()
    }

    fn get_book_file_url(&self, id: &str) -> Option<BookAccess> {
        self.books.get(id).map(|(_, path, _)| BookAccess::direct(path.clone()))
    }

    fn get_book_format(&self, id: &str) -> Option<FormatTag> {
        self.books.get(id).map(|(_, _, format)| *format)
    }

    fn get_book_metadata(&self, id: &str) -> Option<BookMetadata> {
        self.books.get(id).map(|(d, _, _)| BookMetadata {
            title: Some(d.title.clone()),
            authors: d.authors.clone(),
            confidence: 1.0,
            source: "stub".to_string(),
            ..Default::default()
        })
    }
}

fn descriptor(id: &str, title: &str, authors: &[&str], format: &str, file_size: u64) -> BookDescriptor {
    BookDescriptor {
        id: id.to_string(),
        title: title.to_string(),
        authors: authors.iter().map(|a| a.to_string()).collect(),
        format: format.to_string(),
        file_size,
        date_added: Utc::now(),
    }
}

async fn spawn_test_server(provider: StubProvider, converter: Converter, cache_dir: PathBuf) -> String {
    let secrets = FileSecretStore::new(cache_dir.join("secrets.json"));
    let state = AppState::new(
        Arc::new(folio_core::Config::default()),
        Arc::new(provider),
        Arc::new(secrets),
        Arc::new(converter),
        Arc::new(ConversionCache::new(cache_dir.join("cache")).unwrap()),
        Arc::new(MetadataAggregator::new(Vec::new())),
        Arc::new(DeliveryService::new(None)),
        None,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}")
}

fn write_fake_converter_script(dir: &Path, body: &str) -> PathBuf {
    let script_path = dir.join("fake-ebook-convert.sh");
    std::fs::write(&script_path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    script_path
}

/// S1 — raw download of an EPUB streams the exact byte count and the
/// Content-Disposition/Content-Type/Content-Length headers the format demands.
#[tokio::test]
async fn s1_raw_download_streams_exact_bytes_and_headers() {
    let dir = tempfile::tempdir().unwrap();
    let book_path = dir.path().join("dune.epub");
    let payload = vec![b'x'; 1_234_567];
    std::fs::write(&book_path, &payload).unwrap();

    let provider = StubProvider::new(vec![(
        descriptor("b1", "Dune", &["Frank Herbert"], "epub", 1_234_567),
        book_path,
        FormatTag::Epub,
    )]);
    let converter = Converter::new(None);
    let base_url = spawn_test_server(provider, converter, dir.path().to_path_buf()).await;

    let response = reqwest::get(format!("{base_url}/api/books/b1/download")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/epub+zip"
    );
    assert_eq!(
        response.headers().get("content-length").unwrap(),
        "1234567"
    );
    assert!(response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("dune.epub"));

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 1_234_567);
}

/// S2 — the first Kindle download transcodes and populates the cache; the
/// second serves the cached artifact without invoking the converter again.
#[tokio::test]
async fn s2_transcode_on_miss_then_serve_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let book_path = dir.path().join("alice.epub");
    std::fs::write(&book_path, b"fake epub bytes").unwrap();

    let counter_path = dir.path().join("invocations.count");
    let script = write_fake_converter_script(
        dir.path(),
        &format!(
            "#!/bin/sh\necho x >> \"{counter}\"\necho '100%% done'\necho 'fake mobi' > \"$2\"\n",
            counter = counter_path.display()
        ),
    );

    let provider = StubProvider::new(vec![(
        descriptor("b2", "Alice", &["Lewis Carroll"], "epub", 15),
        book_path,
        FormatTag::Epub,
    )]);
    let converter = Converter::new(Some(script));
    let base_url = spawn_test_server(provider, converter, dir.path().to_path_buf()).await;

    let first = reqwest::get(format!("{base_url}/api/books/b2/kindle")).await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(
        first.headers().get("content-type").unwrap(),
        "application/x-mobipocket-ebook"
    );
    assert!(first
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("alice.mobi"));

    let second = reqwest::get(format!("{base_url}/api/books/b2/kindle")).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(first.bytes().await.unwrap(), second.bytes().await.unwrap());

    let invocations = std::fs::read_to_string(&counter_path).unwrap();
    assert_eq!(invocations.lines().count(), 1, "converter must run exactly once");
}

/// S3 (reduced) — the full EHLO/AUTH LOGIN/MAIL FROM/RCPT TO/DATA/QUIT dialog
/// against a plaintext fixture server, exercising everything in the STARTTLS
/// scenario except the TLS handshake itself (which needs a trusted
/// certificate and is covered at the unit level in `src/smtp/mod.rs`).
#[tokio::test]
async fn s3_full_smtp_dialog_against_a_fixture_server() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut seen = Vec::new();
        let mut in_data = false;
        let mut awaiting_password = false;

        write_half.write_all(b"220 fixture.local ready\r\n").await.unwrap();

        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.unwrap();
            if n == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            seen.push(line.clone());

            if in_data {
                // Body lines get no per-line reply; only the lone "." terminator does.
                if line == "." {
                    in_data = false;
                    write_half.write_all(b"250 OK queued\r\n").await.unwrap();
                }
                continue;
            }

            let reply = if line.starts_with("EHLO") {
                "250 fixture.local\r\n"
            } else if line.starts_with("AUTH LOGIN") {
                awaiting_password = false;
                "334 VXNlcm5hbWU6\r\n"
            } else if line.starts_with("MAIL FROM") {
                "250 OK\r\n"
            } else if line.starts_with("RCPT TO") {
                "250 OK\r\n"
            } else if line == "DATA" {
                in_data = true;
                "354 Start mail input\r\n"
            } else if line == "QUIT" {
                write_half.write_all(b"221 bye\r\n").await.unwrap();
                break;
            } else if !awaiting_password {
                // base64-encoded username from AUTH LOGIN.
                awaiting_password = true;
                "334 UGFzc3dvcmQ6\r\n"
            } else {
                // base64-encoded password from AUTH LOGIN.
                awaiting_password = false;
                "235 Authenticated\r\n"
            };
            write_half.write_all(reply.as_bytes()).await.unwrap();
        }

        seen
    });

    let config = folio_core::model::SmtpConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "user@x.test".to_string(),
        use_tls: false,
    };

    let mut client = folio_core::smtp::SmtpClient::connect(&config, "pw").await.unwrap();
    let result = client
        .send_message("user@x.test", "x@kindle.com", "Dune", "Dune", "body text")
        .await
        .unwrap();
    assert!(result.success);
    client.close().await.unwrap();

    let seen = server.await.unwrap();
    assert!(seen.iter().any(|l| l.starts_with("EHLO")));
    assert!(seen.iter().any(|l| l.starts_with("MAIL FROM:<user@x.test>")));
    assert!(seen.iter().any(|l| l.starts_with("RCPT TO:<x@kindle.com>")));
    assert!(seen.iter().any(|l| l == "DATA"));
    assert!(seen.iter().any(|l| l == "QUIT"));
}

struct RateLimitedProvider;

#[async_trait::async_trait]
impl MetadataProvider for RateLimitedProvider {
    fn name(&self) -> &'static str {
        "P1"
    }
    async fn lookup_by_isbn(
        &self,
        _isbn: &str,
    ) -> Result<Option<BookMetadata>, folio_core::error::MetadataError> {
        Err(folio_core::error::MetadataError::RateLimited)
    }
    async fn search_by_title_author(
        &self,
        _title: &str,
        _author: Option<&str>,
    ) -> Result<Vec<BookMetadata>, folio_core::error::MetadataError> {
        Ok(Vec::new())
    }
    async fn cover_url_by_isbn(
        &self,
        _isbn: &str,
    ) -> Result<Option<String>, folio_core::error::MetadataError> {
        Ok(None)
    }
}

struct ConfidentProvider;

#[async_trait::async_trait]
impl MetadataProvider for ConfidentProvider {
    fn name(&self) -> &'static str {
        "P2"
    }
    async fn lookup_by_isbn(
        &self,
        isbn: &str,
    ) -> Result<Option<BookMetadata>, folio_core::error::MetadataError> {
        Ok(Some(BookMetadata {
            title: Some("Pride and Prejudice".to_string()),
            isbn13: Some(isbn.to_string()),
            confidence: 0.9,
            source: "P2".to_string(),
            ..Default::default()
        }))
    }
    async fn search_by_title_author(
        &self,
        _title: &str,
        _author: Option<&str>,
    ) -> Result<Vec<BookMetadata>, folio_core::error::MetadataError> {
        Ok(Vec::new())
    }
    async fn cover_url_by_isbn(
        &self,
        _isbn: &str,
    ) -> Result<Option<String>, folio_core::error::MetadataError> {
        Ok(None)
    }
}

/// S4 — a rate-limited first provider is skipped in favor of a confident
/// second provider; the aggregator does not raise `AllProvidersFailed`.
#[tokio::test]
async fn s4_provider_fallback_skips_rate_limited_provider() {
    let aggregator = MetadataAggregator::new(vec![Box::new(RateLimitedProvider), Box::new(ConfidentProvider)]);
    let options = LookupOptions::default();

    let result = aggregator.fetch_by_isbn("9780140449136", &options).await.unwrap();
    let record = result.expect("P2's record should be returned");
    assert_eq!(record.source, "P2");
    assert_eq!(record.confidence, 0.9);
    assert_eq!(record.title.as_deref(), Some("Pride and Prejudice"));
}

/// S5 — an invalid destination is rejected before any filesystem, SMTP, or
/// secret-store access beyond the source path's existence check.
#[tokio::test]
async fn s5_invalid_destination_is_rejected_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = FileSecretStore::new(dir.path().join("secrets.json"));
    let delivery = DeliveryService::new(None);

    let result = delivery
        .send(
            Path::new("/does/not/exist.epub"),
            "plain@example.com",
            "X",
            FormatTag::Epub,
            &secrets,
        )
        .await;

    match result {
        Err(DeliveryError::InvalidDestination(dest)) => assert_eq!(dest, "plain@example.com"),
        other => panic!("expected InvalidDestination, got {other:?}"),
    }
}

/// S6 — cancelling a conversion after its first progress tick raises
/// `Cancelled`, leaves no output file behind, and clears the job registry.
#[tokio::test]
async fn s6_cancellation_mid_conversion_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("book.epub");
    std::fs::write(&source, b"fake epub").unwrap();

    let script = write_fake_converter_script(
        dir.path(),
        "#!/bin/sh\necho '10% Converting'\nsleep 2\necho fake > \"$2\"\n",
    );
    let converter = Arc::new(Converter::new(Some(script)));
    let mut progress = converter.subscribe();

    let converter_for_job = converter.clone();
    let source_for_job = source.clone();
    let convert_task = tokio::spawn(async move {
        converter_for_job
            .convert(&source_for_job, "mobi", ConvertOptions::default())
            .await
    });

    let tick = progress.recv().await.unwrap();
    converter.cancel(&tick.job_id);

    let result = convert_task.await.unwrap();
    assert!(matches!(result, Err(ConverterError::Cancelled)));
    assert_eq!(converter.active_job_count(), 0);

    let expected_output = dir.path().join("book.mobi");
    assert!(!expected_output.exists());
}
