//! Core data model shared across components (§3 of the design).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque stable identifier for a book, owned and minted by the external library.
pub type BookRef = String;

/// Lowercase short format tag from the recognized set.
///
/// `kindle_compatible`/`kindle_native` are computed against the exact sets named
/// in the design, not against every variant this enum happens to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    /// EPUB.
    Epub,
    /// Mobipocket.
    Mobi,
    /// Amazon KF8.
    Azw3,
    /// Amazon legacy Kindle format.
    Azw,
    /// Portable Document Format.
    Pdf,
    /// Comic Book ZIP.
    Cbz,
    /// Comic Book RAR.
    Cbr,
    /// FictionBook.
    Fb2,
    /// Plain text.
    Txt,
    /// Rich Text Format.
    Rtf,
    /// HTML.
    Html,
    /// Zipped HTML.
    Htmlz,
    /// Microsoft Word.
    Docx,
    /// Microsoft Reader.
    Lit,
    /// Palm database.
    Pdb,
}

impl FormatTag {
    /// Parse a lowercase or mixed-case file extension into a format tag.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext.to_ascii_lowercase().as_str() {
            "epub" => Self::Epub,
            "mobi" => Self::Mobi,
            "azw3" => Self::Azw3,
            "azw" => Self::Azw,
            "pdf" => Self::Pdf,
            "cbz" => Self::Cbz,
            "cbr" => Self::Cbr,
            "fb2" => Self::Fb2,
            "txt" => Self::Txt,
            "rtf" => Self::Rtf,
            "html" | "htm" => Self::Html,
            "htmlz" => Self::Htmlz,
            "docx" => Self::Docx,
            "lit" => Self::Lit,
            "pdb" => Self::Pdb,
            _ => return None,
        })
    }

    /// Lowercase tag string, as it appears on the wire (`BookDescriptor.format`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Mobi => "mobi",
            Self::Azw3 => "azw3",
            Self::Azw => "azw",
            Self::Pdf => "pdf",
            Self::Cbz => "cbz",
            Self::Cbr => "cbr",
            Self::Fb2 => "fb2",
            Self::Txt => "txt",
            Self::Rtf => "rtf",
            Self::Html => "html",
            Self::Htmlz => "htmlz",
            Self::Docx => "docx",
            Self::Lit => "lit",
            Self::Pdb => "pdb",
        }
    }

    /// Fixed MIME type table (§6).
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Epub => "application/epub+zip",
            Self::Mobi => "application/x-mobipocket-ebook",
            Self::Azw | Self::Azw3 => "application/vnd.amazon.ebook",
            Self::Pdf => "application/pdf",
            Self::Cbz => "application/vnd.comicbook+zip",
            Self::Cbr => "application/vnd.comicbook-rar",
            Self::Fb2 => "application/x-fictionbook+xml",
            Self::Txt => "text/plain",
            Self::Rtf => "application/rtf",
            Self::Html | Self::Htmlz => "text/html",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Lit => "application/x-ms-reader",
            Self::Pdb => "application/x-pilot",
        }
    }

    /// `kindleCompatible = tag ∈ {epub, azw3, kfx, pdf, txt}` restricted to this enum's domain.
    pub fn kindle_compatible(&self) -> bool {
        matches!(self, Self::Epub | Self::Azw3 | Self::Pdf | Self::Txt)
    }

    /// `kindleNative = tag ∈ {mobi, azw3, prc}` restricted to this enum's domain.
    pub fn kindle_native(&self) -> bool {
        matches!(self, Self::Mobi | Self::Azw3)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projection returned by `BookProvider::list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookDescriptor {
    /// Unique id within a given provider snapshot.
    pub id: BookRef,
    /// Display title.
    pub title: String,
    /// Author names, in provider order.
    pub authors: Vec<String>,
    /// Lowercase extension tag.
    pub format: String,
    /// File size in bytes.
    pub file_size: u64,
    /// When the book was added to the library.
    pub date_added: DateTime<Utc>,
}

impl BookDescriptor {
    /// Comma-joined authors, or the spec's fallback string when there are none.
    pub fn authors_display(&self) -> String {
        if self.authors.is_empty() {
            "Unknown Author".to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

/// Enrichment record returned by metadata providers (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BookMetadata {
    /// Title, if the provider reported one.
    pub title: Option<String>,
    /// Authors, in the order reported.
    pub authors: Vec<String>,
    /// ISBN-10, hyphens stripped.
    pub isbn10: Option<String>,
    /// ISBN-13, hyphens stripped.
    pub isbn13: Option<String>,
    /// Publisher name.
    pub publisher: Option<String>,
    /// Free-text published date as reported by the source.
    pub published_date: Option<String>,
    /// Language code.
    pub language: Option<String>,
    /// Series name.
    pub series: Option<String>,
    /// Position within the series.
    pub series_index: Option<f32>,
    /// Free-text tags/subjects.
    pub tags: Vec<String>,
    /// Short synopsis.
    pub summary: Option<String>,
    /// Page count, if known.
    pub page_count: Option<u32>,
    /// URL of a cover image, if the provider has one.
    pub cover_url: Option<String>,
    /// Provider-reported confidence in `[0,1]`.
    pub confidence: f32,
    /// Name of the provider that produced this record.
    pub source: String,
}

/// Content-address for a converted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Id of the source book.
    pub book_id: BookRef,
    /// Target format tag, e.g. `"mobi"`.
    pub target_format: String,
}

impl CacheKey {
    /// Construct a new cache key.
    pub fn new(book_id: impl Into<String>, target_format: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            target_format: target_format.into(),
        }
    }

    /// Filename this key is encoded as on disk: `<bookId>.<targetFormat>`.
    pub fn filename(&self) -> String {
        format!("{}.{}", self.book_id, self.target_format)
    }
}

/// A peer discovered on the LAN (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    /// `instance.type.domain` — unique across the observation window.
    pub id: String,
    /// Human-readable service name.
    pub name: String,
    /// Resolved host, if any.
    pub host: Option<String>,
    /// Resolved port, if any.
    pub port: Option<u16>,
    /// Flat TXT record map.
    pub txt: HashMap<String, String>,
}

/// Add/remove events emitted by `DiscoveryService::browse` (§3.1 expansion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DiscoveryEvent {
    /// A peer was discovered or updated.
    Added(DiscoveredPeer),
    /// A previously-seen peer id disappeared.
    Removed(String),
}

/// Non-secret SMTP connection parameters. The password lives in `SecretStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Username used both for `AUTH LOGIN` and the envelope `MAIL FROM`.
    pub username: String,
    /// Whether to use TLS (implicit at port 465, opportunistic otherwise).
    pub use_tls: bool,
}

/// Immutable record of a single delivery attempt (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Whether the SMTP exchange completed successfully.
    pub success: bool,
    /// Title of the delivered book.
    pub book_title: String,
    /// Destination address the book was sent to.
    pub destination: String,
    /// Human-readable outcome message.
    pub message: String,
    /// When the attempt completed.
    pub timestamp: DateTime<Utc>,
}

/// A progress tick emitted by the converter (§3, lossy broadcast).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionProgress {
    /// Id of the job this tick belongs to.
    pub job_id: String,
    /// Percent complete, clamped to `[0,100]`.
    pub percent: u8,
    /// Free-text description of the current operation.
    pub operation: String,
    /// Time elapsed since the job started, in milliseconds.
    pub elapsed_ms: u64,
}

/// Observable server status, published on the event channel (§3.1 expansion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Whether the HTTP server is currently bound and serving.
    pub running: bool,
    /// Public base URL, once bound.
    pub server_url: Option<String>,
    /// Bound port, once bound.
    pub port: Option<u16>,
    /// Number of downloads currently in flight.
    pub active_downloads: usize,
}

/// Events published on `AppState`'s broadcast channel (§5 expansion, replaces
/// the source system's property-change observers).
#[derive(Debug, Clone)]
pub enum FolioEvent {
    /// The server's overall status changed.
    ServerStatusChanged(ServerStatus),
    /// The number of in-flight downloads changed.
    DownloadCountChanged(usize),
    /// A conversion job emitted a progress tick.
    Conversion(ConversionProgress),
    /// A discovery add/remove event.
    Discovery(DiscoveryEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tag_round_trips_through_extension() {
        for tag in [FormatTag::Epub, FormatTag::Mobi, FormatTag::Pdf, FormatTag::Cbz] {
            let parsed = FormatTag::from_extension(tag.as_str()).unwrap();
            assert_eq!(parsed.as_str(), tag.as_str());
        }
    }

    #[test]
    fn kindle_predicates_match_the_design_sets() {
        assert!(FormatTag::Epub.kindle_compatible());
        assert!(!FormatTag::Epub.kindle_native());
        assert!(FormatTag::Mobi.kindle_native());
        assert!(!FormatTag::Mobi.kindle_compatible());
        assert!(FormatTag::Azw3.kindle_compatible());
        assert!(FormatTag::Azw3.kindle_native());
        assert!(!FormatTag::Cbz.kindle_compatible());
    }

    #[test]
    fn authors_display_falls_back_to_unknown_author() {
        let desc = BookDescriptor {
            id: "b1".into(),
            title: "Dune".into(),
            authors: vec![],
            format: "epub".into(),
            file_size: 0,
            date_added: Utc::now(),
        };
        assert_eq!(desc.authors_display(), "Unknown Author");
    }

    #[test]
    fn cache_key_filename_encodes_book_id_and_format() {
        let key = CacheKey::new("b2", "mobi");
        assert_eq!(key.filename(), "b2.mobi");
    }
}
