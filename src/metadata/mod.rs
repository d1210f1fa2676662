//! MetadataAggregator (C5): fans out to ordered providers, applies a
//! confidence floor, and merges or falls back (§4.3).

pub mod googlebooks;
pub mod openlibrary;

use crate::error::MetadataError;
use crate::model::BookMetadata;
use async_trait::async_trait;

/// Behavior every metadata provider must implement. Providers are stateless
/// and safe for concurrent use.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Human-readable provider name, used as `BookMetadata::source`.
    fn name(&self) -> &'static str;

    /// Look up a single record by ISBN (10 or 13 digit, hyphens already stripped).
    async fn lookup_by_isbn(&self, isbn: &str) -> Result<Option<BookMetadata>, MetadataError>;

    /// Search by title and optional author, sorted by confidence descending.
    async fn search_by_title_author(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Vec<BookMetadata>, MetadataError>;

    /// Resolve a cover image URL for an ISBN, if the provider has one.
    async fn cover_url_by_isbn(&self, isbn: &str) -> Result<Option<String>, MetadataError>;
}

/// Options controlling an ISBN lookup (§4.3).
#[derive(Debug, Clone)]
pub struct LookupOptions {
    /// Minimum confidence a provider result must meet to be accepted.
    pub min_confidence: f32,
    /// Merge across providers (`true`) vs. return the first acceptable hit.
    pub merge: bool,
    /// Whether to additionally resolve cover URLs (currently informational;
    /// provider implementations populate `cover_url` inline when available).
    pub fetch_covers: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            merge: true,
            fetch_covers: true,
        }
    }
}

/// Fans out to an ordered list of providers.
pub struct MetadataAggregator {
    providers: Vec<Box<dyn MetadataProvider>>,
}

impl MetadataAggregator {
    /// Build an aggregator with the default provider ordering `[OpenLibrary, GoogleBooks]`.
    pub fn with_default_providers(client: reqwest::Client) -> Self {
        Self {
            providers: vec![
                Box::new(openlibrary::OpenLibraryProvider::new(client.clone())),
                Box::new(googlebooks::GoogleBooksProvider::new(client)),
            ],
        }
    }

    /// Build an aggregator with an explicit, insertion-ordered provider list.
    pub fn new(providers: Vec<Box<dyn MetadataProvider>>) -> Self {
        Self { providers }
    }

    /// Look up a book by ISBN across all configured providers (§4.3).
    pub async fn fetch_by_isbn(
        &self,
        isbn: &str,
        options: &LookupOptions,
    ) -> Result<Option<BookMetadata>, MetadataError> {
        let sanitized = sanitize_isbn(isbn);
        let mut accumulator: Option<BookMetadata> = None;
        let mut errors: Vec<String> = Vec::new();

        for provider in &self.providers {
            match provider.lookup_by_isbn(&sanitized).await {
                Ok(Some(record)) if record.confidence >= options.min_confidence => {
                    if !options.merge {
                        return Ok(Some(record));
                    }
                    accumulator = Some(match accumulator {
                        Some(existing) => merge(existing, record),
                        None => record,
                    });
                }
                Ok(_) => {}
                Err(MetadataError::RateLimited) => {
                    tracing::warn!(provider = provider.name(), "provider rate-limited, trying next");
                }
                Err(e) => errors.push(format!("{}: {e}", provider.name())),
            }
        }

        if let Some(record) = accumulator {
            return Ok(Some(record));
        }
        if !errors.is_empty() {
            return Err(MetadataError::AllProvidersFailed(errors));
        }
        Ok(None)
    }

    /// Search by title/author across providers, honoring `merge`/`max_results` (§4.3).
    pub async fn search_by_title_author(
        &self,
        title: &str,
        author: Option<&str>,
        options: &LookupOptions,
        max_results: usize,
    ) -> Result<Vec<BookMetadata>, MetadataError> {
        let mut combined: Vec<BookMetadata> = Vec::new();

        for provider in &self.providers {
            let results = match provider.search_by_title_author(title, author).await {
                Ok(results) => results,
                Err(MetadataError::RateLimited) => continue,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "provider search failed");
                    continue;
                }
            };
            let filtered: Vec<BookMetadata> = results
                .into_iter()
                .filter(|r| r.confidence >= options.min_confidence)
                .collect();

            if !options.merge {
                let mut truncated = filtered;
                truncated.truncate(max_results);
                return Ok(truncated);
            }
            combined.extend(filtered);
        }

        combined.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        combined.truncate(max_results);
        Ok(combined)
    }

    /// Try to improve `existing` via ISBN lookup (preferring isbn13) falling
    /// back to title/author search; only accept a strictly more confident
    /// replacement (§4.3).
    pub async fn enhance(&self, existing: BookMetadata) -> Result<BookMetadata, MetadataError> {
        let options = LookupOptions::default();
        let isbn = existing.isbn13.clone().or_else(|| existing.isbn10.clone());

        let candidate = if let Some(isbn) = isbn {
            self.fetch_by_isbn(&isbn, &options).await?
        } else {
            None
        };

        let candidate = match candidate {
            Some(c) => Some(c),
            None => {
                let title = existing.title.clone().unwrap_or_default();
                if title.is_empty() {
                    None
                } else {
                    let authors = existing.authors.first().map(String::as_str);
                    self.search_by_title_author(&title, authors, &options, 1)
                        .await?
                        .into_iter()
                        .next()
                }
            }
        };

        match candidate {
            Some(candidate) if candidate.confidence > existing.confidence => {
                Ok(merge(existing, candidate))
            }
            _ => Ok(existing),
        }
    }
}

/// Strip hyphens and whitespace from an ISBN for lookup.
pub fn sanitize_isbn(isbn: &str) -> String {
    isbn.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
}

/// Merge rule: A (existing) wins on each scalar field unless null, in which
/// case B (new) fills it in; if both present and B's confidence is strictly
/// higher, B wins. Array fields union case-insensitively, preserving order
/// of first appearance (§4.3).
pub fn merge(a: BookMetadata, b: BookMetadata) -> BookMetadata {
    let b_wins = b.confidence > a.confidence;

    fn pick<T>(a: Option<T>, b: Option<T>, b_wins: bool) -> Option<T> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b_wins { b } else { a }),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    BookMetadata {
        title: pick(a.title, b.title, b_wins),
        authors: union_case_insensitive(a.authors, b.authors),
        isbn10: pick(a.isbn10, b.isbn10, b_wins),
        isbn13: pick(a.isbn13, b.isbn13, b_wins),
        publisher: pick(a.publisher, b.publisher, b_wins),
        published_date: pick(a.published_date, b.published_date, b_wins),
        language: pick(a.language, b.language, b_wins),
        series: pick(a.series, b.series, b_wins),
        series_index: pick(a.series_index, b.series_index, b_wins),
        tags: union_case_insensitive(a.tags, b.tags),
        summary: pick(a.summary, b.summary, b_wins),
        page_count: pick(a.page_count, b.page_count, b_wins),
        cover_url: pick(a.cover_url, b.cover_url, b_wins),
        confidence: a.confidence.max(b.confidence),
        source: if b_wins { b.source } else { a.source },
    }
}

fn union_case_insensitive(a: Vec<String>, b: Vec<String>) -> Vec<String> {
    let mut seen: std::collections::HashSet<String> =
        a.iter().map(|s| s.to_ascii_lowercase()).collect();
    let mut out = a;
    for item in b {
        let key = item.to_ascii_lowercase();
        if seen.insert(key) {
            out.push(item);
        }
    }
    out
}

/// Validate an ISBN-10 checksum (mod-11, 'X' as weight 10 in the last position).
pub fn is_valid_isbn10(isbn: &str) -> bool {
    let digits: Vec<char> = isbn.chars().collect();
    if digits.len() != 10 {
        return false;
    }
    let mut sum: i32 = 0;
    for (i, c) in digits.iter().enumerate() {
        let value = if i == 9 && (*c == 'X' || *c == 'x') {
            10
        } else if let Some(d) = c.to_digit(10) {
            d as i32
        } else {
            return false;
        };
        sum += value * (10 - i as i32);
    }
    sum % 11 == 0
}

/// Validate an ISBN-13 checksum (mod-10 with alternating 1/3 weights).
pub fn is_valid_isbn13(isbn: &str) -> bool {
    let digits: Vec<u32> = isbn.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
        .sum();
    sum % 10 == 0
}

/// Convert a valid ISBN-10 into ISBN-13 by prepending `978` and recomputing
/// the check digit.
pub fn isbn10_to_isbn13(isbn10: &str) -> Option<String> {
    if !is_valid_isbn10(isbn10) {
        return None;
    }
    let core = &isbn10[..9];
    let with_prefix = format!("978{core}");
    let digits: Vec<u32> = with_prefix.chars().filter_map(|c| c.to_digit(10)).collect();
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
        .sum();
    let check = (10 - (sum % 10)) % 10;
    Some(format!("{with_prefix}{check}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_isbn10_passes_mod11_checksum() {
        assert!(is_valid_isbn10("0306406152"));
        assert!(is_valid_isbn10("080442957X"));
        assert!(!is_valid_isbn10("0306406153"));
    }

    #[test]
    fn valid_isbn13_passes_mod10_checksum() {
        assert!(is_valid_isbn13("9780306406157"));
        assert!(!is_valid_isbn13("9780306406158"));
    }

    #[test]
    fn isbn10_converts_to_valid_isbn13() {
        let isbn13 = isbn10_to_isbn13("0306406152").unwrap();
        assert!(is_valid_isbn13(&isbn13));
        assert!(isbn13.starts_with("978"));
    }

    #[test]
    fn sanitize_strips_hyphens_and_whitespace() {
        assert_eq!(sanitize_isbn("978-0-14-044913-6"), "9780140449136");
        assert_eq!(sanitize_isbn(" 0 306 406 152 "), "0306406152");
    }

    #[test]
    fn merge_prefers_non_null_a_then_falls_back_to_b() {
        let a = BookMetadata {
            title: Some("Dune".into()),
            confidence: 0.5,
            source: "A".into(),
            ..Default::default()
        };
        let b = BookMetadata {
            title: Some("Dune (Deluxe)".into()),
            publisher: Some("Ace".into()),
            confidence: 0.9,
            source: "B".into(),
            ..Default::default()
        };
        let merged = merge(a, b);
        assert_eq!(merged.title.as_deref(), Some("Dune (Deluxe)"));
        assert_eq!(merged.publisher.as_deref(), Some("Ace"));
        assert_eq!(merged.source, "B");
    }

    #[test]
    fn merge_unions_tags_case_insensitively_preserving_first_appearance() {
        let a = BookMetadata {
            tags: vec!["SciFi".into(), "Classic".into()],
            confidence: 0.9,
            source: "A".into(),
            ..Default::default()
        };
        let b = BookMetadata {
            tags: vec!["scifi".into(), "Adventure".into()],
            confidence: 0.5,
            source: "B".into(),
            ..Default::default()
        };
        let merged = merge(a, b);
        assert_eq!(merged.tags, vec!["SciFi", "Classic", "Adventure"]);
    }

    #[test]
    fn merge_is_a_superset_of_both_inputs_field_wise() {
        let a = BookMetadata {
            title: Some("A".into()),
            isbn13: Some("9780140449136".into()),
            confidence: 0.7,
            source: "A".into(),
            ..Default::default()
        };
        let b = BookMetadata {
            publisher: Some("Penguin".into()),
            confidence: 0.6,
            source: "B".into(),
            ..Default::default()
        };
        let merged = merge(a.clone(), b.clone());
        assert_eq!(merged.title, a.title);
        assert_eq!(merged.isbn13, a.isbn13);
        assert_eq!(merged.publisher, b.publisher);
    }
}
