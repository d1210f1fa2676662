//! Google Books provider: `https://www.googleapis.com/books/v1/volumes`.

use super::MetadataProvider;
use crate::error::MetadataError;
use crate::model::BookMetadata;
use async_trait::async_trait;
use serde::Deserialize;

const VOLUMES_ENDPOINT: &str = "https://www.googleapis.com/books/v1/volumes";
const ISBN_CONFIDENCE: f32 = 0.9;
const SEARCH_BASE_CONFIDENCE: f32 = 0.5;

/// `MetadataProvider` backed by the Google Books API.
pub struct GoogleBooksProvider {
    client: reqwest::Client,
}

impl GoogleBooksProvider {
    /// Build a provider using an already-configured HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn query(&self, q: &str) -> Result<Vec<Volume>, MetadataError> {
        let response = self
            .client
            .get(VOLUMES_ENDPOINT)
            .query(&[("q", q)])
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }

        let parsed: VolumesResponse = response
            .json()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        Ok(parsed.items.unwrap_or_default())
    }
}

fn map_status(status: reqwest::StatusCode) -> MetadataError {
    if status.as_u16() == 429 {
        MetadataError::RateLimited
    } else if status.is_server_error() {
        MetadataError::ServerError(status.to_string())
    } else {
        MetadataError::InvalidRequest(status.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    items: Option<Vec<Volume>>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    #[serde(rename = "volumeInfo")]
    volume_info: VolumeInfo,
}

#[derive(Debug, Deserialize, Default)]
struct VolumeInfo {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
    #[serde(default, rename = "industryIdentifiers")]
    industry_identifiers: Vec<IndustryIdentifier>,
    description: Option<String>,
    #[serde(rename = "pageCount")]
    page_count: Option<u32>,
    language: Option<String>,
    #[serde(rename = "imageLinks")]
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct ImageLinks {
    thumbnail: Option<String>,
}

fn metadata_from_info(info: VolumeInfo, confidence: f32) -> BookMetadata {
    let mut isbn10 = None;
    let mut isbn13 = None;
    for id in &info.industry_identifiers {
        match id.kind.as_str() {
            "ISBN_10" => isbn10 = Some(id.identifier.clone()),
            "ISBN_13" => isbn13 = Some(id.identifier.clone()),
            _ => {}
        }
    }

    BookMetadata {
        title: info.title,
        authors: info.authors,
        isbn10,
        isbn13,
        publisher: info.publisher,
        published_date: info.published_date,
        language: info.language,
        summary: info.description,
        page_count: info.page_count,
        cover_url: info.image_links.and_then(|l| l.thumbnail),
        confidence,
        source: "googlebooks".to_string(),
        ..Default::default()
    }
}

/// Crude case-insensitive token-overlap similarity in `[0, 1]`, used to scale
/// confidence for title/author search results that have no ISBN match.
fn title_similarity(query: &str, candidate: &str) -> f32 {
    let query_tokens: std::collections::HashSet<String> = query
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let candidate_tokens: std::collections::HashSet<String> = candidate
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect();
    let overlap = query_tokens.intersection(&candidate_tokens).count();
    overlap as f32 / query_tokens.len() as f32
}

#[async_trait]
impl MetadataProvider for GoogleBooksProvider {
    fn name(&self) -> &'static str {
        "googlebooks"
    }

    async fn lookup_by_isbn(&self, isbn: &str) -> Result<Option<BookMetadata>, MetadataError> {
        let volumes = self.query(&format!("isbn:{isbn}")).await?;
        Ok(volumes
            .into_iter()
            .next()
            .map(|v| metadata_from_info(v.volume_info, ISBN_CONFIDENCE)))
    }

    async fn search_by_title_author(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Vec<BookMetadata>, MetadataError> {
        let q = match author {
            Some(author) => format!("intitle:{title} inauthor:{author}"),
            None => format!("intitle:{title}"),
        };
        let volumes = self.query(&q).await?;

        Ok(volumes
            .into_iter()
            .map(|v| {
                let similarity = v
                    .volume_info
                    .title
                    .as_deref()
                    .map(|t| title_similarity(title, t))
                    .unwrap_or(0.0);
                let confidence = SEARCH_BASE_CONFIDENCE + similarity * (1.0 - SEARCH_BASE_CONFIDENCE);
                metadata_from_info(v.volume_info, confidence)
            })
            .collect())
    }

    async fn cover_url_by_isbn(&self, isbn: &str) -> Result<Option<String>, MetadataError> {
        let volumes = self.query(&format!("isbn:{isbn}")).await?;
        Ok(volumes
            .into_iter()
            .next()
            .and_then(|v| v.volume_info.image_links)
            .and_then(|l| l.thumbnail))
    }
}
