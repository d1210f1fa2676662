//! OpenLibrary provider: `https://openlibrary.org/isbn/{isbn}.json`.

use super::MetadataProvider;
use crate::error::MetadataError;
use crate::model::BookMetadata;
use async_trait::async_trait;
use serde::Deserialize;

const ISBN_ENDPOINT: &str = "https://openlibrary.org/isbn";
const SEARCH_ENDPOINT: &str = "https://openlibrary.org/search.json";
const ISBN_CONFIDENCE: f32 = 0.85;
const SEARCH_CONFIDENCE: f32 = 0.6;

/// `MetadataProvider` backed by the OpenLibrary public API.
pub struct OpenLibraryProvider {
    client: reqwest::Client,
}

impl OpenLibraryProvider {
    /// Build a provider using an already-configured HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct IsbnRecord {
    title: Option<String>,
    publishers: Option<Vec<String>>,
    publish_date: Option<String>,
    number_of_pages: Option<u32>,
    #[serde(default)]
    authors: Vec<AuthorRef>,
    #[serde(default)]
    isbn_10: Vec<String>,
    #[serde(default)]
    isbn_13: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorRef {
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    publisher: Option<Vec<String>>,
    first_publish_year: Option<i32>,
    #[serde(default)]
    isbn: Vec<String>,
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

#[async_trait]
impl MetadataProvider for OpenLibraryProvider {
    fn name(&self) -> &'static str {
        "openlibrary"
    }

    async fn lookup_by_isbn(&self, isbn: &str) -> Result<Option<BookMetadata>, MetadataError> {
        let url = format!("{ISBN_ENDPOINT}/{isbn}.json");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }

        let record: IsbnRecord = response
            .json()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        let authors = record
            .authors
            .iter()
            .filter_map(|a| a.key.as_ref())
            .map(|k| k.trim_start_matches("/authors/").to_string())
            .collect();

        Ok(Some(BookMetadata {
            title: record.title,
            authors,
            isbn10: record.isbn_10.into_iter().next(),
            isbn13: record.isbn_13.into_iter().next(),
            publisher: record.publishers.and_then(|p| p.into_iter().next()),
            published_date: record.publish_date,
            page_count: record.number_of_pages,
            confidence: ISBN_CONFIDENCE,
            source: "openlibrary".to_string(),
            ..Default::default()
        }))
    }

    async fn search_by_title_author(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Vec<BookMetadata>, MetadataError> {
        let mut query = vec![("title", title.to_string())];
        if let Some(author) = author {
            query.push(("author", author.to_string()));
        }

        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&query)
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        Ok(parsed
            .docs
            .into_iter()
            .map(|doc| BookMetadata {
                title: doc.title,
                authors: doc.author_name,
                isbn13: doc.isbn.into_iter().next(),
                publisher: doc.publisher.and_then(|p| p.into_iter().next()),
                published_date: doc.first_publish_year.map(|y| y.to_string()),
                confidence: SEARCH_CONFIDENCE,
                source: "openlibrary".to_string(),
                ..Default::default()
            })
            .collect())
    }

    async fn cover_url_by_isbn(&self, isbn: &str) -> Result<Option<String>, MetadataError> {
        Ok(Some(format!(
            "https://covers.openlibrary.org/b/isbn/{isbn}-L.jpg"
        )))
    }
}
