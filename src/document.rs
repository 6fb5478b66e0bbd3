//! PDF loading: fetch the configured document and extract one text record per page.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use pdf_oxide::converters::ConversionOptions;
use reqwest::blocking::Client;
use url::Url;

/// Where the document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// Fetched over HTTP(S).
    Remote(Url),
    /// Read from the local filesystem.
    Local(PathBuf),
}

impl DocumentSource {
    /// Interprets `http://` / `https://` locations as URLs and everything else as a path.
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        anyhow::ensure!(!location.is_empty(), "document location is required");
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = Url::parse(location)
                .with_context(|| format!("invalid document URL {location}"))?;
            return Ok(Self::Remote(url));
        }
        Ok(Self::Local(PathBuf::from(location)))
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Extracted text of a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPage {
    /// 1-based page number.
    pub page_number: usize,
    /// Page text.
    pub text: String,
}

/// A loaded document ready for splitting.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Display form of the source location, stored as chunk metadata.
    pub source: String,
    /// CRC32 of the raw document bytes.
    pub checksum: u32,
    /// Non-empty pages in order.
    pub pages: Vec<DocumentPage>,
}

impl LoadedDocument {
    /// Builds a document from already extracted pages; the checksum covers the page text.
    pub fn from_pages(source: impl Into<String>, pages: Vec<DocumentPage>) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        for page in &pages {
            hasher.update(page.text.as_bytes());
        }
        Self {
            source: source.into(),
            checksum: hasher.finalize(),
            pages,
        }
    }

    /// Total characters across pages.
    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|page| page.text.chars().count()).sum()
    }
}

/// Loads and extracts the document. Any failure is fatal for indexing.
pub fn load_document(source: &DocumentSource, timeout: Duration) -> Result<LoadedDocument> {
    let (bytes, pages) = match source {
        DocumentSource::Local(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let pages = extract_pages(path)?;
            (bytes, pages)
        }
        DocumentSource::Remote(url) => {
            let bytes = download(url, timeout)?;
            let mut file = tempfile::Builder::new()
                .prefix("docqa-")
                .suffix(".pdf")
                .tempfile()
                .context("failed to create temporary file for download")?;
            file.write_all(&bytes)
                .context("failed to write downloaded document")?;
            file.flush()?;
            let pages = extract_pages(file.path())?;
            (bytes, pages)
        }
    };
    anyhow::ensure!(!pages.is_empty(), "{source} contains no extractable text");
    tracing::info!(%source, pages = pages.len(), bytes = bytes.len(), "loaded document");
    Ok(LoadedDocument {
        source: source.to_string(),
        checksum: crc32fast::hash(&bytes),
        pages,
    })
}

fn download(url: &Url, timeout: Duration) -> Result<Vec<u8>> {
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build download client")?;
    let resp = client
        .get(url.clone())
        .send()
        .with_context(|| format!("failed to fetch document {url}"))?;
    let status = resp.status();
    anyhow::ensure!(status.is_success(), "document {url} returned {status}");
    let bytes = resp
        .bytes()
        .with_context(|| format!("failed to read document body from {url}"))?;
    Ok(bytes.to_vec())
}

fn extract_pages(path: &Path) -> Result<Vec<DocumentPage>> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("document path {} is not valid UTF-8", path.display()))?;
    let mut doc = pdf_oxide::PdfDocument::open(path_str)
        .map_err(|err| anyhow!("failed to open PDF {}: {err}", path.display()))?;
    let page_count = doc
        .page_count()
        .map_err(|err| anyhow!("failed to count pages in {}: {err}", path.display()))?;
    let options = ConversionOptions {
        include_images: false,
        ..ConversionOptions::default()
    };
    let mut pages = Vec::new();
    for page_index in 0..page_count {
        let text = doc
            .to_markdown(page_index, &options)
            .map_err(|err| anyhow!("failed to extract page {}: {err}", page_index + 1))?;
        if text.trim().is_empty() {
            continue;
        }
        pages.push(DocumentPage {
            page_number: page_index + 1,
            text,
        });
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_remote_and_local_locations() {
        let remote = DocumentSource::parse("https://example.com/laws.pdf").unwrap();
        assert!(matches!(remote, DocumentSource::Remote(_)));
        let local = DocumentSource::parse(" ./data/laws.pdf ").unwrap();
        assert_eq!(local, DocumentSource::Local(PathBuf::from("./data/laws.pdf")));
        assert!(DocumentSource::parse("   ").is_err());
    }

    #[test]
    fn missing_local_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = DocumentSource::Local(dir.path().join("absent.pdf"));
        let err = load_document(&source, Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn page_checksum_tracks_content() {
        let page = |text: &str| DocumentPage {
            page_number: 1,
            text: text.to_string(),
        };
        let a = LoadedDocument::from_pages("mem", vec![page("alpha")]);
        let b = LoadedDocument::from_pages("mem", vec![page("alpha")]);
        let c = LoadedDocument::from_pages("mem", vec![page("beta")]);
        assert_eq!(a.checksum, b.checksum);
        assert_ne!(a.checksum, c.checksum);
        assert_eq!(a.char_count(), 5);
    }
}
