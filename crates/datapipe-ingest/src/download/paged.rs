//! Article tables scraped into CSV files
//!
//! The page is fetched through the rate-limited client, every `<table>` is
//! indexed in document order, and the configured indices are written as
//! `;`-separated CSV files. Footnote markers such as `[3]` are stripped from
//! cells and resolved against the page's reference list into two extra
//! columns.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::ResourceFetcher;
use crate::error::FetchError;
use crate::fetch::RetryingFetcher;
use crate::resource::ResourceDescriptor;

#[allow(clippy::unwrap_used)]
static FOOTNOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

pub const REFERENCE_NAMES_COLUMN: &str = "reference_names";
pub const REFERENCE_LINKS_COLUMN: &str = "reference_links";
pub const IMAGE_COLUMN: &str = "image_filename";

/// How cells of a table are turned into columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extractor {
    /// Cell text only
    Plain,
    /// Cell text plus the file name of the first image in the row
    WithImages,
}

impl Extractor {
    fn from_id(id: Option<&str>) -> Self {
        match id.map(str::to_lowercase).as_deref() {
            Some(id) if id.contains("image") || id.contains("monument") => Extractor::WithImages,
            _ => Extractor::Plain,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Reference {
    name: String,
    link: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ExtractedTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Fetches a wiki page and extracts selected tables
#[derive(Debug, Clone)]
pub struct PagedDocumentFetcher {
    http: RetryingFetcher,
    base_url: String,
}

impl PagedDocumentFetcher {
    pub fn new(http: RetryingFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn page_url(&self, page_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), page_name)
    }
}

#[async_trait]
impl ResourceFetcher for PagedDocumentFetcher {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let ResourceDescriptor::PagedDocument(page) = resource else {
            return Err(FetchError::UnsupportedResource(resource.kind()));
        };
        if page.table_indices.len() != page.table_filenames.len() {
            return Err(FetchError::Document(format!(
                "{} table indices but {} file names",
                page.table_indices.len(),
                page.table_filenames.len()
            )));
        }

        let url = self.page_url(&page.page_name);
        tracing::info!(url = %url, "Downloading wiki page");
        let html = self
            .http
            .get(&url)
            .await?
            .text()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;

        let mut written = Vec::with_capacity(page.table_indices.len());
        for (pos, (index, filename)) in page
            .table_indices
            .iter()
            .zip(&page.table_filenames)
            .enumerate()
        {
            let extractor = Extractor::from_id(page.extractor_ids.get(pos).map(String::as_str));
            let table = extract_table(&html, *index, extractor)?;
            let target = out_dir.join(filename);
            write_csv(&table, &target)?;
            tracing::info!(table = index, rows = table.rows.len(), path = %target.display(), "Extracted table");
            written.push(target);
        }
        Ok(written)
    }
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Document(format!("bad selector {css}: {e}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_references(doc: &Html) -> Result<Vec<Reference>, FetchError> {
    let items = selector("ol.references > li")?;
    let links = selector("a")?;
    Ok(doc
        .select(&items)
        .map(|li| {
            let mut name = cell_text(li).trim_start_matches('↑').trim().to_string();
            let mut link = String::new();
            for a in li.select(&links) {
                let href = a.value().attr("href").unwrap_or_default();
                let external = a.value().classes().any(|c| c == "external");
                if external || href.contains("wiki") {
                    let text = cell_text(a);
                    if !text.contains("ISBN") {
                        name = text;
                    }
                    link = if href.starts_with("/wiki") {
                        format!("https://de.wikipedia.org{href}")
                    } else {
                        href.to_string()
                    };
                }
            }
            Reference { name, link }
        })
        .collect())
}

fn extract_table(html: &str, index: usize, extractor: Extractor) -> Result<ExtractedTable, FetchError> {
    let doc = Html::parse_document(html);
    let tables = selector("table")?;
    let tr = selector("tr")?;
    let th = selector("th")?;
    let td = selector("td")?;
    let cells = selector("th, td")?;
    let img = selector("img")?;

    let references = extract_references(&doc)?;
    let table = doc.select(&tables).nth(index).ok_or_else(|| {
        FetchError::Document(format!("page has no table at index {index}"))
    })?;

    let mut header: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for row in table.select(&tr) {
        let is_header = row.select(&th).next().is_some() && row.select(&td).next().is_none();
        let texts: Vec<String> = row.select(&cells).map(cell_text).collect();
        if is_header && header.is_empty() {
            header = texts;
            continue;
        }
        if texts.iter().all(String::is_empty) {
            continue;
        }
        let image = row
            .select(&img)
            .next()
            .and_then(|i| i.value().attr("src"))
            .map(image_file_name)
            .unwrap_or_default();
        rows.push((texts, image));
    }

    if header.is_empty() {
        let width = rows.iter().map(|(r, _)| r.len()).max().unwrap_or(0);
        header = (0..width).map(|i| format!("column_{i}")).collect();
    }
    let width = header.len();
    if extractor == Extractor::WithImages {
        header.push(IMAGE_COLUMN.to_string());
    }
    header.push(REFERENCE_NAMES_COLUMN.to_string());
    header.push(REFERENCE_LINKS_COLUMN.to_string());

    let rows = rows
        .into_iter()
        .map(|(mut texts, image)| {
            texts.resize(width, String::new());
            let (mut names, mut links) = (String::new(), String::new());
            for cell in texts.iter_mut() {
                for cap in FOOTNOTE.captures_iter(cell) {
                    let resolved = cap[1]
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|n| references.get(n));
                    if let Some(reference) = resolved {
                        names.push_str(&reference.name);
                        names.push(';');
                        links.push_str(&reference.link);
                        links.push(';');
                    }
                }
                *cell = FOOTNOTE.replace_all(cell, "").trim().to_string();
            }
            if extractor == Extractor::WithImages {
                texts.push(image);
            }
            texts.push(names);
            texts.push(links);
            texts
        })
        .collect();

    Ok(ExtractedTable { header, rows })
}

fn image_file_name(src: &str) -> String {
    let last = src.rsplit('/').next().unwrap_or(src);
    // Thumbnails are named "<width>px-<file>"
    match last.split_once("px-") {
        Some((_, name)) => name.to_string(),
        None => last.to_string(),
    }
}

fn write_csv(table: &ExtractedTable, path: &Path) -> Result<(), FetchError> {
    let to_fetch_err = |e: csv::Error| FetchError::Document(format!("CSV write to {}: {e}", path.display()));
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .map_err(to_fetch_err)?;
    writer.write_record(&table.header).map_err(to_fetch_err)?;
    for row in &table.rows {
        writer.write_record(row).map_err(to_fetch_err)?;
    }
    writer.flush().map_err(|e| FetchError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fetch::RetryPolicy;
    use crate::resource::{PagedDocument, ResourceMeta};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><body>
<table><tr><td>navigation</td></tr></table>
<table class="wikitable">
  <tr><th>Name</th><th>Baujahr</th></tr>
  <tr><td>Fruchthalle <img src="//upload/thumb/a/ab/Fruchthalle.jpg/120px-Fruchthalle.jpg"></td><td>1846[1]</td></tr>
  <tr><td>Stiftskirche</td><td>13. Jh.</td></tr>
</table>
<ol class="references"><li>↑ <span class="reference-text"><a class="external" href="https://example.org/src">Denkmalliste</a></span></li></ol>
</body></html>"#;

    #[test]
    fn test_extract_table_with_references_and_images() {
        let table = extract_table(PAGE, 1, Extractor::WithImages).unwrap();
        assert_eq!(
            table.header,
            vec!["Name", "Baujahr", IMAGE_COLUMN, REFERENCE_NAMES_COLUMN, REFERENCE_LINKS_COLUMN]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][1], "1846");
        assert_eq!(table.rows[0][2], "Fruchthalle.jpg");
        assert_eq!(table.rows[0][3], "Denkmalliste;");
        assert_eq!(table.rows[0][4], "https://example.org/src;");
        assert_eq!(table.rows[1][3], "");
    }

    #[test]
    fn test_missing_table_index() {
        let err = extract_table(PAGE, 7, Extractor::Plain).unwrap_err();
        assert!(matches!(err, FetchError::Document(_)));
    }

    #[tokio::test]
    async fn test_fetch_writes_one_csv_per_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki/Liste_der_Kulturdenkmaeler"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            politeness_delay: Duration::from_millis(1),
            backoff: vec![],
        };
        let fetcher = PagedDocumentFetcher::new(
            RetryingFetcher::new(reqwest::Client::new(), policy),
            format!("{}/wiki", server.uri()),
        );
        let resource = ResourceDescriptor::PagedDocument(PagedDocument {
            meta: ResourceMeta::new("wiki-monuments", "wiki_monuments"),
            page_name: "Liste_der_Kulturdenkmaeler".into(),
            table_indices: vec![1],
            table_filenames: vec!["monuments.csv".into()],
            extractor_ids: vec!["MonumentTableExtractor".into()],
        });
        let dir = tempfile::tempdir().unwrap();
        let paths = fetcher.fetch(&resource, dir.path()).await.unwrap();
        let content = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(content.starts_with("Name;Baujahr;image_filename;"));
        assert_eq!(content.lines().count(), 3);
    }
}
