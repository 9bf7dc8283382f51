//! Versioned decoders that turn the manifest document into ordered rows.

use lmr_core::ManifestRow;
use scraper::{Html, Selector};

use crate::normalize::strip_footnotes;
use crate::{AdapterError, RawManifest};

pub const DEFAULT_MANIFEST_SELECTOR: &str = "body > div.content > div > div > table:nth-child(7) > tbody";

pub trait TableDecoder: Send + Sync {
    /// Identifies the upstream layout this decoder understands. Reported with
    /// every layout failure so drift is attributable to one decoder.
    fn schema_version(&self) -> &'static str;

    fn decode(&self, manifest: &RawManifest) -> Result<Vec<ManifestRow>, AdapterError>;
}

/// Position of the columns the reconciler reads within one flattened entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideLayout {
    pub stride: usize,
    pub date: usize,
    pub site: usize,
    pub payload: usize,
}

impl StrideLayout {
    /// date, vehicle, site, orbit, mass, payload, customer
    pub const WIKI_V1: Self = Self {
        stride: 7,
        date: 0,
        site: 2,
        payload: 5,
    };
}

/// Decoder for the community launch manifest wiki table: every cell is one
/// text line and each entry spans a fixed number of lines.
#[derive(Debug, Clone)]
pub struct WikiStrideDecoder {
    selector: String,
    layout: StrideLayout,
}

impl WikiStrideDecoder {
    pub const SCHEMA_VERSION: &'static str = "wiki-stride/v1";

    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            layout: StrideLayout::WIKI_V1,
        }
    }

    fn layout_error(&self, message: String) -> AdapterError {
        AdapterError::Layout {
            schema: Self::SCHEMA_VERSION,
            message,
        }
    }

    pub fn decode_lines(&self, lines: &[String]) -> Result<Vec<ManifestRow>, AdapterError> {
        let stride = self.layout.stride;
        if lines.is_empty() {
            return Err(self.layout_error(format!("table at {:?} has no text", self.selector)));
        }
        if lines.len() % stride != 0 {
            return Err(self.layout_error(format!(
                "{} lines do not split into {stride}-line entries",
                lines.len()
            )));
        }

        Ok(lines
            .chunks_exact(stride)
            .enumerate()
            .map(|(index, entry)| ManifestRow {
                index,
                raw_date: entry[self.layout.date].clone(),
                payload: strip_footnotes(&entry[self.layout.payload]),
                site: strip_footnotes(&entry[self.layout.site]),
            })
            .collect())
    }
}

impl Default for WikiStrideDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST_SELECTOR)
    }
}

impl TableDecoder for WikiStrideDecoder {
    fn schema_version(&self) -> &'static str {
        Self::SCHEMA_VERSION
    }

    fn decode(&self, manifest: &RawManifest) -> Result<Vec<ManifestRow>, AdapterError> {
        let lines = extract_table_lines(&manifest.body, &self.selector)?;
        self.decode_lines(&lines)
    }
}

/// Flatten the text of the first element matching `selector` into trimmed,
/// non-empty lines.
pub fn extract_table_lines(html: &str, selector: &str) -> Result<Vec<String>, AdapterError> {
    let sel = Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })?;
    let document = Html::parse_document(html);
    let Some(table) = document.select(&sel).next() else {
        return Err(AdapterError::Layout {
            schema: WikiStrideDecoder::SCHEMA_VERSION,
            message: format!("selector {selector:?} matched nothing"),
        });
    };
    Ok(table
        .text()
        .collect::<String>()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
