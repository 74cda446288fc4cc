//! Keyword FAQ table and best-match resolution.
//!
//! A query is scored against each record by counting how many of the
//! record's distinct keywords appear as substrings of the lowercased query.
//! The first record with the strictly highest non-zero score wins.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::storage::{load_values, save_records};

pub const FAQ_FILE: &str = "faqs.json";
pub const ANSWER_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
    /// May be empty for an image-only entry.
    #[serde(default, deserialize_with = "null_as_default")]
    pub answer: String,
    #[serde(rename = "image_url", default)]
    pub image_ref: Option<String>,
}

/// Hand-edited tables sometimes carry `null` where a value was left out.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl FaqRecord {
    /// Number of distinct keywords contained in `folded_query`, which must
    /// already be lowercased.
    pub fn score(&self, folded_query: &str) -> usize {
        let mut seen: Vec<String> = Vec::with_capacity(self.keywords.len());
        for keyword in &self.keywords {
            let keyword = keyword.trim().to_lowercase();
            if keyword.is_empty() || seen.contains(&keyword) {
                continue;
            }
            seen.push(keyword);
        }
        seen.iter()
            .filter(|keyword| folded_query.contains(keyword.as_str()))
            .count()
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.image_ref.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Split, trim, lowercase and de-duplicate keyword terms. Each term may
/// itself be a comma-separated list.
pub fn normalize_keywords<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for term in terms {
        for part in term.as_ref().split(',') {
            let keyword = part.trim().to_lowercase();
            if !keyword.is_empty() && !out.contains(&keyword) {
                out.push(keyword);
            }
        }
    }
    out
}

/// Pick the best record for `query`, scanning in storage order. Ties keep
/// the earlier record.
pub fn best_match<'a>(records: &'a [FaqRecord], query: &str) -> Option<&'a FaqRecord> {
    let folded = query.to_lowercase();
    let mut best: Option<&FaqRecord> = None;
    let mut best_score = 0;
    for record in records {
        let score = record.score(&folded);
        if score > best_score {
            best_score = score;
            best = Some(record);
        }
    }
    best
}

/// Durable FAQ table backed by a single JSON file.
pub struct FaqTable {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FaqTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Table at `<state_dir>/faqs.json`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(FAQ_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all readable records in storage order.
    pub async fn load(&self) -> Result<Vec<FaqRecord>> {
        let mut records = Vec::new();
        for value in load_values(&self.path).await? {
            match serde_json::from_value::<FaqRecord>(value.clone()) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping malformed FAQ record {value}: {e}"),
            }
        }
        Ok(records)
    }

    pub async fn save(&self, records: &[FaqRecord]) -> Result<()> {
        save_records(&self.path, records).await
    }

    /// Append a record and persist the table.
    pub async fn add_faq<I, S>(
        &self,
        keywords: I,
        answer: &str,
        image_ref: Option<&str>,
    ) -> Result<FaqRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = normalize_keywords(keywords);
        if keywords.is_empty() {
            return Err(StoreError::Validation(
                "at least one keyword is required".to_string(),
            ));
        }
        let record = FaqRecord {
            keywords,
            answer: answer.to_string(),
            image_ref: image_ref
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
        };

        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        records.push(record.clone());
        self.save(&records).await?;

        info!(
            "FAQ added: keywords={:?} image={}",
            record.keywords,
            record.image_ref.as_deref().unwrap_or("-")
        );
        Ok(record)
    }

    /// Resolve `query` against the current table contents.
    pub async fn resolve(&self, query: &str) -> Result<Option<FaqRecord>> {
        let records = self.load().await?;
        Ok(best_match(&records, query).cloned())
    }

    /// Snapshot of the table for display.
    pub async fn list_faqs(&self) -> Result<FaqListing> {
        Ok(FaqListing {
            records: self.load().await?,
        })
    }
}

/// Read-only snapshot of the FAQ table, rendered as Telegram HTML.
#[derive(Debug, Clone, Default)]
pub struct FaqListing {
    records: Vec<FaqRecord>,
}

impl FaqListing {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One formatted block per record, 1-indexed. Can be iterated any
    /// number of times.
    pub fn entries(&self) -> impl Iterator<Item = String> + '_ {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| format_entry(i + 1, record))
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<b>FAQ list:</b>\n\n");
        for entry in self.entries() {
            out.push_str(&entry);
            out.push('\n');
        }
        out
    }
}

fn format_entry(index: usize, record: &FaqRecord) -> String {
    let keywords = if record.keywords.is_empty() {
        "-".to_string()
    } else {
        escape_html(&record.keywords.join(", "))
    };
    let answer = if record.answer.trim().is_empty() {
        "-".to_string()
    } else {
        truncate_chars(&record.answer, ANSWER_PREVIEW_CHARS)
    };

    let mut out = format!(
        "<b>{index}.</b> <b>Keyword(s):</b> {keywords}\n   <b>Answer:</b> {answer}\n"
    );
    if let Some(url) = record.image_ref() {
        out.push_str(&format!(
            "   <b>Image:</b> <a href='{}'>Image link</a>\n",
            escape_html(url)
        ));
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let truncated: String = text.chars().take(max).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
