use crate::artifacts::write_atomic;
use crate::record::{canonical_column, EmailRecord, Label};
use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// One input corpus file plus its provenance. The label comes from here —
/// an explicit tag on the configured source — never from the filename.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub label: Label,
}

/// Read every configured source CSV, normalize its column names to the
/// canonical schema, and stamp each row with its source's provenance label.
pub fn merge_sources(sources: &[SourceSpec]) -> Result<Vec<EmailRecord>> {
    let mut merged = Vec::new();
    for source in sources {
        let records = read_source(source)
            .with_context(|| format!("failed to load source {}", source.path.display()))?;
        log::info!(
            "loaded {} rows from {} (label {})",
            records.len(),
            source.path.display(),
            source.label.as_u8()
        );
        merged.extend(records);
    }
    if merged.is_empty() {
        bail!("no rows loaded from any configured source");
    }
    Ok(merged)
}

fn read_source(source: &SourceSpec) -> Result<Vec<EmailRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(&source.path)?;

    // Map canonical column name -> position in this source's header.
    let mut columns: HashMap<&'static str, usize> = HashMap::new();
    for (idx, name) in reader.headers()?.iter().enumerate() {
        if let Some(canonical) = canonical_column(name) {
            columns.entry(canonical).or_insert(idx);
        }
    }
    for required in ["sender", "subject", "body"] {
        if !columns.contains_key(required) {
            bail!(
                "source {} is missing a required column mapping to '{}'",
                source.path.display(),
                required
            );
        }
    }

    let field = |record: &csv::StringRecord, name: &str| -> String {
        columns
            .get(name)
            .and_then(|&idx| record.get(idx))
            .unwrap_or("")
            .to_string()
    };
    let optional = |record: &csv::StringRecord, name: &str| -> Option<String> {
        let value = field(record, name);
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    };

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let urls = field(&row, "urls")
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        records.push(EmailRecord {
            sender: field(&row, "sender"),
            subject: field(&row, "subject"),
            body: field(&row, "body"),
            date: optional(&row, "date"),
            reply_to: optional(&row, "reply_to"),
            message_id: optional(&row, "message_id"),
            content_type: field(&row, "content_type"),
            has_attachment: matches!(field(&row, "has_attachment").trim(), "1" | "true" | "True"),
            urls,
            label: Some(source.label),
        });
    }
    Ok(records)
}

fn report_drop(step: &str, before: &[EmailRecord], after: &[EmailRecord]) {
    let phish = |records: &[EmailRecord]| {
        records
            .iter()
            .filter(|r| r.label == Some(Label::Phishing))
            .count()
    };
    log::info!(
        "{step}: dropped {} rows ({} phishing)",
        before.len() - after.len(),
        phish(before) - phish(after)
    );
}

/// Clean the merged table: drop unusable rows, deduplicate by content
/// identity, normalize subject/body exactly once, and shuffle with the
/// given seed. Fails if nothing survives.
pub fn clean(records: Vec<EmailRecord>, seed: u64) -> Result<Vec<EmailRecord>> {
    let html_tag = Regex::new(r"<[^>]+>").unwrap();
    log::info!("cleaning {} merged rows", records.len());

    let before = records.clone();
    let records: Vec<EmailRecord> = records
        .into_iter()
        .filter(|r| !r.subject.is_empty() && !r.body.is_empty() && r.label.is_some())
        .collect();
    report_drop("drop rows with missing subject, body, or label", &before, &records);

    let before = records.clone();
    let mut seen = HashSet::new();
    let records: Vec<EmailRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.content_key()))
        .collect();
    report_drop("remove duplicate emails", &before, &records);

    let before = records.clone();
    let records: Vec<EmailRecord> = records
        .into_iter()
        .filter(|r| !r.subject.trim().is_empty() && !r.body.trim().is_empty())
        .collect();
    report_drop("remove blank subject or body", &before, &records);

    // The single normalization pass. Nothing downstream re-normalizes.
    let mut records = records;
    for record in &mut records {
        record.subject = normalize_text(&html_tag, &record.subject);
        record.body = normalize_text(&html_tag, &record.body);
    }
    log::info!("normalized subject and body text");

    let before = records.clone();
    let records: Vec<EmailRecord> = records
        .into_iter()
        .filter(|r| r.body.chars().count() > 10)
        .collect();
    report_drop("remove emails with very short body", &before, &records);

    if records.is_empty() {
        bail!("corpus is empty after cleaning");
    }

    let mut records = records;
    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    log::info!(
        "cleaned corpus: {} rows, {} phishing",
        records.len(),
        records
            .iter()
            .filter(|r| r.label == Some(Label::Phishing))
            .count()
    );
    Ok(records)
}

fn normalize_text(html_tag: &Regex, text: &str) -> String {
    let stripped = html_tag.replace_all(text, " ");
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Persist the canonical corpus checkpoint.
pub fn write_corpus_csv(records: &[EmailRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(crate::record::CANONICAL_COLUMNS)?;
    for record in records {
        let label = record
            .label
            .map(|l| l.as_u8().to_string())
            .unwrap_or_default();
        writer.write_record(&[
            record.sender.as_str(),
            record.subject.as_str(),
            record.body.as_str(),
            record.date.as_deref().unwrap_or(""),
            record.reply_to.as_deref().unwrap_or(""),
            record.message_id.as_deref().unwrap_or(""),
            record.content_type.as_str(),
            if record.has_attachment { "1" } else { "0" },
            record.urls.join(" ").as_str(),
            label.as_str(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush corpus CSV: {e}"))?;
    write_atomic(path, &bytes)
}

/// Load a canonical corpus checkpoint written by `write_corpus_csv`.
pub fn read_corpus_csv(path: &Path) -> Result<Vec<EmailRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open corpus {}", path.display()))?;
    let header = reader.headers()?.clone();
    let expected: Vec<&str> = crate::record::CANONICAL_COLUMNS.to_vec();
    let found: Vec<&str> = header.iter().collect();
    if found != expected {
        bail!(
            "corpus {} does not have the canonical column layout",
            path.display()
        );
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let get = |i: usize| row.get(i).unwrap_or("").to_string();
        let opt = |i: usize| {
            let v = get(i);
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        };
        let label = match row.get(9).unwrap_or("") {
            "" => None,
            raw => {
                let value: u8 = raw
                    .parse()
                    .with_context(|| format!("invalid label value '{raw}'"))?;
                Some(Label::from_u8(value).context("label must be 0 or 1")?)
            }
        };
        records.push(EmailRecord {
            sender: get(0),
            subject: get(1),
            body: get(2),
            date: opt(3),
            reply_to: opt(4),
            message_id: opt(5),
            content_type: get(6),
            has_attachment: get(7) == "1",
            urls: get(8).split_whitespace().map(|s| s.to_string()).collect(),
            label,
        });
    }
    Ok(records)
}
