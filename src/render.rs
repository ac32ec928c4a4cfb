// src/render.rs
//! Report -> (JSON document, Markdown document), and writing both to disk.
//!
//! Rendering is pure: the same Report always renders to the same bytes.
//! Artifacts are addressed by report date and overwritten on regeneration.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Report, SectionStatus, SourceKind, SummarizedItem, SummaryStatus};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    report: &'a Report,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    report: Report,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid report document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported report format version {0}")]
    Version(u32),
}

/// Both documents for one report.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub report_date: NaiveDate,
    pub partial: bool,
    pub item_count: usize,
    pub structured: String,
    pub human: String,
}

pub fn render(report: &Report) -> Result<RenderedReport, serde_json::Error> {
    let mut structured = serde_json::to_string_pretty(&EnvelopeRef {
        version: FORMAT_VERSION,
        report,
    })?;
    structured.push('\n');
    Ok(RenderedReport {
        report_date: report.report_date,
        partial: report.partial,
        item_count: report.item_count(),
        structured,
        human: render_markdown(report),
    })
}

/// Read a structured document back into a Report.
pub fn parse_structured(doc: &str) -> Result<Report, ParseError> {
    let header: VersionHeader = serde_json::from_str(doc)?;
    if header.version != FORMAT_VERSION {
        return Err(ParseError::Version(header.version));
    }
    let env: Envelope = serde_json::from_str(doc)?;
    Ok(env.report)
}

fn kind_heading(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Repo => "repositories",
        SourceKind::Paper => "papers",
    }
}

/// Backslash-escape characters that would otherwise open links or emphasis.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '`' | '*' | '_' | '[' | ']' | '(' | ')' | '#') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Link targets cannot carry spaces or parentheses unencoded.
fn link_target(url: &str) -> String {
    url.replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29")
}

fn placeholder(item: &SummarizedItem) -> String {
    match (item.summary_status, item.failure_reason) {
        (SummaryStatus::Failed, Some(reason)) => format!(
            "_Summary unavailable ({} after {} attempt{})._",
            escape_markdown(reason.as_str()),
            item.attempts,
            if item.attempts == 1 { "" } else { "s" }
        ),
        (SummaryStatus::Failed, None) => "_Summary unavailable._".to_string(),
        _ => "_No summary for this item._".to_string(),
    }
}

fn detail_line(item: &SummarizedItem) -> Option<String> {
    let it = &item.item;
    let mut parts = Vec::new();
    match it.source_kind {
        SourceKind::Repo => {
            if let Some(lang) = it.meta_str("language") {
                parts.push(escape_markdown(lang));
            }
            if let Some(n) = it.raw_metadata.get("stars").and_then(|v| v.as_u64()) {
                parts.push(format!("★ {n}"));
            }
            if let Some(n) = it.raw_metadata.get("stars_today").and_then(|v| v.as_u64()) {
                parts.push(format!("+{n} today"));
            }
        }
        SourceKind::Paper => {
            if let Some(authors) = it.raw_metadata.get("authors").and_then(|v| v.as_array()) {
                let names: Vec<String> = authors
                    .iter()
                    .filter_map(|a| a.as_str())
                    .map(escape_markdown)
                    .collect();
                match names.len() {
                    0 => {}
                    1..=3 => parts.push(names.join(", ")),
                    _ => parts.push(format!("{} et al.", names[0])),
                }
            }
            if let Some(p) = it.meta_str("published") {
                parts.push(p.to_string());
            }
        }
    }
    (!parts.is_empty()).then(|| parts.join(" · "))
}

pub fn render_markdown(report: &Report) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Trending digest for {}", report.report_date.format("%Y-%m-%d"));
    let _ = writeln!(
        md,
        "\n_Generated {}_",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );

    if report.partial {
        let missing = report.items().filter(|i| !i.is_ok()).count();
        let _ = writeln!(
            md,
            "\n> **Partial report:** {} source(s) unavailable, {} item(s) without summary.",
            report.unavailable_sources(),
            missing
        );
    }

    if let Some(tldr) = report.tldr.as_deref() {
        let _ = writeln!(md, "\n## TL;DR\n\n{}", tldr.trim());
    }

    for section in &report.sections {
        let _ = writeln!(
            md,
            "\n## {} ({})",
            section.source,
            kind_heading(section.source_kind)
        );
        if section.status == SectionStatus::Unavailable {
            let _ = writeln!(
                md,
                "\n_Source unavailable: {}_",
                escape_markdown(section.error.as_deref().unwrap_or("unknown error"))
            );
            continue;
        }
        if section.items.is_empty() {
            let _ = writeln!(md, "\n_No items today._");
            continue;
        }
        for item in &section.items {
            let _ = writeln!(
                md,
                "\n### {}. [{}]({})",
                item.item.rank,
                escape_markdown(&item.item.title),
                link_target(item.item.link())
            );
            if let Some(details) = detail_line(item) {
                let _ = writeln!(md, "\n{details}");
            }
            let body = match (item.summary_status, item.summary_text.as_deref()) {
                (SummaryStatus::Ok, Some(text)) => text.trim().to_string(),
                _ => placeholder(item),
            };
            let _ = writeln!(md, "\n{body}");
        }
    }
    md
}

// ---------- artifacts ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub structured: PathBuf,
    pub human: PathBuf,
}

pub fn artifact_paths(dir: &Path, date: NaiveDate) -> ArtifactPaths {
    let stem = date.format("%Y%m%d").to_string();
    ArtifactPaths {
        structured: dir.join(format!("{stem}.json")),
        human: dir.join(format!("{stem}.md")),
    }
}

/// Write both documents, replacing any earlier render for the same date.
pub fn write_artifacts(dir: &Path, rendered: &RenderedReport) -> io::Result<ArtifactPaths> {
    fs::create_dir_all(dir)?;
    let paths = artifact_paths(dir, rendered.report_date);
    write_atomic(&paths.structured, rendered.structured.as_bytes())?;
    write_atomic(&paths.human, rendered.human.as_bytes())?;
    Ok(paths)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(&tmp, path)
}
