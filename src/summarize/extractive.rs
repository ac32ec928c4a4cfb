// src/summarize/extractive.rs
//! Offline summarizer: leading sentences of the item's own text.
//! Deterministic and network-free, meant for dry runs.

use async_trait::async_trait;

use super::{clean_markdown, Summarizer};
use crate::config::SummarizerConfig;
use crate::error::SummarizationFailed;
use crate::model::{SourceKind, TrendingItem};

pub struct ExtractiveSummarizer {
    max_words: usize,
}

impl ExtractiveSummarizer {
    pub fn new(cfg: &SummarizerConfig) -> Self {
        Self {
            // Extracts are kept much shorter than model summaries.
            max_words: (cfg.max_words as usize / 4).max(20),
        }
    }
}

/// Whole sentences from the start of `text` until `max_words` would be exceeded.
/// The first sentence is always kept (cut at `max_words` if it alone is longer).
pub fn lead_sentences(text: &str, max_words: usize) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut words = 0usize;
    for sentence in split_sentences(text) {
        let n = sentence.split_whitespace().count();
        if !out.is_empty() && words + n > max_words {
            break;
        }
        out.push(sentence);
        words += n;
    }
    let joined = out.join(" ");
    if words > max_words {
        let mut cut: Vec<&str> = joined.split_whitespace().take(max_words).collect();
        if let Some(last) = cut.last_mut() {
            *last = last.trim_end_matches(['.', ',', ';', ':']);
        }
        return format!("{}…", cut.join(" "));
    }
    joined
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text.trim();
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .char_indices()
            .find(|&(i, c)| {
                matches!(c, '.' | '!' | '?')
                    && rest[i + c.len_utf8()..]
                        .chars()
                        .next()
                        .map_or(true, char::is_whitespace)
            })
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(end);
        rest = tail.trim_start();
        Some(head.trim())
    })
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn summarize(&self, item: &TrendingItem) -> Result<String, SummarizationFailed> {
        let text = match item.source_kind {
            SourceKind::Paper => item.meta_str("abstract").map(str::to_string),
            SourceKind::Repo => item
                .meta_str("description")
                .filter(|d| *d != super::NO_DESCRIPTION)
                .map(str::to_string)
                .or_else(|| item.meta_str("readme").map(clean_markdown)),
        };
        text.map(|t| lead_sentences(&t, self.max_words))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SummarizationFailed::invalid_response("item has no text"))
    }

    async fn condense(&self, digest: &str) -> Result<String, SummarizationFailed> {
        let lines: Vec<String> = digest
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| lead_sentences(l, 40))
            .collect();
        if lines.is_empty() {
            return Err(SummarizationFailed::invalid_response("nothing to condense"));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_whole_leading_sentences() {
        let t = "One two three. Four five six! Seven eight nine ten eleven.";
        assert_eq!(lead_sentences(t, 6), "One two three. Four five six!");
        assert_eq!(lead_sentences(t, 100), t);
    }

    #[test]
    fn overlong_first_sentence_is_cut() {
        let t = "a b c d e f g.";
        assert_eq!(lead_sentences(t, 3), "a b c…");
    }

    #[test]
    fn version_numbers_do_not_split_sentences() {
        let t = "Supports v1.2 and more. Next.";
        assert_eq!(lead_sentences(t, 4), "Supports v1.2 and more.");
    }

    #[tokio::test]
    async fn summarizes_paper_abstract() {
        let s = ExtractiveSummarizer::new(&SummarizerConfig::default());
        let item = TrendingItem::new(SourceKind::Paper, "arxiv:1", "T")
            .with_meta("abstract", "We propose X. It is fast.");
        assert_eq!(s.summarize(&item).await.unwrap(), "We propose X. It is fast.");

        let empty = TrendingItem::new(SourceKind::Paper, "arxiv:2", "T");
        let err = s.summarize(&empty).await.unwrap_err();
        assert_eq!(err.reason, crate::error::FailureReason::InvalidResponse);
    }
}
