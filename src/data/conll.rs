// ============================================================
// Layer 4 — Corpus Readers
// ============================================================
// Reads annotated sentences from disk. Three formats:
//
//   CoNLL   — `token<TAB>tag` per line, blank line between
//             sentences, last sentence may lack the blank line
//   CoNLL-U — 10 tab-separated columns; FORM (col 2) and UPOS
//             (col 4) are kept, comments and multiword ranges
//             are skipped
//   Raw     — one whitespace-tokenised sentence per line, every
//             tag is the DUMMY placeholder
//
// A malformed CoNLL row is fatal.

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::domain::error::TaggerError;
use crate::domain::instance::{Corpus, TaggedSentence};
use crate::domain::traits::CorpusSource;

/// Tag given to every token read in raw mode.
pub const DUMMY_TAG: &str = "DUMMY";

fn read_file(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Cannot read corpus '{}'", path.display()))
}

// ─── CoNLL ────────────────────────────────────────────────────────────────────
/// Two-column `token<TAB>tag` reader.
pub struct ConllReader {
    path: PathBuf,
}

impl ConllReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CorpusSource for ConllReader {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read_sentences(&self) -> Result<Vec<TaggedSentence>> {
        let text = read_file(&self.path)?;
        parse_conll(&text, &self.name())
    }
}

/// Parse two-column CoNLL text. `source_name` only feeds diagnostics.
pub fn parse_conll(text: &str, source_name: &str) -> Result<Vec<TaggedSentence>> {
    let mut sentences = Vec::new();
    let mut words = Vec::new();
    let mut tags = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() {
            if !words.is_empty() {
                sentences.push(TaggedSentence::new(
                    std::mem::take(&mut words),
                    std::mem::take(&mut tags),
                ));
            }
            continue;
        }

        let mut cols = line.split('\t');
        match (cols.next(), cols.next(), cols.next()) {
            (Some(word), Some(tag), None) => {
                words.push(word.to_string());
                tags.push(tag.to_string());
            }
            _ => {
                return Err(TaggerError::MalformedRow {
                    source_name: source_name.to_string(),
                    line: idx + 1,
                    content: line.to_string(),
                }
                .into());
            }
        }
    }

    if !words.is_empty() {
        sentences.push(TaggedSentence::new(words, tags));
    }

    tracing::debug!("Read {} sentences from {}", sentences.len(), source_name);
    Ok(sentences)
}

// ─── Raw text ─────────────────────────────────────────────────────────────────
/// One sentence per line, no gold tags.
pub struct RawReader {
    path: PathBuf,
}

impl RawReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CorpusSource for RawReader {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read_sentences(&self) -> Result<Vec<TaggedSentence>> {
        Ok(parse_raw(&read_file(&self.path)?))
    }
}

pub fn parse_raw(text: &str) -> Vec<TaggedSentence> {
    text.lines()
        .map(|line| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|words| !words.is_empty())
        .map(|words| {
            let tags = vec![DUMMY_TAG.to_string(); words.len()];
            TaggedSentence::new(words, tags)
        })
        .collect()
}

// ─── CoNLL-U ──────────────────────────────────────────────────────────────────
/// Universal Dependencies reader keeping FORM and UPOS.
pub struct ConllUReader {
    path: PathBuf,
}

impl ConllUReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CorpusSource for ConllUReader {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read_sentences(&self) -> Result<Vec<TaggedSentence>> {
        Ok(parse_conllu(&read_file(&self.path)?))
    }
}

pub fn parse_conllu(text: &str) -> Vec<TaggedSentence> {
    let mut sentences = Vec::new();
    let mut words = Vec::new();
    let mut tags = Vec::new();

    for line in text.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        if line.trim().is_empty() {
            if !words.is_empty() {
                sentences.push(TaggedSentence::new(
                    std::mem::take(&mut words),
                    std::mem::take(&mut tags),
                ));
            }
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        // multiword token ranges like "3-4" carry no tag of their own
        if cols.len() == 10 && !cols[0].contains('-') {
            words.push(cols[1].to_string());
            tags.push(cols[3].to_string());
        }
    }

    if !words.is_empty() {
        sentences.push(TaggedSentence::new(words, tags));
    }
    sentences
}

/// Read a whole corpus, picking the reader by flag and file extension.
pub fn read_corpus(path: impl Into<PathBuf>, raw: bool) -> Result<Corpus> {
    let path = path.into();
    let source: Box<dyn CorpusSource> = if raw {
        Box::new(RawReader::new(path))
    } else if path.extension().and_then(|e| e.to_str()) == Some("conllu") {
        Box::new(ConllUReader::new(path))
    } else {
        Box::new(ConllReader::new(path))
    };
    let sentences = source.read_sentences()?;
    Ok(Corpus::new(source.name(), sentences))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_lines_separate_sentences() {
        let text = "The\tDET\ndog\tNOUN\n\nRuns\tVERB\n";
        let s = parse_conll(text, "mem").unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].words, vec!["The", "dog"]);
        assert_eq!(s[1].tags, vec!["VERB"]);
    }

    #[test]
    fn test_repeated_blank_lines_are_ignored() {
        let s = parse_conll("\n\na\tX\n\n\n\nb\tY", "mem").unwrap();
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_missing_tag_is_fatal() {
        let err = parse_conll("a\tX\nlonely\n", "train.conll").unwrap_err();
        match err.downcast_ref::<TaggerError>() {
            Some(TaggerError::MalformedRow { line, source_name, .. }) => {
                assert_eq!(*line, 2);
                assert_eq!(source_name, "train.conll");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extra_column_is_fatal() {
        assert!(parse_conll("a\tX\tY\n", "mem").is_err());
    }

    #[test]
    fn test_raw_lines_get_dummy_tags() {
        let s = parse_raw("hello  world\n\nbye\n");
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].words, vec!["hello", "world"]);
        assert!(s[0].tags.iter().all(|t| t == DUMMY_TAG));
    }

    #[test]
    fn test_conllu_skips_comments_and_ranges() {
        let text = "# sent_id = 1\n\
                    1-2\tdu\t_\t_\t_\t_\t_\t_\t_\t_\n\
                    1\tde\tde\tADP\t_\t_\t_\t_\t_\t_\n\
                    2\tle\tle\tDET\t_\t_\t_\t_\t_\t_\n\
                    \n";
        let s = parse_conllu(text);
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].words, vec!["de", "le"]);
        assert_eq!(s[0].tags, vec!["ADP", "DET"]);
    }
}
