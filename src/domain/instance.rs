// ============================================================
// Layer 3 — Sentences, Corpora and Instances
// ============================================================
// Raw corpus rows (strings) and their indexed counterparts.
// An Instance is built once by the feature indexer and then
// consumed once per epoch by the training loop.

use serde::{Deserialize, Serialize};

/// One annotated sentence as read from a corpus file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedSentence {
    pub words: Vec<String>,
    pub tags: Vec<String>,
}

impl TaggedSentence {
    pub fn new(words: Vec<String>, tags: Vec<String>) -> Self {
        Self { words, tags }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// All sentences of one task, tagged with where they came from.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub source: String,
    pub sentences: Vec<TaggedSentence>,
}

impl Corpus {
    pub fn new(source: impl Into<String>, sentences: Vec<TaggedSentence>) -> Self {
        Self { source: source.into(), sentences }
    }

    pub fn token_count(&self) -> usize {
        self.sentences.iter().map(TaggedSentence::len).sum()
    }
}

/// An indexed sentence. `tags[i]` is `None` when the gold tag is not
/// in the task's tag vocabulary (unseen test tags, raw input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub words: Vec<usize>,
    pub chars: Vec<Vec<usize>>,
    pub tags: Vec<Option<usize>>,
}

impl Instance {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Indexed instances, the task each belongs to, and the original
/// strings needed to write predictions back out.
#[derive(Debug, Clone, Default)]
pub struct LabeledData {
    pub instances: Vec<Instance>,
    pub tasks: Vec<usize>,
    pub words: Vec<Vec<String>>,
    pub gold: Vec<Vec<String>>,
}

impl LabeledData {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn push(&mut self, instance: Instance, task: usize, sentence: TaggedSentence) {
        self.instances.push(instance);
        self.tasks.push(task);
        self.words.push(sentence.words);
        self.gold.push(sentence.tags);
    }

    /// Keeps only the first `n` entries.
    pub fn truncate(&mut self, n: usize) {
        self.instances.truncate(n);
        self.tasks.truncate(n);
        self.words.truncate(n);
        self.gold.truncate(n);
    }

    /// Entries belonging to `task`, in order.
    pub fn for_task(&self, task: usize) -> LabeledData {
        let mut out = LabeledData::default();
        for i in (0..self.len()).filter(|&i| self.tasks[i] == task) {
            out.instances.push(self.instances[i].clone());
            out.tasks.push(task);
            out.words.push(self.words[i].clone());
            out.gold.push(self.gold[i].clone());
        }
        out
    }

    /// Splits into parallel rows, e.g. for shuffling.
    pub fn into_rows(self) -> Vec<(Instance, usize, TaggedSentence)> {
        self.instances
            .into_iter()
            .zip(self.tasks)
            .zip(self.words.into_iter().zip(self.gold))
            .map(|((inst, task), (words, gold))| (inst, task, TaggedSentence::new(words, gold)))
            .collect()
    }

    pub fn from_rows(rows: Vec<(Instance, usize, TaggedSentence)>) -> Self {
        let mut out = LabeledData::default();
        for (inst, task, sentence) in rows {
            out.push(inst, task, sentence);
        }
        out
    }
}
