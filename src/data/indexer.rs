// ============================================================
// Layer 4 — Feature Indexer
// ============================================================
// Turns string corpora into integer instances.
//
// Training corpora (one per task, in task order):
//   1. optionally count word frequencies over every corpus and
//      freeze a capped word vocabulary (most frequent K-1 words,
//      ties by first occurrence)
//   2. walk each corpus, assigning word / char / tag ids in
//      first-seen order (words only when uncapped)
//   3. record which task every instance belongs to
//
// Test and dev corpora are indexed against frozen vocabularies:
// unseen words and chars map to the unknown id, unseen tags to None.

use std::collections::HashMap;

use crate::domain::error::TaggerError;
use crate::domain::instance::{Corpus, Instance, LabeledData, TaggedSentence};
use crate::domain::vocab::{Task, Vocabulary};

/// Vocabularies, tasks and instances produced from the training corpora.
#[derive(Debug, Clone)]
pub struct IndexedCorpora {
    pub vocab: Vocabulary,
    pub tasks: Vec<Task>,
    pub data: LabeledData,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureIndexer {
    max_vocab_size: Option<usize>,
    use_chars: bool,
}

impl FeatureIndexer {
    pub fn new(max_vocab_size: Option<usize>, use_chars: bool) -> Self {
        Self { max_vocab_size, use_chars }
    }

    /// Index the training corpora. `layers[i]` is the encoder layer task `i` reads from.
    pub fn index_training(&self, corpora: &[Corpus], layers: &[usize]) -> Result<IndexedCorpora, TaggerError> {
        if corpora.len() != layers.len() {
            return Err(TaggerError::TaskLayerCount { layers: layers.len(), tasks: corpora.len() });
        }

        let mut vocab = Vocabulary::new();
        let capped = self.max_vocab_size.is_some();
        if let Some(max) = self.max_vocab_size {
            for word in most_common_words(corpora, max.saturating_sub(1)) {
                vocab.words.get_or_insert(&word);
            }
            tracing::info!("Created capped vocabulary of size {}", vocab.words.len());
        }

        let mut tasks = Vec::with_capacity(corpora.len());
        let mut data = LabeledData::default();

        for (i, corpus) in corpora.iter().enumerate() {
            let mut task = Task::new(i, layers[i]);
            let mut num_tokens = 0;

            for sentence in &corpus.sentences {
                num_tokens += sentence.len();
                let mut instance = Instance {
                    words: Vec::with_capacity(sentence.len()),
                    chars: Vec::new(),
                    tags: Vec::with_capacity(sentence.len()),
                };

                for (word, tag) in sentence.words.iter().zip(&sentence.tags) {
                    let word_id = if capped {
                        vocab.word_id(word)
                    } else {
                        vocab.words.get_or_insert(word)
                    };
                    instance.words.push(word_id);

                    if self.use_chars {
                        for c in word.chars() {
                            vocab.chars.get_or_insert(c.encode_utf8(&mut [0u8; 4]));
                        }
                        instance.chars.push(vocab.char_ids(word));
                    }

                    instance.tags.push(Some(task.tags.get_or_insert(tag)));
                }

                data.push(instance, i, sentence.clone());
            }

            if corpus.sentences.is_empty() || num_tokens == 0 {
                return Err(TaggerError::EmptyCorpus(corpus.source.clone()));
            }

            tracing::info!("TASK {} {}", task.id, corpus.source);
            tracing::info!("{} sentences {} tokens", corpus.sentences.len(), num_tokens);
            tracing::info!("{} w features, {} c features", vocab.words.len(), vocab.chars.len());
            tasks.push(task);
        }

        Ok(IndexedCorpora { vocab, tasks, data })
    }
}

/// Word and char ids for a sentence under a frozen vocabulary.
pub fn features(vocab: &Vocabulary, words: &[String], use_chars: bool) -> (Vec<usize>, Vec<Vec<usize>>) {
    let word_ids = words.iter().map(|w| vocab.word_id(w)).collect();
    let char_ids = if use_chars {
        words.iter().map(|w| vocab.char_ids(w)).collect()
    } else {
        Vec::new()
    };
    (word_ids, char_ids)
}

/// Index evaluation sentences of one task against frozen vocabularies.
pub fn index_sentences(
    vocab: &Vocabulary,
    task: &Task,
    task_index: usize,
    sentences: &[TaggedSentence],
    use_chars: bool,
) -> LabeledData {
    let mut data = LabeledData::default();
    for sentence in sentences {
        let (words, chars) = features(vocab, &sentence.words, use_chars);
        let tags = sentence.tags.iter().map(|t| task.tags.get(t)).collect();
        data.push(Instance { words, chars, tags }, task_index, sentence.clone());
    }
    data
}

/// The `n` most frequent words; ties keep first-occurrence order.
fn most_common_words(corpora: &[Corpus], n: usize) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for corpus in corpora {
        for sentence in &corpus.sentences {
            for word in &sentence.words {
                let count = counts.entry(word.as_str()).or_insert(0);
                if *count == 0 {
                    order.push(word.as_str());
                }
                *count += 1;
            }
        }
    }
    // stable sort keeps first-occurrence order among equal counts
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.into_iter().take(n).map(str::to_string).collect()
}
