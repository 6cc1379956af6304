// ============================================================
// Layer 3 — Vocabularies and Tasks
// ============================================================
// Dense symbol ↔ id mappings. Ids are contiguous and assigned in
// insertion order; once assigned an id never changes for the
// lifetime of a model.
//
//   words  — reserved id 0 for the unknown token
//   chars  — reserved ids 0 (unknown), 1 (<w>), 2 (</w>)
//   tags   — one table per task, no reserved entries

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const UNK: &str = "_UNK";
pub const WORD_START: &str = "<w>";
pub const WORD_END: &str = "</w>";

/// Insertion-ordered symbol table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SymbolTable {
    ids: HashMap<String, usize>,
    symbols: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<usize> {
        self.ids.get(symbol).copied()
    }

    /// Returns the id of `symbol`, assigning the next free id if it is new.
    pub fn get_or_insert(&mut self, symbol: &str) -> usize {
        if let Some(&id) = self.ids.get(symbol) {
            return id;
        }
        let id = self.symbols.len();
        self.ids.insert(symbol.to_string(), id);
        self.symbols.push(symbol.to_string());
        id
    }

    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.ids.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols in id order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

impl From<Vec<String>> for SymbolTable {
    fn from(symbols: Vec<String>) -> Self {
        let mut table = SymbolTable::new();
        for s in &symbols {
            table.get_or_insert(s);
        }
        table
    }
}

impl From<SymbolTable> for Vec<String> {
    fn from(table: SymbolTable) -> Self {
        table.symbols
    }
}

/// Word and character vocabularies shared by every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub words: SymbolTable,
    pub chars: SymbolTable,
}

impl Vocabulary {
    pub fn new() -> Self {
        let mut words = SymbolTable::new();
        words.get_or_insert(UNK);

        let mut chars = SymbolTable::new();
        chars.get_or_insert(UNK);
        chars.get_or_insert(WORD_START);
        chars.get_or_insert(WORD_END);

        Self { words, chars }
    }

    pub fn unk_word(&self) -> usize {
        0
    }

    pub fn word_id(&self, word: &str) -> usize {
        self.words.get(word).unwrap_or(0)
    }

    /// Character ids of `word` wrapped in the boundary markers.
    pub fn char_ids(&self, word: &str) -> Vec<usize> {
        let mut ids = Vec::with_capacity(word.chars().count() + 2);
        ids.push(1);
        let mut buf = [0u8; 4];
        for c in word.chars() {
            ids.push(self.chars.get(c.encode_utf8(&mut buf)).unwrap_or(0));
        }
        ids.push(2);
        ids
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

/// One tagging objective: stable key, its own label space, and the
/// encoder layer (1-based) its heads read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub layer: usize,
    pub tags: SymbolTable,
}

impl Task {
    pub fn new(index: usize, layer: usize) -> Self {
        Self { id: format!("task{index}"), layer, tags: SymbolTable::new() }
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }
}
