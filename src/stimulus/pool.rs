use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::catalog::TestKind;
use crate::error::PoolError;

static POOL_DIR: Dir = include_dir!("src/pools");

/// One candidate stimulus with an optional label (first letter, ink hex, symbol name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PoolEntry {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: None,
        }
    }
}

/// Candidate stimuli for one test type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StimulusPool {
    pub name: String,
    pub items: Vec<PoolEntry>,
}

impl StimulusPool {
    /// Load a pool shipped with the binary
    pub fn embedded(name: &str) -> Result<Self, PoolError> {
        let file_name = format!("{name}.json");
        let file = POOL_DIR
            .get_file(&file_name)
            .ok_or_else(|| PoolError::Missing(file_name.clone()))?;
        let data = file
            .contents_utf8()
            .ok_or_else(|| PoolError::Encoding(file_name.clone()))?;
        Self::from_json(data)
    }

    pub fn from_json(data: &str) -> Result<Self, PoolError> {
        let pool: StimulusPool = serde_json::from_str(data)?;
        if pool.items.is_empty() {
            return Err(PoolError::Empty { name: pool.name });
        }
        Ok(pool)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PoolError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// The ten decimal digits
    pub fn digits() -> Self {
        Self {
            name: "digits".to_string(),
            items: (0..10).map(|d| PoolEntry::new(d.to_string())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, value: &str) -> Option<&PoolEntry> {
        self.items.iter().find(|e| e.value == value)
    }

    /// Label of `value`, falling back to its first character
    pub fn label_of(&self, value: &str) -> Option<String> {
        let entry = self.get(value)?;
        entry
            .label
            .clone()
            .or_else(|| entry.value.chars().next().map(String::from))
    }
}

/// All pools a session can draw from
#[derive(Debug, Clone)]
pub struct PoolSet {
    pub images: StimulusPool,
    pub words: StimulusPool,
    pub symbols: StimulusPool,
    pub colours: StimulusPool,
    pub letters: StimulusPool,
    pub digits: StimulusPool,
}

impl PoolSet {
    pub fn builtin() -> Result<Self, PoolError> {
        Ok(Self {
            images: StimulusPool::embedded("images")?,
            words: StimulusPool::embedded("words")?,
            symbols: StimulusPool::embedded("symbols")?,
            colours: StimulusPool::embedded("colours")?,
            letters: StimulusPool::embedded("letters")?,
            digits: StimulusPool::digits(),
        })
    }

    /// Main pool the given test kind samples its stimuli from
    pub fn for_kind(&self, kind: TestKind) -> &StimulusPool {
        match kind {
            TestKind::VisualMemory | TestKind::VerbalMemory | TestKind::AuditoryMemory => {
                &self.images
            }
            TestKind::DigitSpan | TestKind::Arithmetic => &self.digits,
            TestKind::VisualAttention => &self.words,
            TestKind::Stroop => &self.colours,
            TestKind::SymbolMemory => &self.symbols,
        }
    }

    /// Replace the main pool of `kind`, e.g. with one loaded from disk
    pub fn replace(&mut self, kind: TestKind, pool: StimulusPool) {
        match kind {
            TestKind::VisualMemory | TestKind::VerbalMemory | TestKind::AuditoryMemory => {
                self.images = pool
            }
            TestKind::DigitSpan | TestKind::Arithmetic => self.digits = pool,
            TestKind::VisualAttention => self.words = pool,
            TestKind::Stroop => self.colours = pool,
            TestKind::SymbolMemory => self.symbols = pool,
        }
    }
}
