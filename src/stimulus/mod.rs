pub mod generator;
pub mod plan;
pub mod pool;

use serde::{Deserialize, Serialize};

pub use generator::StimulusGenerator;
pub use plan::{AdaptiveSpan, SessionPlan};
pub use pool::{PoolEntry, PoolSet, StimulusPool};

/// Arithmetic operator of an operation stimulus
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
}

impl Operator {
    pub const ALL: [Operator; 4] = [
        Operator::Multiply,
        Operator::Divide,
        Operator::Add,
        Operator::Subtract,
    ];

    /// Exact result; division is not truncated
    pub fn apply(&self, lhs: i32, rhs: i32) -> f64 {
        let (lhs, rhs) = (lhs as f64, rhs as f64);
        match self {
            Operator::Add => lhs + rhs,
            Operator::Subtract => lhs - rhs,
            Operator::Multiply => lhs * rhs,
            Operator::Divide => lhs / rhs,
        }
    }
}

/// What is shown for a stimulus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// A word, symbol or image identifier
    Item { value: String },
    /// An item whose label has to be picked among `options`
    Choice {
        item: String,
        options: Vec<String>,
        expected: String,
    },
    Digits { digits: Vec<u8> },
    /// Colour name `word` rendered in colour `ink`
    ColourWord { word: String, ink: String, hex: String },
    Operation { op: Operator, lhs: i32, rhs: i32 },
}

/// One generated stimulus of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub id: usize,
    pub payload: Payload,
    /// Derived truth flag: "was in the study set" or "ink matches word"
    pub target: bool,
}

impl Stimulus {
    pub fn item(id: usize, value: impl Into<String>, target: bool) -> Self {
        Self {
            id,
            payload: Payload::Item {
                value: value.into(),
            },
            target,
        }
    }

    pub fn item_value(&self) -> Option<&str> {
        match &self.payload {
            Payload::Item { value } => Some(value),
            Payload::Choice { item, .. } => Some(item),
            _ => None,
        }
    }

    pub fn digits(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Digits { digits } => Some(digits),
            _ => None,
        }
    }

    /// Number of presentation units; a digit sequence is shown one digit per unit
    pub fn units(&self) -> usize {
        self.digits().map_or(1, |d| d.len().max(1))
    }

    /// Short human readable form used in outcome details
    pub fn label(&self) -> String {
        match &self.payload {
            Payload::Item { value } => value.clone(),
            Payload::Choice { item, .. } => item.clone(),
            Payload::Digits { digits } => digits_to_string(digits),
            Payload::ColourWord { word, ink, .. } => format!("{word}/{ink}"),
            Payload::Operation { op, lhs, rhs } => format!("{lhs} {op} {rhs}"),
        }
    }
}

pub fn digits_to_string(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}
