use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::TestKind;
use crate::stimulus::{digits_to_string, Stimulus};

/// Controller phases, in order
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Init,
    IntroCountdown,
    Presenting,
    Responding,
    Scoring,
    Complete,
}

/// What the participant answered for one stimulus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Yes,
    No,
    Choice(String),
    Number(f64),
    Digits(Vec<u8>),
    /// Synthesized when the respond window ran out; never correct
    Timeout,
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Yes => write!(f, "yes"),
            Answer::No => write!(f, "no"),
            Answer::Choice(choice) => write!(f, "{choice}"),
            Answer::Number(n) => write!(f, "{n}"),
            Answer::Digits(digits) => write!(f, "{}", digits_to_string(digits)),
            Answer::Timeout => write!(f, "timeout"),
        }
    }
}

/// Recorded answer to one presented stimulus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub stimulus_ref: usize,
    pub answer: Answer,
    /// Milliseconds since the session started
    pub timestamp_ms: u64,
    /// Milliseconds since the respond window opened
    pub latency_ms: u64,
    pub is_timeout: bool,
}

/// One running instance of a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub test_id: String,
    pub test_kind: TestKind,
    pub study: Vec<Stimulus>,
    pub stimuli: Vec<Stimulus>,
    pub started_at: DateTime<Local>,
}

impl Session {
    pub fn stimulus(&self, id: usize) -> Option<&Stimulus> {
        self.stimuli.iter().find(|s| s.id == id)
    }
}
