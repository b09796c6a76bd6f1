use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::catalog::{ScoringMethod, TestKind};
use crate::session::{Answer, Response, Session};
use crate::stimulus::{Payload, Stimulus};
use crate::util::{mean, percentage};

const HIGH_THRESHOLD: u32 = 75;
const MEDIUM_THRESHOLD: u32 = 50;
const DIVISION_TOLERANCE: f64 = 0.01;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn from_percentage(percentage: u32) -> Self {
        match percentage {
            p if p >= HIGH_THRESHOLD => Level::High,
            p if p >= MEDIUM_THRESHOLD => Level::Medium,
            _ => Level::Low,
        }
    }
}

/// A stimulus paired with its response, if any
#[derive(Debug, Copy, Clone)]
pub struct Trial<'a> {
    pub stimulus: &'a Stimulus,
    pub response: Option<&'a Response>,
}

impl<'a> Trial<'a> {
    pub fn new(stimulus: &'a Stimulus, response: Option<&'a Response>) -> Self {
        Self { stimulus, response }
    }

    /// Missing responses count as timeouts
    pub fn answer(&self) -> &'a Answer {
        const MISSING: &Answer = &Answer::Timeout;
        self.response.map_or(MISSING, |r| &r.answer)
    }

    pub fn latency(&self) -> Option<Duration> {
        self.response
            .filter(|r| !r.is_timeout)
            .map(|r| Duration::from_millis(r.latency_ms))
    }
}

/// Raw counts produced by a strategy
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tally {
    pub correct: usize,
    pub total: usize,
    pub max_score: usize,
    /// Strategy specific figures merged into the outcome detail
    pub extra: Map<String, Value>,
}

/// Per-stimulus line of the outcome detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialDetail {
    pub stimulus: usize,
    pub label: String,
    pub expected: String,
    pub answer: String,
    pub correct: bool,
    pub timeout: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Result of one scored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub session_id: String,
    pub test_id: String,
    pub test_kind: TestKind,
    pub correct_count: usize,
    pub total_count: usize,
    pub percentage: u32,
    pub level: Level,
    pub time_spent_seconds: u64,
    pub max_score: usize,
    pub detail: Value,
    pub completed_at: DateTime<Local>,
}

/// The answer that would be judged correct for `stimulus`
pub fn expected_answer(stimulus: &Stimulus) -> Answer {
    match &stimulus.payload {
        Payload::Item { .. } | Payload::ColourWord { .. } => {
            if stimulus.target {
                Answer::Yes
            } else {
                Answer::No
            }
        }
        Payload::Choice { expected, .. } => Answer::Choice(expected.clone()),
        Payload::Digits { digits } => Answer::Digits(digits.clone()),
        Payload::Operation { op, lhs, rhs } => Answer::Number(op.apply(*lhs, *rhs)),
    }
}

fn judge_yes_no(stimulus: &Stimulus, answer: &Answer) -> bool {
    matches!(
        (stimulus.target, answer),
        (true, Answer::Yes) | (false, Answer::No)
    )
}

/// Turns trials into counts under one scoring method
pub trait ScoringStrategy: Send {
    fn method(&self) -> ScoringMethod;

    /// Whether `answer` is correct for `stimulus`; timeouts never are
    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool;

    fn score(&self, trials: &[Trial<'_>]) -> Tally {
        let correct = trials
            .iter()
            .filter(|t| self.judge(t.stimulus, t.answer()))
            .count();
        Tally {
            correct,
            total: trials.len(),
            max_score: trials.len(),
            extra: Map::new(),
        }
    }

    /// Score `trials` and wrap the counts into an [`Outcome`]
    fn outcome(&self, session: &Session, trials: &[Trial<'_>], time_spent: Duration) -> Outcome {
        let tally = self.score(trials);
        let percentage = percentage(tally.correct, tally.total);

        let details: Vec<TrialDetail> = trials
            .iter()
            .map(|t| TrialDetail {
                stimulus: t.stimulus.id,
                label: t.stimulus.label(),
                expected: expected_answer(t.stimulus).to_string(),
                answer: t.answer().to_string(),
                correct: self.judge(t.stimulus, t.answer()),
                timeout: t.response.map_or(true, |r| r.is_timeout),
                latency_ms: t.latency().map(|l| l.as_millis() as u64),
            })
            .collect();

        let mut detail = Map::new();
        detail.insert("scoringMethod".into(), json!(self.method().to_string()));
        detail.insert("trials".into(), json!(details));
        detail.extend(tally.extra);

        Outcome {
            session_id: session.session_id.clone(),
            test_id: session.test_id.clone(),
            test_kind: session.test_kind,
            correct_count: tally.correct,
            total_count: tally.total,
            percentage,
            level: Level::from_percentage(percentage),
            time_spent_seconds: time_spent.as_secs(),
            max_score: tally.max_score,
            detail: Value::Object(detail),
            completed_at: Local::now(),
        }
    }
}

/// Yes/No recognition against the study set
#[derive(Debug, Default, Clone, Copy)]
pub struct AccuracyStrategy;

impl ScoringStrategy for AccuracyStrategy {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Accuracy
    }

    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool {
        judge_yes_no(stimulus, answer)
    }
}

/// Picked label must equal the studied item's label
#[derive(Debug, Default, Clone, Copy)]
pub struct RecallStrategy;

impl ScoringStrategy for RecallStrategy {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Recall
    }

    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool {
        match (&stimulus.payload, answer) {
            (Payload::Choice { expected, .. }, Answer::Choice(choice)) => {
                choice.trim().eq_ignore_ascii_case(expected)
            }
            _ => false,
        }
    }
}

/// Same-or-different judgment of a replayed item
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceStrategy;

impl ScoringStrategy for SequenceStrategy {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Sequence
    }

    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool {
        judge_yes_no(stimulus, answer)
    }
}

/// Longest sequence reproduced before the first failure
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveStrategy {
    max_length: usize,
}

impl AdaptiveStrategy {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl ScoringStrategy for AdaptiveStrategy {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Adaptive
    }

    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool {
        match (stimulus.digits(), answer) {
            (Some(expected), Answer::Digits(given)) => expected == given.as_slice(),
            _ => false,
        }
    }

    fn score(&self, trials: &[Trial<'_>]) -> Tally {
        let span = trials
            .iter()
            .take_while(|t| self.judge(t.stimulus, t.answer()))
            .map(|t| t.stimulus.units())
            .max()
            .unwrap_or(0);

        let mut extra = Map::new();
        extra.insert("span".into(), json!(span));
        extra.insert("sequences".into(), json!(trials.len()));

        Tally {
            correct: span,
            total: self.max_length,
            max_score: self.max_length,
            extra,
        }
    }
}

/// Recognition accuracy, optionally with a speed index over correct answers
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeedAccuracyStrategy {
    respond_window: Option<Duration>,
}

impl SpeedAccuracyStrategy {
    /// `respond_window` enables the speed index
    pub fn new(respond_window: Option<Duration>) -> Self {
        Self { respond_window }
    }
}

impl ScoringStrategy for SpeedAccuracyStrategy {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::SpeedAccuracy
    }

    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool {
        judge_yes_no(stimulus, answer)
    }

    fn score(&self, trials: &[Trial<'_>]) -> Tally {
        let correct: Vec<&Trial<'_>> = trials
            .iter()
            .filter(|t| self.judge(t.stimulus, t.answer()))
            .collect();

        let mut extra = Map::new();
        if let Some(window) = self.respond_window.filter(|w| !w.is_zero()) {
            let speeds: Vec<f64> = correct
                .iter()
                .filter_map(|t| t.latency())
                .map(|l| (1.0 - l.as_secs_f64() / window.as_secs_f64()).clamp(0.0, 1.0))
                .collect();
            let index = mean(&speeds).unwrap_or(0.0);
            extra.insert("speedIndex".into(), json!((index * 100.0).round() / 100.0));
        }

        Tally {
            correct: correct.len(),
            total: trials.len(),
            max_score: trials.len(),
            extra,
        }
    }
}

/// Match/mismatch judgment of a colour word against its actual ink
#[derive(Debug, Default, Clone, Copy)]
pub struct InterferenceStrategy;

impl InterferenceStrategy {
    fn group_accuracy(&self, group: &[&Trial<'_>]) -> Value {
        if group.is_empty() {
            return Value::Null;
        }
        let hits = group
            .iter()
            .filter(|t| self.judge(t.stimulus, t.answer()))
            .count();
        json!(percentage(hits, group.len()))
    }
}

impl ScoringStrategy for InterferenceStrategy {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Interference
    }

    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool {
        match &stimulus.payload {
            Payload::ColourWord { word, ink, .. } => matches!(
                (word == ink, answer),
                (true, Answer::Yes) | (false, Answer::No)
            ),
            _ => false,
        }
    }

    fn score(&self, trials: &[Trial<'_>]) -> Tally {
        let (congruent, incongruent): (Vec<&Trial<'_>>, Vec<&Trial<'_>>) =
            trials.iter().partition(|t| t.stimulus.target);

        let mut extra = Map::new();
        extra.insert("congruentAccuracy".into(), self.group_accuracy(&congruent));
        extra.insert("incongruentAccuracy".into(), self.group_accuracy(&incongruent));

        let correct = trials
            .iter()
            .filter(|t| self.judge(t.stimulus, t.answer()))
            .count();
        Tally {
            correct,
            total: trials.len(),
            max_score: trials.len(),
            extra,
        }
    }
}

/// Typed numeric answers against the exact result
#[derive(Debug, Clone, Copy)]
pub struct AccuracySpeedStrategy {
    tolerance: f64,
}

impl Default for AccuracySpeedStrategy {
    fn default() -> Self {
        Self {
            tolerance: DIVISION_TOLERANCE,
        }
    }
}

impl ScoringStrategy for AccuracySpeedStrategy {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::AccuracySpeed
    }

    fn judge(&self, stimulus: &Stimulus, answer: &Answer) -> bool {
        match (&stimulus.payload, answer) {
            (Payload::Operation { op, lhs, rhs }, Answer::Number(given)) => {
                let exact = op.apply(*lhs, *rhs);
                if exact.fract() == 0.0 {
                    *given == exact
                } else {
                    (given - exact).abs() <= self.tolerance
                }
            }
            _ => false,
        }
    }

    fn score(&self, trials: &[Trial<'_>]) -> Tally {
        let correct: Vec<&Trial<'_>> = trials
            .iter()
            .filter(|t| self.judge(t.stimulus, t.answer()))
            .collect();
        let latencies: Vec<f64> = correct
            .iter()
            .filter_map(|t| t.latency())
            .map(|l| l.as_millis() as f64)
            .collect();

        let mut extra = Map::new();
        if let Some(avg) = mean(&latencies) {
            extra.insert("meanLatencyMs".into(), json!(avg.round() as u64));
        }

        Tally {
            correct: correct.len(),
            total: trials.len(),
            max_score: trials.len(),
            extra,
        }
    }
}
