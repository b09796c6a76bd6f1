use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::scoring::{
    AccuracySpeedStrategy, AccuracyStrategy, AdaptiveStrategy, InterferenceStrategy,
    RecallStrategy, ScoringStrategy, SequenceStrategy, SpeedAccuracyStrategy,
};

/// The eight supported test types
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    ValueEnum,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "kebab-case")]
pub enum TestKind {
    VisualMemory,
    VerbalMemory,
    AuditoryMemory,
    DigitSpan,
    VisualAttention,
    Stroop,
    Arithmetic,
    SymbolMemory,
}

impl TestKind {
    pub const ALL: [TestKind; 8] = [
        TestKind::VisualMemory,
        TestKind::VerbalMemory,
        TestKind::AuditoryMemory,
        TestKind::DigitSpan,
        TestKind::VisualAttention,
        TestKind::Stroop,
        TestKind::Arithmetic,
        TestKind::SymbolMemory,
    ];

    /// Default phase windows for this kind, before configuration overrides
    pub fn default_timings(&self) -> PhaseTimings {
        let ms = Duration::from_millis;
        let (study, present, respond) = match self {
            TestKind::VisualMemory => (ms(20_000), ms(0), ms(3_000)),
            TestKind::VerbalMemory => (ms(4_000), ms(0), ms(3_000)),
            TestKind::AuditoryMemory => (ms(4_000), ms(0), ms(3_000)),
            TestKind::DigitSpan => (ms(0), ms(1_000), ms(10_000)),
            TestKind::VisualAttention => (ms(20_000), ms(0), ms(3_000)),
            TestKind::Stroop => (ms(0), ms(0), ms(3_000)),
            TestKind::Arithmetic => (ms(0), ms(0), ms(7_000)),
            TestKind::SymbolMemory => (ms(3_000), ms(0), ms(3_000)),
        };

        PhaseTimings {
            intro: ms(DEFAULT_INTRO_MS),
            study,
            present_per_unit: present,
            respond,
            session_limit: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Scoring method tag as stored in a test configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScoringMethod {
    Accuracy,
    Recall,
    Sequence,
    Adaptive,
    SpeedAccuracy,
    Interference,
    AccuracySpeed,
    Coding,
}

impl ScoringMethod {
    /// Build the strategy for this method
    pub fn strategy(
        &self,
        config: &TestConfiguration,
        timings: &PhaseTimings,
    ) -> Box<dyn ScoringStrategy> {
        match self {
            ScoringMethod::Accuracy | ScoringMethod::Coding => Box::new(AccuracyStrategy),
            ScoringMethod::Recall => Box::new(RecallStrategy),
            ScoringMethod::Sequence => Box::new(SequenceStrategy),
            ScoringMethod::Adaptive => Box::new(AdaptiveStrategy::new(config.max_length())),
            ScoringMethod::SpeedAccuracy => Box::new(SpeedAccuracyStrategy::new(
                config.latency_weighted.then_some(timings.respond),
            )),
            ScoringMethod::Interference => Box::new(InterferenceStrategy),
            ScoringMethod::AccuracySpeed => Box::new(AccuracySpeedStrategy::default()),
        }
    }
}

pub const DEFAULT_INTRO_MS: u64 = 4_000;
pub const DEFAULT_START_LENGTH: usize = 3;
pub const DEFAULT_MAX_LENGTH: usize = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfiguration {
    /// Trials of a fixed-length test; adaptive tests run between the span bounds
    pub question_count: usize,
    pub time_limit_seconds: u64,
    pub scoring_method: ScoringMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respond_millis: Option<u64>,
    #[serde(default)]
    pub latency_weighted: bool,
}

impl TestConfiguration {
    pub fn new(question_count: usize, time_limit_seconds: u64, scoring_method: ScoringMethod) -> Self {
        Self {
            question_count,
            time_limit_seconds,
            scoring_method,
            start_length: None,
            max_length: None,
            probe_count: None,
            study_millis: None,
            present_millis: None,
            respond_millis: None,
            latency_weighted: false,
        }
    }

    pub fn start_length(&self) -> usize {
        self.start_length.unwrap_or(DEFAULT_START_LENGTH)
    }

    pub fn max_length(&self) -> usize {
        self.max_length.unwrap_or(DEFAULT_MAX_LENGTH)
    }
}

/// Durations of every phase of one session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PhaseTimings {
    pub intro: Duration,
    /// Memorize window for the study set, shown before the first trial
    pub study: Duration,
    /// Per-unit presentation window of each trial (one unit per digit for sequences)
    pub present_per_unit: Duration,
    pub respond: Duration,
    /// Bound on the whole post-intro session
    pub session_limit: Option<Duration>,
}

/// One catalog entry; immutable once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TestKind,
    pub name: String,
    pub difficulty: Difficulty,
    pub configuration: TestConfiguration,
}

impl TestDefinition {
    /// Phase windows for this test with configuration overrides applied
    pub fn timings(&self) -> PhaseTimings {
        let defaults = self.kind.default_timings();
        let config = &self.configuration;
        PhaseTimings {
            intro: defaults.intro,
            study: config
                .study_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.study),
            present_per_unit: config
                .present_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.present_per_unit),
            respond: config
                .respond_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.respond),
            session_limit: (config.time_limit_seconds > 0)
                .then(|| Duration::from_secs(config.time_limit_seconds)),
        }
    }

    pub fn strategy(&self) -> Box<dyn ScoringStrategy> {
        self.configuration
            .scoring_method
            .strategy(&self.configuration, &self.timings())
    }
}

/// Set of test definitions available to a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub tests: Vec<TestDefinition>,
}

impl Catalog {
    pub fn builtin() -> Self {
        let def = |id: &str, kind, name: &str, difficulty, configuration| TestDefinition {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            difficulty,
            configuration,
        };

        let digit_span = TestConfiguration {
            start_length: Some(DEFAULT_START_LENGTH),
            max_length: Some(DEFAULT_MAX_LENGTH),
            ..TestConfiguration::new(5, 150, ScoringMethod::Adaptive)
        };

        Self {
            tests: vec![
                def(
                    "visual-memory",
                    TestKind::VisualMemory,
                    "Visual memory",
                    Difficulty::Medium,
                    TestConfiguration::new(10, 300, ScoringMethod::Accuracy),
                ),
                def(
                    "verbal-memory",
                    TestKind::VerbalMemory,
                    "Verbal memory",
                    Difficulty::Easy,
                    TestConfiguration::new(1, 240, ScoringMethod::Recall),
                ),
                def(
                    "auditory-memory",
                    TestKind::AuditoryMemory,
                    "Auditory memory",
                    Difficulty::Medium,
                    TestConfiguration::new(1, 180, ScoringMethod::Sequence),
                ),
                def(
                    "digit-span",
                    TestKind::DigitSpan,
                    "Digit span",
                    Difficulty::Hard,
                    digit_span,
                ),
                def(
                    "visual-attention",
                    TestKind::VisualAttention,
                    "Visual attention",
                    Difficulty::Medium,
                    TestConfiguration::new(6, 360, ScoringMethod::SpeedAccuracy),
                ),
                def(
                    "stroop",
                    TestKind::Stroop,
                    "Stroop test",
                    Difficulty::Hard,
                    TestConfiguration::new(12, 120, ScoringMethod::Interference),
                ),
                def(
                    "arithmetic",
                    TestKind::Arithmetic,
                    "Arithmetic",
                    Difficulty::Medium,
                    TestConfiguration::new(12, 300, ScoringMethod::AccuracySpeed),
                ),
                def(
                    "symbol-memory",
                    TestKind::SymbolMemory,
                    "Symbol memory",
                    Difficulty::Hard,
                    TestConfiguration::new(3, 240, ScoringMethod::Coding),
                ),
            ],
        }
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn find(&self, id: &str) -> Option<&TestDefinition> {
        self.tests.iter().find(|t| t.id == id)
    }

    /// First definition of the given kind
    pub fn by_kind(&self, kind: TestKind) -> Option<&TestDefinition> {
        self.tests.iter().find(|t| t.kind == kind)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
