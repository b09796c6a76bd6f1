use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::catalog::TestKind;
use crate::scoring::{Level, Outcome};

/// Errors reported by a result service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("conflict: session already submitted")]
    Conflict,
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTicket {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub session_id: String,
}

/// Payload sent when a session completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub test_kind: TestKind,
    pub correct: usize,
    pub total: usize,
    pub percentage: u32,
    pub level: Level,
    pub time_spent_seconds: u64,
    pub max_score: usize,
    pub detail: Value,
}

impl From<&Outcome> for Submission {
    fn from(outcome: &Outcome) -> Self {
        Self {
            test_kind: outcome.test_kind,
            correct: outcome.correct_count,
            total: outcome.total_count,
            percentage: outcome.percentage,
            level: outcome.level,
            time_spent_seconds: outcome.time_spent_seconds,
            max_score: outcome.max_score,
            detail: outcome.detail.clone(),
        }
    }
}

impl Submission {
    /// Body shape of the result endpoint: answers plus session totals
    pub fn to_json(&self) -> Value {
        json!({
            "answers": {
                "correct": self.correct,
                "total": self.total,
                "percentage": self.percentage,
                "details": self.detail,
            },
            "timeSpent": self.time_spent_seconds,
            "maxScore": self.max_score,
            "testType": self.test_kind,
        })
    }
}

/// Store that opens sessions and receives their outcomes
pub trait ResultService {
    fn start_session(&mut self, test_id: &str) -> Result<SessionTicket, ServiceError>;

    fn submit_session(
        &mut self,
        session_id: &str,
        submission: &Submission,
    ) -> Result<Ack, ServiceError>;
}

impl<S: ResultService + ?Sized> ResultService for &mut S {
    fn start_session(&mut self, test_id: &str) -> Result<SessionTicket, ServiceError> {
        (**self).start_session(test_id)
    }

    fn submit_session(
        &mut self,
        session_id: &str,
        submission: &Submission,
    ) -> Result<Ack, ServiceError> {
        (**self).submit_session(session_id, submission)
    }
}

/// In-process service for headless runs and tests; failures can be scripted
#[derive(Debug, Default)]
pub struct MemoryResultService {
    next_id: usize,
    known_tests: Option<Vec<String>>,
    start_failure: Option<ServiceError>,
    submit_failures: Vec<ServiceError>,
    open: Vec<String>,
    pub submissions: Vec<(String, Submission)>,
}

impl MemoryResultService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only these test ids can be started; anything else is `NotFound`
    pub fn with_tests<I, S>(tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_tests: Some(tests.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn fail_start(&mut self, err: ServiceError) {
        self.start_failure = Some(err);
    }

    /// Queue a failure for the next submission
    pub fn fail_next_submit(&mut self, err: ServiceError) {
        self.submit_failures.push(err);
    }
}

impl ResultService for MemoryResultService {
    fn start_session(&mut self, test_id: &str) -> Result<SessionTicket, ServiceError> {
        if let Some(err) = self.start_failure.take() {
            return Err(err);
        }
        if let Some(known) = &self.known_tests {
            if !known.iter().any(|t| t == test_id) {
                return Err(ServiceError::NotFound);
            }
        }
        self.next_id += 1;
        let session_id = format!("mem-{}", self.next_id);
        self.open.push(session_id.clone());
        Ok(SessionTicket { session_id })
    }

    fn submit_session(
        &mut self,
        session_id: &str,
        submission: &Submission,
    ) -> Result<Ack, ServiceError> {
        if !self.submit_failures.is_empty() {
            return Err(self.submit_failures.remove(0));
        }
        if !self.open.iter().any(|s| s == session_id) {
            return Err(ServiceError::NotFound);
        }
        if self.submissions.iter().any(|(s, _)| s == session_id) {
            return Err(ServiceError::Conflict);
        }
        self.submissions
            .push((session_id.to_string(), submission.clone()));
        Ok(Ack {
            session_id: session_id.to_string(),
        })
    }
}
