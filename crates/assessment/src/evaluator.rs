//! External answer evaluation.
//!
//! Scoring free-text answers is somebody else's job; this module only defines
//! the seam and an HTTP client for an evaluator service.

use std::time::Duration;

use async_trait::async_trait;
use learnpath_core::{LearnerId, PhaseId, MAX_SCORE};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors from an evaluator.
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    /// Request never completed
    #[error("evaluator request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Evaluator answered with an error status
    #[error("evaluator returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Evaluator answered with something unusable
    #[error("invalid evaluator response: {0}")]
    InvalidResponse(String),
}

/// An answer set to be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Learner
    pub learner_id: LearnerId,
    /// Phase
    pub phase_id: PhaseId,
    /// Day number
    pub day: u32,
    /// Answers, opaque here
    pub answers: serde_json::Value,
}

/// A scored answer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Score out of 100
    pub score: u32,
    /// Feedback for the learner
    #[serde(default)]
    pub feedback: String,
    /// The evaluator's own pass verdict
    #[serde(default)]
    pub passed: bool,
}

/// Scores answer sets.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Score one submission.
    async fn evaluate(&self, submission: &Submission) -> Result<Evaluation, EvaluatorError>;
}

/// Evaluator reached over HTTP.
///
/// POSTs the [`Submission`] as JSON and expects
/// `{"score": number, "feedback": string, "passed": bool}` back.
#[derive(Clone)]
pub struct HttpEvaluator {
    /// HTTP client
    client: Client,

    /// Endpoint URL
    url: String,
}

impl HttpEvaluator {
    /// Create a client for `url` with a request timeout.
    ///
    /// Fails when the HTTP client cannot be built (for example, no TLS backend).
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EvaluatorError> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Deserialize)]
struct RawEvaluation {
    score: f64,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    passed: Option<bool>,
}

/// Check an evaluator's raw score and round it to a whole number.
pub fn normalize_score(raw: f64) -> Result<u32, EvaluatorError> {
    if !raw.is_finite() || raw < 0.0 || raw > f64::from(MAX_SCORE) {
        return Err(EvaluatorError::InvalidResponse(format!(
            "score {} outside 0..={}",
            raw, MAX_SCORE
        )));
    }
    Ok(raw.round() as u32)
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    async fn evaluate(&self, submission: &Submission) -> Result<Evaluation, EvaluatorError> {
        debug!(
            learner_id = %submission.learner_id,
            phase_id = %submission.phase_id,
            day = submission.day,
            "requesting evaluation"
        );

        let response = self.client.post(&self.url).json(submission).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "evaluator returned an error");
            return Err(EvaluatorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw: RawEvaluation = response
            .json()
            .await
            .map_err(|e| EvaluatorError::InvalidResponse(e.to_string()))?;
        let score = normalize_score(raw.score)?;

        Ok(Evaluation {
            score,
            feedback: raw.feedback.unwrap_or_default(),
            passed: raw.passed.unwrap_or(score >= u32::from(learnpath_core::PASS_THRESHOLD)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_score_bounds() {
        assert_eq!(normalize_score(69.6).unwrap(), 70);
        assert_eq!(normalize_score(0.0).unwrap(), 0);
        assert_eq!(normalize_score(100.0).unwrap(), 100);
        assert!(normalize_score(100.5).is_err());
        assert!(normalize_score(-1.0).is_err());
        assert!(normalize_score(f64::NAN).is_err());
    }

    #[test]
    fn test_submission_wire_shape() {
        let submission = Submission {
            learner_id: LearnerId::parse("wire").unwrap(),
            phase_id: PhaseId(2),
            day: 5,
            answers: serde_json::json!({ "q1": "ownership" }),
        };
        let value = serde_json::to_value(&submission).unwrap();
        assert_eq!(value["learner_id"], "wire");
        assert_eq!(value["phase_id"], 2);
        assert_eq!(value["day"], 5);
    }

    #[test]
    fn test_new_builds_client_for_url() {
        let evaluator = HttpEvaluator::new("http://eval.local/score", Duration::from_secs(5)).unwrap();
        assert_eq!(evaluator.url(), "http://eval.local/score");
    }

    #[tokio::test]
    async fn test_unreachable_evaluator_is_an_error() {
        let evaluator = HttpEvaluator::new("http://127.0.0.1:9/evaluate", Duration::from_millis(500)).unwrap();
        let submission = Submission {
            learner_id: LearnerId::parse("wire").unwrap(),
            phase_id: PhaseId(0),
            day: 1,
            answers: serde_json::Value::Null,
        };
        assert!(matches!(
            evaluator.evaluate(&submission).await,
            Err(EvaluatorError::Http(_))
        ));
    }
}
