use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Structured output of the scoring model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreOutput {
    pub score: f64,
    pub confidence: f64,
}

/// The scoring collaborator: possibly slow, possibly failing, opaque to the
/// pipeline. The stub variant stands in when no remote model is configured.
pub enum Scorer {
    Http(HttpScorer),
    Stub(StubScorer),
}

impl Scorer {
    /// Remote scorer when a URL is configured, deterministic stub otherwise.
    pub fn from_config(scorer_url: Option<&str>) -> Self {
        match scorer_url {
            Some(url) => Scorer::Http(HttpScorer::new(url)),
            None => Scorer::Stub(StubScorer),
        }
    }

    pub async fn score(&self, payload: &str) -> Result<ScoreOutput, ScoreError> {
        match self {
            Scorer::Http(scorer) => scorer.score(payload).await,
            Scorer::Stub(scorer) => Ok(scorer.score(payload)),
        }
    }
}

/// Client for a remote ML scoring service.
pub struct HttpScorer {
    http: Client,
    url: String,
}

#[derive(Serialize)]
struct ScoreApiRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct ScoreApiResponse {
    score: f64,
    confidence: Option<f64>,
}

impl HttpScorer {
    pub fn new(url: &str) -> Self {
        Self {
            http: Client::new(),
            url: url.to_string(),
        }
    }

    /// Send the stored payload to the scoring service unchanged.
    pub async fn score(&self, payload: &str) -> Result<ScoreOutput, ScoreError> {
        let response = self
            .http
            .post(&self.url)
            .json(&ScoreApiRequest { image: payload })
            .send()
            .await
            .map_err(ScoreError::Http)?
            .error_for_status()
            .map_err(ScoreError::Http)?;

        let body = response.text().await.map_err(ScoreError::Http)?;
        let parsed: ScoreApiResponse = serde_json::from_str(&body).map_err(ScoreError::Parse)?;

        Ok(ScoreOutput {
            score: parsed.score,
            confidence: parsed.confidence.unwrap_or(1.0),
        })
    }
}

/// Deterministic stand-in for the scoring model: the same payload always
/// yields the same score.
pub struct StubScorer;

impl StubScorer {
    pub fn score(&self, payload: &str) -> ScoreOutput {
        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        let digest = hasher.finish();

        ScoreOutput {
            score: (digest % 101) as f64 / 100.0,
            confidence: 0.5 + ((digest >> 32) % 50) as f64 / 100.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("scorer request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scorer returned an unparseable response: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_is_deterministic() {
        let scorer = StubScorer;
        let a = scorer.score("imagedata");
        let b = scorer.score("imagedata");
        assert_eq!(a.score, b.score);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn test_stub_scores_are_bounded() {
        let scorer = StubScorer;
        for payload in ["a", "b", "c", "a much longer payload", ""] {
            let output = scorer.score(payload);
            assert!((0.0..=1.0).contains(&output.score), "score {}", output.score);
            assert!(
                (0.0..=1.0).contains(&output.confidence),
                "confidence {}",
                output.confidence
            );
        }
    }

    #[test]
    fn test_output_serializes_with_score_field() {
        let value = serde_json::to_value(ScoreOutput {
            score: 0.9,
            confidence: 0.8,
        })
        .unwrap();
        assert_eq!(value["score"], 0.9);
    }
}
