use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub key: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub max_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub title: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepScore {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// `scores[action_index][step_key]`.
pub type ActionScores = BTreeMap<String, StepScore>;

#[derive(Debug, Error, PartialEq)]
pub enum ScoringError {
    #[error("action {index} does not exist (plan has {len})")]
    ActionOutOfRange { index: usize, len: usize },
    #[error("action {index} has no step '{key}'")]
    UnknownStep { index: usize, key: String },
    #[error("score {score} is outside 0..={max}")]
    ScoreOutOfRange { score: f64, max: f64 },
    #[error("action {index} repeats step key '{key}'")]
    DuplicateStepKey { index: usize, key: String },
    #[error("action {index} has a step with an empty key")]
    EmptyStepKey { index: usize },
    #[error("action {index} step '{key}' needs a positive maxScore")]
    BadMaxScore { index: usize, key: String },
    #[error("action {index} needs a title")]
    EmptyActionTitle { index: usize },
    #[error("{count} step(s) still unscored")]
    Incomplete { count: usize },
}

/// Fills missing `maxScore` values and checks step keys.
pub fn normalize_actions(actions: &mut [Action], default_max: f64) -> Result<(), ScoringError> {
    for (index, action) in actions.iter_mut().enumerate() {
        action.title = action.title.trim().to_string();
        if action.title.is_empty() {
            return Err(ScoringError::EmptyActionTitle { index });
        }
        let mut seen = HashSet::new();
        for step in &mut action.steps {
            step.key = step.key.trim().to_string();
            if step.key.is_empty() {
                return Err(ScoringError::EmptyStepKey { index });
            }
            if !seen.insert(step.key.clone()) {
                return Err(ScoringError::DuplicateStepKey {
                    index,
                    key: step.key.clone(),
                });
            }
            let max = step.max_score.unwrap_or(default_max);
            if !max.is_finite() || max <= 0.0 {
                return Err(ScoringError::BadMaxScore {
                    index,
                    key: step.key.clone(),
                });
            }
            step.max_score = Some(max);
        }
    }
    Ok(())
}

pub fn max_total(actions: &[Action]) -> f64 {
    actions
        .iter()
        .flat_map(|a| a.steps.iter())
        .map(|s| s.max_score.unwrap_or(0.0))
        .sum()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSheet {
    pub scores: Vec<ActionScores>,
}

impl ScoreSheet {
    pub fn blank(actions: &[Action]) -> Self {
        Self::default().aligned(actions)
    }

    /// Reshapes stored scores onto the plan's current actions; steps that were
    /// removed from the plan drop out, new steps start unscored.
    pub fn aligned(mut self, actions: &[Action]) -> Self {
        self.scores.resize_with(actions.len(), BTreeMap::new);
        for (row, action) in self.scores.iter_mut().zip(actions) {
            row.retain(|k, _| action.steps.iter().any(|s| &s.key == k));
            for step in &action.steps {
                row.entry(step.key.clone()).or_default();
            }
        }
        self
    }

    pub fn set_score(
        &mut self,
        actions: &[Action],
        action_index: usize,
        step_key: &str,
        score: f64,
        comment: Option<String>,
    ) -> Result<(), ScoringError> {
        let Some(action) = actions.get(action_index) else {
            return Err(ScoringError::ActionOutOfRange {
                index: action_index,
                len: actions.len(),
            });
        };
        let Some(step) = action.steps.iter().find(|s| s.key == step_key) else {
            return Err(ScoringError::UnknownStep {
                index: action_index,
                key: step_key.to_string(),
            });
        };
        let max = step.max_score.unwrap_or(0.0);
        if !score.is_finite() || score < 0.0 || score > max {
            return Err(ScoringError::ScoreOutOfRange { score, max });
        }
        if self.scores.len() != actions.len() {
            *self = std::mem::take(self).aligned(actions);
        }
        let entry = self.scores[action_index]
            .entry(step_key.to_string())
            .or_default();
        entry.score = Some(score);
        if comment.is_some() {
            entry.comment = comment;
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.scores
            .iter()
            .flat_map(|row| row.values())
            .filter_map(|s| s.score)
            .sum()
    }

    /// `(action_index, step_key)` of every step without a score.
    pub fn unscored(&self, actions: &[Action]) -> Vec<(usize, String)> {
        let mut out = Vec::new();
        for (i, action) in actions.iter().enumerate() {
            for step in &action.steps {
                let scored = self
                    .scores
                    .get(i)
                    .and_then(|row| row.get(&step.key))
                    .and_then(|s| s.score)
                    .is_some();
                if !scored {
                    out.push((i, step.key.clone()));
                }
            }
        }
        out
    }

    pub fn check_complete(&self, actions: &[Action]) -> Result<(), ScoringError> {
        let missing = self.unscored(actions).len();
        if missing > 0 {
            return Err(ScoringError::Incomplete { count: missing });
        }
        Ok(())
    }
}
