//! Declarative progress-bar layout served by `GET /api/task_layout/{id}`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One weighted segment of the progress bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub label: String,
    /// Relative share of the whole bar. Only ratios matter.
    pub weight: f64,
    /// Number of sub-stages. A stage with `0` is rendered as one segment.
    #[serde(default)]
    pub sub_stages: u32,
}

impl StageSpec {
    pub fn new(label: impl Into<String>, weight: f64, sub_stages: u32) -> Self {
        Self {
            label: label.into(),
            weight,
            sub_stages,
        }
    }

    /// Number of rendered segments (never zero).
    pub fn segment_count(&self) -> usize {
        self.sub_stages.max(1) as usize
    }
}

/// Ordered list of stages for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLayout {
    pub stages: Vec<StageSpec>,
}

impl ProgressLayout {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }

    pub fn total_weight(&self) -> f64 {
        self.stages.iter().map(|s| s.weight.max(0.0)).sum()
    }

    /// Fraction of the whole bar occupied by stage `index` (0-based).
    pub fn weight_fraction(&self, index: usize) -> f64 {
        let total = self.total_weight();
        match self.stages.get(index) {
            Some(stage) if total > 0.0 => stage.weight.max(0.0) / total,
            _ => 0.0,
        }
    }

    /// Reject layouts that cannot be rendered.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.stages.is_empty() {
            return Err(CoreError::Validation(
                "Progress layout must contain at least one stage".to_string(),
            ));
        }
        if let Some(bad) = self.stages.iter().find(|s| !s.weight.is_finite() || s.weight < 0.0) {
            return Err(CoreError::Validation(format!(
                "Stage '{}' has an invalid weight: {}",
                bad.label, bad.weight
            )));
        }
        if self.total_weight() <= 0.0 {
            return Err(CoreError::Validation(
                "Progress layout weights must sum to a positive value".to_string(),
            ));
        }
        Ok(())
    }
}
