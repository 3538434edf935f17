//! Weighted, multi-stage progress arithmetic.
//!
//! [`ProgressTracker`] turns successive [`ProgressDetails`] readings into
//! a renderable [`ProgressFrame`]. Fills only ever move forward: a reading
//! that would lower a segment is ignored for that segment, so a stage
//! once shown complete stays complete.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::layout::ProgressLayout;
use crate::task::ProgressDetails;

/// "item N of M" / "N/M" counters inside a step label.
static ITEM_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:of|/)\s*(\d+)").expect("valid regex"));

/// Clamp a reported percentage into `0.0..=100.0`. NaN reads as zero.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Extract `(n, m)` from a label such as "Downloading item 2 of 5".
pub fn parse_item_count(label: &str) -> Option<(u32, u32)> {
    let caps = ITEM_COUNT_RE.captures(label)?;
    let n = caps.get(1)?.as_str().parse().ok()?;
    let m = caps.get(2)?.as_str().parse().ok()?;
    Some((n, m))
}

// ---------------------------------------------------------------------------
// Rendered frame
// ---------------------------------------------------------------------------

/// Rendered state of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFill {
    pub label: String,
    /// Share of the whole bar, in `0.0..=1.0`.
    pub weight_fraction: f64,
    /// Fill of each sub-stage segment, each in `0.0..=100.0`.
    pub sub_fills: Vec<f64>,
    /// Whether the segment shows the "working" animation.
    pub pulsing: bool,
}

impl StageFill {
    /// Average fill across the stage's segments.
    pub fn percent(&self) -> f64 {
        if self.sub_fills.is_empty() {
            return 0.0;
        }
        self.sub_fills.iter().sum::<f64>() / self.sub_fills.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.sub_fills.iter().all(|f| *f >= 100.0)
    }
}

/// Everything a renderer needs to draw the bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressFrame {
    pub stages: Vec<StageFill>,
    pub overall_percent: f64,
    pub step_label: String,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Accumulates monotonic fills for one task's layout.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    layout: ProgressLayout,
    fills: Vec<Vec<f64>>,
    pulsing: Vec<bool>,
    /// 1-based index of the stage driven by item counters in the label.
    acquisition_stage: Option<u32>,
    step_label: String,
}

impl ProgressTracker {
    pub fn new(layout: ProgressLayout, acquisition_stage: Option<u32>) -> Self {
        let fills = layout
            .stages
            .iter()
            .map(|s| vec![0.0; s.segment_count()])
            .collect();
        let pulsing = vec![false; layout.stages.len()];
        Self {
            layout,
            fills,
            pulsing,
            acquisition_stage,
            step_label: String::new(),
        }
    }

    pub fn layout(&self) -> &ProgressLayout {
        &self.layout
    }

    /// Fold one poll reading into the tracker and return the new frame.
    pub fn apply(&mut self, details: &ProgressDetails, step_label: &str) -> ProgressFrame {
        self.step_label = step_label.to_string();

        let stage = details.stage_index as usize;
        if stage == 0 {
            return self.frame();
        }

        let stage_count = self.fills.len();
        for idx in 0..(stage - 1).min(stage_count) {
            self.fill_stage(idx, 100.0);
        }

        self.pulsing.iter_mut().for_each(|p| *p = false);
        if stage > stage_count {
            return self.frame();
        }

        let idx = stage - 1;
        self.pulsing[idx] = true;

        if self.acquisition_stage == Some(details.stage_index) {
            if let Some((n, m)) = parse_item_count(step_label) {
                if m > 0 {
                    let done = n.saturating_sub(1).min(m) as f64 / m as f64;
                    self.fill_stage(idx, done * 100.0);
                }
            }
            return self.frame();
        }

        let segments = self.fills[idx].len();
        let sub = details.sub_stage_index as usize;
        for seg in 0..sub.saturating_sub(1).min(segments) {
            self.raise(idx, seg, 100.0);
        }
        if (1..=segments).contains(&sub) {
            self.raise(idx, sub - 1, details.sub_stage_progress);
        }

        self.frame()
    }

    /// Fill every segment and stop all animation.
    pub fn complete(&mut self) -> ProgressFrame {
        for idx in 0..self.fills.len() {
            self.fill_stage(idx, 100.0);
        }
        self.clear_pulsing();
        self.frame()
    }

    pub fn clear_pulsing(&mut self) {
        self.pulsing.iter_mut().for_each(|p| *p = false);
    }

    pub fn frame(&self) -> ProgressFrame {
        let stages: Vec<StageFill> = self
            .layout
            .stages
            .iter()
            .enumerate()
            .map(|(i, spec)| StageFill {
                label: spec.label.clone(),
                weight_fraction: self.layout.weight_fraction(i),
                sub_fills: self.fills[i].clone(),
                pulsing: self.pulsing[i],
            })
            .collect();
        let overall_percent = stages
            .iter()
            .map(|s| s.weight_fraction * s.percent())
            .sum::<f64>()
            .clamp(0.0, 100.0);

        ProgressFrame {
            stages,
            overall_percent,
            step_label: self.step_label.clone(),
        }
    }

    // ---- private helpers ----

    fn fill_stage(&mut self, idx: usize, value: f64) {
        for seg in 0..self.fills[idx].len() {
            self.raise(idx, seg, value);
        }
    }

    fn raise(&mut self, idx: usize, seg: usize, value: f64) {
        let slot = &mut self.fills[idx][seg];
        *slot = slot.max(clamp_percent(value));
    }
}
