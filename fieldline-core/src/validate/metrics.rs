//! Quality metrics and their run-level reduction.

use crate::validate::model::ValidationResult;
use serde::{Deserialize, Serialize};

/// Weights of the composite quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_completeness")]
    pub completeness: f64,
    #[serde(default = "default_consistency")]
    pub consistency: f64,
    #[serde(default = "default_validity")]
    pub validity: f64,
}

fn default_completeness() -> f64 {
    0.5
}
fn default_consistency() -> f64 {
    0.3
}
fn default_validity() -> f64 {
    0.2
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: default_completeness(),
            consistency: default_consistency(),
            validity: default_validity(),
        }
    }
}

impl QualityWeights {
    /// Weighted mean of the three ratios, clamped to [0, 1].
    /// Zero total weight scores 1.0.
    pub fn score(&self, completeness: f64, consistency: f64, error_rate: f64) -> f64 {
        let total = self.completeness + self.consistency + self.validity;
        if total <= 0.0 {
            return 1.0;
        }
        let weighted = self.completeness * completeness
            + self.consistency * consistency
            + self.validity * (1.0 - error_rate);
        (weighted / total).clamp(0.0, 1.0)
    }
}

/// Raw counts behind the ratios of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCounts {
    pub rows: u64,
    pub required_cells: u64,
    pub filled_required_cells: u64,
    pub contradicting_rows: u64,
    pub error_rows: u64,
}

impl QualityCounts {
    pub fn absorb(&mut self, other: &QualityCounts) {
        self.rows += other.rows;
        self.required_cells += other.required_cells;
        self.filled_required_cells += other.filled_required_cells;
        self.contradicting_rows += other.contradicting_rows;
        self.error_rows += other.error_rows;
    }

    /// 1.0 when there are no required cells.
    pub fn completeness(&self) -> f64 {
        ratio(self.filled_required_cells, self.required_cells)
    }

    /// 1.0 for an empty batch.
    pub fn consistency(&self) -> f64 {
        1.0 - ratio_or_zero(self.contradicting_rows, self.rows)
    }

    pub fn error_rate(&self) -> f64 {
        ratio_or_zero(self.error_rows, self.rows)
    }

    pub fn metrics(&self, weights: &QualityWeights) -> QualityMetrics {
        let completeness = self.completeness();
        let consistency = self.consistency();
        let error_rate = self.error_rate();
        QualityMetrics {
            completeness,
            consistency,
            error_rate,
            quality_score: weights.score(completeness, consistency, error_rate),
            rows: self.rows,
            counts: *self,
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        1.0
    } else {
        part as f64 / whole as f64
    }
}

fn ratio_or_zero(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Quality of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completeness: f64,
    pub consistency: f64,
    pub error_rate: f64,
    pub quality_score: f64,
    pub rows: u64,
    pub counts: QualityCounts,
}

/// Run-level quality reduced from every batch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQuality {
    pub metrics: QualityMetrics,
    pub batches: usize,
    pub errors: usize,
    pub warnings: usize,
}

impl RunQuality {
    /// Quality of a run that validated nothing.
    pub fn empty(weights: &QualityWeights) -> Self {
        Self {
            metrics: QualityCounts::default().metrics(weights),
            batches: 0,
            errors: 0,
            warnings: 0,
        }
    }
}

/// Reduce batch results into run quality. Ratios are recomputed from the
/// summed counts, so every row weighs the same regardless of batch size.
pub fn summarize<'a>(
    results: impl IntoIterator<Item = &'a ValidationResult>,
    weights: &QualityWeights,
) -> RunQuality {
    let mut counts = QualityCounts::default();
    let mut batches = 0;
    let mut errors = 0;
    let mut warnings = 0;
    for result in results {
        counts.absorb(&result.metrics.counts);
        batches += 1;
        errors += result.errors.len();
        warnings += result.warnings.len();
    }
    RunQuality {
        metrics: counts.metrics(weights),
        batches,
        errors,
        warnings,
    }
}
