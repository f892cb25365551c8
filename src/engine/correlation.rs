//! Pairwise signal correlation and diversification scoring.

use crate::config::CorrelationConfig;
use crate::error::{EngineError, EngineResult};
use crate::layer::{SignalAction, SignalEvent};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Correlation strength bucket for a strategy pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    High,
    Medium,
    Low,
}

/// Pearson correlation between two strategies' daily signal series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCorrelation {
    pub strategy_a: String,
    pub strategy_b: String,
    pub correlation: f64,
    pub strength: CorrelationStrength,
    /// Number of dates both series share; below 2 the correlation defaults
    /// to 0 (low confidence).
    pub common_dates: usize,
}

/// Layer-wide correlation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub pairs: Vec<PairCorrelation>,
    /// Average of |r| across all pairs.
    pub avg_abs_correlation: f64,
    /// Maximum of |r| across all pairs.
    pub max_abs_correlation: f64,
    /// 0-100, higher means less correlated strategies.
    pub diversification_score: u8,
}

/// Daily signal series: one averaged score per UTC calendar day.
///
/// Buy contributes +1, Sell -1; Hold and absent days are omitted so they
/// carry no weight in the correlation.
pub type DailySeries = BTreeMap<NaiveDate, f64>;

/// Computes pairwise signal correlation across a layer's strategies.
///
/// Pure computation over already-fetched signal history; no side effects.
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    /// Analyze signal correlation across strategies.
    ///
    /// `signals_by_strategy` maps each enabled strategy to its raw signal
    /// events over the lookback window. Fewer than two strategies is an
    /// insufficient-members condition, not a numeric result.
    pub fn analyze(
        &self,
        signals_by_strategy: &HashMap<String, Vec<SignalEvent>>,
    ) -> EngineResult<CorrelationReport> {
        if signals_by_strategy.len() < 2 {
            return Err(EngineError::InsufficientMembers {
                required: 2,
                actual: signals_by_strategy.len(),
            });
        }

        let mut series: Vec<(String, DailySeries)> = signals_by_strategy
            .iter()
            .map(|(id, events)| (id.clone(), build_daily_series(events)))
            .collect();
        // Deterministic pair ordering regardless of map iteration order.
        series.sort_by(|a, b| a.0.cmp(&b.0));

        let mut pairs = Vec::new();
        for i in 0..series.len() {
            for j in (i + 1)..series.len() {
                let (ref id_a, ref series_a) = series[i];
                let (ref id_b, ref series_b) = series[j];
                let (correlation, common_dates) = pearson_on_common_dates(series_a, series_b);
                pairs.push(PairCorrelation {
                    strategy_a: id_a.clone(),
                    strategy_b: id_b.clone(),
                    correlation,
                    strength: self.classify(correlation),
                    common_dates,
                });
            }
        }

        let abs: Vec<f64> = pairs.iter().map(|p| p.correlation.abs()).collect();
        let avg_abs_correlation = abs.iter().sum::<f64>() / abs.len() as f64;
        let max_abs_correlation = abs.iter().cloned().fold(0.0_f64, f64::max);

        let diversification_score =
            diversification_score(avg_abs_correlation, max_abs_correlation);

        debug!(
            pairs = pairs.len(),
            avg = avg_abs_correlation,
            max = max_abs_correlation,
            score = diversification_score,
            "Correlation analysis complete"
        );

        Ok(CorrelationReport {
            pairs,
            avg_abs_correlation,
            max_abs_correlation,
            diversification_score,
        })
    }

    fn classify(&self, correlation: f64) -> CorrelationStrength {
        let abs = correlation.abs();
        if abs >= self.config.high_threshold {
            CorrelationStrength::High
        } else if abs >= self.config.medium_threshold {
            CorrelationStrength::Medium
        } else {
            CorrelationStrength::Low
        }
    }
}

/// Build one daily series from raw signal events.
///
/// Multiple signals on the same UTC day are averaged; Hold signals count as
/// 0 in that day's average.
pub fn build_daily_series(events: &[SignalEvent]) -> DailySeries {
    let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for event in events {
        let entry = sums.entry(event.day_bucket()).or_insert((0.0, 0));
        entry.0 += event.action.as_score();
        entry.1 += 1;
    }

    sums.into_iter()
        .filter(|(_, (_, count))| *count > 0)
        .map(|(date, (sum, count))| (date, sum / count as f64))
        .collect()
}

/// Pearson correlation over the key-set intersection of two date-keyed
/// series.
///
/// This is an explicit inner join on dates, not positional alignment:
/// misaligned or sparse series only contribute dates present in both.
/// Fewer than 2 common dates, or zero variance on either side, defaults to
/// 0 (low confidence).
fn pearson_on_common_dates(a: &DailySeries, b: &DailySeries) -> (f64, usize) {
    let joined: Vec<(f64, f64)> = a
        .iter()
        .filter_map(|(date, &va)| b.get(date).map(|&vb| (va, vb)))
        .collect();

    let n = joined.len();
    if n < 2 {
        return (0.0, n);
    }

    let nf = n as f64;
    let mean_a = joined.iter().map(|(x, _)| x).sum::<f64>() / nf;
    let mean_b = joined.iter().map(|(_, y)| y).sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in &joined {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        return (0.0, n);
    }

    ((cov / denom).clamp(-1.0, 1.0), n)
}

/// Diversification score: round(50*(1-avg|r|) + 50*(1-max|r|)).
///
/// Bounded to [0, 100] by construction since both inputs lie in [0, 1].
fn diversification_score(avg_abs: f64, max_abs: f64) -> u8 {
    let score = 50.0 * (1.0 - avg_abs) + 50.0 * (1.0 - max_abs);
    score.round().clamp(0.0, 100.0) as u8
}
