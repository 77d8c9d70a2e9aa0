//! One-step-ahead CPU forecasting from the metrics history.
//!
//! Each history row's `(cpu, memory)` is paired with the next row's `cpu`, an
//! ordinary least squares fit is made on a seeded shuffle of those pairs, and
//! the held-out rows give an R² quality score. The fitted coefficients are
//! written as a small JSON artifact that `predict` reloads on demand.

use crate::config::ForecastConfig;
use crate::error::{StoreError, ensure_parent};
use crate::history::HistoryStore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Relative tolerance under which the normal equations are treated as singular.
const SINGULAR_EPS: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("insufficient data: {have} history records, need {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("training data produced no usable fit")]
    Degenerate,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastModel {
    pub intercept: f64,
    pub cpu_coef: f64,
    pub memory_coef: f64,
    pub trained_at: String,
    pub samples: usize,
}

impl ForecastModel {
    pub fn estimate(&self, cpu: f64, memory: f64) -> f64 {
        self.intercept + self.cpu_coef * cpu + self.memory_coef * memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub model: ForecastModel,
    /// R² on the held-out rows.
    pub score: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

pub struct Forecaster {
    history: HistoryStore,
    model_path: PathBuf,
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(history: HistoryStore, model_path: impl Into<PathBuf>, config: ForecastConfig) -> Self {
        Self {
            history,
            model_path: model_path.into(),
            config,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Fit and persist a new model, replacing any previous artifact. Nothing
    /// is written when the history is too short.
    pub fn train(&self) -> Result<TrainReport, ForecastError> {
        let records = self.history.try_load()?;
        let need = self.config.min_records.max(3);
        if records.len() < need {
            return Err(ForecastError::InsufficientData {
                have: records.len(),
                need,
            });
        }

        let mut pairs: Vec<([f64; 2], f64)> = records
            .iter()
            .zip(records.iter().skip(1))
            .map(|(current, next)| {
                (
                    [f64::from(current.cpu), f64::from(current.memory)],
                    f64::from(next.cpu),
                )
            })
            .filter(|(x, y)| x.iter().all(|v| v.is_finite()) && y.is_finite())
            .collect();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        pairs.shuffle(&mut rng);

        let test_rows = ((pairs.len() as f64 * self.config.test_fraction).ceil() as usize)
            .clamp(1, pairs.len().saturating_sub(2).max(1));
        let (test, train) = pairs.split_at(test_rows.min(pairs.len()));
        if train.len() < 2 {
            return Err(ForecastError::Degenerate);
        }

        let (intercept, cpu_coef, memory_coef) = fit_ols(train)?;
        let model = ForecastModel {
            intercept,
            cpu_coef,
            memory_coef,
            trained_at: chrono::Utc::now().to_rfc3339(),
            samples: train.len(),
        };
        let score = r_squared(&model, test);

        self.try_save_model(&model)?;
        info!(
            "[forecast] trained on {} rows, R² {:.3} on {} held out",
            train.len(),
            score,
            test.len()
        );

        Ok(TrainReport {
            model,
            score,
            train_rows: train.len(),
            test_rows: test.len(),
        })
    }

    pub fn try_load_model(&self) -> Result<Option<ForecastModel>, StoreError> {
        if !self.model_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.model_path)
            .map_err(|err| StoreError::io(&self.model_path, err))?;
        let model = serde_json::from_str(&content)
            .map_err(|err| StoreError::json(&self.model_path, err))?;
        Ok(Some(model))
    }

    pub fn load_model(&self) -> Option<ForecastModel> {
        self.try_load_model().unwrap_or_else(|err| {
            warn!("[forecast] model unusable: {err}");
            None
        })
    }

    /// Next-tick CPU estimate rounded to two decimals; `None` without a model.
    pub fn predict(&self, cpu: f64, memory: f64) -> Option<f64> {
        let model = self.load_model()?;
        let estimate = model.estimate(cpu, memory);
        if !estimate.is_finite() {
            debug!("[forecast] non-finite estimate for cpu={cpu} mem={memory}");
            return None;
        }
        Some((estimate * 100.0).round() / 100.0)
    }

    fn try_save_model(&self, model: &ForecastModel) -> Result<(), StoreError> {
        ensure_parent(&self.model_path)?;
        let json = serde_json::to_string_pretty(model)
            .map_err(|err| StoreError::json(&self.model_path, err))?;
        let tmp = self.model_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|err| StoreError::io(&tmp, err))?;
        std::fs::rename(&tmp, &self.model_path).map_err(|err| StoreError::io(&self.model_path, err))
    }
}

/// Least squares on centred data. A singular design falls back to whichever
/// single feature still varies, and finally to the mean of `y`.
fn fit_ols(rows: &[([f64; 2], f64)]) -> Result<(f64, f64, f64), ForecastError> {
    if rows.is_empty() {
        return Err(ForecastError::Degenerate);
    }
    let n = rows.len() as f64;
    let mean_x1 = rows.iter().map(|(x, _)| x[0]).sum::<f64>() / n;
    let mean_x2 = rows.iter().map(|(x, _)| x[1]).sum::<f64>() / n;
    let mean_y = rows.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut s11, mut s22, mut s12, mut s1y, mut s2y) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (x, y) in rows {
        let (d1, d2, dy) = (x[0] - mean_x1, x[1] - mean_x2, y - mean_y);
        s11 += d1 * d1;
        s22 += d2 * d2;
        s12 += d1 * d2;
        s1y += d1 * dy;
        s2y += d2 * dy;
    }

    let det = s11 * s22 - s12 * s12;
    let (b1, b2) = if det > SINGULAR_EPS * (s11 * s22).max(f64::MIN_POSITIVE) {
        ((s22 * s1y - s12 * s2y) / det, (s11 * s2y - s12 * s1y) / det)
    } else if s11 > SINGULAR_EPS {
        (s1y / s11, 0.0)
    } else if s22 > SINGULAR_EPS {
        (0.0, s2y / s22)
    } else {
        (0.0, 0.0)
    };

    let intercept = mean_y - b1 * mean_x1 - b2 * mean_x2;
    if [intercept, b1, b2].iter().all(|v| v.is_finite()) {
        Ok((intercept, b1, b2))
    } else {
        Err(ForecastError::Degenerate)
    }
}

fn r_squared(model: &ForecastModel, rows: &[([f64; 2], f64)]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let mean = rows.iter().map(|(_, y)| y).sum::<f64>() / rows.len() as f64;
    let (ss_res, ss_tot) = rows.iter().fold((0.0, 0.0), |(res, tot), (x, y)| {
        let err = y - model.estimate(x[0], x[1]);
        (res + err * err, tot + (y - mean) * (y - mean))
    });
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HistoryRecord;

    fn forecaster(dir: &Path, records: impl IntoIterator<Item = (f32, f32)>) -> Forecaster {
        let history = HistoryStore::new(dir.join("history.csv"), 1000);
        for (i, (cpu, memory)) in records.into_iter().enumerate() {
            history.append(&HistoryRecord {
                time: format!("2026-01-01 00:00:{:02}", i % 60),
                cpu,
                memory,
                processes: 100,
            });
        }
        Forecaster::new(
            history,
            dir.join("cpu_forecast_model.json"),
            ForecastConfig::default(),
        )
    }

    /// cpu[i+1] = 0.5 * cpu[i] + 0.1 * memory[i] + 3
    fn linear_series(len: usize) -> Vec<(f32, f32)> {
        let mut cpu = 20.0f64;
        (0..len)
            .map(|i| {
                let memory = 40.0 + ((i * 7) % 13) as f64;
                let row = (cpu as f32, memory as f32);
                cpu = 0.5 * f64::from(row.0) + 0.1 * memory + 3.0;
                row
            })
            .collect()
    }

    #[test]
    fn short_history_is_rejected_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let forecaster = forecaster(dir.path(), linear_series(29));

        match forecaster.train() {
            Err(ForecastError::InsufficientData { have, need }) => {
                assert_eq!(have, 29);
                assert_eq!(need, 30);
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
        assert!(!forecaster.model_path().exists());
        assert_eq!(forecaster.predict(10.0, 50.0), None);
    }

    #[test]
    fn short_history_keeps_existing_model() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("cpu_forecast_model.json");
        std::fs::write(
            &model_path,
            r#"{"intercept":1.0,"cpu_coef":0.0,"memory_coef":0.0,"trained_at":"x","samples":5}"#,
        )
        .unwrap();

        let forecaster = forecaster(dir.path(), linear_series(5));
        assert!(forecaster.train().is_err());
        assert_eq!(forecaster.predict(50.0, 50.0), Some(1.0));
    }

    #[test]
    fn recovers_linear_relationship() {
        let dir = tempfile::tempdir().unwrap();
        let forecaster = forecaster(dir.path(), linear_series(120));

        let report = forecaster.train().unwrap();
        assert!(report.score > 0.99, "R² was {}", report.score);
        assert!((report.model.cpu_coef - 0.5).abs() < 0.01);
        assert!((report.model.memory_coef - 0.1).abs() < 0.01);
        assert_eq!(report.train_rows + report.test_rows, 119);
        assert_eq!(report.test_rows, 24);

        let prediction = forecaster.predict(20.0, 50.0).unwrap();
        assert!((prediction - 18.0).abs() < 0.05);
        assert_eq!(prediction, (prediction * 100.0).round() / 100.0);
    }

    #[test]
    fn constant_history_predicts_mean() {
        let dir = tempfile::tempdir().unwrap();
        let forecaster = forecaster(dir.path(), std::iter::repeat_n((10.0, 50.0), 40));

        let report = forecaster.train().unwrap();
        assert_eq!(report.score, 1.0);
        assert_eq!(forecaster.predict(90.0, 10.0), Some(10.0));
    }

    #[test]
    fn corrupt_model_means_no_forecast() {
        let dir = tempfile::tempdir().unwrap();
        let forecaster = forecaster(dir.path(), Vec::new());
        std::fs::write(forecaster.model_path(), "not json").unwrap();

        assert!(forecaster.try_load_model().is_err());
        assert_eq!(forecaster.predict(1.0, 1.0), None);
    }

    #[test]
    fn training_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let forecaster = forecaster(dir.path(), linear_series(60));

        let a = forecaster.train().unwrap();
        let b = forecaster.train().unwrap();
        assert_eq!(a.score, b.score);
        assert_eq!(a.model.intercept, b.model.intercept);
    }
}
