//! Reference engine that replays a bounded list of records.
//!
//! It performs no learning; it exists so the orchestrator can be driven end
//! to end. Parameters live in a `path -> name -> value` tree. The sensor's
//! `position` parameter is the record cursor, so callbacks can rewind the data
//! source by setting it. Every region whose `learningMode` is `true` counts
//! the iterations it saw in `learnedIterations`.

use crate::engine::checkpoint::CheckpointStore;
use crate::engine::{ComputeEngine, IterationOutcome};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

pub const SENSOR: &str = "sensor";
pub const REGIONS: [&str; 3] = ["stage1", "stage2", "classifier"];

type ParameterTree = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    parameters: ParameterTree,
    iterations: u64,
}

/// Engine over an in-memory record source.
#[derive(Debug)]
pub struct ReplayEngine {
    records: Vec<Value>,
    parameters: ParameterTree,
    iterations: u64,
    built: bool,
    store: Option<CheckpointStore>,
}

impl ReplayEngine {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            parameters: ParameterTree::new(),
            iterations: 0,
            built: false,
            store: None,
        }
    }

    /// `count` records of the form `{"index": i}`.
    pub fn synthetic(count: usize) -> Self {
        Self::new((0..count).map(|i| json!({ "index": i })).collect())
    }

    /// Read one JSON record per non-empty line.
    pub fn from_json_lines(path: &Path) -> Result<Self, EngineError> {
        let file = std::fs::File::open(path)?;
        let mut records = Vec::new();
        for line in std::io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(Self::new(records))
    }

    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Total iterations executed since the engine was built or loaded.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    fn initial_parameters() -> ParameterTree {
        let mut tree = ParameterTree::new();
        tree.insert(
            SENSOR.to_string(),
            BTreeMap::from([
                ("position".to_string(), json!(0)),
                ("lastRecord".to_string(), Value::Null),
            ]),
        );
        for region in REGIONS {
            tree.insert(
                region.to_string(),
                BTreeMap::from([
                    ("learningMode".to_string(), json!(false)),
                    ("inferenceMode".to_string(), json!(false)),
                    ("learnedIterations".to_string(), json!(0)),
                ]),
            );
        }
        tree
    }

    fn cursor(&self) -> usize {
        self.parameters
            .get(SENSOR)
            .and_then(|p| p.get("position"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }

    fn step_once(&mut self) -> IterationOutcome {
        let cursor = self.cursor();
        let Some(record) = self.records.get(cursor).cloned() else {
            return IterationOutcome::Exhausted;
        };

        if let Some(sensor) = self.parameters.get_mut(SENSOR) {
            sensor.insert("position".to_string(), json!(cursor + 1));
            sensor.insert("lastRecord".to_string(), record);
        }
        for params in self.parameters.values_mut() {
            if params.get("learningMode") == Some(&Value::Bool(true)) {
                let learned = params
                    .get("learnedIterations")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                params.insert("learnedIterations".to_string(), json!(learned + 1));
            }
        }
        self.iterations += 1;
        IterationOutcome::Continued
    }

    fn store(&self) -> Result<&CheckpointStore, EngineError> {
        self.store.as_ref().ok_or_else(|| EngineError::Failed {
            message: "no checkpoint store configured".to_string(),
        })
    }
}

impl ComputeEngine for ReplayEngine {
    fn build(&mut self) -> Result<(), EngineError> {
        self.parameters = Self::initial_parameters();
        self.iterations = 0;
        self.built = true;
        tracing::debug!(records = self.records.len(), "replay engine built");
        Ok(())
    }

    fn run(&mut self, iterations: u64) -> Result<IterationOutcome, EngineError> {
        if !self.built {
            return Err(EngineError::NotBuilt);
        }
        for _ in 0..iterations {
            if self.step_once() == IterationOutcome::Exhausted {
                return Ok(IterationOutcome::Exhausted);
            }
        }
        Ok(IterationOutcome::Continued)
    }

    fn save(&mut self, label: &str) -> Result<(), EngineError> {
        if !self.built {
            return Err(EngineError::NotBuilt);
        }
        let snapshot = Snapshot {
            parameters: self.parameters.clone(),
            iterations: self.iterations,
        };
        self.store()?.save(label, &snapshot)?;
        Ok(())
    }

    fn load(&mut self, label: &str) -> Result<(), EngineError> {
        let snapshot: Snapshot = self.store()?.load(label)?;
        self.parameters = snapshot.parameters;
        self.iterations = snapshot.iterations;
        self.built = true;
        tracing::debug!(label, iterations = self.iterations, "replay engine restored");
        Ok(())
    }

    fn get_parameter(&self, path: &str, name: &str) -> Result<Value, EngineError> {
        self.parameters
            .get(path)
            .and_then(|p| p.get(name))
            .cloned()
            .ok_or_else(|| EngineError::UnknownParameter {
                path: path.to_string(),
                name: name.to_string(),
            })
    }

    fn set_parameter(&mut self, path: &str, name: &str, value: Value) -> Result<(), EngineError> {
        let params = self
            .parameters
            .get_mut(path)
            .filter(|p| p.contains_key(name))
            .ok_or_else(|| EngineError::UnknownParameter {
                path: path.to_string(),
                name: name.to_string(),
            })?;
        params.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_until_exhausted() {
        let mut engine = ReplayEngine::synthetic(3);
        engine.build().unwrap();
        assert_eq!(engine.run(2).unwrap(), IterationOutcome::Continued);
        assert_eq!(engine.run(1).unwrap(), IterationOutcome::Continued);
        assert_eq!(engine.run(1).unwrap(), IterationOutcome::Exhausted);
        assert_eq!(engine.iterations(), 3);
        assert_eq!(engine.get_parameter(SENSOR, "lastRecord").unwrap(), json!({"index": 2}));
    }

    #[test]
    fn test_run_before_build_fails() {
        let mut engine = ReplayEngine::synthetic(3);
        assert!(matches!(engine.run(1), Err(EngineError::NotBuilt)));
    }

    #[test]
    fn test_rewind_through_sensor_position() {
        let mut engine = ReplayEngine::synthetic(2);
        engine.build().unwrap();
        engine.run(2).unwrap();
        assert_eq!(engine.run(1).unwrap(), IterationOutcome::Exhausted);
        engine.set_parameter(SENSOR, "position", json!(0)).unwrap();
        assert_eq!(engine.run(1).unwrap(), IterationOutcome::Continued);
    }

    #[test]
    fn test_learning_mode_counts_iterations() {
        let mut engine = ReplayEngine::synthetic(10);
        engine.build().unwrap();
        engine.set_parameter("stage1", "learningMode", json!(true)).unwrap();
        engine.run(4).unwrap();
        engine.set_parameter("stage1", "learningMode", json!(false)).unwrap();
        engine.run(3).unwrap();
        assert_eq!(engine.get_parameter("stage1", "learnedIterations").unwrap(), json!(4));
        assert_eq!(engine.get_parameter("stage2", "learnedIterations").unwrap(), json!(0));
    }

    #[test]
    fn test_unknown_parameter() {
        let mut engine = ReplayEngine::synthetic(1);
        engine.build().unwrap();
        assert!(matches!(
            engine.set_parameter("stage9", "learningMode", json!(true)),
            Err(EngineError::UnknownParameter { .. })
        ));
        assert!(engine.get_parameter("stage1", "bogus").is_err());
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut engine = ReplayEngine::synthetic(5).with_store(CheckpointStore::new(dir.path()));
        engine.build().unwrap();
        engine.run(3).unwrap();
        engine.save("stage1TrainedCheckpoint").unwrap();

        let mut restored = ReplayEngine::synthetic(5).with_store(CheckpointStore::new(dir.path()));
        restored.load("stage1TrainedCheckpoint").unwrap();
        assert!(restored.is_built());
        assert_eq!(restored.iterations(), 3);
        assert_eq!(restored.run(2).unwrap(), IterationOutcome::Continued);
        assert_eq!(restored.run(1).unwrap(), IterationOutcome::Exhausted);
    }

    #[test]
    fn test_load_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut engine = ReplayEngine::synthetic(1).with_store(CheckpointStore::new(dir.path()));
        assert!(matches!(
            engine.load("fullyTrainedCheckpoint"),
            Err(EngineError::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn test_from_json_lines_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        std::fs::write(&path, "{\"x\": 1}\n\n{\"x\": 2}\n").unwrap();
        let engine = ReplayEngine::from_json_lines(&path).unwrap();
        assert_eq!(engine.record_count(), 2);
    }
}
