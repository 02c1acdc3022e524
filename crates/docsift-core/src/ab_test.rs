//! Challenger traffic splitting between two model versions.
//!
//! Tests live in memory only: a restart drops active tests and their
//! counters. Routing takes a short read lock on the registry to pick a test,
//! then works on the test's atomic counters without holding any lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use docsift_state::{DocumentType, ModelId, ModelRecord, ModelRepository};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Result, ServingError};
use crate::obs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbTestId(pub Uuid);

impl AbTestId {
    pub fn new() -> Self {
        AbTestId(Uuid::new_v4())
    }
}

impl Default for AbTestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AbTestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AbTestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(AbTestId(Uuid::parse_str(s)?))
    }
}

/// Which side of a test served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbArm {
    ModelA,
    ModelB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbTestStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    ModelA,
    ModelB,
    Tie,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::ModelA => "model_a",
            Winner::ModelB => "model_b",
            Winner::Tie => "tie",
        }
    }
}

#[derive(Debug)]
struct ArmCounters {
    model_id: ModelId,
    version: String,
    requests: AtomicU64,
    successes: AtomicU64,
}

impl ArmCounters {
    fn new(model: &ModelRecord) -> Self {
        Self {
            model_id: model.id,
            version: model.version.clone(),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
        }
    }

    fn results(&self) -> ArmResults {
        let requests = self.requests.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        ArmResults {
            model_id: self.model_id,
            version: self.version.clone(),
            requests,
            successes,
            success_rate: successes as f64 / requests.max(1) as f64,
        }
    }
}

#[derive(Debug)]
struct AbTest {
    id: AbTestId,
    document_type: DocumentType,
    model_a: ArmCounters,
    model_b: ArmCounters,
    traffic_split: f64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    completed: AtomicBool,
}

impl AbTest {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.completed.load(Ordering::Acquire) && now <= self.end_time
    }

    fn arm(&self, arm: AbArm) -> &ArmCounters {
        match arm {
            AbArm::ModelA => &self.model_a,
            AbArm::ModelB => &self.model_b,
        }
    }

    fn status(&self) -> AbTestStatus {
        if self.completed.load(Ordering::Acquire) {
            AbTestStatus::Completed
        } else {
            AbTestStatus::Active
        }
    }

    fn results(&self) -> AbTestResults {
        let model_a = self.model_a.results();
        let model_b = self.model_b.results();
        let winner = if model_a.success_rate > model_b.success_rate {
            Winner::ModelA
        } else if model_b.success_rate > model_a.success_rate {
            Winner::ModelB
        } else {
            Winner::Tie
        };
        AbTestResults {
            test_id: self.id,
            document_type: self.document_type.clone(),
            status: self.status(),
            traffic_split: self.traffic_split,
            start_time: self.start_time,
            end_time: self.end_time,
            model_a,
            model_b,
            winner,
        }
    }

    /// Flip to completed; true only for the caller that did the flip.
    fn complete(&self) -> bool {
        !self.completed.swap(true, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmResults {
    pub model_id: ModelId,
    pub version: String,
    pub requests: u64,
    pub successes: u64,
    pub success_rate: f64,
}

/// Snapshot of a test's counters; may trail in-flight requests slightly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestResults {
    pub test_id: AbTestId,
    pub document_type: DocumentType,
    pub status: AbTestStatus,
    pub traffic_split: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub model_a: ArmResults,
    pub model_b: ArmResults,
    pub winner: Winner,
}

/// Test membership of a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbAssignment {
    pub test_id: AbTestId,
    pub arm: AbArm,
}

/// The model chosen for a request, and the test that chose it if any.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedModel {
    pub model: ModelRecord,
    pub assignment: Option<AbAssignment>,
}

/// Deterministic bucket in `0..100` for a user within one test.
///
/// SHA-256 of `"{user}_{test}"` read as a big-endian integer, mod 100.
pub fn user_bucket(user_id: &str, test_id: &AbTestId) -> u8 {
    let digest = Sha256::digest(format!("{}_{}", user_id, test_id).as_bytes());
    let bucket = digest
        .iter()
        .fold(0u32, |acc, byte| (acc * 256 + u32::from(*byte)) % 100);
    bucket as u8
}

pub struct AbTestCoordinator {
    repository: Arc<dyn ModelRepository>,
    clock: Arc<dyn Clock>,
    tests: RwLock<HashMap<AbTestId, Arc<AbTest>>>,
}

impl AbTestCoordinator {
    pub fn new(repository: Arc<dyn ModelRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            tests: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AbTestId, Arc<AbTest>>> {
        self.tests.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AbTestId, Arc<AbTest>>> {
        self.tests.write().unwrap_or_else(|e| e.into_inner())
    }

    fn test(&self, test_id: &AbTestId) -> Result<Arc<AbTest>> {
        self.read()
            .get(test_id)
            .cloned()
            .ok_or_else(|| ServingError::TestNotFound(test_id.to_string()))
    }

    /// Start splitting traffic between `model_a` (incumbent) and `model_b`.
    ///
    /// `traffic_split` is the fraction routed to `model_b`. `duration` must be
    /// positive and keep the end time representable.
    pub async fn start(
        &self,
        model_a: &ModelId,
        model_b: &ModelId,
        traffic_split: f64,
        duration: Duration,
    ) -> Result<AbTestId> {
        if !(traffic_split > 0.0 && traffic_split < 1.0) {
            return Err(ServingError::InvalidTrafficSplit(traffic_split));
        }
        if duration <= Duration::zero() {
            return Err(ServingError::InvalidTestDuration(format!(
                "must be positive, got {}",
                duration
            )));
        }
        let a = self.repository.get_model(model_a).await?;
        let b = self.repository.get_model(model_b).await?;
        if a.document_type != b.document_type {
            return Err(ServingError::DocumentTypeMismatch {
                expected: a.document_type,
                challenger: b.document_type,
            });
        }

        let start_time = self.clock.now();
        let end_time = start_time.checked_add_signed(duration).ok_or_else(|| {
            ServingError::InvalidTestDuration(format!("{} overflows the end time", duration))
        })?;
        let test = AbTest {
            id: AbTestId::new(),
            document_type: a.document_type.clone(),
            model_a: ArmCounters::new(&a),
            model_b: ArmCounters::new(&b),
            traffic_split,
            start_time,
            end_time,
            completed: AtomicBool::new(false),
        };
        let id = test.id;
        obs::emit_ab_test_started(
            &id.to_string(),
            &test.document_type,
            &a.id,
            &b.id,
            traffic_split,
        );
        self.write().insert(id, Arc::new(test));
        Ok(id)
    }

    fn live_test_for(&self, document_type: &DocumentType) -> Option<Arc<AbTest>> {
        let now = self.clock.now();
        self.read()
            .values()
            .filter(|t| t.document_type == *document_type && t.is_live(now))
            .min_by_key(|t| (t.start_time, t.id))
            .cloned()
    }

    /// Pick a model for `document_type` from its live test, if one exists.
    ///
    /// With a `user_id` the choice is sticky for the life of the test;
    /// without one each request draws independently.
    pub async fn route(
        &self,
        document_type: &DocumentType,
        user_id: Option<&str>,
    ) -> Result<Option<RoutedModel>> {
        let Some(test) = self.live_test_for(document_type) else {
            return Ok(None);
        };

        let use_b = match user_id {
            Some(user) => f64::from(user_bucket(user, &test.id)) < test.traffic_split * 100.0,
            None => rand::random::<f64>() < test.traffic_split,
        };
        let arm = if use_b { AbArm::ModelB } else { AbArm::ModelA };
        let counters = test.arm(arm);
        counters.requests.fetch_add(1, Ordering::Relaxed);

        let model = self.repository.get_model(&counters.model_id).await?;
        Ok(Some(RoutedModel {
            model,
            assignment: Some(AbAssignment {
                test_id: test.id,
                arm,
            }),
        }))
    }

    /// Like [`route`](Self::route), falling back to the production model.
    pub async fn route_request(
        &self,
        document_type: &DocumentType,
        user_id: Option<&str>,
    ) -> Result<RoutedModel> {
        if let Some(routed) = self.route(document_type, user_id).await? {
            return Ok(routed);
        }
        let model = self
            .repository
            .find_production(document_type)
            .await?
            .ok_or_else(|| ServingError::NoProductionModel(document_type.clone()))?;
        Ok(RoutedModel {
            model,
            assignment: None,
        })
    }

    /// Count a successful outcome for the arm serving `model_id`.
    ///
    /// Unknown tests and models outside the test are ignored.
    pub fn record_result(&self, test_id: &AbTestId, model_id: &ModelId, success: bool) {
        let Ok(test) = self.test(test_id) else {
            return;
        };
        if !success {
            return;
        }
        if test.model_a.model_id == *model_id {
            test.model_a.successes.fetch_add(1, Ordering::Relaxed);
        } else if test.model_b.model_id == *model_id {
            test.model_b.successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn results(&self, test_id: &AbTestId) -> Result<AbTestResults> {
        Ok(self.test(test_id)?.results())
    }

    /// Complete every active test whose end time has passed.
    pub fn expire_stale_tests(&self, now: DateTime<Utc>) -> Vec<AbTestResults> {
        let expired: Vec<Arc<AbTest>> = self
            .read()
            .values()
            .filter(|t| now > t.end_time)
            .cloned()
            .collect();

        let mut completed = Vec::new();
        for test in expired {
            if test.complete() {
                let results = test.results();
                log_completion(&results);
                completed.push(results);
            }
        }
        completed.sort_by_key(|r| (r.start_time, r.test_id));
        completed
    }

    /// Complete a test ahead of its end time.
    pub fn close(&self, test_id: &AbTestId) -> Result<AbTestResults> {
        let test = self.test(test_id)?;
        let newly_closed = test.complete();
        let results = test.results();
        if newly_closed {
            log_completion(&results);
        }
        Ok(results)
    }

    pub fn active_count(&self) -> usize {
        let now = self.clock.now();
        self.read().values().filter(|t| t.is_live(now)).count()
    }

    pub fn list(&self) -> Vec<AbTestResults> {
        let mut all: Vec<AbTestResults> = self.read().values().map(|t| t.results()).collect();
        all.sort_by_key(|r| (r.start_time, r.test_id));
        all
    }
}

fn log_completion(results: &AbTestResults) {
    obs::emit_ab_test_completed(
        &results.test_id.to_string(),
        results.winner.as_str(),
        results.model_a.success_rate,
        results.model_b.success_rate,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_and_bounded() {
        let test_id = AbTestId::new();
        let first = user_bucket("u1", &test_id);
        assert!(first < 100);
        for _ in 0..10 {
            assert_eq!(user_bucket("u1", &test_id), first);
        }
    }

    #[test]
    fn bucket_matches_big_endian_reduction() {
        let test_id: AbTestId = "00000000-0000-4000-8000-000000000000"
            .parse()
            .expect("uuid");
        let digest = Sha256::digest(format!("alice_{}", test_id).as_bytes());
        // 2^8 = 56 (mod 100); reduce pairwise from the most significant byte
        let mut expected = 0u32;
        for byte in digest.iter() {
            expected = (expected * 56 + u32::from(*byte)) % 100;
        }
        assert_eq!(u32::from(user_bucket("alice", &test_id)), expected);
    }

    #[test]
    fn winner_requires_strictly_higher_rate() {
        let model = ModelRecord::new("1", "invoice", "/m");
        let test = AbTest {
            id: AbTestId::new(),
            document_type: "invoice".into(),
            model_a: ArmCounters::new(&model),
            model_b: ArmCounters::new(&model),
            traffic_split: 0.5,
            start_time: Utc::now(),
            end_time: Utc::now(),
            completed: AtomicBool::new(false),
        };
        assert_eq!(test.results().winner, Winner::Tie);

        test.model_b.requests.fetch_add(2, Ordering::Relaxed);
        test.model_b.successes.fetch_add(1, Ordering::Relaxed);
        assert_eq!(test.results().winner, Winner::ModelB);
        assert_eq!(test.results().model_b.success_rate, 0.5);

        assert!(test.complete());
        assert!(!test.complete());
        assert_eq!(test.status(), AbTestStatus::Completed);
    }
}
