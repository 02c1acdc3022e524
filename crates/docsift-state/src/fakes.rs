//! In-memory implementation of [`ModelRepository`]
//!
//! `MemoryModelRepository` keeps every record behind one mutex, which gives
//! it the atomic usage updates and serialisable promotions the trait
//! contract asks for. It backs the test suites and the daemon's demo mode.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StorageError;
use crate::schema::*;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct RepositoryState {
    models: HashMap<ModelId, ModelRecord>,
    evaluations: HashMap<ModelId, Vec<EvaluationRecord>>,
    document_types: BTreeSet<DocumentType>,
}

impl RepositoryState {
    fn model(&self, id: &ModelId) -> StorageResult<&ModelRecord> {
        self.models
            .get(id)
            .ok_or_else(|| StorageError::ModelNotFound { id: id.to_string() })
    }

    fn model_mut(&mut self, id: &ModelId) -> StorageResult<&mut ModelRecord> {
        self.models
            .get_mut(id)
            .ok_or_else(|| StorageError::ModelNotFound { id: id.to_string() })
    }

    fn sorted<'a>(&self, records: impl Iterator<Item = &'a ModelRecord>) -> Vec<ModelRecord> {
        let mut out: Vec<ModelRecord> = records.cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

/// In-memory model repository backed by `HashMap`s under a single `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryModelRepository {
    state: Mutex<RepositoryState>,
}

impl MemoryModelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StorageResult<MutexGuard<'_, RepositoryState>> {
        self.state
            .lock()
            .map_err(|e| StorageError::Backend(format!("repository lock poisoned: {}", e)))
    }
}

#[async_trait]
impl ModelRepository for MemoryModelRepository {
    async fn insert_model(&self, record: ModelRecord) -> StorageResult<()> {
        let mut state = self.state()?;
        if state.models.contains_key(&record.id) {
            return Err(StorageError::DuplicateModel {
                id: record.id.to_string(),
            });
        }
        if record.is_production {
            if let Some(existing) = state
                .models
                .values()
                .find(|m| m.is_production && m.document_type == record.document_type)
            {
                return Err(StorageError::ModelInProduction {
                    id: existing.id.to_string(),
                    document_type: existing.document_type.to_string(),
                });
            }
        }
        state.document_types.insert(record.document_type.clone());
        state.models.insert(record.id, record);
        Ok(())
    }

    async fn get_model(&self, id: &ModelId) -> StorageResult<ModelRecord> {
        let state = self.state()?;
        state.model(id).cloned()
    }

    async fn list_models(&self, filter: &ModelFilter) -> StorageResult<Vec<ModelRecord>> {
        let state = self.state()?;
        Ok(state.sorted(state.models.values().filter(|m| filter.matches(m))))
    }

    async fn find_active_by_version(
        &self,
        version: &str,
        document_type: Option<&DocumentType>,
    ) -> StorageResult<Vec<ModelRecord>> {
        let state = self.state()?;
        Ok(state.sorted(state.models.values().filter(|m| {
            m.version == version
                && m.status == ModelStatus::Active
                && document_type.map(|dt| m.document_type == *dt).unwrap_or(true)
        })))
    }

    async fn find_production(
        &self,
        document_type: &DocumentType,
    ) -> StorageResult<Option<ModelRecord>> {
        let state = self.state()?;
        Ok(state
            .sorted(
                state
                    .models
                    .values()
                    .filter(|m| m.document_type == *document_type && m.is_serving()),
            )
            .into_iter()
            .next())
    }

    async fn register_document_type(&self, document_type: DocumentType) -> StorageResult<()> {
        let mut state = self.state()?;
        state.document_types.insert(document_type);
        Ok(())
    }

    async fn list_document_types(&self) -> StorageResult<Vec<DocumentType>> {
        let state = self.state()?;
        Ok(state.document_types.iter().cloned().collect())
    }

    async fn record_usage(
        &self,
        id: &ModelId,
        elapsed_secs: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<ModelRecord> {
        let mut state = self.state()?;
        let model = state.model_mut(id)?;
        model.record_inference(elapsed_secs, at);
        Ok(model.clone())
    }

    async fn promote(
        &self,
        id: &ModelId,
        promoted_by: Option<&str>,
        at: DateTime<Utc>,
    ) -> StorageResult<PromotionReceipt> {
        let mut state = self.state()?;
        let candidate = state.model(id)?;
        if candidate.status == ModelStatus::Archived {
            return Err(StorageError::ModelArchived { id: id.to_string() });
        }
        let document_type = candidate.document_type.clone();

        let mut demoted = Vec::new();
        for model in state.models.values_mut() {
            if model.id != *id && model.document_type == document_type && model.is_production {
                model.is_production = false;
                model.status = ModelStatus::Inactive;
                demoted.push(model.id);
            }
        }
        demoted.sort();

        let promoted = state.model_mut(id)?;
        promoted.is_production = true;
        promoted.status = ModelStatus::Active;
        promoted.promoted_at = Some(at);
        promoted.promoted_by = promoted_by.map(str::to_string);
        let promoted = promoted.clone();

        debug!(model_id = %id, demoted = demoted.len(), "promotion committed");
        Ok(PromotionReceipt { promoted, demoted })
    }

    async fn archive(&self, id: &ModelId) -> StorageResult<ModelRecord> {
        let mut state = self.state()?;
        let model = state.model_mut(id)?;
        if model.is_production {
            return Err(StorageError::ModelInProduction {
                id: id.to_string(),
                document_type: model.document_type.to_string(),
            });
        }
        model.status = ModelStatus::Archived;
        Ok(model.clone())
    }

    async fn add_evaluation(&self, evaluation: EvaluationRecord) -> StorageResult<()> {
        let mut state = self.state()?;
        state.model(&evaluation.model_id)?;
        state
            .evaluations
            .entry(evaluation.model_id)
            .or_default()
            .push(evaluation);
        Ok(())
    }

    async fn list_evaluations(&self, id: &ModelId) -> StorageResult<Vec<EvaluationRecord>> {
        let state = self.state()?;
        state.model(id)?;
        let mut evaluations = state.evaluations.get(id).cloned().unwrap_or_default();
        evaluations.sort_by_key(|e| e.timestamp);
        Ok(evaluations)
    }
}
