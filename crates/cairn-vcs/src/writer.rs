// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding-aware record writer.
//!
//! Embedding is best effort: a failing or absent provider yields a record
//! without a vector, never a failed write.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use cairn_core::types::{
    EmbeddingInput, ObservationType, RecordKind, RelationKey, SourceType, VersionedRecord,
};
use cairn_core::{CairnError, EmbeddingAdapter, StorageAdapter};

/// Optional embedding provider whose failures degrade to `None`.
#[derive(Clone, Default)]
pub struct SoftEmbedder {
    inner: Option<Arc<dyn EmbeddingAdapter>>,
}

impl SoftEmbedder {
    pub fn new(inner: Option<Arc<dyn EmbeddingAdapter>>) -> Self {
        Self { inner }
    }

    /// The vector for `text`, or `None` if no provider is configured or the
    /// provider failed.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.inner.as_ref()?;
        let result = embedder
            .embed(EmbeddingInput {
                texts: vec![text.to_string()],
            })
            .await;
        match result {
            Ok(output) => output.embeddings.into_iter().next(),
            Err(e) => {
                warn!(provider = embedder.name(), error = %e, "embedding failed; storing record without vector");
                None
            }
        }
    }
}

/// A record to be written, before ids and timestamps are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub branch: String,
    pub kind: RecordKind,
    pub text: String,
    pub category: Option<String>,
    pub confidence: f64,
    pub source_type: SourceType,
    pub observation_type: Option<ObservationType>,
    pub relation: Option<RelationKey>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
}

impl NewRecord {
    fn new(branch: &str, kind: RecordKind, text: &str) -> Self {
        Self {
            branch: branch.to_string(),
            kind,
            text: text.to_string(),
            category: None,
            confidence: 1.0,
            source_type: SourceType::Explicit,
            observation_type: None,
            relation: None,
            session_id: None,
            agent_id: None,
            task_id: None,
        }
    }

    pub fn fact(branch: &str, text: &str) -> Self {
        Self::new(branch, RecordKind::Fact, text)
    }

    pub fn observation(branch: &str, observation_type: ObservationType, text: &str) -> Self {
        Self {
            observation_type: Some(observation_type),
            ..Self::new(branch, RecordKind::Observation, text)
        }
    }

    /// A relation `source --relation_type--> target`; its text is the triple.
    pub fn relation(branch: &str, source: &str, relation_type: &str, target: &str) -> Self {
        Self {
            relation: Some(RelationKey {
                source_entity: source.to_string(),
                target_entity: target.to_string(),
                relation_type: relation_type.to_string(),
            }),
            ..Self::new(
                branch,
                RecordKind::Relation,
                &format!("{source} {relation_type} {target}"),
            )
        }
    }

    /// A conversation marker for `session_id`.
    pub fn conversation(branch: &str, session_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            ..Self::new(branch, RecordKind::Conversation, session_id)
        }
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    fn validate(&self) -> Result<(), CairnError> {
        if self.text.trim().is_empty() {
            return Err(CairnError::InvalidInput("record text must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(CairnError::InvalidInput(format!(
                "confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        if self.kind == RecordKind::Relation && self.relation.is_none() {
            return Err(CairnError::InvalidInput(
                "relation records require source, target, and relation type".into(),
            ));
        }
        if self.kind == RecordKind::Observation && self.observation_type.is_none() {
            return Err(CairnError::InvalidInput(
                "observation records require an observation type".into(),
            ));
        }
        Ok(())
    }
}

/// Writes records onto live branches.
#[derive(Clone)]
pub struct RecordWriter {
    storage: Arc<dyn StorageAdapter>,
    embedder: SoftEmbedder,
}

impl RecordWriter {
    pub fn new(storage: Arc<dyn StorageAdapter>, embedder: SoftEmbedder) -> Self {
        Self { storage, embedder }
    }

    /// Validate, embed, and insert `new`. Returns the stored record.
    ///
    /// Fails with `BranchNotFound` for unknown branches and `PolicyViolation`
    /// for archived ones. The branch check is made by the insert itself, so a
    /// concurrent archive either wins or sees the record.
    pub async fn write(&self, new: NewRecord) -> Result<VersionedRecord, CairnError> {
        new.validate()?;

        let mut record = VersionedRecord::new(&new.branch, new.kind, &new.text, Utc::now());
        record.category = new.category;
        record.confidence = new.confidence;
        record.source_type = new.source_type;
        record.observation_type = new.observation_type;
        record.relation = new.relation;
        record.session_id = new.session_id;
        record.agent_id = new.agent_id;
        record.task_id = new.task_id;
        if record.kind != RecordKind::Conversation {
            record.embedding = self.embedder.embed(&record.text).await;
        }

        self.storage.insert_live_record(&record).await?;
        debug!(
            branch = %record.branch_name,
            kind = %record.kind,
            id = %record.id,
            embedded = record.embedding.is_some(),
            "record written"
        );
        Ok(record)
    }
}
