// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fluent builders for test records.

use chrono::{DateTime, Utc};

use cairn_core::types::{
    ObservationType, RecordKind, RecordStatus, RelationKey, SourceType, VersionedRecord,
};

/// Builds a [`VersionedRecord`] with sensible test defaults.
pub struct RecordBuilder {
    record: VersionedRecord,
}

impl RecordBuilder {
    pub fn new(branch: &str, kind: RecordKind, text: &str) -> Self {
        Self {
            record: VersionedRecord::new(branch, kind, text, Utc::now()),
        }
    }

    pub fn fact(branch: &str, text: &str) -> Self {
        Self::new(branch, RecordKind::Fact, text)
    }

    pub fn observation(branch: &str, observation_type: ObservationType, text: &str) -> Self {
        let mut builder = Self::new(branch, RecordKind::Observation, text);
        builder.record.observation_type = Some(observation_type);
        builder
    }

    pub fn relation(branch: &str, source: &str, relation_type: &str, target: &str) -> Self {
        let text = format!("{source} {relation_type} {target}");
        let mut builder = Self::new(branch, RecordKind::Relation, &text);
        builder.record.relation = Some(RelationKey {
            source_entity: source.to_string(),
            target_entity: target.to_string(),
            relation_type: relation_type.to_string(),
        });
        builder
    }

    pub fn conversation(branch: &str, session_id: &str) -> Self {
        Self::new(branch, RecordKind::Conversation, session_id).session(session_id)
    }

    pub fn category(mut self, category: &str) -> Self {
        self.record.category = Some(category.to_string());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.record.confidence = confidence;
        self
    }

    pub fn status(mut self, status: RecordStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.record.source_type = source_type;
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.record.embedding = Some(embedding);
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.record.session_id = Some(session_id.to_string());
        self
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.record.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.record.task_id = Some(task_id.to_string());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.created_at = at;
        self.record.updated_at = at;
        self
    }

    pub fn build(self) -> VersionedRecord {
        self.record
    }
}
