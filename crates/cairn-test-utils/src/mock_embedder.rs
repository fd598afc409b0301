// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock embedding adapters for deterministic testing.
//!
//! `MockEmbedder` hashes each lowercase word into one of a fixed number of
//! buckets and L2-normalizes the counts, so texts sharing most words land
//! close together in cosine space. Explicit vectors can be pinned per text
//! when a test needs an exact similarity.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use cairn_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};
use cairn_core::{CairnError, EmbeddingAdapter, PluginAdapter};

/// Default vector width.
pub const MOCK_DIMENSIONS: usize = 64;

/// A deterministic bag-of-words embedder.
pub struct MockEmbedder {
    dimensions: usize,
    pinned: Mutex<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dimensions(MOCK_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            pinned: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Return `vector` whenever exactly `text` is embedded.
    pub async fn pin(&self, text: &str, vector: Vec<f32>) {
        self.pinned.lock().await.insert(text.to_string(), vector);
    }

    /// Number of `embed` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The bag-of-words vector for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, CairnError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CairnError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, CairnError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pinned = self.pinned.lock().await;
        let embeddings = input
            .texts
            .iter()
            .map(|text| {
                pinned
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.vector_for(text))
            })
            .collect();
        Ok(EmbeddingOutput {
            embeddings,
            dimensions: self.dimensions,
        })
    }
}

/// An embedder whose every call fails, for exercising soft-fail paths.
#[derive(Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl PluginAdapter for FailingEmbedder {
    fn name(&self) -> &str {
        "failing-embedder"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, CairnError> {
        Ok(HealthStatus::Unhealthy("always fails".into()))
    }

    async fn shutdown(&self) -> Result<(), CairnError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for FailingEmbedder {
    async fn embed(&self, _input: EmbeddingInput) -> Result<EmbeddingOutput, CairnError> {
        Err(CairnError::Embedding {
            message: "embedding provider unavailable".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn vectors_are_deterministic_and_normalized() {
        let embedder = MockEmbedder::new();
        let a = embedder.vector_for("Rust is fast");
        let b = embedder.vector_for("rust IS fast");
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
        assert!(embedder.vector_for("").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn pinned_vectors_override_hashing() {
        let embedder = MockEmbedder::with_dimensions(2);
        embedder.pin("x", vec![1.0, 0.0]).await;
        let out = embedder
            .embed(EmbeddingInput {
                texts: vec!["x".into(), "y".into()],
            })
            .await
            .unwrap();
        assert_eq!(out.embeddings[0], vec![1.0, 0.0]);
        assert_eq!(out.embeddings.len(), 2);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn failing_embedder_errors() {
        let err = FailingEmbedder
            .embed(EmbeddingInput { texts: vec!["x".into()] })
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::Embedding { .. }));
    }
}
