// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapter trait for vector embedding generation.

use async_trait::async_trait;

use crate::error::CairnError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{EmbeddingInput, EmbeddingOutput};

/// Adapter for generating vector embeddings from record text.
///
/// The engine treats vectors as opaque inputs to cosine similarity. A failing
/// embedder never blocks a write: callers downgrade the error to "no vector".
#[async_trait]
pub trait EmbeddingAdapter: PluginAdapter {
    /// Generates one embedding per input text, in order.
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, CairnError>;
}
