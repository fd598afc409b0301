// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Similarity provider: cosine over embeddings and Jaccard over token sets.
//!
//! Both functions are pure and total. Degenerate inputs (empty text, zero
//! vectors, mismatched dimensions) score 0.0 rather than erroring.

use std::collections::HashSet;

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when the lengths differ or either vector has zero norm.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Lower-cased alphanumeric tokens longer than one character.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity over pre-tokenized sets.
pub fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Jaccard similarity of the token sets of two texts.
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_sets(&tokenize(a), &tokenize(b))
}
