// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the branch registry, records, and audit tables.
//!
//! Enums are stored as their snake_case strings, embeddings as little-endian
//! f32 BLOBs, and branch metadata as a JSON text column.

pub mod branches;
pub mod history;
pub mod plans;
pub mod records;

use std::str::FromStr;

use rusqlite::types::Type;

/// Parse a TEXT column into a strum enum, surfacing bad values as a
/// conversion failure on `column`.
pub(crate) fn parse_enum<T>(column: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// Parse a nullable TEXT column into an optional strum enum.
pub(crate) fn parse_opt_enum<T>(column: usize, value: Option<String>) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.map(|v| parse_enum(column, &v)).transpose()
}

/// Serialize an f32 vector to a BLOB (little-endian bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a BLOB back to an f32 vector. Trailing partial chunks are dropped.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Counts are stored as INTEGER; negative values read back as zero.
pub(crate) fn count_from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Counts above `i64::MAX` saturate.
pub(crate) fn count_to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
