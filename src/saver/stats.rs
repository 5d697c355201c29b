//! Aggregated catalog statistics for the `statistic` operation.

use std::fmt;

use serde::Serialize;

use crate::util::size::format_size;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub compound_count: u64,
    /// Sum of original stream sizes.
    pub compound_total_size: u64,
    pub fragment_count: u64,
    /// Sum of unique encapsulated fragment bodies.
    pub fragment_total_size: u64,
    /// Sum of fragment bodies as referenced by compound sequences
    /// (duplicates counted every time).
    pub referenced_fragment_size: u64,
    pub resource_count: u64,
    /// Bytes actually stored on the backend (post-wrap).
    pub resource_stored_size: u64,
    /// Inner payload bytes across resources.
    pub resource_payload_size: u64,
    /// referenced / unique fragment bytes; 1.0 means no sharing.
    pub dedup_ratio: f64,
    /// Live fragment bytes / inner payload bytes; how well resources are
    /// packed with data anyone still references.
    pub fill_efficiency: f64,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "compounds: {} ({})",
            self.compound_count,
            format_size(self.compound_total_size)
        )?;
        writeln!(
            f,
            "fragments: {} ({} unique, {} referenced)",
            self.fragment_count,
            format_size(self.fragment_total_size),
            format_size(self.referenced_fragment_size)
        )?;
        writeln!(
            f,
            "resources: {} ({} stored, {} payload)",
            self.resource_count,
            format_size(self.resource_stored_size),
            format_size(self.resource_payload_size)
        )?;
        writeln!(f, "dedup ratio: {:.2}", self.dedup_ratio)?;
        write!(f, "fill efficiency: {:.2}", self.fill_efficiency)
    }
}
