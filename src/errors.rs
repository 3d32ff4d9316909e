use std::io;

use thiserror::Error;

use crate::data::CategoryFamily;
use crate::types::{CategoryName, RecordId};

/// Error type for data, configuration, and collaborator failures.
///
/// Statistically undefined results and failed model fits are never reported
/// through this type; they surface as missing cells in the result tables.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Two records share an identifier.
    #[error("duplicate record identifier '{id}'")]
    DuplicateRecord {
        /// The repeated identifier.
        id: RecordId,
    },
    /// A family table lacks a category the schema expects.
    #[error("{family} table is missing expected category column '{category}'")]
    SchemaMismatch {
        /// Family of the table.
        family: CategoryFamily,
        /// Expected column.
        category: CategoryName,
    },
    /// A category column has no observed score at all.
    #[error("{family} category '{category}' has no observed scores")]
    AllMissing {
        /// Family of the column.
        family: CategoryFamily,
        /// Empty column.
        category: CategoryName,
    },
    /// No records were supplied.
    #[error("dataset contains no records")]
    EmptyDataset,
    /// Invalid quantile, threshold ordering, or unknown category name.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The external classifier rejected a record.
    #[error("classifier failed for record '{record}': {reason}")]
    Classifier {
        /// Record being classified.
        record: RecordId,
        /// Message returned by the classifier.
        reason: String,
    },
    /// Reading a configuration file failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON (de)serialization failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
