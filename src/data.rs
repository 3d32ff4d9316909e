use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use crate::types::{CategoryName, RecordId, SourceLabel};

/// The two independent category families scored per record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFamily {
    /// Family 1: emotion ratings.
    Emotion,
    /// Family 2: theme ratings.
    Theme,
}

impl CategoryFamily {
    /// Both families in canonical order.
    pub const ALL: [CategoryFamily; 2] = [CategoryFamily::Emotion, CategoryFamily::Theme];

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryFamily::Emotion => "emotion",
            CategoryFamily::Theme => "theme",
        }
    }
}

impl fmt::Display for CategoryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publication channel derived from the source label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Labels without the channel-B prefix.
    ChannelA,
    /// Labels carrying the channel-B prefix.
    ChannelB,
}

/// The four raw engagement counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementMetric {
    /// View count.
    Views,
    /// Like count.
    Likes,
    /// Comment count.
    Comments,
    /// Share count.
    Shares,
}

impl EngagementMetric {
    /// All metrics in canonical column order.
    pub const ALL: [EngagementMetric; 4] = [
        EngagementMetric::Views,
        EngagementMetric::Likes,
        EngagementMetric::Comments,
        EngagementMetric::Shares,
    ];

    /// Lower-case name, also the outcome tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementMetric::Views => "views",
            EngagementMetric::Likes => "likes",
            EngagementMetric::Comments => "comments",
            EngagementMetric::Shares => "shares",
        }
    }
}

impl fmt::Display for EngagementMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw engagement counters; `None` means "not measured".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounters {
    /// Times the record was viewed.
    pub views: Option<u64>,
    /// Likes received.
    pub likes: Option<u64>,
    /// Comments received.
    pub comments: Option<u64>,
    /// Times the record was shared.
    pub shares: Option<u64>,
}

impl EngagementCounters {
    /// Counter value for `metric`.
    pub fn get(&self, metric: EngagementMetric) -> Option<u64> {
        match metric {
            EngagementMetric::Views => self.views,
            EngagementMetric::Likes => self.likes,
            EngagementMetric::Comments => self.comments,
            EngagementMetric::Shares => self.shares,
        }
    }

    /// True when every counter is unmeasured.
    pub fn all_missing(&self) -> bool {
        EngagementMetric::ALL
            .iter()
            .all(|metric| self.get(*metric).is_none())
    }
}

/// Record as presented at the input boundary, before joining category tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordInput {
    /// Unique identifier; duplicates are a data error.
    pub id: RecordId,
    /// Publication date.
    pub date: NaiveDate,
    /// Raw source label; the source type is derived from its prefix.
    pub source_label: SourceLabel,
    /// Raw engagement counters.
    pub counters: EngagementCounters,
}

/// Canonical record held by the category matrix.
#[derive(Clone, Debug, Serialize)]
pub struct Record {
    /// Unique identifier.
    pub id: RecordId,
    /// Publication date.
    pub date: NaiveDate,
    /// Raw source label.
    pub source_label: SourceLabel,
    /// Channel derived from `source_label`.
    pub source_type: SourceType,
    /// Raw engagement counters.
    pub counters: EngagementCounters,
}

/// One normalized `(record, category, score)` entry of the category matrix.
///
/// `record` is the row index into `CategoryMatrix::records`, and `category`
/// the column index into the family's schema.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoreTriple {
    /// Row index into the matrix records.
    pub record: usize,
    /// Family of the category.
    pub family: CategoryFamily,
    /// Category index within the family schema.
    pub category: usize,
    /// Score in [0, 1]; missing when absent or out of range.
    pub score: Option<f64>,
}

/// One row of a fixed-schema family table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FamilyRow {
    /// Record identifier (join key).
    pub id: RecordId,
    /// Scores aligned with `FamilyTable::columns`.
    pub scores: Vec<Option<f64>>,
}

/// Fixed-schema category scores for one family, keyed by record identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FamilyTable {
    /// Family the columns belong to.
    pub family: CategoryFamily,
    /// Column names as presented at the boundary (may contain whitespace).
    pub columns: Vec<CategoryName>,
    /// Rows in input order.
    pub rows: Vec<FamilyRow>,
}

impl FamilyTable {
    /// Empty table with the given columns.
    pub fn new(family: CategoryFamily, columns: Vec<CategoryName>) -> Self {
        Self {
            family,
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row of scores aligned with `columns`.
    pub fn push_row(&mut self, id: impl Into<RecordId>, scores: Vec<Option<f64>>) {
        self.rows.push(FamilyRow {
            id: id.into(),
            scores,
        });
    }

    /// True when the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
