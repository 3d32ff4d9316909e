//! The category matrix: the immutable base table every component reads.
//!
//! Records are stored once; category scores are normalized into
//! `(record, category, score)` triples laid out family-major, then
//! category-major, so each category column is one contiguous slice.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::classifier::{classify_records, CategoryClassifier, TextRecord};
use crate::config::SourceRule;
use crate::constants::schema::{EMOTIONS, THEMES};
use crate::data::{
    CategoryFamily, EngagementMetric, FamilyTable, Record, RecordInput, ScoreTriple, SourceType,
};
use crate::errors::AnalyticsError;
use crate::types::{CategoryName, RecordId};

/// Expected category columns per family.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategorySchema {
    families: IndexMap<CategoryFamily, Vec<CategoryName>>,
}

impl Default for CategorySchema {
    fn default() -> Self {
        Self::empty()
            .with_family(
                CategoryFamily::Emotion,
                EMOTIONS.iter().map(|name| name.to_string()).collect(),
            )
            .with_family(
                CategoryFamily::Theme,
                THEMES.iter().map(|name| name.to_string()).collect(),
            )
    }
}

impl CategorySchema {
    /// Schema without families.
    pub fn empty() -> Self {
        Self {
            families: IndexMap::new(),
        }
    }

    /// Declare (or replace) the expected categories of a family.
    pub fn with_family(mut self, family: CategoryFamily, categories: Vec<CategoryName>) -> Self {
        self.families.insert(family, categories);
        self
    }

    /// Declared families in order.
    pub fn families(&self) -> impl Iterator<Item = CategoryFamily> + '_ {
        self.families.keys().copied()
    }

    /// Categories of a family in schema order (empty when undeclared).
    pub fn categories(&self, family: CategoryFamily) -> &[CategoryName] {
        self.families
            .get(&family)
            .map(|names| names.as_slice())
            .unwrap_or(&[])
    }

    /// Index of `category` within its family.
    pub fn position(&self, family: CategoryFamily, category: &str) -> Option<usize> {
        self.categories(family)
            .iter()
            .position(|name| name == category)
    }

    /// Family owning `category`, searching families in schema order.
    pub fn family_of(&self, category: &str) -> Option<CategoryFamily> {
        self.families
            .iter()
            .find(|(_, names)| names.iter().any(|name| name == category))
            .map(|(family, _)| *family)
    }
}

/// Collects boundary tables and joins them into a `CategoryMatrix`.
#[derive(Clone, Debug)]
pub struct CategoryMatrixBuilder {
    schema: CategorySchema,
    source_rule: SourceRule,
    records: Vec<RecordInput>,
    tables: Vec<FamilyTable>,
}

impl CategoryMatrixBuilder {
    /// Builder over `schema`, deriving source types with `source_rule`.
    pub fn new(schema: CategorySchema, source_rule: SourceRule) -> Self {
        Self {
            schema,
            source_rule,
            records: Vec::new(),
            tables: Vec::new(),
        }
    }

    /// Add boundary records.
    pub fn with_records(mut self, records: impl IntoIterator<Item = RecordInput>) -> Self {
        self.records.extend(records);
        self
    }

    /// Add a family table; several tables per family are concatenated.
    pub fn with_family_table(mut self, table: FamilyTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Extend the dataset with records scored by the external classifier.
    pub fn with_classified_records(
        mut self,
        classifier: &dyn CategoryClassifier,
        inputs: Vec<TextRecord>,
    ) -> Result<Self, AnalyticsError> {
        let tables = classify_records(classifier, &self.schema, &inputs)?;
        self.records
            .extend(inputs.into_iter().map(|input| input.record));
        self.tables.extend(tables);
        Ok(self)
    }

    /// Join records with family tables.
    ///
    /// Records are the left side: a record absent from a family table keeps
    /// missing scores for that family. Family rows for unknown records are
    /// skipped. Scores that are non-finite or outside [0, 1] become missing.
    pub fn build(self) -> Result<CategoryMatrix, AnalyticsError> {
        if self.records.is_empty() {
            return Err(AnalyticsError::EmptyDataset);
        }

        let mut index: HashMap<RecordId, usize> = HashMap::with_capacity(self.records.len());
        let mut records = Vec::with_capacity(self.records.len());
        for (row, input) in self.records.into_iter().enumerate() {
            if index.insert(input.id.clone(), row).is_some() {
                return Err(AnalyticsError::DuplicateRecord { id: input.id });
            }
            records.push(Record {
                source_type: self.source_rule.classify(&input.source_label),
                id: input.id,
                date: input.date,
                source_label: input.source_label,
                counters: input.counters,
            });
        }
        let n = records.len();

        for table in &self.tables {
            if self.schema.categories(table.family).is_empty() {
                warn!(
                    "[engagement:matrix] ignoring {} table: family not declared in schema",
                    table.family
                );
            }
        }

        let mut triples = Vec::new();
        let mut family_offsets = IndexMap::new();
        for family in self.schema.families() {
            let categories = self.schema.categories(family);
            let mut dense: Vec<Option<f64>> = vec![None; n * categories.len()];
            let mut seen: HashSet<&str> = HashSet::new();
            let mut unknown_rows = 0usize;
            let mut coerced = 0usize;

            for table in self.tables.iter().filter(|table| table.family == family) {
                let mut positions = Vec::with_capacity(categories.len());
                for category in categories {
                    let position = table
                        .columns
                        .iter()
                        .position(|column| column == category)
                        .ok_or_else(|| AnalyticsError::SchemaMismatch {
                            family,
                            category: category.clone(),
                        })?;
                    positions.push(position);
                }
                for row in &table.rows {
                    let Some(&record) = index.get(&row.id) else {
                        unknown_rows += 1;
                        continue;
                    };
                    if !seen.insert(row.id.as_str()) {
                        return Err(AnalyticsError::DuplicateRecord { id: row.id.clone() });
                    }
                    for (cat, &position) in positions.iter().enumerate() {
                        let raw = row.scores.get(position).copied().flatten();
                        let score = raw.filter(|v| v.is_finite() && (0.0..=1.0).contains(v));
                        if raw.is_some() && score.is_none() {
                            coerced += 1;
                        }
                        dense[cat * n + record] = score;
                    }
                }
            }

            if unknown_rows > 0 {
                warn!(
                    "[engagement:matrix] skipped {} {} rows for unknown records",
                    unknown_rows, family
                );
            }
            if coerced > 0 {
                warn!(
                    "[engagement:matrix] coerced {} out-of-range {} scores to missing",
                    coerced, family
                );
            }
            let missing_records = n - seen.len();
            if missing_records > 0 {
                debug!(
                    "[engagement:matrix] {} records have no {} scores",
                    missing_records, family
                );
            }

            for (cat, category) in categories.iter().enumerate() {
                let column = &dense[cat * n..(cat + 1) * n];
                if column.iter().all(Option::is_none) {
                    return Err(AnalyticsError::AllMissing {
                        family,
                        category: category.clone(),
                    });
                }
            }

            family_offsets.insert(family, triples.len());
            triples.extend(dense.into_iter().enumerate().map(|(slot, score)| ScoreTriple {
                record: slot % n,
                family,
                category: slot / n,
                score,
            }));
        }

        let min_date = records
            .iter()
            .map(|record| record.date)
            .min()
            .ok_or(AnalyticsError::EmptyDataset)?;

        Ok(CategoryMatrix {
            schema: self.schema,
            records,
            index,
            triples,
            family_offsets,
            min_date,
        })
    }
}

/// Immutable joined table of records, category scores, and raw counters.
#[derive(Clone, Debug)]
pub struct CategoryMatrix {
    schema: CategorySchema,
    records: Vec<Record>,
    index: HashMap<RecordId, usize>,
    triples: Vec<ScoreTriple>,
    family_offsets: IndexMap<CategoryFamily, usize>,
    min_date: NaiveDate,
}

impl CategoryMatrix {
    /// Schema the matrix was built against.
    pub fn schema(&self) -> &CategorySchema {
        &self.schema
    }

    /// Records in input order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Row index of a record identifier.
    pub fn row_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// All score triples, family-major then category-major.
    pub fn triples(&self) -> &[ScoreTriple] {
        &self.triples
    }

    /// Triples of one category column, ordered by record row.
    pub fn column_triples(&self, family: CategoryFamily, category: usize) -> &[ScoreTriple] {
        let n = self.records.len();
        match self.family_offsets.get(&family) {
            Some(&offset) if category < self.schema.categories(family).len() => {
                let start = offset + category * n;
                &self.triples[start..start + n]
            }
            _ => &[],
        }
    }

    /// Scores of a named category aligned with `records()`.
    pub fn column(
        &self,
        family: CategoryFamily,
        category: &str,
    ) -> Result<Vec<Option<f64>>, AnalyticsError> {
        let position =
            self.schema
                .position(family, category)
                .ok_or_else(|| AnalyticsError::SchemaMismatch {
                    family,
                    category: category.to_string(),
                })?;
        Ok(self
            .column_triples(family, position)
            .iter()
            .map(|triple| triple.score)
            .collect())
    }

    /// Score of one record for one category index.
    pub fn score(&self, row: usize, family: CategoryFamily, category: usize) -> Option<f64> {
        self.column_triples(family, category)
            .get(row)
            .and_then(|triple| triple.score)
    }

    /// Raw counter values of one metric as floats, aligned with `records()`.
    pub fn counter_column(&self, metric: EngagementMetric) -> Vec<Option<f64>> {
        self.records
            .iter()
            .map(|record| record.counters.get(metric).map(|value| value as f64))
            .collect()
    }

    /// Source type per record.
    pub fn source_types(&self) -> Vec<SourceType> {
        self.records.iter().map(|record| record.source_type).collect()
    }

    /// Earliest publication date.
    pub fn min_date(&self) -> NaiveDate {
        self.min_date
    }

    /// Day offset of each record from the earliest date, starting at 1.
    pub fn day_index(&self) -> Vec<u32> {
        self.records
            .iter()
            .map(|record| {
                let offset = (record.date - self.min_date).num_days();
                u32::try_from(offset).unwrap_or(0) + 1
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EngagementCounters;

    fn record(id: &str, day: u32, source: &str) -> RecordInput {
        RecordInput {
            id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            source_label: source.to_string(),
            counters: EngagementCounters {
                views: Some(u64::from(day) * 10),
                ..EngagementCounters::default()
            },
        }
    }

    fn small_schema() -> CategorySchema {
        CategorySchema::empty()
            .with_family(CategoryFamily::Emotion, vec!["joy".into(), "fear".into()])
            .with_family(
                CategoryFamily::Theme,
                vec!["economy".into(), "public safety".into()],
            )
    }

    fn emotion_table(rows: &[(&str, [Option<f64>; 2])]) -> FamilyTable {
        let mut table = FamilyTable::new(CategoryFamily::Emotion, vec!["fear".into(), "joy".into()]);
        for (id, [fear, joy]) in rows {
            table.push_row(*id, vec![*fear, *joy]);
        }
        table
    }

    fn theme_table(rows: &[(&str, [Option<f64>; 2])]) -> FamilyTable {
        let mut table = FamilyTable::new(
            CategoryFamily::Theme,
            vec!["public safety".into(), "economy".into()],
        );
        for (id, [safety, economy]) in rows {
            table.push_row(*id, vec![*safety, *economy]);
        }
        table
    }

    #[test]
    fn builds_left_join_with_missing_theme_rows() {
        let matrix = CategoryMatrixBuilder::new(small_schema(), SourceRule::default())
            .with_records(vec![
                record("a", 3, "@desk"),
                record("b", 1, "Herald"),
                record("c", 2, "Herald"),
            ])
            .with_family_table(emotion_table(&[
                ("a", [Some(0.1), Some(0.9)]),
                ("b", [Some(0.2), Some(0.4)]),
                ("c", [Some(0.3), None]),
            ]))
            .with_family_table(theme_table(&[
                ("a", [Some(0.7), Some(0.2)]),
                ("b", [Some(0.0), Some(0.5)]),
            ]))
            .build()
            .expect("matrix");

        assert_eq!(matrix.len(), 3);
        assert_eq!(
            matrix.column(CategoryFamily::Emotion, "joy").unwrap(),
            vec![Some(0.9), Some(0.4), None]
        );
        assert_eq!(
            matrix.column(CategoryFamily::Theme, "public safety").unwrap(),
            vec![Some(0.7), Some(0.0), None]
        );
        assert_eq!(matrix.day_index(), vec![3, 1, 2]);
        assert_eq!(
            matrix.source_types(),
            vec![SourceType::ChannelB, SourceType::ChannelA, SourceType::ChannelA]
        );
        assert_eq!(matrix.triples().len(), 3 * 4);
        assert_eq!(matrix.row_of("c"), Some(2));
    }

    #[test]
    fn duplicate_record_ids_are_rejected() {
        let result = CategoryMatrixBuilder::new(small_schema(), SourceRule::default())
            .with_records(vec![record("a", 1, "x"), record("a", 2, "y")])
            .build();
        assert!(matches!(
            result,
            Err(AnalyticsError::DuplicateRecord { ref id }) if id == "a"
        ));
    }

    #[test]
    fn duplicate_family_rows_are_rejected() {
        let result = CategoryMatrixBuilder::new(small_schema(), SourceRule::default())
            .with_records(vec![record("a", 1, "x")])
            .with_family_table(emotion_table(&[
                ("a", [Some(0.1), Some(0.2)]),
                ("a", [Some(0.3), Some(0.4)]),
            ]))
            .with_family_table(theme_table(&[("a", [Some(0.1), Some(0.2)])]))
            .build();
        assert!(matches!(result, Err(AnalyticsError::DuplicateRecord { .. })));
    }

    #[test]
    fn missing_schema_column_is_a_data_error() {
        let mut themes = FamilyTable::new(CategoryFamily::Theme, vec!["economy".into()]);
        themes.push_row("a", vec![Some(0.2)]);
        let result = CategoryMatrixBuilder::new(small_schema(), SourceRule::default())
            .with_records(vec![record("a", 1, "x")])
            .with_family_table(emotion_table(&[("a", [Some(0.1), Some(0.2)])]))
            .with_family_table(themes)
            .build();
        assert!(matches!(
            result,
            Err(AnalyticsError::SchemaMismatch { family: CategoryFamily::Theme, ref category })
                if category == "public safety"
        ));
    }

    #[test]
    fn all_missing_column_is_a_data_error() {
        let result = CategoryMatrixBuilder::new(small_schema(), SourceRule::default())
            .with_records(vec![record("a", 1, "x")])
            .with_family_table(emotion_table(&[("a", [None, Some(0.2)])]))
            .with_family_table(theme_table(&[("a", [Some(0.1), Some(0.2)])]))
            .build();
        assert!(matches!(result, Err(AnalyticsError::AllMissing { .. })));
    }

    #[test]
    fn out_of_range_scores_become_missing() {
        let matrix = CategoryMatrixBuilder::new(small_schema(), SourceRule::default())
            .with_records(vec![record("a", 1, "x"), record("b", 2, "x")])
            .with_family_table(emotion_table(&[
                ("a", [Some(1.4), Some(0.2)]),
                ("b", [Some(0.5), Some(f64::NAN)]),
                ("ghost", [Some(0.5), Some(0.5)]),
            ]))
            .with_family_table(theme_table(&[
                ("a", [Some(0.1), Some(0.2)]),
                ("b", [Some(0.1), Some(0.2)]),
            ]))
            .build()
            .expect("matrix");
        assert_eq!(
            matrix.column(CategoryFamily::Emotion, "fear").unwrap(),
            vec![None, Some(0.5)]
        );
        assert_eq!(
            matrix.column(CategoryFamily::Emotion, "joy").unwrap(),
            vec![Some(0.2), None]
        );
        assert!(matrix.column(CategoryFamily::Emotion, "hope").is_err());
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let result = CategoryMatrixBuilder::new(small_schema(), SourceRule::default()).build();
        assert!(matches!(result, Err(AnalyticsError::EmptyDataset)));
    }
}
