//! Boundary to the external text classifier.
//!
//! The classifier itself lives outside this crate. It is consumed as
//! "text -> category name -> score" per family so new records (for example a
//! second collection period) can be added without touching modeling code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::{CategoryFamily, FamilyTable, RecordInput};
use crate::errors::AnalyticsError;
use crate::matrix::CategorySchema;
use crate::types::CategoryName;

/// External service assigning category scores in [0, 1] to raw text.
pub trait CategoryClassifier: Send + Sync {
    /// Score `text` against every category of `family` the classifier knows.
    ///
    /// Categories absent from the returned map are treated as missing.
    fn classify(
        &self,
        family: CategoryFamily,
        text: &str,
    ) -> Result<HashMap<CategoryName, f64>, String>;
}

/// A record awaiting classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextRecord {
    /// Record fields without category scores.
    pub record: RecordInput,
    /// Raw text handed to the classifier.
    pub text: String,
}

/// Classify each text once per schema family and lay the scores out as
/// fixed-schema family tables.
pub fn classify_records(
    classifier: &dyn CategoryClassifier,
    schema: &CategorySchema,
    inputs: &[TextRecord],
) -> Result<Vec<FamilyTable>, AnalyticsError> {
    let mut tables = Vec::new();
    for family in schema.families() {
        let columns = schema.categories(family).to_vec();
        let mut table = FamilyTable::new(family, columns.clone());
        for input in inputs {
            let scores = classifier
                .classify(family, &input.text)
                .map_err(|reason| AnalyticsError::Classifier {
                    record: input.record.id.clone(),
                    reason,
                })?;
            let row = columns
                .iter()
                .map(|category| scores.get(category).copied())
                .collect();
            table.push_row(input.record.id.clone(), row);
        }
        tables.push(table);
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EngagementCounters;
    use chrono::NaiveDate;

    struct KeywordClassifier;

    impl CategoryClassifier for KeywordClassifier {
        fn classify(
            &self,
            family: CategoryFamily,
            text: &str,
        ) -> Result<HashMap<CategoryName, f64>, String> {
            if text.is_empty() {
                return Err("empty text".into());
            }
            let mut scores = HashMap::new();
            match family {
                CategoryFamily::Emotion => {
                    let joy = if text.contains("great") { 0.9 } else { 0.1 };
                    scores.insert("joy".to_string(), joy);
                }
                CategoryFamily::Theme => {
                    scores.insert("economy".to_string(), 0.4);
                }
            }
            Ok(scores)
        }
    }

    fn text_record(id: &str, text: &str) -> TextRecord {
        TextRecord {
            record: RecordInput {
                id: id.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                source_label: "Herald".into(),
                counters: EngagementCounters::default(),
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn tables_follow_schema_columns() {
        let schema = CategorySchema::empty()
            .with_family(CategoryFamily::Emotion, vec!["joy".into(), "fear".into()])
            .with_family(CategoryFamily::Theme, vec!["economy".into()]);
        let tables = classify_records(
            &KeywordClassifier,
            &schema,
            &[text_record("n1", "great day"), text_record("n2", "meh")],
        )
        .expect("tables");
        assert_eq!(tables.len(), 2);
        let emotions = &tables[0];
        assert_eq!(emotions.columns, vec!["joy".to_string(), "fear".to_string()]);
        assert_eq!(emotions.rows[0].scores, vec![Some(0.9), None]);
        assert_eq!(emotions.rows[1].scores, vec![Some(0.1), None]);
        assert_eq!(tables[1].rows[0].scores, vec![Some(0.4)]);
    }

    #[test]
    fn classifier_failures_name_the_record() {
        let schema = CategorySchema::default();
        let result = classify_records(&KeywordClassifier, &schema, &[text_record("n9", "")]);
        assert!(matches!(
            result,
            Err(AnalyticsError::Classifier { ref record, .. }) if record == "n9"
        ));
    }
}
