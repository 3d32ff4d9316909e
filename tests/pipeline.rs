use std::collections::HashMap;
use std::io::Write;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use engagement_stats::constants::schema::{EMOTIONS, THEMES};
use engagement_stats::{
    AnalysisConfig, AnalyticsError, CategoryClassifier, CategoryFamily, CategoryMatrix,
    CategoryMatrixBuilder, CategoryName, CategorySchema, EngagementCounters, FamilyTable,
    RecordInput, SmoothTermStatus, TextRecord, run_analysis,
};

fn dataset(n: usize, seed: u64) -> (Vec<RecordInput>, FamilyTable, FamilyTable) {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
    let mut emotions = FamilyTable::new(
        CategoryFamily::Emotion,
        EMOTIONS.iter().map(|c| c.to_string()).collect(),
    );
    let mut themes = FamilyTable::new(
        CategoryFamily::Theme,
        THEMES.iter().map(|c| c.to_string()).collect(),
    );
    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let id = format!("post-{i:05}");
        let day = (i % 30) as i64;
        let emotion_scores: Vec<Option<f64>> = EMOTIONS.iter().map(|_| Some(rng.gen())).collect();
        let theme_scores: Vec<Option<f64>> = THEMES
            .iter()
            .map(|_| (!rng.gen_bool(0.02)).then(|| rng.gen()))
            .collect();
        let joy = emotion_scores[7].unwrap_or(0.0);
        let base = 500.0 * (1.0 + joy * day as f64 / 30.0) + rng.gen_range(0.0..200.0);
        records.push(RecordInput {
            id: id.clone(),
            date: start + Duration::days(day),
            source_label: if rng.gen_bool(0.3) { "@newsroom".into() } else { "Daily Post".into() },
            counters: EngagementCounters {
                views: Some(base as u64 * 10),
                likes: Some((base / 10.0) as u64),
                comments: (!rng.gen_bool(0.2)).then(|| rng.gen_range(0..60)),
                shares: (!rng.gen_bool(0.2)).then(|| rng.gen_range(0..25)),
            },
        });
        emotions.push_row(id.clone(), emotion_scores);
        themes.push_row(id, theme_scores);
    }
    (records, emotions, themes)
}

fn build(n: usize, seed: u64, config: &AnalysisConfig) -> CategoryMatrix {
    let (records, emotions, themes) = dataset(n, seed);
    CategoryMatrixBuilder::new(CategorySchema::default(), config.source_rule.clone())
        .with_records(records)
        .with_family_table(emotions)
        .with_family_table(themes)
        .build()
        .expect("matrix")
}

#[test]
fn full_run_produces_every_stage() {
    let config = AnalysisConfig {
        smooth_categories: vec!["joy".into()],
        top_engagement_fraction: 0.05,
        ..AnalysisConfig::default()
    };
    let matrix = build(360, 99, &config);
    let report = run_analysis(&matrix, &config).expect("report");

    assert_eq!(report.n_records, 360);
    assert_eq!(report.correlations.len(), 24 * 5);
    let magnitudes: Vec<f64> = report
        .correlations
        .iter()
        .filter_map(|row| row.result.rho.map(f64::abs))
        .collect();
    assert!(magnitudes.windows(2).all(|w| w[0] >= w[1]));

    assert_eq!(report.logistic_by_category.len(), 24 * 5);
    let safety = report
        .logistic_by_category
        .iter()
        .find(|row| row.term == "public safety")
        .unwrap();
    assert_eq!(safety.term_id, "public_safety");
    assert!(safety.n_obs < 360);

    assert!(report.smooth_fit.time_smooths);
    assert_eq!(report.smooth_fit.baseline.len(), 30);
    assert_eq!(report.smooth_fit.smooth_terms.len(), 1);
    assert_eq!(report.smooth_fit.smooth_terms[0].status, SmoothTermStatus::Fitted);
    assert!(report.smooth_fit.dropped_rows > 0);

    assert_eq!(report.pca_by_family.len(), 2);
    let themes = &report.pca_by_family[&CategoryFamily::Theme];
    assert!(themes.is_defined());
    assert!(themes.dropped_records > 0);
    // per family and outcome: intercept, source control, three components
    assert_eq!(report.logistic_by_component.len(), 2 * 5 * 5);
    assert!(report
        .logistic_by_component
        .iter()
        .any(|row| row.term_id == "theme_pc3"));

    let cooccurrence = &report.cooccurrence;
    assert_eq!(cooccurrence.all_records.cells.len(), 12 * 12);
    assert!(cooccurrence.top_tier.records_considered < 360);
    assert!(cooccurrence
        .top_pairs
        .windows(2)
        .all(|w| w[0].count >= w[1].count));

    let json = serde_json::to_string(&report).expect("serializable report");
    assert!(json.contains("\"logistic_by_component\""));
}

#[test]
fn unknown_smooth_category_aborts_before_fitting() {
    let config = AnalysisConfig {
        smooth_categories: vec!["nostalgia".into()],
        ..AnalysisConfig::default()
    };
    let matrix = build(40, 5, &AnalysisConfig::default());
    let result = run_analysis(&matrix, &config);
    assert!(matches!(result, Err(AnalyticsError::Configuration(ref msg)) if msg.contains("nostalgia")));
}

#[test]
fn invalid_thresholds_abort_the_run() {
    let config = AnalysisConfig {
        void_threshold: 0.4,
        ..AnalysisConfig::default()
    };
    let matrix = build(40, 6, &AnalysisConfig::default());
    assert!(matches!(
        run_analysis(&matrix, &config),
        Err(AnalyticsError::Configuration(_))
    ));
}

struct LexiconClassifier;

impl CategoryClassifier for LexiconClassifier {
    fn classify(
        &self,
        family: CategoryFamily,
        text: &str,
    ) -> Result<HashMap<CategoryName, f64>, String> {
        let names: &[&str] = match family {
            CategoryFamily::Emotion => &EMOTIONS,
            CategoryFamily::Theme => &THEMES,
        };
        Ok(names
            .iter()
            .map(|name| {
                let score = if text.contains(name) { 0.8 } else { 0.05 };
                (name.to_string(), score)
            })
            .collect())
    }
}

#[test]
fn classified_records_extend_the_dataset() {
    let config = AnalysisConfig::default();
    let (records, emotions, themes) = dataset(50, 8);
    let extra: Vec<TextRecord> = (0..3)
        .map(|i| TextRecord {
            record: RecordInput {
                id: format!("late-{i}"),
                date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
                source_label: "@newsroom".into(),
                counters: EngagementCounters {
                    views: Some(1200),
                    ..EngagementCounters::default()
                },
            },
            text: "joy over the economy".into(),
        })
        .collect();
    let matrix = CategoryMatrixBuilder::new(CategorySchema::default(), config.source_rule.clone())
        .with_records(records)
        .with_family_table(emotions)
        .with_family_table(themes)
        .with_classified_records(&LexiconClassifier, extra)
        .expect("classified")
        .build()
        .expect("matrix");
    assert_eq!(matrix.len(), 53);
    let row = matrix.row_of("late-1").unwrap();
    let joy = matrix.column(CategoryFamily::Emotion, "joy").unwrap();
    assert_eq!(joy[row], Some(0.8));
    let economy = matrix.column(CategoryFamily::Theme, "economy").unwrap();
    assert_eq!(economy[row], Some(0.8));
}

#[test]
fn config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{"high_engagement_quantile": 0.8, "presence_threshold": 0.4, "smooth_categories": ["joy", "public safety"], "logistic": {{"ci_level": 0.9}}}}"#
    )
    .expect("write config");
    let config = AnalysisConfig::from_path(file.path()).expect("config");
    assert!((config.high_engagement_quantile - 0.8).abs() < 1e-12);
    assert!((config.presence_threshold - 0.4).abs() < 1e-12);
    assert_eq!(config.smooth_categories.len(), 2);
    assert!((config.logistic.ci_level - 0.9).abs() < 1e-12);
    assert_eq!(config.logistic.ml_max_iterations, 25);

    let missing = AnalysisConfig::from_path(file.path().with_extension("absent"));
    assert!(matches!(missing, Err(AnalyticsError::Io(_))));
}
