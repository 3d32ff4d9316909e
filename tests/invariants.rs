use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use engagement_stats::{
    CategoryFamily, CategoryMatrix, CategoryMatrixBuilder, CategorySchema, CooccurrenceAnalyzer,
    EngagementCounters, EngagementMetric, EngagementScorer, FamilyTable, PcaReducer,
    RecordInput, SourceRule, TierFilter, spearman,
};

const EMOTIONS: [&str; 2] = ["joy", "fear"];
const THEMES: [&str; 2] = ["economy", "public safety"];

fn schema() -> CategorySchema {
    CategorySchema::empty()
        .with_family(
            CategoryFamily::Emotion,
            EMOTIONS.iter().map(|c| c.to_string()).collect(),
        )
        .with_family(
            CategoryFamily::Theme,
            THEMES.iter().map(|c| c.to_string()).collect(),
        )
}

fn record(i: usize, counters: EngagementCounters) -> RecordInput {
    RecordInput {
        id: format!("rec-{i:04}"),
        date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap() + chrono::Duration::days((i % 20) as i64),
        source_label: if i % 3 == 0 { "@desk".into() } else { "Herald".into() },
        counters,
    }
}

/// Matrix with the given counters and random category scores.
fn build(counters: Vec<EngagementCounters>, seed: u64) -> CategoryMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut emotions = FamilyTable::new(
        CategoryFamily::Emotion,
        EMOTIONS.iter().map(|c| c.to_string()).collect(),
    );
    let mut themes = FamilyTable::new(
        CategoryFamily::Theme,
        THEMES.iter().map(|c| c.to_string()).collect(),
    );
    let mut records = Vec::new();
    for (i, counters) in counters.into_iter().enumerate() {
        let input = record(i, counters);
        emotions.push_row(input.id.clone(), vec![Some(rng.gen()), Some(rng.gen())]);
        themes.push_row(input.id.clone(), vec![Some(rng.gen()), Some(rng.gen())]);
        records.push(input);
    }
    CategoryMatrixBuilder::new(schema(), SourceRule::default())
        .with_records(records)
        .with_family_table(emotions)
        .with_family_table(themes)
        .build()
        .expect("matrix")
}

fn maybe(rng: &mut StdRng, missing_rate: f64, max: u64) -> Option<u64> {
    if rng.gen_bool(missing_rate) {
        None
    } else {
        Some(rng.gen_range(0..max))
    }
}

fn random_counters(n: usize, seed: u64, missing_rate: f64) -> Vec<EngagementCounters> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| EngagementCounters {
            views: maybe(&mut rng, missing_rate, 10_000),
            likes: maybe(&mut rng, missing_rate, 500),
            comments: maybe(&mut rng, missing_rate, 80),
            shares: maybe(&mut rng, missing_rate, 40),
        })
        .collect()
}

#[test]
fn composite_is_missing_exactly_when_all_counters_are_missing() {
    let matrix = build(random_counters(400, 11, 0.5), 1);
    let scored = EngagementScorer::new(0.9).unwrap().score(&matrix);
    let mut all_missing = 0;
    for (record, composite) in matrix.records().iter().zip(&scored.scores.composite) {
        assert_eq!(record.counters.all_missing(), composite.is_none());
        if record.counters.all_missing() {
            all_missing += 1;
        }
    }
    assert!(all_missing > 0, "fixture should include fully unmeasured records");
}

#[test]
fn standardized_metrics_have_unit_moments() {
    let matrix = build(random_counters(250, 12, 0.2), 2);
    let scored = EngagementScorer::new(0.9).unwrap().score(&matrix);
    for metric in EngagementMetric::ALL {
        let column = &scored.scores.standardized[&metric];
        let values: Vec<f64> = column.values.iter().flatten().copied().collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert!(mean.abs() < 1e-9, "{metric} mean {mean}");
        assert!((variance - 1.0).abs() < 1e-9, "{metric} variance {variance}");
    }
}

#[test]
fn label_count_tracks_quantile_and_ties_are_positive() {
    let matrix = build(random_counters(500, 13, 0.2), 3);
    let q = 0.9;
    let scored = EngagementScorer::new(q).unwrap().score(&matrix);
    let labels = &scored.scores.high_engagement;
    let n = labels.labeled() as f64;
    let expected = (1.0 - q) * n;
    assert!((labels.positives() as f64 - expected).abs() <= 2.0);

    // raw shares have many ties; every record at the cutoff is positive
    let shares = &scored.scores.metric_labels[&EngagementMetric::Shares];
    let cutoff = shares.cutoff.unwrap();
    for (record, label) in matrix.records().iter().zip(&shares.labels) {
        if let Some(value) = record.counters.shares {
            assert_eq!(*label, Some(value as f64 >= cutoff));
        } else {
            assert_eq!(*label, None);
        }
    }
    assert!(shares.positives() as f64 >= (1.0 - q) * shares.labeled() as f64 - 1.0);
}

#[test]
fn views_scenario_composite_uses_remaining_metrics() {
    let views = [Some(10), Some(20), Some(30), None, Some(50)];
    let counters: Vec<EngagementCounters> = views
        .iter()
        .enumerate()
        .map(|(i, views)| EngagementCounters {
            views: *views,
            likes: Some(3 + i as u64 * 2),
            comments: Some([4, 1, 7, 2, 9][i]),
            shares: Some([0, 5, 1, 1, 3][i]),
        })
        .collect();
    let matrix = build(counters, 4);
    let scored = EngagementScorer::new(0.9).unwrap().score(&matrix);

    let standardized_views = &scored.scores.standardized[&EngagementMetric::Views];
    let present: Vec<f64> = standardized_views.values.iter().flatten().copied().collect();
    assert_eq!(present.len(), 4);
    assert!(standardized_views.values[3].is_none());
    let mean = present.iter().sum::<f64>() / 4.0;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0;
    assert!(mean.abs() < 1e-9);
    assert!((variance - 1.0).abs() < 1e-9);

    let others: Vec<f64> = [
        EngagementMetric::Likes,
        EngagementMetric::Comments,
        EngagementMetric::Shares,
    ]
    .iter()
    .map(|metric| scored.scores.standardized[metric].values[3].unwrap())
    .collect();
    let expected = others.iter().sum::<f64>() / 3.0;
    assert!((scored.scores.composite[3].unwrap() - expected).abs() < 1e-12);
}

#[test]
fn spearman_is_symmetric_on_random_columns() {
    let mut rng = StdRng::seed_from_u64(21);
    for _ in 0..20 {
        let x: Vec<Option<f64>> = (0..60)
            .map(|_| (!rng.gen_bool(0.1)).then(|| (rng.gen_range(0..10) as f64) / 10.0))
            .collect();
        let y: Vec<Option<f64>> = (0..60)
            .map(|_| (!rng.gen_bool(0.1)).then(|| rng.gen_range(0.0..100.0)))
            .collect();
        let xy = spearman(&x, &y);
        let yx = spearman(&y, &x);
        assert_eq!(xy.n, yx.n);
        assert_eq!(xy.rho, yx.rho);
        assert_eq!(xy.p_value, yx.p_value);
    }
}

#[test]
fn pca_loadings_are_orthonormal() {
    let matrix = build(random_counters(120, 14, 0.2), 5);
    for family in [CategoryFamily::Emotion, CategoryFamily::Theme] {
        let result = PcaReducer::new().decompose(&matrix, family).unwrap();
        assert!(result.is_defined());
        assert_eq!(result.dropped_records, 0);
        for a in &result.components {
            for b in &result.components {
                let dot: f64 = a.loadings.iter().zip(&b.loadings).map(|(x, y)| x * y).sum();
                let expected = if a.name == b.name { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-6);
            }
        }
    }
}

#[test]
fn cooccurrence_cell_is_zero_without_tagged_records() {
    let matrix = build(random_counters(50, 15, 0.2), 6);
    let scored = EngagementScorer::new(0.9).unwrap().score(&matrix);
    // random scores are below 1.0, so nothing reaches a presence threshold of 1.0
    let analyzer = CooccurrenceAnalyzer::new(1.0, 0.05).unwrap();
    let table = analyzer
        .matrix(&scored, CategoryFamily::Emotion, CategoryFamily::Theme, TierFilter::All)
        .unwrap();
    for cell in &table.cells {
        assert_eq!(cell.support, 0);
        assert_eq!(cell.mean_score, 0.0);
    }
    assert!(analyzer.voids(&table).is_empty());
    assert!(table.cell("joy", "public safety").is_some());
}
