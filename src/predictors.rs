//! Static predictor sets for model fitting.
//!
//! A model is built from an explicit list of predictors. Each carries an
//! internal identifier that is always a valid, unique identifier and a display
//! name that is cosmetic only and never parsed, so category names containing
//! spaces or punctuation cannot collide with other terms.

use std::collections::HashSet;

use serde::Serialize;

use crate::types::PredictorId;

/// One numeric predictor column aligned with the matrix records.
#[derive(Clone, Debug, Serialize)]
pub struct Predictor {
    /// Valid identifier, unique within the set.
    pub id: PredictorId,
    /// Display name; never parsed.
    pub display: String,
    /// Values aligned with the matrix records.
    #[serde(skip)]
    pub values: Vec<Option<f64>>,
}

/// Ordered set of predictors with unique internal identifiers.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PredictorSet {
    predictors: Vec<Predictor>,
    #[serde(skip)]
    taken: HashSet<PredictorId>,
}

impl PredictorSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a numeric predictor and return its internal identifier.
    pub fn push(&mut self, display: impl Into<String>, values: Vec<Option<f64>>) -> PredictorId {
        let display = display.into();
        let id = escape_identifier(&display, &self.taken);
        self.taken.insert(id.clone());
        self.predictors.push(Predictor {
            id: id.clone(),
            display,
            values,
        });
        id
    }

    /// Add a 0/1 indicator predictor from boolean values.
    pub fn push_indicator(
        &mut self,
        display: impl Into<String>,
        values: &[Option<bool>],
    ) -> PredictorId {
        let values = values
            .iter()
            .map(|value| value.map(|flag| if flag { 1.0 } else { 0.0 }))
            .collect();
        self.push(display, values)
    }

    /// Predictors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Predictor> {
        self.predictors.iter()
    }

    /// Predictor by internal identifier.
    pub fn get(&self, id: &str) -> Option<&Predictor> {
        self.predictors.iter().find(|predictor| predictor.id == id)
    }

    /// Number of predictors.
    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }

    /// A set containing only `predictor`, keeping its identifier.
    pub fn single(predictor: &Predictor) -> Self {
        let mut set = Self::new();
        set.taken.insert(predictor.id.clone());
        set.predictors.push(predictor.clone());
        set
    }
}

/// Derive a unique identifier from a display name.
///
/// Non-alphanumeric runs become `_`, names are lowercased, a leading digit or
/// empty result gets an `x_` prefix, and collisions get a numeric suffix.
pub fn escape_identifier(display: &str, taken: &HashSet<PredictorId>) -> PredictorId {
    let mut base = String::with_capacity(display.len());
    let mut last_underscore = false;
    for ch in display.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            base.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            base.push('_');
            last_underscore = true;
        }
    }
    let base = base.trim_matches('_').to_string();
    let base = match base.chars().next() {
        None => "x".to_string(),
        Some(first) if first.is_ascii_digit() => format!("x_{base}"),
        Some(_) => base,
    };
    if !taken.contains(&base) {
        return base;
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
