//! Numeric feature extraction for relevance classification.
//!
//! Two extractors accumulate text units (pages or markdown excerpts) and turn
//! each unit into a fixed, ordered vector of named features. Column names are
//! part of the contract with the trained models: a model artifact lists the
//! columns it was fit on and scoring refuses a table whose columns differ.
//!
//! Some page features (relative position, share of the document's words) are
//! only defined relative to every unit of the document, so extraction always
//! works over the full accumulated batch.

use std::collections::BTreeMap;

use serde::Serialize;

/// Words that mark a page as fine print.
pub const DISCLAIMER_KEYWORDS: [&str; 6] =
    ["disclaimer", "information", "tax", "sales", "deferred", "charge"];

/// Words that mark a page as carrying holdings data.
pub const NON_DISCLAIMER_KEYWORDS: [&str; 2] = ["quantity", "price"];

/// Characters counted by `special_symbol_ratio`.
pub const SPECIAL_SYMBOLS: [char; 3] = ['"', '(', ')'];

/// Page feature columns, in order.
pub const PAGE_FEATURES: [&str; 8] = [
    "distance_from_start",
    "distance_from_end",
    "page_word_count_ratio",
    "disclaimer_keyword_ratio",
    "non_disclaimer_keyword_ratio",
    "digit_count_ratio",
    "dollar_sign_ratio",
    "special_symbol_ratio",
];

/// Excerpt feature columns, in order.
pub const EXCERPT_FEATURES: [&str; 4] = [
    "new_line_count",
    "pipe_line_ratio",
    "avg_line_length",
    "digit_ratio_by_line",
];

// =============================================================================
// Feature tables
// =============================================================================

/// Named numeric features of one unit, borrowed from a [`FeatureTable`].
#[derive(Debug, Clone, Copy)]
pub struct FeatureVector<'a> {
    columns: &'a [String],
    values: &'a [f64],
}

impl<'a> FeatureVector<'a> {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|idx| self.values[idx])
    }

    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        let values = self.values;
        self.columns
            .iter()
            .zip(values.iter())
            .map(|(name, value)| (name.as_str(), *value))
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// One feature row per unit, in unit order, with a fixed column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureTable {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. The row must have one value per column.
    pub fn push_row(&mut self, row: Vec<f64>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<FeatureVector<'_>> {
        self.rows.get(index).map(|values| FeatureVector {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = FeatureVector<'_>> {
        self.rows.iter().map(|values| FeatureVector {
            columns: &self.columns,
            values,
        })
    }
}

// =============================================================================
// Extractor contract
// =============================================================================

/// Accumulates text units and computes their features.
pub trait FeatureExtractor {
    /// Feature columns this extractor produces, in order.
    fn feature_names(&self) -> &'static [&'static str];

    /// Append one unit. Units keep their insertion order.
    fn add(&mut self, item: &str);

    /// Number of accumulated units.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Features of the unit at `index`. Panics if `index >= len()`.
    fn extract_features(&self, index: usize) -> Vec<f64>;

    /// Features of every accumulated unit, one row per unit in order.
    fn extract_document_features(&self) -> FeatureTable {
        let mut table = FeatureTable::new(self.feature_names());
        for index in 0..self.len() {
            table.push_row(self.extract_features(index));
        }
        table
    }
}

/// Shared per-unit state: trimmed text and its whitespace-separated words.
#[derive(Debug, Clone, Default)]
struct UnitBuffer {
    items: Vec<String>,
    words: Vec<Vec<String>>,
}

impl UnitBuffer {
    fn push(&mut self, item: &str) {
        let text = item.trim().to_string();
        let words = text.split_whitespace().map(str::to_string).collect();
        self.items.push(text);
        self.words.push(words);
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn text(&self, index: usize) -> &str {
        &self.items[index]
    }

    fn word_count(&self, index: usize) -> usize {
        self.words[index].len()
    }

    fn total_word_count(&self) -> usize {
        self.words.iter().map(Vec::len).sum()
    }

    /// Words equal to one of `keywords`, compared lowercase without
    /// surrounding punctuation.
    fn keyword_count(&self, index: usize, keywords: &[&str]) -> usize {
        self.words[index]
            .iter()
            .filter(|word| {
                let normalized = normalize_word(word);
                keywords.iter().any(|kw| *kw == normalized)
            })
            .count()
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// `numerator / denominator`, or 0 when there is nothing to divide by.
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn count_digits(text: &str) -> usize {
    text.chars().filter(char::is_ascii_digit).count()
}

// =============================================================================
// Page features
// =============================================================================

/// Features of whole PDF pages, used to spot disclaimer pages.
#[derive(Debug, Clone, Default)]
pub struct PageFeatureExtractor {
    units: UnitBuffer,
}

impl PageFeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an extractor over every page of a document, in page order.
    pub fn from_pages<S: AsRef<str>>(pages: &[S]) -> Self {
        let mut extractor = Self::new();
        for page in pages {
            extractor.add(page.as_ref());
        }
        extractor
    }
}

impl FeatureExtractor for PageFeatureExtractor {
    fn feature_names(&self) -> &'static [&'static str] {
        &PAGE_FEATURES
    }

    fn add(&mut self, item: &str) {
        self.units.push(item);
    }

    fn len(&self) -> usize {
        self.units.len()
    }

    fn extract_features(&self, index: usize) -> Vec<f64> {
        let text = self.units.text(index);
        let word_count = self.units.word_count(index);
        let dollars = text.chars().filter(|c| *c == '$').count();
        let specials = text.chars().filter(|c| SPECIAL_SYMBOLS.contains(c)).count();

        vec![
            index as f64,
            (self.len() - index) as f64,
            ratio(word_count, self.units.total_word_count()),
            ratio(
                self.units.keyword_count(index, &DISCLAIMER_KEYWORDS),
                word_count,
            ),
            ratio(
                self.units.keyword_count(index, &NON_DISCLAIMER_KEYWORDS),
                word_count,
            ),
            ratio(count_digits(text), word_count),
            ratio(dollars, word_count),
            ratio(specials, word_count),
        ]
    }
}

// =============================================================================
// Excerpt features
// =============================================================================

/// Features of markdown excerpts (paragraphs, tables, headings).
#[derive(Debug, Clone, Default)]
pub struct ExcerptFeatureExtractor {
    units: UnitBuffer,
}

impl ExcerptFeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_excerpts<S: AsRef<str>>(excerpts: &[S]) -> Self {
        let mut extractor = Self::new();
        for excerpt in excerpts {
            extractor.add(excerpt.as_ref());
        }
        extractor
    }
}

impl FeatureExtractor for ExcerptFeatureExtractor {
    fn feature_names(&self) -> &'static [&'static str] {
        &EXCERPT_FEATURES
    }

    fn add(&mut self, item: &str) {
        self.units.push(item);
    }

    fn len(&self) -> usize {
        self.units.len()
    }

    fn extract_features(&self, index: usize) -> Vec<f64> {
        let text = self.units.text(index);
        let lines: Vec<&str> = text.split('\n').collect();
        let new_lines = text.matches('\n').count();
        let pipe_lines = lines.iter().filter(|line| line.contains('|')).count();

        vec![
            new_lines as f64,
            ratio(pipe_lines, new_lines),
            ratio(self.units.word_count(index), lines.len()),
            ratio(count_digits(text), lines.len()),
        ]
    }
}
