use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

/// Label used for percentages below the lowest configured boundary.
pub const FAIL_LABEL: &str = "F";

/// Default grade-cut configuration applied when a section has no stored set.
pub const DEFAULT_THRESHOLDS: [(&str, f64); 7] = [
    ("A", 80.0),
    ("B+", 75.0),
    ("B", 70.0),
    ("C+", 65.0),
    ("C", 60.0),
    ("D+", 55.0),
    ("D", 50.0),
];

/// Canonical label <-> grade-point table, highest band first.
const GRADE_POINTS: [(&str, f64); 8] = [
    ("A", 4.0),
    ("B+", 3.5),
    ("B", 3.0),
    ("C+", 2.5),
    ("C", 2.0),
    ("D+", 1.5),
    ("D", 1.0),
    (FAIL_LABEL, 0.0),
];

/// Round to 2 decimals, half away from zero.
pub fn round2(x: f64) -> f64 {
    let r = ((x.abs() * 100.0) + 0.5).floor() / 100.0;
    if x < 0.0 {
        -r
    } else {
        r
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }
}

// ---------------------------------------------------------------------------
// Score entry validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryStatus {
    Unfilled,
    Valid(f64),
    Invalid,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Unfilled => "unfilled",
            EntryStatus::Valid(_) => "valid",
            EntryStatus::Invalid => "invalid",
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            EntryStatus::Valid(v) => Some(*v),
            _ => None,
        }
    }
}

/// Bounds-check one raw cell against the item maximum. Values are reported
/// as invalid, never clamped. A `max_score <= 0` item has no usable upper
/// bound, so only the lower bound applies.
pub fn validate_entry(raw: Option<f64>, max_score: f64) -> EntryStatus {
    let Some(v) = raw else {
        return EntryStatus::Unfilled;
    };
    if !v.is_finite() || v < 0.0 || (max_score > 0.0 && v > max_score) {
        return EntryStatus::Invalid;
    }
    EntryStatus::Valid(v)
}

/// JSON cell coercion used by the score-entry surface: null and blank strings
/// mean "unfilled", numeric strings are accepted the way the grid sends them.
pub fn validate_entry_json(raw: &serde_json::Value, max_score: f64) -> EntryStatus {
    match raw {
        serde_json::Value::Null => EntryStatus::Unfilled,
        serde_json::Value::Number(n) => validate_entry(n.as_f64(), max_score),
        serde_json::Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return EntryStatus::Unfilled;
            }
            match t.parse::<f64>() {
                Ok(v) => validate_entry(Some(v), max_score),
                Err(_) => EntryStatus::Invalid,
            }
        }
        _ => EntryStatus::Invalid,
    }
}

/// Pure diff against the last-saved value, for UI highlighting only.
/// Has no bearing on validity.
pub fn entry_changed(current: Option<f64>, last_saved: Option<f64>) -> bool {
    current != last_saved
}

// ---------------------------------------------------------------------------
// Threshold set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub label: String,
    pub boundary: f64,
}

/// An ordered set of grade cut points, highest band first, with an implicit
/// fail band below the last one. Construction enforces the non-increasing
/// boundary invariant; a constructed set is safe to share read-only across
/// every student in a recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    bands: Vec<GradeBand>,
}

impl ThresholdSet {
    pub fn new(bands: Vec<GradeBand>) -> Result<Self, EngineError> {
        if bands.is_empty() {
            return Err(EngineError::new(
                "bad_params",
                "at least one grade band is required",
            ));
        }
        for pair in bands.windows(2) {
            if pair[0].boundary < pair[1].boundary {
                return Err(EngineError::with_details(
                    "invalid_threshold_order",
                    format!(
                        "boundary for {} ({}) must be >= boundary for {} ({})",
                        pair[0].label, pair[0].boundary, pair[1].label, pair[1].boundary
                    ),
                    json!({
                        "labelAbove": pair[0].label,
                        "labelBelow": pair[1].label,
                        "boundaryAbove": pair[0].boundary,
                        "boundaryBelow": pair[1].boundary,
                    }),
                ));
            }
        }
        Ok(Self { bands })
    }

    pub fn default_set() -> Self {
        let bands = DEFAULT_THRESHOLDS
            .iter()
            .map(|(label, boundary)| GradeBand {
                label: label.to_string(),
                boundary: *boundary,
            })
            .collect();
        Self { bands }
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    /// Lowest configured boundary; percentages below it fall into the
    /// implicit fail band.
    pub fn floor_boundary(&self) -> f64 {
        self.bands[self.bands.len() - 1].boundary
    }

    /// First band (highest to lowest) whose boundary is `<= percentage`.
    /// A percentage exactly on a boundary takes that band, never the one
    /// below.
    pub fn classify(&self, percentage: f64) -> &str {
        for band in &self.bands {
            if percentage >= band.boundary {
                return &band.label;
            }
        }
        FAIL_LABEL
    }
}

// ---------------------------------------------------------------------------
// Grade label helpers
// ---------------------------------------------------------------------------

pub fn grade_points(label: &str) -> Option<f64> {
    GRADE_POINTS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, p)| *p)
}

pub fn grade_label_for_points(points: f64) -> Option<&'static str> {
    GRADE_POINTS
        .iter()
        .find(|(_, p)| *p == points)
        .map(|(l, _)| *l)
}

/// Normalize a grade string from legacy data to the canonical label table.
/// Unrecognized values pass through trimmed, as an opaque label, so old
/// non-standard grades keep displaying.
pub fn normalize_grade_label(raw: &str) -> String {
    let t = raw.trim();
    let lower = t.to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "a" | "a+" | "4" | "4.0" => Some("A"),
        "b+" | "3.5" => Some("B+"),
        "b" | "3" | "3.0" => Some("B"),
        "c+" | "2.5" => Some("C+"),
        "c" | "2" | "2.0" => Some("C"),
        "d+" | "1.5" => Some("D+"),
        "d" | "1" | "1.0" => Some("D"),
        "f" | "0" | "0.0" => Some(FAIL_LABEL),
        _ => None,
    };
    match canonical {
        Some(l) => l.to_string(),
        None => t.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentItem {
    pub id: String,
    pub title: String,
    pub max_score: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub total_score: f64,
    pub max_possible: f64,
    pub percentage: f64,
    pub grade: String,
}

/// Roll up one student's saved scores over the section's items.
///
/// Only items with a positive maximum participate; scores for items that no
/// longer exist simply stop contributing. An unfilled cell is scored as
/// zero: it adds nothing to the total while its item's maximum still counts
/// toward `max_possible`. The percentage is the raw ratio, deliberately
/// unclamped, and `grade` is left empty for the classifier.
pub fn aggregate_student(
    student_id: &str,
    items: &[AssessmentItem],
    raw_by_item: &HashMap<String, f64>,
) -> StudentAggregate {
    let mut total_score = 0.0_f64;
    let mut max_possible = 0.0_f64;
    for item in items {
        if item.max_score <= 0.0 {
            continue;
        }
        max_possible += item.max_score;
        if let Some(v) = raw_by_item.get(&item.id) {
            total_score += v;
        }
    }

    let percentage = if max_possible > 0.0 {
        round2(100.0 * total_score / max_possible)
    } else {
        0.0
    };

    StudentAggregate {
        student_id: student_id.to_string(),
        total_score,
        max_possible,
        percentage,
        grade: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionDistribution {
    pub student_count: usize,
    pub average_percentage: f64,
    pub pass_count: usize,
    pub counts_by_grade: BTreeMap<String, usize>,
}

/// Reduce already-classified aggregates into a section report. Every
/// configured band plus the fail band appears in `counts_by_grade`, zero
/// counts included; legacy grades outside the table get their own key.
pub fn summarize(aggregates: &[StudentAggregate], thresholds: &ThresholdSet) -> SectionDistribution {
    let mut counts_by_grade: BTreeMap<String, usize> = BTreeMap::new();
    for band in thresholds.bands() {
        counts_by_grade.insert(band.label.clone(), 0);
    }
    counts_by_grade.insert(FAIL_LABEL.to_string(), 0);

    let floor = thresholds.floor_boundary();
    let mut pass_count = 0_usize;
    let mut percent_sum = 0.0_f64;
    for agg in aggregates {
        percent_sum += agg.percentage;
        if agg.percentage >= floor {
            pass_count += 1;
        }
        let label = normalize_grade_label(&agg.grade);
        *counts_by_grade.entry(label).or_insert(0) += 1;
    }

    let student_count = aggregates.len();
    let average_percentage = if student_count > 0 {
        round2(percent_sum / (student_count as f64))
    } else {
        0.0
    };

    SectionDistribution {
        student_count,
        average_percentage,
        pass_count,
        counts_by_grade,
    }
}
