use crate::model::{Assignment, Grade, GradeScale, ScoreRecord, Section};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub const NA_LABEL: &str = "N/A";

/// Absorbs representation error such as `33.3 * 100 / 33.3 == 99.999...`
/// without ever lifting a genuinely lower percentage into the next integer.
const FLOOR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreState {
    Scored(f64),
    Excused,
    Missing,
}

#[derive(Debug, Default)]
struct AssignmentScores<'a> {
    whole: Option<&'a ScoreRecord>,
    sections: HashMap<&'a str, &'a ScoreRecord>,
}

/// Lookup over a score snapshot keyed by student, assignment and optional section.
/// Duplicate keys keep the last record seen.
#[derive(Debug, Default)]
pub struct ScoreIndex<'a> {
    by_student: HashMap<&'a str, HashMap<&'a str, AssignmentScores<'a>>>,
}

impl<'a> ScoreIndex<'a> {
    pub fn new(scores: &'a [ScoreRecord]) -> Self {
        let mut by_student: HashMap<&'a str, HashMap<&'a str, AssignmentScores<'a>>> =
            HashMap::new();
        for rec in scores {
            let entry = by_student
                .entry(rec.student_id.as_str())
                .or_default()
                .entry(rec.assignment_id.as_str())
                .or_default();
            match rec.section_id.as_deref() {
                Some(section_id) => {
                    entry.sections.insert(section_id, rec);
                }
                None => entry.whole = Some(rec),
            }
        }
        Self { by_student }
    }

    fn assignment(&self, student_id: &str, assignment_id: &str) -> Option<&AssignmentScores<'a>> {
        self.by_student.get(student_id)?.get(assignment_id)
    }

    pub fn whole(&self, student_id: &str, assignment_id: &str) -> Option<&'a ScoreRecord> {
        self.assignment(student_id, assignment_id)?.whole
    }

    pub fn section(
        &self,
        student_id: &str,
        assignment_id: &str,
        section_id: &str,
    ) -> Option<&'a ScoreRecord> {
        self.assignment(student_id, assignment_id)?
            .sections
            .get(section_id)
            .copied()
    }

    pub fn student_ids(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.by_student.keys().copied()
    }

    pub fn section_state(
        &self,
        student_id: &str,
        assignment: &Assignment,
        section: &Section,
    ) -> ScoreState {
        if let Some(rec) = self.section(student_id, &assignment.id, &section.id) {
            return record_state(rec);
        }
        // An excused whole-assignment record excuses every unscored section.
        match self.whole(student_id, &assignment.id) {
            Some(rec) if rec.excused => ScoreState::Excused,
            _ => ScoreState::Missing,
        }
    }

    pub fn whole_state(&self, student_id: &str, assignment: &Assignment) -> ScoreState {
        self.whole(student_id, &assignment.id)
            .map(record_state)
            .unwrap_or(ScoreState::Missing)
    }
}

fn record_state(rec: &ScoreRecord) -> ScoreState {
    if rec.excused {
        ScoreState::Excused
    } else {
        ScoreState::Scored(rec.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingItem {
    pub assignment_id: String,
    pub assignment_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl MissingItem {
    /// Section name for per-section scores, assignment name otherwise.
    pub fn name(&self) -> &str {
        self.section_name.as_deref().unwrap_or(&self.assignment_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub earned: f64,
    pub possible: f64,
    pub missing_items: Vec<MissingItem>,
}

impl Aggregate {
    pub fn absorb(&mut self, other: Aggregate) {
        self.earned += other.earned;
        self.possible += other.possible;
        self.missing_items.extend(other.missing_items);
    }
}

/// Fold one student's scores for a whole assignment.
pub fn aggregate(assignment: &Assignment, student_id: &str, scores: &ScoreIndex<'_>) -> Aggregate {
    aggregate_filtered(assignment, student_id, scores, None)
}

/// Like [`aggregate`], but when `only_sections` is set only those sections of a
/// sectioned assignment contribute. The rest are neither counted nor reported.
pub fn aggregate_filtered(
    assignment: &Assignment,
    student_id: &str,
    scores: &ScoreIndex<'_>,
    only_sections: Option<&HashSet<&str>>,
) -> Aggregate {
    let mut out = Aggregate::default();

    if !assignment.sections.is_empty() {
        for section in &assignment.sections {
            if let Some(only) = only_sections {
                if !only.contains(section.id.as_str()) {
                    continue;
                }
            }
            out.possible += section.points;
            match scores.section_state(student_id, assignment, section) {
                ScoreState::Scored(v) => out.earned += v,
                ScoreState::Excused => out.possible -= section.points,
                ScoreState::Missing => {
                    out.possible -= section.points;
                    out.missing_items.push(MissingItem {
                        assignment_id: assignment.id.clone(),
                        assignment_name: assignment.name.clone(),
                        section_id: Some(section.id.clone()),
                        section_name: Some(section.name.clone()),
                    });
                }
            }
        }
    } else {
        let total = assignment.total_points.unwrap_or(0.0);
        out.possible = total;
        match scores.whole_state(student_id, assignment) {
            ScoreState::Scored(v) => {
                if v >= 0.0 {
                    out.earned += v;
                }
            }
            ScoreState::Excused => out.possible -= total,
            ScoreState::Missing => {
                out.possible -= total;
                out.missing_items.push(MissingItem {
                    assignment_id: assignment.id.clone(),
                    assignment_name: assignment.name.clone(),
                    section_id: None,
                    section_name: None,
                });
            }
        }
    }

    out.possible = out.possible.max(0.0);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentage {
    pub floored: i64,
    pub raw: f64,
}

/// `None` when nothing is gradable (`possible <= 0`).
pub fn percentage(earned: f64, possible: f64) -> Option<Percentage> {
    if possible <= 0.0 {
        return None;
    }
    let raw = earned * 100.0 / possible;
    Some(Percentage {
        floored: (raw + FLOOR_EPSILON).floor() as i64,
        raw,
    })
}

/// First grade in list order whose inclusive range contains `pct`.
pub fn find_bucket(pct: i64, scale: &GradeScale) -> Option<&Grade> {
    scale.grades.iter().find(|g| g.contains(pct))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Resolution {
    Graded { label: String, percent: i64 },
    #[serde(rename = "na")]
    NotAvailable {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<i64>,
    },
}

pub fn resolve(earned: f64, possible: f64, scale: Option<&GradeScale>) -> Resolution {
    let Some(scale) = scale else {
        return Resolution::NotAvailable {
            reason: "No grade scale selected".to_string(),
            percent: None,
        };
    };
    let Some(pct) = percentage(earned, possible) else {
        return Resolution::NotAvailable {
            reason: "No graded items".to_string(),
            percent: None,
        };
    };
    match find_bucket(pct.floored, scale) {
        Some(grade) => Resolution::Graded {
            label: grade.name.clone(),
            percent: pct.floored,
        },
        None => Resolution::NotAvailable {
            reason: format!(
                "{}% (raw {:.2}%) is outside all ranges of grade scale '{}'",
                pct.floored, pct.raw, scale.name
            ),
            percent: Some(pct.floored),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScaleWarningKind {
    Inverted,
    OutOfBounds,
    Overlap,
    Gap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleWarning {
    pub scale_id: String,
    pub kind: ScaleWarningKind,
    pub message: String,
}

/// Lookup stays first-match-wins; these are advisory only.
pub fn validate_scale(scale: &GradeScale) -> Vec<ScaleWarning> {
    let mut out = Vec::new();
    let warn = |kind, message: String| ScaleWarning {
        scale_id: scale.id.clone(),
        kind,
        message,
    };

    for g in &scale.grades {
        if g.min_percentage > g.max_percentage {
            out.push(warn(
                ScaleWarningKind::Inverted,
                format!(
                    "grade '{}' has min {} above max {} and can never match",
                    g.name, g.min_percentage, g.max_percentage
                ),
            ));
            continue;
        }
        if g.min_percentage < 0 || g.max_percentage > 100 {
            out.push(warn(
                ScaleWarningKind::OutOfBounds,
                format!(
                    "grade '{}' range {}..={} extends outside 0..=100",
                    g.name, g.min_percentage, g.max_percentage
                ),
            ));
        }
    }

    let valid: Vec<&Grade> = scale
        .grades
        .iter()
        .filter(|g| g.min_percentage <= g.max_percentage)
        .collect();
    for (i, earlier) in valid.iter().enumerate() {
        for later in &valid[i + 1..] {
            let lo = earlier.min_percentage.max(later.min_percentage);
            let hi = earlier.max_percentage.min(later.max_percentage);
            if lo <= hi {
                out.push(warn(
                    ScaleWarningKind::Overlap,
                    format!(
                        "grades '{}' and '{}' overlap on {}..={}; '{}' wins",
                        earlier.name, later.name, lo, hi, earlier.name
                    ),
                ));
            }
        }
    }

    let mut gap_start: Option<i64> = None;
    for pct in 0..=100_i64 {
        let covered = valid.iter().any(|g| g.contains(pct));
        match (covered, gap_start) {
            (false, None) => gap_start = Some(pct),
            (true, Some(start)) => {
                out.push(warn(
                    ScaleWarningKind::Gap,
                    format!("no grade covers {}..={}", start, pct - 1),
                ));
                gap_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = gap_start {
        out.push(warn(
            ScaleWarningKind::Gap,
            format!("no grade covers {}..=100", start),
        ));
    }

    out
}
