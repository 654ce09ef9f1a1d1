use crate::calc::{self, Aggregate, CalcError, Resolution, ScaleWarning, ScoreIndex, NA_LABEL};
use crate::model::{Assignment, GradeScale, GradedSubject, ScoreRecord, Student};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Snapshot handed over by the persistence layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportInput {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub subjects: Vec<GradedSubject>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub scores: Vec<ScoreRecord>,
    #[serde(default)]
    pub scales: Vec<GradeScale>,
    /// subjectId -> scaleId
    #[serde(default)]
    pub scale_selections: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub na_label: String,
    pub warn_on_scale_overlap: bool,
    pub fallback_to_first_scale: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            na_label: NA_LABEL.to_string(),
            warn_on_scale_overlap: true,
            fallback_to_first_scale: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GradeCell {
    Graded {
        label: String,
        percent: i64,
        earned: f64,
        possible: f64,
    },
    #[serde(rename = "na")]
    NotAvailable {
        label: String,
        reason: String,
        earned: f64,
        possible: f64,
    },
}

impl GradeCell {
    pub fn label(&self) -> &str {
        match self {
            GradeCell::Graded { label, .. } | GradeCell::NotAvailable { label, .. } => label,
        }
    }

    #[cfg(test)]
    pub fn reason(&self) -> Option<&str> {
        match self {
            GradeCell::Graded { .. } => None,
            GradeCell::NotAvailable { reason, .. } => Some(reason),
        }
    }

    fn from_aggregate(agg: &Aggregate, scale: Option<&GradeScale>, na_label: &str) -> Self {
        match calc::resolve(agg.earned, agg.possible, scale) {
            Resolution::Graded { label, percent } => GradeCell::Graded {
                label,
                percent,
                earned: agg.earned,
                possible: agg.possible,
            },
            Resolution::NotAvailable { reason, .. } => GradeCell::NotAvailable {
                label: na_label.to_string(),
                reason,
                earned: agg.earned,
                possible: agg.possible,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingScoreIssue {
    pub item_name: String,
    pub assignment_id: String,
    pub assignment_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    pub student_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    /// subjectId -> studentId -> cell
    pub grid: BTreeMap<String, BTreeMap<String, GradeCell>>,
    /// subjectId -> missing items, in assignment/section order
    pub issues: BTreeMap<String, Vec<MissingScoreIssue>>,
    /// subjectId -> scale actually used
    pub scales_used: BTreeMap<String, Option<String>>,
    pub scale_warnings: Vec<ScaleWarning>,
}

enum Contribution<'a> {
    Full(&'a Assignment),
    Sections(&'a Assignment, HashSet<&'a str>),
}

impl<'a> Contribution<'a> {
    fn assignment(&self) -> &'a Assignment {
        match self {
            Contribution::Full(a) | Contribution::Sections(a, _) => a,
        }
    }

    fn aggregate(&self, student_id: &str, scores: &ScoreIndex<'_>) -> Aggregate {
        match self {
            Contribution::Full(a) => calc::aggregate(a, student_id, scores),
            Contribution::Sections(a, only) => {
                calc::aggregate_filtered(a, student_id, scores, Some(only))
            }
        }
    }
}

/// Resolves subject membership: fully included assignments first, in listed
/// order, then assignments contributing only individually listed sections.
fn contributions<'a>(
    subject: &GradedSubject,
    assignments: &HashMap<&str, &'a Assignment>,
    section_owner: &HashMap<&str, &'a Assignment>,
) -> Vec<Contribution<'a>> {
    let mut out: Vec<Contribution<'a>> = Vec::new();
    let mut full: HashSet<&str> = HashSet::new();
    for id in &subject.graded_assignment_ids {
        let Some(a) = assignments.get(id.as_str()).copied() else {
            continue;
        };
        if full.insert(a.id.as_str()) {
            out.push(Contribution::Full(a));
        }
    }

    let mut partial_pos: HashMap<&str, usize> = HashMap::new();
    for section_id in &subject.section_ids {
        let Some(owner) = section_owner.get(section_id.as_str()).copied() else {
            continue;
        };
        if full.contains(owner.id.as_str()) {
            continue;
        }
        let Some(section) = owner.sections.iter().find(|s| s.id == *section_id) else {
            continue;
        };
        let pos = *partial_pos.entry(owner.id.as_str()).or_insert_with(|| {
            out.push(Contribution::Sections(owner, HashSet::new()));
            out.len() - 1
        });
        if let Contribution::Sections(_, only) = &mut out[pos] {
            only.insert(section.id.as_str());
        }
    }
    out
}

fn pick_scale<'a>(
    subject: &GradedSubject,
    scales: &'a [GradeScale],
    selections: &BTreeMap<String, String>,
    opts: &ReportOptions,
) -> Option<&'a GradeScale> {
    let by_id = |id: &str| scales.iter().find(|s| s.id == id);
    if let Some(selected) = selections.get(&subject.id) {
        match by_id(selected) {
            Some(s) => return Some(s),
            None => tracing::warn!(
                subject = %subject.id,
                scale = %selected,
                "selected grade scale not found; falling back"
            ),
        }
    }
    if let Some(s) = subject.default_grade_scale.as_deref().and_then(by_id) {
        return Some(s);
    }
    if opts.fallback_to_first_scale {
        scales.first()
    } else {
        None
    }
}

fn check_roster(students: &[Student], scores: &ScoreIndex<'_>) -> Result<(), CalcError> {
    let roster: HashSet<&str> = students.iter().map(|s| s.id.as_str()).collect();
    let mut unknown: Vec<&str> = scores
        .student_ids()
        .filter(|id| !roster.contains(id))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(CalcError::new(
        "unknown_student",
        format!("score references student {} not in roster", unknown[0]),
    )
    .with_details(json!({ "studentIds": unknown })))
}

struct IssueSlot<'a> {
    order: (usize, usize),
    issue: MissingScoreIssue,
    /// Student ids already listed; names alone are not unique.
    seen: HashSet<&'a str>,
}

pub fn build_report(input: &ReportInput, opts: &ReportOptions) -> Result<GradeReport, CalcError> {
    let scores = ScoreIndex::new(&input.scores);
    check_roster(&input.students, &scores)?;

    let assignments: HashMap<&str, &Assignment> = input
        .assignments
        .iter()
        .map(|a| (a.id.as_str(), a))
        .collect();
    let section_owner: HashMap<&str, &Assignment> = input
        .assignments
        .iter()
        .flat_map(|a| a.sections.iter().map(move |s| (s.id.as_str(), a)))
        .collect();

    let mut report = GradeReport {
        grid: BTreeMap::new(),
        issues: BTreeMap::new(),
        scales_used: BTreeMap::new(),
        scale_warnings: Vec::new(),
    };
    let mut used_scale_ids: Vec<&str> = Vec::new();

    for subject in &input.subjects {
        let parts = contributions(subject, &assignments, &section_owner);
        let scale = pick_scale(subject, &input.scales, &input.scale_selections, opts);
        if let Some(s) = scale {
            if !used_scale_ids.contains(&s.id.as_str()) {
                used_scale_ids.push(s.id.as_str());
            }
        }

        let mut totals: Vec<Aggregate> = vec![Aggregate::default(); input.students.len()];
        let mut slots: Vec<IssueSlot> = Vec::new();
        let mut slot_by_item: HashMap<(String, Option<String>), usize> = HashMap::new();

        for (ci, part) in parts.iter().enumerate() {
            let assignment = part.assignment();
            for (si, student) in input.students.iter().enumerate() {
                let agg = part.aggregate(&student.id, &scores);
                for item in &agg.missing_items {
                    let key = (item.assignment_id.clone(), item.section_id.clone());
                    let idx = *slot_by_item.entry(key).or_insert_with(|| {
                        let section_pos = item
                            .section_id
                            .as_deref()
                            .and_then(|sid| assignment.sections.iter().position(|s| s.id == sid))
                            .unwrap_or(0);
                        slots.push(IssueSlot {
                            order: (ci, section_pos),
                            issue: MissingScoreIssue {
                                item_name: item.name().to_string(),
                                assignment_id: item.assignment_id.clone(),
                                assignment_name: item.assignment_name.clone(),
                                section_id: item.section_id.clone(),
                                section_name: item.section_name.clone(),
                                student_names: Vec::new(),
                            },
                            seen: HashSet::new(),
                        });
                        slots.len() - 1
                    });
                    let slot = &mut slots[idx];
                    if slot.seen.insert(student.id.as_str()) {
                        slot.issue.student_names.push(student.full_name());
                    }
                }
                totals[si].absorb(agg);
            }
        }

        let cells: BTreeMap<String, GradeCell> = input
            .students
            .iter()
            .zip(&totals)
            .map(|(student, agg)| {
                let cell = GradeCell::from_aggregate(agg, scale, &opts.na_label);
                (student.id.clone(), cell)
            })
            .collect();

        slots.sort_by_key(|s| s.order);
        tracing::debug!(
            subject = %subject.id,
            contributions = parts.len(),
            students = cells.len(),
            missing_items = slots.len(),
            "graded subject"
        );

        report.grid.insert(subject.id.clone(), cells);
        report
            .issues
            .insert(subject.id.clone(), slots.into_iter().map(|s| s.issue).collect());
        report
            .scales_used
            .insert(subject.id.clone(), scale.map(|s| s.id.clone()));
    }

    if opts.warn_on_scale_overlap {
        for id in used_scale_ids {
            if let Some(scale) = input.scales.iter().find(|s| s.id == id) {
                report.scale_warnings.extend(calc::validate_scale(scale));
            }
        }
    }

    Ok(report)
}
