use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// One scored unit for one student. `section_id == None` is a whole-assignment score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub student_id: String,
    pub assignment_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub excused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub assignment_id: String,
    pub name: String,
    pub points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Assignment {
    /// Sum of section points when sections exist, else the standalone total (null counts as 0).
    pub fn effective_total(&self) -> f64 {
        if self.sections.is_empty() {
            self.total_points.unwrap_or(0.0)
        } else {
            self.sections.iter().map(|s| s.points).sum()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedSubject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub graded_assignment_ids: Vec<String>,
    #[serde(default)]
    pub section_ids: Vec<String>,
    #[serde(default)]
    pub default_grade_scale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub name: String,
    pub min_percentage: i64,
    pub max_percentage: i64,
}

impl Grade {
    pub fn contains(&self, pct: i64) -> bool {
        self.min_percentage <= pct && pct <= self.max_percentage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeScale {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub grades: Vec<Grade>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointEventType {
    Positive,
    Negative,
    Redemption,
}

impl PointEventType {
    /// Negative events never count toward unlocking.
    pub fn counts_toward_unlock(self) -> bool {
        matches!(self, PointEventType::Positive | PointEventType::Redemption)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointEvent {
    pub id: String,
    pub student_id: String,
    #[serde(rename = "type")]
    pub kind: PointEventType,
    #[serde(default)]
    pub number_of_points: i64,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub behavior_name: Option<String>,
    #[serde(default)]
    pub reward_item_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDef {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color_class: String,
}

/// Threshold -> definition. Keys are unique and iterate ascending.
pub type AchievementTable = BTreeMap<u32, AchievementDef>;

pub fn default_achievement_table() -> AchievementTable {
    let rows: [(u32, &str, &str, &str); 6] = [
        (1, "First Step", "star", "text-yellow-500"),
        (5, "On a Roll", "flame", "text-orange-500"),
        (10, "Perfect Ten", "award", "text-blue-500"),
        (25, "Quarter Century", "medal", "text-purple-500"),
        (50, "Half Way Hero", "trophy", "text-green-500"),
        (100, "Centurion", "crown", "text-red-500"),
    ];
    rows.into_iter()
        .map(|(threshold, name, icon, color)| {
            (
                threshold,
                AchievementDef {
                    name: name.to_string(),
                    icon: icon.to_string(),
                    color_class: color.to_string(),
                },
            )
        })
        .collect()
}
