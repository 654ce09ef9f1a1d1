use crate::model::{AchievementDef, AchievementTable, PointEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const NO_ITEM_KEY: &str = "No-Item";

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// Grouping key. Behavior and reward events never share a key.
pub fn item_key(event: &PointEvent) -> String {
    match (
        non_blank(event.behavior_name.as_deref()),
        non_blank(event.reward_item_name.as_deref()),
    ) {
        (Some(b), Some(r)) => format!("Behavior: {} | Reward: {}", b, r),
        (Some(b), None) => format!("Behavior: {}", b),
        (None, Some(r)) => format!("Reward: {}", r),
        (None, None) => NO_ITEM_KEY.to_string(),
    }
}

fn item_name(event: &PointEvent) -> String {
    match (
        non_blank(event.behavior_name.as_deref()),
        non_blank(event.reward_item_name.as_deref()),
    ) {
        (Some(b), Some(r)) => format!("{} / {}", b, r),
        (Some(b), None) => b.to_string(),
        (None, Some(r)) => r.to_string(),
        (None, None) => NO_ITEM_KEY.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub threshold: u32,
    pub name: String,
    pub icon: String,
    pub color_class: String,
    pub item_name: String,
    pub event_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedAchievement {
    pub item_key: String,
    pub count: u32,
    pub unlocked: Vec<Achievement>,
    pub highest: Option<Achievement>,
    pub next_threshold: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AchievementEngine {
    thresholds: Vec<u32>,
    defs: AchievementTable,
}

impl AchievementEngine {
    /// Thresholds are deduplicated and sorted here, once. Zero can never be
    /// reached by a running count and is dropped.
    pub fn new(thresholds: impl IntoIterator<Item = u32>, defs: AchievementTable) -> Self {
        Self {
            thresholds: normalize_thresholds(thresholds),
            defs,
        }
    }

    pub fn from_table(table: AchievementTable) -> Self {
        Self::new(table.keys().copied().collect::<Vec<_>>(), table)
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    fn def(&self, threshold: u32) -> AchievementDef {
        self.defs
            .get(&threshold)
            .cloned()
            .unwrap_or_else(|| AchievementDef {
                name: format!("Milestone {}", threshold),
                icon: "star".to_string(),
                color_class: String::new(),
            })
    }

    fn group(&self, item_key: String, events: Vec<&PointEvent>) -> GroupedAchievement {
        let mut qualifying: Vec<&PointEvent> = events
            .into_iter()
            .filter(|e| e.kind.counts_toward_unlock())
            .collect();
        // Stable: events with equal timestamps keep ledger order.
        qualifying.sort_by_key(|e| e.created_date);

        let mut count: u32 = 0;
        let mut unlocked: Vec<Achievement> = Vec::new();
        for event in qualifying {
            count += 1;
            if self.thresholds.binary_search(&count).is_ok() {
                let def = self.def(count);
                unlocked.push(Achievement {
                    threshold: count,
                    name: def.name,
                    icon: def.icon,
                    color_class: def.color_class,
                    item_name: item_name(event),
                    event_id: event.id.clone(),
                    unlocked_at: event.created_date,
                });
            }
        }

        let next_threshold = self.thresholds.iter().copied().find(|t| *t > count);
        GroupedAchievement {
            item_key,
            count,
            highest: unlocked.last().cloned(),
            unlocked,
            next_threshold,
        }
    }

    /// One entry per item key, ordered by key.
    pub fn compute(&self, history: &[PointEvent]) -> Vec<GroupedAchievement> {
        let mut groups: BTreeMap<String, Vec<&PointEvent>> = BTreeMap::new();
        for event in history {
            groups.entry(item_key(event)).or_default().push(event);
        }
        let out: Vec<GroupedAchievement> = groups
            .into_iter()
            .map(|(key, events)| self.group(key, events))
            .collect();
        tracing::debug!(
            events = history.len(),
            groups = out.len(),
            unlocked = out.iter().map(|g| g.unlocked.len()).sum::<usize>(),
            "computed achievements"
        );
        out
    }

    /// Partitions a class-wide ledger by student before computing.
    pub fn compute_for_class(
        &self,
        history: &[PointEvent],
    ) -> BTreeMap<String, Vec<GroupedAchievement>> {
        let mut by_student: BTreeMap<&str, Vec<PointEvent>> = BTreeMap::new();
        for event in history {
            by_student
                .entry(event.student_id.as_str())
                .or_default()
                .push(event.clone());
        }
        by_student
            .into_iter()
            .map(|(student_id, events)| (student_id.to_string(), self.compute(&events)))
            .collect()
    }
}

/// Sorted, deduplicated, non-zero thresholds.
pub fn normalize_thresholds(thresholds: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut out: Vec<u32> = thresholds.into_iter().filter(|t| *t > 0).collect();
    out.sort_unstable();
    out.dedup();
    out
}

pub fn compute_achievements(
    history: &[PointEvent],
    thresholds: &[u32],
    defs: &AchievementTable,
) -> Vec<GroupedAchievement> {
    AchievementEngine::new(thresholds.iter().copied(), defs.clone()).compute(history)
}
