//! Chart artifact types and the calculator seam.
//!
//! Deriving star placements from birth data is not done here. The default
//! calculator lays out the twelve palaces around the life palace and leaves
//! star placement to a richer [`ChartCalculator`].

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::timeslot::{self, TimeSlot};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    #[default]
    Female,
}

impl Gender {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" | "男" => Some(Self::Male),
            "female" | "f" | "女" => Some(Self::Female),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarType {
    #[default]
    Solar,
    Lunar,
}

impl CalendarType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "solar" | "gregorian" | "阳历" => Some(Self::Solar),
            "lunar" | "农历" | "阴历" => Some(Self::Lunar),
            _ => None,
        }
    }
}

/// Validated, normalized chart input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartRequest {
    pub birth_date: NaiveDate,
    pub birth_hour: u8,
    pub time_index: u8,
    pub gender: Gender,
    pub calendar_type: CalendarType,
}

pub struct PalaceInfo {
    pub key: &'static str,
    pub label: &'static str,
    pub aliases: &'static [&'static str],
    pub summary: &'static str,
}

/// The twelve palaces in layout order, starting from the life palace.
pub const PALACES: [PalaceInfo; 12] = [
    PalaceInfo { key: "life", label: "命宫", aliases: &["命", "self"], summary: "The core self: temperament, talents and the overall arc of a life." },
    PalaceInfo { key: "siblings", label: "兄弟宫", aliases: &["兄弟"], summary: "Brothers, sisters and close peers, and how much support flows between them." },
    PalaceInfo { key: "spouse", label: "夫妻宫", aliases: &["夫妻", "marriage"], summary: "Marriage and long-term partnership, and what one seeks in a partner." },
    PalaceInfo { key: "children", label: "子女宫", aliases: &["子女"], summary: "Children, students and creative output." },
    PalaceInfo { key: "wealth", label: "财帛宫", aliases: &["财帛", "money"], summary: "Income, spending habits and the way money is earned." },
    PalaceInfo { key: "health", label: "疾厄宫", aliases: &["疾厄"], summary: "Physical constitution and areas of the body that need care." },
    PalaceInfo { key: "travel", label: "迁移宫", aliases: &["迁移", "migration"], summary: "Life away from home: travel, relocation and public image." },
    PalaceInfo { key: "friends", label: "交友宫", aliases: &["交友", "仆役", "servants"], summary: "Friends, colleagues and subordinates." },
    PalaceInfo { key: "career", label: "官禄宫", aliases: &["官禄", "事业"], summary: "Career path, work style and professional standing." },
    PalaceInfo { key: "property", label: "田宅宫", aliases: &["田宅", "home"], summary: "Home, real estate and family environment." },
    PalaceInfo { key: "fortune", label: "福德宫", aliases: &["福德", "spirit"], summary: "Inner contentment, hobbies and spiritual life." },
    PalaceInfo { key: "parents", label: "父母宫", aliases: &["父母"], summary: "Parents, mentors and relationships with authority." },
];

pub const BRANCHES: [&str; 12] = [
    "zi", "chou", "yin", "mao", "chen", "si", "wu", "wei", "shen", "you", "xu", "hai",
];

/// Look up a palace by key, Chinese label or alias. Case-insensitive, and the
/// trailing "palace"/"宫" is optional.
pub fn find_palace(name: &str) -> Option<&'static PalaceInfo> {
    let normalized = name.trim().to_lowercase();
    let normalized = normalized
        .strip_suffix(" palace")
        .unwrap_or(normalized.as_str())
        .trim();
    PALACES.iter().find(|p| {
        p.key == normalized
            || p.label == normalized
            || p.label.trim_end_matches('宫') == normalized
            || p.aliases.iter().any(|a| *a == normalized)
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PalacePosition {
    pub key: &'static str,
    pub label: &'static str,
    pub branch: &'static str,
}

/// The artifact cached as a conversation's derived state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub birth_date: NaiveDate,
    pub birth_hour: u8,
    pub time_slot: TimeSlot,
    pub gender: Gender,
    pub calendar_type: CalendarType,
    pub life_palace_branch: &'static str,
    pub palaces: Vec<PalacePosition>,
    pub generated_at: String,
}

/// Turns a validated request into a chart.
pub trait ChartCalculator: Send + Sync {
    fn calculate(&self, request: &ChartRequest) -> Result<Chart, String>;
}

/// Places the life palace by the month/hour rule (start at yin, count forward
/// by month, back by hour branch) and lays the other palaces out from it.
pub struct PalaceLayout;

impl ChartCalculator for PalaceLayout {
    fn calculate(&self, request: &ChartRequest) -> Result<Chart, String> {
        let time_slot = *timeslot::slot(request.time_index)
            .ok_or_else(|| format!("Invalid time index: {}", request.time_index))?;

        let month = request.birth_date.month() as i32;
        let hour_branch = timeslot::branch_index(request.time_index) as i32;
        let life = (2 + (month - 1) - hour_branch).rem_euclid(12);

        let palaces = PALACES
            .iter()
            .enumerate()
            .map(|(i, p)| PalacePosition {
                key: p.key,
                label: p.label,
                branch: BRANCHES[(life - i as i32).rem_euclid(12) as usize],
            })
            .collect();

        Ok(Chart {
            birth_date: request.birth_date,
            birth_hour: request.birth_hour,
            time_slot,
            gender: request.gender,
            calendar_type: request.calendar_type,
            life_palace_branch: BRANCHES[life as usize],
            palaces,
            generated_at: Utc::now().to_rfc3339(),
        })
    }
}
