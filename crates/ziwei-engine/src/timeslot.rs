//! The 13-slot traditional time system.
//!
//! Twelve double-hours, with the zi hour split in two: slot 0 is early zi
//! and slot 12 is late zi. Clock hours map onto slots 1..=12 only; slot 0 is
//! reachable solely by passing an explicit slot index.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub index: u8,
    /// Romanized earthly branch.
    pub branch: &'static str,
    pub label: &'static str,
    /// Clock hours covered. Early zi has none: clock hours 23 and 0 both
    /// fall in late zi.
    pub range: &'static str,
}

pub const SLOT_COUNT: u8 = 13;

pub const TIME_SLOTS: [TimeSlot; SLOT_COUNT as usize] = [
    TimeSlot { index: 0, branch: "zi", label: "早子时", range: "set by time_index" },
    TimeSlot { index: 1, branch: "chou", label: "丑时", range: "01:00-03:00" },
    TimeSlot { index: 2, branch: "yin", label: "寅时", range: "03:00-05:00" },
    TimeSlot { index: 3, branch: "mao", label: "卯时", range: "05:00-07:00" },
    TimeSlot { index: 4, branch: "chen", label: "辰时", range: "07:00-09:00" },
    TimeSlot { index: 5, branch: "si", label: "巳时", range: "09:00-11:00" },
    TimeSlot { index: 6, branch: "wu", label: "午时", range: "11:00-13:00" },
    TimeSlot { index: 7, branch: "wei", label: "未时", range: "13:00-15:00" },
    TimeSlot { index: 8, branch: "shen", label: "申时", range: "15:00-17:00" },
    TimeSlot { index: 9, branch: "you", label: "酉时", range: "17:00-19:00" },
    TimeSlot { index: 10, branch: "xu", label: "戌时", range: "19:00-21:00" },
    TimeSlot { index: 11, branch: "hai", label: "亥时", range: "21:00-23:00" },
    TimeSlot { index: 12, branch: "zi", label: "晚子时", range: "23:00-01:00" },
];

/// Map a clock hour (0-23) onto a slot index. `None` if out of range.
pub fn slot_for_hour(hour: u8) -> Option<u8> {
    match hour {
        0 | 23 => Some(12),
        1..=22 => Some((hour + 1) / 2),
        _ => None,
    }
}

pub fn slot(index: u8) -> Option<&'static TimeSlot> {
    TIME_SLOTS.get(index as usize)
}

/// Position of the slot's branch in the twelve-branch cycle (zi = 0).
pub fn branch_index(index: u8) -> u8 {
    if index >= 12 {
        0
    } else {
        index
    }
}
