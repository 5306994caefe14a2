//! Course-schedule grids: a fixed 7-day week, one row per time band.
//!
//! Slots are bucketed by teacher or classroom in a single pass, and every bucket
//! renders the same grid shape so the UI can stack them.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const UNASSIGNED: &str = "unassigned";
pub const DAYS_PER_WEEK: usize = 7;

fn ser_hhmm<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format("%H:%M").to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub campus_id: String,
    pub teacher_id: Option<String>,
    pub teacher_name: Option<String>,
    pub classroom_id: Option<String>,
    pub classroom_name: Option<String>,
    pub date: NaiveDate,
    #[serde(serialize_with = "ser_hhmm")]
    pub start_time: NaiveTime,
    #[serde(serialize_with = "ser_hhmm")]
    pub end_time: NaiveTime,
    pub student_count: i64,
    pub note: Option<String>,
}

impl TimeSlot {
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.date == other.date
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }

    fn shares_resource(&self, other: &TimeSlot) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| matches!((a, b), (Some(x), Some(y)) if x == y);
        same(&self.teacher_id, &other.teacher_id) || same(&self.classroom_id, &other.classroom_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WeekStart {
    #[default]
    Monday,
    Sunday,
}

impl WeekStart {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" => Some(Self::Monday),
            "sunday" => Some(Self::Sunday),
            _ => None,
        }
    }

    fn weekday(self) -> Weekday {
        match self {
            Self::Monday => Weekday::Mon,
            Self::Sunday => Weekday::Sun,
        }
    }
}

/// First day of the week containing `day`.
pub fn week_first_day(day: NaiveDate, start: WeekStart) -> NaiveDate {
    let back = (7 + day.weekday().num_days_from_monday() - start.weekday().num_days_from_monday()) % 7;
    day - Duration::days(i64::from(back))
}

/// Column index of `date` in the week beginning at `first`, if it falls inside it.
pub fn day_column(date: NaiveDate, first: NaiveDate) -> Option<usize> {
    let offset = (date - first).num_days();
    if (0..DAYS_PER_WEEK as i64).contains(&offset) {
        Some(offset as usize)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayHeader {
    pub date: NaiveDate,
    pub weekday: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub slots: Vec<TimeSlot>,
    pub conflict: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    #[serde(serialize_with = "ser_hhmm")]
    pub start_time: NaiveTime,
    #[serde(serialize_with = "ser_hhmm")]
    pub end_time: NaiveTime,
    pub cells: Vec<GridCell>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekGrid {
    pub week_start: NaiveDate,
    pub days: Vec<DayHeader>,
    pub rows: Vec<GridRow>,
    pub slot_count: usize,
}

/// Ids of slots that overlap another slot on the same teacher or classroom.
pub fn conflicting_ids(slots: &[&TimeSlot]) -> HashSet<String> {
    let mut out = HashSet::new();
    for (i, a) in slots.iter().enumerate() {
        for b in &slots[i + 1..] {
            if a.overlaps(b) && a.shares_resource(b) {
                out.insert(a.id.clone());
                out.insert(b.id.clone());
            }
        }
    }
    out
}

fn slot_order(a: &TimeSlot, b: &TimeSlot) -> std::cmp::Ordering {
    a.start_time
        .cmp(&b.start_time)
        .then_with(|| a.course_name.cmp(&b.course_name))
        .then_with(|| a.id.cmp(&b.id))
}

/// Slots outside the week are dropped.
pub fn build_week_grid(slots: &[TimeSlot], first: NaiveDate) -> WeekGrid {
    let in_week: Vec<&TimeSlot> = slots
        .iter()
        .filter(|s| day_column(s.date, first).is_some())
        .collect();
    let conflicts = conflicting_ids(&in_week);

    let bands: BTreeSet<(NaiveTime, NaiveTime)> =
        in_week.iter().map(|s| (s.start_time, s.end_time)).collect();
    let mut rows: Vec<GridRow> = bands
        .into_iter()
        .map(|(start_time, end_time)| GridRow {
            start_time,
            end_time,
            cells: vec![GridCell::default(); DAYS_PER_WEEK],
        })
        .collect();

    for slot in &in_week {
        let Some(col) = day_column(slot.date, first) else {
            continue;
        };
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.start_time == slot.start_time && r.end_time == slot.end_time)
        else {
            continue;
        };
        let cell = &mut row.cells[col];
        cell.conflict |= conflicts.contains(&slot.id);
        cell.slots.push((*slot).clone());
    }
    for row in &mut rows {
        for cell in &mut row.cells {
            cell.slots.sort_by(slot_order);
        }
    }

    let days = (0..DAYS_PER_WEEK)
        .map(|i| {
            let date = first + Duration::days(i as i64);
            DayHeader {
                date,
                weekday: date.weekday().to_string(),
            }
        })
        .collect();

    WeekGrid {
        week_start: first,
        days,
        rows,
        slot_count: in_week.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Teacher,
    Classroom,
}

impl GroupBy {
    fn key_and_label(self, slot: &TimeSlot) -> (String, String) {
        let (id, name) = match self {
            Self::Teacher => (&slot.teacher_id, &slot.teacher_name),
            Self::Classroom => (&slot.classroom_id, &slot.classroom_name),
        };
        match id {
            Some(id) => (id.clone(), name.clone().unwrap_or_else(|| id.clone())),
            None => (UNASSIGNED.to_string(), "Unassigned".to_string()),
        }
    }
}

/// One pass over the slots, keyed by teacher or classroom id.
pub fn group_slots(slots: Vec<TimeSlot>, by: GroupBy) -> BTreeMap<String, (String, Vec<TimeSlot>)> {
    let mut buckets: BTreeMap<String, (String, Vec<TimeSlot>)> = BTreeMap::new();
    for slot in slots {
        let (key, label) = by.key_and_label(&slot);
        buckets
            .entry(key)
            .or_insert_with(|| (label, Vec::new()))
            .1
            .push(slot);
    }
    buckets
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub key: String,
    pub label: String,
    pub grid: WeekGrid,
}

/// Buckets sorted by label, with `unassigned` last.
pub fn bucket_grids(slots: Vec<TimeSlot>, by: GroupBy, first: NaiveDate) -> Vec<Bucket> {
    let mut out: Vec<Bucket> = group_slots(slots, by)
        .into_iter()
        .map(|(key, (label, slots))| Bucket {
            grid: build_week_grid(&slots, first),
            key,
            label,
        })
        .collect();
    out.sort_by(|a, b| {
        (a.key == UNASSIGNED)
            .cmp(&(b.key == UNASSIGNED))
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.key.cmp(&b.key))
    });
    out
}
