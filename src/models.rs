use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use uuid::Uuid;

use crate::cycle::CycleError;

/// Day of the week a class meets, numbered Sunday = 0 through Saturday = 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ClassDay {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: {label:?}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub label: String,
}

impl ClassDay {
    pub const ALL: [ClassDay; 7] = [
        ClassDay::Sunday,
        ClassDay::Monday,
        ClassDay::Tuesday,
        ClassDay::Wednesday,
        ClassDay::Thursday,
        ClassDay::Friday,
        ClassDay::Saturday,
    ];

    pub fn index(self) -> u8 {
        match self {
            ClassDay::Sunday => 0,
            ClassDay::Monday => 1,
            ClassDay::Tuesday => 2,
            ClassDay::Wednesday => 3,
            ClassDay::Thursday => 4,
            ClassDay::Friday => 5,
            ClassDay::Saturday => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<ClassDay> {
        ClassDay::ALL.get(usize::from(index)).copied()
    }

    pub fn of(date: NaiveDate) -> ClassDay {
        ClassDay::from(date.weekday())
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassDay::Sunday => "Sunday",
            ClassDay::Monday => "Monday",
            ClassDay::Tuesday => "Tuesday",
            ClassDay::Wednesday => "Wednesday",
            ClassDay::Thursday => "Thursday",
            ClassDay::Friday => "Friday",
            ClassDay::Saturday => "Saturday",
        }
    }
}

impl From<Weekday> for ClassDay {
    fn from(weekday: Weekday) -> Self {
        // chrono counts from Monday; the class calendar counts from Sunday.
        let index = weekday.num_days_from_sunday() as usize;
        ClassDay::ALL[index]
    }
}

impl FromStr for ClassDay {
    type Err = ParseLabelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            if let Some(day) = ClassDay::from_index(index) {
                return Ok(day);
            }
        }

        ClassDay::ALL
            .into_iter()
            .find(|day| {
                let label = day.label();
                trimmed.eq_ignore_ascii_case(label) || trimmed.eq_ignore_ascii_case(&label[..3])
            })
            .ok_or_else(|| ParseLabelError {
                kind: "weekday",
                label: value.to_string(),
            })
    }
}

impl fmt::Display for ClassDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The set of weekdays a class meets on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ClassSchedule {
    mask: u8,
}

impl ClassSchedule {
    pub fn empty() -> Self {
        ClassSchedule::default()
    }

    pub fn with(mut self, day: ClassDay) -> Self {
        self.mask |= 1 << day.index();
        self
    }

    pub fn contains(&self, day: ClassDay) -> bool {
        self.mask & (1 << day.index()) != 0
    }

    pub fn includes(&self, date: NaiveDate) -> bool {
        self.contains(ClassDay::of(date))
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    pub fn days(&self) -> impl Iterator<Item = ClassDay> + '_ {
        ClassDay::ALL.into_iter().filter(|day| self.contains(*day))
    }

    /// Parses stored labels, reporting any unknown label.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self, ParseLabelError> {
        labels
            .iter()
            .map(|label| label.as_ref())
            .filter(|label| !label.trim().is_empty())
            .try_fold(ClassSchedule::empty(), |schedule, label| {
                Ok(schedule.with(label.parse()?))
            })
    }

    pub fn labels(&self) -> Vec<String> {
        self.days().map(|day| day.label().to_string()).collect()
    }
}

impl FromIterator<ClassDay> for ClassSchedule {
    fn from_iter<I: IntoIterator<Item = ClassDay>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ClassSchedule::empty(), |schedule, day| schedule.with(day))
    }
}

impl FromStr for ClassSchedule {
    type Err = ParseLabelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let labels: Vec<&str> = value.split(',').collect();
        ClassSchedule::from_labels(&labels)
    }
}

impl fmt::Display for ClassSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(no class days)");
        }
        let labels = self.labels();
        f.write_str(&labels.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "&'static str")]
pub enum PaymentCycle {
    Monthly,
    Sessions8,
    Sessions10,
    PerDay,
}

impl PaymentCycle {
    pub const ALL: [PaymentCycle; 4] = [
        PaymentCycle::Monthly,
        PaymentCycle::Sessions8,
        PaymentCycle::Sessions10,
        PaymentCycle::PerDay,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PaymentCycle::Monthly => "monthly",
            PaymentCycle::Sessions8 => "8-sessions",
            PaymentCycle::Sessions10 => "10-sessions",
            PaymentCycle::PerDay => "per-day",
        }
    }
}

impl From<PaymentCycle> for &'static str {
    fn from(cycle: PaymentCycle) -> Self {
        cycle.label()
    }
}

impl FromStr for PaymentCycle {
    type Err = CycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        PaymentCycle::ALL
            .into_iter()
            .find(|cycle| trimmed.eq_ignore_ascii_case(cycle.label()))
            .ok_or_else(|| CycleError::UnsupportedCycleKind(value.to_string()))
    }
}

impl fmt::Display for PaymentCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub student_code: String,
    pub full_name: String,
    pub class_name: String,
    pub schedule: Vec<String>,
    pub payment_cycle: String,
    pub enrollment_date: Option<NaiveDate>,
    pub last_payment_date: Option<NaiveDate>,
}

impl StudentRecord {
    /// The date the current cycle is measured from.
    pub fn cycle_anchor(&self) -> Option<NaiveDate> {
        self.last_payment_date.or(self.enrollment_date)
    }
}

#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub receipt_id: Uuid,
    pub student_id: Uuid,
    pub paid_on: NaiveDate,
    pub amount: i64,
    pub note: String,
}
