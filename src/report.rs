use std::fmt::{Display, Write};

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::cycle::{
    compute_cycle_display_range, compute_next_payment_date, CycleError, CycleRange,
    DISPLAY_DATE_FORMAT,
};
use crate::models::{ClassSchedule, PaymentCycle, StudentRecord};

pub const UNAVAILABLE: &str = "Information not available";

#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub student_code: String,
    pub full_name: String,
    pub class_name: String,
    pub cycle_label: String,
    pub anchor: Option<NaiveDate>,
    pub cycle_range: Result<CycleRange, CycleError>,
    pub next_payment: Result<NaiveDate, CycleError>,
}

#[derive(Debug)]
pub struct DueList<'a> {
    pub due: Vec<&'a CycleSummary>,
    pub needs_attention: Vec<&'a CycleSummary>,
}

#[derive(Debug, Serialize)]
pub struct Failure {
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ComputeOutput {
    pub cycle: PaymentCycle,
    pub schedule: Vec<String>,
    pub anchor: Option<NaiveDate>,
    pub cycle_range: Option<String>,
    pub next_payment_date: Option<NaiveDate>,
    pub failure: Option<Failure>,
    #[serde(skip)]
    range_result: Result<CycleRange, CycleError>,
    #[serde(skip)]
    next_result: Result<NaiveDate, CycleError>,
}

impl ComputeOutput {
    pub fn render_text(&self) -> String {
        let mut output = String::new();
        let schedule = if self.schedule.is_empty() {
            "(no class days)".to_string()
        } else {
            self.schedule.join(", ")
        };

        let _ = writeln!(output, "Cycle: {} on {}", self.cycle, schedule);
        let _ = writeln!(
            output,
            "Current cycle: {}",
            render_or_unavailable(&self.range_result)
        );
        let _ = writeln!(output, "Next payment: {}", render_date(&self.next_result));
        output
    }
}

impl From<&CycleError> for Failure {
    fn from(err: &CycleError) -> Self {
        Failure {
            reason: err.reason(),
            message: err.to_string(),
        }
    }
}

pub fn render_or_unavailable<T: Display>(result: &Result<T, CycleError>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(err) => format!("{UNAVAILABLE} ({})", err.reason()),
    }
}

pub fn render_date(result: &Result<NaiveDate, CycleError>) -> String {
    let formatted = result
        .as_ref()
        .map(|date| date.format(DISPLAY_DATE_FORMAT).to_string())
        .map_err(Clone::clone);
    render_or_unavailable(&formatted)
}

/// Parses a stored student record and runs both cycle computations on it.
pub fn summarize_student(record: &StudentRecord) -> CycleSummary {
    let anchor = record.cycle_anchor();
    let inputs = record.payment_cycle.parse::<PaymentCycle>().and_then(|cycle| {
        // A stored label we cannot read leaves the class without usable days.
        let schedule = ClassSchedule::from_labels(&record.schedule)
            .map_err(|_| CycleError::InvalidSchedule)?;
        Ok((cycle, schedule))
    });

    let (cycle_range, next_payment) = match inputs {
        Ok((cycle, schedule)) => (
            compute_cycle_display_range(cycle, &schedule, anchor),
            compute_next_payment_date(cycle, &schedule, anchor),
        ),
        Err(err) => (Err(err.clone()), Err(err)),
    };

    CycleSummary {
        student_code: record.student_code.clone(),
        full_name: record.full_name.clone(),
        class_name: record.class_name.clone(),
        cycle_label: record.payment_cycle.clone(),
        anchor,
        cycle_range,
        next_payment,
    }
}

pub fn compute_output(
    cycle: PaymentCycle,
    schedule: &ClassSchedule,
    anchor: Option<NaiveDate>,
) -> ComputeOutput {
    let cycle_range = compute_cycle_display_range(cycle, schedule, anchor);
    let next_payment = compute_next_payment_date(cycle, schedule, anchor);
    let failure = match (&cycle_range, &next_payment) {
        (Err(err), _) | (_, Err(err)) => Some(Failure::from(err)),
        _ => None,
    };

    ComputeOutput {
        cycle,
        schedule: schedule.labels(),
        anchor,
        cycle_range: cycle_range.as_ref().ok().map(|range| range.to_string()),
        next_payment_date: next_payment.as_ref().ok().copied(),
        failure,
        range_result: cycle_range,
        next_result: next_payment,
    }
}

/// Last day of the due window. Windows past the end of the calendar stop
/// at `NaiveDate::MAX`.
pub fn due_horizon(today: NaiveDate, within_days: i64) -> NaiveDate {
    Duration::try_days(within_days.max(0))
        .and_then(|window| today.checked_add_signed(window))
        .unwrap_or(NaiveDate::MAX)
}

/// Students whose next payment falls on or before the due horizon,
/// earliest first, plus those whose date cannot be computed.
pub fn due_within(summaries: &[CycleSummary], today: NaiveDate, within_days: i64) -> DueList<'_> {
    let horizon = due_horizon(today, within_days);
    let mut due = Vec::new();
    let mut needs_attention = Vec::new();

    for summary in summaries {
        match &summary.next_payment {
            Ok(date) if *date <= horizon => due.push(summary),
            Ok(_) => {}
            Err(_) => needs_attention.push(summary),
        }
    }

    due.sort_by_key(|summary| summary.next_payment.as_ref().ok().copied());
    DueList {
        due,
        needs_attention,
    }
}

pub fn due_label(summary: &CycleSummary, today: NaiveDate) -> &'static str {
    match &summary.next_payment {
        Ok(date) if *date < today => "overdue",
        Ok(date) if *date == today => "due today",
        Ok(_) => "due soon",
        Err(_) => "unknown",
    }
}

pub fn render_lookup(summary: &CycleSummary) -> String {
    let mut output = String::new();
    let anchor = summary
        .anchor
        .map(|date| date.format(DISPLAY_DATE_FORMAT).to_string())
        .unwrap_or_else(|| UNAVAILABLE.to_string());

    let _ = writeln!(output, "{} ({})", summary.full_name, summary.student_code);
    let _ = writeln!(output, "Class: {}", summary.class_name);
    let _ = writeln!(output, "Payment cycle: {}", summary.cycle_label);
    let _ = writeln!(output, "Cycle measured from: {anchor}");
    let _ = writeln!(
        output,
        "Current cycle: {}",
        render_or_unavailable(&summary.cycle_range)
    );
    let _ = writeln!(output, "Next payment: {}", render_date(&summary.next_payment));
    output
}

pub fn build_report(
    class_name: Option<&str>,
    today: NaiveDate,
    within_days: i64,
    summaries: &[CycleSummary],
) -> String {
    let due_list = due_within(summaries, today, within_days);

    let mut output = String::new();
    let class_label = class_name.unwrap_or("all classes");

    let _ = writeln!(output, "# Tuition Cycle Report");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        class_label,
        today.format(DISPLAY_DATE_FORMAT)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Cycle Overview");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students enrolled.");
    } else {
        for summary in summaries {
            let _ = writeln!(
                output,
                "- {} ({}, {}, {}): cycle {}; next payment {}",
                summary.full_name,
                summary.student_code,
                summary.class_name,
                summary.cycle_label,
                render_or_unavailable(&summary.cycle_range),
                render_date(&summary.next_payment)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Due Within {within_days} Days");

    if due_list.due.is_empty() {
        let _ = writeln!(output, "No payments due in this window.");
    } else {
        for summary in due_list.due.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} ({})",
                summary.full_name,
                summary.class_name,
                render_date(&summary.next_payment),
                due_label(summary, today)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");

    if due_list.needs_attention.is_empty() {
        let _ = writeln!(output, "Every student has a computable payment date.");
    } else {
        for summary in due_list.needs_attention.iter() {
            if let Err(err) = &summary.next_payment {
                let _ = writeln!(
                    output,
                    "- {} ({}): {} [{}]",
                    summary.full_name,
                    summary.class_name,
                    err,
                    err.reason()
                );
            }
        }
    }

    output
}
