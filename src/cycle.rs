use std::fmt;

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::models::{ClassSchedule, PaymentCycle};

/// Upper bound on the number of calendar days any schedule scan visits.
pub const SCAN_LIMIT_DAYS: usize = 366;

pub const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("no last payment or enrollment date on record")]
    MissingAnchorDate,
    #[error("class has no weekly meeting days configured")]
    InvalidSchedule,
    #[error("only {found} of {needed} class sessions found within {} days", SCAN_LIMIT_DAYS)]
    InsufficientSessionsFound { needed: usize, found: usize },
    #[error("unsupported payment cycle {0:?}")]
    UnsupportedCycleKind(String),
}

impl CycleError {
    /// Stable machine-checkable tag for the failure.
    pub fn reason(&self) -> &'static str {
        match self {
            CycleError::MissingAnchorDate => "missing-anchor-date",
            CycleError::InvalidSchedule => "invalid-schedule",
            CycleError::InsufficientSessionsFound { .. } => "insufficient-sessions-found",
            CycleError::UnsupportedCycleKind(_) => "unsupported-cycle-kind",
        }
    }
}

/// First and last day of a billing cycle, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for CycleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format(DISPLAY_DATE_FORMAT),
            self.end.format(DISPLAY_DATE_FORMAT)
        )
    }
}

fn scheduled_days(schedule: ClassSchedule, start: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take(SCAN_LIMIT_DAYS)
        .filter(move |day| schedule.includes(*day))
}

/// Returns the first class day at or after `from` (strictly after when
/// `inclusive` is false), or `None` when nothing matches within the scan
/// limit.
pub fn find_next_scheduled_day(
    schedule: &ClassSchedule,
    from: NaiveDate,
    inclusive: bool,
) -> Option<NaiveDate> {
    let start = if inclusive { from } else { from.succ_opt()? };
    scheduled_days(*schedule, start).next()
}

/// Counts class days forward from `from` (inclusive) and returns the date of
/// the `n`-th one.
fn nth_scheduled_day(
    schedule: &ClassSchedule,
    from: NaiveDate,
    n: usize,
) -> Result<NaiveDate, CycleError> {
    let mut found = 0;
    for day in scheduled_days(*schedule, from) {
        found += 1;
        if found == n {
            return Ok(day);
        }
    }
    Err(CycleError::InsufficientSessionsFound { needed: n, found })
}

fn checked_inputs(
    schedule: &ClassSchedule,
    anchor: Option<NaiveDate>,
) -> Result<NaiveDate, CycleError> {
    if schedule.is_empty() {
        return Err(CycleError::InvalidSchedule);
    }
    anchor.ok_or(CycleError::MissingAnchorDate)
}

// Only reachable at the far end of the representable calendar.
fn calendar_exhausted() -> CycleError {
    CycleError::InsufficientSessionsFound {
        needed: 1,
        found: 0,
    }
}

/// Last class session of a session-based cycle starting at `anchor`.
fn last_session(
    schedule: &ClassSchedule,
    anchor: NaiveDate,
    sessions: usize,
) -> Result<(NaiveDate, NaiveDate), CycleError> {
    let first = find_next_scheduled_day(schedule, anchor, true).ok_or(
        CycleError::InsufficientSessionsFound {
            needed: sessions,
            found: 0,
        },
    )?;
    let last = nth_scheduled_day(schedule, first, sessions)?;
    Ok((first, last))
}

fn day_after_sessions(
    schedule: &ClassSchedule,
    anchor: NaiveDate,
    sessions: usize,
) -> Result<Option<NaiveDate>, CycleError> {
    let (_, last) = last_session(schedule, anchor, sessions)?;
    Ok(find_next_scheduled_day(schedule, last, false))
}

fn session_range(
    schedule: &ClassSchedule,
    anchor: NaiveDate,
    sessions: usize,
) -> Result<CycleRange, CycleError> {
    let (start, end) = last_session(schedule, anchor, sessions)?;
    Ok(CycleRange { start, end })
}

/// Estimated start of the next payment cycle.
pub fn compute_next_payment_date(
    cycle: PaymentCycle,
    schedule: &ClassSchedule,
    anchor: Option<NaiveDate>,
) -> Result<NaiveDate, CycleError> {
    let anchor = checked_inputs(schedule, anchor)?;

    let next = match cycle {
        PaymentCycle::Monthly => anchor
            .checked_add_months(Months::new(1))
            .and_then(|month_later| find_next_scheduled_day(schedule, month_later, true)),
        PaymentCycle::Sessions8 => day_after_sessions(schedule, anchor, 8)?,
        PaymentCycle::Sessions10 => day_after_sessions(schedule, anchor, 10)?,
        PaymentCycle::PerDay => find_next_scheduled_day(schedule, anchor, false),
    };

    next.ok_or_else(calendar_exhausted)
}

/// Current cycle's first and last day, for receipts and summaries.
pub fn compute_cycle_display_range(
    cycle: PaymentCycle,
    schedule: &ClassSchedule,
    anchor: Option<NaiveDate>,
) -> Result<CycleRange, CycleError> {
    let anchor = checked_inputs(schedule, anchor)?;

    match cycle {
        PaymentCycle::Monthly => anchor
            .checked_add_months(Months::new(1))
            .and_then(|month_later| month_later.pred_opt())
            .map(|end| CycleRange { start: anchor, end })
            .ok_or_else(calendar_exhausted),
        PaymentCycle::Sessions8 => session_range(schedule, anchor, 8),
        PaymentCycle::Sessions10 => session_range(schedule, anchor, 10),
        PaymentCycle::PerDay => Ok(CycleRange {
            start: anchor,
            end: anchor,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassDay;
    use chrono::Duration;
    use proptest::prelude::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn schedule(days: &[ClassDay]) -> ClassSchedule {
        days.iter().copied().collect()
    }

    #[test]
    fn monthly_snaps_forward_to_class_day() {
        let mwf = schedule(&[ClassDay::Monday, ClassDay::Wednesday, ClassDay::Friday]);
        let anchor = Some(date(2024, 1, 15));
        let next = compute_next_payment_date(PaymentCycle::Monthly, &mwf, anchor);
        assert_eq!(next, Ok(date(2024, 2, 16)));

        let range = compute_cycle_display_range(PaymentCycle::Monthly, &mwf, anchor).unwrap();
        assert_eq!(range.end, date(2024, 2, 14));
        assert_eq!(range.to_string(), "15/01/2024 - 14/02/2024");
    }

    #[test]
    fn monthly_keeps_month_anchor_when_it_is_a_class_day() {
        let thursday = schedule(&[ClassDay::Thursday]);
        let anchor = Some(date(2024, 1, 15));
        let next = compute_next_payment_date(PaymentCycle::Monthly, &thursday, anchor);
        assert_eq!(next, Ok(date(2024, 2, 15)));
    }

    #[test]
    fn monthly_clamps_to_end_of_short_month() {
        let thursday = schedule(&[ClassDay::Thursday]);
        let anchor = Some(date(2024, 1, 31));
        assert_eq!(
            compute_next_payment_date(PaymentCycle::Monthly, &thursday, anchor),
            Ok(date(2024, 2, 29))
        );
        let range = compute_cycle_display_range(PaymentCycle::Monthly, &thursday, anchor).unwrap();
        assert_eq!(range.end, date(2024, 2, 28));
    }

    #[test]
    fn eight_sessions_count_the_anchor_day() {
        let tue_thu = schedule(&[ClassDay::Tuesday, ClassDay::Thursday]);
        let anchor = Some(date(2024, 1, 2));

        let range = compute_cycle_display_range(PaymentCycle::Sessions8, &tue_thu, anchor).unwrap();
        assert_eq!(range.start, date(2024, 1, 2));
        assert_eq!(range.end, date(2024, 1, 25));

        let next = compute_next_payment_date(PaymentCycle::Sessions8, &tue_thu, anchor);
        assert_eq!(next, Ok(date(2024, 1, 30)));
    }

    #[test]
    fn sessions_start_on_first_class_day_after_unscheduled_anchor() {
        let tue_thu = schedule(&[ClassDay::Tuesday, ClassDay::Thursday]);
        // 2024-01-03 is a Wednesday.
        let range =
            compute_cycle_display_range(PaymentCycle::Sessions8, &tue_thu, Some(date(2024, 1, 3)))
                .unwrap();
        assert_eq!(range.start, date(2024, 1, 4));
        assert_eq!(range.end, date(2024, 1, 30));
    }

    #[test]
    fn ten_weekly_sessions_span_nine_weeks() {
        let monday = schedule(&[ClassDay::Monday]);
        let anchor = date(2024, 1, 1);

        let range =
            compute_cycle_display_range(PaymentCycle::Sessions10, &monday, Some(anchor)).unwrap();
        assert_eq!(range.start, anchor);
        assert_eq!(range.end, anchor + Duration::weeks(9));

        let next = compute_next_payment_date(PaymentCycle::Sessions10, &monday, Some(anchor));
        assert_eq!(next, Ok(anchor + Duration::weeks(10)));
    }

    #[test]
    fn per_day_moves_to_next_meeting() {
        let saturday = schedule(&[ClassDay::Saturday]);
        let anchor = Some(date(2024, 3, 2));
        assert_eq!(
            compute_next_payment_date(PaymentCycle::PerDay, &saturday, anchor),
            Ok(date(2024, 3, 9))
        );
        let range = compute_cycle_display_range(PaymentCycle::PerDay, &saturday, anchor).unwrap();
        assert_eq!(range.start, date(2024, 3, 2));
        assert_eq!(range.end, date(2024, 3, 2));
    }

    #[test]
    fn empty_schedule_is_reported_for_every_cycle() {
        let empty = ClassSchedule::empty();
        assert_eq!(find_next_scheduled_day(&empty, date(2024, 1, 1), true), None);
        for cycle in PaymentCycle::ALL {
            for anchor in [Some(date(2024, 1, 1)), None] {
                assert_eq!(
                    compute_next_payment_date(cycle, &empty, anchor),
                    Err(CycleError::InvalidSchedule)
                );
                assert_eq!(
                    compute_cycle_display_range(cycle, &empty, anchor),
                    Err(CycleError::InvalidSchedule)
                );
            }
        }
    }

    #[test]
    fn missing_anchor_is_reported() {
        let monday = schedule(&[ClassDay::Monday]);
        for cycle in PaymentCycle::ALL {
            let err = compute_next_payment_date(cycle, &monday, None).unwrap_err();
            assert_eq!(err, CycleError::MissingAnchorDate);
            assert_eq!(err.reason(), "missing-anchor-date");
        }
    }

    #[test]
    fn session_scan_stops_at_limit() {
        let monday = schedule(&[ClassDay::Monday]);
        let anchor = date(2024, 1, 1);
        assert_eq!(nth_scheduled_day(&monday, anchor, 53), Ok(anchor + Duration::weeks(52)));
        assert_eq!(
            nth_scheduled_day(&monday, anchor, 54),
            Err(CycleError::InsufficientSessionsFound {
                needed: 54,
                found: 53
            })
        );
    }

    #[test]
    fn end_of_calendar_does_not_panic() {
        let every_day: ClassSchedule = ClassDay::ALL.into_iter().collect();
        for cycle in PaymentCycle::ALL {
            let next = compute_next_payment_date(cycle, &every_day, Some(NaiveDate::MAX));
            assert_eq!(next.unwrap_err().reason(), "insufficient-sessions-found");
        }
    }

    #[test]
    fn failure_reasons_are_stable() {
        assert_eq!(CycleError::InvalidSchedule.reason(), "invalid-schedule");
        assert_eq!(
            CycleError::UnsupportedCycleKind("weekly".into()).reason(),
            "unsupported-cycle-kind"
        );
        assert_eq!(
            CycleError::InsufficientSessionsFound { needed: 8, found: 3 }.to_string(),
            "only 3 of 8 class sessions found within 366 days"
        );
    }

    fn any_schedule() -> impl Strategy<Value = ClassSchedule> {
        (1u8..128).prop_map(|mask| {
            ClassDay::ALL
                .into_iter()
                .filter(|day| mask & (1 << day.index()) != 0)
                .collect()
        })
    }

    fn any_date() -> impl Strategy<Value = NaiveDate> {
        (1990i32..2100, 1u32..=12, 1u32..=31).prop_map(|(year, month, day)| {
            NaiveDate::from_ymd_opt(year, month, day)
                .or_else(|| NaiveDate::from_ymd_opt(year, month, 28))
                .unwrap()
        })
    }

    fn any_cycle() -> impl Strategy<Value = PaymentCycle> {
        prop::sample::select(PaymentCycle::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn found_day_is_scheduled_and_forward(
            schedule in any_schedule(),
            from in any_date(),
            inclusive in any::<bool>(),
        ) {
            let day = find_next_scheduled_day(&schedule, from, inclusive).unwrap();
            prop_assert!(schedule.includes(day));
            if inclusive {
                prop_assert!(day >= from);
            } else {
                prop_assert!(day > from);
            }
            prop_assert!(day - from <= Duration::days(7));
        }

        #[test]
        fn results_are_deterministic(
            cycle in any_cycle(),
            schedule in any_schedule(),
            anchor in any_date(),
        ) {
            prop_assert_eq!(
                compute_next_payment_date(cycle, &schedule, Some(anchor)),
                compute_next_payment_date(cycle, &schedule, Some(anchor))
            );
            prop_assert_eq!(
                compute_cycle_display_range(cycle, &schedule, Some(anchor)),
                compute_cycle_display_range(cycle, &schedule, Some(anchor))
            );
        }

        #[test]
        fn session_cycles_cover_exactly_n_classes(
            schedule in any_schedule(),
            anchor in any_date(),
            (cycle, sessions) in prop::sample::select(vec![
                (PaymentCycle::Sessions8, 8),
                (PaymentCycle::Sessions10, 10),
            ]),
        ) {
            let range = compute_cycle_display_range(cycle, &schedule, Some(anchor)).unwrap();
            let counted = range
                .start
                .iter_days()
                .take_while(|day| *day <= range.end)
                .filter(|day| schedule.includes(*day))
                .count();
            prop_assert_eq!(counted, sessions);
            prop_assert!(schedule.includes(range.start));
            prop_assert!(schedule.includes(range.end));

            let next = compute_next_payment_date(cycle, &schedule, Some(anchor)).unwrap();
            prop_assert_eq!(find_next_scheduled_day(&schedule, range.end, false), Some(next));
        }

        #[test]
        fn next_payment_is_a_class_day_after_anchor(
            cycle in any_cycle(),
            schedule in any_schedule(),
            anchor in any_date(),
        ) {
            let next = compute_next_payment_date(cycle, &schedule, Some(anchor)).unwrap();
            prop_assert!(schedule.includes(next));
            prop_assert!(next > anchor);
        }
    }
}
