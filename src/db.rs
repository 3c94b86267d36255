use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::{ClassSchedule, PaymentCycle, PaymentReceipt, StudentRecord};

const STUDENT_COLUMNS: &str = "SELECT st.student_code, st.full_name, \
     c.name as class_name, c.schedule, st.payment_cycle, st.enrollment_date, \
     st.last_payment_date \
     FROM tuition_cycles.students st \
     JOIN tuition_cycles.classes c ON c.id = st.class_id";

// Both anchor writes keep the later date, so the cycle anchor never moves backwards.
const UPSERT_STUDENT_SQL: &str = r#"
    INSERT INTO tuition_cycles.students
    (id, student_code, full_name, class_id, payment_cycle, enrollment_date, last_payment_date)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (student_code) DO UPDATE
    SET full_name = EXCLUDED.full_name,
        class_id = EXCLUDED.class_id,
        payment_cycle = EXCLUDED.payment_cycle,
        enrollment_date = EXCLUDED.enrollment_date,
        last_payment_date = GREATEST(
            EXCLUDED.last_payment_date,
            tuition_cycles.students.last_payment_date
        )
    "#;

const ADVANCE_ANCHOR_SQL: &str = r#"
    UPDATE tuition_cycles.students
    SET last_payment_date = GREATEST(last_payment_date, $2)
    WHERE student_code = $1
    RETURNING id
    "#;

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_class(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    schedule: &ClassSchedule,
) -> anyhow::Result<Uuid> {
    let class_id: Uuid = sqlx::query(
        r#"
        INSERT INTO tuition_cycles.classes (id, name, schedule)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE
        SET schedule = EXCLUDED.schedule
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(schedule.labels())
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("failed to save class {name}"))?
    .get("id");

    Ok(class_id)
}

async fn upsert_student(
    tx: &mut Transaction<'_, Postgres>,
    class_id: Uuid,
    student_code: &str,
    full_name: &str,
    cycle: PaymentCycle,
    enrollment_date: Option<NaiveDate>,
    last_payment_date: Option<NaiveDate>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(UPSERT_STUDENT_SQL)
        .bind(Uuid::new_v4())
        .bind(student_code)
        .bind(full_name)
        .bind(class_id)
        .bind(cycle.label())
        .bind(enrollment_date)
        .bind(last_payment_date)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to save student {student_code}"))?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let classes = vec![
        ("Math 9A", "Monday,Wednesday,Friday"),
        ("English 6B", "Tuesday,Thursday"),
        ("Weekend Physics", "Saturday"),
    ];

    let students = vec![
        (
            "HS001",
            "Linh Tran",
            "Math 9A",
            PaymentCycle::Monthly,
            NaiveDate::from_ymd_opt(2025, 9, 8).context("invalid date")?,
            NaiveDate::from_ymd_opt(2026, 9, 14),
        ),
        (
            "HS002",
            "Minh Nguyen",
            "English 6B",
            PaymentCycle::Sessions8,
            NaiveDate::from_ymd_opt(2026, 9, 1).context("invalid date")?,
            None,
        ),
        (
            "HS003",
            "An Pham",
            "English 6B",
            PaymentCycle::Sessions10,
            NaiveDate::from_ymd_opt(2026, 8, 4).context("invalid date")?,
            NaiveDate::from_ymd_opt(2026, 9, 8),
        ),
        (
            "HS004",
            "Bao Le",
            "Weekend Physics",
            PaymentCycle::PerDay,
            NaiveDate::from_ymd_opt(2026, 10, 3).context("invalid date")?,
            NaiveDate::from_ymd_opt(2026, 10, 10),
        ),
    ];

    let mut tx = pool.begin().await?;
    let mut class_ids = std::collections::HashMap::new();

    for (name, schedule) in classes {
        let schedule: ClassSchedule = schedule.parse()?;
        let class_id = upsert_class(&mut tx, name, &schedule).await?;
        class_ids.insert(name, class_id);
    }

    for (code, name, class_name, cycle, enrolled, last_paid) in students {
        let class_id = *class_ids
            .get(class_name)
            .with_context(|| format!("seed class {class_name} missing"))?;
        upsert_student(&mut tx, class_id, code, name, cycle, Some(enrolled), last_paid).await?;
    }

    tx.commit().await?;
    Ok(())
}

fn student_from_row(row: &PgRow) -> StudentRecord {
    StudentRecord {
        student_code: row.get("student_code"),
        full_name: row.get("full_name"),
        class_name: row.get("class_name"),
        schedule: row.get("schedule"),
        payment_cycle: row.get("payment_cycle"),
        enrollment_date: row.get("enrollment_date"),
        last_payment_date: row.get("last_payment_date"),
    }
}

pub async fn fetch_students(
    pool: &PgPool,
    class_name: Option<&str>,
) -> anyhow::Result<Vec<StudentRecord>> {
    let mut query = String::from(STUDENT_COLUMNS);

    if class_name.is_some() {
        query.push_str(" WHERE c.name = $1");
    }
    query.push_str(" ORDER BY c.name, st.full_name");

    let mut rows = sqlx::query(&query);

    if let Some(value) = class_name {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    Ok(records.iter().map(student_from_row).collect())
}

pub async fn fetch_student_by_code(
    pool: &PgPool,
    student_code: &str,
) -> anyhow::Result<Option<StudentRecord>> {
    let query = format!("{STUDENT_COLUMNS} WHERE st.student_code = $1");
    let row = sqlx::query(&query)
        .bind(student_code)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(student_from_row))
}

/// Stores a receipt and moves the student's cycle anchor forward to it.
/// A back-dated receipt never moves the anchor backwards.
pub async fn record_payment(
    pool: &PgPool,
    student_code: &str,
    paid_on: NaiveDate,
    amount: i64,
    note: &str,
) -> anyhow::Result<PaymentReceipt> {
    let mut tx = pool.begin().await?;

    let student_id: Uuid = sqlx::query(ADVANCE_ANCHOR_SQL)
        .bind(student_code)
        .bind(paid_on)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| format!("no student with code {student_code}"))?
        .get("id");

    let receipt = PaymentReceipt {
        receipt_id: Uuid::new_v4(),
        student_id,
        paid_on,
        amount,
        note: note.to_string(),
    };

    sqlx::query(
        r#"
        INSERT INTO tuition_cycles.payments (id, student_id, paid_on, amount, note)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(receipt.receipt_id)
    .bind(receipt.student_id)
    .bind(receipt.paid_on)
    .bind(receipt.amount)
    .bind(&receipt.note)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(receipt)
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    student_code: String,
    full_name: String,
    class_name: String,
    schedule: String,
    payment_cycle: String,
    enrollment_date: Option<NaiveDate>,
    last_payment_date: Option<NaiveDate>,
}

#[derive(Debug)]
struct RosterEntry {
    student_code: String,
    full_name: String,
    class_name: String,
    schedule: ClassSchedule,
    cycle: PaymentCycle,
    enrollment_date: Option<NaiveDate>,
    last_payment_date: Option<NaiveDate>,
}

/// Validates one roster row. Schedules may separate days with `,` or `;`.
fn parse_row(row: CsvRow) -> anyhow::Result<RosterEntry> {
    let schedule: ClassSchedule = row
        .schedule
        .replace(';', ",")
        .parse()
        .with_context(|| format!("bad schedule for student {}", row.student_code))?;
    let cycle: PaymentCycle = row
        .payment_cycle
        .parse()
        .with_context(|| format!("bad payment cycle for student {}", row.student_code))?;

    Ok(RosterEntry {
        student_code: row.student_code,
        full_name: row.full_name,
        class_name: row.class_name,
        schedule,
        cycle,
        enrollment_date: row.enrollment_date,
        last_payment_date: row.last_payment_date,
    })
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut tx = pool.begin().await?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let entry = parse_row(result?)?;

        let class_id = upsert_class(&mut tx, &entry.class_name, &entry.schedule).await?;
        if upsert_student(
            &mut tx,
            class_id,
            &entry.student_code,
            &entry.full_name,
            entry.cycle,
            entry.enrollment_date,
            entry.last_payment_date,
        )
        .await?
        {
            imported += 1;
        }
    }

    tx.commit().await?;
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassDay;

    const HEADER: &str = "student_code,full_name,class_name,schedule,payment_cycle,\
                          enrollment_date,last_payment_date\n";

    fn read_rows(data: &str) -> Vec<anyhow::Result<RosterEntry>> {
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        reader
            .deserialize::<CsvRow>()
            .map(|row| parse_row(row?))
            .collect()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn demo_roster_parses() {
        let entries: Vec<RosterEntry> = read_rows(include_str!("../demos/students.csv"))
            .into_iter()
            .collect::<anyhow::Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 4);

        let math = &entries[0];
        assert_eq!(math.student_code, "HS101");
        assert_eq!(math.cycle, PaymentCycle::Monthly);
        let days: Vec<ClassDay> = math.schedule.days().collect();
        assert_eq!(days, vec![ClassDay::Monday, ClassDay::Wednesday, ClassDay::Friday]);
        assert_eq!(math.last_payment_date, Some(date(2026, 10, 5)));

        let english = &entries[1];
        assert_eq!(english.cycle, PaymentCycle::Sessions8);
        let days: Vec<ClassDay> = english.schedule.days().collect();
        assert_eq!(days, vec![ClassDay::Tuesday, ClassDay::Thursday]);
        assert_eq!(english.enrollment_date, Some(date(2026, 9, 1)));
        assert_eq!(english.last_payment_date, None);

        assert_eq!(entries[2].cycle, PaymentCycle::Sessions10);
        assert_eq!(entries[3].cycle, PaymentCycle::PerDay);
        assert!(entries[3].schedule.contains(ClassDay::Saturday));
    }

    #[test]
    fn unknown_weekday_is_rejected() {
        let data = format!("{HEADER}HS201,Lan Ho,Art 3,Mon;Someday,monthly,2026-09-01,\n");
        let rows = read_rows(&data);
        let err = rows[0].as_ref().unwrap_err();
        assert!(err.to_string().contains("bad schedule for student HS201"));
    }

    #[test]
    fn unknown_cycle_is_rejected() {
        let data = format!("{HEADER}HS202,Lan Ho,Art 3,Sat,weekly,2026-09-01,\n");
        let rows = read_rows(&data);
        let err = rows[0].as_ref().unwrap_err();
        assert!(err.to_string().contains("bad payment cycle for student HS202"));
    }

    #[test]
    fn anchor_writes_never_move_backwards() {
        assert!(UPSERT_STUDENT_SQL.contains("last_payment_date = GREATEST("));
        assert!(!UPSERT_STUDENT_SQL.contains("COALESCE"));
        assert!(ADVANCE_ANCHOR_SQL.contains("GREATEST(last_payment_date, $2)"));
    }

    #[test]
    fn blank_dates_become_none() {
        let data = format!("{HEADER}HS203,Lan Ho,Art 3,\"Sat,Sun\",per-day,,\n");
        let rows = read_rows(&data);
        let entry = rows[0].as_ref().unwrap();
        assert_eq!(entry.enrollment_date, None);
        assert_eq!(entry.last_payment_date, None);
        assert!(entry.schedule.contains(ClassDay::Sunday));
    }
}
