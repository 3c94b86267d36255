use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::PgPool;

mod cycle;
mod db;
mod models;
mod report;

use models::{ClassSchedule, PaymentCycle};

#[derive(Parser)]
#[command(name = "tuition-cycle-desk")]
#[command(about = "Tuition billing cycles and payment due dates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import a student roster from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a tuition payment receipt
    Pay {
        #[arg(long)]
        code: String,
        /// Payment date, defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Amount in minor currency units
        #[arg(long, default_value_t = 0)]
        amount: i64,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Show one student's current cycle and next payment date
    Lookup {
        #[arg(long)]
        code: String,
    },
    /// List students whose next payment is due soon
    Due {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value_t = 7)]
        within_days: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value_t = 7)]
        within_days: i64,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Compute a cycle directly, without a database
    Compute {
        /// monthly, 8-sessions, 10-sessions or per-day
        #[arg(long)]
        cycle: PaymentCycle,
        /// Comma-separated class days, e.g. "Mon,Wed,Fri" or "1,3,5"
        #[arg(long, default_value = "")]
        schedule: ClassSchedule,
        /// Last payment or enrollment date
        #[arg(long)]
        anchor: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    db::connect(&database_url).await
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compute {
            cycle,
            schedule,
            anchor,
            json,
        } => {
            let output = report::compute_output(cycle, &schedule, anchor);
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print!("{}", output.render_text());
                if let Some(failure) = &output.failure {
                    eprintln!("warning: {} ({})", failure.message, failure.reason);
                }
            }
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let imported = db::import_csv(&pool, &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::Pay {
            code,
            date,
            amount,
            note,
        } => {
            let pool = connect().await?;
            let paid_on = date.unwrap_or_else(today);
            let receipt = db::record_payment(&pool, &code, paid_on, amount, &note).await?;
            println!(
                "Recorded receipt {} for {} on {}.",
                receipt.receipt_id, code, receipt.paid_on
            );
            if let Some(student) = db::fetch_student_by_code(&pool, &code).await? {
                print!("{}", report::render_lookup(&report::summarize_student(&student)));
            }
        }
        Commands::Lookup { code } => {
            let pool = connect().await?;
            match db::fetch_student_by_code(&pool, &code).await? {
                Some(student) => {
                    print!("{}", report::render_lookup(&report::summarize_student(&student)));
                }
                None => println!("No student with code {code}."),
            }
        }
        Commands::Due {
            class,
            within_days,
            limit,
            as_of,
        } => {
            let pool = connect().await?;
            let today = as_of.unwrap_or_else(today);
            let students = db::fetch_students(&pool, class.as_deref()).await?;
            let summaries: Vec<_> = students.iter().map(report::summarize_student).collect();
            let due_list = report::due_within(&summaries, today, within_days);

            if due_list.due.is_empty() {
                println!("No payments due in the next {within_days} days.");
            } else {
                println!("Payments due by {}:", report::due_horizon(today, within_days));
                for summary in due_list.due.iter().take(limit) {
                    println!(
                        "- {} ({}, {}) {} [{}]",
                        summary.full_name,
                        summary.student_code,
                        summary.class_name,
                        report::render_date(&summary.next_payment),
                        report::due_label(summary, today)
                    );
                }
            }

            for summary in due_list.needs_attention.iter() {
                eprintln!(
                    "warning: {} ({}): {}",
                    summary.full_name,
                    summary.student_code,
                    report::render_date(&summary.next_payment)
                );
            }
        }
        Commands::Report {
            class,
            within_days,
            as_of,
            out,
        } => {
            let pool = connect().await?;
            let today = as_of.unwrap_or_else(today);
            let students = db::fetch_students(&pool, class.as_deref()).await?;
            let summaries: Vec<_> = students.iter().map(report::summarize_student).collect();
            let report = report::build_report(class.as_deref(), today, within_days, &summaries);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
