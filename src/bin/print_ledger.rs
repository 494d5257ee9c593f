use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use clinic_booker::config;
use clinic_booker::db;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print every appointment in the ledger")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print rows as JSON lines instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.default_database_url());

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let entries = db::list_appointments(&pool).await?;
    if args.json {
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    println!(
        "{:>4}  {:<20} {:<10} {:<6} {:<10} {:<6} {:<9} {}",
        "id", "patient", "dob", "doctor", "date", "time", "status", "created"
    );
    for entry in &entries {
        let a = &entry.appointment;
        println!(
            "{:>4}  {:<20} {:<10} {:<6} {:<10} {:<6} {:<9} {}",
            entry.id,
            a.patient_name,
            a.dob,
            a.doctor_id,
            a.date,
            a.start_time,
            if a.is_new_patient { "new" } else { "returning" },
            entry.created_at
        );
    }
    println!("{} appointment(s)", entries.len());
    Ok(())
}
