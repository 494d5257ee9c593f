use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use clinic_booker::advisory::{Advisor, PerplexityClient};
use clinic_booker::config;
use clinic_booker::db;
use clinic_booker::links;
use clinic_booker::model::BookingRequest;
use clinic_booker::notify::Dispatcher;
use clinic_booker::outbox::TokioJobQueue;
use clinic_booker::reminders::ReminderScheduler;
use clinic_booker::repository::Repository;
use clinic_booker::workflow::{is_booking_created, BookingOutcome, Engine};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Book one appointment and send confirmations
    Book {
        #[arg(long)]
        name: String,
        /// Date of birth, YYYY-MM-DD
        #[arg(long)]
        dob: String,
        #[arg(long, default_value = "D001")]
        doctor: String,
        /// Appointment date, YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        email: Option<String>,
        /// Phone number in E.164 form, e.g. +918220420788
        #[arg(long)]
        phone: Option<String>,
        /// Keep running until every scheduled reminder has fired
        #[arg(long)]
        wait: bool,
    },
    /// Print an example configuration file
    ConfigExample,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let (request, wait) = match args.command {
        Command::ConfigExample => {
            print!("{}", config::example());
            return Ok(());
        }
        Command::Book {
            name,
            dob,
            doctor,
            date,
            email,
            phone,
            wait,
        } => (
            BookingRequest {
                patient_name: name,
                dob,
                doctor_id: doctor,
                date,
                email,
                phone,
            },
            wait,
        ),
    };

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.default_database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let repo = Arc::new(Repository::load(
        &cfg.data.patients_file,
        &cfg.data.schedule_file,
    )?);
    let advisor: Arc<dyn Advisor> = Arc::new(PerplexityClient::from_config(&cfg.advisory)?);
    let dispatcher = Dispatcher::from_config(&cfg)?;
    let booking_links = links::resolve(&cfg.booking_links).await;
    let intake_form = Some(cfg.data.intake_form.clone());

    let queue = TokioJobQueue::new(dispatcher.clone());
    let reminders = ReminderScheduler::new(
        cfg.app.reminder_mode,
        &dispatcher,
        queue.clone(),
        intake_form.clone(),
    );
    let engine = Engine::new(
        repo,
        pool,
        advisor,
        dispatcher,
        booking_links,
        reminders,
        intake_form,
    );

    let ctx = engine.run(request).await?;
    println!("{}\n", ctx.advisory());

    let result = ctx
        .booking_result()
        .unwrap_or_else(|| "Booking could not be created. Check logs.".to_string());
    if !is_booking_created(&result) {
        bail!("{}", result);
    }
    println!("{}", result);
    if let Some(BookingOutcome::Created(confirmation)) = ctx.outcome() {
        println!("Booking link: {}", confirmation.booking_link);
    }

    if wait {
        info!(pending = queue.pending(), "waiting for reminders to fire");
        for status in queue.drain().await {
            println!("Reminder: {}", status);
        }
    } else if queue.pending() > 0 {
        warn!(
            pending = queue.pending(),
            "exiting; registered reminders will not fire"
        );
    }
    Ok(())
}
