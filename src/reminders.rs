//! Reminder scheduling for confirmed bookings.
//!
//! Three reminders go out per booking, on email and (when available) text:
//! an appointment reminder, an intake-form nudge and a confirm/cancel request.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::{Channel, ReminderJob, ReminderMode};
use crate::notify::Dispatcher;
use crate::outbox::JobQueue;

/// Hours before the appointment at which production reminders fire.
const PRODUCTION_LEAD_HOURS: [i64; 3] = [24, 6, 1];
/// Seconds from now used instead of a production fire time already in the past.
const PAST_DUE_DELAY_SECS: [i64; 3] = [10, 20, 30];
/// Seconds from now at which demo reminders fire.
const DEMO_DELAY_SECS: [i64; 3] = [15, 30, 45];

const DEFAULT_START: (u32, u32) = (10, 0);

/// What the scheduler needs to know about a confirmed booking.
#[derive(Debug, Clone, Copy)]
pub struct ReminderRequest<'a> {
    pub patient_name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub doctor_id: &'a str,
    pub date: &'a str,
    pub start_time: &'a str,
}

pub struct ReminderScheduler {
    mode: ReminderMode,
    queue: Arc<dyn JobQueue>,
    sms_enabled: bool,
    intake_form: Option<PathBuf>,
}

impl ReminderScheduler {
    pub fn new(
        mode: ReminderMode,
        dispatcher: &Dispatcher,
        queue: Arc<dyn JobQueue>,
        intake_form: Option<PathBuf>,
    ) -> Self {
        Self {
            mode,
            queue,
            sms_enabled: dispatcher.sms_configured(),
            intake_form,
        }
    }

    pub fn mode(&self) -> ReminderMode {
        self.mode
    }

    /// Register reminder jobs relative to the local clock. Returns the number
    /// of jobs registered.
    pub fn schedule(&self, req: &ReminderRequest<'_>) -> usize {
        self.schedule_at(req, Local::now().naive_local())
    }

    pub fn schedule_at(&self, req: &ReminderRequest<'_>, now: NaiveDateTime) -> usize {
        let fire_times = compute_fire_times(self.mode, req.date, req.start_time, now);
        let jobs = plan_jobs(req, fire_times, self.sms_enabled, self.intake_form.as_ref());
        let count = jobs.len();
        for job in jobs {
            self.queue.register(job);
        }
        info!(
            mode = self.mode.as_str(),
            jobs = count,
            first = %fire_times[0],
            "scheduled reminders"
        );
        count
    }
}

/// The three reminder fire times for an appointment.
///
/// Production: 24h, 6h and 1h before the appointment, each clamped to a short
/// delay from `now` if it is not in the future. Demo: 15s, 30s and 45s from
/// `now`, ignoring the appointment.
pub fn compute_fire_times(
    mode: ReminderMode,
    date: &str,
    start_time: &str,
    now: NaiveDateTime,
) -> [NaiveDateTime; 3] {
    match mode {
        ReminderMode::Demo => DEMO_DELAY_SECS.map(|secs| now + Duration::seconds(secs)),
        ReminderMode::Production => {
            let appointment = appointment_datetime(date, start_time, now.date());
            let mut out = [now; 3];
            for (i, slot) in out.iter_mut().enumerate() {
                let run = appointment - Duration::hours(PRODUCTION_LEAD_HOURS[i]);
                *slot = if run > now {
                    run
                } else {
                    now + Duration::seconds(PAST_DUE_DELAY_SECS[i])
                };
            }
            out
        }
    }
}

/// Combine a `YYYY-MM-DD` date and a start time into one timestamp. An
/// unparseable date becomes `today`; an unparseable time becomes 10:00.
pub fn appointment_datetime(date: &str, start_time: &str, today: NaiveDate) -> NaiveDateTime {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").unwrap_or_else(|_| {
        warn!(date, "unparseable appointment date; using today");
        today
    });
    let time = parse_start_time(start_time).unwrap_or_else(|| {
        warn!(start_time, "unparseable start time; using 10:00");
        NaiveTime::from_hms_opt(DEFAULT_START.0, DEFAULT_START.1, 0).unwrap_or_default()
    });
    day.and_time(time)
}

/// Reads `HH:MM` from the first whitespace-separated token, ignoring seconds
/// and trailing words such as `AM`.
fn parse_start_time(raw: &str) -> Option<NaiveTime> {
    let token = raw.split_whitespace().next()?;
    let mut parts = token.split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Build the jobs for one booking. Email jobs need an address; text jobs need
/// both a phone number and a configured text transport.
pub fn plan_jobs(
    req: &ReminderRequest<'_>,
    fire_times: [NaiveDateTime; 3],
    sms_enabled: bool,
    intake_form: Option<&PathBuf>,
) -> Vec<ReminderJob> {
    let name = req.patient_name;
    let mut jobs = Vec::with_capacity(6);

    if let Some(email) = req.email.filter(|e| !e.trim().is_empty()) {
        let messages = [
            (
                format!("Reminder: {}", name),
                format!(
                    "Hello {}, this is your reminder for {} at {} with {}",
                    name, req.date, req.start_time, req.doctor_id
                ),
                None,
            ),
            (
                format!("Reminder: Intake form - {}", name),
                format!("Hello {}, please complete the attached intake form.", name),
                intake_form.cloned(),
            ),
            (
                format!("Reminder: Confirm/cancel - {}", name),
                format!("Hello {}, please confirm or cancel your visit.", name),
                None,
            ),
        ];
        for (fire_at, (subject, body, attachment)) in fire_times.iter().zip(messages) {
            jobs.push(ReminderJob {
                fire_at: *fire_at,
                channel: Channel::Email,
                recipient: email.to_string(),
                subject: Some(subject),
                body,
                attachment,
            });
        }
    }

    if let Some(phone) = req.phone.filter(|p| sms_enabled && !p.trim().is_empty()) {
        let bodies = [
            format!(
                "Reminder: Appointment on {} at {} with {}",
                req.date, req.start_time, req.doctor_id
            ),
            "Have you filled the intake form?".to_string(),
            "Please confirm/cancel your appointment.".to_string(),
        ];
        for (fire_at, body) in fire_times.iter().zip(bodies) {
            jobs.push(ReminderJob {
                fire_at: *fire_at,
                channel: Channel::Text,
                recipient: phone.to_string(),
                subject: None,
                body,
                attachment: None,
            });
        }
    }

    jobs
}
