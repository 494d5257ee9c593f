//! Booking pipeline: validate → recommend → confirm.
//!
//! Each stage reads an immutable [`BookingContext`] and returns a
//! [`StageUpdate`]; the engine merges updates between stages. The stage order
//! is fixed and every stage always runs. Only the confirm stage has side
//! effects (ledger write, notifications, reminders).

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::advisory::Advisor;
use crate::db::{self, Pool};
use crate::links::BookingLinks;
use crate::model::{Appointment, AvailabilitySlot, BookingRequest, Channel, DeliveryStatus};
use crate::notify::Dispatcher;
use crate::reminders::{ReminderRequest, ReminderScheduler};
use crate::repository::Repository;

pub const NO_SLOT_RESULT: &str = "no slot available; booking not created";
pub const BOOKING_CREATED_PREFIX: &str = "Booking created";

const VALIDATE_PLACEHOLDER: &str = "[advisory not configured, skipping validation]";
const RECOMMEND_PLACEHOLDER: &str = "[no advisory]";
const NO_SLOT_TEXT: &str = "No slot available";

/// Callers branch on this prefix to tell a created booking from a failure.
pub fn is_booking_created(result: &str) -> bool {
    result
        .to_lowercase()
        .starts_with(&BOOKING_CREATED_PREFIX.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Recommend,
    Confirm,
}

impl Stage {
    pub const PIPELINE: [Stage; 3] = [Stage::Validate, Stage::Recommend, Stage::Confirm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Recommend => "recommend",
            Stage::Confirm => "confirm",
        }
    }
}

/// State threaded through the pipeline. Fields are only changed by merging a
/// [`StageUpdate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingContext {
    request: BookingRequest,
    advisory: String,
    recommended_slot: Option<AvailabilitySlot>,
    new_patient: Option<bool>,
    outcome: Option<BookingOutcome>,
}

impl BookingContext {
    pub fn new(request: BookingRequest) -> Self {
        Self {
            request: request.normalized(),
            advisory: String::new(),
            recommended_slot: None,
            new_patient: None,
            outcome: None,
        }
    }

    pub fn request(&self) -> &BookingRequest {
        &self.request
    }

    /// Accumulated advisory text from every stage.
    pub fn advisory(&self) -> &str {
        &self.advisory
    }

    pub fn recommended_slot(&self) -> Option<&AvailabilitySlot> {
        self.recommended_slot.as_ref()
    }

    /// New-vs-returning status as determined by the recommend stage.
    pub fn new_patient(&self) -> Option<bool> {
        self.new_patient
    }

    pub fn outcome(&self) -> Option<&BookingOutcome> {
        self.outcome.as_ref()
    }

    /// Human-readable booking result; `None` until confirm has run.
    pub fn booking_result(&self) -> Option<String> {
        self.outcome.as_ref().map(BookingOutcome::summary)
    }

    /// Merge a stage's update. Advisory text is appended, everything else is
    /// replaced when present.
    pub fn merge(mut self, update: StageUpdate) -> Self {
        if let Some(text) = update.advisory {
            if self.advisory.is_empty() {
                self.advisory = text;
            } else {
                self.advisory.push_str("\n\n");
                self.advisory.push_str(&text);
            }
        }
        if let Some(slot) = update.recommended_slot {
            self.recommended_slot = slot;
        }
        if let Some(is_new) = update.new_patient {
            self.new_patient = Some(is_new);
        }
        if let Some(outcome) = update.outcome {
            self.outcome = Some(outcome);
        }
        self
    }
}

/// Partial update returned by a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageUpdate {
    pub advisory: Option<String>,
    /// `Some(None)` records an explicit "no slot" recommendation.
    pub recommended_slot: Option<Option<AvailabilitySlot>>,
    pub new_patient: Option<bool>,
    pub outcome: Option<BookingOutcome>,
}

/// Terminal result of the confirm stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Created(Confirmation),
    NoSlot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub ledger_id: i64,
    pub appointment: Appointment,
    pub email: DeliveryStatus,
    pub text: DeliveryStatus,
    pub booking_link: String,
    pub reminders_scheduled: usize,
}

impl BookingOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, BookingOutcome::Created(_))
    }

    pub fn summary(&self) -> String {
        match self {
            BookingOutcome::NoSlot => NO_SLOT_RESULT.to_string(),
            BookingOutcome::Created(c) => format!(
                "{} (ledger #{}). Email: {}. SMS: {}. Link: {}",
                BOOKING_CREATED_PREFIX, c.ledger_id, c.email, c.text, c.booking_link
            ),
        }
    }
}

/// Runs booking requests through the pipeline. All collaborators are injected.
pub struct Engine {
    repo: Arc<Repository>,
    ledger: Pool,
    advisor: Arc<dyn Advisor>,
    dispatcher: Dispatcher,
    links: BookingLinks,
    reminders: ReminderScheduler,
    intake_form: Option<PathBuf>,
}

impl Engine {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Pool,
        advisor: Arc<dyn Advisor>,
        dispatcher: Dispatcher,
        links: BookingLinks,
        reminders: ReminderScheduler,
        intake_form: Option<PathBuf>,
    ) -> Self {
        Self {
            repo,
            ledger,
            advisor,
            dispatcher,
            links,
            reminders,
            intake_form,
        }
    }

    /// Run every stage in order and return the final context. Collaborator
    /// failures never surface here; only a ledger failure does.
    #[instrument(skip_all, fields(doctor_id = %request.doctor_id, date = %request.date))]
    pub async fn run(&self, request: BookingRequest) -> Result<BookingContext> {
        let mut ctx = BookingContext::new(request);
        for stage in Stage::PIPELINE {
            let update = self.run_stage(stage, &ctx).await?;
            ctx = ctx.merge(update);
        }
        match ctx.booking_result() {
            Some(result) => info!(%result, "booking pipeline finished"),
            None => warn!("booking pipeline finished without a result"),
        }
        Ok(ctx)
    }

    pub async fn run_stage(&self, stage: Stage, ctx: &BookingContext) -> Result<StageUpdate> {
        info!(stage = stage.as_str(), "running stage");
        match stage {
            Stage::Validate => Ok(self.validate(ctx).await),
            Stage::Recommend => Ok(self.recommend(ctx).await),
            Stage::Confirm => self.confirm(ctx).await,
        }
    }

    /// Advisory-only form check. Never rejects the booking.
    pub async fn validate(&self, ctx: &BookingContext) -> StageUpdate {
        let req = ctx.request();
        let text = if self.advisor.is_configured() {
            let prompt = format!(
                "Validate this appointment form: Name: {}, DOB: {}, Doctor: {}, Date: {}.\nIf OK, start with VALID. Otherwise mention issues briefly.",
                req.patient_name, req.dob, req.doctor_id, req.date
            );
            self.advisor.ask(&prompt).await
        } else {
            VALIDATE_PLACEHOLDER.to_string()
        };
        StageUpdate {
            advisory: Some(text),
            ..StageUpdate::default()
        }
    }

    /// Determine patient status and pick a slot. A missing slot is recorded,
    /// not treated as a failure.
    pub async fn recommend(&self, ctx: &BookingContext) -> StageUpdate {
        let req = ctx.request();
        let is_new = self.repo.is_new_patient(&req.patient_name, &req.dob);
        let slot = self.repo.find_slot(&req.doctor_id, &req.date);
        let slot_text = slot
            .as_ref()
            .map(|s| s.start_time.as_str())
            .unwrap_or(NO_SLOT_TEXT);
        info!(is_new, slot = slot_text, "recommendation");

        let friendly = if self.advisor.is_configured() {
            let prompt = format!(
                "Friendly one-line message for patient about slot: {} for {} with {}.",
                slot_text, req.date, req.doctor_id
            );
            self.advisor.ask(&prompt).await
        } else {
            RECOMMEND_PLACEHOLDER.to_string()
        };
        let advisory = if slot.is_some() {
            friendly
        } else {
            format!("{}\n\n{}", NO_SLOT_TEXT, friendly)
        };

        StageUpdate {
            advisory: Some(advisory),
            recommended_slot: Some(slot),
            new_patient: Some(is_new),
            outcome: None,
        }
    }

    /// Write the appointment, notify the patient and schedule reminders.
    #[instrument(skip_all)]
    pub async fn confirm(&self, ctx: &BookingContext) -> Result<StageUpdate> {
        let req = ctx.request();
        let slot = match ctx.recommended_slot() {
            Some(slot) => Some(slot.clone()),
            None => self.repo.find_slot(&req.doctor_id, &req.date),
        };
        let Some(slot) = slot else {
            info!("no slot available; nothing written");
            return Ok(StageUpdate {
                advisory: Some("Booking not created.".to_string()),
                outcome: Some(BookingOutcome::NoSlot),
                ..StageUpdate::default()
            });
        };

        let is_new = self.repo.is_new_patient(&req.patient_name, &req.dob);
        if let Some(previous) = ctx.new_patient() {
            if previous != is_new {
                warn!(previous, is_new, "patient status changed between stages");
            }
        }

        let appointment = Appointment {
            booking_id: Uuid::new_v4().to_string(),
            patient_name: req.patient_name.clone(),
            dob: req.dob.clone(),
            doctor_id: req.doctor_id.clone(),
            date: req.date.clone(),
            start_time: slot.start_time.clone(),
            is_new_patient: is_new,
            insurance_carrier: None,
            member_id: None,
            group_number: None,
            patient_phone: req.phone.clone(),
        };
        let ledger_id = db::append_appointment(&self.ledger, &appointment).await?;
        info!(ledger_id, booking_id = %appointment.booking_id, "appointment recorded");

        let booking_link = self.links.for_patient(is_new).to_string();

        let email = match req.email.as_deref() {
            Some(to) => {
                let body = format!(
                    "Hello {},\nYour appointment is confirmed.\nDoctor: {}\nDate: {}\nTime: {}\nBooking link: {}\nPlease find attached the intake form.",
                    appointment.patient_name,
                    appointment.doctor_id,
                    appointment.date,
                    appointment.start_time,
                    booking_link
                );
                self.dispatcher
                    .send_email(
                        to,
                        "Appointment Confirmation",
                        &body,
                        self.intake_form.as_deref(),
                    )
                    .await
            }
            None => DeliveryStatus::NotProvided(Channel::Email),
        };

        let text = match req.phone.as_deref() {
            Some(to) => {
                let body = format!(
                    "Appointment confirmed with {}: {} {}. Link: {}",
                    appointment.doctor_id, appointment.date, appointment.start_time, booking_link
                );
                self.dispatcher.send_text(to, &body).await
            }
            None => DeliveryStatus::NotProvided(Channel::Text),
        };

        let reminders_scheduled = self.reminders.schedule(&ReminderRequest {
            patient_name: &appointment.patient_name,
            email: req.email.as_deref(),
            phone: req.phone.as_deref(),
            doctor_id: &appointment.doctor_id,
            date: &appointment.date,
            start_time: &appointment.start_time,
        });

        let outcome = BookingOutcome::Created(Confirmation {
            ledger_id,
            appointment,
            email,
            text,
            booking_link,
            reminders_scheduled,
        });
        Ok(StageUpdate {
            advisory: Some(outcome.summary()),
            outcome: Some(outcome),
            ..StageUpdate::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BookingRequest {
        BookingRequest {
            patient_name: "Asha Rao".into(),
            dob: "1999-01-01".into(),
            doctor_id: "D001".into(),
            date: "2025-03-10".into(),
            email: Some("asha@example.com".into()),
            phone: None,
        }
    }

    #[test]
    fn merge_appends_advisory_and_replaces_slot() {
        let ctx = BookingContext::new(request());
        let ctx = ctx.merge(StageUpdate {
            advisory: Some("VALID".into()),
            ..StageUpdate::default()
        });
        let slot = crate::repository::fallback_slot("D001", "2025-03-10");
        let ctx = ctx.merge(StageUpdate {
            advisory: Some("See you at 10:00".into()),
            recommended_slot: Some(Some(slot.clone())),
            new_patient: Some(true),
            outcome: None,
        });
        assert_eq!(ctx.advisory(), "VALID\n\nSee you at 10:00");
        assert_eq!(ctx.recommended_slot(), Some(&slot));
        assert_eq!(ctx.new_patient(), Some(true));

        let ctx = ctx.merge(StageUpdate {
            recommended_slot: Some(None),
            ..StageUpdate::default()
        });
        assert!(ctx.recommended_slot().is_none());
        assert!(ctx.booking_result().is_none());
    }

    #[test]
    fn empty_update_leaves_context_unchanged() {
        let ctx = BookingContext::new(request());
        assert_eq!(ctx.clone().merge(StageUpdate::default()), ctx);
    }

    #[test]
    fn no_slot_summary_is_exact() {
        assert_eq!(
            BookingOutcome::NoSlot.summary(),
            "no slot available; booking not created"
        );
        assert!(!is_booking_created(NO_SLOT_RESULT));
    }

    #[test]
    fn created_summary_starts_with_prefix() {
        let outcome = BookingOutcome::Created(Confirmation {
            ledger_id: 7,
            appointment: Appointment {
                booking_id: "b".into(),
                patient_name: "Asha Rao".into(),
                dob: "1999-01-01".into(),
                doctor_id: "D001".into(),
                date: "2025-03-10".into(),
                start_time: "10:00".into(),
                is_new_patient: true,
                insurance_carrier: None,
                member_id: None,
                group_number: None,
                patient_phone: None,
            },
            email: DeliveryStatus::Sent {
                channel: Channel::Email,
                id: None,
            },
            text: DeliveryStatus::NotProvided(Channel::Text),
            booking_link: "https://calendly.com/x".into(),
            reminders_scheduled: 3,
        });
        let summary = outcome.summary();
        assert!(is_booking_created(&summary));
        assert_eq!(
            summary,
            "Booking created (ledger #7). Email: Email sent. SMS: No phone provided. Link: https://calendly.com/x"
        );
    }

    #[test]
    fn context_normalizes_request() {
        let mut req = request();
        req.phone = Some("  ".into());
        req.patient_name = " Asha Rao ".into();
        let ctx = BookingContext::new(req);
        assert_eq!(ctx.request().patient_name, "Asha Rao");
        assert!(ctx.request().phone.is_none());
    }
}
