use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Reminder timing policy, read once at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReminderMode {
    #[default]
    Demo,
    #[serde(alias = "prod")]
    Production,
}

impl ReminderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderMode::Demo => "demo",
            ReminderMode::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Channel {
    Email,
    Text,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Text => "text",
        }
    }
}

/// A row of the patient dataset. Every column is kept as the raw string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientRecord {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub dob: String,
}

/// A row of the doctor schedule dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilitySlot {
    pub doctor_id: String,
    pub date: String,
    pub start_time: String,
    #[serde(default)]
    pub is_available: String,
}

impl AvailabilitySlot {
    pub fn is_available(&self) -> bool {
        self.is_available.eq_ignore_ascii_case("true")
    }
}

/// A confirmed booking as written to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Appointment {
    pub booking_id: String,
    pub patient_name: String,
    pub dob: String,
    pub doctor_id: String,
    pub date: String,
    pub start_time: String,
    pub is_new_patient: bool,
    // Intake integration is not wired yet; these stay `None` in the booking flow.
    pub insurance_carrier: Option<String>,
    pub member_id: Option<String>,
    pub group_number: Option<String>,
    pub patient_phone: Option<String>,
}

/// Fields collected by the booking form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub patient_name: String,
    pub dob: String,
    pub doctor_id: String,
    pub date: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl BookingRequest {
    /// Trims every field and turns blank contact details into `None`.
    pub fn normalized(self) -> Self {
        let blank_to_none =
            |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            patient_name: self.patient_name.trim().to_string(),
            dob: self.dob.trim().to_string(),
            doctor_id: self.doctor_id.trim().to_string(),
            date: self.date.trim().to_string(),
            email: blank_to_none(self.email),
            phone: blank_to_none(self.phone),
        }
    }
}

/// One deferred notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderJob {
    pub fire_at: NaiveDateTime,
    pub channel: Channel,
    pub recipient: String,
    /// Only used by the email channel.
    pub subject: Option<String>,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

/// Outcome of a single send attempt on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent { channel: Channel, id: Option<String> },
    NotConfigured(Channel),
    NotProvided(Channel),
    Failed { channel: Channel, error: String },
}

impl DeliveryStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, DeliveryStatus::Failed { .. })
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Sent { channel: Channel::Email, .. } => write!(f, "Email sent"),
            DeliveryStatus::Sent { channel: Channel::Text, id: Some(id) } => {
                write!(f, "SMS sent ({})", id)
            }
            DeliveryStatus::Sent { channel: Channel::Text, id: None } => write!(f, "SMS sent"),
            DeliveryStatus::NotConfigured(Channel::Email) => {
                write!(f, "Email credentials not configured")
            }
            DeliveryStatus::NotConfigured(Channel::Text) => write!(f, "SMS not configured"),
            DeliveryStatus::NotProvided(Channel::Email) => write!(f, "No email provided"),
            DeliveryStatus::NotProvided(Channel::Text) => write!(f, "No phone provided"),
            DeliveryStatus::Failed { channel: Channel::Email, error } => {
                write!(f, "Email error: {}", error)
            }
            DeliveryStatus::Failed { channel: Channel::Text, error } => {
                write!(f, "SMS error: {}", error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_mode_accepts_prod_alias() {
        let mode: ReminderMode = serde_yaml::from_str("prod").unwrap();
        assert_eq!(mode, ReminderMode::Production);
        let mode: ReminderMode = serde_yaml::from_str("demo").unwrap();
        assert_eq!(mode, ReminderMode::Demo);
    }

    #[test]
    fn slot_availability_is_case_insensitive() {
        let mut slot = AvailabilitySlot {
            doctor_id: "D001".into(),
            date: "2025-03-10".into(),
            start_time: "09:00".into(),
            is_available: "TRUE".into(),
        };
        assert!(slot.is_available());
        slot.is_available = "false".into();
        assert!(!slot.is_available());
        slot.is_available = "".into();
        assert!(!slot.is_available());
        slot.is_available = " true".into();
        assert!(!slot.is_available());
    }

    #[test]
    fn normalized_request_drops_blank_contacts() {
        let req = BookingRequest {
            patient_name: "  Asha Rao ".into(),
            dob: "1999-01-01".into(),
            doctor_id: " D001".into(),
            date: "2025-03-10".into(),
            email: Some("   ".into()),
            phone: Some(" +15550100 ".into()),
        }
        .normalized();
        assert_eq!(req.patient_name, "Asha Rao");
        assert_eq!(req.doctor_id, "D001");
        assert_eq!(req.email, None);
        assert_eq!(req.phone.as_deref(), Some("+15550100"));
    }

    #[test]
    fn status_strings() {
        assert_eq!(
            DeliveryStatus::NotProvided(Channel::Text).to_string(),
            "No phone provided"
        );
        assert_eq!(
            DeliveryStatus::Sent { channel: Channel::Text, id: Some("SM1".into()) }.to_string(),
            "SMS sent (SM1)"
        );
        let failed = DeliveryStatus::Failed { channel: Channel::Email, error: "timeout".into() };
        assert_eq!(failed.to_string(), "Email error: timeout");
        assert!(failed.is_failure());
        assert!(!DeliveryStatus::NotConfigured(Channel::Email).is_failure());
    }
}
