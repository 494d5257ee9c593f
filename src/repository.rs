//! Read-only lookups over the patient and doctor-schedule datasets.
//!
//! Both datasets are CSV files read entirely into memory at startup. A missing
//! file is an empty dataset. The repository is never mutated after loading, so
//! repeated lookups with the same inputs always return the same answer.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::model::{AvailabilitySlot, PatientRecord};

/// Start time handed out when no schedule data exists at all. This keeps the
/// service usable for demos without a schedule file; it is never used when the
/// schedule has rows but none match.
pub const FALLBACK_START_TIME: &str = "10:00";

#[derive(Debug, Clone, Default)]
pub struct Repository {
    patients: Vec<PatientRecord>,
    slots: Vec<AvailabilitySlot>,
}

impl Repository {
    pub fn new(patients: Vec<PatientRecord>, slots: Vec<AvailabilitySlot>) -> Self {
        Self { patients, slots }
    }

    /// Load both datasets from CSV. Missing files yield empty datasets.
    pub fn load(patients_file: &Path, schedule_file: &Path) -> Result<Self> {
        let patients: Vec<PatientRecord> = read_csv_or_empty(patients_file)
            .with_context(|| format!("failed to read patients from {}", patients_file.display()))?;
        let slots: Vec<AvailabilitySlot> = read_csv_or_empty(schedule_file)
            .with_context(|| format!("failed to read schedule from {}", schedule_file.display()))?;
        info!(
            patients = patients.len(),
            slots = slots.len(),
            "loaded booking datasets"
        );
        Ok(Self::new(patients, slots))
    }

    /// Match on the lower-cased first token of `name` against stored first
    /// names and an exact date-of-birth string. First match wins.
    pub fn find_patient(&self, name: &str, dob: &str) -> Option<&PatientRecord> {
        let first = name.split_whitespace().next()?.to_lowercase();
        self.patients
            .iter()
            .find(|p| p.first_name.to_lowercase() == first && p.dob == dob)
    }

    /// A person without a matching record is a new patient.
    pub fn is_new_patient(&self, name: &str, dob: &str) -> bool {
        self.find_patient(name, dob).is_none()
    }

    /// First available slot for the doctor on the date. When the schedule
    /// dataset is empty the fixed fallback slot is returned instead.
    pub fn find_slot(&self, doctor_id: &str, date: &str) -> Option<AvailabilitySlot> {
        if self.slots.is_empty() {
            debug!(doctor_id, date, "schedule dataset empty; using fallback slot");
            return Some(fallback_slot(doctor_id, date));
        }
        self.slots
            .iter()
            .find(|s| s.doctor_id == doctor_id && s.date == date && s.is_available())
            .cloned()
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// The slot used when no schedule data is loaded.
pub fn fallback_slot(doctor_id: &str, date: &str) -> AvailabilitySlot {
    AvailabilitySlot {
        doctor_id: doctor_id.to_string(),
        date: date.to_string(),
        start_time: FALLBACK_START_TIME.to_string(),
        is_available: "true".to_string(),
    }
}

fn read_csv_or_empty<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        warn!(path = %path.display(), "dataset file missing; treating as empty");
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}
