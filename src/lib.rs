//! Clinic appointment booking with multi-channel reminders.

pub mod advisory;
pub mod config;
pub mod db;
pub mod links;
pub mod model;
pub mod notify;
pub mod outbox;
pub mod reminders;
pub mod repository;
pub mod workflow;
