//! Deferred reminder jobs.
//!
//! Jobs live only in process memory: each one is a tokio task sleeping until its
//! fire time. There is no retry, no cancellation, and nothing survives a restart.

use chrono::{Local, NaiveDateTime};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::model::{Channel, DeliveryStatus, ReminderJob};
use crate::notify::Dispatcher;

/// Accepts jobs for later execution. Registration must return immediately.
pub trait JobQueue: Send + Sync {
    fn register(&self, job: ReminderJob);
}

/// Runs each job on its own tokio task at its fire time.
pub struct TokioJobQueue {
    dispatcher: Dispatcher,
    handles: Mutex<Vec<JoinHandle<DeliveryStatus>>>,
}

impl TokioJobQueue {
    pub fn new(dispatcher: Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Number of registered jobs that have not been drained yet.
    pub fn pending(&self) -> usize {
        self.lock_handles()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait for every tracked job to fire. Used by short-lived CLI runs so the
    /// process does not exit before its reminders go out. Jobs that finished
    /// before a later `register` call are no longer tracked.
    pub async fn drain(&self) -> Vec<DeliveryStatus> {
        let handles: Vec<_> = std::mem::take(&mut *self.lock_handles());
        let mut statuses = Vec::with_capacity(handles.len());
        for res in futures::future::join_all(handles).await {
            match res {
                Ok(status) => statuses.push(status),
                Err(err) => warn!(?err, "reminder job panicked"),
            }
        }
        statuses
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<DeliveryStatus>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobQueue for TokioJobQueue {
    fn register(&self, job: ReminderJob) {
        let delay = delay_until(job.fire_at, Local::now().naive_local());
        debug!(
            channel = job.channel.as_str(),
            fire_at = %job.fire_at,
            delay_secs = delay.as_secs(),
            "registered reminder job"
        );
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_job(&dispatcher, &job).await
        });
        let mut handles = self.lock_handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

/// Time left until `fire_at`; zero when it has already passed.
pub fn delay_until(fire_at: NaiveDateTime, now: NaiveDateTime) -> Duration {
    (fire_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Deliver one job through the dispatcher. Failures are logged and returned,
/// never retried.
#[instrument(skip_all, fields(channel = job.channel.as_str()))]
pub async fn run_job(dispatcher: &Dispatcher, job: &ReminderJob) -> DeliveryStatus {
    let status = match job.channel {
        Channel::Email => {
            let subject = job.subject.as_deref().unwrap_or("Appointment reminder");
            dispatcher
                .send_email(&job.recipient, subject, &job.body, job.attachment.as_deref())
                .await
        }
        Channel::Text => dispatcher.send_text(&job.recipient, &job.body).await,
    };
    if status.is_failure() {
        warn!(%status, fire_at = %job.fire_at, "reminder job failed");
    } else {
        info!(%status, fire_at = %job.fire_at, "reminder job fired");
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{EmailMessage, EmailTransport};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    #[derive(Default)]
    struct RecordingEmail {
        sent: tokio::sync::Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailTransport for RecordingEmail {
        async fn send(&self, msg: &EmailMessage) -> Result<()> {
            self.sent.lock().await.push(msg.clone());
            Ok(())
        }
    }

    fn job(channel: Channel, fire_at: NaiveDateTime) -> ReminderJob {
        ReminderJob {
            fire_at,
            channel,
            recipient: "asha@example.com".into(),
            subject: Some("Reminder: Asha".into()),
            body: "hello".into(),
            attachment: None,
        }
    }

    #[test]
    fn delay_is_zero_for_past_fire_times() {
        let now = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(
            delay_until(now - chrono::Duration::seconds(5), now),
            Duration::ZERO
        );
        assert_eq!(
            delay_until(now + chrono::Duration::seconds(15), now),
            Duration::from_secs(15)
        );
    }

    #[tokio::test]
    async fn run_job_text_without_transport_is_not_configured() {
        let status = run_job(
            &Dispatcher::default(),
            &job(Channel::Text, Local::now().naive_local()),
        )
        .await;
        assert_eq!(status, DeliveryStatus::NotConfigured(Channel::Text));
    }

    #[tokio::test]
    async fn registered_jobs_fire_and_drain() {
        let email = Arc::new(RecordingEmail::default());
        let queue = TokioJobQueue::new(Dispatcher::new(Some(email.clone()), None));
        let now = Local::now().naive_local();
        queue.register(job(Channel::Email, now));
        queue.register(job(Channel::Email, now - chrono::Duration::seconds(30)));

        let statuses = queue.drain().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.to_string() == "Email sent"));
        assert_eq!(email.sent.lock().await.len(), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn register_prunes_finished_handles() {
        let queue = TokioJobQueue::new(Dispatcher::default());
        let now = Local::now().naive_local();
        queue.register(job(Channel::Text, now - chrono::Duration::seconds(5)));
        for _ in 0..100 {
            if queue.pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.lock_handles().len(), 1);

        queue.register(job(Channel::Text, now + chrono::Duration::seconds(60)));
        assert_eq!(queue.lock_handles().len(), 1);
        assert_eq!(queue.pending(), 1);
    }
}
