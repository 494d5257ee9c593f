//! Booking-link resolution.
//!
//! The configured links may be internal event-type API URIs. Those are exchanged
//! once at startup for their public scheduling URL; anything that still points at
//! the API afterwards is replaced by a fixed public link.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::BookingLinks as BookingLinksConfig;

pub const DEFAULT_NEW_PATIENT_LINK: &str = "https://calendly.com/pragatheesvaranab/new-meeting";
pub const DEFAULT_RETURNING_PATIENT_LINK: &str = "https://calendly.com/pragatheesvaranab/30min";

const DIRECTORY_API_BASE: &str = "https://api.calendly.com/";
const INTERNAL_HOST: &str = "api.calendly.com";

static EVENT_TYPE_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"api\.calendly\.com/event_types/([0-9a-fA-F-]+)").expect("valid event type regex")
});

/// Public links handed to patients after booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingLinks {
    pub new_patient: String,
    pub returning_patient: String,
}

impl Default for BookingLinks {
    fn default() -> Self {
        Self {
            new_patient: DEFAULT_NEW_PATIENT_LINK.to_string(),
            returning_patient: DEFAULT_RETURNING_PATIENT_LINK.to_string(),
        }
    }
}

impl BookingLinks {
    pub fn for_patient(&self, is_new_patient: bool) -> &str {
        if is_new_patient {
            &self.new_patient
        } else {
            &self.returning_patient
        }
    }
}

/// Resolve both configured links. Never fails; every problem degrades to a
/// usable public link.
pub async fn resolve(cfg: &BookingLinksConfig) -> BookingLinks {
    let directory = match DirectoryClient::new(&cfg.directory_token) {
        Ok(client) => Some(client),
        Err(err) => {
            warn!(?err, "booking-link directory client unavailable");
            None
        }
    };
    let new_patient =
        resolve_one(&cfg.new_patient, DEFAULT_NEW_PATIENT_LINK, directory.as_ref()).await;
    let returning_patient = resolve_one(
        &cfg.returning_patient,
        DEFAULT_RETURNING_PATIENT_LINK,
        directory.as_ref(),
    )
    .await;
    info!(%new_patient, %returning_patient, "resolved booking links");
    BookingLinks {
        new_patient,
        returning_patient,
    }
}

pub async fn resolve_one(raw: &str, default: &str, directory: Option<&DirectoryClient>) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return default.to_string();
    }
    let resolved = match (event_type_uuid(raw), directory) {
        (None, _) | (Some(_), None) => raw.to_string(),
        (Some(_), Some(dir)) if !dir.has_token() => {
            warn!("directory token not set; cannot exchange event type URI");
            raw.to_string()
        }
        (Some(uuid), Some(dir)) => match dir.fetch_scheduling_url(uuid).await {
            Ok(url) => url,
            Err(err) => {
                warn!(?err, "event type lookup failed; keeping configured value");
                raw.to_string()
            }
        },
    };
    public_or_default(resolved, default)
}

/// Extract the event-type identifier from an internal API URI.
pub fn event_type_uuid(raw: &str) -> Option<&str> {
    EVENT_TYPE_URI
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn public_or_default(link: String, default: &str) -> String {
    if link.contains(INTERNAL_HOST) {
        default.to_string()
    } else {
        link
    }
}

/// Client for the scheduling directory's event-type endpoint.
#[derive(Clone)]
pub struct DirectoryClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DirectoryClient {
    pub fn new(token: &str) -> Result<Self> {
        let base_url = Url::parse(DIRECTORY_API_BASE).context("invalid directory URL")?;
        Self::with_base_url(token, base_url)
    }

    pub fn with_base_url(token: &str, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("clinic-booker/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build directory HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: token.trim().to_string(),
        })
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    pub async fn fetch_scheduling_url(&self, event_uuid: &str) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("event_types/{}", event_uuid))?;
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to reach scheduling directory")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("directory returned {}: {}", status, body));
        }
        let payload: Value = res.json().await.context("invalid directory response JSON")?;
        scheduling_url_from(&payload).ok_or_else(|| anyhow!("scheduling_url missing from response"))
    }
}

/// `resource.scheduling_url`, else a top-level `scheduling_url`.
pub fn scheduling_url_from(payload: &Value) -> Option<String> {
    payload
        .get("resource")
        .and_then(|r| r.get("scheduling_url"))
        .or_else(|| payload.get("scheduling_url"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const API_URI: &str =
        "https://api.calendly.com/event_types/0f9a1c2e-3b4d-4e5f-8a9b-0c1d2e3f4a5b";

    #[test]
    fn extracts_event_type_uuid() {
        assert_eq!(
            event_type_uuid(API_URI),
            Some("0f9a1c2e-3b4d-4e5f-8a9b-0c1d2e3f4a5b")
        );
        assert_eq!(event_type_uuid("https://calendly.com/someone/30min"), None);
    }

    #[test]
    fn scheduling_url_prefers_resource() {
        let payload = json!({
            "resource": { "scheduling_url": "https://calendly.com/a/b" },
            "scheduling_url": "https://calendly.com/c/d"
        });
        assert_eq!(scheduling_url_from(&payload).unwrap(), "https://calendly.com/a/b");
        let payload = json!({ "scheduling_url": "https://calendly.com/c/d" });
        assert_eq!(scheduling_url_from(&payload).unwrap(), "https://calendly.com/c/d");
        assert!(scheduling_url_from(&json!({ "resource": {} })).is_none());
    }

    #[tokio::test]
    async fn empty_value_uses_default() {
        let link = resolve_one("  ", DEFAULT_NEW_PATIENT_LINK, None).await;
        assert_eq!(link, DEFAULT_NEW_PATIENT_LINK);
    }

    #[tokio::test]
    async fn public_value_is_kept() {
        let link = resolve_one("https://calendly.com/clinic/intro", DEFAULT_NEW_PATIENT_LINK, None).await;
        assert_eq!(link, "https://calendly.com/clinic/intro");
    }

    #[tokio::test]
    async fn api_uri_without_token_falls_back_to_public_default() {
        let dir = DirectoryClient::new("").unwrap();
        let link = resolve_one(API_URI, DEFAULT_RETURNING_PATIENT_LINK, Some(&dir)).await;
        assert_eq!(link, DEFAULT_RETURNING_PATIENT_LINK);
    }

    #[test]
    fn links_select_by_patient_type() {
        let links = BookingLinks::default();
        assert_eq!(links.for_patient(true), DEFAULT_NEW_PATIENT_LINK);
        assert_eq!(links.for_patient(false), DEFAULT_RETURNING_PATIENT_LINK);
    }
}
