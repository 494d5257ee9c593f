//! Outbound notifications over email and text message.
//!
//! The [`Dispatcher`] never fails: every outcome, including a missing transport
//! or a transport error, is reported as a [`DeliveryStatus`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, Email as EmailConfig, Sms as SmsConfig};
use crate::model::{Channel, DeliveryStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, msg: &EmailMessage) -> Result<()>;
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Returns the provider's message id.
    async fn send(&self, to: &str, body: &str) -> Result<String>;
}

/// Shared handle to the configured transports. Cheap to clone and safe to use
/// from many fired reminder jobs at once.
#[derive(Clone, Default)]
pub struct Dispatcher {
    email: Option<Arc<dyn EmailTransport>>,
    sms: Option<Arc<dyn SmsTransport>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("email", &self.email.is_some())
            .field("sms", &self.sms.is_some())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        email: Option<Arc<dyn EmailTransport>>,
        sms: Option<Arc<dyn SmsTransport>>,
    ) -> Self {
        Self { email, sms }
    }

    /// Build transports for every section that carries credentials.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let email = match &cfg.email {
            Some(e) if !e.api_key.trim().is_empty() => {
                let relay: Arc<dyn EmailTransport> = Arc::new(MailRelay::from_config(e)?);
                Some(relay)
            }
            _ => None,
        };
        let sms = match &cfg.sms {
            Some(s) if !s.account_sid.trim().is_empty() && !s.auth_token.trim().is_empty() => {
                let api: Arc<dyn SmsTransport> = Arc::new(SmsApi::from_config(s)?);
                Some(api)
            }
            _ => None,
        };
        info!(
            email = email.is_some(),
            sms = sms.is_some(),
            "notification transports"
        );
        Ok(Self::new(email, sms))
    }

    pub fn sms_configured(&self) -> bool {
        self.sms.is_some()
    }

    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> DeliveryStatus {
        let Some(transport) = &self.email else {
            return DeliveryStatus::NotConfigured(Channel::Email);
        };
        let msg = EmailMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachment: attachment.map(Path::to_path_buf),
        };
        match transport.send(&msg).await {
            Ok(()) => {
                info!(subject, "email sent");
                DeliveryStatus::Sent {
                    channel: Channel::Email,
                    id: None,
                }
            }
            Err(err) => {
                warn!(?err, subject, "email delivery failed");
                DeliveryStatus::Failed {
                    channel: Channel::Email,
                    error: format!("{:#}", err),
                }
            }
        }
    }

    pub async fn send_text(&self, to: &str, body: &str) -> DeliveryStatus {
        let Some(transport) = &self.sms else {
            return DeliveryStatus::NotConfigured(Channel::Text);
        };
        match transport.send(to, body).await {
            Ok(id) => {
                info!(%id, "text message sent");
                DeliveryStatus::Sent {
                    channel: Channel::Text,
                    id: Some(id),
                }
            }
            Err(err) => {
                warn!(?err, "text message delivery failed");
                DeliveryStatus::Failed {
                    channel: Channel::Text,
                    error: format!("{:#}", err),
                }
            }
        }
    }
}

/// HTTP mail relay speaking the Mailgun messages API.
#[derive(Clone)]
pub struct MailRelay {
    http: Client,
    endpoint: Url,
    api_key: String,
    from: String,
}

impl MailRelay {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        let base = Url::parse(&cfg.api_base).context("invalid email.api_base")?;
        let endpoint = base
            .join(&format!("v3/{}/messages", cfg.domain.trim()))
            .context("invalid email.domain")?;
        let http = Client::builder()
            .user_agent("clinic-booker/0.1")
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .context("failed to build mail HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            api_key: cfg.api_key.trim().to_string(),
            from: cfg.from.clone(),
        })
    }

    /// `attachment` carries the file name and its bytes.
    pub fn build_request(
        &self,
        msg: &EmailMessage,
        attachment: Option<(String, Vec<u8>)>,
    ) -> Result<reqwest::Request> {
        let mut form = Form::new()
            .text("from", self.from.clone())
            .text("to", msg.to.clone())
            .text("subject", msg.subject.clone())
            .text("text", msg.body.clone());
        if let Some((name, bytes)) = attachment {
            let part = Part::bytes(bytes)
                .file_name(name)
                .mime_str("application/pdf")?;
            form = form.part("attachment", part);
        }
        self.http
            .post(self.endpoint.clone())
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .build()
            .context("failed to build mail request")
    }
}

#[async_trait]
impl EmailTransport for MailRelay {
    async fn send(&self, msg: &EmailMessage) -> Result<()> {
        let attachment = match &msg.attachment {
            Some(path) if path.exists() => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read attachment {}", path.display()))?;
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("attachment.pdf")
                    .to_string();
                Some((name, bytes))
            }
            Some(path) => {
                warn!(path = %path.display(), "attachment missing; sending without it");
                None
            }
            None => None,
        };
        let request = self.build_request(msg, attachment)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach mail relay")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("mail relay error {}: {}", status, body));
        }
        Ok(())
    }
}

/// REST text-message API in the Twilio shape.
#[derive(Clone)]
pub struct SmsApi {
    http: Client,
    endpoint: Url,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

#[derive(Deserialize)]
struct SmsCreated {
    sid: String,
}

impl SmsApi {
    pub fn from_config(cfg: &SmsConfig) -> Result<Self> {
        let base = Url::parse(&cfg.api_base).context("invalid sms.api_base")?;
        let endpoint = base
            .join(&format!(
                "2010-04-01/Accounts/{}/Messages.json",
                cfg.account_sid.trim()
            ))
            .context("invalid sms.account_sid")?;
        let http = Client::builder()
            .user_agent("clinic-booker/0.1")
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .context("failed to build SMS HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            account_sid: cfg.account_sid.trim().to_string(),
            auth_token: cfg.auth_token.trim().to_string(),
            from_number: cfg.from_number.clone(),
        })
    }

    pub fn build_request(&self, to: &str, body: &str) -> Result<reqwest::Request> {
        let params = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];
        self.http
            .post(self.endpoint.clone())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .build()
            .context("failed to build SMS request")
    }
}

#[async_trait]
impl SmsTransport for SmsApi {
    async fn send(&self, to: &str, body: &str) -> Result<String> {
        let request = self.build_request(to, body)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach SMS API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("SMS API error {}: {}", status, body));
        }
        let created: SmsCreated = res.json().await.context("invalid SMS API response")?;
        Ok(created.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FailingSms {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SmsTransport for FailingSms {
        async fn send(&self, to: &str, _body: &str) -> Result<String> {
            self.calls.lock().await.push(to.to_string());
            Err(anyhow!("unreachable number"))
        }
    }

    struct OkEmail;

    #[async_trait]
    impl EmailTransport for OkEmail {
        async fn send(&self, _msg: &EmailMessage) -> Result<()> {
            Ok(())
        }
    }

    fn email_cfg() -> EmailConfig {
        EmailConfig {
            from: "clinic@example.com".into(),
            api_base: "https://api.mailgun.net/".into(),
            domain: "mg.example.com".into(),
            api_key: "key-1".into(),
            timeout_seconds: 30,
        }
    }

    fn sms_cfg() -> SmsConfig {
        SmsConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from_number: "+15550000".into(),
            api_base: "https://api.twilio.com/".into(),
            timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn unconfigured_channels_report_not_configured() {
        let dispatcher = Dispatcher::default();
        assert!(!dispatcher.sms_configured());
        let status = dispatcher
            .send_email("a@example.com", "s", "b", None)
            .await;
        assert_eq!(status, DeliveryStatus::NotConfigured(Channel::Email));
        assert_eq!(
            dispatcher.send_text("+1555", "b").await.to_string(),
            "SMS not configured"
        );
    }

    #[tokio::test]
    async fn transport_errors_become_statuses() {
        let sms = Arc::new(FailingSms::default());
        let dispatcher = Dispatcher::new(Some(Arc::new(OkEmail)), Some(sms.clone()));
        let status = dispatcher.send_text("+1555", "hello").await;
        assert!(status.is_failure());
        assert_eq!(status.to_string(), "SMS error: unreachable number");
        assert_eq!(sms.calls.lock().await.len(), 1);

        let status = dispatcher.send_email("a@example.com", "s", "b", None).await;
        assert_eq!(status.to_string(), "Email sent");
    }

    #[test]
    fn mail_relay_request_targets_domain() {
        let relay = MailRelay::from_config(&email_cfg()).unwrap();
        let msg = EmailMessage {
            to: "a@example.com".into(),
            subject: "Appointment Confirmation".into(),
            body: "hello".into(),
            attachment: None,
        };
        let request = relay
            .build_request(&msg, Some(("form.pdf".into(), b"%PDF".to_vec())))
            .unwrap();
        assert_eq!(request.url().path(), "/v3/mg.example.com/messages");
        let auth = request
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .unwrap();
        assert!(auth.starts_with("Basic "));
        let content_type = request
            .headers()
            .get("Content-Type")
            .and_then(|h| h.to_str().ok())
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[test]
    fn sms_request_is_form_encoded() {
        let api = SmsApi::from_config(&sms_cfg()).unwrap();
        let request = api.build_request("+15551234", "Appointment confirmed").unwrap();
        assert_eq!(
            request.url().path(),
            "/2010-04-01/Accounts/AC123/Messages.json"
        );
        let body =
            String::from_utf8(request.body().and_then(|b| b.as_bytes()).unwrap().to_vec()).unwrap();
        assert!(body.contains("To=%2B15551234"));
        assert!(body.contains("From=%2B15550000"));
        assert!(body.contains("Body=Appointment+confirmed"));
    }

    #[test]
    fn from_config_skips_sections_without_credentials() {
        let mut cfg: Config = serde_yaml::from_str(crate::config::example()).unwrap();
        if let Some(e) = cfg.email.as_mut() {
            e.api_key = "".into();
        }
        cfg.sms = None;
        let dispatcher = Dispatcher::from_config(&cfg).unwrap();
        assert!(!dispatcher.sms_configured());
        assert_eq!(
            format!("{:?}", dispatcher),
            "Dispatcher { email: false, sms: false }"
        );
    }
}
