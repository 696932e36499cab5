//! Mailgun-style HTTP submission transport.
//!
//! Posts messages to `POST {base}/v3/{domain}/messages` with basic
//! auth, multipart form fields, and file attachments read from disk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::info;
use url::Url;

use crate::config::Config;
use crate::job::OutgoingMessage;
use crate::send::transport::{Transport, TransportError};

/// HTTP mail submission transport.
pub struct MailgunTransport {
    client: Client,
    endpoint: Url,
    api_key: String,
    sender: String,
}

impl MailgunTransport {
    /// Build the transport from configuration.
    ///
    /// Requires `MAILGUN_API_KEY` and `MAILGUN_DOMAIN` to be set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(api_key) = config.mailgun_api_key.clone() else {
            bail!("MAILGUN_API_KEY is required for the delivery transport");
        };
        let Some(domain) = config.mailgun_domain.as_deref() else {
            bail!("MAILGUN_DOMAIN is required for the delivery transport");
        };

        let endpoint = submission_endpoint(&config.mailgun_api_base, domain)?;

        let client = Client::builder()
            .pool_max_idle_per_host(100)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            sender: config.sender_address.clone(),
        })
    }

    /// Assemble the multipart form for one message.
    async fn build_form(&self, message: &OutgoingMessage) -> Result<Form, TransportError> {
        let mut form = Form::new()
            .text("from", self.sender.clone())
            .text("to", message.to.clone())
            .text("subject", message.subject.clone())
            .text("text", message.body.clone());

        if !message.cc.is_empty() {
            form = form.text("cc", message.cc.join(", "));
        }

        if message.urgent {
            form = form
                .text("h:X-Priority", "1")
                .text("h:Importance", "high");
        }

        for path in &message.attachments {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                // A missing file will still be missing on retry.
                TransportError::Rejected(format!("attachment {path} not readable: {e}"))
            })?;
            let file_name = attachment_file_name(path);
            form = form.part("attachment", Part::bytes(bytes).file_name(file_name));
        }

        Ok(form)
    }
}

#[async_trait]
impl Transport for MailgunTransport {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let form = self.build_form(message).await?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(to = %message.to, status = status.as_u16(), "mailgun_message_accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let reason = format!("{}: {}", status.as_u16(), body_preview(&body));

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(TransportError::Unavailable(reason))
        } else {
            Err(TransportError::Rejected(reason))
        }
    }
}

/// Build the submission URL for a sending domain.
fn submission_endpoint(api_base: &str, domain: &str) -> Result<Url> {
    let base = Url::parse(api_base).context("Invalid MAILGUN_API_BASE")?;
    base.join(&format!("v3/{domain}/messages"))
        .context("Failed to build submission endpoint")
}

/// File name shown to the mail endpoint: the last path segment.
fn attachment_file_name(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_string()
}

/// First 200 characters of an error body, for failure reasons.
fn body_preview(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    body[..end].trim_end()
}
