use anyhow::Context;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretBox};
use serde::Serialize;

use crate::domain::UserEmail;

pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: UserEmail,
    server_token: SecretBox<String>,
    fallback: Option<FallbackTransport>,
}

/// Email proxy tried when the primary API refuses or fails a delivery.
pub struct FallbackTransport {
    pub base_url: String,
    pub api_key: SecretBox<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
    html_body: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyEmailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    from: &'a str,
    api_key: &'a str,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: UserEmail,
        server_token: SecretBox<String>,
        timeout_milliseconds: u64,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_milliseconds))
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            base_url,
            sender,
            server_token,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Option<FallbackTransport>) -> Self {
        self.fallback = fallback;
        self
    }

    #[tracing::instrument(
        name = "Send email",
        skip(self, text_content, html_content),
        fields(recipient = %recipient)
    )]
    pub async fn send_email(
        &self,
        recipient: &UserEmail,
        subject: &str,
        text_content: &str,
        html_content: &str,
    ) -> Result<(), anyhow::Error> {
        let primary = self
            .send_via_api(recipient, subject, text_content, html_content)
            .await;

        let Err(primary_error) = primary else {
            return Ok(());
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };

        tracing::warn!(
            error.cause_chain = ?primary_error,
            "Primary email transport failed, retrying through the proxy"
        );
        self.send_via_proxy(
            fallback,
            recipient,
            subject,
            text_content,
            html_content,
        )
        .await
        .map_err(|e| e.context(format!("Primary transport: {primary_error:#}")))
    }

    async fn send_via_api(
        &self,
        recipient: &UserEmail,
        subject: &str,
        text_content: &str,
        html_content: &str,
    ) -> Result<(), anyhow::Error> {
        let url = Url::parse(&self.base_url)
            .and_then(|base| base.join("email"))
            .context("Invalid email API base url")?;

        let request = SendEmailRequest {
            from: self.sender.as_ref(),
            to: recipient.as_ref(),
            subject,
            text_body: text_content,
            html_body: html_content,
        };

        self.http_client
            .post(url)
            .header("X-Server-Token", self.server_token.expose_secret())
            .json(&request)
            .send()
            .await
            .context("Failed to reach the email API")?
            .error_for_status()
            .context("The email API rejected the request")?;

        Ok(())
    }

    async fn send_via_proxy(
        &self,
        fallback: &FallbackTransport,
        recipient: &UserEmail,
        subject: &str,
        text_content: &str,
        html_content: &str,
    ) -> Result<(), anyhow::Error> {
        let url = Url::parse(&fallback.base_url)
            .and_then(|base| base.join("api/send-email"))
            .context("Invalid email proxy base url")?;

        let request = ProxyEmailRequest {
            to: recipient.as_ref(),
            subject,
            html: html_content,
            text: text_content,
            from: self.sender.as_ref(),
            api_key: fallback.api_key.expose_secret(),
        };

        self.http_client
            .post(url)
            .json(&request)
            .send()
            .await
            .context("Failed to reach the email proxy")?
            .error_for_status()
            .context("The email proxy rejected the request")?;

        Ok(())
    }
}
