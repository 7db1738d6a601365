use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::errors::{AppError, AppResult, ErrorCode};

/// Out-of-band passcode delivery. Login initiation treats a failure here as
/// fatal: no passcode confirmed sent means no success response.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_passcode(&self, to: &str, code: &str) -> AppResult<()>;
}

#[derive(Clone)]
pub struct EmailClient {
    client: Client,
    api_key: String,
    from_email: String,
    from_name: String,
}

#[derive(Debug, Serialize)]
struct ResendRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
}

impl EmailClient {
    pub fn new(api_key: &str, from_email: &str, from_name: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
        }
    }

    async fn send_email(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        let request = ResendRequest {
            from: format!("{} <{}>", self.from_name, self.from_email),
            to: vec![to.to_string()],
            subject: subject.to_string(),
            html: html.to_string(),
        };

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::new(ErrorCode::DeliveryFailure, format!("email send failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "email API rejected send");
            return Err(AppError::new(ErrorCode::DeliveryFailure, "could not deliver email"));
        }

        tracing::debug!(to = %to, subject = %subject, "email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailClient {
    async fn send_passcode(&self, to: &str, code: &str) -> AppResult<()> {
        let html = format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
            <h2 style="color: #1d4ed8;">alma - Login code</h2>
            <p>Your one-time login code is:</p>
            <div style="background: #0f172a; color: #60a5fa; font-size: 32px; font-weight: bold; text-align: center; padding: 20px; border-radius: 8px; letter-spacing: 8px;">{code}</div>
            <p style="color: #666; margin-top: 20px;">This code expires in 10 minutes. If you did not request it, you can ignore this email.</p>
            </div>"#
        );

        self.send_email(to, "alma - Your login code", &html).await
    }
}
