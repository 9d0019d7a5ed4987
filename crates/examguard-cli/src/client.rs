//! HTTP client for examguardd.

use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;

pub struct DaemonClient {
    base: String,
    http: reqwest::Client,
}

/// Applicant fields sent alongside a registration image.
pub struct Applicant<'a> {
    pub application_id: &'a str,
    pub full_name: &'a str,
    pub age: Option<u32>,
    pub exam_type: &'a str,
    pub location: &'a str,
}

impl DaemonClient {
    pub fn new(server: &str) -> Self {
        Self {
            base: server.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn register(&self, image: &Path, applicant: &Applicant<'_>) -> Result<Value> {
        let form = image_form(image)
            .await?
            .text("application_id", applicant.application_id.to_string())
            .text("full_name", applicant.full_name.to_string())
            .text("age", applicant.age.map(|a| a.to_string()).unwrap_or_default())
            .text("exam_type", applicant.exam_type.to_string())
            .text("location", applicant.location.to_string());
        self.post_form("/register", form).await
    }

    pub async fn verify(&self, image: &Path) -> Result<Value> {
        self.post_form("/api/verify", image_form(image).await?).await
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.base))?;
        read_json(response).await
    }

    async fn post_form(&self, path: &str, form: Form) -> Result<Value> {
        let response = self
            .http
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.base))?;
        read_json(response).await
    }
}

async fn image_form(image: &Path) -> Result<Form> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Form::new().part("face_image", Part::bytes(bytes).file_name(file_name)))
}

/// Daemon errors come back as `{"error": ..., "status": ...}`.
async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("decoding daemon response")?;
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("request failed");
        bail!("{message} (HTTP {})", status.as_u16());
    }
    tracing::debug!(%status, "daemon response");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = DaemonClient::new("http://127.0.0.1:8502/");
        assert_eq!(client.url("/system_status"), "http://127.0.0.1:8502/system_status");
    }
}
