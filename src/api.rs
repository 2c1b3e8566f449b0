use async_trait::async_trait;
use reqwest::{header::ACCEPT, multipart::{Form, Part}, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, error, debug};

use crate::{
    config::Config,
    error::StudioError,
    models::{EditResponse, NanoSubmission, PhotoroomResponse, Provider, RecordInfo},
    upload::SourceImage,
};

const RECORD_INFO_PATH: &str = "/api/nanobanana/record-info";
const ANALYZE_PATH: &str = "/api/image/analyze-with-rest-api";

/// Outbound calls to the image service. Every method is a single request.
#[async_trait]
pub trait StudioApi: Send + Sync {
    /// Returns the raw body so it can be exported untouched.
    async fn analyze(&self, image: &SourceImage) -> Result<Value, StudioError>;
    async fn submit_nano(
        &self,
        image: &SourceImage,
        prompt: &str,
    ) -> Result<NanoSubmission, StudioError>;
    async fn nano_record_info(&self, task_id: &str) -> Result<RecordInfo, StudioError>;
    async fn enhance_photoroom(
        &self,
        image: &SourceImage,
        prompt: &str,
    ) -> Result<PhotoroomResponse, StudioError>;
    /// Single edit request against the stability or dalle endpoint.
    async fn edit_image(
        &self,
        provider: Provider,
        image: &SourceImage,
        prompt: &str,
    ) -> Result<EditResponse, StudioError>;
}

pub struct HttpStudioApi {
    client: Client,
    base_url: String,
}

impl HttpStudioApi {
    pub fn new(config: &Config) -> Result<Self, StudioError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| StudioError::transport(e.to_string()))?;
        Ok(Self { client, base_url: config.api_base.clone() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn image_form(image: &SourceImage, prompt: Option<&str>) -> Result<Form, StudioError> {
        let part = Part::bytes(image.bytes.to_vec())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)
            .map_err(|e| StudioError::Validation(format!("Invalid image type: {}", e)))?;
        let form = Form::new().part("image", part);
        Ok(match prompt {
            Some(prompt) => form.text("prompt", prompt.to_string()),
            None => form,
        })
    }

    async fn post_form(&self, path: &str, form: Form) -> Result<Value, StudioError> {
        let url = self.url(path);
        info!("📤 POST {}", url);
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| StudioError::transport(e.to_string()))?;
        read_json(response).await
    }
}

#[async_trait]
impl StudioApi for HttpStudioApi {
    async fn analyze(&self, image: &SourceImage) -> Result<Value, StudioError> {
        let form = Self::image_form(image, None)?;
        self.post_form(ANALYZE_PATH, form).await
    }

    async fn submit_nano(
        &self,
        image: &SourceImage,
        prompt: &str,
    ) -> Result<NanoSubmission, StudioError> {
        let form = Self::image_form(image, Some(prompt))?;
        typed(self.post_form(Provider::NanoBanana.endpoint(), form).await?)
    }

    async fn nano_record_info(&self, task_id: &str) -> Result<RecordInfo, StudioError> {
        let url = self.url(RECORD_INFO_PATH);
        debug!("🔄 GET {} record_id={}", url, task_id);
        let response = self
            .client
            .get(&url)
            .query(&[("record_id", task_id)])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| StudioError::transport(e.to_string()))?;
        typed(read_json(response).await?)
    }

    async fn enhance_photoroom(
        &self,
        image: &SourceImage,
        prompt: &str,
    ) -> Result<PhotoroomResponse, StudioError> {
        let form = Self::image_form(image, Some(prompt))?;
        typed(self.post_form(Provider::Photoroom.endpoint(), form).await?)
    }

    async fn edit_image(
        &self,
        provider: Provider,
        image: &SourceImage,
        prompt: &str,
    ) -> Result<EditResponse, StudioError> {
        if !matches!(provider, Provider::Stability | Provider::Dalle) {
            return Err(StudioError::Validation(format!("{} has no edit endpoint", provider)));
        }
        let form = Self::image_form(image, Some(prompt))?;
        typed(self.post_form(provider.endpoint(), form).await?)
    }
}

async fn read_json(response: Response) -> Result<Value, StudioError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| StudioError::transport(e.to_string()))?;

    if !status.is_success() {
        error!("❌ API error response: status={} body={}", status, preview(&body));
        return Err(StudioError::Transport {
            provider_message: message_field(&body),
            detail: format!("status={} body={}", status, preview(&body)),
        });
    }

    debug!("📥 Response status={} body={}", status, preview(&body));
    serde_json::from_str(&body).map_err(|e| StudioError::Parse(format!("{}: {}", e, preview(&body))))
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T, StudioError> {
    serde_json::from_value(value).map_err(|e| StudioError::Parse(e.to_string()))
}

/// The `message` field of an error body, if the body is JSON and has one.
pub fn message_field(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

// Bodies may carry base64 payloads; keep log lines short.
fn preview(body: &str) -> String {
    const LIMIT: usize = 500;
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...[{} bytes total]", &body[..cut], body.len()),
        None => body.to_string(),
    }
}
