/// Velqis REST backend
///
/// Submits generation jobs over HTTPS and polls for their status:
/// `POST /generations`, `GET /generations/{id}`,
/// `POST /generations/{id}/cancel`, `GET /status`.
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::backend::{
    BackendError, BackendResult, GenerationBackend, RemoteJobId, RemoteJobState,
};
use crate::request::GenerationRequest;

pub struct HttpBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.trim().is_empty() {
            // Missing credentials surface as the remote's 401, not eagerly.
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    fn build_payload(&self, request: &GenerationRequest) -> BackendResult<SubmitRequest> {
        let source_image = match &request.params.source_image {
            Some(path) => Some(encode_image(path)?),
            None => None,
        };
        Ok(SubmitRequest {
            kind: request.kind.as_str().to_string(),
            prompt: request.prompt.clone(),
            model: request.params.model.clone(),
            duration_secs: request.params.duration_secs,
            resolution: request.params.resolution.clone(),
            source_image,
            variations: request.params.variations,
        })
    }

    /// Download a produced artifact to a local file.
    pub async fn download(&self, url: &str, dest: &Path) -> BackendResult<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(classify(
                response.status(),
                format!("download failed: {}", response.status()),
            ));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        if let Some(dir) = dest.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| BackendError::Permanent(format!("create output dir: {}", e)))?;
        }
        std::fs::write(dest, bytes)
            .map_err(|e| BackendError::Permanent(format!("write artifact: {}", e)))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HttpBackend {
    fn name(&self) -> &str {
        "velqis"
    }

    async fn is_available(&self) -> bool {
        let req = self.client.get(format!("{}/status", self.base_url));
        match self.authorize(req).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn submit(&self, request: &GenerationRequest) -> BackendResult<RemoteJobId> {
        let payload = self.build_payload(request)?;
        let req = self
            .client
            .post(format!("{}/generations", self.base_url))
            .json(&payload);

        let response = self.authorize(req).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify(status, error_body(response).await));
        }

        let accepted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("malformed submit response: {}", e)))?;
        Ok(RemoteJobId(accepted.id))
    }

    async fn poll(&self, job: &RemoteJobId) -> BackendResult<RemoteJobState> {
        let req = self
            .client
            .get(format!("{}/generations/{}", self.base_url, job.0));

        let response = self.authorize(req).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify(status, error_body(response).await));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("malformed status response: {}", e)))?;
        Ok(body.into_state())
    }

    async fn cancel(&self, job: &RemoteJobId) -> BackendResult<()> {
        let req = self
            .client
            .post(format!("{}/generations/{}/cancel", self.base_url, job.0));
        self.authorize(req).send().await.map_err(transport_error)?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    BackendError::Transient(err.to_string())
}

/// 5xx responses are retryable, everything else in the error range is not.
fn classify(status: reqwest::StatusCode, message: String) -> BackendError {
    if status.is_server_error() {
        BackendError::Transient(format!("{}: {}", status, message))
    } else {
        BackendError::Permanent(format!("{}: {}", status, message))
    }
}

async fn error_body(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(parsed) => parsed.error,
        Err(_) => text,
    }
}

fn encode_image(path: &Path) -> BackendResult<String> {
    use base64::Engine;
    let bytes = std::fs::read(path)
        .map_err(|e| BackendError::Permanent(format!("read source image {}: {}", path.display(), e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
}

#[derive(Debug, Serialize)]
struct SubmitRequest {
    kind: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variations: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    result_url: Option<String>,
    error: Option<String>,
}

impl StatusResponse {
    fn into_state(self) -> RemoteJobState {
        match self.status.as_str() {
            "processing" => RemoteJobState::Processing,
            "done" => RemoteJobState::Done {
                result_url: self.result_url.unwrap_or_default(),
            },
            "error" => RemoteJobState::Error {
                message: self
                    .error
                    .unwrap_or_else(|| "remote job failed".to_string()),
            },
            // "queued" and anything unrecognized: not started yet
            _ => RemoteJobState::Queued,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{GenerationKind, GenerationParams};

    #[test]
    fn test_backend_creation_strips_trailing_slash() {
        let backend = HttpBackend::new("https://api.velqis.ai/v1/", "sk-test");
        assert_eq!(backend.base_url, "https://api.velqis.ai/v1");
        assert_eq!(backend.name(), "velqis");
    }

    #[test]
    fn test_submit_request_serialization() {
        let request = GenerationRequest::new(
            GenerationKind::Video,
            "a fox in the snow".to_string(),
            GenerationParams::new()
                .with_model("runway")
                .with_duration_secs(5)
                .with_resolution("1080p"),
        );
        let backend = HttpBackend::new("https://api.velqis.ai/v1", "");
        let payload = backend.build_payload(&request).unwrap();

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"video\""));
        assert!(json.contains("a fox in the snow"));
        assert!(json.contains("runway"));
        // absent options are omitted entirely
        assert!(!json.contains("source_image"));
        assert!(!json.contains("variations"));
    }

    #[test]
    fn test_status_response_mapping() {
        let queued: StatusResponse =
            serde_json::from_str(r#"{"status": "queued", "result_url": null, "error": null}"#)
                .unwrap();
        assert_eq!(queued.into_state(), RemoteJobState::Queued);

        let done: StatusResponse = serde_json::from_str(
            r#"{"status": "done", "result_url": "https://cdn.velqis.ai/out.mp4", "error": null}"#,
        )
        .unwrap();
        assert_eq!(
            done.into_state(),
            RemoteJobState::Done {
                result_url: "https://cdn.velqis.ai/out.mp4".to_string()
            }
        );

        let failed: StatusResponse =
            serde_json::from_str(r#"{"status": "error", "error": "nsfw prompt"}"#).unwrap();
        assert_eq!(
            failed.into_state(),
            RemoteJobState::Error {
                message: "nsfw prompt".to_string()
            }
        );
    }

    #[test]
    fn test_classify_status_codes() {
        let transient = classify(reqwest::StatusCode::BAD_GATEWAY, "oops".to_string());
        assert!(matches!(transient, BackendError::Transient(_)));

        let permanent = classify(reqwest::StatusCode::UNAUTHORIZED, "bad key".to_string());
        assert!(matches!(permanent, BackendError::Permanent(_)));
    }
}
