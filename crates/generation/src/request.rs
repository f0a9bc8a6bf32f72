use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{GenerationError, RequestId, Result};

pub const MAX_VIDEO_PROMPT: usize = 500;
pub const MAX_IMAGE_PROMPT: usize = 400;
pub const MAX_MUSIC_PROMPT: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Video,
    Image,
    Music,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Music => "music",
        }
    }

    /// Maximum prompt length in characters for this kind.
    pub fn max_prompt_len(&self) -> usize {
        match self {
            Self::Video => MAX_VIDEO_PROMPT,
            Self::Image => MAX_IMAGE_PROMPT,
            Self::Music => MAX_MUSIC_PROMPT,
        }
    }
}

impl std::fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GenerationKind {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "image" => Ok(Self::Image),
            "music" => Ok(Self::Music),
            other => Err(GenerationError::Validation(format!(
                "unknown generation kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Created locally, not yet accepted by the remote service.
    Pending,
    /// Accepted by the remote service, awaiting processing.
    Submitted,
    /// Remote service has begun processing.
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a terminal failure, mirrored into `error_detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network failure, timeout or 5xx response; retry budget exhausted.
    TransientRemote,
    /// 4xx-class response or remote job error; never retried.
    PermanentRemote,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientRemote => "transient_remote",
            Self::PermanentRemote => "permanent_remote",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub class: ErrorClass,
    pub message: String,
}

impl ErrorDetail {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::TransientRemote,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::PermanentRemote,
            message: message.into(),
        }
    }
}

/// Kind-specific generation options. Unset fields fall back to the remote
/// service's defaults; local validation covers only what the UI constrains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Model identifier, e.g. "runway" or "flux".
    pub model: Option<String>,

    /// Clip length in seconds (video, music).
    pub duration_secs: Option<u32>,

    /// Named resolution preset, e.g. "1080p" or "Square" (video, image).
    pub resolution: Option<String>,

    /// Source image for image-to-video generation.
    pub source_image: Option<PathBuf>,

    /// Number of variations to produce (image, 1-4).
    pub variations: Option<u32>,
}

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_duration_secs(mut self, secs: u32) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_resolution(mut self, name: impl Into<String>) -> Self {
        self.resolution = Some(name.into());
        self
    }

    pub fn with_source_image(mut self, path: PathBuf) -> Self {
        self.source_image = Some(path);
        self
    }

    pub fn with_variations(mut self, n: u32) -> Self {
        self.variations = Some(n);
        self
    }
}

/// One tracked generation request. `result_ref` and `error_detail` are
/// mutually exclusive and stay unset until a terminal state is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: RequestId,
    pub kind: GenerationKind,
    pub prompt: String,
    pub params: GenerationParams,
    pub status: RequestStatus,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub result_ref: Option<String>,
    pub error_detail: Option<ErrorDetail>,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, prompt: String, params: GenerationParams) -> Self {
        Self {
            id: RequestId::new(),
            kind,
            prompt,
            params,
            status: RequestStatus::Pending,
            created_at: current_timestamp(),
            completed_at: None,
            result_ref: None,
            error_detail: None,
        }
    }
}

/// Trim and bounds-check a prompt for the given kind. Returns the trimmed
/// prompt that will actually be submitted.
pub fn validate_prompt(kind: GenerationKind, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::Validation("prompt is empty".to_string()));
    }
    let len = trimmed.chars().count();
    let max = kind.max_prompt_len();
    if len > max {
        return Err(GenerationError::Validation(format!(
            "{} prompt too long: {} chars (max {})",
            kind, len, max
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_bounds_per_kind() {
        for (kind, max) in [
            (GenerationKind::Video, MAX_VIDEO_PROMPT),
            (GenerationKind::Image, MAX_IMAGE_PROMPT),
            (GenerationKind::Music, MAX_MUSIC_PROMPT),
        ] {
            let at_bound = "x".repeat(max);
            assert_eq!(validate_prompt(kind, &at_bound).unwrap(), at_bound);

            let over = "x".repeat(max + 1);
            assert!(validate_prompt(kind, &over).is_err());
        }
    }

    #[test]
    fn test_prompt_trimmed_before_bounds_check() {
        let padded = format!("  {}  ", "x".repeat(MAX_VIDEO_PROMPT));
        let validated = validate_prompt(GenerationKind::Video, &padded).unwrap();
        assert_eq!(validated.chars().count(), MAX_VIDEO_PROMPT);
    }

    #[test]
    fn test_empty_prompt_rejected() {
        for raw in ["", "   ", "\n\t"] {
            assert!(validate_prompt(GenerationKind::Image, raw).is_err());
        }
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            GenerationKind::Video,
            GenerationKind::Image,
            GenerationKind::Music,
        ] {
            let parsed: GenerationKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("audio".parse::<GenerationKind>().is_err());
    }

    #[test]
    fn test_new_request_starts_pending() {
        let req = GenerationRequest::new(
            GenerationKind::Music,
            "lofi beats".to_string(),
            GenerationParams::new().with_duration_secs(30),
        );
        assert_eq!(req.status, RequestStatus::Pending);
        assert!(req.completed_at.is_none());
        assert!(req.result_ref.is_none());
        assert!(req.error_detail.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Submitted.is_terminal());
        assert!(!RequestStatus::Running.is_terminal());
        assert!(RequestStatus::Succeeded.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }
}
