use crate::GenerationKind;

/// Model catalog per kind: (identifier, display name). The identifier is
/// what gets sent to the remote service; unknown identifiers are forwarded
/// as-is and rejected remotely if unsupported.
pub const VIDEO_MODELS: &[(&str, &str)] = &[
    ("runway", "Runway Gen-3"),
    ("stable", "Stable Video Diffusion"),
    ("pika", "Pika Labs 1.0"),
    ("zeroscope", "Zeroscope XL"),
    ("velqis", "Velqis Video Pro"),
];

pub const IMAGE_MODELS: &[(&str, &str)] = &[
    ("flux", "Flux Pro 1.1"),
    ("sdxl", "Stable Diffusion XL"),
    ("dalle", "DALL-E 3"),
    ("midjourney", "Midjourney v6"),
    ("velqis", "Velqis Image Pro"),
];

pub const MUSIC_MODELS: &[(&str, &str)] = &[
    ("musicgen", "Meta MusicGen"),
    ("suno", "Suno v3.5"),
    ("mubert", "Mubert AI"),
    ("velqis", "Velqis Music Pro"),
];

pub const VIDEO_DURATIONS: &[u32] = &[3, 5, 10, 15, 30];
pub const MUSIC_DURATIONS: &[u32] = &[10, 15, 30, 60, 120, 180];

pub const MAX_IMAGE_VARIATIONS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

pub const VIDEO_RESOLUTIONS: &[(&str, Resolution)] = &[
    (
        "720p",
        Resolution {
            width: 1280,
            height: 720,
        },
    ),
    (
        "1080p",
        Resolution {
            width: 1920,
            height: 1080,
        },
    ),
    (
        "4K",
        Resolution {
            width: 3840,
            height: 2160,
        },
    ),
];

pub const IMAGE_RESOLUTIONS: &[(&str, Resolution)] = &[
    (
        "Square",
        Resolution {
            width: 1024,
            height: 1024,
        },
    ),
    (
        "Portrait",
        Resolution {
            width: 768,
            height: 1344,
        },
    ),
    (
        "Landscape",
        Resolution {
            width: 1344,
            height: 768,
        },
    ),
    (
        "Wide",
        Resolution {
            width: 1536,
            height: 640,
        },
    ),
];

pub fn models(kind: GenerationKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        GenerationKind::Video => VIDEO_MODELS,
        GenerationKind::Image => IMAGE_MODELS,
        GenerationKind::Music => MUSIC_MODELS,
    }
}

pub fn model_display_name(kind: GenerationKind, id: &str) -> Option<&'static str> {
    models(kind)
        .iter()
        .find(|(model_id, _)| *model_id == id)
        .map(|(_, name)| *name)
}

/// Look up a named resolution preset for the given kind. Music has none.
pub fn resolution(kind: GenerationKind, name: &str) -> Option<Resolution> {
    let table = match kind {
        GenerationKind::Video => VIDEO_RESOLUTIONS,
        GenerationKind::Image => IMAGE_RESOLUTIONS,
        GenerationKind::Music => return None,
    };
    table
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, res)| *res)
}

/// Default artifact file extension when the result URL carries none.
pub fn default_extension(kind: GenerationKind) -> &'static str {
    match kind {
        GenerationKind::Video => "mp4",
        GenerationKind::Image => "png",
        GenerationKind::Music => "mp3",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_models() {
        for kind in [
            GenerationKind::Video,
            GenerationKind::Image,
            GenerationKind::Music,
        ] {
            assert!(!models(kind).is_empty());
        }
    }

    #[test]
    fn test_model_lookup() {
        assert_eq!(
            model_display_name(GenerationKind::Image, "flux"),
            Some("Flux Pro 1.1")
        );
        assert_eq!(model_display_name(GenerationKind::Image, "nope"), None);
    }

    #[test]
    fn test_resolution_lookup() {
        let res = resolution(GenerationKind::Video, "1080p").unwrap();
        assert_eq!(res.width, 1920);
        assert_eq!(res.height, 1080);
        assert!(resolution(GenerationKind::Music, "1080p").is_none());
        assert!(resolution(GenerationKind::Image, "1080p").is_none());
    }
}
