//! Domain values exchanged with a renderer.

use std::fmt;

use soap_client::DidlItem;

use crate::error::CommandError;

/// Playback state of a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayState {
    Playing,
    Paused,
    Idle,
    Buffering,
    Finished,
    Unknown,
}

impl PlayState {
    /// Map an AVTransport `TransportState`. Unrecognized states, including
    /// the recording ones, are `Unknown`.
    pub fn from_transport_state(state: &str) -> Self {
        match state.trim() {
            "PLAYING" => PlayState::Playing,
            "PAUSED_PLAYBACK" => PlayState::Paused,
            "STOPPED" => PlayState::Finished,
            "TRANSITIONING" => PlayState::Buffering,
            "NO_MEDIA_PRESENT" => PlayState::Idle,
            _ => PlayState::Unknown,
        }
    }
}

/// Metadata of the item a renderer is currently playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    /// UPnP class, e.g. `object.item.videoItem`
    pub class: Option<String>,
}

impl MediaInfo {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .map_or(false, |mime| mime.starts_with("image/"))
    }
}

impl From<DidlItem> for MediaInfo {
    fn from(item: DidlItem) -> Self {
        Self {
            mime_type: item.mime_type().map(str::to_string),
            url: item.url,
            title: item.title,
            description: item.description,
            icon_url: item.icon_url,
            class: item.class,
        }
    }
}

/// A validated `type/subtype` MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    top_level: String,
    subtype: String,
}

impl MimeType {
    /// Both halves must be non-empty. An `mp3` subtype is rewritten to
    /// `mpeg`, the name renderers expect.
    pub fn parse(mime_type: &str) -> Result<Self, CommandError> {
        let invalid = || CommandError::InvalidArgument(format!("Invalid MIME type: {mime_type:?}"));

        let (top_level, subtype) = mime_type.trim().split_once('/').ok_or_else(invalid)?;
        let (top_level, subtype) = (top_level.trim(), subtype.trim());
        if top_level.is_empty() || subtype.is_empty() || subtype.contains('/') {
            return Err(invalid());
        }

        let subtype = if subtype.eq_ignore_ascii_case("mp3") {
            "mpeg"
        } else {
            subtype
        };

        Ok(Self {
            top_level: top_level.to_string(),
            subtype: subtype.to_string(),
        })
    }

    pub fn top_level(&self) -> &str {
        &self.top_level
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.top_level, self.subtype)
    }
}

/// An item to hand to the renderer with `display_media`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub url: String,
    pub mime_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
}

impl MediaRequest {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            title: None,
            description: None,
            icon_url: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn icon_url(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }
}

/// Wire percentage (0-100) for a volume in [0, 1].
pub(crate) fn volume_to_percent(volume: f32) -> Result<u8, CommandError> {
    if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
        return Err(CommandError::InvalidArgument(format!(
            "Volume must be within [0, 1], got {volume}"
        )));
    }
    Ok((volume * 100.0).round() as u8)
}

/// Volume in [0, 1] for a wire percentage. Out-of-range values some
/// renderers report are clamped.
pub(crate) fn percent_to_volume(percent: i64) -> f32 {
    percent.clamp(0, 100) as f32 / 100.0
}

/// `current` moved by `delta`, clamped to [0, 1].
pub(crate) fn step_volume(current: f32, delta: f32) -> f32 {
    (current + delta).clamp(0.0, 1.0)
}

/// UPnP booleans: `1`/`0`, `true`/`false`, `yes`/`no`.
pub(crate) fn parse_upnp_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
