//! Reserved in-band markers emitted by the completion backend
//!
//! The model embeds these tokens in its reply to signal UI conditions.
//! They are never shown or spoken; they become structured flags instead.

use std::sync::LazyLock;

use regex::Regex;

/// Suggests the user photograph an injury or rash
pub const CAMERA_MARKER: &str = "[SHOW_CAMERA_BUTTON]";

/// Signals a medical emergency (call 108)
pub const EMERGENCY_MARKER: &str = "[LAASYA_EMERGENCY_108]";

/// All reserved markers
pub const MARKERS: [&str; 2] = [CAMERA_MARKER, EMERGENCY_MARKER];

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Flags recovered from markers in a finished reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyFlags {
    /// Reply contained [`CAMERA_MARKER`]
    pub show_camera: bool,
    /// Reply contained [`EMERGENCY_MARKER`]
    pub emergency: bool,
}

/// Remove every reserved marker, leaving all other text untouched
#[must_use]
pub fn strip_markers(text: &str) -> String {
    let mut out = text.to_string();
    for marker in MARKERS {
        if out.contains(marker) {
            out = out.replace(marker, "");
        }
    }
    out
}

/// Prepare text for synthesis: drop markers and markup tags, then trim
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    let without_markers = strip_markers(text);
    MARKUP_TAG
        .replace_all(&without_markers, "")
        .trim()
        .to_string()
}

/// Split a finished reply into display text and marker flags
#[must_use]
pub fn parse_reply(text: &str) -> (String, ReplyFlags) {
    let flags = ReplyFlags {
        show_camera: text.contains(CAMERA_MARKER),
        emergency: text.contains(EMERGENCY_MARKER),
    };
    (strip_markers(text).trim().to_string(), flags)
}

/// Whether `text` ends inside a `[` that has not been closed yet
///
/// Streamed markers can arrive split across fragments; speech for such
/// text is held back until the bracket closes.
#[must_use]
pub fn has_open_bracket(text: &str) -> bool {
    match (text.rfind('['), text.rfind(']')) {
        (Some(open), Some(close)) => open > close,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Cut a trailing unclosed `[` run, the remains of a half-received marker
#[must_use]
pub fn trim_open_bracket(text: &str) -> &str {
    if !has_open_bracket(text) {
        return text;
    }
    text.rfind('[').map_or(text, |open| &text[..open])
}
