//! Prosodic chunking of streamed reply text
//!
//! The first fragment of a reply is spoken at once to cut perceived
//! latency. Later fragments accumulate until the buffer reaches a natural
//! pause, so synthesis works on phrase-sized pieces.

use crate::markers::has_open_bracket;

/// Buffers longer than this are spoken even without punctuation
pub const CHUNK_CHAR_THRESHOLD: usize = 80;

/// Buffers this short are held back
pub const MIN_CHUNK_CHARS: usize = 5;

/// Sentence and clause punctuation in Latin and Indic scripts
const BOUNDARY_CHARS: [char; 6] = ['.', '?', '!', ',', '।', '॥'];

/// Whether buffered text ends at a point worth speaking
///
/// Text inside an unclosed `[` is never a pause: it may be a marker split
/// across fragments.
#[must_use]
pub fn is_natural_pause(text: &str) -> bool {
    let trimmed = text.trim_end();
    let len = trimmed.chars().count();

    if len <= MIN_CHUNK_CHARS || has_open_bracket(trimmed) {
        return false;
    }

    trimmed.ends_with(BOUNDARY_CHARS) || len > CHUNK_CHAR_THRESHOLD
}

/// Splits a fragment stream into speakable chunks
///
/// Every pushed character leaves through exactly one returned chunk, in order.
#[derive(Debug, Default)]
pub struct SpeechChunker {
    buffer: String,
    started: bool,
}

impl SpeechChunker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment, returning text ready to speak
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }

        if !self.started {
            self.started = true;
            if !has_open_bracket(fragment) {
                return Some(fragment.to_string());
            }
        }

        self.buffer.push_str(fragment);
        if is_natural_pause(&self.buffer) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Take whatever is left once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() { None } else { Some(rest) }
    }

    /// Text held back so far
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_pause() {
        assert!(is_natural_pause("మైందండి. "));
        assert!(is_natural_pause("ఏమైందండి?"));
        assert!(is_natural_pause("జ్వరం ఉంది।"));
        assert!(!is_natural_pause("ok."));
        assert!(!is_natural_pause("మైందండి"));
        assert!(is_natural_pause(&"అ".repeat(81)));
        assert!(!is_natural_pause(&"అ".repeat(80)));
        assert!(!is_natural_pause("call now. [LAASYA_EMERGENCY"));
    }

    #[test]
    fn test_reply_chunks() {
        let mut chunker = SpeechChunker::new();
        let mut spoken: Vec<String> = ["అర్థ", "మైందండి", ". ", "తులసి కషాయం తాగండి."]
            .into_iter()
            .filter_map(|f| chunker.push(f))
            .collect();
        spoken.extend(chunker.finish());

        assert_eq!(spoken, vec!["అర్థ", "మైందండి. ", "తులసి కషాయం తాగండి."]);
    }

    #[test]
    fn test_finish_flushes_tail() {
        let mut chunker = SpeechChunker::new();
        assert_eq!(chunker.push("మొదట").as_deref(), Some("మొదట"));
        assert!(chunker.push(" తర్వాత").is_none());
        assert_eq!(chunker.pending(), " తర్వాత");
        assert_eq!(chunker.finish().as_deref(), Some(" తర్వాత"));
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_split_marker_is_held() {
        let mut chunker = SpeechChunker::new();
        chunker.push("వెంటనే 108 కి కాల్ చేయండి!");
        assert!(chunker.push(" [LAASYA_EMER").is_none());
        assert_eq!(
            chunker.push("GENCY_108]!").as_deref(),
            Some(" [LAASYA_EMERGENCY_108]!")
        );
    }

    #[test]
    fn test_every_character_spoken_once() {
        let fragments = ["నా", "కు ", "జలుబు", "గా ఉంది, ", "ఏం చేయాలి?", " సరే"];
        let mut chunker = SpeechChunker::new();
        let mut spoken = String::new();
        for fragment in fragments {
            if let Some(chunk) = chunker.push(fragment) {
                spoken.push_str(&chunk);
            }
        }
        if let Some(rest) = chunker.finish() {
            spoken.push_str(&rest);
        }
        assert_eq!(spoken, fragments.concat());
    }
}
