use std::time::Duration;

/// Pacing of the artificial typing animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPacing {
    pub chunk_chars: usize,
    pub base_delay: Duration,
    pub period_delay: Duration,
    pub comma_delay: Duration,
}

impl Default for PlaybackPacing {
    fn default() -> Self {
        Self {
            chunk_chars: 4,
            base_delay: Duration::from_millis(10),
            period_delay: Duration::from_millis(30),
            comma_delay: Duration::from_millis(20),
        }
    }
}

/// One step of the animation: the text revealed so far and the pause after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub revealed: &'a str,
    pub delay: Duration,
}

impl PlaybackPacing {
    /// No pauses at all; same frames.
    pub fn instant() -> Self {
        Self {
            base_delay: Duration::ZERO,
            period_delay: Duration::ZERO,
            comma_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Commas take precedence over periods when a slice has both.
    pub fn delay_for(&self, slice: &str) -> Duration {
        if slice.contains(',') {
            self.comma_delay
        } else if slice.contains('.') {
            self.period_delay
        } else {
            self.base_delay
        }
    }

    /// Cumulative prefixes of `text`, cut every `chunk_chars` characters.
    pub fn frames<'a>(&self, text: &'a str) -> Vec<Frame<'a>> {
        let chunk = self.chunk_chars.max(1);
        let mut frames = Vec::new();
        let mut start = 0;
        let mut count = 0;

        for (index, ch) in text.char_indices() {
            count += 1;
            if count == chunk {
                let end = index + ch.len_utf8();
                frames.push(Frame {
                    revealed: &text[..end],
                    delay: self.delay_for(&text[start..end]),
                });
                start = end;
                count = 0;
            }
        }
        if start < text.len() {
            frames.push(Frame {
                revealed: text,
                delay: self.delay_for(&text[start..]),
            });
        }
        frames
    }
}

/// Reveal `text` slice by slice, pausing between writes. Every call to
/// `on_frame` carries the full prefix, so the last write always wins.
pub async fn play<F>(text: &str, pacing: &PlaybackPacing, mut on_frame: F)
where
    F: FnMut(&str),
{
    for frame in pacing.frames(text) {
        on_frame(frame.revealed);
        if !frame.delay.is_zero() {
            tokio::time::sleep(frame.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_cumulative_four_char_slices() {
        let pacing = PlaybackPacing::default();
        let frames = pacing.frames("Hello world");
        let revealed: Vec<&str> = frames.iter().map(|f| f.revealed).collect();
        assert_eq!(revealed, vec!["Hell", "Hello wo", "Hello world"]);
    }

    #[test]
    fn test_punctuation_pacing() {
        let pacing = PlaybackPacing::default();
        assert_eq!(pacing.delay_for("abcd"), Duration::from_millis(10));
        assert_eq!(pacing.delay_for("ab. "), Duration::from_millis(30));
        assert_eq!(pacing.delay_for("a, b"), Duration::from_millis(20));
        assert_eq!(pacing.delay_for("a.,b"), Duration::from_millis(20));
    }

    #[test]
    fn test_frames_never_split_a_character() {
        let pacing = PlaybackPacing::default();
        let text = "café crème";
        let frames = pacing.frames(text);
        assert_eq!(frames[0].revealed, "café");
        assert_eq!(frames.last().unwrap().revealed, text);
    }

    #[test]
    fn test_empty_text_has_no_frames() {
        assert!(PlaybackPacing::default().frames("").is_empty());
    }

    #[tokio::test]
    async fn test_play_ends_with_full_text() {
        let mut writes = Vec::new();
        play("Use OAuth, then refresh.", &PlaybackPacing::instant(), |s| {
            writes.push(s.to_string())
        })
        .await;
        assert_eq!(writes.len(), 6);
        assert_eq!(writes.last().unwrap(), "Use OAuth, then refresh.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_sleeps_between_slices() {
        let start = tokio::time::Instant::now();
        play("abcd, x.", &PlaybackPacing::default(), |_| {}).await;
        // "abcd" 10ms, ", x." 20ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
