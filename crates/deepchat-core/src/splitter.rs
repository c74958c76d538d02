//! Thinking/answer partitioning of a streamed model response.
//!
//! Reasoning models wrap their chain of thought in a pair of literal markers
//! (`<think>` ... `</think>`) ahead of the final answer. [`StreamSplitter`]
//! consumes the response fragment by fragment and keeps the two segments
//! apart, producing a live [`SplitEvent`] after each fragment so the thinking
//! region and the answer can both be rendered progressively.
//!
//! Markers may be cut anywhere by fragment boundaries. The splitter holds back
//! the longest tail of unprocessed text that could still turn into a marker and
//! only releases it once the next fragment proves otherwise, so partial marker
//! text never reaches the visible buffers.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Error;

pub const DEFAULT_OPEN_MARKER: &str = "<think>";
pub const DEFAULT_CLOSE_MARKER: &str = "</think>";

/// Opening and closing markers around the thinking segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markers {
    pub open: String,
    pub close: String,
}

impl Markers {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Both markers must be non-empty and distinct.
    pub fn validate(&self) -> Result<(), Error> {
        if self.open.is_empty() || self.close.is_empty() {
            return Err(Error::config("thinking markers must not be empty"));
        }
        if self.open == self.close {
            return Err(Error::config(format!(
                "opening and closing markers are both {:?}",
                self.open
            )));
        }
        Ok(())
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_MARKER, DEFAULT_CLOSE_MARKER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Thinking,
    Answer,
}

/// Live update produced while a response streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitEvent {
    /// Marker-free thinking text received so far.
    Thinking(String),
    /// The closing marker arrived; carries the final thinking text.
    ThinkingComplete(String),
    /// Answer text received so far.
    Answer(String),
}

/// Final result of a split stream. Both halves are marker-free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitOutput {
    pub thinking: String,
    pub answer: String,
}

impl SplitOutput {
    /// Thinking followed by answer, with no separator.
    pub fn combined(&self) -> String {
        format!("{}{}", self.thinking, self.answer)
    }
}

pub struct StreamSplitter {
    markers: Markers,
    phase: Phase,
    thinking: String,
    answer: String,
    /// Thinking-phase text not yet classified (may begin a marker).
    pending: String,
    /// Set once reasoning has arrived on a separate channel.
    channel_thinking: bool,
}

impl StreamSplitter {
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            phase: Phase::Thinking,
            thinking: String::new(),
            answer: String::new(),
            pending: String::new(),
            channel_thinking: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Feed one fragment of model output.
    pub fn push(&mut self, fragment: &str) -> Vec<SplitEvent> {
        if fragment.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();

        // Reasoning that came on its own channel ends at the first content delta.
        if self.phase == Phase::Thinking && self.channel_thinking {
            self.finish_thinking(&mut events);
        }

        if self.phase == Phase::Answer {
            self.answer.push_str(fragment);
            events.push(SplitEvent::Answer(self.answer.clone()));
            return events;
        }

        self.pending.push_str(fragment);
        let mut saw_open = false;

        loop {
            let open_at = find_marker(&self.pending, &self.markers.open);
            let close_at = find_marker(&self.pending, &self.markers.close);

            let open_first = match (open_at, close_at) {
                (Some(o), Some(c)) => {
                    o < c || (o == c && self.markers.open.len() > self.markers.close.len())
                }
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if open_first {
                let at = open_at.unwrap_or_default();
                self.thinking.push_str(&self.pending[..at]);
                self.pending.drain(..at + self.markers.open.len());
                saw_open = true;
                trace!("Opening marker consumed");
            } else {
                let at = close_at.unwrap_or_default();
                self.thinking.push_str(&self.pending[..at]);
                self.pending.drain(..at + self.markers.close.len());
                let rest = std::mem::take(&mut self.pending);

                self.phase = Phase::Answer;
                debug!(thinking_len = self.thinking.len(), "Closing marker consumed");
                events.push(SplitEvent::ThinkingComplete(self.thinking.clone()));

                if !rest.is_empty() {
                    self.answer.push_str(&rest);
                    events.push(SplitEvent::Answer(self.answer.clone()));
                }
                return events;
            }
        }

        let release = self.pending.len() - self.held_back_len();
        self.thinking.push_str(&self.pending[..release]);
        self.pending.drain(..release);

        if !saw_open {
            events.push(SplitEvent::Thinking(self.thinking.clone()));
        }
        events
    }

    /// Feed reasoning text that the backend delivered outside the content stream.
    pub fn push_thinking(&mut self, text: &str) -> Vec<SplitEvent> {
        if text.is_empty() {
            return Vec::new();
        }
        if self.phase == Phase::Answer {
            debug!("Reasoning delta after the answer started; appending to thinking");
        }

        self.channel_thinking = true;
        let pending = std::mem::take(&mut self.pending);
        self.thinking.push_str(&pending);
        self.thinking.push_str(text);
        vec![SplitEvent::Thinking(self.thinking.clone())]
    }

    /// Release held-back text as plain text once no more input will arrive.
    /// Returns a fresh snapshot if anything was released.
    pub fn flush(&mut self) -> Option<SplitEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        trace!(len = pending.len(), "Releasing held-back text");
        match self.phase {
            Phase::Thinking => {
                self.thinking.push_str(&pending);
                Some(SplitEvent::Thinking(self.thinking.clone()))
            }
            Phase::Answer => {
                self.answer.push_str(&pending);
                Some(SplitEvent::Answer(self.answer.clone()))
            }
        }
    }

    /// End of stream. Held-back text is released as plain text.
    pub fn finish(mut self) -> SplitOutput {
        self.flush();
        SplitOutput {
            thinking: self.thinking,
            answer: self.answer,
        }
    }

    fn finish_thinking(&mut self, events: &mut Vec<SplitEvent>) {
        let pending = std::mem::take(&mut self.pending);
        self.thinking.push_str(&pending);
        self.phase = Phase::Answer;
        events.push(SplitEvent::ThinkingComplete(self.thinking.clone()));
    }

    /// Length of the longest tail of `pending` that is a proper prefix of a marker.
    fn held_back_len(&self) -> usize {
        partial_marker_suffix(&self.pending, &self.markers.open)
            .max(partial_marker_suffix(&self.pending, &self.markers.close))
    }
}

impl Default for StreamSplitter {
    fn default() -> Self {
        Self::new(Markers::default())
    }
}

fn find_marker(haystack: &str, marker: &str) -> Option<usize> {
    if marker.is_empty() {
        None
    } else {
        haystack.find(marker)
    }
}

fn partial_marker_suffix(text: &str, marker: &str) -> usize {
    marker
        .char_indices()
        .skip(1)
        .map(|(i, _)| i)
        .filter(|&i| text.ends_with(&marker[..i]))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(fragments: &[&str]) -> (Vec<SplitEvent>, SplitOutput) {
        let mut splitter = StreamSplitter::default();
        let mut events = Vec::new();
        for fragment in fragments {
            events.extend(splitter.push(fragment));
        }
        (events, splitter.finish())
    }

    #[test]
    fn test_single_fragment() {
        let (_, out) = split_all(&["<think>ABC</think>DEF"]);
        assert_eq!(out.thinking, "ABC");
        assert_eq!(out.answer, "DEF");
        assert_eq!(out.combined(), "ABCDEF");
    }

    #[test]
    fn test_every_two_way_split() {
        let text = "<think>ABC</think>DEF";
        for at in 1..text.len() {
            let (_, out) = split_all(&[&text[..at], &text[at..]]);
            assert_eq!(out.thinking, "ABC", "split at {}", at);
            assert_eq!(out.answer, "DEF", "split at {}", at);
        }
    }

    #[test]
    fn test_char_by_char() {
        let text = "<think>ABC</think>DEF";
        let chars: Vec<String> = text.chars().map(|c| c.to_string()).collect();
        let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
        let (events, out) = split_all(&fragments);

        assert_eq!(out.thinking, "ABC");
        assert_eq!(out.answer, "DEF");
        for event in &events {
            if let SplitEvent::Thinking(text) = event {
                assert!(!text.contains('<'), "leaked marker text: {:?}", text);
            }
        }
    }

    #[test]
    fn test_live_events() {
        let (events, out) = split_all(&["<think>", "reasoning", "</think>", "Hi there"]);
        assert_eq!(
            events,
            vec![
                SplitEvent::Thinking("reasoning".to_string()),
                SplitEvent::ThinkingComplete("reasoning".to_string()),
                SplitEvent::Answer("Hi there".to_string()),
            ]
        );
        assert_eq!(out.combined(), "reasoningHi there");
    }

    #[test]
    fn test_opening_fragment_is_not_rendered() {
        let mut splitter = StreamSplitter::default();
        assert!(splitter.push("<think>Hel").is_empty());
        assert_eq!(
            splitter.push("lo"),
            vec![SplitEvent::Thinking("Hello".to_string())]
        );
    }

    #[test]
    fn test_close_marker_split_across_fragments() {
        let mut splitter = StreamSplitter::default();
        splitter.push("<think>");
        assert_eq!(
            splitter.push("ABC</thi"),
            vec![SplitEvent::Thinking("ABC".to_string())]
        );
        assert_eq!(
            splitter.push("nk>DEF"),
            vec![
                SplitEvent::ThinkingComplete("ABC".to_string()),
                SplitEvent::Answer("DEF".to_string()),
            ]
        );
        assert_eq!(splitter.phase(), Phase::Answer);
    }

    #[test]
    fn test_lookalike_text_is_released() {
        let (_, out) = split_all(&["<think>a <", " b", "</think>", "x < y"]);
        assert_eq!(out.thinking, "a < b");
        assert_eq!(out.answer, "x < y");
    }

    #[test]
    fn test_no_closing_marker() {
        let (events, out) = split_all(&["<think>", "partial", " thought"]);
        assert_eq!(out.thinking, "partial thought");
        assert_eq!(out.answer, "");
        assert!(events
            .iter()
            .all(|e| matches!(e, SplitEvent::Thinking(_))));
    }

    #[test]
    fn test_dangling_marker_prefix_flushed_on_finish() {
        let (_, out) = split_all(&["<think>x</thi"]);
        assert_eq!(out.thinking, "x</thi");
        assert_eq!(out.answer, "");
    }

    #[test]
    fn test_flush_reports_released_tail() {
        let mut splitter = StreamSplitter::default();
        splitter.push("<think>");
        assert_eq!(
            splitter.push("is a <"),
            vec![SplitEvent::Thinking("is a ".to_string())]
        );
        assert_eq!(
            splitter.flush(),
            Some(SplitEvent::Thinking("is a <".to_string()))
        );
        assert_eq!(splitter.flush(), None);
        assert_eq!(splitter.finish().thinking, "is a <");

        let mut splitter = StreamSplitter::default();
        splitter.push("<think>done</think>ok");
        assert_eq!(splitter.flush(), None);
    }

    #[test]
    fn test_empty_fragment_is_noop() {
        let mut splitter = StreamSplitter::default();
        assert!(splitter.push("").is_empty());
        splitter.push("<think>abc");
        assert!(splitter.push("").is_empty());
        assert_eq!(splitter.thinking(), "abc");
        assert_eq!(splitter.phase(), Phase::Thinking);
    }

    #[test]
    fn test_empty_stream() {
        let out = StreamSplitter::default().finish();
        assert_eq!(out, SplitOutput::default());
    }

    #[test]
    fn test_answer_phase_keeps_text_verbatim() {
        let (_, out) = split_all(&["<think>t</think>", "use <think> tags"]);
        assert_eq!(out.thinking, "t");
        assert_eq!(out.answer, "use <think> tags");
    }

    #[test]
    fn test_separate_reasoning_channel() {
        let mut splitter = StreamSplitter::default();
        assert_eq!(
            splitter.push_thinking("step one"),
            vec![SplitEvent::Thinking("step one".to_string())]
        );
        assert_eq!(
            splitter.push("Answer"),
            vec![
                SplitEvent::ThinkingComplete("step one".to_string()),
                SplitEvent::Answer("Answer".to_string()),
            ]
        );
        let out = splitter.finish();
        assert_eq!(out.thinking, "step one");
        assert_eq!(out.answer, "Answer");
    }

    #[test]
    fn test_custom_markers() {
        let mut splitter = StreamSplitter::new(Markers::new("[[reason]]", "[[/reason]]"));
        splitter.push("[[rea");
        splitter.push("son]]why[[/rea");
        splitter.push("son]]because");
        let out = splitter.finish();
        assert_eq!(out.thinking, "why");
        assert_eq!(out.answer, "because");
    }

    #[test]
    fn test_markers_validate() {
        assert!(Markers::default().validate().is_ok());
        assert!(Markers::new("", "</think>").validate().is_err());
        assert!(Markers::new("|", "|").validate().is_err());
    }
}
