//! Streaming output classifier.
//!
//! Maps raw terminal bytes from an assistant's pane into the semantic events
//! the session state machine reacts to. The classifier never blocks and
//! never owns a timer thread: idle detection is poll-based (`poll_idle`),
//! mirroring the teacher's `pty::idle::IdleTracker`, so tests can drive it
//! with synthetic clocks instead of real sleeps.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::{Regex, RegexSet};

/// Number of trailing bytes of context kept for pattern matching.
const CONTEXT_WINDOW_BYTES: usize = 10_000;

const BRAILLE_SPINNER: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
  Confirmation,
  Selection,
  OpenQuestion,
}

/// One semantic event emitted by the classifier for a chunk of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierEvent {
  Activity,
  Working,
  PossiblyIdle,
  InputRequired {
    kind: InputKind,
    question: String,
    options: Vec<String>,
  },
  ContextExhausted {
    window: String,
  },
}

fn context_exhausted_set() -> &'static RegexSet {
  static SET: OnceLock<RegexSet> = OnceLock::new();
  SET.get_or_init(|| {
    RegexSet::new([
      r"(?i)context (window|limit)",
      r"(?i)too long",
      r"(?i)maximum.*token",
      r"(?i)conversation is too long",
      r"(?i)context.*exceeded",
    ])
    .expect("valid context-exhausted regex set")
  })
}

fn working_verb_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?m)^(Thinking|Reading|Writing|Running|Searching|Analyzing|Editing|Creating)\b")
      .expect("valid working-verb regex")
  })
}

fn confirmation_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?i)(\(y/n\)|\[Y/n\]|\[yes/no\]|Do you want to )").expect("valid confirmation regex")
  })
}

fn tool_approval_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?i)(Allow .+ to run|Press Enter to (run|Approve|Reject|Edit))")
      .expect("valid tool-approval regex")
  })
}

fn selection_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?im)(Choose an option|Select .+:|^\s*\[\d+\])").expect("valid selection regex")
  })
}

fn selection_option_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?m)^\s*\[(\d+)\]\s*(.*)$").expect("valid selection-option regex"))
}

/// Reads a never-ending byte stream and maps chunks to classifier events.
pub struct Classifier {
  window: VecDeque<u8>,
  last_activity: Instant,
  idle_threshold: Duration,
  idle_fired: bool,
}

impl Classifier {
  #[must_use]
  pub fn new(now: Instant, idle_threshold: Duration) -> Self {
    Self {
      window: VecDeque::with_capacity(CONTEXT_WINDOW_BYTES),
      last_activity: now,
      idle_threshold,
      idle_fired: false,
    }
  }

  /// Feed one chunk of raw bytes. Returns the (at most one, after `Activity`)
  /// classification event for this chunk.
  pub fn on_chunk(&mut self, chunk: &[u8], now: Instant) -> Vec<ClassifierEvent> {
    self.last_activity = now;
    self.idle_fired = false;
    self.push_window(chunk);

    let mut events = vec![ClassifierEvent::Activity];
    let text = String::from_utf8_lossy(chunk).into_owned();

    if let Some(ev) = classify_context_exhausted(&text, &self.window_text()) {
      events.push(ev);
    } else if working_verb_re().is_match(&text) || text.chars().any(|c| BRAILLE_SPINNER.contains(&c))
    {
      events.push(ClassifierEvent::Working);
    } else if let Some(ev) = classify_input_required(&text) {
      events.push(ev);
    }
    events
  }

  /// Poll for idle expiry. Returns `Some(PossiblyIdle)` exactly once per
  /// quiet period, the first time `now` crosses the idle threshold since the
  /// last activity.
  pub fn poll_idle(&mut self, now: Instant) -> Option<ClassifierEvent> {
    if self.idle_fired {
      return None;
    }
    if now.duration_since(self.last_activity) >= self.idle_threshold {
      self.idle_fired = true;
      Some(ClassifierEvent::PossiblyIdle)
    } else {
      None
    }
  }

  fn push_window(&mut self, chunk: &[u8]) {
    self.window.extend(chunk.iter().copied());
    while self.window.len() > CONTEXT_WINDOW_BYTES {
      self.window.pop_front();
    }
  }

  fn window_text(&self) -> String {
    let bytes: Vec<u8> = self.window.iter().copied().collect();
    String::from_utf8_lossy(&bytes).into_owned()
  }
}

fn classify_context_exhausted(text: &str, window: &str) -> Option<ClassifierEvent> {
  if context_exhausted_set().is_match(text) {
    Some(ClassifierEvent::ContextExhausted {
      window: window.to_string(),
    })
  } else {
    None
  }
}

fn classify_input_required(text: &str) -> Option<ClassifierEvent> {
  if confirmation_re().is_match(text) {
    return Some(ClassifierEvent::InputRequired {
      kind: InputKind::Confirmation,
      question: extract_question(text),
      options: Vec::new(),
    });
  }
  if tool_approval_re().is_match(text) {
    return Some(ClassifierEvent::InputRequired {
      kind: InputKind::Confirmation,
      question: extract_question(text),
      options: Vec::new(),
    });
  }
  if selection_re().is_match(text) {
    return Some(ClassifierEvent::InputRequired {
      kind: InputKind::Selection,
      question: extract_question(text),
      options: extract_options(text),
    });
  }
  if ends_with_open_question(text) {
    return Some(ClassifierEvent::InputRequired {
      kind: InputKind::OpenQuestion,
      question: extract_question(text),
      options: Vec::new(),
    });
  }
  None
}

fn last_non_empty_line(text: &str) -> Option<&str> {
  text.lines().rev().find(|l| !l.trim().is_empty())
}

fn ends_with_open_question(text: &str) -> bool {
  last_non_empty_line(text).is_some_and(|l| l.trim_end().ends_with('?'))
}

/// The last line that contains `?` or `(y/n)`, else the last non-empty line.
fn extract_question(text: &str) -> String {
  let question_line = text
    .lines()
    .rev()
    .find(|l| l.contains('?') || l.to_lowercase().contains("(y/n)"));
  question_line
    .or_else(|| last_non_empty_line(text))
    .unwrap_or("")
    .trim()
    .to_string()
}

/// The text following each `[N]` marker, in order of appearance.
fn extract_options(text: &str) -> Vec<String> {
  selection_option_re()
    .captures_iter(text)
    .map(|c| c[2].trim().to_string())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classify_once(bytes: &[u8]) -> Vec<ClassifierEvent> {
    let mut c = Classifier::new(Instant::now(), Duration::from_secs(3));
    c.on_chunk(bytes, Instant::now())
  }

  #[test]
  fn confirmation_prompt_is_detected() {
    let events = classify_once(b"Do you want to proceed? (y/n)");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ClassifierEvent::Activity);
    match &events[1] {
      ClassifierEvent::InputRequired {
        kind,
        question,
        options,
      } => {
        assert_eq!(*kind, InputKind::Confirmation);
        assert!(question.ends_with('?') || question.to_lowercase().contains("(y/n)"));
        assert!(options.is_empty());
      }
      other => panic!("expected InputRequired, got {other:?}"),
    }
  }

  #[test]
  fn context_exhausted_dominates_working() {
    let events = classify_once(b"... Thinking ... conversation is too long ...");
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], ClassifierEvent::ContextExhausted { .. }));
  }

  #[test]
  fn working_indicator_detected() {
    let events = classify_once(b"Thinking about the next step\n");
    assert_eq!(events[1], ClassifierEvent::Working);
  }

  #[test]
  fn braille_spinner_counts_as_working() {
    let events = classify_once("⠋ loading".as_bytes());
    assert_eq!(events[1], ClassifierEvent::Working);
  }

  #[test]
  fn selection_prompt_extracts_options() {
    let events = classify_once(b"Choose an option:\n[1] Yes\n[2] No\n");
    match &events[1] {
      ClassifierEvent::InputRequired { kind, options, .. } => {
        assert_eq!(*kind, InputKind::Selection);
        assert_eq!(options, &vec!["Yes".to_string(), "No".to_string()]);
      }
      other => panic!("expected InputRequired, got {other:?}"),
    }
  }

  #[test]
  fn open_question_without_markers() {
    let events = classify_once(b"Should I continue with the migration?");
    match &events[1] {
      ClassifierEvent::InputRequired { kind, .. } => assert_eq!(*kind, InputKind::OpenQuestion),
      other => panic!("expected InputRequired, got {other:?}"),
    }
  }

  #[test]
  fn plain_output_only_emits_activity() {
    let events = classify_once(b"just some regular output\n");
    assert_eq!(events, vec![ClassifierEvent::Activity]);
  }

  #[test]
  fn idle_fires_once_after_threshold() {
    let start = Instant::now();
    let mut c = Classifier::new(start, Duration::from_millis(100));
    c.on_chunk(b"hi", start);
    assert!(c.poll_idle(start + Duration::from_millis(50)).is_none());
    assert!(c.poll_idle(start + Duration::from_millis(150)).is_some());
    assert!(c.poll_idle(start + Duration::from_millis(200)).is_none());
  }

  #[test]
  fn activity_resets_idle_timer() {
    let start = Instant::now();
    let mut c = Classifier::new(start, Duration::from_millis(100));
    c.on_chunk(b"hi", start);
    assert!(c.poll_idle(start + Duration::from_millis(150)).is_some());
    c.on_chunk(b"more", start + Duration::from_millis(160));
    assert!(c.poll_idle(start + Duration::from_millis(200)).is_none());
  }
}
