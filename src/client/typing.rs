use std::time::{Duration, Instant};

use crate::common::events::ClientEvent;

/// How long after the last keystroke the typing indicator self-expires.
pub const TYPING_IDLE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Client-side debounce for the typing relay. Time is passed in by the
/// caller, so the emission policy is a plain state machine:
/// the first keystroke of a burst emits `typing`, every keystroke re-arms
/// a 3 s deadline, the deadline expiring emits `stopTyping`, and an
/// explicit send emits `stopTyping` immediately whatever the timer says.
#[derive(Debug, Default)]
pub struct TypingTracker {
    chat_id: Option<String>,
    self_typing: bool,
    deadline: Option<Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a keystroke in the active chat. Returns the event to emit,
    /// if any. Switching chats resets the tracker without emitting for the
    /// chat being left.
    pub fn keystroke(&mut self, chat_id: &str, now: Instant) -> Option<ClientEvent> {
        if self.chat_id.as_deref() != Some(chat_id) {
            self.chat_id = Some(chat_id.to_string());
            self.self_typing = false;
        }
        self.deadline = Some(now + TYPING_IDLE_TIMEOUT);
        if !self.self_typing {
            self.self_typing = true;
            return Some(ClientEvent::Typing(chat_id.to_string()));
        }
        None
    }

    /// Check the idle deadline. Returns `stopTyping` once when a burst has
    /// gone quiet for the full timeout.
    pub fn poll(&mut self, now: Instant) -> Option<ClientEvent> {
        if !self.self_typing {
            return None;
        }
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.self_typing = false;
                self.deadline = None;
                self.chat_id.clone().map(ClientEvent::StopTyping)
            }
            _ => None,
        }
    }

    /// A message was sent in `chat_id`: always emit `stopTyping`, timer or
    /// no timer.
    pub fn message_sent(&mut self, chat_id: &str) -> ClientEvent {
        self.chat_id = Some(chat_id.to_string());
        self.self_typing = false;
        self.deadline = None;
        ClientEvent::StopTyping(chat_id.to_string())
    }

    pub fn is_self_typing(&self) -> bool {
        self.self_typing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_emits_one_typing_then_one_stop() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        // Keystrokes closer than 3000 ms apart: exactly one typing event.
        assert_eq!(
            tracker.keystroke("chat-1", t0),
            Some(ClientEvent::Typing("chat-1".into()))
        );
        assert_eq!(tracker.keystroke("chat-1", t0 + ms(1000)), None);
        assert_eq!(tracker.keystroke("chat-1", t0 + ms(2500)), None);

        // Still inside the re-armed window: no stop yet.
        assert_eq!(tracker.poll(t0 + ms(5400)), None);

        // 3000 ms after the last keystroke: exactly one stop.
        assert_eq!(
            tracker.poll(t0 + ms(5500)),
            Some(ClientEvent::StopTyping("chat-1".into()))
        );
        assert_eq!(tracker.poll(t0 + ms(6000)), None);
    }

    #[test]
    fn next_burst_emits_typing_again() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        assert!(tracker.keystroke("chat-1", t0).is_some());
        assert!(tracker.poll(t0 + ms(3000)).is_some());
        assert_eq!(
            tracker.keystroke("chat-1", t0 + ms(4000)),
            Some(ClientEvent::Typing("chat-1".into()))
        );
    }

    #[test]
    fn send_emits_stop_even_with_timer_pending() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        tracker.keystroke("chat-1", t0);
        assert_eq!(
            tracker.message_sent("chat-1"),
            ClientEvent::StopTyping("chat-1".into())
        );
        // The pending deadline was cancelled by the send.
        assert_eq!(tracker.poll(t0 + ms(10_000)), None);
    }

    #[test]
    fn send_without_prior_keystroke_still_emits_stop() {
        let mut tracker = TypingTracker::new();
        assert_eq!(
            tracker.message_sent("chat-1"),
            ClientEvent::StopTyping("chat-1".into())
        );
    }

    #[test]
    fn chat_switch_resets_without_emitting_for_the_old_chat() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        tracker.keystroke("chat-1", t0);
        // First keystroke in the new chat emits typing for the new chat;
        // no stopTyping is ever emitted for chat-1.
        assert_eq!(
            tracker.keystroke("chat-2", t0 + ms(500)),
            Some(ClientEvent::Typing("chat-2".into()))
        );
        assert_eq!(
            tracker.poll(t0 + ms(3500)),
            Some(ClientEvent::StopTyping("chat-2".into()))
        );
    }
}
