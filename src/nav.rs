//! Navigation hand-off between the scan screen and the display screen.
//!
//! The decoded string crosses the screen boundary under a single well-known
//! key. Forward navigation terminates the scan screen; back navigation
//! constructs a fresh one instead of resuming stale camera state.

use std::collections::HashMap;

/// Key under which the decoded string travels between the two screens.
pub const EXTRA_MESSAGE: &str = "barcode_scanner.decoded_payload";

/// The message carried across a navigation, as key/value extras.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandoffPayload {
    extras: HashMap<&'static str, String>,
}

impl HandoffPayload {
    pub fn with_message(text: impl Into<String>) -> Self {
        let mut extras = HashMap::new();
        extras.insert(EXTRA_MESSAGE, text.into());
        HandoffPayload { extras }
    }

    pub fn message(&self) -> Option<&str> {
        self.extras.get(EXTRA_MESSAGE).map(String::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    Scan,
    Display,
}

/// Presents screens; the slint window is one host implementation.
pub trait ScreenHost {
    /// Shows the display screen carrying `payload`. The previous scan
    /// screen is terminated by the caller, not hidden.
    fn present_display(&mut self, payload: &HandoffPayload);

    /// Constructs and shows a fresh scan screen.
    fn present_scan(&mut self);
}

pub struct NavigationHandoff {
    current: Screen,
}

impl NavigationHandoff {
    pub fn new() -> Self {
        NavigationHandoff {
            current: Screen::Scan,
        }
    }

    pub fn current(&self) -> Screen {
        self.current
    }

    /// One-way navigation to the display screen with the decoded payload.
    pub fn go_to_display(&mut self, host: &mut dyn ScreenHost, decoded: String) {
        self.current = Screen::Display;
        host.present_display(&HandoffPayload::with_message(decoded));
    }

    /// Back navigation from the display screen: explicitly a fresh scan
    /// screen, never a pop back to the previous instance.
    pub fn go_back_to_scan(&mut self, host: &mut dyn ScreenHost) {
        self.current = Screen::Scan;
        host.present_scan();
    }
}

impl Default for NavigationHandoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeHost {
        presented: Vec<String>,
    }

    impl ScreenHost for FakeHost {
        fn present_display(&mut self, payload: &HandoffPayload) {
            self.presented
                .push(format!("display:{}", payload.message().unwrap_or("")));
        }

        fn present_scan(&mut self) {
            self.presented.push("scan".to_string());
        }
    }

    #[test]
    fn payload_round_trips_under_the_shared_key() {
        let payload = HandoffPayload::with_message("12345");
        assert_eq!(payload.message(), Some("12345"));
        assert_eq!(HandoffPayload::default().message(), None);
    }

    #[test]
    fn forward_navigation_carries_the_decoded_text() {
        let mut nav = NavigationHandoff::new();
        let mut host = FakeHost::default();

        nav.go_to_display(&mut host, "12345".to_string());
        assert_eq!(nav.current(), Screen::Display);
        assert_eq!(host.presented, vec!["display:12345".to_string()]);
    }

    #[test]
    fn back_navigation_presents_a_fresh_scan_screen() {
        let mut nav = NavigationHandoff::new();
        let mut host = FakeHost::default();

        nav.go_to_display(&mut host, "12345".to_string());
        nav.go_back_to_scan(&mut host);
        assert_eq!(nav.current(), Screen::Scan);
        assert_eq!(
            host.presented,
            vec!["display:12345".to_string(), "scan".to_string()]
        );
    }
}
