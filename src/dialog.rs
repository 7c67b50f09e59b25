//! Settings dialog collaborator.
//!
//! The engine treats the host's quality wizard as a blocking configuration
//! provider: show it, wait, and read back whether the user cancelled and
//! which quality they picked. Cancelling here is the only cancellation
//! point of a conversion; once an application is touched there is no way
//! to interrupt the remote calls.

use crate::config::ExportQuality;

/// What the dialog returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialogOutcome {
    /// The user dismissed the dialog without confirming.
    pub cancelled: bool,
    /// The quality the user picked, if any.
    pub quality: Option<ExportQuality>,
}

impl DialogOutcome {
    /// An accepted outcome with no explicit quality choice.
    pub fn accepted() -> Self {
        Self {
            cancelled: false,
            quality: None,
        }
    }

    /// A cancelled outcome.
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            quality: None,
        }
    }
}

/// Blocking settings dialog provider.
pub trait SettingsDialog: Send + Sync {
    /// Show the dialog and block until it closes.
    fn show_blocking(&self) -> DialogOutcome;
}

/// Dialog that immediately accepts with the configured defaults. Used by
/// headless hosts and whenever `show_settings_dialog` is disabled.
#[derive(Debug, Default)]
pub struct AcceptDefaults;

impl SettingsDialog for AcceptDefaults {
    fn show_blocking(&self) -> DialogOutcome {
        DialogOutcome::accepted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_defaults_never_cancels() {
        let outcome = AcceptDefaults.show_blocking();
        assert!(!outcome.cancelled);
        assert!(outcome.quality.is_none());
    }
}
