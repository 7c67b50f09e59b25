//! Automation session lifecycle.
//!
//! A session wraps one live application instance. Every remote setting the
//! engine changes goes through a [`SettingStash`], which reads and caches
//! the previous value before overwriting it and restores all cached values
//! in reverse order on teardown. Restoration also runs from `Drop`, so a
//! conversion that errors out mid-flight still leaves the external
//! application the way it found it.

use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::com::{AutomationError, AutomationTransport, ComValue, Handle, expect_str};

/// Parsed application revision, from a self-reported string like "25.2.0".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Revision {
    /// Major revision; drives version-dependent behavior.
    pub major: u32,
    /// Minor revision.
    pub minor: u32,
    /// Patch level.
    pub patch: u32,
}

impl FromStr for Revision {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let parse = |part: Option<&str>| -> Result<u32, AutomationError> {
            part.unwrap_or("0")
                .parse()
                .map_err(|_| AutomationError::CallFailed {
                    member: "RevisionNumber".to_string(),
                    reason: format!("unparsable revision string '{s}'"),
                })
        };
        let major = parse(parts.next())?;
        let minor = parse(parts.next().or(Some("0")))?;
        let patch = parse(parts.next().or(Some("0")))?;
        Ok(Revision {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One remembered external setting.
#[derive(Debug)]
enum SavedSetting {
    /// A plain property that was overwritten.
    Property {
        handle: Handle,
        member: String,
        previous: ComValue,
    },
    /// A keyed preference written through a setter method.
    Preference {
        handle: Handle,
        setter: String,
        key_args: Vec<ComValue>,
        previous: ComValue,
    },
}

/// Record-before-change stash for external mutable settings.
///
/// `set_*` methods read the current value, apply the new one, and remember
/// the original. [`SettingStash::restore_all`] undoes every change in
/// reverse order; the `Drop` impl is a backstop for early-error paths.
/// Restoration failures are logged, never raised.
pub struct SettingStash<'a> {
    com: &'a dyn AutomationTransport,
    saved: Vec<SavedSetting>,
}

impl<'a> SettingStash<'a> {
    /// Create an empty stash bound to a transport.
    pub fn new(com: &'a dyn AutomationTransport) -> Self {
        Self {
            com,
            saved: Vec::new(),
        }
    }

    /// Number of settings currently cached for restoration.
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    /// Whether no settings have been changed yet.
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    /// Overwrite a property, remembering its previous value.
    pub fn set_property(
        &mut self,
        handle: Handle,
        member: &str,
        value: ComValue,
    ) -> Result<(), AutomationError> {
        let previous = self.com.get(handle, member)?;
        self.com.set(handle, member, value)?;
        self.saved.push(SavedSetting::Property {
            handle,
            member: member.to_string(),
            previous,
        });
        Ok(())
    }

    /// Overwrite a keyed preference through its getter/setter pair,
    /// remembering its previous value. `key_args` address the preference;
    /// the setter receives the key args followed by the new value.
    pub fn set_preference(
        &mut self,
        handle: Handle,
        getter: &str,
        setter: &str,
        key_args: &[ComValue],
        value: ComValue,
    ) -> Result<(), AutomationError> {
        let previous = self.com.call(handle, getter, key_args)?;
        let mut args = key_args.to_vec();
        args.push(value);
        self.com.call(handle, setter, &args)?;
        self.saved.push(SavedSetting::Preference {
            handle,
            setter: setter.to_string(),
            key_args: key_args.to_vec(),
            previous,
        });
        Ok(())
    }

    /// Restore every cached setting, newest first. Safe to call more than
    /// once; the second call is a no-op.
    pub fn restore_all(&mut self) {
        while let Some(saved) = self.saved.pop() {
            let result = match &saved {
                SavedSetting::Property {
                    handle,
                    member,
                    previous,
                } => self.com.set(*handle, member, previous.clone()),
                SavedSetting::Preference {
                    handle,
                    setter,
                    key_args,
                    previous,
                } => {
                    let mut args = key_args.clone();
                    args.push(previous.clone());
                    self.com.call(*handle, setter, &args).map(|_| ())
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to restore an external setting");
            }
        }
    }
}

impl Drop for SettingStash<'_> {
    fn drop(&mut self) {
        if !self.saved.is_empty() {
            debug!(
                pending = self.saved.len(),
                "Restoring external settings from drop"
            );
            self.restore_all();
        }
    }
}

/// One live application instance plus everything needed to undo the
/// session's side effects.
pub struct AutomationSession<'a> {
    com: &'a dyn AutomationTransport,
    service_name: String,
    instance: Handle,
    created: bool,
    revision: Revision,
    stash: SettingStash<'a>,
    aux_handles: Vec<Handle>,
    released: bool,
}

impl<'a> AutomationSession<'a> {
    /// Wrap a freshly attached instance.
    pub fn new(
        com: &'a dyn AutomationTransport,
        service_name: &str,
        instance: Handle,
        was_running: bool,
    ) -> Self {
        Self {
            com,
            service_name: service_name.to_string(),
            instance,
            created: !was_running,
            revision: Revision::default(),
            stash: SettingStash::new(com),
            aux_handles: Vec::new(),
            released: false,
        }
    }

    /// Handle to the live application instance.
    pub fn instance(&self) -> Handle {
        self.instance
    }

    /// The service name this session was started with.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether this session created the instance (as opposed to attaching
    /// to one that was already running).
    pub fn created_instance(&self) -> bool {
        self.created
    }

    /// The application revision read during session start.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Read the application's self-reported revision and remember it.
    pub fn read_revision(&mut self) -> Result<Revision, AutomationError> {
        let raw = expect_str(
            "RevisionNumber",
            self.com.get(self.instance, "RevisionNumber")?,
        )?;
        self.revision = raw.parse()?;
        Ok(self.revision)
    }

    /// The setting stash used for session-wide settings.
    pub fn stash_mut(&mut self) -> &mut SettingStash<'a> {
        &mut self.stash
    }

    /// Track a secondary remote object (e.g. the application frame) so it
    /// is released with the session.
    pub fn track_handle(&mut self, handle: Handle) {
        self.aux_handles.push(handle);
    }

    /// Restore all cached settings in reverse order of application.
    pub fn restore_settings(&mut self) {
        self.stash.restore_all();
    }

    /// Release every remote object reference held by this session. Runs at
    /// most once.
    pub fn release_handles(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for handle in self.aux_handles.drain(..) {
            self.com.release(handle);
        }
        self.com.release(self.instance);
    }
}

impl Drop for AutomationSession<'_> {
    fn drop(&mut self) {
        // Restore before releasing: once the instance reference is gone
        // the restore writes have nothing to land on, and the external
        // application would stay hidden in background mode.
        self.stash.restore_all();
        self.release_handles();
    }
}
