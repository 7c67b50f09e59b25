//! Opaque automation transport.
//!
//! The engine never talks COM directly; it goes through
//! [`AutomationTransport`], which exposes exactly the primitives the
//! out-of-process automation layer needs: create/attach a remote object,
//! invoke members on it, and bracket the calling thread's automation
//! context. Production bindings implement this trait on Windows; tests use
//! a scriptable in-memory mock.

use thiserror::Error;

/// Opaque identifier for a remote automation object.
pub type Handle = u64;

/// A value crossing the automation boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ComValue {
    /// No value / null dispatch pointer.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer (enums, counts, preference keys).
    Int(i32),
    /// Double-precision float (tolerances).
    Double(f64),
    /// String (paths, titles, version strings).
    Str(String),
    /// Another remote object.
    Handle(Handle),
    /// A list of values (dependency enumerations).
    List(Vec<ComValue>),
}

impl ComValue {
    /// Short name of the value's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ComValue::Null => "null",
            ComValue::Bool(_) => "bool",
            ComValue::Int(_) => "int",
            ComValue::Double(_) => "double",
            ComValue::Str(_) => "string",
            ComValue::Handle(_) => "handle",
            ComValue::List(_) => "list",
        }
    }

    /// Extract a boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ComValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an integer, if this is one.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ComValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a string slice, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ComValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extract an object handle, if this is one.
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            ComValue::Handle(h) => Some(*h),
            _ => None,
        }
    }

    /// Extract a list, if this is one.
    pub fn as_list(&self) -> Option<&[ComValue]> {
        match self {
            ComValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Errors from the automation transport.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// The named service could not be created or attached to.
    #[error("Automation service '{service}' is not available: {reason}")]
    ServiceUnavailable {
        /// The service name that was requested.
        service: String,
        /// Description of the failure.
        reason: String,
    },

    /// A member invocation failed on the remote side.
    #[error("Call to '{member}' failed: {reason}")]
    CallFailed {
        /// The member that was invoked.
        member: String,
        /// Description of the failure.
        reason: String,
    },

    /// A member returned a value of an unexpected kind.
    #[error("Member '{member}' returned {got}, expected {expected}")]
    UnexpectedType {
        /// The member that was invoked.
        member: String,
        /// The expected value kind.
        expected: &'static str,
        /// The kind actually returned.
        got: &'static str,
    },

    /// Per-thread automation context initialization failed.
    #[error("Failed to initialize automation thread context: {reason}")]
    ApartmentInit {
        /// Description of the failure.
        reason: String,
    },

    /// A handle did not refer to a live remote object.
    #[error("Invalid automation object handle {handle}")]
    InvalidHandle {
        /// The stale handle.
        handle: Handle,
    },
}

/// Result of [`AutomationTransport::attach_or_create`].
#[derive(Debug, Clone, Copy)]
pub struct Attached {
    /// Handle to the application instance.
    pub handle: Handle,
    /// Whether the instance was already running before the call. Sessions
    /// only request application exit for instances they created themselves.
    pub was_running: bool,
}

/// The out-of-process automation transport.
///
/// Not safely shareable across threads without per-call context setup;
/// callers must bracket use with [`ApartmentGuard`] (or equivalent
/// `thread_init`/`thread_teardown` pairing) on the thread doing the calls.
pub trait AutomationTransport: Send + Sync {
    /// Initialize the calling thread's automation context.
    fn thread_init(&self) -> Result<(), AutomationError>;

    /// Tear down the calling thread's automation context.
    fn thread_teardown(&self);

    /// Create a new instance of the named service, or attach to an already
    /// running one.
    fn attach_or_create(&self, service_name: &str) -> Result<Attached, AutomationError>;

    /// Read a property.
    fn get(&self, handle: Handle, member: &str) -> Result<ComValue, AutomationError>;

    /// Write a property.
    fn set(&self, handle: Handle, member: &str, value: ComValue) -> Result<(), AutomationError>;

    /// Invoke a method.
    fn call(
        &self,
        handle: Handle,
        member: &str,
        args: &[ComValue],
    ) -> Result<ComValue, AutomationError>;

    /// Whether the remote object exposes the named member. Used by the
    /// discovery capability probe.
    fn has_member(&self, handle: Handle, member: &str) -> bool;

    /// Drop the remote object reference behind `handle`.
    fn release(&self, handle: Handle);
}

/// Typed accessor: expect a boolean result from a member.
pub fn expect_bool(member: &str, value: ComValue) -> Result<bool, AutomationError> {
    value.as_bool().ok_or_else(|| AutomationError::UnexpectedType {
        member: member.to_string(),
        expected: "bool",
        got: value.kind(),
    })
}

/// Typed accessor: expect an integer result from a member.
pub fn expect_int(member: &str, value: ComValue) -> Result<i32, AutomationError> {
    value.as_int().ok_or_else(|| AutomationError::UnexpectedType {
        member: member.to_string(),
        expected: "int",
        got: value.kind(),
    })
}

/// Typed accessor: expect a string result from a member.
pub fn expect_str(member: &str, value: ComValue) -> Result<String, AutomationError> {
    match value {
        ComValue::Str(s) => Ok(s),
        other => Err(AutomationError::UnexpectedType {
            member: member.to_string(),
            expected: "string",
            got: other.kind(),
        }),
    }
}

/// Typed accessor: expect an object handle result from a member.
pub fn expect_handle(member: &str, value: ComValue) -> Result<Handle, AutomationError> {
    value
        .as_handle()
        .ok_or_else(|| AutomationError::UnexpectedType {
            member: member.to_string(),
            expected: "handle",
            got: value.kind(),
        })
}

/// RAII bracket for the calling thread's automation context.
///
/// `enter` runs `thread_init`; dropping the guard runs `thread_teardown`.
/// Every code path through a conversion holds one of these for its whole
/// duration, nested inside the conversion lock.
pub struct ApartmentGuard<'a> {
    com: &'a dyn AutomationTransport,
}

impl<'a> ApartmentGuard<'a> {
    /// Initialize the thread context and return the guard.
    pub fn enter(com: &'a dyn AutomationTransport) -> Result<Self, AutomationError> {
        com.thread_init()?;
        Ok(Self { com })
    }
}

impl Drop for ApartmentGuard<'_> {
    fn drop(&mut self) {
        self.com.thread_teardown();
    }
}

/// RAII wrapper releasing a remote object reference on drop. Used for
/// short-lived objects (open specifications and the like) whose reference
/// must not leak when an intermediate call errors out.
pub struct ReleaseGuard<'a> {
    com: &'a dyn AutomationTransport,
    handle: Handle,
}

impl<'a> ReleaseGuard<'a> {
    /// Take ownership of the reference behind `handle`.
    pub fn new(com: &'a dyn AutomationTransport, handle: Handle) -> Self {
        Self { com, handle }
    }

    /// The guarded handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.com.release(self.handle);
    }
}
