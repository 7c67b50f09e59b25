//! CAD application adapters.
//!
//! Each supported vendor application is an implementation of
//! [`CadApplication`]: it knows its automation service names, which source
//! extensions it owns, how to start and tear down a session, and how to
//! open, export and close documents. The pipeline stays vendor-agnostic
//! and drives adapters through this trait only.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::com::AutomationTransport;
use crate::config::ResolvedQuality;
use crate::document::OpenedDocument;
use crate::error::ConversionError;
use crate::formats::IntermediateFormat;
use crate::session::AutomationSession;

/// One vendor CAD application the engine can drive.
pub trait CadApplication: Send + Sync {
    /// Stable identifier, e.g. `"solidworks"`.
    fn id(&self) -> &'static str;

    /// Human-readable name for logs and diagnostics.
    fn display_name(&self) -> &'static str;

    /// Version-independent automation service name. Resolves to whatever
    /// the system registration points at.
    fn default_service_name(&self) -> &'static str;

    /// Version-pinned automation service name for a major revision.
    fn versioned_service_name(&self, major: u32) -> String;

    /// Lowercase source file extensions this application owns.
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Lowest major revision whose container-format export is usable.
    fn container_format_min_revision(&self) -> u32;

    /// Lowest major revision whose exports come out rotated relative to
    /// the host coordinate system. Output from this revision onwards gets
    /// the X-axis correction.
    fn rotation_fix_min_revision(&self) -> u32;

    /// Members a live instance must expose to count as operational.
    fn required_members(&self) -> &'static [&'static str];

    /// Attach to (or create) the named service and apply the session-wide
    /// settings, caching their previous values for restoration.
    fn start_session<'a>(
        &self,
        com: &'a dyn AutomationTransport,
        service_name: &str,
    ) -> Result<AutomationSession<'a>, ConversionError>;

    /// Open and activate a document, resolving drawings to the single
    /// part/assembly they reference.
    fn open_document(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        path: &Path,
    ) -> Result<OpenedDocument, ConversionError>;

    /// Export the opened document into `format` at `target`. Export-scoped
    /// settings are applied and restored within this call.
    fn export_document(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        document: &OpenedDocument,
        format: IntermediateFormat,
        target: &Path,
        quality: &ResolvedQuality,
    ) -> Result<(), ConversionError>;

    /// Close the document and re-activate whatever it displaced. Errors
    /// are absorbed; close runs on already-failing paths.
    fn close_document(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        document: OpenedDocument,
    );

    /// Restore session settings in reverse order, exit the application if
    /// this session created it and no documents remain, and release all
    /// remote references. Absorbs errors.
    fn stop_session(&self, com: &dyn AutomationTransport, session: AutomationSession<'_>);
}

/// Registry of available application adapters, dispatched by source file
/// extension.
#[derive(Default)]
pub struct ApplicationRegistry {
    apps: Vec<Arc<dyn CadApplication>>,
    by_extension: HashMap<String, usize>,
}

impl ApplicationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Later registrations win extension conflicts.
    pub fn register(&mut self, app: Arc<dyn CadApplication>) {
        let index = self.apps.len();
        for ext in app.supported_extensions() {
            self.by_extension.insert(ext.to_ascii_lowercase(), index);
        }
        self.apps.push(app);
    }

    /// Every registered adapter.
    pub fn all(&self) -> &[Arc<dyn CadApplication>] {
        &self.apps
    }

    /// Union of all supported extensions, lowercase.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// The adapter owning the given source path's extension, if any.
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn CadApplication>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension
            .get(&ext)
            .map(|&index| Arc::clone(&self.apps[index]))
    }
}
