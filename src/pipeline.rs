//! The conversion pipeline.
//!
//! `convert` takes a foreign CAD file and returns scene nodes. One
//! conversion runs at a time, process-wide: the external applications are
//! single-instance automation servers and concurrent sessions corrupt each
//! other's settings. Inside the lock the pipeline walks two nested
//! candidate loops: application version candidates (per the installation
//! preference), and intermediate format candidates per connected revision.
//! The first format that exports and loads wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::{ApplicationRegistry, CadApplication};
use crate::com::{ApartmentGuard, AutomationTransport};
use crate::config::{ConverterConfig, InstallationPreference, ResolvedQuality};
use crate::dialog::{AcceptDefaults, SettingsDialog};
use crate::discovery::{InstallationDiscovery, ServiceRegistry};
use crate::error::ConversionError;
use crate::formats::{IntermediateFormat, MeshLoader, any_handler_available, preferred_formats};
use crate::metrics::ConversionMetrics;
use crate::models::{MeshNode, x_axis_correction};
use crate::session::Revision;
use crate::solidworks::SolidWorks;

/// Temp-file guard: deletes the file on drop, however the conversion ends.
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn reserve(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to delete temporary export file");
            }
        }
    }
}

/// What happened with one application version candidate.
enum CandidateOutcome {
    /// Conversion succeeded on this candidate.
    Converted {
        nodes: Vec<MeshNode>,
        revision: Revision,
    },
    /// The document itself is unconvertible; trying further candidates
    /// cannot help.
    Fatal(ConversionError),
    /// This candidate failed for reasons local to it; try the next one.
    Abandoned,
}

/// The conversion engine.
pub struct ConversionPipeline {
    transport: Arc<dyn AutomationTransport>,
    applications: ApplicationRegistry,
    discovery: InstallationDiscovery,
    loaders: Vec<Arc<dyn MeshLoader>>,
    dialog: Arc<dyn SettingsDialog>,
    config: ConverterConfig,
    metrics: Arc<ConversionMetrics>,
}

impl ConversionPipeline {
    /// Build a pipeline with the default adapter set (SolidWorks) and a
    /// dialog that accepts the configured defaults.
    pub fn new(
        transport: Arc<dyn AutomationTransport>,
        registry: Arc<dyn ServiceRegistry>,
        config: ConverterConfig,
    ) -> Self {
        let mut applications = ApplicationRegistry::new();
        applications.register(Arc::new(SolidWorks));
        let discovery = InstallationDiscovery::new(
            registry,
            Arc::clone(&transport),
            config.run_startup_checks,
        );
        Self {
            transport,
            applications,
            discovery,
            loaders: Vec::new(),
            dialog: Arc::new(AcceptDefaults),
            config,
            metrics: Arc::new(ConversionMetrics::new()),
        }
    }

    /// Replace the settings dialog provider.
    pub fn with_dialog(mut self, dialog: Arc<dyn SettingsDialog>) -> Self {
        self.dialog = dialog;
        self
    }

    /// Register a downstream mesh-format handler.
    pub fn add_loader(&mut self, loader: Arc<dyn MeshLoader>) {
        self.loaders.push(loader);
    }

    /// Shared metrics handle.
    pub fn metrics(&self) -> Arc<ConversionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The installation discovery service.
    pub fn discovery(&self) -> &InstallationDiscovery {
        &self.discovery
    }

    /// Drop cached discovery results for every registered application so
    /// the next conversion probes again. Safe to call while conversions
    /// are in flight; the re-probe serializes with them.
    pub fn refresh_installations(&self) {
        for app in self.applications.all() {
            self.discovery.refresh(app.as_ref());
        }
    }

    /// File extensions this pipeline can convert.
    pub fn supported_extensions(&self) -> Vec<String> {
        self.applications.supported_extensions()
    }

    /// Convert one foreign CAD file into scene nodes.
    pub fn convert(&self, path: &Path) -> Result<Vec<MeshNode>, ConversionError> {
        let started = Instant::now();
        self.metrics.record_started();
        match self.convert_inner(path) {
            Ok(nodes) => {
                self.metrics.record_succeeded(started.elapsed());
                Ok(nodes)
            }
            Err(ConversionError::Cancelled) => {
                self.metrics.record_cancelled();
                Err(ConversionError::Cancelled)
            }
            Err(e) => {
                self.metrics.record_failed();
                Err(e)
            }
        }
    }

    fn convert_inner(&self, path: &Path) -> Result<Vec<MeshNode>, ConversionError> {
        let app = self.applications.for_path(path).ok_or_else(|| {
            ConversionError::UnsupportedExtension {
                path: path.to_path_buf(),
            }
        })?;

        // The dialog is the only cancellation point; nothing external has
        // been touched yet.
        let mut quality_choice = self.config.export_quality;
        if self.config.show_settings_dialog {
            let outcome = self.dialog.show_blocking();
            if outcome.cancelled {
                info!(path = %path.display(), "Conversion cancelled in the settings dialog");
                return Err(ConversionError::Cancelled);
            }
            if let Some(quality) = outcome.quality {
                quality_choice = quality;
            }
        }
        let quality = self.config.resolve_quality(quality_choice);

        let loader_refs: Vec<&dyn MeshLoader> =
            self.loaders.iter().map(|loader| loader.as_ref()).collect();
        if !any_handler_available(&loader_refs) {
            return Err(ConversionError::NoFormatHandlers);
        }
        if !self.discovery.has_any_operational(app.as_ref()) {
            return Err(ConversionError::NoInstallation);
        }

        let temp_root = self.config.effective_temp_root();
        std::fs::create_dir_all(&temp_root)?;

        // Discovery may take the conversion lock itself to probe live
        // instances, so all discovery access happens before we acquire it.
        let candidates = self.candidate_services(app.as_ref());

        let _conversion = crate::lock::acquire();
        let com = self.transport.as_ref();
        let _apartment = ApartmentGuard::enter(com)?;

        info!(
            path = %path.display(),
            app = app.id(),
            candidates = candidates.len(),
            "Starting conversion"
        );

        for service_name in &candidates {
            let outcome = self.try_candidate(
                app.as_ref(),
                service_name,
                path,
                &loader_refs,
                &quality,
                &temp_root,
            );
            match outcome {
                CandidateOutcome::Converted {
                    mut nodes,
                    revision,
                } => {
                    self.post_process(app.as_ref(), path, revision, &mut nodes);
                    return Ok(nodes);
                }
                CandidateOutcome::Fatal(e) => return Err(e),
                CandidateOutcome::Abandoned => continue,
            }
        }
        Err(ConversionError::Exhausted {
            path: path.to_path_buf(),
        })
    }

    /// Ordered automation service names to try, per the installation
    /// preference. The version-independent name is the final fallback.
    fn candidate_services(&self, app: &dyn CadApplication) -> Vec<String> {
        let mut names = match self.config.preferred_installation {
            InstallationPreference::Latest => self
                .discovery
                .operational_versions(app)
                .into_iter()
                .map(|major| app.versioned_service_name(major))
                .collect(),
            InstallationPreference::SystemDefault => Vec::new(),
            InstallationPreference::Version(major) => {
                vec![app.versioned_service_name(major)]
            }
        };
        names.push(app.default_service_name().to_string());
        names.dedup();
        names
    }

    fn try_candidate(
        &self,
        app: &dyn CadApplication,
        service_name: &str,
        path: &Path,
        loaders: &[&dyn MeshLoader],
        quality: &ResolvedQuality,
        temp_root: &Path,
    ) -> CandidateOutcome {
        let com = self.transport.as_ref();
        let mut session = match app.start_session(com, service_name) {
            Ok(session) => session,
            Err(e) => {
                warn!(service = service_name, error = %e, "Session start failed, trying next candidate");
                self.metrics.record_session_failure();
                return CandidateOutcome::Abandoned;
            }
        };
        self.metrics.record_session_started();

        let revision = session.revision();
        let formats = preferred_formats(
            revision.major,
            app.container_format_min_revision(),
            loaders,
        );
        if formats.is_empty() {
            warn!(
                service = service_name,
                revision = %revision,
                "No usable intermediate format for this revision"
            );
            app.stop_session(com, session);
            return CandidateOutcome::Abandoned;
        }

        let document = match app.open_document(com, &mut session, path) {
            Ok(document) => document,
            Err(e) => {
                app.stop_session(com, session);
                if e.is_fatal() {
                    return CandidateOutcome::Fatal(e);
                }
                warn!(service = service_name, error = %e, "Document open failed, trying next candidate");
                return CandidateOutcome::Abandoned;
            }
        };

        let mut converted: Option<Vec<MeshNode>> = None;
        for format in formats {
            match self.try_format(app, &mut session, &document, format, quality, temp_root, loaders)
            {
                Ok(nodes) => {
                    info!(service = service_name, format = %format, "Conversion succeeded");
                    converted = Some(nodes);
                    break;
                }
                Err(e) => {
                    warn!(format = %format, error = %e, "Format attempt failed, trying next format");
                }
            }
        }

        app.close_document(com, &mut session, document);
        app.stop_session(com, session);

        match converted {
            Some(nodes) => CandidateOutcome::Converted { nodes, revision },
            None => CandidateOutcome::Abandoned,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_format(
        &self,
        app: &dyn CadApplication,
        session: &mut crate::session::AutomationSession<'_>,
        document: &crate::document::OpenedDocument,
        format: IntermediateFormat,
        quality: &ResolvedQuality,
        temp_root: &Path,
        loaders: &[&dyn MeshLoader],
    ) -> Result<Vec<MeshNode>, ConversionError> {
        // Upper-case extension so the host's extension-based dispatch never
        // collides with a user file of the same name.
        let file_name = format!("{}.{}", Uuid::new_v4(), format.extension().to_uppercase());
        let temp = TempFile::reserve(temp_root.join(file_name));
        debug!(target = %temp.path().display(), "Exporting to temporary file");

        self.metrics.record_export_attempt();
        let com = self.transport.as_ref();
        if let Err(e) = app.export_document(com, session, document, format, temp.path(), quality)
        {
            self.metrics.record_export_failure();
            return Err(e);
        }
        if !temp.path().is_file() {
            self.metrics.record_export_failure();
            return Err(ConversionError::TempFileMissing {
                path: temp.path().to_path_buf(),
            });
        }

        let loader = loaders
            .iter()
            .find(|loader| loader.can_handle(format))
            .ok_or_else(|| ConversionError::LoadFailed {
                format: format.to_string(),
                reason: "no handler".to_string(),
            })?;
        loader
            .load(temp.path())
            .map_err(|e| ConversionError::LoadFailed {
                format: format.to_string(),
                reason: e.reason,
            })
        // `temp` drops here and deletes the export file.
    }

    /// Rewrite provenance to the original source document and apply the
    /// coordinate-system correction on affected revisions.
    fn post_process(
        &self,
        app: &dyn CadApplication,
        path: &Path,
        revision: Revision,
        nodes: &mut [MeshNode],
    ) {
        for node in nodes.iter_mut() {
            node.set_source_file(path);
        }
        if self.config.auto_rotate && revision.major >= app.rotation_fix_min_revision() {
            debug!(revision = %revision, "Applying coordinate-system correction");
            let correction = x_axis_correction();
            for node in nodes.iter_mut() {
                node.rotate(&correction);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::mock::{DocBehavior, MockService, MockTransport, SaveBehavior};
    use crate::dialog::DialogOutcome;
    use crate::discovery::testutil::FakeRegistry;
    use crate::formats::stub::StubLoader;

    struct CancelDialog;

    impl SettingsDialog for CancelDialog {
        fn show_blocking(&self) -> DialogOutcome {
            DialogOutcome::cancelled()
        }
    }

    struct Fixture {
        transport: Arc<MockTransport>,
        registry: Arc<FakeRegistry>,
        temp: tempfile::TempDir,
        exe_dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                transport: Arc::new(MockTransport::new()),
                registry: Arc::new(FakeRegistry::new()),
                temp: tempfile::tempdir().expect("tempdir"),
                exe_dir: tempfile::tempdir().expect("tempdir"),
            }
        }

        /// Register + install one operational version.
        fn install_version(&self, major: u32, revision: &str) {
            let exe = self.exe_dir.path().join("SLDWORKS.exe");
            std::fs::write(&exe, b"stub").expect("write stub executable");
            let service = format!("SldWorks.Application.{major}");
            self.registry.register(&service, &exe);
            self.transport
                .add_service(&service, MockService::with_revision(revision));
            self.transport
                .add_service("SldWorks.Application", MockService::with_revision(revision));
        }

        fn pipeline(&self) -> ConversionPipeline {
            let config = ConverterConfig {
                temp_root: Some(self.temp.path().to_path_buf()),
                show_settings_dialog: false,
                ..Default::default()
            };
            ConversionPipeline::new(
                self.transport.clone() as Arc<dyn AutomationTransport>,
                self.registry.clone() as Arc<dyn ServiceRegistry>,
                config,
            )
        }

        fn temp_is_empty(&self) -> bool {
            std::fs::read_dir(self.temp.path())
                .map(|entries| entries.count() == 0)
                .unwrap_or(true)
        }
    }

    #[test]
    fn test_convert_part_end_to_end() {
        let fx = Fixture::new();
        fx.install_version(25, "25.2.0");
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let source = Path::new("C:/cad/bracket.sldprt");
        let nodes = pipeline.convert(source).expect("convert");
        assert_eq!(nodes.len(), 1);
        // Provenance points at the source document, not the temp export.
        assert_eq!(
            nodes[0].mesh.as_ref().and_then(|m| m.file_name.as_deref()),
            Some(source)
        );
        // Nothing left behind: temp files deleted, instances exited, no
        // documents open, thread context balanced.
        assert!(fx.temp_is_empty());
        assert_eq!(fx.transport.live_app_count(), 0);
        assert_eq!(fx.transport.open_doc_count("SldWorks.Application.25"), 0);
        let (inits, teardowns) = fx.transport.thread_balance();
        assert_eq!(inits, teardowns);

        let snap = pipeline.metrics().snapshot();
        assert_eq!(snap.conversions_succeeded, 1);
        assert_eq!(snap.conversions_failed, 0);
    }

    #[test]
    fn test_container_format_preferred_on_recent_revision() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        let mut pipeline = fx.pipeline();
        let three_mf = Arc::new(StubLoader::with_node_count(IntermediateFormat::ThreeMf, 3));
        pipeline.add_loader(three_mf.clone());
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let nodes = pipeline
            .convert(Path::new("C:/cad/frame.sldasm"))
            .expect("convert");
        // 3MF won and produced one node per component.
        assert_eq!(nodes.len(), 3);
        assert_eq!(three_mf.loaded.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_falls_back_to_stl_when_container_load_fails() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        let mut pipeline = fx.pipeline();
        let three_mf = Arc::new(StubLoader::failing(IntermediateFormat::ThreeMf));
        let stl = Arc::new(StubLoader::new(IntermediateFormat::Stl));
        pipeline.add_loader(three_mf.clone());
        pipeline.add_loader(stl.clone());

        let nodes = pipeline
            .convert(Path::new("C:/cad/frame.sldasm"))
            .expect("convert");
        assert_eq!(nodes.len(), 1);
        assert_eq!(three_mf.loaded.lock().unwrap().len(), 1);
        assert_eq!(stl.loaded.lock().unwrap().len(), 1);
        // Both temp exports were deleted, including the failed one.
        assert!(fx.temp_is_empty());
    }

    #[test]
    fn test_container_export_error_falls_back_to_stl() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        fx.transport.set_save_behavior("3mf", SaveBehavior::Error);
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::ThreeMf)));
        let stl = Arc::new(StubLoader::new(IntermediateFormat::Stl));
        pipeline.add_loader(stl.clone());

        let source = Path::new("C:/cad/frame.sldasm");
        let nodes = pipeline.convert(source).expect("convert");
        assert_eq!(nodes.len(), 1);
        assert_eq!(stl.loaded.lock().unwrap().len(), 1);
        assert_eq!(
            nodes[0].mesh.as_ref().and_then(|m| m.file_name.as_deref()),
            Some(source)
        );
        assert!(fx.temp_is_empty());
    }

    #[test]
    fn test_container_skipped_on_old_revision() {
        let fx = Fixture::new();
        fx.install_version(24, "24.3.0");
        let mut pipeline = fx.pipeline();
        let three_mf = Arc::new(StubLoader::new(IntermediateFormat::ThreeMf));
        pipeline.add_loader(three_mf.clone());
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        pipeline
            .convert(Path::new("C:/cad/part.sldprt"))
            .expect("convert");
        // The broken-container revision never got a 3MF attempt.
        assert!(three_mf.loaded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rotation_applied_from_threshold_revision() {
        let fx = Fixture::new();
        fx.install_version(24, "24.0.0");
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let nodes = pipeline
            .convert(Path::new("C:/cad/part.sldprt"))
            .expect("convert");
        assert!(nodes[0].orientation.axis_angle().is_some());
    }

    #[test]
    fn test_rotation_skipped_below_threshold() {
        let fx = Fixture::new();
        fx.install_version(23, "23.1.0");
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let nodes = pipeline
            .convert(Path::new("C:/cad/part.sldprt"))
            .expect("convert");
        // Pre-2016 output is already in the host coordinate system.
        assert!(nodes[0].orientation.axis_angle().is_none());
    }

    #[test]
    fn test_rotation_skipped_when_auto_rotate_disabled() {
        let fx = Fixture::new();
        fx.install_version(26, "26.0.0");
        let config = ConverterConfig {
            temp_root: Some(fx.temp.path().to_path_buf()),
            show_settings_dialog: false,
            auto_rotate: false,
            ..Default::default()
        };
        let mut pipeline = ConversionPipeline::new(
            fx.transport.clone() as Arc<dyn AutomationTransport>,
            fx.registry.clone() as Arc<dyn ServiceRegistry>,
            config,
        );
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let nodes = pipeline
            .convert(Path::new("C:/cad/part.sldprt"))
            .expect("convert");
        assert!(nodes[0].orientation.axis_angle().is_none());
    }

    #[test]
    fn test_cancel_in_dialog_touches_nothing() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        let config = ConverterConfig {
            temp_root: Some(fx.temp.path().to_path_buf()),
            ..Default::default()
        };
        let mut pipeline = ConversionPipeline::new(
            fx.transport.clone() as Arc<dyn AutomationTransport>,
            fx.registry.clone() as Arc<dyn ServiceRegistry>,
            config,
        )
        .with_dialog(Arc::new(CancelDialog));
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let err = pipeline.convert(Path::new("C:/cad/part.sldprt")).unwrap_err();
        assert!(matches!(err, ConversionError::Cancelled));
        // Cancelled before any application was touched.
        assert_eq!(fx.transport.live_app_count(), 0);
        assert_eq!(fx.transport.thread_balance(), (0, 0));
        assert_eq!(pipeline.metrics().snapshot().conversions_cancelled, 1);
    }

    #[test]
    fn test_no_loaders_short_circuits() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        let pipeline = fx.pipeline();

        let err = pipeline.convert(Path::new("C:/cad/part.sldprt")).unwrap_err();
        assert!(matches!(err, ConversionError::NoFormatHandlers));
        assert_eq!(fx.transport.live_app_count(), 0);
    }

    #[test]
    fn test_no_installation() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let err = pipeline.convert(Path::new("C:/cad/part.sldprt")).unwrap_err();
        assert!(matches!(err, ConversionError::NoInstallation));
        // No session was ever started.
        assert_eq!(fx.transport.live_app_count(), 0);
        assert_eq!(fx.transport.thread_balance(), (0, 0));
    }

    #[test]
    fn test_unsupported_extension() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline();
        let err = pipeline.convert(Path::new("C:/cad/mesh.step")).unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedExtension { .. }));
    }

    #[test]
    fn test_drawing_with_two_references_is_fatal_not_retried() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        fx.install_version(24, "24.0.0");
        fx.transport.add_document(
            "C:/cad/layout.slddrw",
            DocBehavior {
                references: vec![
                    "C:/cad/a.sldprt".to_string(),
                    "C:/cad/b.sldprt".to_string(),
                ],
                ..Default::default()
            },
        );
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let err = pipeline
            .convert(Path::new("C:/cad/layout.slddrw"))
            .unwrap_err();
        match err {
            ConversionError::DrawingReferences { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        // Document errors are not retried on other versions: only one
        // conversion session was ever started, and no export was attempted.
        let snap = pipeline.metrics().snapshot();
        assert_eq!(snap.sessions_started, 1);
        assert_eq!(snap.exports_attempted, 0);
        assert_eq!(fx.transport.live_app_count(), 0);
    }

    #[test]
    fn test_drawing_resolves_to_referenced_part() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        fx.transport.add_document(
            "C:/cad/plate.slddrw",
            DocBehavior {
                references: vec!["C:/cad/plate.sldprt".to_string()],
                ..Default::default()
            },
        );
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let source = Path::new("C:/cad/plate.slddrw");
        let nodes = pipeline.convert(source).expect("convert");
        // Provenance is rewritten to the file the user asked for, the
        // drawing, not the part it resolved to.
        assert_eq!(
            nodes[0].mesh.as_ref().and_then(|m| m.file_name.as_deref()),
            Some(source)
        );
    }

    #[test]
    fn test_export_writing_no_file_is_absorbed() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        fx.transport.set_save_behavior("stl", SaveBehavior::NoFile);
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let err = pipeline.convert(Path::new("C:/cad/part.sldprt")).unwrap_err();
        assert!(matches!(err, ConversionError::Exhausted { .. }));
        // Sessions were still torn down cleanly.
        assert_eq!(fx.transport.live_app_count(), 0);
        assert!(pipeline.metrics().snapshot().export_failures >= 1);
    }

    #[test]
    fn test_candidate_fallback_to_older_version() {
        let fx = Fixture::new();
        fx.install_version(24, "24.0.0");
        fx.install_version(25, "25.0.0");
        // The newest version refuses to start.
        let mut broken = MockService::with_revision("25.0.0");
        broken.fail_attach = true;
        fx.transport.add_service("SldWorks.Application.25", broken);

        // Optimistic discovery so the broken version stays in the
        // candidate list and fails at session start instead.
        let config = ConverterConfig {
            temp_root: Some(fx.temp.path().to_path_buf()),
            show_settings_dialog: false,
            run_startup_checks: false,
            ..Default::default()
        };
        let mut pipeline = ConversionPipeline::new(
            fx.transport.clone() as Arc<dyn AutomationTransport>,
            fx.registry.clone() as Arc<dyn ServiceRegistry>,
            config,
        );
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));

        let nodes = pipeline.convert(Path::new("C:/cad/part.sldprt"));
        // Version 25 is skipped and 24 completes the conversion.
        assert!(nodes.is_ok());
        assert!(pipeline.metrics().snapshot().session_failures >= 1);
    }

    #[test]
    fn test_conversions_are_serialized_process_wide() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));
        let pipeline = Arc::new(pipeline);

        std::thread::scope(|scope| {
            for i in 0..4 {
                let pipeline = Arc::clone(&pipeline);
                scope.spawn(move || {
                    let path = format!("C:/cad/part{i}.sldprt");
                    pipeline.convert(Path::new(&path)).expect("convert");
                });
            }
        });

        // The process-wide lock kept at most one live instance at a time.
        assert_eq!(fx.transport.max_concurrent_apps(), 1);
        assert_eq!(pipeline.metrics().snapshot().conversions_succeeded, 4);
    }

    #[test]
    fn test_discovery_probes_serialize_with_conversions() {
        let fx = Fixture::new();
        fx.install_version(25, "25.0.0");
        let mut pipeline = fx.pipeline();
        pipeline.add_loader(Arc::new(StubLoader::new(IntermediateFormat::Stl)));
        let pipeline = Arc::new(pipeline);

        std::thread::scope(|scope| {
            let converter = Arc::clone(&pipeline);
            scope.spawn(move || {
                for i in 0..3 {
                    let path = format!("C:/cad/part{i}.sldprt");
                    converter.convert(Path::new(&path)).expect("convert");
                }
            });
            let refresher = Arc::clone(&pipeline);
            scope.spawn(move || {
                for _ in 0..3 {
                    refresher.refresh_installations();
                    assert!(refresher.discovery().has_any_operational(&SolidWorks));
                }
            });
        });

        // Probe instances and conversion instances never overlapped.
        assert_eq!(fx.transport.max_concurrent_apps(), 1);
        assert_eq!(pipeline.metrics().snapshot().conversions_succeeded, 3);
    }
}
