//! SolidWorks adapter.
//!
//! Drives SolidWorks over its automation surface: versioned service names,
//! the four session-wide UI settings, document open/activate/close, drawing
//! reference resolution, and STL/3MF export with preference backup.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::application::CadApplication;
use crate::com::{
    AutomationTransport, ComValue, ReleaseGuard, expect_handle, expect_int, expect_str,
};
use crate::config::ResolvedQuality;
use crate::document::{DocumentKind, OpenedDocument};
use crate::error::ConversionError;
use crate::formats::IntermediateFormat;
use crate::session::{AutomationSession, SettingStash};

/// Version-independent prog id; resolves to the system default install.
pub const BASE_SERVICE_NAME: &str = "SldWorks.Application";

/// Drawings may chain to other drawings in pathological files; cap the
/// reference resolution.
const MAX_DRAWING_DEPTH: u32 = 4;

/// swUserPreferenceToggle_e and friends, as SolidWorks numbers them.
mod pref {
    /// swSTLComponentsIntoOneFile
    pub const STL_COMPONENTS_INTO_ONE_FILE: i32 = 72;
    /// swSTLBinaryFormat
    pub const STL_BINARY_FORMAT: i32 = 70;
    /// swExportSTLQuality
    pub const EXPORT_STL_QUALITY: i32 = 77;
    /// swExportStlUnits
    pub const EXPORT_STL_UNITS: i32 = 210;
    /// swSTLDeviation
    pub const STL_DEVIATION: i32 = 17;
    /// swSTLAngleTolerance
    pub const STL_ANGLE_TOLERANCE: i32 = 18;
}

/// swDocumentTypes_e
mod doc_type {
    pub const PART: i32 = 1;
    pub const ASSEMBLY: i32 = 2;
    pub const DRAWING: i32 = 3;
}

/// swSTLQuality_e
mod stl_quality {
    pub const COARSE: i32 = 1;
    pub const FINE: i32 = 2;
    pub const CUSTOM: i32 = 3;
}

/// swLengthUnit_e: millimeters.
const UNITS_MM: i32 = 0;

/// swRebuildOnActivation_e: don't rebuild the activated document.
const DONT_REBUILD_ACTIVE_DOC: i32 = 1;

/// Marketing name for a major revision, for logs.
pub fn version_name(major: u32) -> Option<&'static str> {
    match major {
        21 => Some("SolidWorks 2013"),
        22 => Some("SolidWorks 2014"),
        23 => Some("SolidWorks 2015"),
        24 => Some("SolidWorks 2016"),
        25 => Some("SolidWorks 2017"),
        26 => Some("SolidWorks 2018"),
        27 => Some("SolidWorks 2019"),
        28 => Some("SolidWorks 2020"),
        _ => None,
    }
}

fn doc_type_for(kind: DocumentKind) -> i32 {
    match kind {
        DocumentKind::Part => doc_type::PART,
        DocumentKind::Assembly => doc_type::ASSEMBLY,
        DocumentKind::Drawing => doc_type::DRAWING,
    }
}

/// The SolidWorks application adapter.
#[derive(Debug, Default)]
pub struct SolidWorks;

impl SolidWorks {
    /// Title of the currently frontmost document, if any.
    fn active_doc_title(
        com: &dyn AutomationTransport,
        session: &AutomationSession<'_>,
    ) -> Option<String> {
        let active = com.get(session.instance(), "IActiveDoc2").ok()?;
        let handle = active.as_handle()?;
        expect_str("GetTitle", com.get(handle, "GetTitle").ok()?).ok()
    }

    /// Bring a document to the front by title; failures are logged only.
    fn activate(com: &dyn AutomationTransport, session: &AutomationSession<'_>, title: &str) {
        let result = com.call(
            session.instance(),
            "ActivateDoc3",
            &[
                ComValue::Str(title.to_string()),
                ComValue::Bool(true),
                ComValue::Int(DONT_REBUILD_ACTIVE_DOC),
            ],
        );
        if let Err(e) = result {
            warn!(title, error = %e, "Failed to activate document");
        }
    }

    fn open_with_depth(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        path: &Path,
        depth: u32,
    ) -> Result<OpenedDocument, ConversionError> {
        let kind = DocumentKind::from_path(path).ok_or_else(|| {
            ConversionError::UnsupportedExtension {
                path: path.to_path_buf(),
            }
        })?;

        let displaced_title = Self::active_doc_title(com, session);

        let path_str = path.to_string_lossy().to_string();
        // Guarded so the specification reference is released on every exit
        // path, including transport errors from the calls below.
        let spec = ReleaseGuard::new(
            com,
            expect_handle(
                "GetOpenDocSpec",
                com.call(
                    session.instance(),
                    "GetOpenDocSpec",
                    &[ComValue::Str(path_str.clone())],
                )?,
            )?,
        );
        com.set(spec.handle(), "DocumentType", ComValue::Int(doc_type_for(kind)))?;
        com.set(spec.handle(), "Silent", ComValue::Bool(true))?;
        com.set(spec.handle(), "ReadOnly", ComValue::Bool(true))?;

        let opened = com.call(
            session.instance(),
            "OpenDoc7",
            &[ComValue::Handle(spec.handle())],
        )?;
        let handle = match opened.as_handle() {
            Some(h) => h,
            None => {
                let error_flag = com
                    .get(spec.handle(), "Error")
                    .ok()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                return Err(ConversionError::DocumentOpen {
                    path: path.to_path_buf(),
                    reason: if error_flag {
                        "application reported an open error".to_string()
                    } else {
                        "application returned no model".to_string()
                    },
                });
            }
        };
        if let Ok(warning) = com.get(spec.handle(), "Warning") {
            if warning.as_bool() == Some(true) {
                warn!(path = %path.display(), "Application reported a warning opening the document");
            }
        }
        drop(spec);

        let title = match com
            .get(handle, "GetTitle")
            .and_then(|v| expect_str("GetTitle", v))
        {
            Ok(title) => title,
            Err(e) => {
                // The document is open but unaddressable. Titles default
                // to the file name; close with that before bailing so the
                // instance does not keep an orphaned document alive.
                let fallback = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path_str.clone());
                if let Err(close_err) =
                    com.call(session.instance(), "QuitDoc", &[ComValue::Str(fallback)])
                {
                    warn!(path = %path.display(), error = %close_err, "Failed to close unaddressable document");
                }
                com.release(handle);
                return Err(ConversionError::DocumentOpen {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        Self::activate(com, session, &title);

        let document = OpenedDocument {
            handle,
            path: path.to_path_buf(),
            kind,
            title,
            displaced_title,
        };

        if kind == DocumentKind::Drawing {
            return self.resolve_drawing(com, session, document, depth);
        }
        Ok(document)
    }

    /// A drawing is never exported itself: find the one part or assembly it
    /// references, close the drawing, and open that instead.
    fn resolve_drawing(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        drawing: OpenedDocument,
        depth: u32,
    ) -> Result<OpenedDocument, ConversionError> {
        let dependencies = com.call(drawing.handle, "GetDependencies", &[]);
        // Close before inspecting the result so the drawing never lingers.
        let displaced = drawing.displaced_title.clone();
        let path = drawing.path.clone();
        self.close_document(com, session, drawing);

        let referenced: Vec<PathBuf> = dependencies?
            .as_list()
            .unwrap_or(&[])
            .iter()
            .filter_map(|v| v.as_str())
            .map(PathBuf::from)
            .filter(|p| {
                matches!(
                    DocumentKind::from_path(p),
                    Some(DocumentKind::Part | DocumentKind::Assembly)
                )
            })
            .collect();

        if referenced.len() != 1 {
            return Err(ConversionError::DrawingReferences {
                path,
                count: referenced.len(),
            });
        }
        if depth >= MAX_DRAWING_DEPTH {
            return Err(ConversionError::DocumentOpen {
                path,
                reason: "drawing reference chain too deep".to_string(),
            });
        }

        info!(
            drawing = %path.display(),
            referenced = %referenced[0].display(),
            "Converting the document referenced by the drawing"
        );
        let mut document = self.open_with_depth(com, session, &referenced[0], depth + 1)?;
        // The caller should restore what the drawing displaced, not the
        // drawing itself.
        document.displaced_title = displaced;
        Ok(document)
    }

    fn export_stl(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        document: &OpenedDocument,
        target: &Path,
        quality: &ResolvedQuality,
    ) -> Result<(), ConversionError> {
        let instance = session.instance();
        let mut stash = SettingStash::new(com);

        if document.kind == DocumentKind::Assembly {
            stash.set_preference(
                instance,
                "GetUserPreferenceToggle",
                "SetUserPreferenceToggle",
                &[ComValue::Int(pref::STL_COMPONENTS_INTO_ONE_FILE)],
                ComValue::Bool(true),
            )?;
        }

        let quality_value = match quality {
            ResolvedQuality::Coarse => stl_quality::COARSE,
            ResolvedQuality::Fine => stl_quality::FINE,
            ResolvedQuality::Custom(_) => stl_quality::CUSTOM,
        };
        stash.set_preference(
            instance,
            "GetUserPreferenceIntegerValue",
            "SetUserPreferenceIntegerValue",
            &[ComValue::Int(pref::EXPORT_STL_QUALITY)],
            ComValue::Int(quality_value),
        )?;
        if let ResolvedQuality::Custom(preset) = quality {
            stash.set_preference(
                instance,
                "GetUserPreferenceDoubleValue",
                "SetUserPreferenceDoubleValue",
                &[ComValue::Int(pref::STL_ANGLE_TOLERANCE)],
                ComValue::Double(preset.angle_tolerance_deg.to_radians()),
            )?;
            stash.set_preference(
                instance,
                "GetUserPreferenceDoubleValue",
                "SetUserPreferenceDoubleValue",
                &[ComValue::Int(pref::STL_DEVIATION)],
                ComValue::Double(preset.deviation_mm),
            )?;
        }
        stash.set_preference(
            instance,
            "GetUserPreferenceIntegerValue",
            "SetUserPreferenceIntegerValue",
            &[ComValue::Int(pref::EXPORT_STL_UNITS)],
            ComValue::Int(UNITS_MM),
        )?;
        stash.set_preference(
            instance,
            "GetUserPreferenceToggle",
            "SetUserPreferenceToggle",
            &[ComValue::Int(pref::STL_BINARY_FORMAT)],
            ComValue::Bool(true),
        )?;

        let result = com.call(
            document.handle,
            "SaveAs",
            &[ComValue::Str(target.to_string_lossy().to_string())],
        );
        // Restore even when the save failed; the stash drop is only the
        // backstop.
        stash.restore_all();

        match result {
            Ok(value) => {
                if value.as_bool() == Some(false) {
                    return Err(ConversionError::ExportFailed {
                        format: IntermediateFormat::Stl.to_string(),
                        reason: "application reported save failure".to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => Err(ConversionError::ExportFailed {
                format: IntermediateFormat::Stl.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn export_3mf(
        &self,
        com: &dyn AutomationTransport,
        document: &OpenedDocument,
        target: &Path,
    ) -> Result<(), ConversionError> {
        let result = com.call(
            document.handle,
            "SaveAs",
            &[ComValue::Str(target.to_string_lossy().to_string())],
        );
        match result {
            Ok(value) => {
                if value.as_bool() == Some(false) {
                    return Err(ConversionError::ExportFailed {
                        format: IntermediateFormat::ThreeMf.to_string(),
                        reason: "application reported save failure".to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => Err(ConversionError::ExportFailed {
                format: IntermediateFormat::ThreeMf.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl CadApplication for SolidWorks {
    fn id(&self) -> &'static str {
        "solidworks"
    }

    fn display_name(&self) -> &'static str {
        "SolidWorks"
    }

    fn default_service_name(&self) -> &'static str {
        BASE_SERVICE_NAME
    }

    fn versioned_service_name(&self, major: u32) -> String {
        format!("{BASE_SERVICE_NAME}.{major}")
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["sldprt", "sldasm", "slddrw"]
    }

    fn container_format_min_revision(&self) -> u32 {
        // 3MF export exists earlier but produces unusable files before
        // SolidWorks 2017.
        25
    }

    fn rotation_fix_min_revision(&self) -> u32 {
        // SolidWorks 2016 changed the export coordinate system; output
        // from it and later needs the X-axis correction.
        24
    }

    fn required_members(&self) -> &'static [&'static str] {
        &["OpenDoc7", "QuitDoc"]
    }

    fn start_session<'a>(
        &self,
        com: &'a dyn AutomationTransport,
        service_name: &str,
    ) -> Result<AutomationSession<'a>, ConversionError> {
        let attached =
            com.attach_or_create(service_name)
                .map_err(|e| ConversionError::SessionStart {
                    service: service_name.to_string(),
                    reason: e.to_string(),
                })?;
        let mut session =
            AutomationSession::new(com, service_name, attached.handle, attached.was_running);

        let revision = session
            .read_revision()
            .map_err(|e| ConversionError::SessionStart {
                service: service_name.to_string(),
                reason: e.to_string(),
            })?;
        info!(
            app = self.display_name(),
            service = service_name,
            revision = %revision,
            name = version_name(revision.major).unwrap_or("unknown release"),
            already_running = !session.created_instance(),
            "Connected to application"
        );

        let instance = session.instance();
        let frame = expect_handle("Frame", com.get(instance, "Frame")?)
            .map_err(|e| ConversionError::SessionStart {
                service: service_name.to_string(),
                reason: e.to_string(),
            })?;
        session.track_handle(frame);

        let apply = |session: &mut AutomationSession<'a>| -> Result<(), crate::com::AutomationError> {
            let stash = session.stash_mut();
            stash.set_property(instance, "UserControl", ComValue::Bool(false))?;
            stash.set_property(instance, "Visible", ComValue::Bool(false))?;
            stash.set_property(frame, "KeepInvisible", ComValue::Bool(true))?;
            stash.set_property(instance, "CommandInProgress", ComValue::Bool(true))?;
            Ok(())
        };
        if let Err(e) = apply(&mut session) {
            // Undo the subset that was applied before failing.
            session.restore_settings();
            self.stop_session(com, session);
            return Err(ConversionError::SessionStart {
                service: service_name.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(session)
    }

    fn open_document(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        path: &Path,
    ) -> Result<OpenedDocument, ConversionError> {
        self.open_with_depth(com, session, path, 0)
    }

    fn export_document(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        document: &OpenedDocument,
        format: IntermediateFormat,
        target: &Path,
        quality: &ResolvedQuality,
    ) -> Result<(), ConversionError> {
        match format {
            IntermediateFormat::Stl => self.export_stl(com, session, document, target, quality),
            IntermediateFormat::ThreeMf => self.export_3mf(com, document, target),
        }
    }

    fn close_document(
        &self,
        com: &dyn AutomationTransport,
        session: &mut AutomationSession<'_>,
        document: OpenedDocument,
    ) {
        let result = com.call(
            session.instance(),
            "QuitDoc",
            &[ComValue::Str(document.title.clone())],
        );
        if let Err(e) = result {
            warn!(title = document.title, error = %e, "Failed to close document");
        }
        com.release(document.handle);
        if let Some(title) = document.displaced_title {
            Self::activate(com, session, &title);
        }
    }

    fn stop_session(&self, com: &dyn AutomationTransport, mut session: AutomationSession<'_>) {
        session.restore_settings();

        if session.created_instance() {
            let remaining = com
                .call(session.instance(), "GetDocumentCount", &[])
                .and_then(|v| expect_int("GetDocumentCount", v))
                .unwrap_or(0);
            if remaining == 0 {
                debug!(
                    service = session.service_name(),
                    "Exiting application instance created for this conversion"
                );
                if let Err(e) = com.call(session.instance(), "ExitApp", &[]) {
                    warn!(error = %e, "Failed to exit application");
                }
            } else {
                debug!(
                    remaining,
                    "Leaving application running, documents still open"
                );
            }
        }
        session.release_handles();
    }
}
