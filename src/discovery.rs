//! Installation discovery.
//!
//! Enumerates registered application versions from the system service
//! registry and probes each one through four staged checks. The stages are
//! strictly monotonic: a version failing stage N is never subjected to
//! stage N+1, and the diagnostic flags record exactly how far it got.
//!
//! Probing is expensive (stage three boots the real application), so
//! results are cached per adapter until explicitly refreshed.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::application::CadApplication;
use crate::com::{ApartmentGuard, AutomationTransport, expect_str};
use crate::session::Revision;

/// Read-only view of the system's automation service registrations.
pub trait ServiceRegistry: Send + Sync {
    /// Whether the prog id has a registration at all.
    fn is_registered(&self, prog_id: &str) -> bool;

    /// Major versions registered under `base_prog_id.<major>` keys.
    fn registered_major_versions(&self, base_prog_id: &str) -> Vec<u32>;

    /// The open command registered for the prog id, if any.
    fn open_command(&self, prog_id: &str) -> Option<String>;
}

/// Registry-backed implementation reading HKEY_CLASSES_ROOT.
#[cfg(windows)]
pub struct WindowsServiceRegistry;

#[cfg(windows)]
impl ServiceRegistry for WindowsServiceRegistry {
    fn is_registered(&self, prog_id: &str) -> bool {
        winreg::RegKey::predef(winreg::enums::HKEY_CLASSES_ROOT)
            .open_subkey(prog_id)
            .is_ok()
    }

    fn registered_major_versions(&self, base_prog_id: &str) -> Vec<u32> {
        let root = winreg::RegKey::predef(winreg::enums::HKEY_CLASSES_ROOT);
        let prefix = format!("{base_prog_id}.");
        let mut versions: Vec<u32> = root
            .enum_keys()
            .filter_map(Result::ok)
            .filter_map(|key| key.strip_prefix(&prefix)?.parse().ok())
            .collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }

    fn open_command(&self, prog_id: &str) -> Option<String> {
        winreg::RegKey::predef(winreg::enums::HKEY_CLASSES_ROOT)
            .open_subkey(format!("{prog_id}\\shell\\open\\command"))
            .ok()?
            .get_value::<String, _>("")
            .ok()
    }
}

/// Extract the executable path from a registered open command such as
/// `"C:\Program Files\App\app.exe" "%1"`.
pub fn executable_from_command(command: &str) -> Option<PathBuf> {
    let trimmed = command.trim();
    let raw = if let Some(rest) = trimmed.strip_prefix('"') {
        rest.split('"').next()?
    } else {
        // Unquoted commands: take everything through the first ".exe".
        let lower = trimmed.to_ascii_lowercase();
        let end = lower.find(".exe")? + ".exe".len();
        &trimmed[..end]
    };
    if raw.is_empty() { None } else { Some(PathBuf::from(raw)) }
}

/// How far a registered version got through the staged checks. Each flag
/// implies all the ones before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticFlags {
    /// Stage one: the automation service is registered.
    pub com_registered: bool,
    /// Stage two: the registered executable exists on disk.
    pub executable_found: bool,
    /// Stage three: a live instance reported a matching revision.
    pub revision_number: bool,
    /// Stage four: the live instance exposes every required member.
    pub functions_available: bool,
}

/// One discovered installation of a CAD application.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationRecord {
    /// Major version of the installation.
    pub major_version: u32,
    /// Version-pinned automation service name.
    pub service_name: String,
    /// Resolved executable path, when stage two found one.
    pub install_path: Option<PathBuf>,
    /// Whether every check passed and the version is usable.
    pub is_operational: bool,
    /// Per-stage results for diagnostics.
    pub diagnostics: DiagnosticFlags,
}

/// Staged installation prober with a per-adapter result cache.
pub struct InstallationDiscovery {
    registry: Arc<dyn ServiceRegistry>,
    transport: Arc<dyn AutomationTransport>,
    run_checks: bool,
    cache: Mutex<HashMap<&'static str, Vec<InstallationRecord>>>,
}

impl InstallationDiscovery {
    /// Create a discovery service. With `run_checks` disabled, every
    /// registered version is optimistically reported operational without
    /// booting anything.
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        transport: Arc<dyn AutomationTransport>,
        run_checks: bool,
    ) -> Self {
        Self {
            registry,
            transport,
            run_checks,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Discovered installations for the adapter, most recent first. Probes
    /// on first use, cached afterwards.
    pub fn installations(&self, app: &dyn CadApplication) -> Vec<InstallationRecord> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(app.id())
            .or_insert_with(|| self.probe_all(app))
            .clone()
    }

    /// Drop cached results so the next lookup probes again.
    pub fn refresh(&self, app: &dyn CadApplication) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app.id());
    }

    /// Operational major versions, most recent first.
    pub fn operational_versions(&self, app: &dyn CadApplication) -> Vec<u32> {
        self.installations(app)
            .iter()
            .filter(|record| record.is_operational)
            .map(|record| record.major_version)
            .collect()
    }

    /// Whether at least one version is usable.
    pub fn has_any_operational(&self, app: &dyn CadApplication) -> bool {
        !self.operational_versions(app).is_empty()
    }

    fn probe_all(&self, app: &dyn CadApplication) -> Vec<InstallationRecord> {
        // Stage three attaches to live instances, which must not interleave
        // with a conversion driving one. Held for the whole probe run;
        // callers hold the cache lock around this, never the reverse.
        let _conversion = crate::lock::acquire();

        let mut majors = self
            .registry
            .registered_major_versions(app.default_service_name());
        majors.sort_unstable_by(|a, b| b.cmp(a));

        info!(
            app = app.id(),
            registered = majors.len(),
            checks = self.run_checks,
            "Probing registered installations"
        );
        majors
            .into_iter()
            .map(|major| self.probe_version(app, major))
            .collect()
    }

    fn probe_version(&self, app: &dyn CadApplication, major: u32) -> InstallationRecord {
        let service_name = app.versioned_service_name(major);
        let mut record = InstallationRecord {
            major_version: major,
            service_name: service_name.clone(),
            install_path: None,
            is_operational: false,
            diagnostics: DiagnosticFlags::default(),
        };

        // Stage one: registration. Uninstallers frequently leave the
        // versioned key behind, which is why the later stages exist.
        if !self.registry.is_registered(&service_name) {
            debug!(service = service_name, "Service not registered");
            return record;
        }
        record.diagnostics.com_registered = true;

        // Stage two: the registered executable actually exists.
        let executable = self
            .registry
            .open_command(&service_name)
            .as_deref()
            .and_then(executable_from_command)
            .filter(|path| path.is_file());
        match executable {
            Some(path) => {
                // Canonicalize to expand 8.3 short paths left by installers.
                record.install_path = Some(std::fs::canonicalize(&path).unwrap_or(path));
                record.diagnostics.executable_found = true;
            }
            None => {
                warn!(
                    service = service_name,
                    "Registered but its executable is missing, skipping"
                );
                return record;
            }
        }

        if !self.run_checks {
            // Optimistic mode: registration plus executable is enough.
            record.diagnostics.revision_number = true;
            record.diagnostics.functions_available = true;
            record.is_operational = true;
            return record;
        }

        // Stages three and four need a live instance.
        match self.probe_live(app, &service_name, major) {
            Ok((revision_ok, functions_ok)) => {
                record.diagnostics.revision_number = revision_ok;
                record.diagnostics.functions_available = revision_ok && functions_ok;
            }
            Err(e) => {
                warn!(service = service_name, error = %e, "Liveness probe failed");
            }
        }
        record.is_operational = record.diagnostics.functions_available;
        if record.is_operational {
            info!(service = service_name, "Installation is operational");
        }
        record
    }

    /// Boot (or attach to) the versioned service, verify its self-reported
    /// revision, and probe the required members. Instances created here are
    /// always exited and released.
    fn probe_live(
        &self,
        app: &dyn CadApplication,
        service_name: &str,
        major: u32,
    ) -> Result<(bool, bool), crate::com::AutomationError> {
        let com = self.transport.as_ref();
        let _guard = ApartmentGuard::enter(com)?;
        let attached = com.attach_or_create(service_name)?;

        let revision_ok = com
            .get(attached.handle, "RevisionNumber")
            .and_then(|v| expect_str("RevisionNumber", v))
            .and_then(|raw| raw.parse::<Revision>())
            .map(|revision| revision.major == major)
            .unwrap_or(false);

        let functions_ok = app
            .required_members()
            .iter()
            .all(|member| com.has_member(attached.handle, member));

        if !attached.was_running {
            if let Err(e) = com.call(attached.handle, "ExitApp", &[]) {
                warn!(service = service_name, error = %e, "Failed to exit probe instance");
            }
        }
        com.release(attached.handle);
        Ok((revision_ok, functions_ok))
    }
}
