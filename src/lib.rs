//! # CAD COM Converter
//!
//! Converts vendor CAD documents (SolidWorks parts, assemblies and
//! drawings) into mesh scene nodes by driving the locally installed CAD
//! application over its out-of-process automation interface.
//!
//! ## Installation Discovery
//!
//! On Windows, registered application versions are enumerated from the
//! versioned automation prog ids (`SldWorks.Application.<major>`) in
//! `HKEY_CLASSES_ROOT` and probed through four staged checks before they
//! are ever used for a conversion. Uninstallers routinely leave stale
//! registrations behind; the staged checks filter those out.
//!
//! ## Conversion
//!
//! [`ConversionPipeline::convert`] serializes conversions process-wide,
//! walks application version candidates per the configured installation
//! preference, exports into the best intermediate format the connected
//! revision supports (3MF when usable, STL as fallback), loads the export
//! through the host's mesh handlers, and guarantees that temporary files,
//! overwritten application settings and created application instances are
//! all cleaned up regardless of the outcome.

pub mod application;
pub mod com;
pub mod config;
pub mod dialog;
pub mod discovery;
pub mod document;
pub mod error;
pub mod formats;
mod lock;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod solidworks;

pub use application::{ApplicationRegistry, CadApplication};
pub use com::{AutomationError, AutomationTransport, ComValue, Handle};
pub use config::{ConverterConfig, ExportQuality, InstallationPreference};
pub use dialog::{DialogOutcome, SettingsDialog};
pub use discovery::{InstallationDiscovery, InstallationRecord, ServiceRegistry};
pub use error::ConversionError;
pub use formats::{IntermediateFormat, MeshLoader};
pub use metrics::{ConversionMetrics, MetricsSnapshot};
pub use models::{MeshData, MeshNode};
pub use pipeline::ConversionPipeline;
pub use solidworks::SolidWorks;
