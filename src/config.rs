//! Configuration for the conversion engine.
//!
//! Mirrors the persisted host preferences this engine consumes: which
//! installation to prefer, export quality, the auto-rotate correction,
//! whether to probe installations at startup, and whether the settings
//! dialog is shown before every conversion. The numeric boundaries of the
//! 3D-printing tessellation presets are deliberately configuration, not
//! constants.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Which installation a conversion should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallationPreference {
    /// Try every operational version, most recent first (the default).
    #[default]
    Latest,
    /// Only use the unversioned default service registration.
    SystemDefault,
    /// Pin to one specific major version.
    Version(u32),
}

/// Export quality selected by the user (or the settings dialog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportQuality {
    /// Application-defined coarse tessellation.
    Coarse,
    /// Application-defined fine tessellation (the default).
    #[default]
    Fine,
    /// 3D-printing draft preset (explicit tolerances from config).
    Print3dDraft,
    /// 3D-printing detail preset (explicit tolerances from config).
    Print3dDetail,
}

/// Explicit tessellation tolerances for one 3D-printing preset.
#[derive(Debug, Clone, Copy, PartialEq, Validate, Serialize, Deserialize)]
pub struct TessellationPreset {
    /// Maximum angular deviation between adjacent facets, in degrees.
    #[validate(range(min = 0.01, max = 30.0))]
    pub angle_tolerance_deg: f64,
    /// Maximum chordal deviation from the true surface, in millimeters.
    #[validate(range(min = 0.001, max = 1.0))]
    pub deviation_mm: f64,
}

/// The two 3D-printing presets.
#[derive(Debug, Clone, Copy, PartialEq, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Print3dPresets {
    /// Draft quality: fast exports, visibly faceted curves.
    #[validate(nested)]
    pub draft: TessellationPreset,
    /// Detail quality: slow exports, smooth curves.
    #[validate(nested)]
    pub detail: TessellationPreset,
}

impl Default for Print3dPresets {
    fn default() -> Self {
        Self {
            draft: TessellationPreset {
                angle_tolerance_deg: 1.0,
                deviation_mm: 0.1,
            },
            detail: TessellationPreset {
                angle_tolerance_deg: 0.5,
                deviation_mm: 0.02,
            },
        }
    }
}

/// Quality resolved against the configured presets, ready for export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedQuality {
    /// Use the application's coarse tessellation setting.
    Coarse,
    /// Use the application's fine tessellation setting.
    Fine,
    /// Custom tessellation with explicit tolerances.
    Custom(TessellationPreset),
}

/// Engine configuration.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Installation preference override.
    #[serde(default)]
    pub preferred_installation: InstallationPreference,

    /// Export quality used when the settings dialog is skipped or returns
    /// no explicit choice.
    #[serde(default)]
    pub export_quality: ExportQuality,

    /// Apply the 90-degree coordinate-system correction on affected
    /// application revisions.
    #[serde(default = "default_true")]
    pub auto_rotate: bool,

    /// Probe each registered installation at startup. When disabled, every
    /// registered version is optimistically considered operational.
    #[serde(default = "default_true")]
    pub run_startup_checks: bool,

    /// Show the blocking settings dialog before each conversion.
    #[serde(default = "default_true")]
    pub show_settings_dialog: bool,

    /// Root directory for temporary export files.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,

    /// Tessellation tolerances for the 3D-printing presets.
    #[serde(default)]
    #[validate(nested)]
    pub print3d_presets: Print3dPresets,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            preferred_installation: InstallationPreference::Latest,
            export_quality: ExportQuality::default(),
            auto_rotate: default_true(),
            run_startup_checks: default_true(),
            show_settings_dialog: default_true(),
            temp_root: None,
            print3d_presets: Print3dPresets::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl ConverterConfig {
    /// Resolve the effective temp root directory.
    pub fn effective_temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cad-com-converter"))
    }

    /// Resolve an [`ExportQuality`] against the configured presets.
    pub fn resolve_quality(&self, quality: ExportQuality) -> ResolvedQuality {
        match quality {
            ExportQuality::Coarse => ResolvedQuality::Coarse,
            ExportQuality::Fine => ResolvedQuality::Fine,
            ExportQuality::Print3dDraft => ResolvedQuality::Custom(self.print3d_presets.draft),
            ExportQuality::Print3dDetail => ResolvedQuality::Custom(self.print3d_presets.detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConverterConfig::default();
        assert_eq!(
            config.preferred_installation,
            InstallationPreference::Latest
        );
        assert_eq!(config.export_quality, ExportQuality::Fine);
        assert!(config.auto_rotate);
        assert!(config.run_startup_checks);
        assert!(config.show_settings_dialog);
        assert!(config.temp_root.is_none());
    }

    #[test]
    fn test_effective_temp_root_override() {
        let config = ConverterConfig {
            temp_root: Some(PathBuf::from("/scratch/exports")),
            ..Default::default()
        };
        assert_eq!(
            config.effective_temp_root(),
            PathBuf::from("/scratch/exports")
        );
    }

    #[test]
    fn test_resolve_quality_uses_presets() {
        let mut config = ConverterConfig::default();
        config.print3d_presets.draft.angle_tolerance_deg = 2.0;

        match config.resolve_quality(ExportQuality::Print3dDraft) {
            ResolvedQuality::Custom(preset) => {
                assert_eq!(preset.angle_tolerance_deg, 2.0);
            }
            other => panic!("expected custom quality, got {other:?}"),
        }
        assert_eq!(
            config.resolve_quality(ExportQuality::Coarse),
            ResolvedQuality::Coarse
        );
    }

    #[test]
    fn test_validation_rejects_out_of_range_presets() {
        let mut config = ConverterConfig::default();
        config.print3d_presets.detail.deviation_mm = 50.0;
        assert!(config.validate().is_err());

        config.print3d_presets.detail.deviation_mm = 0.02;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = ConverterConfig {
            preferred_installation: InstallationPreference::Version(24),
            export_quality: ExportQuality::Print3dDetail,
            auto_rotate: false,
            ..Default::default()
        };

        let json = serde_json::to_string(&config).expect("serialize");
        let deser: ConverterConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(
            deser.preferred_installation,
            InstallationPreference::Version(24)
        );
        assert_eq!(deser.export_quality, ExportQuality::Print3dDetail);
        assert!(!deser.auto_rotate);
    }

    #[test]
    fn test_toml_deserialization_partial() {
        let toml_str = "auto_rotate = false\nexport_quality = \"coarse\"\n";
        let config: ConverterConfig = toml::from_str(toml_str).expect("parse toml");
        assert!(!config.auto_rotate);
        assert_eq!(config.export_quality, ExportQuality::Coarse);
        // Untouched fields keep their defaults
        assert!(config.show_settings_dialog);
    }
}
