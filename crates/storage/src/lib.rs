use directories::ProjectDirs;
use doc_model::{Color, OverlayDefaults, PercentSize, MAX_FONT_SIZE_PT, MIN_FONT_SIZE_PT};
use pdf_engine::{StandardFont, MAX_RENDER_SCALE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const PREFS_SCHEMA_VERSION: u32 = 1;
const PREFS_FILE_NAME: &str = "preferences.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Font used when annotations are baked into the exported document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExportFontPreference {
    Standard { font: StandardFont },
    /// A TrueType/OpenType file embedded into the output.
    TrueType { path: PathBuf },
}

impl Default for ExportFontPreference {
    fn default() -> Self {
        Self::Standard { font: StandardFont::Helvetica }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorPreferences {
    pub default_text: String,
    pub font_size_pt: f32,
    pub text_color: Color,
    pub rectangle_size: PercentSize,
    pub patch_margin_pt: f32,
    pub initial_scale: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub output_prefix: String,
    pub export_font: ExportFontPreference,
}

impl Default for EditorPreferences {
    fn default() -> Self {
        let overlay = OverlayDefaults::default();
        Self {
            default_text: overlay.text,
            font_size_pt: overlay.font_size_pt,
            text_color: overlay.color,
            rectangle_size: overlay.rectangle_size,
            patch_margin_pt: 2.0,
            initial_scale: 1.5,
            min_scale: 0.25,
            max_scale: 4.0,
            output_prefix: "edited_".to_owned(),
            export_font: ExportFontPreference::default(),
        }
    }
}

impl EditorPreferences {
    /// Repair values a hand-edited file may get wrong.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if !(self.min_scale.is_finite() && self.min_scale > 0.0) {
            self.min_scale = defaults.min_scale;
        }
        self.min_scale = self.min_scale.min(MAX_RENDER_SCALE);
        if !(self.max_scale.is_finite() && self.max_scale >= self.min_scale) {
            self.max_scale = self.min_scale.max(defaults.max_scale);
        }
        self.max_scale = self.max_scale.min(MAX_RENDER_SCALE);
        self.initial_scale = if self.initial_scale.is_finite() {
            self.initial_scale.clamp(self.min_scale, self.max_scale)
        } else {
            defaults.initial_scale.clamp(self.min_scale, self.max_scale)
        };
        self.font_size_pt = if self.font_size_pt.is_finite() {
            self.font_size_pt.clamp(MIN_FONT_SIZE_PT, MAX_FONT_SIZE_PT)
        } else {
            defaults.font_size_pt
        };
        if !(self.patch_margin_pt.is_finite() && self.patch_margin_pt >= 0.0) {
            self.patch_margin_pt = defaults.patch_margin_pt;
        }
        self.rectangle_size =
            PercentSize::new(self.rectangle_size.width, self.rectangle_size.height);

        self
    }

    pub fn overlay_defaults(&self) -> OverlayDefaults {
        OverlayDefaults {
            text: self.default_text.clone(),
            font_size_pt: self.font_size_pt,
            color: self.text_color,
            rectangle_size: self.rectangle_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferencesEnvelope {
    version: u32,
    preferences: EditorPreferences,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "PdfOverlay", "pdf-overlay")
            .ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.root.join(PREFS_FILE_NAME)
    }

    pub fn load_preferences(&self) -> Result<EditorPreferences, StorageError> {
        let path = self.preferences_path();
        if !path.exists() {
            return Ok(EditorPreferences::default());
        }

        let bytes = fs::read(&path)?;
        let envelope: PreferencesEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version > PREFS_SCHEMA_VERSION {
            tracing::warn!(
                version = envelope.version,
                supported = PREFS_SCHEMA_VERSION,
                path = %path.display(),
                "preferences written by a newer version"
            );
        }

        Ok(envelope.preferences.sanitized())
    }

    pub fn save_preferences(&self, preferences: &EditorPreferences) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope =
            PreferencesEnvelope { version: PREFS_SCHEMA_VERSION, preferences: preferences.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.preferences_path(), bytes)?;
        Ok(())
    }
}
