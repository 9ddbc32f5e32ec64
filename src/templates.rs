//! Template registry
//!
//! Each non-url [`FormatId`] renders through `<base>/<slug>.html`. The base
//! directory is picked once from two candidates: the development layout
//! (`render/dist` next to the crate manifest) when it exists, otherwise the
//! installed layout (`templates` next to the executable).

use crate::format::FormatId;
use crate::{Error, Result};
use log::debug;
use std::path::{Path, PathBuf};

/// The two candidate template directories, in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRoots {
    pub dev: PathBuf,
    pub installed: PathBuf,
}

impl TemplateRoots {
    /// Both roots pointing at the same directory (used for `--templates`).
    pub fn single(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            dev: dir.clone(),
            installed: dir,
        }
    }
}

impl Default for TemplateRoots {
    fn default() -> Self {
        let dev = Path::new(env!("CARGO_MANIFEST_DIR")).join("render").join("dist");
        let installed = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.join("templates")))
            .unwrap_or_else(|| PathBuf::from("templates"));
        Self { dev, installed }
    }
}

/// How a format reaches the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderingStrategy {
    /// Load this HTML template with the payload injected beforehand
    TemplateAt(PathBuf),
    /// Navigate straight to the caller's URL
    DirectNavigation,
}

impl RenderingStrategy {
    /// `file://` address of the template, if this strategy has one.
    pub fn template_url(&self) -> Result<Option<String>> {
        match self {
            RenderingStrategy::DirectNavigation => Ok(None),
            RenderingStrategy::TemplateAt(path) => {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    std::env::current_dir()?.join(path)
                };
                url::Url::from_file_path(&absolute)
                    .map(|u| Some(u.to_string()))
                    .map_err(|_| {
                        Error::ConfigError(format!("Template path is not addressable: {}", absolute.display()))
                    })
            }
        }
    }
}

/// Resolves formats to templates under a fixed base directory.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    base: PathBuf,
}

impl TemplateRegistry {
    /// Pick the base directory: dev layout if present, else installed layout.
    pub fn resolve(roots: &TemplateRoots) -> Self {
        let base = if roots.dev.is_dir() {
            roots.dev.clone()
        } else {
            roots.installed.clone()
        };
        debug!("template base directory: {}", base.display());
        Self { base }
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Find the rendering strategy for a resolved format.
    ///
    /// `Url` never touches the filesystem. A missing template for any other
    /// format is a packaging defect and fails with [`Error::TemplateMissing`].
    pub fn locate(&self, format: FormatId) -> Result<RenderingStrategy> {
        match format {
            FormatId::Url => Ok(RenderingStrategy::DirectNavigation),
            FormatId::Unknown => Err(Error::UnrecognizedFormat(format!(
                "No template available for format: {}",
                format
            ))),
            _ => {
                let path = self.base.join(format!("{}.html", format.slug()));
                if !path.is_file() {
                    return Err(Error::TemplateMissing(path));
                }
                Ok(RenderingStrategy::TemplateAt(path))
            }
        }
    }
}
