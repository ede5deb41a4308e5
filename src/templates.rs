//! HTML templates compiled once at startup.

use std::path::{Path, PathBuf};

use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use thiserror::Error;

/// Extension of template files picked up from the template directory.
pub const TEMPLATE_EXTENSION: &str = "tmpl";

pub const INDEX_TEMPLATE: &str = "index.tmpl";
pub const EVENT_TEMPLATE: &str = "event.tmpl";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to read templates from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
}

/// Compiled template set.
#[derive(Debug)]
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    /// Compile every `*.tmpl` file directly inside `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let read_err = |source| TemplateError::Read {
            path: dir.to_path_buf(),
            source,
        };

        let mut templates = Self::empty();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path).map_err(|source| TemplateError::Read {
                path: path.clone(),
                source,
            })?;
            templates.add(name.to_string(), source)?;
            tracing::debug!("Compiled template {}", name);
        }
        Ok(templates)
    }

    /// Template set with no templates; fill with [`Templates::add`].
    pub fn empty() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        Self { env }
    }

    pub fn add(&mut self, name: String, source: String) -> Result<(), TemplateError> {
        self.env.add_template_owned(name, source)?;
        Ok(())
    }

    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, TemplateError> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }
}
