//! Per-leaf context sidecar
//!
//! Native archives may carry a small JSON object next to them
//! (`cpu.wsp` → `cpu.context.json`). It is read lazily on first access and
//! rewritten in full on every update.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Context mapping attached to a leaf
pub type Context = HashMap<String, serde_json::Value>;

/// Suffix replacing the archive extension for the sidecar file
pub const CONTEXT_SUFFIX: &str = ".context.json";

/// Lazily-loaded sidecar context of one archive
#[derive(Debug)]
pub struct ContextStore {
    sidecar: PathBuf,
    cached: Mutex<Option<Context>>,
}

impl ContextStore {
    /// Context store for the archive at `fs_path` with the given extension
    pub fn for_archive(fs_path: &Path, extension: &str) -> Self {
        let path = fs_path.to_string_lossy();
        let base = path.strip_suffix(extension).unwrap_or(&path);
        Self {
            sidecar: PathBuf::from(format!("{}{}", base, CONTEXT_SUFFIX)),
            cached: Mutex::new(None),
        }
    }

    /// Path of the sidecar file
    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }

    /// Current context, loading the sidecar on first access
    pub fn get(&self) -> Result<Context> {
        let mut cached = self.cached.lock();
        Ok(self.loaded(&mut cached)?.clone())
    }

    /// Merge `patch` into the context and rewrite the sidecar
    pub fn update(&self, patch: Context) -> Result<()> {
        let mut cached = self.cached.lock();
        let context = self.loaded(&mut cached)?;
        context.extend(patch);
        self.save(context)
    }

    fn loaded<'a>(&self, cached: &'a mut Option<Context>) -> Result<&'a mut Context> {
        if cached.is_none() {
            *cached = Some(self.load()?);
        }
        cached
            .as_mut()
            .ok_or_else(|| Error::Serialization("context cache not populated".to_string()))
    }

    fn load(&self) -> Result<Context> {
        if !self.sidecar.exists() {
            return Ok(Context::new());
        }

        let contents = fs::read_to_string(&self.sidecar)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Serialization(format!(
                "Failed to parse context {}: {}",
                self.sidecar.display(),
                e
            ))
        })
    }

    /// Write the whole context through a temp file and rename
    fn save(&self, context: &Context) -> Result<()> {
        let contents = serde_json::to_string_pretty(context)?;

        let temp_path = self
            .sidecar
            .with_extension(format!("{}.tmp", std::process::id()));
        fs::write(&temp_path, contents)?;

        let rename_result = fs::rename(&temp_path, &self.sidecar);
        if rename_result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        rename_result?;
        Ok(())
    }
}
