//! JSON result documents on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::evaluation::{Comparison, RenderEvaluation};

/// Writes result documents under one directory, overwriting earlier runs.
#[derive(Debug, Clone)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn render_path(&self, render_name: &str) -> PathBuf {
        self.dir.join(format!("{render_name}_results.json"))
    }

    pub fn comparison_path(&self) -> PathBuf {
        self.dir.join("comparison.json")
    }

    /// `<dir>/<render>_results.json`
    pub fn save_render(&self, evaluation: &RenderEvaluation) -> Result<PathBuf> {
        let path = self.render_path(&evaluation.render_name);
        self.write_json(&path, evaluation)?;
        Ok(path)
    }

    /// `<dir>/comparison.json`
    pub fn save_comparison(&self, comparison: &Comparison) -> Result<PathBuf> {
        let path = self.comparison_path();
        self.write_json(&path, comparison)?;
        Ok(path)
    }

    /// Any document under `<dir>/<file_name>`.
    pub fn save_document<T: Serialize>(&self, file_name: &str, document: &T) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        self.write_json(&path, document)?;
        Ok(path)
    }

    fn write_json<T: Serialize>(&self, path: &Path, document: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(document)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "results saved");
        Ok(())
    }
}
