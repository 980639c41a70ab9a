//! Where the config, extra layout tables and logs live
//!
//! - **Dev** (debug builds): `config.yaml` in the working directory wins.
//! - **Portable**: a `.portable` marker next to the executable keeps
//!   everything beside it.
//! - **Installed** (default): the platform data dir, e.g. `%APPDATA%\GP Sync`.

use anyhow::Context;
use std::path::{Path, PathBuf};

/// Directory name used in installed mode
const APP_NAME: &str = "GP Sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Dev,
    Portable,
    Installed,
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config: PathBuf,
    /// Default location of an extra layout table
    pub layouts: PathBuf,
    pub logs_dir: PathBuf,
    pub mode: PathMode,
}

impl AppPaths {
    /// Resolve paths for this run
    ///
    /// Runs before logging is set up, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let paths = Self::resolve(&exe_dir, &cwd, dirs::data_dir(), cfg!(debug_assertions));

        #[cfg(debug_assertions)]
        eprintln!("[paths] {:?} mode, base dir {}", paths.mode, paths.base_dir().display());

        paths
    }

    fn resolve(exe_dir: &Path, cwd: &Path, data_dir: Option<PathBuf>, dev: bool) -> Self {
        if dev && cwd.join("config.yaml").exists() {
            return Self::rooted(cwd, PathMode::Dev);
        }

        if exe_dir.join(".portable").exists() {
            return Self::rooted(exe_dir, PathMode::Portable);
        }

        let base = data_dir.unwrap_or_else(|| exe_dir.to_path_buf()).join(APP_NAME);
        Self::rooted(&base, PathMode::Installed)
    }

    fn rooted(base: &Path, mode: PathMode) -> Self {
        Self {
            config: base.join("config.yaml"),
            layouts: base.join("layouts.yaml"),
            logs_dir: base.join("logs"),
            mode,
        }
    }

    pub fn is_portable(&self) -> bool {
        self.mode != PathMode::Installed
    }

    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the logs and config directories
    ///
    /// Returns `true` when no config file exists yet, so the caller can write defaults.
    /// Runs before logging is set up, like [`AppPaths::detect`].
    pub fn ensure_directories(&self) -> anyhow::Result<bool> {
        for dir in [self.logs_dir.clone(), self.base_dir()] {
            if !dir.exists() {
                #[cfg(debug_assertions)]
                eprintln!("[paths] creating {}", dir.display());
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            }
        }

        Ok(!self.config.exists())
    }

    /// `layouts.yaml` next to the config, when present
    pub fn existing_layouts(&self) -> Option<PathBuf> {
        self.layouts.exists().then(|| self.layouts.clone())
    }
}
