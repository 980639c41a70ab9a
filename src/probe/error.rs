//! Probe error types
//!
//! Every failure the probe can produce is recoverable: the engine folds them
//! into a single "external application unavailable" condition for the tick.

use super::{Address, ProcessId};
use serde::Serialize;
use thiserror::Error;

/// Discriminant of a [`ProbeError`], cheap to compare across ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    ProcessNotFound,
    ModuleNotFound,
    AccessDenied,
    InvalidParameter,
    PartialCopy,
    Unknown,
    LayoutNotFound,
}

impl std::fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProbeErrorKind::ProcessNotFound => "process not found",
            ProbeErrorKind::ModuleNotFound => "module not found",
            ProbeErrorKind::AccessDenied => "access denied",
            ProbeErrorKind::InvalidParameter => "invalid parameter",
            ProbeErrorKind::PartialCopy => "partial copy",
            ProbeErrorKind::Unknown => "unknown probe error",
            ProbeErrorKind::LayoutNotFound => "no memory layout",
        };
        f.write_str(name)
    }
}

/// Errors raised while locating or reading the external process
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("process '{name}' is not running")]
    ProcessNotFound { name: String },

    #[error("module '{module}' is not loaded in process {pid}")]
    ModuleNotFound { pid: ProcessId, module: String },

    #[error("access denied to process {pid}")]
    AccessDenied { pid: ProcessId },

    #[error("invalid parameter reading {len} bytes at {address:#x}")]
    InvalidParameter { address: Address, len: usize },

    #[error("partial copy: memory at {address:#x} ({len} bytes) is inaccessible")]
    PartialCopy { address: Address, len: usize },

    #[error("unknown error (os code {code}) reading memory at {address:#x}")]
    Unknown { address: Address, code: i32 },

    #[error("no memory layout for external version {version}")]
    LayoutNotFound { version: String },
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::ProcessNotFound { .. } => ProbeErrorKind::ProcessNotFound,
            ProbeError::ModuleNotFound { .. } => ProbeErrorKind::ModuleNotFound,
            ProbeError::AccessDenied { .. } => ProbeErrorKind::AccessDenied,
            ProbeError::InvalidParameter { .. } => ProbeErrorKind::InvalidParameter,
            ProbeError::PartialCopy { .. } => ProbeErrorKind::PartialCopy,
            ProbeError::Unknown { .. } => ProbeErrorKind::Unknown,
            ProbeError::LayoutNotFound { .. } => ProbeErrorKind::LayoutNotFound,
        }
    }
}
