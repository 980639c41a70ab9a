//! External application transport, read through the memory probe
//!
//! Every call opens one [`ProbeSession`], picks the layout for the running
//! build, reads all fields and releases the handle before returning.

use crate::decoder::{decode, ExternalTransportState, RawTransportFields};
use crate::layout::{FieldLayout, LayoutTable, MemoryLayout, RawValue, ValueType};
use crate::probe::{PointerWidth, ProbeError, ProbeSession, ProcessId, ProcessProvider};
use serde::Serialize;
use tracing::{debug, info};

/// Anything the reconciliation engine can poll for an external snapshot
pub trait TransportSource {
    fn read_state(&mut self) -> Result<ExternalTransportState, ProbeError>;
}

/// One decoded snapshot with where it came from
#[derive(Debug, Clone, Serialize)]
pub struct Readout {
    pub pid: ProcessId,
    pub process_version: Option<String>,
    pub layout_version: String,
    pub state: ExternalTransportState,
}

pub struct ExternalTransport<P: ProcessProvider> {
    provider: P,
    process_name: String,
    layouts: LayoutTable,
    pinned_version: Option<String>,
    /// Version detected for the last seen process
    detected: Option<(ProcessId, Option<String>)>,
}

impl<P: ProcessProvider> ExternalTransport<P> {
    pub fn new(provider: P, process_name: impl Into<String>, layouts: LayoutTable) -> Self {
        Self {
            provider,
            process_name: process_name.into(),
            layouts,
            pinned_version: None,
            detected: None,
        }
    }

    /// Always use this layout version instead of detecting it
    pub fn with_pinned_version(mut self, version: Option<String>) -> Self {
        self.pinned_version = version;
        self
    }

    /// Apply a new target process and layout table
    pub fn reconfigure(&mut self, process_name: &str, layouts: LayoutTable, pinned_version: Option<String>) {
        if !self.process_name.eq_ignore_ascii_case(process_name) {
            self.detected = None;
        }
        self.process_name = process_name.to_string();
        self.layouts = layouts;
        self.pinned_version = pinned_version;
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn layouts(&self) -> &LayoutTable {
        &self.layouts
    }

    /// Read and decode one snapshot
    pub fn read(&mut self) -> Result<Readout, ProbeError> {
        let mut session = ProbeSession::open(&self.provider, &self.process_name)?;
        let pid = session.pid();

        let process_version = match &self.detected {
            Some((known, version)) if *known == pid => version.clone(),
            _ => {
                let version = session.process_version();
                info!(
                    "🎸 Found {} (pid {}, version {})",
                    self.process_name,
                    pid,
                    version.as_deref().unwrap_or("unknown")
                );
                self.detected = Some((pid, version.clone()));
                version
            }
        };

        let layout = self
            .layouts
            .select(self.pinned_version.as_deref(), process_version.as_deref())?;
        let raw = read_fields(&mut session, layout)?;
        let state = decode(&raw, &layout.flag_bits);

        Ok(Readout {
            pid,
            process_version,
            layout_version: layout.version.clone(),
            state,
        })
    }
}

impl<P: ProcessProvider> TransportSource for ExternalTransport<P> {
    fn read_state(&mut self) -> Result<ExternalTransportState, ProbeError> {
        self.read().map(|readout| readout.state)
    }
}

/// Read every field of `layout`; the first failure aborts the snapshot
fn read_fields<P: ProcessProvider>(
    session: &mut ProbeSession<'_, P>,
    layout: &MemoryLayout,
) -> Result<RawTransportFields, ProbeError> {
    let fields = &layout.fields;
    let width = layout.pointer_width;

    Ok(RawTransportFields {
        position: read_field(session, "position", &fields.position, width)?,
        rate: read_field(session, "rate", &fields.rate, width)?,
        play_flags: read_field(session, "play_flags", &fields.play_flags, width)?,
        loop_start: read_field(session, "loop_start", &fields.loop_start, width)?,
        loop_end: read_field(session, "loop_end", &fields.loop_end, width)?,
        loop_flags: read_field(session, "loop_flags", &fields.loop_flags, width)?,
        count_in_flags: read_field(session, "count_in_flags", &fields.count_in_flags, width)?,
    })
}

fn read_field<P: ProcessProvider>(
    session: &mut ProbeSession<'_, P>,
    name: &str,
    field: &FieldLayout,
    width: PointerWidth,
) -> Result<RawValue, ProbeError> {
    let value = session
        .resolve(&field.module, field.base_offset, &field.offsets, width)
        .and_then(|address| match field.value_type {
            ValueType::I32 => session.read(address).map(RawValue::I32),
            ValueType::U32 => session.read(address).map(RawValue::U32),
            ValueType::I64 => session.read(address).map(RawValue::I64),
            ValueType::U64 => session.read(address).map(RawValue::U64),
            ValueType::F32 => session.read(address).map(RawValue::F32),
            ValueType::F64 => session.read(address).map(RawValue::F64),
        });

    if let Err(err) = &value {
        debug!(field = name, error = %err, "field read failed");
    }
    value
}
