//! Versioned memory layout table
//!
//! Each entry pins, for one build of the external application, where every
//! transport field lives: module, offset from the module base, pointer chain
//! and value type. The table is data, not code: it ships with the known
//! builds and can be extended from a YAML file without touching the decoder.
//!
//! ```yaml
//! - version: "8.1.3.121"
//!   fields:
//!     position: { module: GPCore.dll, base_offset: "0xA24F80", offsets: ["0x18", "0xA0"], value_type: i32 }
//!     ...
//! ```

use crate::probe::{PointerWidth, ProbeError};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::fs;

/// Value type stored at a resolved field address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ValueType {
    pub fn is_integer(self) -> bool {
        !matches!(self, ValueType::F32 | ValueType::F64)
    }

    pub fn bits(self) -> u32 {
        match self {
            ValueType::I32 | ValueType::U32 | ValueType::F32 => 32,
            ValueType::I64 | ValueType::U64 | ValueType::F64 => 64,
        }
    }
}

/// A value read from the external process, tagged with its layout type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl RawValue {
    /// Numeric value widened to f64
    pub fn as_f64(self) -> f64 {
        match self {
            RawValue::I32(v) => f64::from(v),
            RawValue::U32(v) => f64::from(v),
            RawValue::I64(v) => v as f64,
            RawValue::U64(v) => v as f64,
            RawValue::F32(v) => f64::from(v),
            RawValue::F64(v) => v,
        }
    }

    /// Bit pattern as an unsigned word, for flag extraction
    pub fn as_word(self) -> u64 {
        match self {
            RawValue::I32(v) => u64::from(v as u32),
            RawValue::U32(v) => u64::from(v),
            RawValue::I64(v) => v as u64,
            RawValue::U64(v) => v,
            RawValue::F32(v) => u64::from(v.to_bits()),
            RawValue::F64(v) => v.to_bits(),
        }
    }
}

/// Location of one observed field
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldLayout {
    pub module: String,
    #[serde(deserialize_with = "de_offset", serialize_with = "ser_offset")]
    pub base_offset: u64,
    #[serde(deserialize_with = "de_offsets", serialize_with = "ser_offsets")]
    pub offsets: Vec<u64>,
    pub value_type: ValueType,
}

impl FieldLayout {
    pub fn new(module: &str, base_offset: u64, offsets: &[u64], value_type: ValueType) -> Self {
        Self {
            module: module.to_string(),
            base_offset,
            offsets: offsets.to_vec(),
            value_type,
        }
    }
}

/// Every field the decoder needs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportFields {
    pub position: FieldLayout,
    pub rate: FieldLayout,
    pub play_flags: FieldLayout,
    pub loop_start: FieldLayout,
    pub loop_end: FieldLayout,
    pub loop_flags: FieldLayout,
    pub count_in_flags: FieldLayout,
}

/// Bit positions inside the flag words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlagBits {
    #[serde(default = "default_flag_bit")]
    pub play: u8,
    #[serde(default = "default_flag_bit")]
    pub loop_enabled: u8,
    #[serde(default = "default_flag_bit")]
    pub count_in: u8,
}

impl Default for FlagBits {
    fn default() -> Self {
        Self {
            play: default_flag_bit(),
            loop_enabled: default_flag_bit(),
            count_in: default_flag_bit(),
        }
    }
}

/// Layout of one external application build
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MemoryLayout {
    pub version: String,
    #[serde(default)]
    pub pointer_width: PointerWidth,
    #[serde(default)]
    pub flag_bits: FlagBits,
    pub fields: TransportFields,
}

impl MemoryLayout {
    /// Guitar Pro 8.1.3 build 121 (GPCore.dll)
    pub fn guitar_pro_8_1_3() -> Self {
        const MODULE: &str = "GPCore.dll";
        const ROOT: u64 = 0x00A2_4F80;

        Self {
            version: "8.1.3.121".to_string(),
            pointer_width: PointerWidth::Bits64,
            flag_bits: FlagBits::default(),
            fields: TransportFields {
                position: FieldLayout::new(MODULE, ROOT, &[0x18, 0xA0, 0x38, 0x1A8, 0x20, 0x1D8, 0x0], ValueType::I32),
                rate: FieldLayout::new(MODULE, ROOT, &[0x18, 0xA0, 0x38, 0x80, 0x18, 0x68, 0x28, 0x74], ValueType::F32),
                play_flags: FieldLayout::new(
                    MODULE,
                    ROOT,
                    &[0x18, 0xA0, 0x38, 0x70, 0x30, 0x4E0, 0x0, 0x20, 0x20, 0x0],
                    ValueType::U32,
                ),
                loop_start: FieldLayout::new(MODULE, ROOT, &[0x18, 0xA0, 0x38, 0x1A8, 0x20, 0x1E0, 0x0], ValueType::I32),
                loop_end: FieldLayout::new(MODULE, ROOT, &[0x18, 0xA0, 0x38, 0x1A8, 0x20, 0x1E0, 0x8], ValueType::I32),
                loop_flags: FieldLayout::new(
                    MODULE,
                    ROOT,
                    &[0x18, 0xA0, 0x38, 0x70, 0x30, 0x4B8, 0x28, 0x88, 0x80, 0x0],
                    ValueType::U32,
                ),
                count_in_flags: FieldLayout::new(
                    MODULE,
                    ROOT,
                    &[0x18, 0xE0, 0x0, 0x28, 0x10, 0x18, 0x60, 0x0],
                    ValueType::U32,
                ),
            },
        }
    }

    /// Check that every field has a type the decoder can interpret
    pub fn validate(&self) -> Result<()> {
        let fields = &self.fields;
        let samples = [("position", &fields.position), ("loop_start", &fields.loop_start), ("loop_end", &fields.loop_end)];
        for (name, field) in samples {
            if !field.value_type.is_integer() {
                anyhow::bail!("Layout {}: field '{}' must be an integer sample count", self.version, name);
            }
        }

        let flags = [
            ("play_flags", &fields.play_flags, self.flag_bits.play),
            ("loop_flags", &fields.loop_flags, self.flag_bits.loop_enabled),
            ("count_in_flags", &fields.count_in_flags, self.flag_bits.count_in),
        ];
        for (name, field, bit) in flags {
            if !field.value_type.is_integer() {
                anyhow::bail!("Layout {}: field '{}' must be an integer flags word", self.version, name);
            }
            if u32::from(bit) >= field.value_type.bits() {
                anyhow::bail!(
                    "Layout {}: flag bit {} does not fit in '{}' ({} bits)",
                    self.version,
                    bit,
                    name,
                    field.value_type.bits()
                );
            }
        }

        let all = [
            &fields.position,
            &fields.rate,
            &fields.play_flags,
            &fields.loop_start,
            &fields.loop_end,
            &fields.loop_flags,
            &fields.count_in_flags,
        ];
        if all.iter().any(|field| field.module.is_empty()) {
            anyhow::bail!("Layout {}: module name cannot be empty", self.version);
        }

        Ok(())
    }
}

/// Ordered set of layouts; later entries are newer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct LayoutTable {
    layouts: Vec<MemoryLayout>,
}

impl LayoutTable {
    /// Layouts for the builds this release knows about
    pub fn builtin() -> Self {
        Self {
            layouts: vec![MemoryLayout::guitar_pro_8_1_3()],
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let table: LayoutTable = serde_yaml::from_str(yaml).context("Failed to parse layout table")?;
        for layout in &table.layouts {
            layout.validate()?;
        }
        Ok(table)
    }

    /// Load a YAML layout table from disk
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read layout file: {}", path))?;
        Self::from_yaml_str(&contents).with_context(|| format!("Invalid layout file: {}", path))
    }

    /// Add or replace layouts by version
    pub fn merge(&mut self, other: LayoutTable) {
        for layout in other.layouts {
            match self.layouts.iter_mut().find(|l| l.version == layout.version) {
                Some(existing) => *existing = layout,
                None => self.layouts.push(layout),
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryLayout> {
        self.layouts.iter()
    }

    pub fn find(&self, version: &str) -> Option<&MemoryLayout> {
        self.layouts.iter().find(|l| l.version == version)
    }

    /// Pick the layout for a tick
    ///
    /// A pinned version wins, then the detected process version; with neither,
    /// the newest layout is used.
    pub fn select(&self, pinned: Option<&str>, detected: Option<&str>) -> Result<&MemoryLayout, ProbeError> {
        let missing = |version: &str| ProbeError::LayoutNotFound {
            version: version.to_string(),
        };

        match pinned.or(detected) {
            Some(version) => self.find(version).ok_or_else(|| missing(version)),
            None => self.layouts.last().ok_or_else(|| missing("unknown")),
        }
    }
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn default_flag_bit() -> u8 {
    8
}

/// Offsets may be written as integers or `"0x..."` strings
#[derive(Deserialize)]
#[serde(untagged)]
enum OffsetRepr {
    Number(u64),
    Text(String),
}

impl OffsetRepr {
    fn parse<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            OffsetRepr::Number(n) => Ok(n),
            OffsetRepr::Text(text) => {
                let text = text.trim();
                let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => text.parse(),
                };
                parsed.map_err(|_| E::custom(format!("invalid offset '{}'", text)))
            }
        }
    }
}

fn de_offset<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    OffsetRepr::deserialize(deserializer)?.parse()
}

fn de_offsets<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
    Vec::<OffsetRepr>::deserialize(deserializer)?
        .into_iter()
        .map(OffsetRepr::parse)
        .collect()
}

fn ser_offset<S: Serializer>(offset: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:#X}", offset))
}

fn ser_offsets<S: Serializer>(offsets: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(offsets.iter().map(|o| format!("{:#X}", o)))
}
