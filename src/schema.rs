//! Slot schema model, type-probing inference, and JSON persistence.
//!
//! A [`SlotSchema`] describes the target shape of a scan: one entry per
//! source field position, where `None` marks a field that is read but never
//! converted (no converter is allocated for it). Schemas are either
//! supplied by the caller or produced by sampling rows with the probing
//! ladder in [`infer_field_type`].

use std::{fmt, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::value::parse_boolean;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Decimal,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Decimal => "decimal",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotMeta {
    pub position: usize,
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered target slots for one scan. `None` entries are source fields the
/// caller chose to ignore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotSchema {
    pub slots: Vec<Option<SlotMeta>>,
}

impl SlotSchema {
    /// Builds a schema of retained slots with positional `$1`, `$2`, ...
    /// names, the shape inference produces.
    pub fn from_types(types: &[ColumnType]) -> Self {
        let slots = types
            .iter()
            .enumerate()
            .map(|(idx, ty)| {
                Some(SlotMeta {
                    position: idx,
                    name: format!("${}", idx + 1),
                    column_type: *ty,
                })
            })
            .collect();
        SlotSchema { slots }
    }

    /// Number of source fields the schema expects per row.
    pub fn field_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots that actually receive converted values.
    pub fn retained_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn summary(&self) -> String {
        self.slots
            .iter()
            .map(|slot| match slot {
                Some(meta) => format!("{}:{}", meta.name, meta.column_type),
                None => "(ignored)".to_string(),
            })
            .join(", ")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating meta file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing schema JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening meta file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema = serde_json::from_reader(reader).context("Parsing schema JSON")?;
        Ok(schema)
    }
}

/// Classifies a raw field by probing, in order: integer, float, boolean,
/// else string. The first rung that parses wins.
pub fn infer_field_type(field: &[u8]) -> ColumnType {
    let Ok(text) = std::str::from_utf8(field) else {
        return ColumnType::String;
    };
    if text.parse::<i64>().is_ok() {
        return ColumnType::Integer;
    }
    if text.parse::<f64>().is_ok() {
        return ColumnType::Float;
    }
    if parse_boolean(text).is_ok() {
        return ColumnType::Boolean;
    }
    ColumnType::String
}

fn widen(a: ColumnType, b: ColumnType) -> ColumnType {
    use ColumnType::*;
    match (a, b) {
        _ if a == b => a,
        (Integer, Float) | (Float, Integer) => Float,
        _ => String,
    }
}

/// Reconciles per-row candidate schemas into one schema: identical guesses
/// are kept, integer widens to float, any other disagreement falls back to
/// string. The merged width is the widest candidate; rows narrower than
/// that simply contribute nothing for the missing trailing positions.
pub fn merge_candidates(candidates: &[SlotSchema]) -> SlotSchema {
    let width = candidates
        .iter()
        .map(|c| c.field_count())
        .max()
        .unwrap_or(0);
    let mut types: Vec<Option<ColumnType>> = vec![None; width];
    for candidate in candidates {
        for (idx, slot) in candidate.slots.iter().enumerate() {
            let Some(meta) = slot else { continue };
            types[idx] = Some(match types[idx] {
                Some(current) => widen(current, meta.column_type),
                None => meta.column_type,
            });
        }
    }
    let resolved = types
        .into_iter()
        .map(|ty| ty.unwrap_or(ColumnType::String))
        .collect::<Vec<_>>();
    SlotSchema::from_types(&resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_prefers_integer_over_boolean() {
        assert_eq!(infer_field_type(b"42"), ColumnType::Integer);
        assert_eq!(infer_field_type(b"1"), ColumnType::Integer);
        assert_eq!(infer_field_type(b"2.5"), ColumnType::Float);
        assert_eq!(infer_field_type(b"true"), ColumnType::Boolean);
        assert_eq!(infer_field_type(b"hello"), ColumnType::String);
    }

    #[test]
    fn ladder_falls_back_to_string_on_invalid_utf8() {
        assert_eq!(infer_field_type(&[0xff, 0xfe]), ColumnType::String);
    }

    #[test]
    fn merge_widens_integer_and_float() {
        let a = SlotSchema::from_types(&[ColumnType::Integer, ColumnType::Integer]);
        let b = SlotSchema::from_types(&[ColumnType::Float, ColumnType::String]);
        let merged = merge_candidates(&[a, b]);
        let types = merged
            .slots
            .iter()
            .map(|s| s.as_ref().unwrap().column_type)
            .collect::<Vec<_>>();
        assert_eq!(types, vec![ColumnType::Float, ColumnType::String]);
    }

    #[test]
    fn merge_takes_widest_candidate_width() {
        let a = SlotSchema::from_types(&[ColumnType::Integer]);
        let b = SlotSchema::from_types(&[ColumnType::Integer, ColumnType::Boolean]);
        let merged = merge_candidates(&[a, b]);
        assert_eq!(merged.field_count(), 2);
        assert_eq!(merged.slots[1].as_ref().unwrap().name, "$2");
        assert_eq!(
            merged.slots[1].as_ref().unwrap().column_type,
            ColumnType::Boolean
        );
    }

    #[test]
    fn positional_names_are_one_based() {
        let schema = SlotSchema::from_types(&[ColumnType::String, ColumnType::Integer]);
        assert_eq!(schema.slots[0].as_ref().unwrap().name, "$1");
        assert_eq!(schema.slots[1].as_ref().unwrap().name, "$2");
        assert_eq!(schema.summary(), "$1:string, $2:integer");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.meta.json");
        let schema = SlotSchema::from_types(&[ColumnType::Integer, ColumnType::Decimal]);
        schema.save(&path).unwrap();
        let loaded = SlotSchema::load(&path).unwrap();
        assert_eq!(loaded.slots, schema.slots);
    }
}
