//! Per-field conversion from raw bytes to typed column values.
//!
//! One [`FieldConverter`] exists per retained schema slot. The conversion
//! contract is the "adaptive null" one: the sink is always nullable, the
//! `\N` literal is an explicit null, and an unparseable literal either
//! becomes null (lenient mode) or fails the row (strict mode) without
//! touching the sink.

use crate::{
    schema::ColumnType,
    sink::ColumnSink,
    value::{Value, parse_boolean, parse_decimal, parse_naive_date, parse_naive_datetime},
};

/// Source-text null marker.
const NULL_LITERAL: &[u8] = b"\\N";

#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    /// Lenient mode: a malformed literal appends null instead of failing
    /// the row.
    pub invalid_field_as_null: bool,
}

#[derive(Debug, Clone)]
pub struct FieldConverter {
    column_type: ColumnType,
}

impl FieldConverter {
    pub fn new(column_type: ColumnType) -> Self {
        Self { column_type }
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Converts one raw field and appends the outcome to `sink`. Returns
    /// false only in strict mode on a malformed literal, leaving the sink
    /// untouched for that field.
    pub fn convert(
        &self,
        raw: &[u8],
        sink: &mut dyn ColumnSink,
        options: &ConvertOptions,
    ) -> bool {
        if raw == NULL_LITERAL {
            sink.append_null();
            return true;
        }
        match self.parse(raw) {
            Some(value) => {
                sink.append_value(value);
                true
            }
            None if options.invalid_field_as_null => {
                sink.append_null();
                true
            }
            None => false,
        }
    }

    fn parse(&self, raw: &[u8]) -> Option<Value> {
        let text = std::str::from_utf8(raw).ok()?;
        match self.column_type {
            ColumnType::String => Some(Value::String(text.to_string())),
            ColumnType::Integer => text.parse::<i64>().ok().map(Value::Integer),
            ColumnType::Float => text.parse::<f64>().ok().map(Value::Float),
            ColumnType::Boolean => parse_boolean(text).ok().map(Value::Boolean),
            ColumnType::Date => parse_naive_date(text).ok().map(Value::Date),
            ColumnType::DateTime => parse_naive_datetime(text).ok().map(Value::DateTime),
            ColumnType::Decimal => parse_decimal(text).ok().map(Value::Decimal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ValueColumn;

    const LENIENT: ConvertOptions = ConvertOptions {
        invalid_field_as_null: true,
    };
    const STRICT: ConvertOptions = ConvertOptions {
        invalid_field_as_null: false,
    };

    #[test]
    fn null_literal_appends_null_in_both_modes() {
        let converter = FieldConverter::new(ColumnType::Integer);
        let mut column = ValueColumn::new();
        assert!(converter.convert(b"\\N", &mut column, &STRICT));
        assert!(converter.convert(b"\\N", &mut column, &LENIENT));
        assert_eq!(column.cells, vec![None, None]);
    }

    #[test]
    fn malformed_integer_is_null_when_lenient() {
        let converter = FieldConverter::new(ColumnType::Integer);
        let mut column = ValueColumn::new();
        assert!(converter.convert(b"abc", &mut column, &LENIENT));
        assert_eq!(column.cells, vec![None]);
    }

    #[test]
    fn malformed_integer_fails_without_append_when_strict() {
        let converter = FieldConverter::new(ColumnType::Integer);
        let mut column = ValueColumn::new();
        assert!(!converter.convert(b"abc", &mut column, &STRICT));
        assert!(column.cells.is_empty());
    }

    #[test]
    fn empty_field_is_valid_empty_string_but_invalid_number() {
        let strings = FieldConverter::new(ColumnType::String);
        let floats = FieldConverter::new(ColumnType::Float);
        let mut column = ValueColumn::new();
        assert!(strings.convert(b"", &mut column, &STRICT));
        assert_eq!(column.cells[0], Some(Value::String(String::new())));
        assert!(!floats.convert(b"", &mut column, &STRICT));
    }

    #[test]
    fn typed_variants_parse_expected_literals() {
        let mut column = ValueColumn::new();
        assert!(FieldConverter::new(ColumnType::Boolean).convert(b"yes", &mut column, &STRICT));
        assert!(FieldConverter::new(ColumnType::Date).convert(b"2024-05-06", &mut column, &STRICT));
        assert!(FieldConverter::new(ColumnType::Decimal).convert(b"10.25", &mut column, &STRICT));
        assert_eq!(column.row_count(), 3);
        assert_eq!(column.cells[0], Some(Value::Boolean(true)));
    }
}
