//! Field metadata and the value conversion rules
//!
//! A [`ValueMeta`] describes one field of a row: its name, logical type and
//! the formatting options used when the value crosses the string boundary.
//! Every conversion in the engine goes through the methods here, so the same
//! input always yields the same value or the same error.

use crate::core::error::ValueError;
use crate::core::format::{
    self, date_format, has_offset, NumberMask, NumberSymbols, NumberSyntax, DEFAULT_DATE_MASK,
    DEFAULT_TIMESTAMP_MASK,
};
use crate::core::value::{Value, ValueType};
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Whitespace trimming applied to string values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrimType {
    #[default]
    None,
    Left,
    Right,
    Both,
}

impl TrimType {
    pub fn apply<'a>(&self, text: &'a str) -> &'a str {
        match self {
            TrimType::None => text,
            TrimType::Left => text.trim_start(),
            TrimType::Right => text.trim_end(),
            TrimType::Both => text.trim(),
        }
    }
}

fn default_decimal_symbol() -> char {
    '.'
}

fn default_grouping_symbol() -> char {
    ','
}

/// Metadata of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMeta {
    /// Field name
    pub name: String,

    /// Logical type of the field
    #[serde(rename = "type", default)]
    pub value_type: ValueType,

    /// Display length, a boolean with length 3 or more renders as true/false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    /// Number of fraction digits used when no mask is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,

    /// Number or date mask used to format and parse strings
    #[serde(default, alias = "format", skip_serializing_if = "Option::is_none")]
    pub conversion_mask: Option<String>,

    #[serde(default = "default_decimal_symbol")]
    pub decimal_symbol: char,

    #[serde(default = "default_grouping_symbol")]
    pub grouping_symbol: char,

    #[serde(default)]
    pub trim: TrimType,

    /// Compare strings ignoring case
    #[serde(default)]
    pub case_insensitive: bool,

    /// Keep empty strings apart from null
    #[serde(default)]
    pub empty_differs_from_null: bool,

    /// Offset from UTC in minutes, used to read and render timestamps
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Step that created the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ValueMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
            conversion_mask: None,
            decimal_symbol: default_decimal_symbol(),
            grouping_symbol: default_grouping_symbol(),
            trim: TrimType::None,
            case_insensitive: false,
            empty_differs_from_null: false,
            utc_offset_minutes: 0,
            origin: None,
        }
    }

    pub fn with_mask(mut self, mask: impl Into<String>) -> Self {
        self.conversion_mask = Some(mask.into());
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn with_trim(mut self, trim: TrimType) -> Self {
        self.trim = trim;
        self
    }

    pub fn with_symbols(mut self, decimal: char, grouping: char) -> Self {
        self.decimal_symbol = decimal;
        self.grouping_symbol = grouping;
        self
    }

    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Same metadata under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut meta = self.clone();
        meta.name = name.into();
        meta
    }

    /// Same metadata with another type and mask, as used by retyping steps
    pub fn retyped(&self, value_type: ValueType, mask: Option<String>) -> Self {
        let mut meta = self.clone();
        meta.value_type = value_type;
        meta.conversion_mask = mask;
        meta
    }

    pub fn is_null(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.is_empty() && !self.empty_differs_from_null,
            _ => false,
        }
    }

    /// Renders a value with this field's mask; nulls render as `None`
    pub fn format_value(&self, value: &Value) -> Result<Option<String>, ValueError> {
        self.format_with(value, self.conversion_mask.as_deref())
    }

    /// Reads a string into this field's type
    pub fn parse_value(&self, text: &str) -> Result<Value, ValueError> {
        self.parse_as(text, self.value_type)
    }

    /// Converts `value`, described by `source`, into this field's type
    pub fn convert_from(&self, source: &ValueMeta, value: &Value) -> Result<Value, ValueError> {
        if source.is_null(value) {
            return Ok(Value::Null);
        }
        match (self.value_type, value) {
            (ValueType::None, _) => Ok(value.clone()),
            (ValueType::String, _) => {
                let text = if self.conversion_mask.is_some() {
                    self.format_value(value)?
                } else {
                    source.format_value(value)?
                };
                Ok(text
                    .map(|text| Value::String(self.trim.apply(&text).to_string()))
                    .unwrap_or_default())
            }
            (target, Value::String(text)) => self.parse_as(text, target),
            (target, _) => source.coerce(value, target),
        }
    }

    pub fn get_string(&self, value: &Value) -> Result<Option<String>, ValueError> {
        self.format_value(value)
    }

    pub fn get_integer(&self, value: &Value) -> Result<Option<i64>, ValueError> {
        let to = ValueType::Integer;
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::String(text) => return self.parse_as(text, to).map(|v| v.as_integer()),
            Value::Integer(i) => *i,
            Value::Number(f) => self.round_to_i64(*f, value)?,
            Value::BigNumber(d) => d
                .with_scale_round(0, RoundingMode::HalfUp)
                .to_i64()
                .ok_or_else(|| self.cannot_convert(value, to, "value out of range for Integer"))?,
            Value::Boolean(b) => i64::from(*b),
            Value::Date(d) => d.and_utc().timestamp_millis(),
            Value::Timestamp(t) => t.timestamp_millis(),
            Value::Binary(_) => return Err(self.cannot_convert(value, to, "not supported")),
        }))
    }

    pub fn get_number(&self, value: &Value) -> Result<Option<f64>, ValueError> {
        let to = ValueType::Number;
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::String(text) => {
                return self.parse_as(text, to).map(|v| match v {
                    Value::Number(f) => Some(f),
                    _ => None,
                })
            }
            Value::Integer(i) => *i as f64,
            Value::Number(f) => *f,
            Value::BigNumber(d) => d
                .to_f64()
                .ok_or_else(|| self.cannot_convert(value, to, "value out of range for Number"))?,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Date(d) => d.and_utc().timestamp_millis() as f64,
            Value::Timestamp(t) => t.timestamp_millis() as f64,
            Value::Binary(_) => return Err(self.cannot_convert(value, to, "not supported")),
        }))
    }

    pub fn get_big_number(&self, value: &Value) -> Result<Option<BigDecimal>, ValueError> {
        let to = ValueType::BigNumber;
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::String(text) => {
                return self.parse_as(text, to).map(|v| match v {
                    Value::BigNumber(d) => Some(d),
                    _ => None,
                })
            }
            Value::Integer(i) => BigDecimal::from(*i),
            Value::Number(f) if f.is_finite() => BigDecimal::from_str(&f.to_string())
                .map_err(|e| self.cannot_convert(value, to, &e.to_string()))?,
            Value::Number(_) => return Err(self.cannot_convert(value, to, "value is not finite")),
            Value::BigNumber(d) => d.clone(),
            Value::Boolean(b) => BigDecimal::from(i64::from(*b)),
            Value::Date(d) => BigDecimal::from(d.and_utc().timestamp_millis()),
            Value::Timestamp(t) => BigDecimal::from(t.timestamp_millis()),
            Value::Binary(_) => return Err(self.cannot_convert(value, to, "not supported")),
        }))
    }

    pub fn get_boolean(&self, value: &Value) -> Result<Option<bool>, ValueError> {
        let to = ValueType::Boolean;
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::String(text) => return self.parse_as(text, to).map(|v| v.as_boolean()),
            Value::Integer(i) => *i != 0,
            Value::Number(f) => *f != 0.0,
            Value::BigNumber(d) => !d.is_zero(),
            Value::Boolean(b) => *b,
            Value::Date(_) | Value::Timestamp(_) | Value::Binary(_) => {
                return Err(self.cannot_convert(value, to, "not supported"))
            }
        }))
    }

    pub fn get_date(&self, value: &Value) -> Result<Option<NaiveDateTime>, ValueError> {
        let to = ValueType::Date;
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::String(text) => {
                return self.parse_as(text, to).map(|v| match v {
                    Value::Date(d) => Some(d),
                    _ => None,
                })
            }
            Value::Integer(ms) => self.from_millis(*ms, value, to)?.naive_utc(),
            Value::Number(f) => {
                let ms = self.round_to_i64(*f, value)?;
                self.from_millis(ms, value, to)?.naive_utc()
            }
            Value::BigNumber(_) => {
                let ms = self.get_integer(value)?.unwrap_or_default();
                self.from_millis(ms, value, to)?.naive_utc()
            }
            Value::Date(d) => *d,
            Value::Timestamp(t) => t.with_timezone(&self.offset()?).naive_local(),
            Value::Boolean(_) | Value::Binary(_) => {
                return Err(self.cannot_convert(value, to, "not supported"))
            }
        }))
    }

    pub fn get_timestamp(&self, value: &Value) -> Result<Option<DateTime<Utc>>, ValueError> {
        let to = ValueType::Timestamp;
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::String(text) => {
                return self.parse_as(text, to).map(|v| match v {
                    Value::Timestamp(t) => Some(t),
                    _ => None,
                })
            }
            Value::Integer(ms) => self.from_millis(*ms, value, to)?,
            Value::Number(_) | Value::BigNumber(_) => {
                let ms = self.get_integer(value)?.unwrap_or_default();
                self.from_millis(ms, value, to)?
            }
            Value::Date(d) => self.local_to_utc(d, value)?,
            Value::Timestamp(t) => *t,
            Value::Boolean(_) | Value::Binary(_) => {
                return Err(self.cannot_convert(value, to, "not supported"))
            }
        }))
    }

    pub fn get_binary(&self, value: &Value) -> Result<Option<Vec<u8>>, ValueError> {
        match value {
            Value::Null => Ok(None),
            Value::Binary(bytes) => Ok(Some(bytes.clone())),
            Value::String(text) => self.parse_as(text, ValueType::Binary).map(|v| match v {
                Value::Binary(bytes) => Some(bytes),
                _ => None,
            }),
            _ => Err(self.cannot_convert(value, ValueType::Binary, "not supported")),
        }
    }

    /// Orders two values of this field, nulls first
    pub fn compare(&self, a: &Value, b: &Value) -> Result<Ordering, ValueError> {
        match (self.is_null(a), self.is_null(b)) {
            (true, true) => return Ok(Ordering::Equal),
            (true, false) => return Ok(Ordering::Less),
            (false, true) => return Ok(Ordering::Greater),
            (false, false) => {}
        }

        Ok(match self.value_type {
            ValueType::String | ValueType::None => {
                let x = self.get_string(a)?.unwrap_or_default();
                let y = self.get_string(b)?.unwrap_or_default();
                if self.case_insensitive {
                    x.to_lowercase().cmp(&y.to_lowercase())
                } else {
                    x.cmp(&y)
                }
            }
            ValueType::Integer => self.get_integer(a)?.cmp(&self.get_integer(b)?),
            ValueType::Number => {
                let x = self.get_number(a)?.unwrap_or_default();
                let y = self.get_number(b)?.unwrap_or_default();
                x.total_cmp(&y)
            }
            ValueType::BigNumber => self.get_big_number(a)?.cmp(&self.get_big_number(b)?),
            ValueType::Boolean => self.get_boolean(a)?.cmp(&self.get_boolean(b)?),
            ValueType::Date => self.get_date(a)?.cmp(&self.get_date(b)?),
            ValueType::Timestamp => self.get_timestamp(a)?.cmp(&self.get_timestamp(b)?),
            ValueType::Binary => {
                let x = self.get_binary(a)?.unwrap_or_default();
                let y = self.get_binary(b)?.unwrap_or_default();
                x.len().cmp(&y.len()).then_with(|| x.cmp(&y))
            }
        })
    }

    fn coerce(&self, value: &Value, target: ValueType) -> Result<Value, ValueError> {
        Ok(match target {
            ValueType::None => value.clone(),
            ValueType::String => self.get_string(value)?.into(),
            ValueType::Integer => self.get_integer(value)?.into(),
            ValueType::Number => self.get_number(value)?.into(),
            ValueType::BigNumber => self.get_big_number(value)?.into(),
            ValueType::Boolean => self.get_boolean(value)?.into(),
            ValueType::Date => self.get_date(value)?.map(Value::Date).unwrap_or_default(),
            ValueType::Timestamp => self
                .get_timestamp(value)?
                .map(Value::Timestamp)
                .unwrap_or_default(),
            ValueType::Binary => self.get_binary(value)?.map(Value::Binary).unwrap_or_default(),
        })
    }

    fn format_with(&self, value: &Value, mask: Option<&str>) -> Result<Option<String>, ValueError> {
        let symbols = self.symbols();
        let text = match value {
            Value::Null => return Ok(None),
            Value::String(s) => s.clone(),
            Value::Integer(i) => match mask {
                Some(mask) => self.number_mask(mask)?.format_i64(*i, symbols),
                None => i.to_string(),
            },
            Value::Number(f) => match self.effective_number_mask(mask)? {
                Some(mask) => mask.format_f64(*f, symbols),
                None => self.localize(f.to_string()),
            },
            Value::BigNumber(d) => match self.effective_number_mask(mask)? {
                Some(mask) => mask.format_decimal(d, symbols),
                None => self.localize(d.to_plain_string()),
            },
            Value::Boolean(b) => {
                let long = self.length.is_some_and(|length| length >= 3);
                match (long, *b) {
                    (true, true) => "true".to_string(),
                    (true, false) => "false".to_string(),
                    (false, true) => "Y".to_string(),
                    (false, false) => "N".to_string(),
                }
            }
            Value::Date(d) => {
                let fmt = self.date_format(mask, DEFAULT_DATE_MASK)?;
                format::format_naive(d, &fmt)
                    .map_err(|reason| self.cannot_convert(value, ValueType::String, &reason))?
            }
            Value::Timestamp(t) => {
                let fmt = self.date_format(mask, DEFAULT_TIMESTAMP_MASK)?;
                let zoned = t.with_timezone(&self.offset()?);
                format::format_zoned(&zoned, &fmt)
                    .map_err(|reason| self.cannot_convert(value, ValueType::String, &reason))?
            }
            Value::Binary(bytes) => format::to_hex(bytes),
        };
        Ok(Some(text))
    }

    fn parse_as(&self, text: &str, target: ValueType) -> Result<Value, ValueError> {
        if matches!(target, ValueType::String | ValueType::None) {
            let text = self.trim.apply(text);
            if text.is_empty() && !self.empty_differs_from_null {
                return Ok(Value::Null);
            }
            return Ok(Value::String(text.to_string()));
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }

        let mask = self.conversion_mask.as_deref();
        match target {
            ValueType::Integer => {
                let normalized = match mask {
                    Some(mask) => self.number_mask(mask)?.normalize(trimmed, self.symbols()),
                    None => format::scan_number(trimmed, &self.plain_syntax(false)),
                }
                .map_err(|pos| self.non_numeric(trimmed, target, pos))?;
                let integral = match normalized.split_once('.') {
                    Some((int_part, frac)) if frac.chars().all(|c| c == '0') => int_part,
                    Some(_) => {
                        return Err(self.parse_error(trimmed, target, "value has a fractional part"))
                    }
                    None => normalized.as_str(),
                };
                integral
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| self.parse_error(trimmed, target, "value out of range for Integer"))
            }
            ValueType::Number => {
                if let Some(value) = format::parse_non_finite(trimmed) {
                    return Ok(Value::Number(value));
                }
                let normalized = match self.effective_number_mask(mask)? {
                    Some(mask) => mask.normalize(trimmed, self.symbols()),
                    None => format::scan_number(trimmed, &self.plain_syntax(true)),
                }
                .map_err(|pos| self.non_numeric(trimmed, target, pos))?;
                normalized
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|e| self.parse_error(trimmed, target, &e.to_string()))
            }
            ValueType::BigNumber => {
                let normalized = match self.effective_number_mask(mask)? {
                    Some(mask) => mask.normalize(trimmed, self.symbols()),
                    None => format::scan_number(trimmed, &self.plain_syntax(true)),
                }
                .map_err(|pos| self.non_numeric(trimmed, target, pos))?;
                BigDecimal::from_str(&normalized)
                    .map(Value::BigNumber)
                    .map_err(|e| self.parse_error(trimmed, target, &e.to_string()))
            }
            ValueType::Boolean => match trimmed.to_ascii_uppercase().as_str() {
                "Y" | "YES" | "TRUE" | "1" => Ok(Value::Boolean(true)),
                "N" | "NO" | "FALSE" | "0" => Ok(Value::Boolean(false)),
                _ => Err(self.parse_error(trimmed, target, "not a boolean value")),
            },
            ValueType::Date => {
                let fmt = self.date_format(mask, DEFAULT_DATE_MASK)?;
                let parsed = if has_offset(&fmt) {
                    format::parse_zoned(trimmed, &fmt).map(|dt| dt.naive_local())
                } else {
                    format::parse_naive(trimmed, &fmt)
                };
                parsed
                    .map(Value::Date)
                    .map_err(|reason| self.parse_error(trimmed, target, &reason))
            }
            ValueType::Timestamp => {
                if mask.is_none() {
                    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                        return Ok(Value::Timestamp(dt.with_timezone(&Utc)));
                    }
                }
                let fmt = self.date_format(mask, DEFAULT_TIMESTAMP_MASK)?;
                if has_offset(&fmt) {
                    return format::parse_zoned(trimmed, &fmt)
                        .map(|dt| Value::Timestamp(dt.with_timezone(&Utc)))
                        .map_err(|reason| self.parse_error(trimmed, target, &reason));
                }
                let naive = format::parse_naive(trimmed, &fmt)
                    .map_err(|reason| self.parse_error(trimmed, target, &reason))?;
                let source = Value::String(trimmed.to_string());
                self.local_to_utc(&naive, &source).map(Value::Timestamp)
            }
            ValueType::Binary => format::from_hex(trimmed)
                .map(Value::Binary)
                .map_err(|pos| {
                    self.parse_error(
                        trimmed,
                        target,
                        &format!("invalid hexadecimal digit at position {}", pos),
                    )
                }),
            ValueType::String | ValueType::None => Ok(Value::String(text.to_string())),
        }
    }

    fn symbols(&self) -> NumberSymbols {
        NumberSymbols {
            decimal: self.decimal_symbol,
            grouping: self.grouping_symbol,
        }
    }

    fn plain_syntax(&self, fraction: bool) -> NumberSyntax<'static> {
        NumberSyntax {
            symbols: self.symbols(),
            grouping: false,
            fraction,
            exponent: fraction,
            prefix: "",
            suffix: "",
        }
    }

    fn localize(&self, plain: String) -> String {
        if self.decimal_symbol == '.' {
            plain
        } else {
            plain.replace('.', &self.decimal_symbol.to_string())
        }
    }

    fn number_mask(&self, mask: &str) -> Result<NumberMask, ValueError> {
        NumberMask::parse(mask).map_err(|reason| ValueError::InvalidMask {
            field: self.name.clone(),
            mask: mask.to_string(),
            reason,
        })
    }

    fn effective_number_mask(&self, mask: Option<&str>) -> Result<Option<NumberMask>, ValueError> {
        match (mask, self.precision) {
            (Some(mask), _) => self.number_mask(mask).map(Some),
            (None, Some(0)) => self.number_mask("0").map(Some),
            (None, Some(precision)) => {
                let mask = format!("0.{}", "0".repeat(precision as usize));
                self.number_mask(&mask).map(Some)
            }
            (None, None) => Ok(None),
        }
    }

    fn date_format(&self, mask: Option<&str>, default: &str) -> Result<String, ValueError> {
        let mask = mask.unwrap_or(default);
        date_format(mask).map_err(|reason| ValueError::InvalidMask {
            field: self.name.clone(),
            mask: mask.to_string(),
            reason,
        })
    }

    fn offset(&self) -> Result<FixedOffset, ValueError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| ValueError::InvalidMask {
            field: self.name.clone(),
            mask: format!("{} minutes", self.utc_offset_minutes),
            reason: "utc offset out of range".to_string(),
        })
    }

    fn local_to_utc(&self, local: &NaiveDateTime, value: &Value) -> Result<DateTime<Utc>, ValueError> {
        self.offset()?
            .from_local_datetime(local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| self.cannot_convert(value, ValueType::Timestamp, "ambiguous local time"))
    }

    fn from_millis(&self, ms: i64, value: &Value, to: ValueType) -> Result<DateTime<Utc>, ValueError> {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| self.cannot_convert(value, to, "value out of range for a date"))
    }

    fn round_to_i64(&self, f: f64, value: &Value) -> Result<i64, ValueError> {
        let rounded = f.round();
        if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
            return Err(self.cannot_convert(value, ValueType::Integer, "value out of range for Integer"));
        }
        Ok(rounded as i64)
    }

    fn cannot_convert(&self, value: &Value, to: ValueType, reason: &str) -> ValueError {
        let shown = match value {
            Value::String(s) => s.clone(),
            Value::Binary(bytes) => format::to_hex(bytes),
            Value::Integer(i) => i.to_string(),
            Value::Number(f) => f.to_string(),
            Value::BigNumber(d) => d.to_plain_string(),
            Value::Boolean(b) => b.to_string(),
            other => format!("{:?}", other),
        };
        ValueError::CannotConvert {
            field: self.name.clone(),
            from: value.value_type(),
            to,
            value: shown,
            reason: reason.to_string(),
        }
    }

    fn parse_error(&self, text: &str, to: ValueType, reason: &str) -> ValueError {
        ValueError::CannotConvert {
            field: self.name.clone(),
            from: ValueType::String,
            to,
            value: text.to_string(),
            reason: reason.to_string(),
        }
    }

    fn non_numeric(&self, text: &str, to: ValueType, position: usize) -> ValueError {
        self.parse_error(
            text,
            to,
            &format!(
                "non-numeric character found at position {} for value [{}]",
                position, text
            ),
        )
    }
}
