//! Format masks for numbers and dates
//!
//! Numeric masks follow the familiar `#,##0.00` notation, date masks the
//! `yyyy/MM/dd HH:mm:ss.SSS` notation. Date masks are translated into chrono
//! strftime strings once and then used for both formatting and parsing.

use bigdecimal::{BigDecimal, RoundingMode, Signed};
use chrono::format::{parse, Item, Parsed, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use std::fmt::Write;

pub const DEFAULT_INTEGER_MASK: &str = "####0";
pub const DEFAULT_NUMBER_MASK: &str = "####0.0#########";
pub const DEFAULT_BIG_NUMBER_MASK: &str = "######0.0###################";
pub const DEFAULT_DATE_MASK: &str = "yyyy/MM/dd HH:mm:ss.SSS";
pub const DEFAULT_TIMESTAMP_MASK: &str = "yyyy/MM/dd HH:mm:ss.SSSSSSSSS";

/// Characters used to render and read numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberSymbols {
    pub decimal: char,
    pub grouping: char,
}

impl Default for NumberSymbols {
    fn default() -> Self {
        Self {
            decimal: '.',
            grouping: ',',
        }
    }
}

/// A compiled decimal mask such as `#,##0.00` or `0000`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberMask {
    prefix: String,
    suffix: String,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
    grouping: Option<usize>,
}

impl NumberMask {
    pub fn parse(mask: &str) -> Result<Self, String> {
        // only the positive sub-pattern is honoured
        let pattern = mask.split(';').next().unwrap_or_default();
        let is_body = |c: char| matches!(c, '#' | '0' | ',' | '.');

        let start = pattern
            .find(is_body)
            .ok_or_else(|| "mask contains no digit placeholders".to_string())?;
        let end = pattern
            .rfind(is_body)
            .map(|i| i + 1)
            .unwrap_or(pattern.len());

        let body = &pattern[start..end];
        let (int_part, frac_part) = match body.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (body, ""),
        };

        if frac_part.contains(['.', ',']) {
            return Err("unexpected separator in fraction part".to_string());
        }
        if !int_part.contains(['#', '0']) && frac_part.is_empty() {
            return Err("mask contains no digit placeholders".to_string());
        }

        let grouping = int_part
            .rfind(',')
            .map(|i| int_part.len() - i - 1)
            .filter(|size| *size > 0);

        Ok(Self {
            prefix: pattern[..start].to_string(),
            suffix: pattern[end..].to_string(),
            min_int: int_part.chars().filter(|c| *c == '0').count(),
            min_frac: frac_part.chars().filter(|c| *c == '0').count(),
            max_frac: frac_part.len(),
            grouping,
        })
    }

    pub fn max_fraction_digits(&self) -> usize {
        self.max_frac
    }

    pub fn format_i64(&self, value: i64, symbols: NumberSymbols) -> String {
        let frac = "0".repeat(self.min_frac);
        self.render(value < 0, &value.unsigned_abs().to_string(), &frac, symbols)
    }

    pub fn format_f64(&self, value: f64, symbols: NumberSymbols) -> String {
        if !value.is_finite() {
            return value.to_string();
        }
        let fixed = format!("{:.*}", self.max_frac, value.abs());
        let (int_digits, frac_digits) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
        let frac = self.trim_fraction(frac_digits);
        self.render(value < 0.0, int_digits, &frac, symbols)
    }

    pub fn format_decimal(&self, value: &BigDecimal, symbols: NumberSymbols) -> String {
        let rounded = value.with_scale_round(self.max_frac as i64, RoundingMode::HalfEven);
        let plain = rounded.abs().to_plain_string();
        let (int_digits, frac_digits) = plain.split_once('.').unwrap_or((plain.as_str(), ""));
        let frac = self.trim_fraction(frac_digits);
        self.render(rounded.is_negative(), int_digits, &frac, symbols)
    }

    /// Reads `text` back into a plain `-123.45` style string
    ///
    /// On failure the 1-based character position of the offending
    /// character is returned.
    pub fn normalize(&self, text: &str, symbols: NumberSymbols) -> Result<String, usize> {
        let syntax = NumberSyntax {
            symbols,
            grouping: true,
            fraction: true,
            exponent: false,
            prefix: &self.prefix,
            suffix: &self.suffix,
        };
        scan_number(text, &syntax)
    }

    fn trim_fraction(&self, digits: &str) -> String {
        let mut frac = digits.to_string();
        while frac.len() > self.min_frac && frac.ends_with('0') {
            frac.pop();
        }
        frac
    }

    fn render(&self, negative: bool, int_digits: &str, frac: &str, symbols: NumberSymbols) -> String {
        let mut int_digits = int_digits.trim_start_matches('0').to_string();
        while int_digits.len() < self.min_int {
            int_digits.insert(0, '0');
        }
        if int_digits.is_empty() && frac.is_empty() {
            int_digits.push('0');
        }

        let grouped = match self.grouping {
            Some(size) if int_digits.len() > size => {
                let mut out = String::with_capacity(int_digits.len() + int_digits.len() / size);
                for (i, c) in int_digits.chars().enumerate() {
                    if i > 0 && (int_digits.len() - i) % size == 0 {
                        out.push(symbols.grouping);
                    }
                    out.push(c);
                }
                out
            }
            _ => int_digits,
        };

        let is_zero = grouped.chars().chain(frac.chars()).all(|c| !c.is_ascii_digit() || c == '0');
        let mut out = String::new();
        if negative && !is_zero {
            out.push('-');
        }
        out.push_str(&self.prefix);
        out.push_str(&grouped);
        if !frac.is_empty() {
            out.push(symbols.decimal);
            out.push_str(frac);
        }
        out.push_str(&self.suffix);
        out
    }
}

/// What a number scan accepts
pub struct NumberSyntax<'a> {
    pub symbols: NumberSymbols,
    pub grouping: bool,
    pub fraction: bool,
    pub exponent: bool,
    pub prefix: &'a str,
    pub suffix: &'a str,
}

/// Reads the `NaN`/`inf`/`-inf` tokens that non-finite numbers render as
pub fn parse_non_finite(text: &str) -> Option<f64> {
    let word = text.trim_start_matches(['+', '-']);
    if word.is_empty() || !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    text.parse::<f64>().ok().filter(|value| !value.is_finite())
}

/// Strict number scanner shared by masked and plain parsing
pub fn scan_number(text: &str, syntax: &NumberSyntax<'_>) -> Result<String, usize> {
    let chars: Vec<char> = text.chars().collect();
    let prefix: Vec<char> = syntax.prefix.chars().collect();
    let suffix: Vec<char> = syntax.suffix.chars().collect();

    let mut pos = 0;
    let mut out = String::with_capacity(chars.len());

    if matches!(chars.first(), Some('-') | Some('+')) {
        if chars[0] == '-' {
            out.push('-');
        }
        pos = 1;
    }
    if !prefix.is_empty() && chars[pos..].starts_with(&prefix) {
        pos += prefix.len();
    }
    let mut end = chars.len();
    if !suffix.is_empty() && end >= pos + suffix.len() && chars[pos..end].ends_with(&suffix) {
        end -= suffix.len();
    }

    let mut digits = 0;
    let mut seen_decimal = false;
    let mut seen_exponent = false;
    let mut i = pos;
    while i < end {
        let c = chars[i];
        if c.is_ascii_digit() {
            out.push(c);
            digits += 1;
        } else if c == syntax.symbols.decimal && syntax.fraction && !seen_decimal && !seen_exponent {
            out.push('.');
            seen_decimal = true;
        } else if c == syntax.symbols.grouping && syntax.grouping && !seen_decimal && !seen_exponent {
            // grouping separators carry no value
        } else if (c == 'e' || c == 'E') && syntax.exponent && digits > 0 && !seen_exponent {
            out.push('e');
            seen_exponent = true;
            if matches!(chars.get(i + 1), Some('-') | Some('+')) {
                i += 1;
                out.push(chars[i]);
            }
            if !chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                return Err(i + 2);
            }
        } else {
            return Err(i + 1);
        }
        i += 1;
    }

    if digits == 0 {
        return Err(end.max(pos) + 1);
    }
    Ok(out)
}

/// Translates a `yyyy/MM/dd HH:mm:ss` style mask into a chrono format string
pub fn date_format(mask: &str) -> Result<String, String> {
    let chars: Vec<char> = mask.chars().collect();
    let mut out = String::with_capacity(mask.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // quoted literal, '' is an escaped quote
            let mut j = i + 1;
            if chars.get(j) == Some(&'\'') {
                out.push('\'');
                i = j + 1;
                continue;
            }
            while j < chars.len() && chars[j] != '\'' {
                push_literal(&mut out, chars[j]);
                j += 1;
            }
            if j == chars.len() {
                return Err("unterminated quote".to_string());
            }
            i = j + 1;
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while chars.get(i + run) == Some(&c) {
            run += 1;
        }
        let directive = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H' | 'k', 1) => "%-H",
            ('H' | 'k', _) => "%H",
            ('h' | 'K', 1) => "%-I",
            ('h' | 'K', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', 1..=3) => "%3f",
            ('S', 4..=6) => "%6f",
            ('S', _) => "%9f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('D', _) => "%j",
            ('u', _) => "%u",
            ('Z', _) => "%z",
            ('X' | 'x', 1 | 2) => "%z",
            ('X' | 'x', _) => "%:z",
            ('z', _) => "%Z",
            _ => return Err(format!("unsupported pattern letter '{}'", c)),
        };
        out.push_str(directive);
        i += run;
    }

    if StrftimeItems::new(&out).any(|item| matches!(item, Item::Error)) {
        return Err(format!("mask translates to an invalid format '{}'", out));
    }
    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

/// Whether a translated format carries a zone offset
pub fn has_offset(format: &str) -> bool {
    format.contains("%z") || format.contains("%:z")
}

pub fn format_naive(value: &NaiveDateTime, format: &str) -> Result<String, String> {
    let mut out = String::new();
    write!(out, "{}", value.format(format)).map_err(|_| format!("cannot render with '{}'", format))?;
    Ok(out)
}

pub fn format_zoned(value: &DateTime<FixedOffset>, format: &str) -> Result<String, String> {
    let mut out = String::new();
    write!(out, "{}", value.format(format)).map_err(|_| format!("cannot render with '{}'", format))?;
    Ok(out)
}

/// Parses a local date-time; a missing time of day means midnight
pub fn parse_naive(text: &str, format: &str) -> Result<NaiveDateTime, String> {
    let mut parsed = Parsed::new();
    parse(&mut parsed, text, StrftimeItems::new(format)).map_err(|e| e.to_string())?;
    let date = parsed.to_naive_date().map_err(|e| e.to_string())?;
    let time = parsed.to_naive_time().unwrap_or_default();
    Ok(date.and_time(time))
}

pub fn parse_zoned(text: &str, format: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_str(text, format).map_err(|e| e.to_string())
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Decodes hex text, returning the 1-based position of the first bad digit
pub fn from_hex(text: &str) -> Result<Vec<u8>, usize> {
    let digits: Vec<char> = text.chars().collect();
    if digits.len() % 2 != 0 {
        return Err(digits.len());
    }
    digits
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            let hi = pair[0].to_digit(16).ok_or(i * 2 + 1)?;
            let lo = pair[1].to_digit(16).ok_or(i * 2 + 2)?;
            Ok((hi * 16 + lo) as u8)
        })
        .collect()
}
