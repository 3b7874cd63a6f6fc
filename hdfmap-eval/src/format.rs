//! Format templates: `"{expr[:spec]}"` fields with `{{` / `}}` escapes.
//!
//! The field spec follows the standard mini-language
//! `[[fill]align][sign][#][0][width][,][.precision][type]` with the types
//! `f e g d s %`. Arrays and tuples are formatted element by element.

use std::cell::RefCell;

use hdfmap_core::value::{format_array, format_float};
use hdfmap_core::{Error, Result, Value};
use once_cell::sync::Lazy;
use regex::Regex;

static SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?P<fill>.)?(?P<align>[<>=^]))?(?P<sign>[+\- ])?(?P<alt>#)?(?P<zero>0)?(?P<width>\d+)?(?P<group>,)?(?:\.(?P<precision>\d+))?(?P<type>[eEfFgGdsn%])?$",
    )
    .expect("valid regex")
});

/// Literal text or a field to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    Field { expression: String, spec: String },
}

/// Splits a template into literal text and fields.
///
/// # Errors
/// Returns [`Error::ExpressionSyntax`] for an unmatched brace or an empty field.
pub fn parse_template(template: &str) -> Result<Vec<Piece>> {
    let chars: Vec<char> = template.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => return Err(Error::syntax(template, "single '}' in format string")),
            '{' => {
                let close = field_end(&chars, i)
                    .ok_or_else(|| Error::syntax(template, "unmatched '{' in format string"))?;
                let field: String = chars[i + 1..close].iter().collect();
                let (expression, spec) = split_spec(&field);
                if expression.trim().is_empty() {
                    return Err(Error::syntax(template, "empty field in format string"));
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Field {
                    expression: expression.trim().to_string(),
                    spec: spec.to_string(),
                });
                i = close + 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

/// Index of the `}` closing the field opened at `open`.
fn field_end(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open + 1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, '}') if depth == 0 => return Some(i),
            (None, '}') => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Splits `expr:spec` at the first `:` outside brackets and strings.
fn split_spec(field: &str) -> (&str, &str) {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in field.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth = depth.saturating_sub(1),
            (None, ':') if depth == 0 => return (&field[..i], &field[i + 1..]),
            _ => {}
        }
    }
    (field, "")
}

/// Parsed field spec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub alternate: bool,
    pub zero: bool,
    pub width: Option<usize>,
    pub grouping: bool,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl FormatSpec {
    /// Parses a spec string.
    ///
    /// # Errors
    /// Returns [`Error::Evaluation`] for an invalid spec.
    pub fn parse(spec: &str) -> Result<Self> {
        let caps = SPEC
            .captures(spec)
            .ok_or_else(|| Error::Evaluation(format!("invalid format specifier '{spec}'")))?;
        let char_of = |name: &str| caps.name(name).and_then(|m| m.as_str().chars().next());
        let number = |name: &str| -> Result<Option<usize>> {
            caps.name(name)
                .map(|m| {
                    m.as_str()
                        .parse::<usize>()
                        .map_err(|_| Error::Evaluation(format!("invalid format specifier '{spec}'")))
                })
                .transpose()
        };
        Ok(Self {
            fill: char_of("fill"),
            align: char_of("align"),
            sign: char_of("sign"),
            alternate: caps.name("alt").is_some(),
            zero: caps.name("zero").is_some(),
            width: number("width")?,
            grouping: caps.name("group").is_some(),
            precision: number("precision")?,
            kind: char_of("type"),
        })
    }
}

/// Formats a value with a field spec.
///
/// # Errors
/// Returns [`Error::Evaluation`] for an invalid spec or a spec that does
/// not apply to the value type.
pub fn format_value(value: &Value, spec_text: &str) -> Result<String> {
    if spec_text.is_empty() {
        return Ok(value.to_string());
    }
    let spec = FormatSpec::parse(spec_text)?;
    match value {
        Value::Array(array) => {
            let failure = RefCell::new(None);
            let text = format_array(array, &|x: f64| {
                format_number(Number::Float(x), &spec).unwrap_or_else(|e| {
                    failure.borrow_mut().get_or_insert(e);
                    String::new()
                })
            });
            match failure.into_inner() {
                Some(e) => Err(e),
                None => Ok(text),
            }
        }
        Value::List(items) => {
            let parts = items
                .iter()
                .map(|item| format_value(item, spec_text))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", parts.join(", ")))
        }
        Value::Int(i) => format_number(Number::Int(*i), &spec),
        Value::Float(x) => format_number(Number::Float(*x), &spec),
        Value::Bool(b) if spec.kind.is_some_and(|k| k != 's') => {
            format_number(Number::Int(i64::from(*b)), &spec)
        }
        other => {
            if spec.kind.is_some_and(|k| k != 's') {
                return Err(Error::Evaluation(format!(
                    "unknown format code '{}' for object of type '{}'",
                    spec.kind.unwrap_or('s'),
                    other.type_name()
                )));
            }
            let mut text = other.to_string();
            if let Some(precision) = spec.precision {
                text = text.chars().take(precision).collect();
            }
            Ok(pad(&text, &spec, '<'))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

#[allow(clippy::cast_precision_loss)]
fn format_number(number: Number, spec: &FormatSpec) -> Result<String> {
    let value = match number {
        Number::Int(i) => i as f64,
        Number::Float(x) => x,
    };
    let negative = value.is_sign_negative() && !(value == 0.0 && matches!(number, Number::Int(_)));
    let magnitude = value.abs();
    let kind = spec.kind.map(|k| k.to_ascii_lowercase());
    let mut body = match (kind, number) {
        (Some('d' | 'n'), Number::Int(i)) => i.unsigned_abs().to_string(),
        (Some('n'), Number::Float(_)) => {
            general(magnitude, spec.precision.unwrap_or(6), spec.alternate, false)
        }
        (Some('d'), Number::Float(_)) => {
            return Err(Error::Evaluation(
                "unknown format code 'd' for object of type 'float'".into(),
            ))
        }
        (Some('s'), _) => {
            return Err(Error::Evaluation(
                "unknown format code 's' for a number".into(),
            ))
        }
        (Some('f'), _) => fixed(magnitude, spec.precision.unwrap_or(6)),
        (Some('e'), _) => exponent(magnitude, spec.precision.unwrap_or(6)),
        (Some('g'), _) => general(magnitude, spec.precision.unwrap_or(6), spec.alternate, false),
        (Some('%'), _) => format!("{}%", fixed(magnitude * 100.0, spec.precision.unwrap_or(6))),
        (None, Number::Int(i)) => i.unsigned_abs().to_string(),
        (None, Number::Float(_)) => match spec.precision {
            Some(precision) => general(magnitude, precision, spec.alternate, true),
            None => format_float(magnitude),
        },
        (Some(other), _) => {
            return Err(Error::Evaluation(format!("unknown format code '{other}'")))
        }
    };
    if spec.kind.is_some_and(|k| k.is_ascii_uppercase()) {
        body = body.to_uppercase();
    }
    if spec.grouping {
        body = group_thousands(&body);
    }
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    Ok(pad_number(sign, &body, spec))
}

fn fixed(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return non_finite(value);
    }
    format!("{value:.precision$}")
}

/// Exponent notation with a signed, two-digit exponent (`1.50e+03`).
fn exponent(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return non_finite(value);
    }
    let text = format!("{value:.precision$e}");
    let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

/// General format: fixed or exponent depending on the decimal exponent.
///
/// `at_least_one_decimal` gives the behaviour of a spec without a type
/// (`"{:.3}"` renders `3.0` as `3.0`, not `3`).
fn general(value: f64, precision: usize, alternate: bool, at_least_one_decimal: bool) -> String {
    if !value.is_finite() {
        return non_finite(value);
    }
    let precision = precision.max(1);
    let exp = if value == 0.0 {
        0
    } else {
        let text = format!("{value:.prec$e}", prec = precision - 1);
        text.split_once('e')
            .and_then(|(_, e)| e.parse::<i64>().ok())
            .unwrap_or(0)
    };
    #[allow(clippy::cast_possible_wrap)]
    let use_fixed = exp >= -4 && exp < precision as i64;
    let text = if use_fixed {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let decimals = (precision as i64 - 1 - exp).max(0) as usize;
        format!("{value:.decimals$}")
    } else {
        exponent(value, precision - 1)
    };
    if alternate {
        return text;
    }
    let (mantissa, suffix) = match text.find('e') {
        Some(idx) => text.split_at(idx),
        None => (text.as_str(), ""),
    };
    let mut mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        mantissa.to_string()
    };
    if at_least_one_decimal && suffix.is_empty() && !mantissa.contains('.') {
        mantissa.push_str(".0");
    }
    format!("{mantissa}{suffix}")
}

fn non_finite(value: f64) -> String {
    if value.is_nan() { "nan" } else { "inf" }.to_string()
}

fn group_thousands(body: &str) -> String {
    let end = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (digits, rest) = body.split_at(end);
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

fn pad_number(sign: &str, body: &str, spec: &FormatSpec) -> String {
    let width = spec.width.unwrap_or(0);
    let len = sign.chars().count() + body.chars().count();
    if len >= width {
        return format!("{sign}{body}");
    }
    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (fill, Some(align), _) => (fill.unwrap_or(' '), align),
        (_, None, true) => ('0', '='),
        _ => (' ', '>'),
    };
    let padding = width - len;
    let fill_str = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{sign}{body}{}", fill_str(padding)),
        '^' => format!(
            "{}{sign}{body}{}",
            fill_str(padding / 2),
            fill_str(padding - padding / 2)
        ),
        '=' => format!("{sign}{}{body}", fill_str(padding)),
        _ => format!("{}{sign}{body}", fill_str(padding)),
    }
}

fn pad(text: &str, spec: &FormatSpec, default_align: char) -> String {
    let width = spec.width.unwrap_or(0);
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let fill = spec.fill.unwrap_or(' ').to_string();
    let padding = width - len;
    match spec.align.unwrap_or(default_align) {
        '>' => format!("{}{text}", fill.repeat(padding)),
        '^' => format!(
            "{}{text}{}",
            fill.repeat(padding / 2),
            fill.repeat(padding - padding / 2)
        ),
        _ => format!("{text}{}", fill.repeat(padding)),
    }
}
