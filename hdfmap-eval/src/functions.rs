//! Whitelisted numeric functions.
//!
//! Every function is reachable by its plain name, with an `np.` prefix and
//! as a method on its first argument (`x.max()`).

use hdfmap_core::value::format_float;
use hdfmap_core::{Error, Result, Value};
use ndarray::{ArrayD, IxDyn};

const ELEMENTWISE: &[&str] = &[
    "abs", "sqrt", "exp", "log", "log10", "sin", "cos", "tan", "arcsin", "arccos", "arctan",
    "floor", "ceil", "degrees", "radians",
];
const REDUCTIONS: &[&str] = &["sum", "mean", "max", "min", "std", "argmax", "argmin"];
const CONVERSIONS: &[&str] = &["len", "round", "float", "int", "str", "array"];

/// Whether `name` is an available function.
#[must_use]
pub fn is_function(name: &str) -> bool {
    ELEMENTWISE.contains(&name) || REDUCTIONS.contains(&name) || CONVERSIONS.contains(&name)
}

/// Calls a whitelisted function on already-read arguments.
///
/// # Errors
/// Returns [`Error::Evaluation`] for an unknown function, a wrong number
/// or type of arguments, or a math domain error on a scalar.
pub fn call(name: &str, args: Vec<Value>) -> Result<Value> {
    if ELEMENTWISE.contains(&name) {
        let [arg] = exactly::<1>(name, args)?;
        return elementwise(name, arg);
    }
    if REDUCTIONS.contains(&name) {
        return reduce(name, args);
    }
    match name {
        "len" => {
            let [arg] = exactly::<1>(name, args)?;
            length(&arg)
        }
        "round" => round(args),
        "float" => {
            let [arg] = exactly::<1>(name, args)?;
            to_float(&arg)
        }
        "int" => {
            let [arg] = exactly::<1>(name, args)?;
            to_int(&arg)
        }
        "str" => {
            let [arg] = exactly::<1>(name, args)?;
            Ok(Value::Str(arg.to_string()))
        }
        "array" => {
            let [arg] = exactly::<1>(name, args)?;
            match arg {
                Value::TextArray(_) => Ok(arg),
                other => numeric(&other, name).map(Value::Array),
            }
        }
        _ => Err(Error::Evaluation(format!("unknown function: '{name}'"))),
    }
}

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N]> {
    let count = args.len();
    args.try_into().map_err(|_| {
        Error::Evaluation(format!("{name}() takes {N} argument(s), got {count}"))
    })
}

fn type_error(name: &str, value: &Value) -> Error {
    Error::Evaluation(format!(
        "unsupported operand type for {name}(): '{}'",
        value.type_name()
    ))
}

fn numeric(value: &Value, name: &str) -> Result<ArrayD<f64>> {
    value.to_array().ok_or_else(|| type_error(name, value))
}

fn unary_fn(name: &str) -> Option<fn(f64) -> f64> {
    Some(match name {
        "abs" => f64::abs,
        "sqrt" => f64::sqrt,
        "exp" => f64::exp,
        "log" => f64::ln,
        "log10" => f64::log10,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "arcsin" => f64::asin,
        "arccos" => f64::acos,
        "arctan" => f64::atan,
        "floor" => f64::floor,
        "ceil" => f64::ceil,
        "degrees" => f64::to_degrees,
        "radians" => f64::to_radians,
        _ => return None,
    })
}

fn check_domain(name: &str, x: f64) -> Result<()> {
    let valid = match name {
        "sqrt" => x >= 0.0,
        "log" | "log10" => x > 0.0,
        "arcsin" | "arccos" => (-1.0..=1.0).contains(&x),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Evaluation(format!(
            "math domain error: {name}({})",
            format_float(x)
        )))
    }
}

fn elementwise(name: &str, value: Value) -> Result<Value> {
    let f = unary_fn(name).ok_or_else(|| Error::Evaluation(format!("unknown function: '{name}'")))?;
    match value {
        Value::Int(i) if name == "abs" => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Error::Evaluation("integer overflow in abs()".into())),
        // Arrays follow floating-point rules: out-of-domain elements become NaN.
        Value::Array(array) => Ok(Value::Array(array.mapv(f))),
        Value::List(_) => numeric(&value, name).map(|a| Value::Array(a.mapv(f))),
        other => {
            let x = other.as_f64().ok_or_else(|| type_error(name, &other))?;
            check_domain(name, x)?;
            Ok(Value::Float(f(x)))
        }
    }
}

fn reduce(name: &str, args: Vec<Value>) -> Result<Value> {
    if args.len() > 1 && (name == "max" || name == "min") {
        return extreme_of_scalars(name, &args);
    }
    let [arg] = exactly::<1>(name, args)?;
    if let Value::Int(i) = arg {
        return Ok(match name {
            "argmax" | "argmin" => Value::Int(0),
            "std" => Value::Float(0.0),
            #[allow(clippy::cast_precision_loss)]
            "mean" => Value::Float(i as f64),
            _ => Value::Int(i),
        });
    }
    let array = numeric(&arg, name)?;
    if array.is_empty() {
        return Err(Error::Evaluation(format!("{name}() of an empty array")));
    }
    let values = array.iter().copied();
    Ok(match name {
        "sum" => Value::Float(array.sum()),
        "mean" => Value::Float(array.mean().unwrap_or(f64::NAN)),
        "std" => Value::Float(array.std(0.0)),
        "max" => Value::Float(values.fold(f64::NEG_INFINITY, f64::max)),
        "min" => Value::Float(values.fold(f64::INFINITY, f64::min)),
        "argmax" => Value::Int(arg_extreme(&array, |a, b| a > b)),
        "argmin" => Value::Int(arg_extreme(&array, |a, b| a < b)),
        _ => return Err(Error::Evaluation(format!("unknown function: '{name}'"))),
    })
}

fn extreme_of_scalars(name: &str, args: &[Value]) -> Result<Value> {
    let mut best = &args[0];
    for arg in args {
        let (a, b) = match (arg.as_f64(), best.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(type_error(name, arg)),
        };
        if (name == "max" && a > b) || (name == "min" && a < b) {
            best = arg;
        }
    }
    Ok(best.clone())
}

/// Flat index of the first element that wins `better`.
#[allow(clippy::cast_possible_wrap)]
fn arg_extreme(array: &ArrayD<f64>, better: impl Fn(f64, f64) -> bool) -> i64 {
    let mut best = 0;
    let mut best_value = f64::NAN;
    for (i, &v) in array.iter().enumerate() {
        if i == 0 || better(v, best_value) {
            best = i;
            best_value = v;
        }
    }
    best as i64
}

#[allow(clippy::cast_possible_wrap)]
fn length(value: &Value) -> Result<Value> {
    let len = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Array(a) if a.ndim() > 0 => a.shape()[0],
        Value::TextArray(a) if a.ndim() > 0 => a.shape()[0],
        other => {
            return Err(Error::Evaluation(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

fn round(args: Vec<Value>) -> Result<Value> {
    let (value, digits) = match args.len() {
        1 => (args.into_iter().next(), None),
        2 => {
            let mut it = args.into_iter();
            let value = it.next();
            let digits = match it.next() {
                Some(Value::Int(n)) => n,
                Some(other) => return Err(type_error("round", &other)),
                None => 0,
            };
            (value, Some(digits))
        }
        n => {
            return Err(Error::Evaluation(format!(
                "round() takes 1 or 2 arguments, got {n}"
            )))
        }
    };
    let value = value.unwrap_or(Value::None);
    let scale = 10f64.powi(i32::try_from(digits.unwrap_or(0)).unwrap_or(0));
    let rounded = move |x: f64| (x * scale).round_ties_even() / scale;
    match (&value, digits) {
        (Value::Int(_), _) => Ok(value),
        (Value::Array(a), _) => Ok(Value::Array(a.mapv(rounded))),
        (_, None) => {
            let x = value.as_f64().ok_or_else(|| type_error("round", &value))?;
            float_to_int(x.round_ties_even())
        }
        (_, Some(_)) => {
            let x = value.as_f64().ok_or_else(|| type_error("round", &value))?;
            Ok(Value::Float(rounded(x)))
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_int(x: f64) -> Result<Value> {
    if x.is_finite() && x.abs() < 9.2e18 {
        Ok(Value::Int(x.trunc() as i64))
    } else {
        Err(Error::Evaluation(format!(
            "cannot convert {} to integer",
            format_float(x)
        )))
    }
}

fn to_float(value: &Value) -> Result<Value> {
    match value {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::Evaluation(format!("could not convert string to float: '{s}'"))),
        other => other
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| type_error("float", other)),
    }
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Int(_) => Ok(value.clone()),
        Value::Str(s) => {
            let text = s.trim();
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            Err(Error::Evaluation(format!(
                "invalid literal for int(): '{s}'"
            )))
        }
        other => float_to_int(other.as_f64().ok_or_else(|| type_error("int", other))?),
    }
}

/// Wraps a flat vector as a 1-d array value.
#[must_use]
pub(crate) fn vector(values: Vec<f64>) -> Value {
    let len = values.len();
    ArrayD::from_shape_vec(IxDyn(&[len]), values).map_or(Value::None, Value::Array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn array(values: &[f64]) -> Value {
        vector(values.to_vec())
    }

    #[test]
    fn test_whitelist() {
        assert!(is_function("sqrt"));
        assert!(is_function("argmax"));
        assert!(!is_function("eval"));
        assert!(!is_function("open"));
        assert!(matches!(call("open", vec![]), Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_elementwise() {
        assert_eq!(call("abs", vec![Value::Int(-3)]).unwrap(), Value::Int(3));
        assert_eq!(call("sqrt", vec![Value::Float(9.0)]).unwrap(), Value::Float(3.0));
        match call("sqrt", vec![array(&[4.0, 16.0])]).unwrap() {
            Value::Array(a) => assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![2.0, 4.0]),
            other => panic!("unexpected {other:?}"),
        }
        let degrees = call("degrees", vec![Value::Float(std::f64::consts::PI)]).unwrap();
        assert_relative_eq!(degrees.as_f64().unwrap(), 180.0);
    }

    #[test]
    fn test_domain_errors() {
        assert!(matches!(
            call("sqrt", vec![Value::Float(-1.0)]),
            Err(Error::Evaluation(_))
        ));
        assert!(matches!(call("log", vec![Value::Int(0)]), Err(Error::Evaluation(_))));
        assert!(matches!(
            call("sqrt", vec![Value::Str("x".into())]),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn test_reductions() {
        let data = array(&[1.0, 5.0, 3.0]);
        assert_eq!(call("sum", vec![data.clone()]).unwrap(), Value::Float(9.0));
        assert_eq!(call("mean", vec![data.clone()]).unwrap(), Value::Float(3.0));
        assert_eq!(call("max", vec![data.clone()]).unwrap(), Value::Float(5.0));
        assert_eq!(call("argmax", vec![data.clone()]).unwrap(), Value::Int(1));
        assert_eq!(call("argmin", vec![data.clone()]).unwrap(), Value::Int(0));
        let std = call("std", vec![data]).unwrap().as_f64().unwrap();
        assert_relative_eq!(std, (8.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(
            call("max", vec![Value::Int(2), Value::Float(7.5)]).unwrap(),
            Value::Float(7.5)
        );
        assert!(call("sum", vec![array(&[])]).is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("len", vec![array(&[1.0, 2.0])]).unwrap(), Value::Int(2));
        assert_eq!(call("round", vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(
            call("round", vec![Value::Float(3.14159), Value::Int(2)]).unwrap(),
            Value::Float(3.14)
        );
        assert_eq!(call("int", vec![Value::Float(-3.7)]).unwrap(), Value::Int(-3));
        assert_eq!(call("float", vec![Value::Str(" 2.5 ".into())]).unwrap(), Value::Float(2.5));
        assert_eq!(call("str", vec![Value::Float(1.0)]).unwrap(), Value::Str("1.0".into()));
        assert!(call("len", vec![Value::Float(1.0)]).is_err());
        assert!(call("abs", vec![]).is_err());
    }
}
