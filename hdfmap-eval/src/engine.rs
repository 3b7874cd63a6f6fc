//! Expression engine bound to one open container.
//!
//! Evaluation runs in four steps: scan the expression for symbols, swap
//! each distinct symbol for a placeholder identifier, parse the result, and
//! evaluate it. Symbols are resolved only when the evaluator actually asks
//! for their placeholder, so the number of reads follows the names an
//! expression uses, never the size of the namespace.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use hdfmap_core::{
    round_string_floats, DataSource, Error, LazyDataset, NodeKind, Result, Selection, Value,
};
use hdfmap_namespace::{HdfMap, LocalPriority, RoiDefinition};

use crate::expr;
use crate::format::{format_value, parse_template, Piece};
use crate::roi;
use crate::token::{self, NameRef, RefKind, Segment, Token};

/// Nesting limit for named expressions and defaults.
const MAX_DEPTH: usize = 16;

/// Evaluates expressions and templates for one map against one container.
///
/// The container handle is shared; lazy dataset handles produced by
/// `d_name` keep it alive after the evaluator is dropped.
pub struct Evaluator<'m> {
    map: &'m HdfMap,
    source: Arc<dyn DataSource>,
    cache: Option<RefCell<HashMap<String, Value>>>,
}

impl<'m> Evaluator<'m> {
    #[must_use]
    pub fn new(map: &'m HdfMap, source: Arc<dyn DataSource>) -> Self {
        Self {
            map,
            source,
            cache: None,
        }
    }

    /// Enables local-data reuse: each dataset is read at most once.
    #[must_use]
    pub fn with_cache(mut self) -> Self {
        self.enable_cache();
        self
    }

    pub fn enable_cache(&mut self) {
        if self.cache.is_none() {
            self.cache = Some(RefCell::new(HashMap::new()));
        }
    }

    /// Disables local-data reuse and drops every cached value.
    pub fn disable_cache(&mut self) {
        self.cache = None;
    }

    #[must_use]
    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Binds another container. Cached values belong to the old one and are dropped.
    pub fn rebind(&mut self, source: Arc<dyn DataSource>) {
        log::debug!("rebinding {} -> {}", self.source.filepath(), source.filepath());
        self.source = source;
        if let Some(cache) = &self.cache {
            cache.borrow_mut().clear();
        }
    }

    #[must_use]
    pub fn map(&self) -> &'m HdfMap {
        self.map
    }

    #[must_use]
    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// Evaluates an expression.
    ///
    /// # Errors
    /// Returns [`Error::ExpressionSyntax`] for malformed input,
    /// [`Error::NotFound`] for a name without mapping or default, and
    /// [`Error::Evaluation`] when the evaluation itself fails.
    pub fn eval(&self, expression: &str) -> Result<Value> {
        self.eval_at(expression, 0)
    }

    /// Fills every `{expr[:spec]}` field of `template`.
    ///
    /// # Errors
    /// Same as [`Evaluator::eval`], plus [`Error::Evaluation`] for a spec that
    /// does not fit its value.
    pub fn format(&self, template: &str) -> Result<String> {
        let mut out = String::new();
        for piece in parse_template(template)? {
            match piece {
                Piece::Literal(text) => out.push_str(&text),
                Piece::Field { expression, spec } => {
                    let value = expr::materialize(self.eval(&expression)?)?;
                    out.push_str(&format_value(&value, &spec)?);
                }
            }
        }
        log::info!("format '{template}' -> '{out}'");
        Ok(out)
    }

    /// Value of a single name.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if nothing provides `name`.
    pub fn value_of(&self, name: &str) -> Result<Value> {
        self.value_at(name, 0)
    }

    pub(crate) fn eval_at(&self, expression: &str, depth: usize) -> Result<Value> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(Error::syntax(expression, "empty expression"));
        }
        if trimmed.starts_with('/') {
            if let Ok(info) = self.source.info(trimmed) {
                if info.kind == NodeKind::Dataset {
                    return self.read_path(trimmed);
                }
            }
        }

        let scanned = token::scan(trimmed)?;
        let prefix = placeholder_prefix(trimmed);
        let mut placeholders: Vec<(Token, String)> = Vec::new();
        let mut text = String::new();
        for segment in &scanned.segments {
            match segment {
                Segment::Text(literal) => text.push_str(literal),
                Segment::Symbol(symbol) => {
                    let known = placeholders.iter().find(|(t, _)| t == symbol);
                    let name = match known {
                        Some((_, name)) => name.clone(),
                        None => {
                            let name = format!("{prefix}{}__", placeholders.len());
                            placeholders.push((symbol.clone(), name.clone()));
                            name
                        }
                    };
                    text.push_str(&name);
                }
            }
        }
        log::info!(
            "eval '{trimmed}' using {:?}",
            placeholders.iter().map(|(t, _)| t.to_string()).collect::<Vec<_>>()
        );

        let restore = |e: Error| restore_error(e, trimmed, &placeholders);
        let ast = expr::parse(&text).map_err(restore)?;
        let resolved: RefCell<HashMap<String, Value>> = RefCell::new(HashMap::new());
        let lookup = |name: &str| -> Result<Value> {
            if let Some(value) = resolved.borrow().get(name) {
                return Ok(value.clone());
            }
            let Some((symbol, _)) = placeholders.iter().find(|(_, n)| n == name) else {
                return constant(name).ok_or_else(|| Error::NotFound(name.to_string()));
            };
            let value = self.resolve_at(symbol, depth)?;
            resolved.borrow_mut().insert(name.to_string(), value.clone());
            Ok(value)
        };
        expr::evaluate(&ast, &lookup).map_err(restore)
    }

    fn resolve_at(&self, symbol: &Token, depth: usize) -> Result<Value> {
        match symbol {
            Token::Name(reference) => self.resolve_name(reference, depth),
            Token::Attribute { target, attr } => self.attribute(target, attr),
            Token::Default { inner, default } => match self.resolve_at(inner, depth) {
                Err(e) if e.is_not_found() => {
                    log::debug!("{inner} not found, using default ({default})");
                    self.eval_at(default, depth + 1)
                }
                other => other,
            },
            Token::FallbackGroup {
                alternatives,
                default,
            } => {
                for alternative in alternatives {
                    match self.resolve_at(alternative, depth) {
                        Err(e) if e.is_not_found() => log::debug!("{alternative} not found"),
                        other => return other,
                    }
                }
                match default {
                    Some(default) => self.eval_at(default, depth + 1),
                    None => Err(Error::NotFound(format!("no alternative of {symbol} resolved"))),
                }
            }
        }
    }

    fn resolve_name(&self, reference: &NameRef, depth: usize) -> Result<Value> {
        match reference.raw.as_str() {
            "filename" => return Ok(Value::Str(self.source.filename().to_string())),
            "filepath" => return Ok(Value::Str(self.source.filepath().to_string())),
            _ => {}
        }
        // A prefixed identifier that is itself a name is read as that name.
        let reference = if reference.kind != RefKind::Bare && self.is_known(&reference.raw) {
            reference.as_bare()
        } else {
            reference.clone()
        };
        let name = reference.name.as_str();
        match reference.kind {
            RefKind::Bare => self.value_at(name, depth),
            RefKind::Path => self.map.path_of(name).map(Value::Str),
            RefKind::CanonicalName => self.map.name_of(name).map(Value::Str),
            RefKind::StringRepr => self.string_repr(name, depth),
            RefKind::RawHandle => {
                let path = self.map.path_of(name)?;
                LazyDataset::open(Arc::clone(&self.source), &path).map(Value::Dataset)
            }
        }
    }

    fn is_known(&self, name: &str) -> bool {
        self.map.named_expressions().contains_key(name)
            || self.map.local_overrides().contains_key(name)
            || self.map.combined().contains_key(name)
            || self.roi_target(name).is_some()
    }

    fn value_at(&self, name: &str, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::Evaluation(format!(
                "'{name}' nests more than {MAX_DEPTH} expressions deep"
            )));
        }
        if let Some(expression) = self.map.named_expressions().get(name) {
            log::debug!("expanding {name} = {expression}");
            return self.eval_at(expression, depth + 1);
        }
        if let Some(value) = self.map.local_overrides().get(name) {
            let file_wins = self.map.local_priority() == LocalPriority::PreferFile
                && self.map.combined().contains_key(name);
            if !file_wins {
                return Ok(value.clone());
            }
        }
        if let Some((roi_name, definition, suffix)) = self.roi_target(name) {
            return roi::evaluate(self, roi_name, definition, suffix, depth);
        }
        if let Some(path) = self.map.combined().get(name) {
            return self.read_path(path);
        }
        if let Some(value) = constant(name) {
            return Ok(value);
        }
        if let Ok(group) = self.map.group_path_of(name) {
            return Ok(Value::Str(group));
        }
        Err(Error::NotFound(format!(
            "'{name}' is not in the namespace of {}",
            self.map.filepath()
        )))
    }

    /// Registered region whose name plus a known suffix spells `name`.
    fn roi_target(&self, name: &str) -> Option<(&'m str, &'m RoiDefinition, &'static str)> {
        self.map
            .rois()
            .iter()
            .filter_map(|(roi_name, definition)| {
                let rest = name.strip_prefix(roi_name.as_str())?;
                let suffix = roi::SUFFIXES.iter().find(|s| **s == rest)?;
                Some((roi_name.as_str(), definition, *suffix))
            })
            .max_by_key(|(roi_name, _, _)| roi_name.len())
    }

    pub(crate) fn read_path(&self, path: &str) -> Result<Value> {
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.borrow().get(path) {
                log::debug!("reusing {path}");
                return Ok(value.clone());
            }
        }
        log::debug!("reading {path} from {}", self.source.filepath());
        let value = Value::from_data(self.source.read(path, &Selection::all())?);
        if let Some(cache) = &self.cache {
            cache.borrow_mut().insert(path.to_string(), value.clone());
        }
        Ok(value)
    }

    fn string_repr(&self, name: &str, depth: usize) -> Result<Value> {
        let value = expr::materialize(self.value_at(name, depth)?)?;
        let units = self
            .map
            .path_of(name)
            .ok()
            .and_then(|path| self.source.info(&path).ok())
            .and_then(|info| info.attributes.text(&self.map.config().units_attribute))
            .filter(|units| !units.is_empty());
        let text = match units {
            Some(units) => format!("{value} {units}"),
            None => value.to_string(),
        };
        Ok(Value::Str(round_string_floats(&text)))
    }

    fn attribute(&self, target: &str, attr: &str) -> Result<Value> {
        let path = self.map.path_of(target)?;
        let info = self.source.info(&path)?;
        info.attributes
            .get(attr)
            .map(Value::from)
            .ok_or_else(|| Error::NotFound(format!("attribute '{attr}' on '{target}'")))
    }
}

fn constant(name: &str) -> Option<Value> {
    match name {
        "pi" => Some(Value::Float(std::f64::consts::PI)),
        "nan" => Some(Value::Float(f64::NAN)),
        "inf" => Some(Value::Float(f64::INFINITY)),
        _ => None,
    }
}

/// Placeholder prefix that does not occur anywhere in `expression`.
fn placeholder_prefix(expression: &str) -> String {
    let mut prefix = String::from("__sym");
    while expression.contains(&prefix) {
        prefix.push('_');
    }
    prefix
}

/// Puts the original symbols back into error messages.
fn restore_error(error: Error, expression: &str, placeholders: &[(Token, String)]) -> Error {
    let restore = |text: String| {
        placeholders
            .iter()
            .fold(text, |acc, (symbol, name)| acc.replace(name, &symbol.to_string()))
    };
    match error {
        Error::ExpressionSyntax { message, .. } => Error::ExpressionSyntax {
            expression: expression.to_string(),
            message: restore(message),
        },
        Error::Evaluation(message) => Error::Evaluation(restore(message)),
        Error::NotFound(message) => Error::NotFound(restore(message)),
        other => other,
    }
}

/// Evaluation shortcuts on the map itself.
pub trait MapEval {
    /// Evaluates `expression` against `source`.
    ///
    /// # Errors
    /// See [`Evaluator::eval`].
    fn eval(&self, source: Arc<dyn DataSource>, expression: &str) -> Result<Value>;

    /// Fills `template` from `source`.
    ///
    /// # Errors
    /// See [`Evaluator::format`].
    fn format(&self, source: Arc<dyn DataSource>, template: &str) -> Result<String>;
}

impl MapEval for HdfMap {
    fn eval(&self, source: Arc<dyn DataSource>, expression: &str) -> Result<Value> {
        Evaluator::new(self, source).eval(expression)
    }

    fn format(&self, source: Arc<dyn DataSource>, template: &str) -> Result<String> {
        Evaluator::new(self, source).format(template)
    }
}
