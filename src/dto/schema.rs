//! Declarative field rules for DTOs.
//!
//! A [`DtoSchema`] is plain data: each [`FieldSpec`] names a field, its type,
//! whether it is required, nullable or read-only, and a list of [`Rule`]s. The
//! schema coerces loosely typed input and then validates it, reporting every
//! failing field at once.

use crate::entity::Fields;
use crate::error::{RepositoryError, RepositoryResult, ValidationErrors};
use regex::Regex;
use serde_json::{Number, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Any => "any",
        }
    }

    /// Lenient conversion of wire values into this type. Values that cannot be
    /// converted are returned unchanged and fail the type check later.
    fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (FieldType::Integer, Value::Number(n)) if !(n.is_i64() || n.is_u64()) => {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Value::from(f as i64)
                    }
                    _ => Value::Number(n),
                }
            }
            (FieldType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::from(i),
                Err(_) => Value::String(s),
            },
            (FieldType::Float, Value::String(s)) => {
                match s.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                    Some(n) => Value::Number(n),
                    None => Value::String(s),
                }
            }
            (FieldType::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(s),
            },
            (_, value) => value,
        }
    }
}

/// A constraint on a field's value. Rules only look at values of the type they
/// understand; a wrong type is reported by the type check instead.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Minimum length of a string (in characters) or an array.
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    /// The whole string must match.
    Pattern(Regex),
    OneOf(Vec<Value>),
}

impl Rule {
    /// Compiles a pattern rule. The expression is anchored at both ends.
    pub fn pattern(expr: &str) -> RepositoryResult<Rule> {
        Regex::new(&format!("^(?:{expr})$"))
            .map(Rule::Pattern)
            .map_err(|e| RepositoryError::Config(format!("invalid pattern {expr:?}: {e}")))
    }

    /// Name reported in [`FieldError::rule`](crate::FieldError).
    pub fn name(&self) -> String {
        self.to_string()
    }

    pub fn check(&self, value: &Value) -> bool {
        match self {
            Rule::MinLength(min) => length(value).map_or(true, |len| len >= *min),
            Rule::MaxLength(max) => length(value).map_or(true, |len| len <= *max),
            Rule::Min(min) => value.as_f64().map_or(true, |n| n >= *min),
            Rule::Max(max) => value.as_f64().map_or(true, |n| n <= *max),
            Rule::Pattern(re) => value.as_str().map_or(true, |s| re.is_match(s)),
            Rule::OneOf(allowed) => allowed.contains(value),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::MinLength(n) => write!(f, "min_length({n})"),
            Rule::MaxLength(n) => write!(f, "max_length({n})"),
            Rule::Min(n) => write!(f, "min({n})"),
            Rule::Max(n) => write!(f, "max({n})"),
            Rule::Pattern(re) => {
                let expr = re.as_str();
                let inner = expr
                    .strip_prefix("^(?:")
                    .and_then(|s| s.strip_suffix(")$"))
                    .unwrap_or(expr);
                write!(f, "pattern({inner})")
            }
            Rule::OneOf(values) => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "one_of({})", values.join(", "))
            }
        }
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Declaration of one DTO field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub nullable: bool,
    /// Set by the store; a patch may not write it.
    pub read_only: bool,
    pub rules: Vec<Rule>,
}

impl FieldSpec {
    /// A required, non-nullable, writable field.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            nullable: false,
            read_only: false,
            rules: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Accepts `null`. Nullable fields are optional as well.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self.required = false;
        self
    }

    /// Store-assigned and nullable until assigned, like an identity column.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self.nullable().optional()
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Checks one present value against nullability, type and rules.
    pub fn check(&self, path: &str, value: &Value, errors: &mut ValidationErrors) {
        if value.is_null() {
            if !self.nullable {
                errors.push(path, "not_null", Value::Null);
            }
            return;
        }
        if !self.ty.accepts(value) {
            errors.push(path, format!("type({})", self.ty.name()), value.clone());
            return;
        }
        for rule in &self.rules {
            if !rule.check(value) {
                errors.push(path, rule.name(), value.clone());
            }
        }
    }
}

/// The declared shape of a DTO.
///
/// ```
/// use ormrepo::dto::{DtoSchema, FieldSpec, FieldType, Rule};
/// use serde_json::json;
///
/// let schema = DtoSchema::new("user")
///     .field(FieldSpec::new("name", FieldType::String).rule(Rule::MinLength(1)))
///     .field(FieldSpec::new("age", FieldType::Integer).rule(Rule::Min(0.0)));
///
/// let fields = schema.coerce(json!({ "name": "", "age": "-4" }).as_object().unwrap().clone());
/// let errors = schema.validate(&fields).unwrap_err();
/// assert_eq!(errors.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct DtoSchema {
    name: String,
    fields: Vec<FieldSpec>,
    allow_unknown: bool,
}

impl DtoSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            allow_unknown: false,
        }
    }

    /// Adds a field; a later declaration of the same name replaces the earlier.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.retain(|f| f.name != spec.name);
        self.fields.push(spec);
        self
    }

    /// Accept and keep fields the schema does not declare.
    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn allows_unknown(&self) -> bool {
        self.allow_unknown
    }

    pub fn coerce(&self, mut fields: Fields) -> Fields {
        for spec in &self.fields {
            if let Some(value) = fields.remove(&spec.name) {
                fields.insert(spec.name.clone(), spec.ty.coerce(value));
            }
        }
        fields
    }

    /// Validates a complete object, collecting every failure.
    pub fn validate(&self, fields: &Fields) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for spec in &self.fields {
            match fields.get(&spec.name) {
                None if spec.required => errors.push(&spec.name, "required", Value::Null),
                None => {}
                Some(value) => spec.check(&spec.name, value, &mut errors),
            }
        }
        if !self.allow_unknown {
            for (key, value) in fields {
                if self.get(key).is_none() {
                    errors.push(key, "unknown_field", value.clone());
                }
            }
        }
        errors.into_result()
    }

    /// Drops undeclared fields (unless unknown fields are allowed).
    pub fn project(&self, fields: &Fields) -> Fields {
        fields
            .iter()
            .filter(|(key, _)| self.allow_unknown || self.get(key).is_some())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
