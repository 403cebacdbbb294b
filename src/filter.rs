//! Annotation filters.
//!
//! Filters arrive as JSON-logic expressions, e.g.
//! `{"and": [{"==": [{"var": "type"}, "shape"]}, {">": [{"var": "width"}, 10]}]}`.
//! They are parsed once into a [`FilterExpr`] and evaluated against the
//! [`Fields`] projected from each candidate object.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::AnnotationError;
use crate::geometry::bounding_box;
use crate::model::{ObjectState, ShapeType};

/// Flat map of filterable fields of one object.
pub type Fields = BTreeMap<String, Value>;

// ============================================================================
// AST
// ============================================================================

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Accepted operand counts. `<` and `<=` also take the three-operand
    /// "between" form.
    fn accepts_arity(self, arity: usize) -> bool {
        match self {
            CompareOp::Lt | CompareOp::Le => arity == 2 || arity == 3,
            _ => arity == 2,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Comparison operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// Field path, e.g. `label` or `attr.car.color`
    Var(String),
}

impl Operand {
    fn resolve<'a>(&'a self, fields: &'a Fields) -> Option<&'a Value> {
        match self {
            Operand::Literal(value) => Some(value),
            Operand::Var(path) => fields.get(path),
        }
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Compare { op: CompareOp, operands: Vec<Operand> },
}

impl FilterExpr {
    /// Parse a JSON-logic value.
    pub fn parse(value: &Value) -> Result<Self, AnnotationError> {
        let Value::Object(map) = value else {
            return Err(AnnotationError::argument(format!(
                "Filter node must be an object, got {}",
                value
            )));
        };
        let mut entries = map.iter();
        let (Some((op, args)), None) = (entries.next(), entries.next()) else {
            return Err(AnnotationError::argument(
                "Filter node must have exactly one operator",
            ));
        };
        let Value::Array(args) = args else {
            return Err(AnnotationError::argument(format!(
                "Operands of '{}' must be an array",
                op
            )));
        };

        match op.as_str() {
            "and" | "or" => {
                if args.is_empty() {
                    return Err(AnnotationError::argument(format!(
                        "'{}' requires at least one operand",
                        op
                    )));
                }
                let children = args.iter().map(Self::parse).collect::<Result<Vec<_>, _>>()?;
                Ok(if op == "and" {
                    FilterExpr::And(children)
                } else {
                    FilterExpr::Or(children)
                })
            }
            other => {
                let Some(compare) = CompareOp::parse(other) else {
                    return Err(AnnotationError::argument(format!(
                        "Unknown filter operator '{}'",
                        other
                    )));
                };
                if !compare.accepts_arity(args.len()) {
                    return Err(AnnotationError::argument(format!(
                        "Operator '{}' does not take {} operands",
                        other,
                        args.len()
                    )));
                }
                let operands = args.iter().map(parse_operand).collect::<Result<Vec<_>, _>>()?;
                Ok(FilterExpr::Compare {
                    op: compare,
                    operands,
                })
            }
        }
    }

    /// Parse a JSON-logic expression from text.
    pub fn parse_str(json: &str) -> Result<Self, AnnotationError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| AnnotationError::argument(format!("Invalid filter JSON: {}", e)))?;
        Self::parse(&value)
    }

    /// Evaluate against projected fields.
    ///
    /// A comparison that references a missing field is false.
    pub fn evaluate(&self, fields: &Fields) -> bool {
        match self {
            FilterExpr::And(children) => children.iter().all(|c| c.evaluate(fields)),
            FilterExpr::Or(children) => children.iter().any(|c| c.evaluate(fields)),
            FilterExpr::Compare { op, operands } => {
                let Some(values) = operands
                    .iter()
                    .map(|o| o.resolve(fields))
                    .collect::<Option<Vec<_>>>()
                else {
                    return false;
                };
                values
                    .windows(2)
                    .all(|pair| op.holds(compare_values(pair[0], pair[1])))
            }
        }
    }

    /// Project `state` and evaluate.
    pub fn matches(&self, state: &ObjectState) -> bool {
        self.evaluate(&project(state))
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, children: &[FilterExpr], sep: &str| {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")
        };
        match self {
            FilterExpr::And(children) => join(f, children, "&"),
            FilterExpr::Or(children) => join(f, children, "|"),
            FilterExpr::Compare { op, operands } => {
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", op.as_str())?;
                    }
                    match operand {
                        Operand::Literal(value) => write!(f, "{}", value)?,
                        Operand::Var(path) => write!(f, "{}", path)?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn parse_operand(value: &Value) -> Result<Operand, AnnotationError> {
    match value {
        Value::Object(map) => match map.get("var") {
            Some(Value::String(path)) if map.len() == 1 => Ok(Operand::Var(path.clone())),
            _ => Err(AnnotationError::argument(format!(
                "Operand must be a literal or {{\"var\": <path>}}, got {}",
                value
            ))),
        },
        Value::Array(_) => Err(AnnotationError::argument(format!(
            "Array operands are not supported: {}",
            value
        ))),
        literal => Ok(Operand::Literal(literal.clone())),
    }
}

// ============================================================================
// Evaluation helpers
// ============================================================================

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric when both sides read as numbers, textual otherwise.
fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => as_text(left).cmp(&as_text(right)),
    }
}

// ============================================================================
// Projection
// ============================================================================

/// Filterable fields of an object state.
///
/// Keys: `type`, `shape`, `label`, `width`, `height`, `occluded`,
/// `clientID`, `serverID` and `attr.<label>.<attribute>`.
pub fn project(state: &ObjectState) -> Fields {
    let mut fields = Fields::new();
    fields.insert("type".into(), Value::from(state.object_type().as_str()));
    fields.insert("label".into(), Value::from(state.label().name.as_str()));
    fields.insert("occluded".into(), Value::from(state.occluded()));

    if let Some(shape_type) = state.shape_type() {
        fields.insert("shape".into(), Value::from(shape_type.as_str()));
        let bbox_type = if shape_type == ShapeType::Skeleton {
            ShapeType::Points
        } else {
            shape_type
        };
        if let Some(bbox) = bounding_box(&state.points(), bbox_type) {
            fields.insert("width".into(), Value::from(bbox.width));
            fields.insert("height".into(), Value::from(bbox.height));
        }
    }
    if let Some(client_id) = state.client_id() {
        fields.insert("clientID".into(), Value::from(client_id));
    }
    if let Some(server_id) = state.server_id() {
        fields.insert("serverID".into(), Value::from(server_id));
    }

    let label = state.label();
    for (id, value) in state.attributes() {
        if let Some(spec) = label.attribute(*id) {
            fields.insert(
                format!("attr.{}.{}", label.name, spec.name),
                Value::from(value.as_str()),
            );
        }
    }
    fields
}
