//! Filter condition builder.
//!
//! Conditions are built against column *names* and resolved to column ids
//! only when a query is submitted, so one condition can be reused across
//! schema refreshes.
//!
//! ```rust,ignore
//! use socrata_client::expr::{and, col, contains, greater_than, less_than, or, val};
//!
//! let condition = and([
//!     greater_than([col("objectid"), val(0)]),
//!     less_than([col("objectid"), val(20)]),
//!     or([
//!         contains([col("customtext"), val("PARK")]),
//!         contains([col("categoryde"), val("PARK")]),
//!     ]),
//! ]);
//! ```

use crate::error::{ClientError, Result};
use crate::types::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Filter operators understood by the inline rows endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    And,
    Or,
    Equals,
    NotEquals,
    IsBlank,
    IsNotBlank,
    StartsWith,
    Contains,
    NotContains,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Between,
    WithinCircle,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::And,
        Operator::Or,
        Operator::Equals,
        Operator::NotEquals,
        Operator::IsBlank,
        Operator::IsNotBlank,
        Operator::StartsWith,
        Operator::Contains,
        Operator::NotContains,
        Operator::GreaterThan,
        Operator::GreaterThanOrEquals,
        Operator::LessThan,
        Operator::LessThanOrEquals,
        Operator::Between,
        Operator::WithinCircle,
    ];

    /// Wire name of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Equals => "EQUALS",
            Operator::NotEquals => "NOT_EQUALS",
            Operator::IsBlank => "IS_BLANK",
            Operator::IsNotBlank => "IS_NOT_BLANK",
            Operator::StartsWith => "STARTS_WITH",
            Operator::Contains => "CONTAINS",
            Operator::NotContains => "NOT_CONTAINS",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::GreaterThanOrEquals => "GREATER_THAN_OR_EQUALS",
            Operator::LessThan => "LESS_THAN",
            Operator::LessThanOrEquals => "LESS_THAN_OR_EQUALS",
            Operator::Between => "BETWEEN",
            Operator::WithinCircle => "WITHIN_CIRCLE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ClientError::InvalidOperator(s.to_string()))
    }
}

/// An unresolved filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Operator applied to child conditions. Arity is checked by the server.
    Operator {
        op: Operator,
        children: Vec<Condition>,
    },
    /// Literal value
    Literal(Value),
    /// Column referenced by `fieldName`
    Column(String),
}

impl Condition {
    /// Apply `op` to `children`.
    pub fn op(op: Operator, children: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Operator {
            op,
            children: children.into_iter().collect(),
        }
    }

    /// Field names referenced anywhere in the tree, in visit order.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_columns(&mut names);
        names
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Operator { children, .. } => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Condition::Column(name) => out.push(name),
            Condition::Literal(_) => {}
        }
    }

    /// Replace column names with ids from `schema`.
    pub fn resolve(&self, schema: &SchemaSnapshot) -> Result<ResolvedFilter> {
        resolve(self, schema)
    }
}

/// Filter tree in the shape the rows endpoint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResolvedFilter {
    Operator {
        value: Operator,
        children: Vec<ResolvedFilter>,
    },
    Literal {
        value: Value,
    },
    Column {
        #[serde(rename = "columnId")]
        column_id: i64,
    },
}

/// Resolve `condition` against `schema`.
///
/// Fails with [`ClientError::UnknownColumn`] on the first field name the
/// schema does not contain.
pub fn resolve(condition: &Condition, schema: &SchemaSnapshot) -> Result<ResolvedFilter> {
    match condition {
        Condition::Operator { op, children } => Ok(ResolvedFilter::Operator {
            value: *op,
            children: children
                .iter()
                .map(|child| resolve(child, schema))
                .collect::<Result<_>>()?,
        }),
        Condition::Literal(value) => Ok(ResolvedFilter::Literal {
            value: value.clone(),
        }),
        Condition::Column(name) => schema
            .column_id(name)
            .map(|column_id| ResolvedFilter::Column { column_id })
            .ok_or_else(|| ClientError::UnknownColumn {
                field: name.clone(),
            }),
    }
}

/// Literal value.
pub fn val(value: impl Into<Value>) -> Condition {
    Condition::Literal(value.into())
}

/// Column reference by `fieldName`.
pub fn col(field_name: impl Into<String>) -> Condition {
    Condition::Column(field_name.into())
}

macro_rules! operator_fns {
    ($($(#[$doc:meta])* $name:ident => $op:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(children: impl IntoIterator<Item = Condition>) -> Condition {
                Condition::op(Operator::$op, children)
            }
        )*
    };
}

operator_fns! {
    /// All children must hold.
    and => And;
    /// Any child must hold.
    or => Or;
    equals => Equals;
    not_equals => NotEquals;
    is_blank => IsBlank;
    is_not_blank => IsNotBlank;
    starts_with => StartsWith;
    contains => Contains;
    not_contains => NotContains;
    greater_than => GreaterThan;
    greater_than_or_equals => GreaterThanOrEquals;
    less_than => LessThan;
    less_than_or_equals => LessThanOrEquals;
    /// Column, lower bound, upper bound.
    between => Between;
    /// Location column, latitude, longitude, radius.
    within_circle => WithinCircle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnDescriptor;
    use serde_json::json;

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![
            ColumnDescriptor::new(1, "objectid"),
            ColumnDescriptor::new(2, "customtext"),
        ])
    }

    #[test]
    fn test_resolve_greater_than() {
        let condition = greater_than([col("objectid"), val(0)]);
        let resolved = condition.resolve(&schema()).unwrap();

        assert_eq!(
            serde_json::to_value(&resolved).unwrap(),
            json!({
                "type": "operator",
                "value": "GREATER_THAN",
                "children": [
                    {"columnId": 1, "type": "column"},
                    {"type": "literal", "value": 0}
                ]
            })
        );
    }

    #[test]
    fn test_resolve_nested_tree() {
        let condition = and([
            greater_than([col("objectid"), val(0)]),
            or([
                contains([col("customtext"), val("PARK")]),
                is_blank([col("customtext")]),
            ]),
        ]);

        let resolved = resolve(&condition, &schema()).unwrap();
        let value = serde_json::to_value(&resolved).unwrap();
        assert_eq!(value["value"], "AND");
        assert_eq!(value["children"][1]["value"], "OR");
        assert_eq!(value["children"][1]["children"][0]["children"][0]["columnId"], 2);
        assert_eq!(value["children"][1]["children"][0]["children"][1]["value"], "PARK");
    }

    #[test]
    fn test_unknown_column_fails() {
        let condition = and([
            greater_than([col("objectid"), val(0)]),
            contains([col("categoryde"), val("PARK")]),
        ]);

        match condition.resolve(&schema()) {
            Err(ClientError::UnknownColumn { field }) => assert_eq!(field, "categoryde"),
            other => panic!("Expected UnknownColumn, got: {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let condition = equals([col("customtext"), val("x")]);

        let first = condition.resolve(&schema()).unwrap();
        let moved = SchemaSnapshot::new(vec![
            ColumnDescriptor::new(10, "objectid"),
            ColumnDescriptor::new(20, "customtext"),
        ]);
        let second = condition.resolve(&moved).unwrap();

        assert_ne!(first, second);
        assert_eq!(
            second,
            ResolvedFilter::Operator {
                value: Operator::Equals,
                children: vec![
                    ResolvedFilter::Column { column_id: 20 },
                    ResolvedFilter::Literal { value: json!("x") },
                ],
            }
        );
    }

    #[test]
    fn test_no_arity_validation() {
        let condition = between([col("objectid")]);
        assert!(condition.resolve(&schema()).is_ok());

        let empty = and(Vec::new());
        assert_eq!(
            serde_json::to_value(empty.resolve(&schema()).unwrap()).unwrap(),
            json!({"type": "operator", "value": "AND", "children": []})
        );
    }

    #[test]
    fn test_operator_names_round_trip() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
            assert_eq!(
                serde_json::to_value(op).unwrap(),
                Value::String(op.to_string())
            );
        }
        assert!(matches!(
            "NOPE".parse::<Operator>(),
            Err(ClientError::InvalidOperator(ref name)) if name == "NOPE"
        ));
    }

    fn resolved_column_ids(filter: &ResolvedFilter, out: &mut Vec<i64>) {
        match filter {
            ResolvedFilter::Operator { children, .. } => {
                for child in children {
                    resolved_column_ids(child, out);
                }
            }
            ResolvedFilter::Column { column_id } => out.push(*column_id),
            ResolvedFilter::Literal { .. } => {}
        }
    }

    #[test]
    fn test_every_constructor_resolves_or_names_missing_field() {
        let constructors: [(Operator, fn(Vec<Condition>) -> Condition); 15] = [
            (Operator::And, |c| and(c)),
            (Operator::Or, |c| or(c)),
            (Operator::Equals, |c| equals(c)),
            (Operator::NotEquals, |c| not_equals(c)),
            (Operator::IsBlank, |c| is_blank(c)),
            (Operator::IsNotBlank, |c| is_not_blank(c)),
            (Operator::StartsWith, |c| starts_with(c)),
            (Operator::Contains, |c| contains(c)),
            (Operator::NotContains, |c| not_contains(c)),
            (Operator::GreaterThan, |c| greater_than(c)),
            (Operator::GreaterThanOrEquals, |c| greater_than_or_equals(c)),
            (Operator::LessThan, |c| less_than(c)),
            (Operator::LessThanOrEquals, |c| less_than_or_equals(c)),
            (Operator::Between, |c| between(c)),
            (Operator::WithinCircle, |c| within_circle(c)),
        ];
        assert_eq!(constructors.len(), Operator::ALL.len());

        let complete = schema();
        let incomplete = SchemaSnapshot::new(vec![ColumnDescriptor::new(1, "objectid")]);

        for (op, build) in constructors {
            let condition = build(vec![
                col("objectid"),
                val(1),
                equals([col("customtext"), val("x")]),
            ]);

            let resolved = condition.resolve(&complete).unwrap();
            match &resolved {
                ResolvedFilter::Operator { value, children } => {
                    assert_eq!(*value, op);
                    assert_eq!(children.len(), 3);
                }
                other => panic!("{}: expected operator node, got: {:?}", op, other),
            }

            let expected: Vec<i64> = condition
                .column_names()
                .into_iter()
                .map(|name| complete.column_id(name).unwrap())
                .collect();
            let mut ids = Vec::new();
            resolved_column_ids(&resolved, &mut ids);
            assert_eq!(ids, expected, "{}", op);

            match condition.resolve(&incomplete) {
                Err(ClientError::UnknownColumn { field }) => assert_eq!(field, "customtext"),
                other => panic!("{}: expected UnknownColumn, got: {:?}", op, other),
            }
        }
    }

    #[test]
    fn test_column_names() {
        let condition = or([
            equals([col("a"), val(1)]),
            within_circle([col("location"), val(47.6), val(-122.3), val(500)]),
        ]);
        assert_eq!(condition.column_names(), vec!["a", "location"]);
    }

    #[test]
    fn test_condition_from_json() {
        let condition: Condition = serde_json::from_value(json!({
            "operator": {
                "op": "STARTS_WITH",
                "children": [{"column": "customtext"}, {"literal": "PARK"}]
            }
        }))
        .unwrap();

        assert_eq!(condition, starts_with([col("customtext"), val("PARK")]));
    }
}
