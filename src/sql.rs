//! Relational IR and its rendering into SQLite text.
//!
//! Filter expressions are first translated into [`SqlExpr`] fragments that
//! still refer to item members. The SQL-translating visitor (see `resolve`)
//! then replaces members with qualified columns, and [`SqlWriter`] renders the
//! finished [`SelectStatement`] with named parameters.

use std::fmt;
use std::fmt::Write;

use crate::datatype::Value;
use crate::error::{Result, SearchlinkError};
use crate::expr::BinaryOp;

/// Stable identity of a search marker, carried from the rewrite to plan assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u32);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// "The operand is one of the values bound to `parameter`."
///
/// The value set is not known when the node is built; it is bound per
/// execution under `parameter`.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipNode {
    operand: Box<SqlExpr>,
    parameter: String,
    marker: MarkerId,
}

impl MembershipNode {
    pub fn new(operand: SqlExpr, parameter: &str, marker: MarkerId) -> Self {
        Self { operand: Box::new(operand), parameter: parameter.to_string(), marker }
    }
    pub fn operand(&self) -> &SqlExpr {
        &self.operand
    }
    pub fn parameter(&self) -> &str {
        &self.parameter
    }
    pub fn marker(&self) -> MarkerId {
        self.marker
    }
    /// An equivalent node over a different operand.
    pub fn with_operand(&self, operand: SqlExpr) -> Self {
        Self { operand: Box::new(operand), parameter: self.parameter.clone(), marker: self.marker }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// Not yet resolved `item.property` reference.
    Member { item: String, property: String },
    Column { alias: String, column: String },
    Literal(Value),
    /// A value supplied by the caller at enumeration time.
    Parameter(String),
    Binary { left: Box<SqlExpr>, op: BinaryOp, right: Box<SqlExpr> },
    And(Box<SqlExpr>, Box<SqlExpr>),
    Or(Box<SqlExpr>, Box<SqlExpr>),
    Not(Box<SqlExpr>),
    Function { name: String, args: Vec<SqlExpr> },
    Membership(MembershipNode),
}

impl SqlExpr {
    pub fn and(self, other: SqlExpr) -> SqlExpr {
        SqlExpr::And(Box::new(self), Box::new(other))
    }
    /// Collects every membership node in the tree.
    pub fn memberships(&self) -> Vec<&MembershipNode> {
        let mut found = Vec::new();
        self.collect_memberships(&mut found);
        found
    }
    fn collect_memberships<'a>(&'a self, found: &mut Vec<&'a MembershipNode>) {
        match self {
            SqlExpr::Membership(m) => {
                found.push(m);
                m.operand().collect_memberships(found);
            }
            SqlExpr::Binary { left, right, .. } | SqlExpr::And(left, right) | SqlExpr::Or(left, right) => {
                left.collect_memberships(found);
                right.collect_memberships(found);
            }
            SqlExpr::Not(e) => e.collect_memberships(found),
            SqlExpr::Function { args, .. } => {
                for a in args {
                    a.collect_memberships(found);
                }
            }
            SqlExpr::Member { .. } | SqlExpr::Column { .. } | SqlExpr::Literal(_) | SqlExpr::Parameter(_) => (),
        }
    }
}

// ------------- Statement -------------
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRef {
    pub table: TableRef,
    pub on: SqlExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: SqlExpr,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projection: Vec<ProjectionItem>,
    pub from: TableRef,
    pub joins: Vec<JoinRef>,
    pub predicate: Option<SqlExpr>,
    pub order_by: Vec<(SqlExpr, bool)>,
    pub limit: Option<u64>,
}

/// Where the value of a named SQL parameter comes from at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterSource {
    /// Supplied by the caller of the enumeration.
    Caller,
    /// Bound by a pre-step into the execution context.
    Bound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSlot {
    pub name: String,
    pub source: ParameterSource,
}

impl ParameterSlot {
    /// The name as it appears in the SQL text.
    pub fn placeholder(&self) -> String {
        format!(":{}", self.name)
    }
}

/// Rendered SQL plus the named parameters it expects, in order of first use.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub text: String,
    pub parameters: Vec<ParameterSlot>,
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

// ------------- Writer -------------
/// Renders a resolved statement into SQLite text. Member references must have
/// been resolved to columns before rendering.
#[derive(Default)]
pub struct SqlWriter {
    text: String,
    parameters: Vec<ParameterSlot>,
}

impl SqlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(mut self, statement: &SelectStatement) -> Result<RenderedSql> {
        self.text.push_str("SELECT ");
        for (i, item) in statement.projection.iter().enumerate() {
            if i > 0 {
                self.text.push_str(", ");
            }
            self.expr(&item.expr)?;
            self.push(&format!(" AS {}", quote(&item.name)));
        }
        self.push(&format!(" FROM {} AS {}", quote(&statement.from.table), quote(&statement.from.alias)));
        for join in &statement.joins {
            self.push(&format!(" INNER JOIN {} AS {} ON ", quote(&join.table.table), quote(&join.table.alias)));
            self.expr(&join.on)?;
        }
        if let Some(predicate) = &statement.predicate {
            self.text.push_str(" WHERE ");
            self.expr(predicate)?;
        }
        if !statement.order_by.is_empty() {
            self.text.push_str(" ORDER BY ");
            for (i, (expr, descending)) in statement.order_by.iter().enumerate() {
                if i > 0 {
                    self.text.push_str(", ");
                }
                self.expr(expr)?;
                if *descending {
                    self.text.push_str(" DESC");
                }
            }
        }
        if let Some(limit) = statement.limit {
            self.push(&format!(" LIMIT {limit}"));
        }
        Ok(RenderedSql { text: self.text, parameters: self.parameters })
    }

    fn push(&mut self, s: &str) {
        self.text.push_str(s);
    }

    fn parameter(&mut self, name: &str, source: ParameterSource) -> Result<()> {
        match self.parameters.iter().find(|p| p.name == name) {
            Some(existing) if existing.source != source => {
                return Err(SearchlinkError::Compile(format!(
                    "parameter '{name}' is used both as a caller value and a bound value set"
                )));
            }
            Some(_) => (),
            None => self.parameters.push(ParameterSlot { name: name.to_string(), source }),
        }
        self.text.push(':');
        self.text.push_str(name);
        Ok(())
    }

    fn expr(&mut self, expr: &SqlExpr) -> Result<()> {
        match expr {
            SqlExpr::Member { item, property } => {
                return Err(SearchlinkError::Invariant(format!(
                    "member {item}.{property} reached SQL rendering unresolved"
                )));
            }
            SqlExpr::Column { alias, column } => {
                let _ = write!(self.text, "{}.{}", quote(alias), quote(column));
            }
            SqlExpr::Literal(value) => match value {
                Value::Null => self.push("NULL"),
                Value::Integer(i) => {
                    let _ = write!(self.text, "{i}");
                }
                Value::Real(r) => {
                    let _ = write!(self.text, "{r:?}");
                }
                Value::Text(s) => {
                    let _ = write!(self.text, "'{}'", s.replace('\'', "''"));
                }
            },
            SqlExpr::Parameter(name) => self.parameter(name, ParameterSource::Caller)?,
            SqlExpr::Binary { left, op, right } => {
                self.text.push('(');
                self.expr(left)?;
                // `= NULL` never matches, use IS semantics for null literals
                let op = match (op, right.as_ref()) {
                    (BinaryOp::Eq, SqlExpr::Literal(Value::Null)) => "IS",
                    (BinaryOp::NotEq, SqlExpr::Literal(Value::Null)) => "IS NOT",
                    (op, _) => op.sql(),
                };
                let _ = write!(self.text, " {op} ");
                self.expr(right)?;
                self.text.push(')');
            }
            SqlExpr::And(left, right) => {
                self.text.push('(');
                self.expr(left)?;
                self.push(" AND ");
                self.expr(right)?;
                self.text.push(')');
            }
            SqlExpr::Or(left, right) => {
                self.text.push('(');
                self.expr(left)?;
                self.push(" OR ");
                self.expr(right)?;
                self.text.push(')');
            }
            SqlExpr::Not(e) => {
                self.push("(NOT ");
                self.expr(e)?;
                self.text.push(')');
            }
            SqlExpr::Function { name, args } => {
                self.push(&name.to_ascii_uppercase());
                self.text.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(a)?;
                }
                self.text.push(')');
            }
            SqlExpr::Membership(m) => {
                // rarray() is the table-valued form of a bound IN-list
                self.expr(m.operand())?;
                self.push(" IN rarray(");
                self.parameter(m.parameter(), ParameterSource::Bound)?;
                self.text.push(')');
            }
        }
        Ok(())
    }
}
