//! The uncompiled query as the application states it: a root source, optional
//! joins, filter clauses, a projection, ordering and a row limit.

use std::fmt;

use crate::datatype::Value;

/// The name the application calls to filter by the external search service.
pub const SEARCH_FUNCTION: &str = "search";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
}

impl BinaryOp {
    pub fn sql(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Like => "LIKE",
        }
    }
}

/// A filter or projection expression over the query's item variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The item variable itself, e.g. `c` in `from c in Customers`.
    Item(String),
    /// A property read off an item variable, e.g. `c.City`.
    Member { item: String, property: String },
    Literal(Value),
    /// A named value supplied when the query is enumerated, e.g. `@city`.
    Parameter(String),
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Call { function: String, args: Vec<Expr> },
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
    pub fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary { left: Box::new(self), op, right: Box::new(right) }
    }
    pub fn equals(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }
    /// The item variable a marker predicate refers to, when this expression
    /// has the exact `search(item, text)` shape.
    pub fn as_search_marker(&self) -> Option<(&str, &Expr)> {
        match self {
            Expr::Call { function, args } if function == SEARCH_FUNCTION && args.len() == 2 => {
                match (&args[0], &args[1]) {
                    (Expr::Item(item), text @ (Expr::Literal(Value::Text(_)) | Expr::Parameter(_))) => {
                        Some((item.as_str(), text))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

pub fn item(name: &str) -> Expr {
    Expr::Item(name.to_string())
}

pub fn member(item: &str, property: &str) -> Expr {
    Expr::Member { item: item.to_string(), property: property.to_string() }
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

pub fn param(name: &str) -> Expr {
    Expr::Parameter(name.to_string())
}

pub fn call(function: &str, args: Vec<Expr>) -> Expr {
    Expr::Call { function: function.to_string(), args }
}

/// The marker predicate: keep only items the search service matches for `text`.
pub fn search(item_name: &str, text: &str) -> Expr {
    call(SEARCH_FUNCTION, vec![item(item_name), lit(text)])
}

/// Same as [`search`] with the free text supplied as a named parameter.
pub fn search_param(item_name: &str, parameter: &str) -> Expr {
    call(SEARCH_FUNCTION, vec![item(item_name), param(parameter)])
}

// ------------- Query -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub item: String,
    pub entity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub source: Source,
    pub left: Expr,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub source: Source,
    pub joins: Vec<Join>,
    /// Each entry is one `where` clause; clauses are combined with `and`.
    pub filters: Vec<Expr>,
    /// Empty means every property of the root entity.
    pub projection: Vec<Expr>,
    pub ordering: Vec<Ordering>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn from(item: &str, entity: &str) -> Self {
        Self {
            source: Source { item: item.to_string(), entity: entity.to_string() },
            joins: Vec::new(),
            filters: Vec::new(),
            projection: Vec::new(),
            ordering: Vec::new(),
            limit: None,
        }
    }
    pub fn join(mut self, item: &str, entity: &str, left: Expr, right: Expr) -> Self {
        self.joins.push(Join {
            source: Source { item: item.to_string(), entity: entity.to_string() },
            left,
            right,
        });
        self
    }
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filters.push(predicate);
        self
    }
    pub fn select(mut self, exprs: Vec<Expr>) -> Self {
        self.projection = exprs;
        self
    }
    pub fn order_by(mut self, expr: Expr, descending: bool) -> Self {
        self.ordering.push(Ordering { expr, descending });
        self
    }
    pub fn take(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        std::iter::once(&self.source).chain(self.joins.iter().map(|j| &j.source))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Item(i) => write!(f, "{i}"),
            Expr::Member { item, property } => write!(f, "{item}.{property}"),
            Expr::Literal(Value::Text(s)) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Parameter(p) => write!(f, "@{p}"),
            Expr::Binary { left, op, right } => write!(f, "{left} {} {right}", op.sql()),
            Expr::And(l, r) => write!(f, "({l} and {r})"),
            Expr::Or(l, r) => write!(f, "({l} or {r})"),
            Expr::Not(e) => write!(f, "not {e}"),
            Expr::Call { function, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{function}({})", args.join(", "))
            }
        }
    }
}
