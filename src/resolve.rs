//! The SQL-translating visitor: resolves member references against the
//! query's scope and checks that every node has a SQL rendering.
//!
//! Nodes the default pass does not know come back as "unhandled" (`None`);
//! they are then offered to the registered [`UnknownNodeVisitor`]s. A node
//! nobody handles is a compile error.

use std::sync::Arc;

use crate::error::{Result, SearchlinkError};
use crate::sql::SqlExpr;
use crate::translate::TranslationContext;

/// Scalar functions the store understands natively.
const KNOWN_FUNCTIONS: &[(&str, usize)] = &[("lower", 1), ("upper", 1), ("length", 1), ("trim", 1), ("abs", 1)];

/// Extension hook for IR nodes the default visitor leaves unhandled.
pub trait UnknownNodeVisitor: Send + Sync {
    /// Returns the translated node, or `None` to leave it unhandled.
    fn visit_unknown(&self, node: &SqlExpr, visitor: &SqlTranslatingVisitor<'_, '_>) -> Result<Option<SqlExpr>>;
}

pub struct SqlTranslatingVisitor<'c, 'm> {
    ctx: &'c TranslationContext<'m>,
    extensions: &'c [Arc<dyn UnknownNodeVisitor>],
}

impl<'c, 'm> SqlTranslatingVisitor<'c, 'm> {
    pub fn new(ctx: &'c TranslationContext<'m>, extensions: &'c [Arc<dyn UnknownNodeVisitor>]) -> Self {
        Self { ctx, extensions }
    }

    /// Visits `node`, falling back to the extensions when the default pass
    /// leaves it unhandled.
    pub fn visit(&self, node: &SqlExpr) -> Result<SqlExpr> {
        if let Some(resolved) = self.visit_default(node)? {
            return Ok(resolved);
        }
        for extension in self.extensions {
            if let Some(resolved) = extension.visit_unknown(node, self)? {
                return Ok(resolved);
            }
        }
        Err(SearchlinkError::Compile(format!("no SQL translation for {}", describe(node))))
    }

    /// The engine's own handling. `Ok(None)` means unhandled.
    pub fn visit_default(&self, node: &SqlExpr) -> Result<Option<SqlExpr>> {
        Ok(Some(match node {
            SqlExpr::Member { item, property } => {
                let entry = self.ctx.scope(item)?;
                let found = entry.entity.find_property(property).ok_or_else(|| {
                    SearchlinkError::Compile(format!(
                        "entity '{}' has no property '{}'",
                        entry.entity.name(),
                        property
                    ))
                })?;
                SqlExpr::Column { alias: entry.alias.clone(), column: found.column().to_string() }
            }
            SqlExpr::Column { .. } | SqlExpr::Literal(_) | SqlExpr::Parameter(_) => node.clone(),
            SqlExpr::Binary { left, op, right } => SqlExpr::Binary {
                left: Box::new(self.visit(left)?),
                op: *op,
                right: Box::new(self.visit(right)?),
            },
            SqlExpr::And(l, r) => SqlExpr::And(Box::new(self.visit(l)?), Box::new(self.visit(r)?)),
            SqlExpr::Or(l, r) => SqlExpr::Or(Box::new(self.visit(l)?), Box::new(self.visit(r)?)),
            SqlExpr::Not(e) => SqlExpr::Not(Box::new(self.visit(e)?)),
            SqlExpr::Function { name, args } => {
                let known = KNOWN_FUNCTIONS
                    .iter()
                    .any(|(n, arity)| n.eq_ignore_ascii_case(name) && *arity == args.len());
                if !known {
                    return Ok(None);
                }
                SqlExpr::Function {
                    name: name.clone(),
                    args: args.iter().map(|a| self.visit(a)).collect::<Result<Vec<_>>>()?,
                }
            }
            SqlExpr::Membership(_) => return Ok(None),
        }))
    }
}

fn describe(node: &SqlExpr) -> String {
    match node {
        SqlExpr::Function { name, args } => format!("function {name}/{}", args.len()),
        SqlExpr::Membership(m) => format!("membership test on parameter '{}'", m.parameter()),
        other => format!("{other:?}"),
    }
}
