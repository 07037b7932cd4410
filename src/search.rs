//! The search extension: lets a query filter its items by the keys an
//! external search service returns for a free-text query.
//!
//! Three pieces cooperate, and [`register`] installs them together:
//!
//! 1. [`SearchPredicateTranslator`] rewrites the `search(item, text)` marker
//!    into a membership test of the item's primary key against a value set
//!    named `search_ids_<n>`, and records the marker.
//! 2. [`MembershipPassThrough`] lets the SQL-translating visitor accept the
//!    membership node, resolving only its operand.
//! 3. [`SearchPlanInterceptor`] puts a search pre-step in front of the
//!    relational step, so the value set is bound before the SQL runs.

use std::sync::Arc;

use tracing::debug;

use crate::compile::CompilerExtensions;
use crate::datatype::{Value, ValueKind};
use crate::error::{Result, SearchlinkError};
use crate::expr::Expr;
use crate::plan::{ClauseCompilerHook, ExecutionChain, PreStep, WhereClause};
use crate::resolve::{SqlTranslatingVisitor, UnknownNodeVisitor};
use crate::sql::{MembershipNode, SqlExpr};
use crate::translate::{ExprTranslator, FragmentTranslator, SearchMarker, SearchText, TranslationContext};

const PARAMETER_PREFIX: &str = "search_ids_";

/// Installs the three search components into `extensions`.
pub fn register(extensions: &mut CompilerExtensions) {
    extensions.translators.push(Arc::new(SearchPredicateTranslator));
    extensions.unknown_node_visitors.push(Arc::new(MembershipPassThrough));
    extensions.clause_hooks.push(Arc::new(SearchPlanInterceptor));
}

// ------------- Rewrite -------------
#[derive(Debug, Default)]
pub struct SearchPredicateTranslator;

impl FragmentTranslator for SearchPredicateTranslator {
    fn translate(
        &self,
        expr: &Expr,
        ctx: &mut TranslationContext<'_>,
        _translator: &ExprTranslator,
    ) -> Result<Option<SqlExpr>> {
        let Some((item, text)) = expr.as_search_marker() else {
            return Ok(None);
        };
        if !ctx.markers().is_empty() {
            return Err(SearchlinkError::Compile(
                "a query may contain at most one search predicate".to_string(),
            ));
        }
        let entity = Arc::clone(&ctx.scope(item)?.entity);
        let key = ctx.model().primary_key_property_of(&entity)?;
        if !matches!(key.kind(), ValueKind::Text | ValueKind::Integer) {
            return Err(SearchlinkError::Compile(format!(
                "key property '{}' of entity '{}' is {}; search keys must be Text or Integer",
                key.name(),
                entity.name(),
                key.kind().name()
            )));
        }
        let index = entity.index().ok_or_else(|| {
            SearchlinkError::Compile(format!("entity '{}' has no search index", entity.name()))
        })?;
        let text = match text {
            Expr::Literal(Value::Text(s)) => SearchText::Literal(s.clone()),
            Expr::Parameter(p) => SearchText::Parameter(p.clone()),
            other => {
                return Err(SearchlinkError::Invariant(format!("unexpected search text operand {other}")));
            }
        };

        let id = ctx.next_marker_id();
        let parameter = format!("{PARAMETER_PREFIX}{}", id.0);
        let operand = SqlExpr::Member { item: item.to_string(), property: key.name().to_string() };
        let node = MembershipNode::new(operand, &parameter, id);
        debug!(marker = %id, entity = entity.name(), key = key.name(), index, %parameter, "search predicate rewritten");
        ctx.record_marker(SearchMarker {
            id,
            parameter,
            text,
            index: index.to_string(),
            entity: entity.name().to_string(),
            key_property: key.name().to_string(),
            key_kind: key.kind(),
        });
        Ok(Some(SqlExpr::Membership(node)))
    }
}

// ------------- Pass-through -------------
#[derive(Debug, Default)]
pub struct MembershipPassThrough;

impl UnknownNodeVisitor for MembershipPassThrough {
    fn visit_unknown(&self, node: &SqlExpr, visitor: &SqlTranslatingVisitor<'_, '_>) -> Result<Option<SqlExpr>> {
        match node {
            SqlExpr::Membership(m) => {
                let operand = visitor.visit(m.operand())?;
                Ok(Some(SqlExpr::Membership(m.with_operand(operand))))
            }
            _ => Ok(None),
        }
    }
}

// ------------- Plan interception -------------
#[derive(Debug, Default)]
pub struct SearchPlanInterceptor;

impl ClauseCompilerHook for SearchPlanInterceptor {
    fn after_where_clause(&self, clause: &WhereClause<'_>, mut chain: ExecutionChain) -> Result<ExecutionChain> {
        for marker in &clause.markers {
            if !chain.inner().expects_bound(&marker.parameter) {
                return Err(SearchlinkError::Invariant(format!(
                    "search marker {} binds '{}' but the relational step does not read it",
                    marker.id, marker.parameter
                )));
            }
            if chain.is_wrapped() {
                continue;
            }
            debug!(clause = clause.index, marker = %marker.id, "wrapping execution chain with search pre-step");
            chain = chain.wrap(PreStep::for_marker(marker));
        }
        Ok(chain)
    }
}
