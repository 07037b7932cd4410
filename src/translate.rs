//! Translation of filter expressions into relational IR.
//!
//! Every expression node is first offered to the registered
//! [`FragmentTranslator`]s in order; the first one that returns a fragment
//! wins. Nodes nobody claims fall through to the default translation, which
//! maps the expression tree one-to-one onto [`SqlExpr`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::datatype::ValueKind;
use crate::error::{Result, SearchlinkError};
use crate::expr::{Expr, Query};
use crate::model::{EntityType, Model, NameHasher};
use crate::sql::{MarkerId, SqlExpr};

/// The free-text argument of a search marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchText {
    Literal(String),
    /// Read from the caller's parameters at enumeration time.
    Parameter(String),
}

/// Everything plan assembly needs to know about one rewritten search marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMarker {
    pub id: MarkerId,
    pub parameter: String,
    pub text: SearchText,
    pub index: String,
    pub entity: String,
    pub key_property: String,
    pub key_kind: ValueKind,
}

/// An item variable in scope: which entity it ranges over, under which alias.
#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub alias: String,
    pub entity: Arc<EntityType>,
}

/// Per-compilation state shared by the fragment translators.
#[derive(Debug)]
pub struct TranslationContext<'m> {
    model: &'m Model,
    scope: HashMap<String, ScopeEntry, NameHasher>,
    markers: Vec<SearchMarker>,
    next_marker: u32,
}

impl<'m> TranslationContext<'m> {
    /// Brings every source of `query` into scope.
    pub fn new(model: &'m Model, query: &Query) -> Result<Self> {
        let mut scope: HashMap<String, ScopeEntry, NameHasher> = HashMap::default();
        for source in query.sources() {
            let entity = model.entity(&source.entity)?;
            let entry = ScopeEntry { alias: source.item.clone(), entity };
            if scope.insert(source.item.clone(), entry).is_some() {
                return Err(SearchlinkError::Compile(format!(
                    "item variable '{}' is declared twice",
                    source.item
                )));
            }
        }
        Ok(Self { model, scope, markers: Vec::new(), next_marker: 0 })
    }
    pub fn model(&self) -> &Model {
        self.model
    }
    pub fn scope(&self, item: &str) -> Result<&ScopeEntry> {
        self.scope
            .get(item)
            .ok_or_else(|| SearchlinkError::Compile(format!("unknown item variable '{item}'")))
    }
    /// Hands out the next marker identity for this compilation.
    pub fn next_marker_id(&mut self) -> MarkerId {
        self.next_marker += 1;
        MarkerId(self.next_marker)
    }
    pub fn record_marker(&mut self, marker: SearchMarker) {
        self.markers.push(marker);
    }
    pub fn markers(&self) -> &[SearchMarker] {
        &self.markers
    }
    pub fn marker(&self, id: MarkerId) -> Option<&SearchMarker> {
        self.markers.iter().find(|m| m.id == id)
    }
}

/// Translates one kind of expression fragment. Returning `Ok(None)` means
/// "not mine", and the next translator in the chain gets a look.
pub trait FragmentTranslator: Send + Sync {
    fn translate(
        &self,
        expr: &Expr,
        ctx: &mut TranslationContext<'_>,
        translator: &ExprTranslator,
    ) -> Result<Option<SqlExpr>>;
}

/// Composite translator: registered fragment translators first, then the
/// default one-to-one mapping.
#[derive(Default)]
pub struct ExprTranslator {
    fragments: Vec<Arc<dyn FragmentTranslator>>,
}

impl ExprTranslator {
    pub fn new(fragments: Vec<Arc<dyn FragmentTranslator>>) -> Self {
        Self { fragments }
    }

    pub fn translate(&self, expr: &Expr, ctx: &mut TranslationContext<'_>) -> Result<SqlExpr> {
        for fragment in &self.fragments {
            if let Some(translated) = fragment.translate(expr, ctx, self)? {
                return Ok(translated);
            }
        }
        self.translate_default(expr, ctx)
    }

    fn translate_default(&self, expr: &Expr, ctx: &mut TranslationContext<'_>) -> Result<SqlExpr> {
        Ok(match expr {
            Expr::Item(item) => {
                return Err(SearchlinkError::Compile(format!(
                    "item variable '{item}' cannot be used as a value; select one of its properties"
                )));
            }
            Expr::Member { item, property } => {
                // fail early on unknown items, column resolution happens later
                ctx.scope(item)?;
                SqlExpr::Member { item: item.clone(), property: property.clone() }
            }
            Expr::Literal(v) => SqlExpr::Literal(v.clone()),
            Expr::Parameter(p) => SqlExpr::Parameter(p.clone()),
            Expr::Binary { left, op, right } => SqlExpr::Binary {
                left: Box::new(self.translate(left, ctx)?),
                op: *op,
                right: Box::new(self.translate(right, ctx)?),
            },
            Expr::And(l, r) => SqlExpr::And(Box::new(self.translate(l, ctx)?), Box::new(self.translate(r, ctx)?)),
            Expr::Or(l, r) => SqlExpr::Or(Box::new(self.translate(l, ctx)?), Box::new(self.translate(r, ctx)?)),
            Expr::Not(e) => SqlExpr::Not(Box::new(self.translate(e, ctx)?)),
            Expr::Call { function, args } => SqlExpr::Function {
                name: function.clone(),
                args: args.iter().map(|a| self.translate(a, ctx)).collect::<Result<Vec<_>>>()?,
            },
        })
    }
}
