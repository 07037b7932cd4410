//! Query compilation: from a [`Query`] to an immutable [`CompiledQuery`]
//! holding the rendered SQL and the execution chain that runs it.
//!
//! Compilation runs in four passes. Filter, join, projection and ordering
//! expressions are translated into relational IR (registered fragment
//! translators first). The SQL-translating visitor then resolves members into
//! columns. The statement is rendered. Finally the chain is assembled: it
//! starts plain, and every clause hook gets to reshape it once per `where`
//! clause.

use std::sync::Arc;

use tracing::debug;

use crate::context::{Parameters, QueryContext};
use crate::database::Database;
use crate::error::{Result, SearchlinkError};
use crate::expr::{BinaryOp, Expr, Query};
use crate::model::Model;
use crate::plan::{ClauseCompilerHook, ExecutionChain, FromRecord, Materializer, Record, ShapedColumn, Shaper, WhereClause};
use crate::resolve::{SqlTranslatingVisitor, UnknownNodeVisitor};
use crate::sql::{JoinRef, ParameterSlot, ParameterSource, ProjectionItem, SelectStatement, SqlExpr, SqlWriter, TableRef};
use crate::translate::{ExprTranslator, FragmentTranslator, SearchMarker, TranslationContext};

/// The extension points of the compiler. Each list is consulted in order.
#[derive(Default, Clone)]
pub struct CompilerExtensions {
    pub translators: Vec<Arc<dyn FragmentTranslator>>,
    pub unknown_node_visitors: Vec<Arc<dyn UnknownNodeVisitor>>,
    pub clause_hooks: Vec<Arc<dyn ClauseCompilerHook>>,
}

impl CompilerExtensions {
    pub fn new() -> Self {
        Self::default()
    }
    /// The extensions every database starts with: the search extension.
    pub fn standard() -> Self {
        let mut extensions = Self::new();
        crate::search::register(&mut extensions);
        extensions
    }
}

pub struct QueryCompiler {
    model: Arc<Model>,
    extensions: CompilerExtensions,
}

struct TranslatedClause<'q> {
    predicate: &'q Expr,
    translated: SqlExpr,
    markers: std::ops::Range<usize>,
}

impl QueryCompiler {
    pub fn new(model: Arc<Model>, extensions: CompilerExtensions) -> Self {
        Self { model, extensions }
    }
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn compile(&self, query: &Query) -> Result<CompiledQuery> {
        let mut ctx = TranslationContext::new(&self.model, query)?;
        let translator = ExprTranslator::new(self.extensions.translators.clone());

        let mut clauses = Vec::with_capacity(query.filters.len());
        for predicate in &query.filters {
            let before = ctx.markers().len();
            let translated = translator.translate(predicate, &mut ctx)?;
            clauses.push(TranslatedClause { predicate, translated, markers: before..ctx.markers().len() });
        }
        let in_filters = ctx.markers().len();

        let mut joins = Vec::with_capacity(query.joins.len());
        for join in &query.joins {
            let on = SqlExpr::Binary {
                left: Box::new(translator.translate(&join.left, &mut ctx)?),
                op: BinaryOp::Eq,
                right: Box::new(translator.translate(&join.right, &mut ctx)?),
            };
            joins.push((join, on));
        }
        let projection = self.translate_projection(query, &translator, &mut ctx)?;
        let mut ordering = Vec::with_capacity(query.ordering.len());
        for o in &query.ordering {
            ordering.push((translator.translate(&o.expr, &mut ctx)?, o.descending));
        }
        if ctx.markers().len() != in_filters {
            return Err(SearchlinkError::Compile(
                "search predicates are only allowed in where clauses".to_string(),
            ));
        }

        let visitor = SqlTranslatingVisitor::new(&ctx, &self.extensions.unknown_node_visitors);
        for clause in &mut clauses {
            clause.translated = visitor.visit(&clause.translated)?;
        }
        let mut join_refs = Vec::with_capacity(joins.len());
        for (join, on) in joins {
            let entity = self.model.entity(&join.source.entity)?;
            join_refs.push(JoinRef {
                table: TableRef { table: entity.table_name().to_string(), alias: join.source.item.clone() },
                on: visitor.visit(&on)?,
            });
        }
        let mut items = Vec::with_capacity(projection.len());
        let mut columns = Vec::with_capacity(projection.len());
        for (expr, column) in projection {
            items.push(ProjectionItem { expr: visitor.visit(&expr)?, name: column.name.clone() });
            columns.push(column);
        }
        let order_by = ordering
            .into_iter()
            .map(|(e, descending)| Ok((visitor.visit(&e)?, descending)))
            .collect::<Result<Vec<_>>>()?;

        let root = self.model.entity(&query.source.entity)?;
        let statement = SelectStatement {
            projection: items,
            from: TableRef { table: root.table_name().to_string(), alias: query.source.item.clone() },
            joins: join_refs,
            predicate: clauses.iter().map(|c| c.translated.clone()).reduce(SqlExpr::and),
            order_by,
            limit: query.limit,
        };
        let rendered = SqlWriter::new().render(&statement)?;
        let predicate = statement.predicate;
        debug!(sql = %rendered.text, parameters = rendered.parameters.len(), "rendered statement");

        let mut chain = ExecutionChain::plain(Materializer::new(
            rendered.text,
            rendered.parameters,
            Shaper::new(columns),
        ));
        for (index, clause) in clauses.iter().enumerate() {
            let view = WhereClause {
                index,
                predicate: clause.predicate,
                translated: &clause.translated,
                markers: ctx.markers()[clause.markers.clone()].iter().collect(),
            };
            for hook in &self.extensions.clause_hooks {
                chain = hook.after_where_clause(&view, chain)?;
            }
        }
        check_bindings(predicate.as_ref(), &chain)?;

        let compiled = CompiledQuery { chain, markers: ctx.markers().to_vec() };
        debug!(plan = %compiled.explain(), "query compiled");
        Ok(compiled)
    }

    fn translate_projection(
        &self,
        query: &Query,
        translator: &ExprTranslator,
        ctx: &mut TranslationContext<'_>,
    ) -> Result<Vec<(SqlExpr, ShapedColumn)>> {
        if query.projection.is_empty() {
            let root = ctx.scope(&query.source.item)?;
            return Ok(root
                .entity
                .properties()
                .iter()
                .map(|p| {
                    let expr = SqlExpr::Member { item: root.alias.clone(), property: p.name().to_string() };
                    (expr, ShapedColumn { name: p.name().to_string(), kind: Some(p.kind()) })
                })
                .collect());
        }
        let mut out: Vec<(SqlExpr, ShapedColumn)> = Vec::with_capacity(query.projection.len());
        for (i, expr) in query.projection.iter().enumerate() {
            let (name, kind) = match expr {
                Expr::Member { item, property } => {
                    let kind = ctx.scope(item)?.entity.find_property(property).map(|p| p.kind());
                    let taken = out.iter().any(|(_, c)| c.name == *property);
                    (if taken { format!("{item}_{property}") } else { property.clone() }, kind)
                }
                _ => (format!("column{}", i + 1), None),
            };
            out.push((translator.translate(expr, ctx)?, ShapedColumn { name, kind }));
        }
        Ok(out)
    }
}

/// A statement carries at most one membership test, and every bound value set
/// the SQL reads must be bound by a pre-step.
fn check_bindings(predicate: Option<&SqlExpr>, chain: &ExecutionChain) -> Result<()> {
    let memberships = predicate.map(SqlExpr::memberships).unwrap_or_default();
    if memberships.len() > 1 {
        return Err(SearchlinkError::Invariant(format!(
            "{} membership tests in one statement, at most one is supported",
            memberships.len()
        )));
    }
    let bound_by_pre_step = |name: &str| chain.pre_step().is_some_and(|p| p.parameter() == name);
    if let Some(m) = memberships.first() {
        if !bound_by_pre_step(m.parameter()) {
            return Err(SearchlinkError::Invariant(format!(
                "membership test {} reads '{}' but no pre-step binds it",
                m.marker(),
                m.parameter()
            )));
        }
    }
    for slot in chain.inner().parameters() {
        if slot.source == ParameterSource::Bound && !bound_by_pre_step(&slot.name) {
            return Err(SearchlinkError::Invariant(format!(
                "no pre-step binds '{}' ahead of the relational step",
                slot.name
            )));
        }
    }
    Ok(())
}

// ------------- Compiled queries -------------
/// A compiled query. Immutable, so it can be cached and enumerated any number
/// of times, from any thread. Every enumeration gets its own execution context.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    chain: ExecutionChain,
    markers: Vec<SearchMarker>,
}

impl CompiledQuery {
    pub fn sql(&self) -> &str {
        self.chain.inner().sql()
    }
    pub fn parameters(&self) -> &[ParameterSlot] {
        self.chain.inner().parameters()
    }
    pub fn chain(&self) -> &ExecutionChain {
        &self.chain
    }
    pub fn markers(&self) -> &[SearchMarker] {
        &self.markers
    }
    pub fn columns(&self) -> &[ShapedColumn] {
        self.chain.inner().shaper().columns()
    }
    /// One line describing the steps enumeration will take.
    pub fn explain(&self) -> String {
        self.chain.to_string()
    }

    /// Lazily runs the query. Nothing happens until the first item is pulled;
    /// the chain then runs once and its rows are handed out in order.
    pub fn enumerate<'a>(&'a self, database: &'a Database, parameters: Parameters) -> Enumeration<'a> {
        Enumeration { query: self, database, parameters: Some(parameters), rows: None }
    }

    pub fn enumerate_as<'a, T: FromRecord + 'a>(
        &'a self,
        database: &'a Database,
        parameters: Parameters,
    ) -> impl Iterator<Item = Result<T>> + 'a {
        self.enumerate(database, parameters)
            .map(|record| record.and_then(|r| T::from_record(&r)))
    }

    /// Runs the query to completion.
    pub fn collect(&self, database: &Database, parameters: Parameters) -> Result<Vec<Record>> {
        self.enumerate(database, parameters).collect()
    }
}

/// A single pass over a compiled query's results. A failure is yielded once,
/// after which the enumeration is exhausted.
pub struct Enumeration<'a> {
    query: &'a CompiledQuery,
    database: &'a Database,
    parameters: Option<Parameters>,
    rows: Option<std::vec::IntoIter<Record>>,
}

impl Enumeration<'_> {
    fn run(&self, parameters: Parameters) -> Result<Vec<Record>> {
        let mut ctx = QueryContext::new(parameters);
        self.query.chain.execute(self.database.gateway(), &mut ctx, || self.database.connection())
    }
}

impl Iterator for Enumeration<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(rows) = &mut self.rows {
            return rows.next().map(Ok);
        }
        let parameters = self.parameters.take()?;
        match self.run(parameters) {
            Ok(records) => {
                let mut rows = records.into_iter();
                let first = rows.next();
                self.rows = Some(rows);
                first.map(Ok)
            }
            Err(e) => Some(Err(e)),
        }
    }
}
