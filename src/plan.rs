//! The physical side of a compiled query: the execution chain that produces
//! rows, and the hooks that may reshape it while the plan is assembled.
//!
//! A chain is either `Plain` (run the relational step, shape its rows) or
//! `Wrapped` (run a pre-step against the execution context first). Wrapping is
//! idempotent, so plan assembly may visit a clause any number of times.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rusqlite::Connection;
use rusqlite::types::ToSql;
use tracing::{debug, info, warn};

use crate::context::QueryContext;
use crate::datatype::{Value, ValueKind};
use crate::error::{Result, SearchlinkError};
use crate::expr::Expr;
use crate::gateway::SearchGateway;
use crate::sql::{MarkerId, ParameterSlot, ParameterSource, SqlExpr};
use crate::translate::{SearchMarker, SearchText};

// ------------- Records -------------
/// One shaped result row: column names with their values, in projection order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
    /// The named field, or an execution error naming what is missing.
    pub fn field(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| SearchlinkError::Execution(format!("record has no field '{name}'")))
    }
    pub fn text(&self, name: &str) -> Result<String> {
        match self.field(name)? {
            Value::Text(s) => Ok(s.clone()),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
    pub fn integer(&self, name: &str) -> Result<i64> {
        self.field(name)?
            .as_i64()
            .ok_or_else(|| SearchlinkError::Execution(format!("field '{name}' is not an Integer")))
    }
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builds an application type out of a shaped record.
pub trait FromRecord: Sized {
    fn from_record(record: &Record) -> Result<Self>;
}

impl FromRecord for Record {
    fn from_record(record: &Record) -> Result<Self> {
        Ok(record.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapedColumn {
    pub name: String,
    pub kind: Option<ValueKind>,
}

/// Turns store rows into [`Record`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct Shaper {
    columns: Vec<ShapedColumn>,
}

impl Shaper {
    pub fn new(columns: Vec<ShapedColumn>) -> Self {
        Self { columns }
    }
    pub fn columns(&self) -> &[ShapedColumn] {
        &self.columns
    }
    fn shape(&self, row: &rusqlite::Row<'_>) -> Result<Record> {
        let mut fields = Vec::with_capacity(self.columns.len());
        for (i, column) in self.columns.iter().enumerate() {
            let value: Value = row.get(i)?;
            // SQLite column affinity may hand integers back for real columns
            let value = match (column.kind, value) {
                (Some(ValueKind::Real), Value::Integer(i)) => Value::Real(i as f64),
                (_, v) => v,
            };
            fields.push((column.name.clone(), value));
        }
        Ok(Record::new(fields))
    }
}

// ------------- Relational step -------------
/// Runs the generated SQL and shapes every row.
#[derive(Debug, Clone, PartialEq)]
pub struct Materializer {
    sql: String,
    parameters: Vec<ParameterSlot>,
    shaper: Shaper,
}

impl Materializer {
    pub fn new(sql: String, parameters: Vec<ParameterSlot>, shaper: Shaper) -> Self {
        Self { sql, parameters, shaper }
    }
    pub fn sql(&self) -> &str {
        &self.sql
    }
    pub fn parameters(&self) -> &[ParameterSlot] {
        &self.parameters
    }
    pub fn shaper(&self) -> &Shaper {
        &self.shaper
    }
    /// Whether the SQL expects a bound value set under `name`.
    pub fn expects_bound(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name && p.source == ParameterSource::Bound)
    }

    pub fn execute(&self, connection: &Connection, ctx: &QueryContext) -> Result<Vec<Record>> {
        let mut owned: Vec<(String, Box<dyn ToSql>)> = Vec::with_capacity(self.parameters.len());
        for slot in &self.parameters {
            let value: Box<dyn ToSql> = match slot.source {
                ParameterSource::Caller => Box::new(ctx.parameter(&slot.name)?.clone()),
                ParameterSource::Bound => {
                    let values: Vec<rusqlite::types::Value> =
                        ctx.resolve(&slot.name)?.iter().cloned().map(Value::into_sql).collect();
                    Box::new(Rc::new(values))
                }
            };
            owned.push((slot.placeholder(), value));
        }
        let named: Vec<(&str, &dyn ToSql)> = owned.iter().map(|(n, v)| (n.as_str(), v.as_ref())).collect();
        let mut statement = connection.prepare_cached(&self.sql)?;
        let mut rows = statement.query(named.as_slice())?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(self.shaper.shape(row)?);
        }
        debug!(rows = records.len(), "relational step complete");
        Ok(records)
    }
}

// ------------- Pre-step -------------
/// Calls the search service and binds the returned keys before the relational
/// step runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PreStep {
    marker: MarkerId,
    parameter: String,
    index: String,
    text: SearchText,
    key_kind: ValueKind,
}

impl PreStep {
    pub fn for_marker(marker: &SearchMarker) -> Self {
        Self {
            marker: marker.id,
            parameter: marker.parameter.clone(),
            index: marker.index.clone(),
            text: marker.text.clone(),
            key_kind: marker.key_kind,
        }
    }
    pub fn marker(&self) -> MarkerId {
        self.marker
    }
    pub fn parameter(&self) -> &str {
        &self.parameter
    }
    pub fn index(&self) -> &str {
        &self.index
    }

    fn query_text(&self, ctx: &QueryContext) -> Result<String> {
        match &self.text {
            SearchText::Literal(s) => Ok(s.clone()),
            SearchText::Parameter(name) => match ctx.parameter(name)? {
                Value::Text(s) => Ok(s.clone()),
                other => Err(SearchlinkError::Execution(format!(
                    "search text parameter @{name} must be Text, got {other}"
                ))),
            },
        }
    }

    /// Runs the search and binds its keys. Gateway failures are returned
    /// as-is and nothing is bound.
    pub fn run(&self, ctx: &mut QueryContext, gateway: &dyn SearchGateway) -> Result<()> {
        let text = self.query_text(ctx)?;
        let started = std::time::Instant::now();
        let keys = gateway.search(&self.index, &text).inspect_err(|e| {
            warn!(index = %self.index, query = %text, error = %e, "search gateway failed");
        })?;
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(index = %self.index, query = %text, keys = keys.len(), ms, "search gateway returned keys");
        let values = keys
            .iter()
            .map(|k| Value::parse_key(k, self.key_kind))
            .collect::<Result<Vec<_>>>()?;
        ctx.bind(&self.parameter, values);
        Ok(())
    }
}

// ------------- Chain -------------
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionChain {
    Plain { inner: Materializer },
    Wrapped { pre_step: PreStep, inner: Materializer },
}

impl ExecutionChain {
    pub fn plain(inner: Materializer) -> Self {
        ExecutionChain::Plain { inner }
    }
    /// Puts `pre_step` in front of the relational step. Wrapping a chain that
    /// is already wrapped returns it unchanged.
    pub fn wrap(self, pre_step: PreStep) -> Self {
        match self {
            ExecutionChain::Plain { inner } => ExecutionChain::Wrapped { pre_step, inner },
            wrapped @ ExecutionChain::Wrapped { .. } => wrapped,
        }
    }
    pub fn is_wrapped(&self) -> bool {
        matches!(self, ExecutionChain::Wrapped { .. })
    }
    pub fn pre_step(&self) -> Option<&PreStep> {
        match self {
            ExecutionChain::Plain { .. } => None,
            ExecutionChain::Wrapped { pre_step, .. } => Some(pre_step),
        }
    }
    pub fn inner(&self) -> &Materializer {
        match self {
            ExecutionChain::Plain { inner } | ExecutionChain::Wrapped { inner, .. } => inner,
        }
    }

    /// Runs the chain once against a fresh context. The pre-step talks to the
    /// search service first; `connect` is only called afterwards, so no
    /// connection is held while the service call is in flight.
    pub fn execute<C, F>(&self, gateway: &dyn SearchGateway, ctx: &mut QueryContext, connect: F) -> Result<Vec<Record>>
    where
        C: Deref<Target = Connection>,
        F: FnOnce() -> Result<C>,
    {
        if let Some(pre_step) = self.pre_step() {
            pre_step.run(ctx, gateway)?;
        }
        let connection = connect()?;
        self.inner().execute(&*connection, ctx)
    }
}

impl fmt::Display for ExecutionChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(pre) = self.pre_step() {
            write!(f, "search[index={}, bind=:{}, marker={}] -> ", pre.index, pre.parameter, pre.marker)?;
        }
        let names: Vec<&str> = self.inner().shaper.columns.iter().map(|c| c.name.as_str()).collect();
        write!(f, "sql[{}] -> shape[{}]", self.inner().sql, names.join(", "))
    }
}

// ------------- Hooks -------------
/// One `where` clause as plan assembly sees it: the predicate as written,
/// its relational translation, and the markers the translation recorded.
#[derive(Debug, Clone)]
pub struct WhereClause<'a> {
    pub index: usize,
    pub predicate: &'a Expr,
    pub translated: &'a SqlExpr,
    pub markers: Vec<&'a SearchMarker>,
}

/// Invoked once per `where` clause after the default compilation of that
/// clause, with the chain assembled so far. May return a reshaped chain.
pub trait ClauseCompilerHook: Send + Sync {
    fn after_where_clause(&self, clause: &WhereClause<'_>, chain: ExecutionChain) -> Result<ExecutionChain>;
}
