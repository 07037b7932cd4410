//! The database facade: one SQLite connection, one search gateway, one
//! compiler, and a cache of compiled queries keyed by query text.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::compile::{CompiledQuery, CompilerExtensions, QueryCompiler};
use crate::config::Settings;
use crate::context::Parameters;
use crate::error::{Result, SearchlinkError};
use crate::expr::Query;
use crate::gateway::{HttpSearchGateway, SearchGateway};
use crate::model::{Model, NameHasher};
use crate::parse::parse_query;
use crate::plan::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

impl PersistenceMode {
    fn open(&self) -> Result<Connection> {
        let connection = match self {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        rusqlite::vtab::array::load_module(&connection)?;
        Ok(connection)
    }
}

/// Compiled queries cached by default, see [`Database::with_cache_capacity`].
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Compiled queries by text. Once full, the oldest entry is evicted first.
struct QueryCache {
    capacity: usize,
    entries: HashMap<String, Arc<CompiledQuery>, NameHasher>,
    order: VecDeque<String>,
}

impl QueryCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, entries: HashMap::default(), order: VecDeque::new() }
    }
    fn get(&self, text: &str) -> Option<&Arc<CompiledQuery>> {
        self.entries.get(text)
    }
    fn insert(&mut self, text: &str, compiled: Arc<CompiledQuery>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(text.to_string(), compiled).is_some() {
            return;
        }
        self.order.push_back(text.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
                debug!(query = %evicted, "compiled query evicted");
            }
        }
    }
    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct Database {
    connection: Mutex<Connection>,
    gateway: Arc<dyn SearchGateway>,
    compiler: QueryCompiler,
    compiled: Mutex<QueryCache>,
}

impl Database {
    /// Opens the store and wires a compiler with the search extension.
    pub fn new(mode: PersistenceMode, model: Model, gateway: Arc<dyn SearchGateway>) -> Result<Self> {
        Self::with_extensions(mode, model, gateway, CompilerExtensions::standard())
    }

    pub fn with_extensions(
        mode: PersistenceMode,
        model: Model,
        gateway: Arc<dyn SearchGateway>,
        extensions: CompilerExtensions,
    ) -> Result<Self> {
        let connection = mode.open()?;
        info!(?mode, entities = model.len(), "database opened");
        Ok(Self {
            connection: Mutex::new(connection),
            gateway,
            compiler: QueryCompiler::new(Arc::new(model), extensions),
            compiled: Mutex::new(QueryCache::new(DEFAULT_CACHE_CAPACITY)),
        })
    }

    /// Caps the compiled-query cache at `capacity` texts; 0 turns caching off.
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        Self { compiled: Mutex::new(QueryCache::new(capacity)), ..self }
    }

    /// Builds the connection and the HTTP search gateway from settings.
    pub fn from_settings(settings: &Settings, model: Model) -> Result<Self> {
        let search = settings
            .search
            .clone()
            .ok_or_else(|| SearchlinkError::Config("no [search] section configured".to_string()))?;
        let mode = match &settings.database.path {
            Some(path) => PersistenceMode::File(path.clone()),
            None => PersistenceMode::InMemory,
        };
        Self::new(mode, model, Arc::new(HttpSearchGateway::new(search)?))
    }

    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|e| SearchlinkError::Lock(e.to_string()))
    }
    pub fn gateway(&self) -> &dyn SearchGateway {
        self.gateway.as_ref()
    }
    pub fn model(&self) -> &Model {
        self.compiler.model()
    }

    /// Runs plain SQL against the store, e.g. to create and fill tables.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    /// Compiles a programmatically built query. Not cached.
    pub fn compile_query(&self, query: &Query) -> Result<CompiledQuery> {
        self.compiler.compile(query)
    }

    /// Parses and compiles `text`, reusing an earlier compilation of the same
    /// text when there is one.
    ///
    /// The cache is keyed by the whole text, literals included. Pass user
    /// input as a parameter (`search(c, @q)`) rather than splicing it into the
    /// text, or every distinct input takes a cache entry.
    pub fn compile(&self, text: &str) -> Result<Arc<CompiledQuery>> {
        if let Some(found) = self.cache()?.get(text) {
            debug!(query = text, "compiled query cache hit");
            return Ok(Arc::clone(found));
        }
        let compiled = Arc::new(self.compiler.compile(&parse_query(text)?)?);
        self.cache()?.insert(text, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Compiles (cached) and runs `text` to completion.
    pub fn query(&self, text: &str, parameters: Parameters) -> Result<Vec<Record>> {
        self.compile(text)?.collect(self, parameters)
    }

    pub fn cached_queries(&self) -> Result<usize> {
        Ok(self.cache()?.len())
    }

    fn cache(&self) -> Result<MutexGuard<'_, QueryCache>> {
        self.compiled.lock().map_err(|e| SearchlinkError::Lock(e.to_string()))
    }
}
