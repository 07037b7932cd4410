//! Entity metadata: which tables back which entities, how their properties map
//! to columns, and which property is the primary key.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use seahash::SeaHasher;

use crate::datatype::ValueKind;
use crate::error::{Result, SearchlinkError};

pub type NameHasher = BuildHasherDefault<SeaHasher>;

lazy_static! {
    // names end up quoted in generated SQL, but keep them boring anyway
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

fn check_identifier(what: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(SearchlinkError::Config(format!("invalid {what} name '{name}'")))
    }
}

// ------------- Property -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    column: String,
    kind: ValueKind,
}

impl Property {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self { name: name.to_string(), column: name.to_string(), kind }
    }
    /// Maps the property onto a differently named column.
    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn column(&self) -> &str {
        &self.column
    }
    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

// ------------- EntityType -------------
#[derive(Debug, Clone)]
pub struct EntityType {
    name: String,
    table: String,
    properties: Vec<Property>,
    primary_key: Vec<String>,
    search_index: Option<String>,
}

impl EntityType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: name.to_string(),
            properties: Vec::new(),
            primary_key: Vec::new(),
            search_index: None,
        }
    }
    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }
    /// Declares the primary key. More than one name makes a composite key.
    pub fn key(mut self, properties: &[&str]) -> Self {
        self.primary_key = properties.iter().map(|p| p.to_string()).collect();
        self
    }
    /// The search index that holds documents for this entity.
    pub fn search_index(mut self, index: &str) -> Self {
        self.search_index = Some(index.to_string());
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn table_name(&self) -> &str {
        &self.table
    }
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }
    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }
    pub fn index(&self) -> Option<&str> {
        self.search_index.as_deref()
    }
    fn validate(&self) -> Result<()> {
        check_identifier("entity", &self.name)?;
        check_identifier("table", &self.table)?;
        for property in &self.properties {
            check_identifier("property", &property.name)?;
            check_identifier("column", &property.column)?;
            if self.properties.iter().filter(|p| p.name == property.name).count() > 1 {
                return Err(SearchlinkError::Config(format!(
                    "property '{}' declared twice on entity '{}'",
                    property.name, self.name
                )));
            }
        }
        for key in &self.primary_key {
            if self.find_property(key).is_none() {
                return Err(SearchlinkError::Config(format!(
                    "key property '{}' is not declared on entity '{}'",
                    key, self.name
                )));
            }
        }
        Ok(())
    }
}

// ------------- Model -------------
/// Keeps the entity types known to the compiler, one per name.
#[derive(Debug, Default)]
pub struct Model {
    kept: HashMap<String, Arc<EntityType>, NameHasher>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds an entity type. The boolean is true when an entity with the same
    /// name was already kept, in which case the earlier one is returned.
    pub fn keep(&mut self, entity: EntityType) -> Result<(Arc<EntityType>, bool)> {
        entity.validate()?;
        match self.kept.entry(entity.name.clone()) {
            Entry::Occupied(e) => Ok((Arc::clone(e.get()), true)),
            Entry::Vacant(e) => Ok((Arc::clone(e.insert(Arc::new(entity))), false)),
        }
    }
    pub fn with(mut self, entity: EntityType) -> Result<Self> {
        self.keep(entity)?;
        Ok(self)
    }
    pub fn find_entity(&self, name: &str) -> Option<Arc<EntityType>> {
        self.kept.get(name).cloned()
    }
    pub fn entity(&self, name: &str) -> Result<Arc<EntityType>> {
        self.find_entity(name)
            .ok_or_else(|| SearchlinkError::Compile(format!("unknown entity '{name}'")))
    }
    /// The single primary-key property of an entity. Entities without a key
    /// or with a composite key cannot be matched against search results.
    pub fn primary_key_property_of<'e>(&self, entity: &'e EntityType) -> Result<&'e Property> {
        match entity.primary_key() {
            [] => Err(SearchlinkError::Compile(format!(
                "entity '{}' has no primary key",
                entity.name()
            ))),
            [single] => entity.find_property(single).ok_or_else(|| {
                SearchlinkError::Invariant(format!(
                    "key property '{}' missing from entity '{}'",
                    single,
                    entity.name()
                ))
            }),
            composite => Err(SearchlinkError::Compile(format!(
                "entity '{}' has a composite primary key ({}); only single-column keys are supported",
                entity.name(),
                composite.join(", ")
            ))),
        }
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}
