//! Searchlink – relational queries filtered by an external full-text search service.
//!
//! A query may carry the marker predicate `search(item, "free text")`. It has
//! no relational meaning of its own. The compiler rewrites it into a
//! membership test of the item's primary key against a value set that is not
//! known until the query runs:
//!
//! ```text
//! from c in Customers where search(c, "Lon*") and c.City = 'London'
//!   => SELECT .. FROM "Customers" AS "c"
//!      WHERE ("c"."CustomerID" IN rarray(:search_ids_1) AND ("c"."City" = 'London'))
//! ```
//!
//! and puts a pre-step in front of the relational step that asks the search
//! service for matching keys and binds them under `search_ids_1`. Every
//! enumeration of a compiled query calls the service again with a fresh
//! execution context, so results always reflect the service's current index.
//!
//! ## Modules
//! * [`model`] – Entity types, their tables, columns, keys and search indexes.
//! * [`expr`] / [`parse`] – The query AST and its textual form (`query.pest`).
//! * [`translate`], [`resolve`], [`sql`] – Expression to relational IR, member
//!   resolution, SQLite rendering.
//! * [`plan`] – Execution chains, pre-steps, row shaping and the clause hook.
//! * [`search`] – The search extension: rewrite, pass-through, interception.
//! * [`compile`] – The compiler and immutable [`compile::CompiledQuery`].
//! * [`gateway`] – Search service clients (in-memory and HTTP).
//! * [`database`] – The facade tying a connection, gateway and compiler together.
//! * [`config`] / [`logging`] – Layered settings and tracing setup.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use searchlink::database::{Database, PersistenceMode};
//! use searchlink::datatype::ValueKind;
//! use searchlink::gateway::MemorySearchGateway;
//! use searchlink::model::{EntityType, Model, Property};
//! use searchlink::context::Parameters;
//!
//! let model = Model::new()
//!     .with(
//!         EntityType::new("Customers")
//!             .property(Property::new("CustomerId", ValueKind::Text))
//!             .property(Property::new("City", ValueKind::Text))
//!             .key(&["CustomerId"])
//!             .search_index("customers-index"),
//!     )
//!     .unwrap();
//! let gateway = MemorySearchGateway::new()
//!     .with_document("customers-index", "AROUT", "Around the Horn London")
//!     .unwrap();
//! let db = Database::new(PersistenceMode::InMemory, model, Arc::new(gateway)).unwrap();
//! db.execute_batch(
//!     "CREATE TABLE Customers (CustomerId TEXT PRIMARY KEY, City TEXT);
//!      INSERT INTO Customers VALUES ('ALFKI', 'Berlin'), ('AROUT', 'London');",
//! )
//! .unwrap();
//! let rows = db
//!     .query(r#"from c in Customers where search(c, "Lon*") select c.CustomerId"#, Parameters::new())
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod compile;
pub mod config;
pub mod context;
pub mod database;
pub mod datatype;
pub mod error;
pub mod expr;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod parse;
pub mod plan;
pub mod resolve;
pub mod search;
pub mod sql;
pub mod translate;

pub use error::{Result, SearchlinkError};
