use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use searchlink::compile::CompilerExtensions;
use searchlink::context::{Parameters, QueryContext};
use searchlink::database::{Database, PersistenceMode};
use searchlink::datatype::{Value, ValueKind};
use searchlink::expr::{Query, lit, member, search};
use searchlink::gateway::{MemorySearchGateway, SearchGateway};
use searchlink::model::{EntityType, Model, Property};
use searchlink::plan::{ClauseCompilerHook, ExecutionChain, FromRecord, Materializer, Record, Shaper, WhereClause};
use searchlink::search::{MembershipPassThrough, SearchPlanInterceptor, SearchPredicateTranslator};
use searchlink::sql::{MarkerId, ParameterSlot, ParameterSource, SqlExpr};
use searchlink::translate::{SearchMarker, SearchText};
use searchlink::{Result, SearchlinkError};

const SCHEMA: &str = "
    CREATE TABLE Customers (CustomerID TEXT PRIMARY KEY, CompanyName TEXT NOT NULL, City TEXT);
    CREATE TABLE Orders (OrderId INTEGER PRIMARY KEY, CustomerId TEXT NOT NULL, Freight REAL);
    INSERT INTO Customers VALUES
        ('ALFKI', 'Alfreds Futterkiste', 'Berlin'),
        ('AROUT', 'Around the Horn', 'London'),
        ('BSBEV', 'B''s Beverages', 'London'),
        ('CONSH', 'Consolidated Holdings', 'London');
    INSERT INTO Orders VALUES
        (10248, 'ALFKI', 32.38),
        (10249, 'AROUT', 11.61),
        (10250, 'BSBEV', 65.83),
        (10251, 'BSBEV', 8.5),
        (10252, 'CONSH', 51.3);
";

fn model() -> Model {
    Model::new()
        .with(
            EntityType::new("Customers")
                .property(Property::new("CustomerId", ValueKind::Text).with_column("CustomerID"))
                .property(Property::new("CompanyName", ValueKind::Text))
                .property(Property::new("City", ValueKind::Text))
                .key(&["CustomerId"])
                .search_index("customers-index"),
        )
        .unwrap()
        .with(
            EntityType::new("Orders")
                .property(Property::new("OrderId", ValueKind::Integer))
                .property(Property::new("CustomerId", ValueKind::Text))
                .property(Property::new("Freight", ValueKind::Real))
                .key(&["OrderId"])
                .search_index("orders-index"),
        )
        .unwrap()
        .with(
            EntityType::new("Suppliers")
                .property(Property::new("Name", ValueKind::Text))
                .search_index("suppliers-index"),
        )
        .unwrap()
        .with(
            EntityType::new("OrderLines")
                .property(Property::new("OrderId", ValueKind::Integer))
                .property(Property::new("ProductId", ValueKind::Integer))
                .key(&["OrderId", "ProductId"])
                .search_index("lines-index"),
        )
        .unwrap()
}

fn northwind(gateway: Arc<dyn SearchGateway>) -> Database {
    let db = Database::new(PersistenceMode::InMemory, model(), gateway).expect("database opens");
    db.execute_batch(SCHEMA).expect("schema loads");
    db
}

/// Returns a fixed key list and remembers every call.
#[derive(Default)]
struct RecordingGateway {
    keys: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingGateway {
    fn returning(keys: &[&str]) -> Arc<Self> {
        let g = Self::default();
        *g.keys.lock().unwrap() = keys.iter().map(|k| k.to_string()).collect();
        Arc::new(g)
    }
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SearchGateway for RecordingGateway {
    fn search(&self, index: &str, query: &str) -> Result<Vec<String>> {
        self.calls.lock().unwrap().push((index.to_string(), query.to_string()));
        Ok(self.keys.lock().unwrap().clone())
    }
}

fn ids(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.text("CustomerId").unwrap()).collect()
}

#[test]
fn search_filters_rows_to_the_returned_keys() {
    let gateway = RecordingGateway::returning(&["ALFKI", "BSBEV"]);
    let db = northwind(gateway.clone());
    let compiled = db
        .compile(r#"from c in Customers where search(c, "Lon*") order by c.CustomerId"#)
        .expect("compiles");
    assert!(compiled.sql().contains("\"c\".\"CustomerID\" IN rarray(:search_ids_1)"), "{}", compiled.sql());
    let rows = compiled.collect(&db, Parameters::new()).expect("query ok");
    assert_eq!(ids(&rows), vec!["ALFKI", "BSBEV"]);
    assert_eq!(gateway.calls(), vec![("customers-index".to_string(), "Lon*".to_string())]);
    // default projection is every property of the root entity
    assert_eq!(rows[0].fields().len(), 3);
    assert_eq!(rows[0].get("City"), Some(&Value::from("Berlin")));
}

#[test]
fn closures_serve_as_gateways() {
    let gateway: Arc<dyn SearchGateway> = Arc::new(|index: &str, text: &str| -> Result<Vec<String>> {
        assert_eq!(index, "customers-index");
        Ok(if text == "horn" { vec!["AROUT".to_string()] } else { Vec::new() })
    });
    let db = northwind(gateway);
    let rows = db.query(r#"from c in Customers where search(c, "horn")"#, Parameters::new()).expect("query ok");
    assert_eq!(ids(&rows), vec!["AROUT"]);
}

#[test]
fn empty_search_result_yields_no_rows() {
    let db = northwind(RecordingGateway::returning(&[]));
    let rows = db
        .query(r#"from c in Customers where search(c, "nothing")"#, Parameters::new())
        .expect("query ok");
    assert!(rows.is_empty());
}

#[test]
fn gateway_failures_surface_before_any_sql_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let gateway: Arc<dyn SearchGateway> = Arc::new(move |_: &str, _: &str| -> Result<Vec<String>> {
        counted.fetch_add(1, Ordering::SeqCst);
        Err(SearchlinkError::Search("service unavailable".to_string()))
    });
    // no tables: if the relational step ran, the error would come from SQLite
    let db = Database::new(PersistenceMode::InMemory, model(), gateway).expect("database opens");
    let compiled = db.compile(r#"from c in Customers where search(c, "Lon*")"#).expect("compiles");
    let mut rows = compiled.enumerate(&db, Parameters::new());
    match rows.next() {
        Some(Err(SearchlinkError::Search(message))) => assert!(message.contains("unavailable")),
        other => panic!("expected search error, got {other:?}"),
    }
    assert!(rows.next().is_none(), "an error ends the enumeration");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn each_enumeration_asks_the_service_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let gateway: Arc<dyn SearchGateway> = Arc::new(move |_: &str, _: &str| -> Result<Vec<String>> {
        // the index changes between runs
        Ok(match counted.fetch_add(1, Ordering::SeqCst) {
            0 => vec!["AROUT".to_string()],
            _ => vec!["AROUT".to_string(), "CONSH".to_string()],
        })
    });
    let db = northwind(gateway);
    let compiled = db
        .compile(r#"from c in Customers where search(c, "Lon*") order by c.CustomerId"#)
        .expect("compiles");
    let first = compiled.collect(&db, Parameters::new()).expect("first run");
    let second = compiled.collect(&db, Parameters::new()).expect("second run");
    assert_eq!(ids(&first), vec!["AROUT"]);
    assert_eq!(ids(&second), vec!["AROUT", "CONSH"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn enumeration_is_lazy() {
    let gateway = RecordingGateway::returning(&["ALFKI"]);
    let db = northwind(gateway.clone());
    let compiled = db.compile(r#"from c in Customers where search(c, "a*")"#).expect("compiles");
    let mut rows = compiled.enumerate(&db, Parameters::new());
    assert!(gateway.calls().is_empty(), "nothing runs before the first pull");
    assert!(rows.next().is_some());
    assert!(rows.next().is_none());
    assert_eq!(gateway.calls().len(), 1);
}

#[test]
fn keyless_and_composite_entities_are_rejected_at_compile_time() {
    let gateway = RecordingGateway::returning(&["x"]);
    let db = northwind(gateway.clone());
    let keyless = db.compile(r#"from s in Suppliers where search(s, "x")"#).unwrap_err();
    assert!(matches!(keyless, SearchlinkError::Compile(ref m) if m.contains("no primary key")), "{keyless}");
    let composite = db.compile(r#"from l in OrderLines where search(l, "x")"#).unwrap_err();
    assert!(matches!(composite, SearchlinkError::Compile(ref m) if m.contains("composite")), "{composite}");
    assert!(gateway.calls().is_empty());
}

#[test]
fn search_combines_with_joins_other_filters_and_projection() {
    let db = northwind(RecordingGateway::returning(&["ALFKI", "BSBEV"]));
    let rows = db
        .query(
            r#"from c in Customers
               join o in Orders on o.CustomerId = c.CustomerId
               where search(c, "Lon*")
               where o.Freight > 10
               select c.CompanyName, o.OrderId
               order by o.OrderId"#,
            Parameters::new(),
        )
        .expect("query ok");
    let pairs: Vec<(String, i64)> = rows
        .iter()
        .map(|r| (r.text("CompanyName").unwrap(), r.integer("OrderId").unwrap()))
        .collect();
    assert_eq!(
        pairs,
        vec![("Alfreds Futterkiste".to_string(), 10248), ("B's Beverages".to_string(), 10250)]
    );
}

#[test]
fn search_and_relational_predicates_share_a_clause() {
    let db = northwind(RecordingGateway::returning(&["ALFKI", "AROUT", "BSBEV"]));
    let query = Query::from("c", "Customers")
        .filter(search("c", "a*").and(member("c", "City").equals(lit("London"))))
        .order_by(member("c", "CustomerId"), true)
        .take(1);
    let compiled = db.compile_query(&query).expect("compiles");
    let rows = compiled.collect(&db, Parameters::new()).expect("query ok");
    assert_eq!(ids(&rows), vec!["BSBEV"]);
}

#[test]
fn search_text_can_come_from_a_parameter() {
    let gateway = RecordingGateway::returning(&["CONSH"]);
    let db = northwind(gateway.clone());
    let text = r#"from c in Customers where search(c, @q) and c.City = @city"#;
    let rows = db
        .query(text, Parameters::new().with("q", "cons*").with("city", "London"))
        .expect("query ok");
    assert_eq!(ids(&rows), vec!["CONSH"]);
    assert_eq!(gateway.calls()[0].1, "cons*");

    let missing = db.query(text, Parameters::new().with("city", "London")).unwrap_err();
    assert!(matches!(missing, SearchlinkError::Execution(_)), "{missing}");
    let wrong_kind = db.query(text, Parameters::new().with("q", 7_i64).with("city", "London")).unwrap_err();
    assert!(matches!(wrong_kind, SearchlinkError::Execution(_)), "{wrong_kind}");
}

#[test]
fn integer_keys_are_converted_at_bind_time() {
    let db = northwind(RecordingGateway::returning(&["10250", "10252"]));
    let rows = db
        .query(r#"from o in Orders where search(o, "heavy") order by o.OrderId"#, Parameters::new())
        .expect("query ok");
    let orders: Vec<i64> = rows.iter().map(|r| r.integer("OrderId").unwrap()).collect();
    assert_eq!(orders, vec![10250, 10252]);
    assert_eq!(rows[0].get("Freight"), Some(&Value::Real(65.83)));

    let db = northwind(RecordingGateway::returning(&["10250", "not-a-number"]));
    let err = db.query(r#"from o in Orders where search(o, "heavy")"#, Parameters::new()).unwrap_err();
    assert!(matches!(err, SearchlinkError::Search(_)), "{err}");
}

#[test]
fn memory_gateway_end_to_end() {
    let gateway = MemorySearchGateway::new()
        .with_document("customers-index", "ALFKI", "Alfreds Futterkiste Berlin")
        .unwrap()
        .with_document("customers-index", "AROUT", "Around the Horn London")
        .unwrap()
        .with_document("customers-index", "BSBEV", "B's Beverages London")
        .unwrap()
        .with_document("customers-index", "CONSH", "Consolidated Holdings London")
        .unwrap();
    let db = northwind(Arc::new(gateway));
    let rows = db
        .query(r#"from c in Customers where search(c, "Lon*") order by c.CustomerId desc"#, Parameters::new())
        .expect("query ok");
    assert_eq!(ids(&rows), vec!["CONSH", "BSBEV", "AROUT"]);
}

#[test]
fn compiled_queries_are_cached_by_text() {
    let db = northwind(RecordingGateway::returning(&[]));
    let text = r#"from c in Customers where search(c, "Lon*")"#;
    let first = db.compile(text).unwrap();
    let second = db.compile(text).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(db.cached_queries().unwrap(), 1);
}

#[derive(Debug, PartialEq)]
struct Customer {
    id: String,
    company: String,
}

impl FromRecord for Customer {
    fn from_record(record: &Record) -> Result<Self> {
        Ok(Customer { id: record.text("CustomerId")?, company: record.text("CompanyName")? })
    }
}

#[test]
fn records_shape_into_application_types() {
    let db = northwind(RecordingGateway::returning(&["BSBEV"]));
    let compiled = db.compile(r#"from c in Customers where search(c, "bev*")"#).unwrap();
    let customers = compiled
        .enumerate_as::<Customer>(&db, Parameters::new())
        .collect::<Result<Vec<_>>>()
        .expect("shaping ok");
    assert_eq!(customers, vec![Customer { id: "BSBEV".into(), company: "B's Beverages".into() }]);
}

// ------------- Plan assembly -------------

#[test]
fn repeated_interception_wraps_once() {
    let gateway = RecordingGateway::returning(&["AROUT"]);
    let mut extensions = CompilerExtensions::standard();
    extensions.clause_hooks.push(Arc::new(SearchPlanInterceptor));
    let db = Database::with_extensions(PersistenceMode::InMemory, model(), gateway.clone(), extensions).unwrap();
    db.execute_batch(SCHEMA).unwrap();
    let compiled = db.compile(r#"from c in Customers where search(c, "Lon*")"#).unwrap();
    assert!(matches!(compiled.chain(), ExecutionChain::Wrapped { .. }));
    assert_eq!(compiled.explain().matches("search[").count(), 1);
    assert_eq!(compiled.collect(&db, Parameters::new()).unwrap().len(), 1);
    assert_eq!(gateway.calls().len(), 1);
}

#[test]
fn queries_without_search_keep_a_plain_chain() {
    let gateway = RecordingGateway::returning(&[]);
    let db = northwind(gateway.clone());
    let compiled = db.compile("from c in Customers where c.City = 'London'").unwrap();
    assert!(!compiled.chain().is_wrapped());
    assert!(compiled.markers().is_empty());
    assert_eq!(compiled.collect(&db, Parameters::new()).unwrap().len(), 3);
    assert!(gateway.calls().is_empty());
}

#[test]
fn a_second_search_predicate_is_rejected() {
    let db = northwind(RecordingGateway::returning(&[]));
    let err = db
        .compile(r#"from c in Customers where search(c, "Lon*") where search(c, "Ber*")"#)
        .unwrap_err();
    assert!(matches!(err, SearchlinkError::Compile(_)), "{err}");
}

#[test]
fn a_rewrite_without_interception_is_an_invariant_violation() {
    let extensions = CompilerExtensions {
        translators: vec![Arc::new(SearchPredicateTranslator)],
        unknown_node_visitors: vec![Arc::new(MembershipPassThrough)],
        clause_hooks: Vec::new(),
    };
    let db = Database::with_extensions(PersistenceMode::InMemory, model(), RecordingGateway::returning(&[]), extensions)
        .unwrap();
    let err = db.compile(r#"from c in Customers where search(c, "Lon*")"#).unwrap_err();
    assert!(matches!(err, SearchlinkError::Invariant(_)), "{err}");
}

#[test]
fn interception_checks_the_relational_step_reads_the_marker() {
    let marker = SearchMarker {
        id: MarkerId(1),
        parameter: "search_ids_1".to_string(),
        text: SearchText::Literal("Lon*".to_string()),
        index: "customers-index".to_string(),
        entity: "Customers".to_string(),
        key_property: "CustomerId".to_string(),
        key_kind: ValueKind::Text,
    };
    let predicate = search("c", "Lon*");
    let translated = SqlExpr::Literal(Value::Integer(1));
    let clause = WhereClause { index: 0, predicate: &predicate, translated: &translated, markers: vec![&marker] };
    let chain = ExecutionChain::plain(Materializer::new("SELECT 1".to_string(), Vec::new(), Shaper::new(Vec::new())));
    let err = SearchPlanInterceptor.after_where_clause(&clause, chain).unwrap_err();
    assert!(matches!(err, SearchlinkError::Invariant(_)), "{err}");
}

#[test]
fn resolving_before_binding_is_an_invariant_violation() {
    let db = northwind(RecordingGateway::returning(&[]));
    let slot = ParameterSlot { name: "search_ids_1".to_string(), source: ParameterSource::Bound };
    let chain = ExecutionChain::plain(Materializer::new(
        "SELECT value FROM rarray(:search_ids_1)".to_string(),
        vec![slot],
        Shaper::new(Vec::new()),
    ));
    let mut ctx = QueryContext::new(Parameters::new());
    let err = chain.execute(db.gateway(), &mut ctx, || db.connection()).unwrap_err();
    assert!(matches!(err, SearchlinkError::Invariant(_)), "{err}");
}
