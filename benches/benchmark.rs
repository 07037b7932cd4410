use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use searchlink::context::Parameters;
use searchlink::database::{Database, PersistenceMode};
use searchlink::datatype::ValueKind;
use searchlink::gateway::MemorySearchGateway;
use searchlink::model::{EntityType, Model, Property};
use searchlink::parse::parse_query;

const QUERY: &str = r#"from c in Customers where search(c, "city1*") and c.Score > 10 select c.CustomerId, c.Name order by c.Name take 50"#;

fn database(rows: usize) -> Database {
    let model = Model::new()
        .with(
            EntityType::new("Customers")
                .property(Property::new("CustomerId", ValueKind::Text))
                .property(Property::new("Name", ValueKind::Text))
                .property(Property::new("Score", ValueKind::Integer))
                .key(&["CustomerId"])
                .search_index("customers"),
        )
        .expect("model");
    let gateway = MemorySearchGateway::new();
    let mut script = String::from("CREATE TABLE Customers (CustomerId TEXT PRIMARY KEY, Name TEXT, Score INTEGER);");
    for i in 0..rows {
        let key = format!("C{i:05}");
        gateway
            .add_document("customers", &key, &format!("customer {i} city{}", i % 20))
            .expect("document");
        script.push_str(&format!("INSERT INTO Customers VALUES ('{key}', 'name {i}', {});", i % 100));
    }
    let db = Database::new(PersistenceMode::InMemory, model, Arc::new(gateway)).expect("database");
    db.execute_batch(&script).expect("rows");
    db
}

fn bench_compile(c: &mut Criterion) {
    let db = database(10);
    c.bench_function("parse query", |b| b.iter(|| parse_query(black_box(QUERY)).unwrap()));
    let query = parse_query(QUERY).unwrap();
    c.bench_function("compile query", |b| b.iter(|| db.compile_query(black_box(&query)).unwrap()));
}

fn bench_enumerate(c: &mut Criterion) {
    let db = database(5_000);
    let compiled = db.compile(QUERY).unwrap();
    c.bench_function("enumerate search query", |b| {
        b.iter(|| compiled.collect(&db, Parameters::new()).unwrap().len())
    });
    let plain = db.compile("from c in Customers where c.Score > 10 take 50").unwrap();
    c.bench_function("enumerate plain query", |b| {
        b.iter(|| plain.collect(&db, Parameters::new()).unwrap().len())
    });
}

criterion_group!(benches, bench_compile, bench_enumerate);
criterion_main!(benches);
