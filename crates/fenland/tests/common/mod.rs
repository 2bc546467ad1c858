//! Recording connection and mappings shared by the integration tests.

#![allow(dead_code, clippy::manual_async_fn)]

use std::sync::{Arc, Mutex};

use asupersync::runtime::RuntimeBuilder;
use fenland::prelude::*;
use fenland::{StoreSet, TransactionOps};
use fenland_core::{QueryError, QueryErrorKind};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Run a future on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

/// Users, and publishers owning books tagged with tags. Audit logs live in
/// the `archive` store.
pub fn library() -> Arc<MappingRegistry> {
    let mut registry = MappingRegistry::new();
    registry
        .register(
            EntityMapping::new("User")
                .with_field(FieldOptions::id("id"))
                .with_field(FieldOptions::new("name", FieldType::String).size(255))
                .with_field(FieldOptions::new("email", FieldType::String).nullable()),
        )
        .unwrap();
    registry
        .register(
            EntityMapping::new("Publisher")
                .with_field(FieldOptions::id("id"))
                .with_field(FieldOptions::new("name", FieldType::String).nullable())
                .with_field(
                    FieldOptions::relation("books", Relationship::one_to_many("Book", "publisher"))
                        .cascade(Cascade::Persist),
                ),
        )
        .unwrap();
    registry
        .register(
            EntityMapping::new("Book")
                .with_field(FieldOptions::id("id"))
                .with_field(FieldOptions::new("name", FieldType::String).nullable())
                .with_field(FieldOptions::relation(
                    "publisher",
                    Relationship::many_to_one("Publisher").inversed_by("books"),
                ))
                .with_field(FieldOptions::relation(
                    "tags",
                    Relationship::many_to_many("Tag").inversed_by("books"),
                )),
        )
        .unwrap();
    registry
        .register(
            EntityMapping::new("Tag")
                .with_field(FieldOptions::id("id"))
                .with_field(FieldOptions::new("name", FieldType::String).nullable())
                .with_field(FieldOptions::relation(
                    "books",
                    Relationship::many_to_many("Book").mapped_by("tags"),
                )),
        )
        .unwrap();
    registry
        .register(
            EntityMapping::new("AuditLog")
                .store("archive")
                .with_field(FieldOptions::id("id"))
                .with_field(FieldOptions::new("message", FieldType::Text)),
        )
        .unwrap();
    registry.complete().unwrap();
    Arc::new(registry)
}

pub fn scope(conn: &MockConnection) -> Scope<MockConnection> {
    Scope::new(
        library(),
        StoreSet::new("default", conn.clone()).with_store("archive", conn.clone()),
        SessionConfig::default(),
    )
}

#[derive(Debug, Default)]
struct MockState {
    executed: Vec<(String, Vec<Value>)>,
    queries: Vec<(String, Vec<Value>)>,
    rows: Vec<(String, Vec<Row>)>,
    fail_on: Vec<String>,
    next_id: i64,
    begins: usize,
    commits: usize,
    rollbacks: usize,
}

impl MockState {
    fn run(&mut self, sql: &str, params: &[Value]) -> Outcome<(), Error> {
        if self.fail_on.iter().any(|pattern| sql.contains(pattern.as_str())) {
            return Outcome::Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                sql: Some(sql.to_string()),
                sqlstate: None,
                message: "scripted failure".to_string(),
                source: None,
            }));
        }
        self.executed.push((sql.to_string(), params.to_vec()));
        Outcome::Ok(())
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Outcome<i64, Error> {
        match self.run(sql, params) {
            Outcome::Ok(()) => {
                self.next_id += 1;
                Outcome::Ok(self.next_id)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Vec<Row> {
        self.queries.push((sql.to_string(), params.to_vec()));
        self.rows
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

/// A connection that records statements instead of running them.
///
/// Clones share their state, so a test keeps one clone for inspection
/// while the scope owns another.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().queries.clone()
    }

    /// Fail every statement whose SQL contains `pattern`.
    pub fn fail_on(&self, pattern: &str) {
        self.state.lock().unwrap().fail_on.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    /// Answer queries whose SQL contains `pattern` with `rows`.
    pub fn add_rows(&self, pattern: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap()
            .rows
            .push((pattern.to_string(), rows));
    }

    pub fn begins(&self) -> usize {
        self.state.lock().unwrap().begins
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

impl Connection for MockConnection {
    type Tx<'conn>
        = MockTransaction
    where
        Self: 'conn;

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move { Outcome::Ok(state.lock().unwrap().query(&sql, &params)) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move { state.lock().unwrap().run(&sql, &params).map(|()| 1) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move { state.lock().unwrap().insert(&sql, &params) }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().unwrap().begins += 1;
            Outcome::Ok(MockTransaction { state })
        }
    }
}

#[derive(Debug)]
pub struct MockTransaction {
    state: Arc<Mutex<MockState>>,
}

impl TransactionOps for MockTransaction {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move { Outcome::Ok(state.lock().unwrap().query(&sql, &params)) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move { state.lock().unwrap().run(&sql, &params).map(|()| 1) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move { state.lock().unwrap().insert(&sql, &params) }
    }

    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            self.state.lock().unwrap().commits += 1;
            Outcome::Ok(())
        }
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            self.state.lock().unwrap().rollbacks += 1;
            Outcome::Ok(())
        }
    }
}
