//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use asupersync::{Cx, Outcome};
use fenland_core::{
    Cascade, Connection, EntityMapping, Error, FieldOptions, FieldType, MappingRegistry,
    QueryError, QueryErrorKind, Relationship, Result, Row, TransactionOps, Value,
};

use crate::delta::RelationChange;
use crate::entity::{EntityId, ManagedEntity};
use crate::proxy::ChangeSink;

/// Users, and publishers owning books tagged with tags.
pub(crate) fn library() -> MappingRegistry {
    let mut registry = MappingRegistry::new();
    registry
        .register(
            EntityMapping::new("User")
                .with_field(FieldOptions::id("id"))
                .with_field(FieldOptions::new("name", FieldType::String).size(255))
                .with_field(FieldOptions::new("email", FieldType::String).nullable())
                .with_field(FieldOptions::new("created_at", FieldType::DateTime).nullable()),
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
    registry.complete().unwrap();
    registry
}

pub(crate) fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Property(EntityId, String),
    Relation(EntityId, String, EntityId, RelationChange),
    Collection(EntityId, String, EntityId, RelationChange),
}

/// A sink that records every event and can reject the next one.
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<Event>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingSink {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn as_dyn(self: &Arc<Self>) -> Arc<dyn ChangeSink> {
        Arc::clone(self) as Arc<dyn ChangeSink>
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    fn record(&self, event: Event) -> Result<()> {
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(Error::Custom(message));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl ChangeSink for RecordingSink {
    fn property_changed(&self, entity: &ManagedEntity, property: &str) -> Result<()> {
        self.record(Event::Property(entity.id(), property.to_string()))
    }

    fn relation_changed(
        &self,
        entity: &ManagedEntity,
        property: &str,
        target: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()> {
        self.record(Event::Relation(
            entity.id(),
            property.to_string(),
            target.id(),
            change,
        ))
    }

    fn collection_changed(
        &self,
        entity: &ManagedEntity,
        property: &str,
        item: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()> {
        self.record(Event::Collection(
            entity.id(),
            property.to_string(),
            item.id(),
            change,
        ))
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Statements executed inside transactions, in order.
    executed: Vec<(String, Vec<Value>)>,
    /// Queries run outside transactions.
    queries: Vec<(String, Vec<Value>)>,
    /// Rows returned for queries whose SQL contains the key.
    rows: Vec<(String, Vec<Row>)>,
    /// Statements whose SQL contains one of these fail.
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
}

/// Recording connection shared by every clone.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().executed.clone()
    }

    pub(crate) fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().queries.clone()
    }

    pub(crate) fn fail_on(&self, pattern: &str) {
        self.state.lock().unwrap().fail_on.push(pattern.to_string());
    }

    pub(crate) fn clear_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    pub(crate) fn add_rows(&self, pattern: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap()
            .rows
            .push((pattern.to_string(), rows));
    }

    pub(crate) fn begins(&self) -> usize {
        self.state.lock().unwrap().begins
    }

    pub(crate) fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

#[allow(clippy::manual_async_fn)]
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
        async move {
            let mut guard = state.lock().unwrap();
            guard.queries.push((sql.clone(), params));
            let rows = guard
                .rows
                .iter()
                .find(|(pattern, _)| sql.contains(pattern.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default();
            Outcome::Ok(rows)
        }
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
pub(crate) struct MockTransaction {
    state: Arc<Mutex<MockState>>,
}

#[allow(clippy::manual_async_fn)]
impl TransactionOps for MockTransaction {
    fn query(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async { Outcome::Ok(Vec::new()) }
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
