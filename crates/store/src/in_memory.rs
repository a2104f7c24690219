//! In-memory store gateway for tests/dev.
//!
//! Not optimized for performance. Besides plain storage it can inject faults
//! into upcoming calls and keeps a log of every call it served, which is what
//! the circulation tests use to force and observe compensation paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use serde_json::Value as JsonValue;

use libris_core::Row;

use crate::gateway::{Filter, Predicate, StoreError, StoreGateway};

/// Kind of gateway call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Call,
}

impl Operation {
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Insert | Operation::Update | Operation::Delete)
    }
}

/// An injected failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The store answers with an empty result (write rejected, nothing found).
    Reject,
    /// The call fails with `StoreError::Transport`.
    Transport,
    /// The call takes effect, but every returned row is cut down to its key
    /// column (procedure rows come back empty), so it no longer decodes.
    Garble,
}

/// One served call: operation plus collection (or procedure) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: Operation,
    pub target: String,
}

#[derive(Debug)]
struct Collection {
    key_column: String,
    next_id: i64,
    rows: BTreeMap<i64, Row>,
}

#[derive(Debug)]
struct FaultRule {
    operation: Operation,
    target: String,
    fault: Fault,
    skip: usize,
    remaining: usize,
}

/// Read-only view over all collections, handed to registered procedures.
pub struct Snapshot<'a> {
    collections: &'a HashMap<String, Collection>,
}

impl Snapshot<'_> {
    /// Rows of `collection` in key order; empty if the collection is unknown.
    pub fn rows(&self, collection: &str) -> Vec<&Row> {
        self.collections
            .get(collection)
            .map(|c| c.rows.values().collect())
            .unwrap_or_default()
    }
}

type Procedure = Box<dyn Fn(&Snapshot<'_>) -> Vec<Row> + Send + Sync>;

/// In-memory gateway with serial integer keys per collection.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    procedures: RwLock<HashMap<String, Procedure>>,
    faults: Mutex<Vec<FaultRule>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collections: Vec<String> = self
            .collections
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("InMemoryStore")
            .field("collections", &collections)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            procedures: RwLock::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Declare a collection whose serial primary key lives in `key_column`.
    pub fn with_collection(mut self, name: &str, key_column: &str) -> Self {
        let collections = self
            .collections
            .get_mut()
            .unwrap_or_else(|e| e.into_inner());
        collections.insert(
            name.to_string(),
            Collection {
                key_column: key_column.to_string(),
                next_id: 1,
                rows: BTreeMap::new(),
            },
        );
        self
    }

    /// Register a server-side procedure computed from a snapshot of the data.
    pub fn with_procedure<F>(mut self, name: &str, procedure: F) -> Self
    where
        F: Fn(&Snapshot<'_>) -> Vec<Row> + Send + Sync + 'static,
    {
        let procedures = self
            .procedures
            .get_mut()
            .unwrap_or_else(|e| e.into_inner());
        procedures.insert(name.to_string(), Box::new(procedure));
        self
    }

    /// Make the next `times` calls of `operation` on `target` fail with `fault`.
    pub fn inject_fault(&self, operation: Operation, target: &str, fault: Fault, times: usize) {
        self.inject_fault_after(operation, target, fault, 0, times);
    }

    /// Like [`inject_fault`](Self::inject_fault), but let `skip` matching calls through first.
    pub fn inject_fault_after(
        &self,
        operation: Operation,
        target: &str,
        fault: Fault,
        skip: usize,
        times: usize,
    ) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(FaultRule {
                operation,
                target: target.to_string(),
                fault,
                skip,
                remaining: times,
            });
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// Every call served so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation.is_write())
            .count()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Direct read of a collection, bypassing faults and the call log.
    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.collections
            .read()
            .ok()
            .and_then(|c| c.get(collection).map(|c| c.rows.values().cloned().collect()))
            .unwrap_or_default()
    }

    fn record(&self, operation: Operation, target: &str) -> Result<Option<Fault>, StoreError> {
        self.calls.lock().map_err(poisoned)?.push(StoreCall {
            operation,
            target: target.to_string(),
        });

        let mut faults = self.faults.lock().map_err(poisoned)?;
        let hit = faults
            .iter_mut()
            .find(|r| r.operation == operation && r.target == target && r.remaining > 0)
            .and_then(|rule| {
                if rule.skip > 0 {
                    rule.skip -= 1;
                    None
                } else {
                    rule.remaining -= 1;
                    Some(rule.fault)
                }
            });
        faults.retain(|r| r.remaining > 0);

        match hit {
            Some(Fault::Transport) => Err(StoreError::Transport(format!(
                "injected transport failure on {operation:?} {target}"
            ))),
            other => Ok(other),
        }
    }
}

/// A filter with its `NotIn` sets materialized against the current data.
struct CompiledFilter<'f> {
    predicates: Vec<Compiled<'f>>,
}

enum Compiled<'f> {
    Eq(&'f str, &'f JsonValue),
    IsNull(&'f str),
    NotIn(&'f str, HashSet<String>),
}

fn garbled(fault: Option<Fault>, key_column: &str, rows: Vec<Row>) -> Vec<Row> {
    if fault != Some(Fault::Garble) {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(column, _)| column == key_column)
                .collect()
        })
        .collect()
}

fn column_value<'r>(row: &'r Row, column: &str) -> &'r JsonValue {
    row.get(column).unwrap_or(&JsonValue::Null)
}

impl<'f> CompiledFilter<'f> {
    fn compile(
        filter: &'f Filter,
        collections: &HashMap<String, Collection>,
    ) -> Result<Self, StoreError> {
        let mut predicates = Vec::with_capacity(filter.predicates().len());
        for p in filter.predicates() {
            predicates.push(match p {
                Predicate::Eq { column, value } => Compiled::Eq(column, value),
                Predicate::IsNull { column } => Compiled::IsNull(column),
                Predicate::NotIn {
                    column,
                    collection,
                    source_column,
                } => {
                    let source = collections
                        .get(collection)
                        .ok_or_else(|| StoreError::UnknownCollection(collection.clone()))?;
                    // NULLs in the source set are skipped, as `NOT IN` callers guard against them.
                    let set = source
                        .rows
                        .values()
                        .map(|r| column_value(r, source_column))
                        .filter(|v| !v.is_null())
                        .map(|v| v.to_string())
                        .collect();
                    Compiled::NotIn(column, set)
                }
            });
        }
        Ok(Self { predicates })
    }

    fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| match p {
            Compiled::Eq(column, value) => column_value(row, column) == *value,
            Compiled::IsNull(column) => column_value(row, column).is_null(),
            Compiled::NotIn(column, set) => {
                let v = column_value(row, column);
                !v.is_null() && !set.contains(&v.to_string())
            }
        })
    }
}

impl StoreGateway for InMemoryStore {
    fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let fault = self.record(Operation::Select, collection)?;
        if fault == Some(Fault::Reject) {
            return Ok(vec![]);
        }
        let collections = self.collections.read().map_err(poisoned)?;
        let target = collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        let compiled = CompiledFilter::compile(filter, &*collections)?;

        let rows = target
            .rows
            .values()
            .filter(|r| compiled.matches(r))
            .cloned()
            .collect();
        Ok(garbled(fault, &target.key_column, rows))
    }

    fn insert(&self, collection: &str, mut row: Row) -> Result<Vec<Row>, StoreError> {
        let fault = self.record(Operation::Insert, collection)?;
        if fault == Some(Fault::Reject) {
            return Ok(vec![]);
        }
        let mut collections = self.collections.write().map_err(poisoned)?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let existing = row.get(&target.key_column).cloned();
        let key = match existing {
            None | Some(JsonValue::Null) => {
                let key = target.next_id;
                row.insert(target.key_column.clone(), JsonValue::from(key));
                key
            }
            Some(value) => match value.as_i64() {
                Some(key) if !target.rows.contains_key(&key) => key,
                // Duplicate or non-integer key: rejected like a constraint violation.
                _ => return Ok(vec![]),
            },
        };

        target.next_id = target.next_id.max(key + 1);
        target.rows.insert(key, row.clone());
        Ok(garbled(fault, &target.key_column, vec![row]))
    }

    fn update(&self, collection: &str, patch: Row, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let fault = self.record(Operation::Update, collection)?;
        if fault == Some(Fault::Reject) {
            return Ok(vec![]);
        }
        let mut collections = self.collections.write().map_err(poisoned)?;
        let target = collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        if patch.contains_key(&target.key_column) {
            return Ok(vec![]);
        }

        let compiled = CompiledFilter::compile(filter, &*collections)?;
        let keys: Vec<i64> = target
            .rows
            .iter()
            .filter(|(_, r)| compiled.matches(r))
            .map(|(k, _)| *k)
            .collect();
        drop(compiled);

        let Some(target) = collections.get_mut(collection) else {
            return Ok(vec![]);
        };
        let mut updated = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = target.rows.get_mut(&key) {
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(garbled(fault, &target.key_column, updated))
    }

    fn delete(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let fault = self.record(Operation::Delete, collection)?;
        if fault == Some(Fault::Reject) {
            return Ok(vec![]);
        }
        let mut collections = self.collections.write().map_err(poisoned)?;
        let target = collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let compiled = CompiledFilter::compile(filter, &*collections)?;
        let keys: Vec<i64> = target
            .rows
            .iter()
            .filter(|(_, r)| compiled.matches(r))
            .map(|(k, _)| *k)
            .collect();
        drop(compiled);

        let Some(target) = collections.get_mut(collection) else {
            return Ok(vec![]);
        };
        let deleted = keys
            .into_iter()
            .filter_map(|k| target.rows.remove(&k))
            .collect();
        Ok(garbled(fault, &target.key_column, deleted))
    }

    fn call(&self, procedure: &str) -> Result<Vec<Row>, StoreError> {
        let fault = self.record(Operation::Call, procedure)?;
        if fault == Some(Fault::Reject) {
            return Ok(vec![]);
        }
        let procedures = self.procedures.read().map_err(poisoned)?;
        let proc_fn = procedures
            .get(procedure)
            .ok_or_else(|| StoreError::UnknownProcedure(procedure.to_string()))?;
        let collections = self.collections.read().map_err(poisoned)?;
        let rows = proc_fn(&Snapshot {
            collections: &*collections,
        });
        Ok(garbled(fault, "", rows))
    }
}
