//! Request-scoped batched relation loading
//!
//! Relation resolvers never query the store directly. They register the key
//! they need with the request's [RelationLoader] and await the answer. Keys for
//! the same relation edge (and the same relation arguments) accumulate into one
//! pending batch.
//!
//! # Batch window
//!
//! [run_batched] drives a request's resolution future. Every time that future
//! can make no further progress on its own, all pending batches are flushed:
//! each becomes exactly one query (`... WHERE fk IN (keys)`), whose rows are
//! partitioned back to the waiting resolvers by key. Sibling resolvers at the
//! same level of the response therefore share a single query per edge.
//!
//! Results (including failures) are cached per `(edge, key)` for the lifetime of
//! the loader, which is one request. A failed batch is delivered to every
//! waiter of that batch only.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::task::Poll;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::errors::DataStoreError;
use super::filters::FilterNode;
use super::orm::{EntityQuery, EntityRow, EntityTypeDescriptor, OrderSpec, SqlStatement, Window};
use crate::db::Snapshot;

/// Outcome delivered to each waiter.
pub type Loaded = Result<Arc<Vec<EntityRow>>, DataStoreError>;

/// One relation edge with one argument set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub entity: String,
    pub relation: String,
    /// Fingerprint of the relation's arguments; empty when it takes none
    pub arguments: String,
}

impl EdgeKey {
    pub fn new(entity: &str, relation: &str) -> Self {
        Self {
            entity: entity.to_string(),
            relation: relation.to_string(),
            arguments: String::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: String) -> Self {
        self.arguments = arguments;
        self
    }
}

/// How keys select target rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Keys are target primary keys.
    ById,
    /// Keys are values of a target column, windowed per key.
    ByColumn(String),
}

/// Everything needed to turn a set of keys into one statement.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub target: Arc<EntityTypeDescriptor>,
    pub lookup: Lookup,
    pub filter: FilterNode,
    pub order: OrderSpec,
    pub window: Option<Window>,
}

impl BatchPlan {
    /// Point lookups of `target` by primary key.
    pub fn by_id(target: Arc<EntityTypeDescriptor>) -> Self {
        let order = OrderSpec::by_id(&target);
        Self {
            target,
            lookup: Lookup::ById,
            filter: FilterNode::always(),
            order,
            window: None,
        }
    }

    /// Column rows are partitioned on.
    fn partition_column(&self) -> &str {
        match &self.lookup {
            Lookup::ById => self.target.id_column(),
            Lookup::ByColumn(column) => column,
        }
    }

    pub fn statement(&self, keys: &[String]) -> SqlStatement {
        let query = EntityQuery::new(&self.target)
            .filter(self.filter.clone())
            .order_by(self.order.clone());
        match &self.lookup {
            Lookup::ById => query.where_in(self.target.id_column(), keys).build(),
            Lookup::ByColumn(column) => match self.window {
                Some(window) => query.window(window).build_partitioned(column, keys),
                None => query.build_partitioned(column, keys),
            },
        }
    }
}

struct PendingBatch {
    plan: BatchPlan,
    waiters: HashMap<String, Vec<oneshot::Sender<Loaded>>>,
}

#[derive(Default)]
struct LoaderState {
    cache: HashMap<(EdgeKey, String), Loaded>,
    pending: BTreeMap<EdgeKey, PendingBatch>,
    in_flight: HashMap<(EdgeKey, String), Vec<oneshot::Sender<Loaded>>>,
}

/// Batches relation fetches for one request. Never shared across requests.
pub struct RelationLoader {
    snapshot: Arc<dyn Snapshot>,
    state: Mutex<LoaderState>,
}

impl RelationLoader {
    pub fn new(snapshot: Arc<dyn Snapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            state: Mutex::new(LoaderState::default()),
        })
    }

    /// Rows of `edge` for `key`.
    ///
    /// `plan` is only invoked when this call opens a new batch for the edge.
    pub async fn load(&self, edge: &EdgeKey, key: &str, plan: impl FnOnce() -> BatchPlan) -> Loaded {
        let receiver = {
            let mut state = self.state.lock();
            let cache_key = (edge.clone(), key.to_string());
            if let Some(hit) = state.cache.get(&cache_key) {
                return hit.clone();
            }

            let (sender, receiver) = oneshot::channel();
            if let Some(waiters) = state.in_flight.get_mut(&cache_key) {
                waiters.push(sender);
            } else {
                state
                    .pending
                    .entry(edge.clone())
                    .or_insert_with(|| PendingBatch {
                        plan: plan(),
                        waiters: HashMap::new(),
                    })
                    .waiters
                    .entry(cache_key.1)
                    .or_default()
                    .push(sender);
            }
            receiver
        };

        receiver
            .await
            .unwrap_or_else(|_| Err(DataStoreError::Interrupted))
    }

    /// Issue one query per pending batch. Returns the number of batches issued.
    pub fn flush(self: &Arc<Self>) -> usize {
        let batches: Vec<(EdgeKey, BatchPlan, Vec<String>)> = {
            let mut state = self.state.lock();
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .map(|(edge, batch)| {
                    let mut keys: Vec<String> = batch.waiters.keys().cloned().collect();
                    keys.sort();
                    for (key, senders) in batch.waiters {
                        state.in_flight.insert((edge.clone(), key), senders);
                    }
                    (edge, batch.plan, keys)
                })
                .collect()
        };

        let issued = batches.len();
        for (edge, plan, keys) in batches {
            debug!(
                entity = %edge.entity,
                relation = %edge.relation,
                keys = keys.len(),
                "Flushing relation batch"
            );
            let loader = Arc::clone(self);
            tokio::spawn(async move {
                let statement = plan.statement(&keys);
                let result = loader.snapshot.fetch(&statement).await;
                loader.complete(&edge, &plan, keys, result);
            });
        }
        issued
    }

    fn complete(
        &self,
        edge: &EdgeKey,
        plan: &BatchPlan,
        keys: Vec<String>,
        result: Result<Vec<EntityRow>, DataStoreError>,
    ) {
        let column = plan.partition_column();
        let grouped = result.map(|rows| {
            let mut grouped: HashMap<String, Vec<EntityRow>> = HashMap::new();
            for row in rows {
                let Some(key) = row.text(column).map(str::to_string) else {
                    continue;
                };
                grouped.entry(key).or_default().push(row);
            }
            grouped
        });

        if let Err(error) = &grouped {
            debug!(
                entity = %edge.entity,
                relation = %edge.relation,
                error = %error,
                "Relation batch failed"
            );
        }

        let mut state = self.state.lock();
        let mut grouped = grouped;
        for key in keys {
            let loaded = match &mut grouped {
                Ok(groups) => Ok(Arc::new(groups.remove(&key).unwrap_or_default())),
                Err(error) => Err(error.clone()),
            };
            let cache_key = (edge.clone(), key);
            for sender in state.in_flight.remove(&cache_key).unwrap_or_default() {
                // receiver gone means the resolver was dropped
                let _ = sender.send(loaded.clone());
            }
            state.cache.insert(cache_key, loaded);
        }
    }
}

/// Drive `future`, flushing the loader whenever it stalls.
pub async fn run_batched<F: Future>(loader: &Arc<RelationLoader>, future: F) -> F::Output {
    let mut future = std::pin::pin!(future);
    futures::future::poll_fn(|cx| match future.as_mut().poll(cx) {
        Poll::Ready(output) => Poll::Ready(output),
        Poll::Pending => {
            loader.flush();
            Poll::Pending
        }
    })
    .await
}
