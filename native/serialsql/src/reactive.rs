/// Reactive queries
///
/// A reactive query is re-run after a commit whenever one of the tables (or
/// rows) it watches changed inside the committed work. Change events come
/// from the connection's update observer; results are delivered to the
/// subscription's callback.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use crate::connection::{Connection, ConnectionShared};
use crate::error::Result;
use crate::hooks::Delivery;
use crate::materialize::materialize;
use crate::models::{IntoParams, QueryResult, Scalar, UpdateEvent};
use crate::sanitize::sanitize_params;
use crate::utils::safe_lock;

/// Receives the outcome of each re-run.
pub type ReactiveCallback = Arc<dyn Fn(Result<QueryResult>) + Send + Sync>;

/// A table to watch, optionally narrowed to specific row ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTrigger {
    pub table: String,
    /// Empty means any row.
    pub ids: Vec<i64>,
}

impl TableTrigger {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ids: Vec::new(),
        }
    }

    pub fn rows(table: impl Into<String>, ids: Vec<i64>) -> Self {
        Self {
            table: table.into(),
            ids,
        }
    }

    /// An unknown row id matches any trigger on the table.
    pub fn matches(&self, event: &UpdateEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        match event.row_id {
            Some(row_id) => self.ids.is_empty() || self.ids.contains(&row_id),
            None => true,
        }
    }
}

pub struct ReactiveQuery {
    pub query: String,
    pub params: Option<Vec<Scalar>>,
    /// An empty list never fires.
    pub fire_on: Vec<TableTrigger>,
    pub callback: ReactiveCallback,
}

impl ReactiveQuery {
    pub fn new<F>(query: impl Into<String>, params: impl IntoParams, callback: F) -> Self
    where
        F: Fn(Result<QueryResult>) + Send + Sync + 'static,
    {
        Self {
            query: query.into(),
            params: params.into_params(),
            fire_on: Vec::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn fire_on(mut self, trigger: TableTrigger) -> Self {
        self.fire_on.push(trigger);
        self
    }
}

struct Subscription {
    query: String,
    params: Option<Vec<Scalar>>,
    fire_on: Vec<TableTrigger>,
    callback: ReactiveCallback,
    pending: bool,
}

pub(crate) struct PendingRun {
    pub query: String,
    pub params: Option<Vec<Scalar>>,
    pub callback: ReactiveCallback,
}

#[derive(Default)]
pub(crate) struct ReactiveRegistry {
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
}

impl ReactiveRegistry {
    pub fn is_empty(&self) -> Result<bool> {
        Ok(safe_lock(&self.subscriptions, "ReactiveRegistry::is_empty")?.is_empty())
    }

    fn insert(&self, query: ReactiveQuery) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let subscription = Subscription {
            query: query.query,
            params: sanitize_params(query.params),
            fire_on: query.fire_on,
            callback: query.callback,
            pending: false,
        };
        safe_lock(&self.subscriptions, "ReactiveRegistry::insert")?.insert(id, subscription);
        Ok(id)
    }

    fn remove(&self, id: &Uuid) -> Result<bool> {
        Ok(safe_lock(&self.subscriptions, "ReactiveRegistry::remove")?
            .remove(id)
            .is_some())
    }

    pub fn clear(&self) {
        if let Ok(mut subscriptions) = safe_lock(&self.subscriptions, "ReactiveRegistry::clear") {
            subscriptions.clear();
        }
    }

    /// Mark every subscription watching the changed row.
    pub fn mark(&self, event: &UpdateEvent) {
        let Ok(mut subscriptions) = safe_lock(&self.subscriptions, "ReactiveRegistry::mark") else {
            return;
        };
        for subscription in subscriptions.values_mut() {
            if subscription.fire_on.iter().any(|t| t.matches(event)) {
                subscription.pending = true;
            }
        }
    }

    /// Forget notifications collected since the last flush.
    pub fn discard_pending(&self) {
        if let Ok(mut subscriptions) =
            safe_lock(&self.subscriptions, "ReactiveRegistry::discard_pending")
        {
            for subscription in subscriptions.values_mut() {
                subscription.pending = false;
            }
        }
    }

    /// Take the queries to re-run and clear their pending flag.
    pub fn take_pending(&self) -> Vec<PendingRun> {
        let Ok(mut subscriptions) = safe_lock(&self.subscriptions, "ReactiveRegistry::take_pending")
        else {
            return Vec::new();
        };
        subscriptions
            .values_mut()
            .filter(|s| s.pending)
            .map(|s| {
                s.pending = false;
                PendingRun {
                    query: s.query.clone(),
                    params: s.params.clone(),
                    callback: Arc::clone(&s.callback),
                }
            })
            .collect()
    }
}

/// Handle of a registered reactive query.
///
/// Dropping it unsubscribes.
#[must_use = "the reactive query is removed when the subscription is dropped"]
pub struct ReactiveSubscription {
    id: Uuid,
    shared: Weak<ConnectionShared>,
}

impl ReactiveSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the query now.
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for ReactiveSubscription {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let conn = Connection { shared };
        match conn.shared.reactive.remove(&self.id) {
            Ok(true) => {
                if let Err(err) = conn.sync_update_observer(Delivery::Detached) {
                    tracing::warn!(error = %err, "failed to remove update observer");
                }
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "failed to unsubscribe reactive query"),
        }
    }
}

impl Connection {
    /// Register a query to re-run after commits that touch `fire_on`.
    pub fn reactive_execute(&self, query: ReactiveQuery) -> Result<ReactiveSubscription> {
        let id = self.shared.reactive.insert(query)?;
        if let Err(err) = self.sync_update_observer(Delivery::Blocking) {
            self.shared.reactive.remove(&id)?;
            return Err(err);
        }
        Ok(ReactiveSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Re-run every pending reactive query and deliver the results.
    pub(crate) async fn flush_reactive(&self) {
        for run in self.shared.reactive.take_pending() {
            let result = self.run(run.query, run.params).await.map(materialize);
            (run.callback)(result);
        }
    }
}
