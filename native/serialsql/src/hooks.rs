/// Hook management for serialsql
///
/// Each connection has three single-slot hooks. Setting a hook replaces the
/// previous one and passing `None` clears it.
///
/// The update hook is not handed to the engine directly. The connection
/// installs one internal observer that forwards events to the user's update
/// hook and to the reactive registry, and keeps it installed only while one
/// of the two needs it.
///
/// Engines without hook support report `Error::Unsupported`; that is logged
/// as a warning and the setter still succeeds.
use std::sync::{Arc, Mutex};

use crate::connection::Connection;
use crate::engine::{TransactionCallback, UpdateCallback};
use crate::error::{Error, Result};
use crate::reactive::ReactiveRegistry;
use crate::utils::{safe_lock, safe_lock_arc};

#[derive(Default)]
pub(crate) struct HookSlots {
    user_update: Arc<Mutex<Option<UpdateCallback>>>,
    observer_installed: Mutex<bool>,
}

impl HookSlots {
    fn has_user_update(&self) -> Result<bool> {
        Ok(safe_lock_arc(&self.user_update, "HookSlots::has_user_update")?.is_some())
    }
}

/// How the observer change reaches the engine.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Wait for the engine and report its error.
    Blocking,
    /// Queue the change and return at once. Used from `Drop`.
    Detached,
}

impl Connection {
    /// Set or clear the row-change hook.
    ///
    /// The callback runs on the engine thread, after the statement that
    /// caused the change. It must not call this connection's blocking API.
    pub fn update_hook(&self, hook: Option<UpdateCallback>) -> Result<()> {
        *safe_lock_arc(&self.shared.hooks.user_update, "update_hook slot")? = hook;
        self.sync_update_observer(Delivery::Blocking)
    }

    /// Set or clear the commit hook.
    pub fn commit_hook(&self, hook: Option<TransactionCallback>) -> Result<()> {
        let result = self
            .shared
            .engine
            .call_blocking(move |engine| engine.set_commit_hook(hook));
        tolerate_unsupported(result)
    }

    /// Set or clear the rollback hook.
    pub fn rollback_hook(&self, hook: Option<TransactionCallback>) -> Result<()> {
        let result = self
            .shared
            .engine
            .call_blocking(move |engine| engine.set_rollback_hook(hook));
        tolerate_unsupported(result)
    }

    /// Install or remove the internal update observer so that it is present
    /// exactly while a user update hook or a reactive subscription exists.
    pub(crate) fn sync_update_observer(&self, delivery: Delivery) -> Result<()> {
        let hooks = &self.shared.hooks;
        let wanted = hooks.has_user_update()? || !self.shared.reactive.is_empty()?;

        let mut installed = safe_lock(&hooks.observer_installed, "sync_update_observer")?;
        if *installed == wanted {
            return Ok(());
        }

        let observer = wanted.then(|| {
            update_observer(
                Arc::clone(&hooks.user_update),
                Arc::clone(&self.shared.reactive),
            )
        });

        match delivery {
            Delivery::Blocking => {
                let result = self
                    .shared
                    .engine
                    .call_blocking(move |engine| engine.set_update_hook(observer));
                tolerate_unsupported(result)?;
            }
            Delivery::Detached => {
                self.shared.engine.post(move |engine| {
                    if let Err(err) = engine.set_update_hook(observer) {
                        tracing::warn!(error = %err, "failed to update engine update hook");
                    }
                });
            }
        }

        *installed = wanted;
        tracing::debug!(database = %self.shared.name, installed = wanted, "update observer changed");
        Ok(())
    }
}

/// Observer installed in the engine on behalf of the connection.
fn update_observer(
    user_update: Arc<Mutex<Option<UpdateCallback>>>,
    reactive: Arc<ReactiveRegistry>,
) -> UpdateCallback {
    Arc::new(move |event| {
        let hook = match safe_lock_arc(&user_update, "update observer") {
            Ok(slot) => slot.clone(),
            Err(err) => {
                tracing::error!(error = %err, "update hook slot unavailable");
                None
            }
        };
        if let Some(hook) = hook {
            hook(event);
        }
        reactive.mark(event);
    })
}

fn tolerate_unsupported(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::Unsupported(what)) => {
            tracing::warn!(hook = what, "engine does not support hooks, ignoring");
            Ok(())
        }
        other => other,
    }
}
