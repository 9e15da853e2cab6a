//! Plugin manager.
//!
//! The plugin manager owns one instance of every registered adapter and one
//! session cache per adapter. It drives sync-in and sync-out across the
//! adapters sequentially, in registry order, and serves get/set/delete from
//! the caches in between.
//!
//! Adapter completions arrive as [`EngineEvent`]s and are fed back through
//! [`PluginManager::handle_event`]. When a whole pass finishes, the manager
//! posts [`EngineEvent::Finished`] onto the same queue, so the caller always
//! observes the result on a later turn of its event loop.

use provd_core::{
    is_under, validate_key, Adapter, Completion, EngineEvent, EventSender, NodeKind, ProvError,
    ProvResult, Registry, Settings,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The current state of the plugin manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No sync in progress; caches may be read and written.
    Idle,
    /// Populating caches from the adapters.
    SyncIn,
    /// Flushing caches to the adapters.
    SyncOut,
}

impl ManagerState {
    /// Returns true while a sync pass is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, ManagerState::SyncIn | ManagerState::SyncOut)
    }
}

/// Drives adapters through sync-in/sync-out and serves the session caches.
pub struct PluginManager {
    registry: Arc<Registry>,
    adapters: Vec<Box<dyn Adapter>>,
    caches: Vec<Option<Settings>>,
    state: ManagerState,
    cursor: usize,
    context_id: String,
    ticket: u64,
    completion_pending: bool,
    cancel_requested: bool,
    events: EventSender,
}

impl PluginManager {
    /// Checks the registry and instantiates every adapter.
    pub fn new(registry: Arc<Registry>, events: EventSender) -> ProvResult<Self> {
        registry.check()?;

        let adapters = registry
            .iter()
            .map(|descriptor| {
                descriptor.create().map_err(|e| {
                    warn!(adapter = descriptor.name(), error = %e, "unable to instantiate adapter");
                    e
                })
            })
            .collect::<ProvResult<Vec<_>>>()?;

        let caches = vec![None; adapters.len()];

        Ok(Self {
            registry,
            adapters,
            caches,
            state: ManagerState::Idle,
            cursor: 0,
            context_id: String::new(),
            ticket: 0,
            completion_pending: false,
            cancel_requested: false,
            events,
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Returns true while a sync pass is running.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Returns the registry the manager was built from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the session cache of the adapter at `index`, if populated.
    pub fn cache(&self, index: usize) -> Option<&Settings> {
        self.caches.get(index).and_then(Option::as_ref)
    }

    /// Starts populating the caches for a session on `context_id`.
    ///
    /// Adapters that reject the call or fail are skipped; their keys are
    /// inaccessible for the session. The pass finishes with
    /// [`EngineEvent::Finished`].
    pub fn sync_in(&mut self, context_id: &str) -> ProvResult<()> {
        self.begin(ManagerState::SyncIn)?;
        self.context_id = context_id.to_string();
        self.clear_caches();
        info!(context_id, "sync-in started");
        self.sync_in_next();
        Ok(())
    }

    /// Starts flushing every populated cache to its adapter.
    pub fn sync_out(&mut self) -> ProvResult<()> {
        self.begin(ManagerState::SyncOut)?;
        info!("sync-out started");
        self.sync_out_next();
        Ok(())
    }

    /// Requests cancellation of the running pass.
    ///
    /// Returns true if a [`EngineEvent::Finished`] is still to be delivered,
    /// either because one is already queued or because the in-flight adapter
    /// was asked to cancel. Returns false when nothing is running.
    pub fn cancel(&mut self) -> bool {
        if self.completion_pending {
            return true;
        }

        let adapter = self.adapters.get_mut(self.cursor);
        match (self.state, adapter) {
            (ManagerState::SyncIn, Some(adapter)) => {
                info!(index = self.cursor, "cancelling sync-in");
                self.cancel_requested = true;
                adapter.cancel_sync_in();
                true
            }
            (ManagerState::SyncOut, Some(adapter)) => {
                info!(index = self.cursor, "cancelling sync-out");
                self.cancel_requested = true;
                adapter.cancel_sync_out();
                true
            }
            _ => false,
        }
    }

    /// Feeds an event from the engine queue into the state machine.
    ///
    /// Returns the outcome of a whole pass when `event` is its
    /// [`EngineEvent::Finished`]; adapter completions return `None`.
    pub fn handle_event(&mut self, event: EngineEvent) -> Option<ProvResult<()>> {
        match event {
            EngineEvent::SyncIn {
                ticket,
                index,
                result,
            } => {
                if self.is_current(ticket, index, ManagerState::SyncIn) {
                    self.sync_in_done(index, result);
                } else {
                    debug!(ticket, index, "ignoring stale sync-in completion");
                }
                None
            }
            EngineEvent::SyncOut {
                ticket,
                index,
                result,
            } => {
                if self.is_current(ticket, index, ManagerState::SyncOut) {
                    self.sync_out_done(index, result);
                } else {
                    debug!(ticket, index, "ignoring stale sync-out completion");
                }
                None
            }
            EngineEvent::Finished { result } => {
                self.completion_pending = false;
                Some(result)
            }
        }
    }

    /// Reads the cached value of `key`.
    pub fn get(&self, key: &str) -> ProvResult<String> {
        self.ensure_idle()?;
        validate_key(key)?;

        let index = self.registry.find_owner(key)?;
        self.cache_at(index)?
            .get(key)
            .cloned()
            .ok_or_else(|| ProvError::denied(key))
    }

    /// Returns every cached setting equal to or below `prefix`, across all
    /// adapters.
    pub fn get_all(&self, prefix: &str) -> ProvResult<Settings> {
        self.ensure_idle()?;
        validate_key(prefix)?;

        if self.registry.find_owner(prefix).is_err()
            && self.registry.find_children(prefix).is_empty()
        {
            return Err(ProvError::not_found(prefix));
        }

        Ok(self
            .caches
            .iter()
            .flatten()
            .flat_map(|cache| cache.iter())
            .filter(|(key, _)| is_under(key, prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// Validates and caches `key = value`.
    pub fn set(&mut self, key: &str, value: &str) -> ProvResult<()> {
        self.ensure_idle()?;
        self.set_one(key, value)
    }

    /// Sets every entry independently and returns the keys that failed.
    ///
    /// Keys are trimmed of surrounding whitespace first.
    pub fn set_all(&mut self, settings: &Settings) -> ProvResult<Vec<String>> {
        self.ensure_idle()?;

        let mut failed = Vec::new();
        for (key, value) in settings {
            let key = key.trim();
            match self.set_one(key, value) {
                Ok(()) => debug!(key, value = value.as_str(), "set"),
                Err(e) => {
                    warn!(key, error = %e, "unable to set");
                    failed.push(key.to_string());
                }
            }
        }
        Ok(failed)
    }

    /// Deletes `key` from the caches.
    ///
    /// A key owned by an adapter is classified by that adapter as a leaf or
    /// a directory. A key above several adapter roots (such as `/`) deletes
    /// every child root's subtree, ignoring per-adapter failures.
    pub fn delete(&mut self, key: &str) -> ProvResult<()> {
        self.ensure_idle()?;
        validate_key(key)?;

        let result = match self.registry.find_owner(key) {
            Ok(index) => self.delete_in(index, key),
            Err(_) => {
                let registry = Arc::clone(&self.registry);
                let children = registry.find_children(key);
                if children.is_empty() {
                    Err(ProvError::not_found(key))
                } else {
                    for index in children {
                        let Some(descriptor) = registry.get(index) else {
                            continue;
                        };
                        if let Err(e) = self.delete_in(index, descriptor.root_dir()) {
                            debug!(adapter = descriptor.name(), error = %e, "unable to delete subtree");
                        }
                    }
                    Ok(())
                }
            }
        };

        debug!(key, ok = result.is_ok(), "delete");
        result
    }

    fn begin(&mut self, state: ManagerState) -> ProvResult<()> {
        if self.state.is_busy() || self.completion_pending {
            return Err(ProvError::denied("sync already in progress"));
        }
        self.state = state;
        self.cursor = 0;
        self.cancel_requested = false;
        Ok(())
    }

    fn ensure_idle(&self) -> ProvResult<()> {
        if self.state.is_busy() {
            Err(ProvError::denied("sync in progress"))
        } else {
            Ok(())
        }
    }

    fn is_current(&self, ticket: u64, index: usize, state: ManagerState) -> bool {
        self.state == state && self.ticket == ticket && self.cursor == index
    }

    fn adapter_name(&self, index: usize) -> &str {
        self.registry.get(index).map_or("?", |d| d.name())
    }

    fn cache_at(&self, index: usize) -> ProvResult<&Settings> {
        self.caches
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| ProvError::Corrupt(format!("no cache for {}", self.adapter_name(index))))
    }

    fn cache_mut(&mut self, index: usize) -> ProvResult<&mut Settings> {
        let registry = &self.registry;
        self.caches
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                let name = registry.get(index).map_or("?", |d| d.name());
                ProvError::Corrupt(format!("no cache for {name}"))
            })
    }

    fn set_one(&mut self, key: &str, value: &str) -> ProvResult<()> {
        validate_key(key)?;
        let index = self.registry.find_owner(key)?;

        self.cache_at(index)?;
        self.adapters[index].validate_set(key, value)?;
        self.cache_mut(index)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_in(&mut self, index: usize, key: &str) -> ProvResult<()> {
        let key = match key.strip_suffix('/') {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => key,
        };

        self.cache_at(index)?;
        let kind = self.adapters[index].validate_del(key)?;
        let cache = self.cache_mut(index)?;

        match kind {
            NodeKind::Leaf => cache
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| ProvError::not_found(key)),
            NodeKind::Directory => {
                let dir = format!("{key}/");
                let before = cache.len();
                cache.retain(|existing, _| !existing.starts_with(&dir));
                if cache.len() == before {
                    Err(ProvError::not_found(key))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn sync_in_next(&mut self) {
        while self.cursor < self.adapters.len() {
            let index = self.cursor;
            self.ticket += 1;
            let done = Completion::sync_in(self.ticket, index, self.events.clone());

            match self.adapters[index].sync_in(&self.context_id, done) {
                Ok(()) => {
                    debug!(adapter = self.adapter_name(index), "sync-in accepted");
                    return;
                }
                Err(e) => {
                    warn!(adapter = self.adapter_name(index), error = %e, "sync-in rejected");
                    self.cursor += 1;
                }
            }
        }
        self.schedule_completion(Ok(()));
    }

    fn sync_in_done(&mut self, index: usize, result: ProvResult<Settings>) {
        let result = if self.cancel_requested {
            Err(ProvError::Cancelled)
        } else {
            result
        };

        match result {
            Ok(mut settings) => {
                if let Some(descriptor) = self.registry.get(index) {
                    settings.retain(|key, _| descriptor.owns(key));
                }
                info!(adapter = self.adapter_name(index), keys = settings.len(), "sync-in completed");
                self.caches[index] = Some(settings);
            }
            Err(ProvError::Cancelled) => {
                info!(adapter = self.adapter_name(index), "sync-in cancelled");
                self.clear_caches();
                self.schedule_completion(Err(ProvError::Cancelled));
                return;
            }
            Err(e) => {
                warn!(adapter = self.adapter_name(index), error = %e, "sync-in failed");
            }
        }

        self.cursor += 1;
        self.sync_in_next();
    }

    fn sync_out_next(&mut self) {
        while self.cursor < self.adapters.len() {
            let index = self.cursor;
            match self.caches[index].take() {
                Some(settings) => {
                    self.ticket += 1;
                    let done = Completion::sync_out(self.ticket, index, self.events.clone());
                    match self.adapters[index].sync_out(settings, done) {
                        Ok(()) => {
                            debug!(adapter = self.adapter_name(index), "sync-out accepted");
                            return;
                        }
                        Err(e) => {
                            warn!(adapter = self.adapter_name(index), error = %e, "sync-out rejected");
                        }
                    }
                }
                None => debug!(adapter = self.adapter_name(index), "no cache, skipping sync-out"),
            }
            self.cursor += 1;
        }

        // TODO: reschedule failed sync-outs once backends report which
        // objects were left unapplied.
        self.clear_caches();
        self.schedule_completion(Ok(()));
    }

    fn sync_out_done(&mut self, index: usize, result: ProvResult<()>) {
        let result = if self.cancel_requested {
            Err(ProvError::Cancelled)
        } else {
            result
        };

        match result {
            Ok(()) => info!(adapter = self.adapter_name(index), "sync-out completed"),
            Err(ProvError::Cancelled) => {
                info!(adapter = self.adapter_name(index), "sync-out cancelled");
                self.clear_caches();
                self.schedule_completion(Err(ProvError::Cancelled));
                return;
            }
            Err(e) => warn!(adapter = self.adapter_name(index), error = %e, "sync-out failed"),
        }

        self.cursor += 1;
        self.sync_out_next();
    }

    fn clear_caches(&mut self) {
        self.caches.iter_mut().for_each(|cache| *cache = None);
    }

    fn schedule_completion(&mut self, result: ProvResult<()>) {
        // Invalidates any completion still held for the finished pass.
        self.ticket += 1;
        self.state = ManagerState::Idle;
        self.context_id.clear();

        if !self.completion_pending {
            self.completion_pending = true;
            let _ = self.events.send(EngineEvent::Finished { result });
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        for adapter in &mut self.adapters {
            adapter.destroy();
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("registry", &self.registry)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("completion_pending", &self.completion_pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use provd_core::{event_channel, EventReceiver};
    use provd_testkit::prelude::*;

    fn setup(adapters: &[(&str, &ScriptHandle)]) -> (PluginManager, EventReceiver) {
        let (tx, rx) = event_channel();
        let manager = PluginManager::new(registry_of(adapters), tx).unwrap();
        (manager, rx)
    }

    /// Feeds queued events to the manager until a pass finishes.
    fn drive(manager: &mut PluginManager, rx: &mut EventReceiver) -> Option<ProvResult<()>> {
        while let Ok(event) = rx.try_recv() {
            if let Some(result) = manager.handle_event(event) {
                return Some(result);
            }
        }
        None
    }

    #[test]
    fn sync_in_populates_caches() {
        let tel = ScriptHandle::new("/telephony/");
        tel.seed("/telephony/contexts/op1/apn", "internet");
        let (mut manager, mut rx) = setup(&[("tel", &tel)]);

        manager.sync_in("310150123456789").unwrap();
        assert_eq!(manager.state(), ManagerState::SyncIn);
        assert!(drive(&mut manager, &mut rx).unwrap().is_ok());

        assert_eq!(manager.state(), ManagerState::Idle);
        assert_eq!(manager.get("/telephony/contexts/op1/apn").unwrap(), "internet");
        assert_eq!(tel.sync_in_calls(), vec!["310150123456789".to_string()]);
    }

    #[test]
    fn sets_reach_backend_only_at_sync_out() {
        let tel = ScriptHandle::new("/telephony/");
        let (mut manager, mut rx) = setup(&[("tel", &tel)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        manager.set("/telephony/contexts/op1/apn", "internet").unwrap();
        assert_eq!(manager.get("/telephony/contexts/op1/apn").unwrap(), "internet");
        assert!(tel.backend().is_empty());

        manager.sync_out().unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        assert_eq!(
            tel.backend().get("/telephony/contexts/op1/apn").map(String::as_str),
            Some("internet")
        );
        // caches are consumed by sync-out
        assert!(manager.cache(0).is_none());
        assert!(matches!(
            manager.get("/telephony/contexts/op1/apn"),
            Err(ProvError::Corrupt(_))
        ));
    }

    #[test]
    fn get_errors() {
        let tel = ScriptHandle::new("/telephony/");
        let (mut manager, mut rx) = setup(&[("tel", &tel)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        assert!(matches!(manager.get("/telephony/mms/apn"), Err(ProvError::Denied(_))));
        assert!(matches!(manager.get("/applications/x"), Err(ProvError::NotFound(_))));
        assert!(matches!(manager.get("telephony"), Err(ProvError::BadArgs(_))));
        assert!(matches!(
            manager.set("/telephony//apn", "x"),
            Err(ProvError::BadArgs(_))
        ));
    }

    #[test]
    fn get_all_respects_path_boundaries() {
        let apps = ScriptHandle::new("/applications/");
        let foo = ScriptHandle::new("/applicationsFoo/");
        apps.seed("/applications", "top");
        apps.seed("/applications/x", "1");
        foo.seed("/applicationsFoo/x", "2");
        let (mut manager, mut rx) = setup(&[("apps", &apps), ("foo", &foo)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        let all = manager.get_all("/applications").unwrap();
        assert_eq!(all, settings(&[("/applications", "top"), ("/applications/x", "1")]));

        let everything = manager.get_all("/").unwrap();
        assert_eq!(everything.len(), 3);

        assert!(matches!(manager.get_all("/telephony"), Err(ProvError::NotFound(_))));
    }

    #[test]
    fn set_all_collects_failures() {
        let tel = ScriptHandle::new("/telephony/");
        tel.deny("/telephony/contexts/op1/password");
        let (mut manager, mut rx) = setup(&[("tel", &tel)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        let failed = manager
            .set_all(&settings(&[
                ("/telephony/contexts/op1/apn", "internet"),
                ("/telephony/contexts/op1/password", "secret"),
                (" /telephony/contexts/op1/username ", "user"),
            ]))
            .unwrap();

        assert_eq!(failed, vec!["/telephony/contexts/op1/password".to_string()]);
        assert_eq!(manager.get("/telephony/contexts/op1/apn").unwrap(), "internet");
        assert_eq!(manager.get("/telephony/contexts/op1/username").unwrap(), "user");
    }

    #[test]
    fn delete_leaf_and_directory() {
        let tel = ScriptHandle::new("/telephony/");
        tel.set_leaf_depth(3);
        tel.seed("/telephony/contexts/op1/apn", "internet");
        tel.seed("/telephony/contexts/op1/name", "Op");
        tel.seed("/telephony/contexts/op2/apn", "wap");
        let (mut manager, mut rx) = setup(&[("tel", &tel)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        manager.delete("/telephony/contexts/op1/apn").unwrap();
        assert!(matches!(
            manager.delete("/telephony/contexts/op1/apn"),
            Err(ProvError::NotFound(_))
        ));

        // trailing slash is ignored
        manager.delete("/telephony/contexts/op2/").unwrap();
        let left = manager.get_all("/telephony").unwrap();
        assert_eq!(left, settings(&[("/telephony/contexts/op1/name", "Op")]));

        assert!(matches!(
            manager.delete("/telephony/contexts/op9"),
            Err(ProvError::NotFound(_))
        ));
    }

    #[test]
    fn delete_cascades_over_children() {
        let email = ScriptHandle::new("/applications/email/");
        let sync = ScriptHandle::new("/applications/sync/");
        let tel = ScriptHandle::new("/telephony/");
        email.seed("/applications/email/work/name", "Work");
        tel.seed("/telephony/mms/apn", "mms");
        let (mut manager, mut rx) = setup(&[("email", &email), ("sync", &sync), ("tel", &tel)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        // the empty sync adapter fails silently
        manager.delete("/applications").unwrap();
        assert!(manager.get_all("/applications").unwrap().is_empty());
        assert_eq!(manager.get("/telephony/mms/apn").unwrap(), "mms");

        manager.delete("/").unwrap();
        assert!(manager.get_all("/").unwrap().is_empty());

        assert!(matches!(manager.delete("/nothing"), Err(ProvError::NotFound(_))));
    }

    #[test]
    fn cancel_mid_sync_in_clears_every_cache() {
        let a = ScriptHandle::new("/a/");
        let b = ScriptHandle::new("/b/");
        let c = ScriptHandle::new("/c/");
        a.seed("/a/x/y", "1");
        b.set_sync_in(Behavior::Hold);
        let (mut manager, mut rx) = setup(&[("a", &a), ("b", &b), ("c", &c)]);

        manager.sync_in("").unwrap();
        assert!(drive(&mut manager, &mut rx).is_none());
        assert!(manager.cache(0).is_some());
        assert!(b.holding_sync_in());

        assert!(manager.cancel());
        let result = drive(&mut manager, &mut rx).unwrap();
        assert!(result.unwrap_err().is_cancelled());

        assert!((0..3).all(|i| manager.cache(i).is_none()));
        assert!(c.sync_in_calls().is_empty());
        assert_eq!(b.cancels(), 1);
    }

    #[test]
    fn cancel_reports_pending_completion() {
        let tel = ScriptHandle::new("/telephony/");
        tel.set_sync_in(Behavior::Reject);
        let (mut manager, mut rx) = setup(&[("tel", &tel)]);
        assert!(!manager.cancel());

        manager.sync_in("").unwrap();
        // every adapter rejected, so the pass is over but its completion is
        // still queued
        assert_eq!(manager.state(), ManagerState::Idle);
        assert!(manager.cancel());
        assert!(drive(&mut manager, &mut rx).unwrap().is_ok());
        assert!(!manager.cancel());
    }

    #[test]
    fn rejected_adapter_is_skipped() {
        let a = ScriptHandle::new("/a/");
        let b = ScriptHandle::new("/b/");
        a.set_sync_in(Behavior::Reject);
        b.seed("/b/x/y", "1");
        let (mut manager, mut rx) = setup(&[("a", &a), ("b", &b)]);

        manager.sync_in("").unwrap();
        assert!(drive(&mut manager, &mut rx).unwrap().is_ok());

        assert!(manager.cache(0).is_none());
        assert!(matches!(manager.set("/a/x/y", "2"), Err(ProvError::Corrupt(_))));
        assert_eq!(manager.get("/b/x/y").unwrap(), "1");
        // the rejected adapter's dropped completion is stale
        assert!(drive(&mut manager, &mut rx).is_none());
    }

    #[test]
    fn failed_adapter_is_skipped() {
        let a = ScriptHandle::new("/a/");
        let b = ScriptHandle::new("/b/");
        a.set_sync_in(Behavior::Fail);
        let (mut manager, mut rx) = setup(&[("a", &a), ("b", &b)]);

        manager.sync_in("").unwrap();
        assert!(drive(&mut manager, &mut rx).unwrap().is_ok());
        assert!(manager.cache(0).is_none());
        assert!(manager.cache(1).is_some());
    }

    #[test]
    fn busy_manager_denies_cache_access() {
        let tel = ScriptHandle::new("/telephony/");
        tel.set_sync_out(Behavior::Hold);
        let (mut manager, mut rx) = setup(&[("tel", &tel)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        manager.sync_out().unwrap();
        assert!(manager.is_busy());
        assert!(matches!(manager.get("/telephony/x"), Err(ProvError::Denied(_))));
        assert!(matches!(manager.sync_in(""), Err(ProvError::Denied(_))));

        assert!(tel.release_sync_out());
        assert!(drive(&mut manager, &mut rx).unwrap().is_ok());
        assert!(!manager.is_busy());
    }

    #[test]
    fn sync_out_visits_only_populated_caches() {
        let a = ScriptHandle::new("/a/");
        let b = ScriptHandle::new("/b/");
        b.set_sync_in(Behavior::Reject);
        let (mut manager, mut rx) = setup(&[("a", &a), ("b", &b)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        manager.sync_out().unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        // an empty cache is still flushed
        assert_eq!(a.sync_out_calls(), vec![Settings::new()]);
        assert!(b.sync_out_calls().is_empty());
    }

    #[test]
    fn cancel_mid_sync_out() {
        let a = ScriptHandle::new("/a/");
        let b = ScriptHandle::new("/b/");
        a.set_sync_out(Behavior::Hold);
        let (mut manager, mut rx) = setup(&[("a", &a), ("b", &b)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();

        manager.sync_out().unwrap();
        assert!(manager.cancel());
        assert!(drive(&mut manager, &mut rx).unwrap().unwrap_err().is_cancelled());
        assert!(b.sync_out_calls().is_empty());
        assert!(manager.cache(1).is_none());
    }

    #[test]
    fn adapters_destroyed_with_manager() {
        let tel = ScriptHandle::new("/telephony/");
        let (manager, _rx) = setup(&[("tel", &tel)]);
        drop(manager);
        assert!(tel.destroyed());
    }

    #[test]
    fn overlapping_registry_is_rejected() {
        let a = ScriptHandle::new("/applications/");
        let b = ScriptHandle::new("/applications/email/");
        let (tx, _rx) = event_channel();
        let result = PluginManager::new(registry_of(&[("a", &a), ("b", &b)]), tx);
        assert!(matches!(result, Err(ProvError::Corrupt(_))));
    }

    fn synced(tel: &ScriptHandle) -> (PluginManager, EventReceiver) {
        let (mut manager, mut rx) = setup(&[("tel", tel)]);
        manager.sync_in("").unwrap();
        drive(&mut manager, &mut rx).unwrap().unwrap();
        (manager, rx)
    }

    proptest! {
        #[test]
        fn set_all_is_visible_through_get_all(values in settings_strategy("/telephony/contexts/")) {
            let tel = ScriptHandle::new("/telephony/");
            let (mut manager, _rx) = synced(&tel);

            prop_assert!(manager.set_all(&values).unwrap().is_empty());
            prop_assert_eq!(manager.get_all("/telephony").unwrap(), values);
        }

        #[test]
        fn single_set_reaches_backend_at_sync_out(
            key in key_strategy("/telephony/"),
            value in "[a-z0-9]{1,8}",
        ) {
            let tel = ScriptHandle::new("/telephony/");
            let (mut manager, mut rx) = synced(&tel);

            manager.set(&key, &value).unwrap();
            prop_assert_eq!(manager.get(&key).unwrap(), value.clone());
            prop_assert!(tel.backend().is_empty());

            manager.sync_out().unwrap();
            drive(&mut manager, &mut rx).unwrap().unwrap();
            let backend = tel.backend();
            prop_assert_eq!(backend.get(&key), Some(&value));
        }
    }
}
