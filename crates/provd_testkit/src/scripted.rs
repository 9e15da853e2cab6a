//! Scripted in-memory adapter.
//!
//! A [`ScriptHandle`] holds the backend state and the script shared by every
//! adapter instance its descriptor creates, so a test keeps full control
//! after the registry has taken ownership of the adapters.

use parking_lot::Mutex;
use provd_core::{
    Adapter, AdapterDescriptor, Diff, NodeKind, ProvError, ProvResult, Settings,
    SyncInCompletion, SyncOutCompletion,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// How the adapter answers a sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    /// Complete successfully right away.
    #[default]
    Complete,
    /// Complete right away with a subsystem error.
    Fail,
    /// Reject the call synchronously.
    Reject,
    /// Keep the completion until the test releases it or the call is
    /// cancelled.
    Hold,
}

#[derive(Default)]
struct ScriptState {
    backend: Settings,
    snapshot: Settings,
    sync_in: Behavior,
    sync_out: Behavior,
    held_in: Option<SyncInCompletion>,
    held_out: Option<(SyncOutCompletion, Settings)>,
    sync_in_calls: Vec<String>,
    sync_out_calls: Vec<Settings>,
    diffs: Vec<Diff>,
    cancels: usize,
    denied: BTreeSet<String>,
    leaf_depth: usize,
    destroyed: bool,
}

/// Shared control surface for scripted adapters.
#[derive(Clone)]
pub struct ScriptHandle {
    root: Arc<str>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Creates a script for an adapter owning `root`.
    pub fn new(root: &str) -> Self {
        Self {
            root: Arc::from(root),
            state: Arc::new(Mutex::new(ScriptState {
                leaf_depth: 2,
                ..ScriptState::default()
            })),
        }
    }

    /// Returns a registry descriptor creating adapters bound to this script.
    pub fn descriptor(&self, name: &str) -> AdapterDescriptor {
        let handle = self.clone();
        AdapterDescriptor::new(name, self.root.to_string(), move || {
            Ok(Box::new(ScriptedAdapter::new(handle.clone())) as Box<dyn Adapter>)
        })
    }

    /// Seeds the backend with a value.
    pub fn seed(&self, key: &str, value: &str) {
        self.state
            .lock()
            .backend
            .insert(key.to_string(), value.to_string());
    }

    /// Returns the current backend contents.
    pub fn backend(&self) -> Settings {
        self.state.lock().backend.clone()
    }

    /// Sets how sync-in is answered.
    pub fn set_sync_in(&self, behavior: Behavior) {
        self.state.lock().sync_in = behavior;
    }

    /// Sets how sync-out is answered.
    pub fn set_sync_out(&self, behavior: Behavior) {
        self.state.lock().sync_out = behavior;
    }

    /// Makes `validate_set` deny `key`.
    pub fn deny(&self, key: &str) {
        self.state.lock().denied.insert(key.to_string());
    }

    /// Sets the number of path segments below the root from which a key is
    /// a leaf. Shallower keys are directories. Defaults to 2.
    pub fn set_leaf_depth(&self, depth: usize) {
        self.state.lock().leaf_depth = depth;
    }

    /// Returns true if a sync-in completion is being held.
    pub fn holding_sync_in(&self) -> bool {
        self.state.lock().held_in.is_some()
    }

    /// Returns true if a sync-out completion is being held.
    pub fn holding_sync_out(&self) -> bool {
        self.state.lock().held_out.is_some()
    }

    /// Completes a held sync-in with the current backend contents.
    pub fn release_sync_in(&self) -> bool {
        let (done, backend) = {
            let mut state = self.state.lock();
            let Some(done) = state.held_in.take() else {
                return false;
            };
            state.snapshot = state.backend.clone();
            (done, state.backend.clone())
        };
        done.complete(Ok(backend));
        true
    }

    /// Completes a held sync-out, applying its settings to the backend.
    pub fn release_sync_out(&self) -> bool {
        let done = {
            let mut state = self.state.lock();
            let Some((done, settings)) = state.held_out.take() else {
                return false;
            };
            state.backend = settings;
            done
        };
        done.complete(Ok(()));
        true
    }

    /// Returns the context ids of every sync-in call.
    pub fn sync_in_calls(&self) -> Vec<String> {
        self.state.lock().sync_in_calls.clone()
    }

    /// Returns the settings passed to every sync-out call.
    pub fn sync_out_calls(&self) -> Vec<Settings> {
        self.state.lock().sync_out_calls.clone()
    }

    /// Returns the diff of every sync-out call against the preceding
    /// sync-in, grouping contexts directly below the root.
    pub fn diffs(&self) -> Vec<Diff> {
        self.state.lock().diffs.clone()
    }

    /// Returns how many cancellations were requested.
    pub fn cancels(&self) -> usize {
        self.state.lock().cancels
    }

    /// Returns true once an adapter bound to this script was destroyed.
    pub fn destroyed(&self) -> bool {
        self.state.lock().destroyed
    }
}

impl std::fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Adapter whose behavior is driven by a [`ScriptHandle`].
#[derive(Debug)]
pub struct ScriptedAdapter {
    handle: ScriptHandle,
}

impl ScriptedAdapter {
    /// Creates an adapter bound to `handle`.
    pub fn new(handle: ScriptHandle) -> Self {
        Self { handle }
    }
}

impl Adapter for ScriptedAdapter {
    fn sync_in(&mut self, context_id: &str, done: SyncInCompletion) -> ProvResult<()> {
        let mut state = self.handle.state.lock();
        state.sync_in_calls.push(context_id.to_string());

        let behavior = state.sync_in;
        match behavior {
            Behavior::Complete => {
                state.snapshot = state.backend.clone();
                let backend = state.backend.clone();
                drop(state);
                done.complete(Ok(backend));
            }
            Behavior::Fail => {
                drop(state);
                done.complete(Err(ProvError::subsystem("scripted sync-in failure")));
            }
            Behavior::Reject => return Err(ProvError::subsystem("scripted sync-in rejection")),
            Behavior::Hold => state.held_in = Some(done),
        }
        Ok(())
    }

    fn cancel_sync_in(&mut self) {
        let held = {
            let mut state = self.handle.state.lock();
            state.cancels += 1;
            state.held_in.take()
        };
        if let Some(done) = held {
            done.complete(Err(ProvError::Cancelled));
        }
    }

    fn sync_out(&mut self, settings: Settings, done: SyncOutCompletion) -> ProvResult<()> {
        let mut state = self.handle.state.lock();
        let diff = Diff::compute(&state.snapshot, &settings, &self.handle.root);
        state.sync_out_calls.push(settings.clone());
        state.diffs.push(diff);

        let behavior = state.sync_out;
        match behavior {
            Behavior::Complete => {
                state.backend = settings;
                drop(state);
                done.complete(Ok(()));
            }
            Behavior::Fail => {
                drop(state);
                done.complete(Err(ProvError::subsystem("scripted sync-out failure")));
            }
            Behavior::Reject => return Err(ProvError::subsystem("scripted sync-out rejection")),
            Behavior::Hold => state.held_out = Some((done, settings)),
        }
        Ok(())
    }

    fn cancel_sync_out(&mut self) {
        let held = {
            let mut state = self.handle.state.lock();
            state.cancels += 1;
            state.held_out.take()
        };
        if let Some((done, _)) = held {
            done.complete(Err(ProvError::Cancelled));
        }
    }

    fn validate_set(&self, key: &str, _value: &str) -> ProvResult<()> {
        if self.handle.state.lock().denied.contains(key) {
            Err(ProvError::denied(key))
        } else {
            Ok(())
        }
    }

    fn validate_del(&self, key: &str) -> ProvResult<NodeKind> {
        let root_dir = self.handle.root.trim_end_matches('/');
        let depth = key
            .strip_prefix(root_dir)
            .map(|rest| rest.split('/').filter(|s| !s.is_empty()).count())
            .ok_or_else(|| ProvError::bad_key(key))?;

        if depth < self.handle.state.lock().leaf_depth {
            Ok(NodeKind::Directory)
        } else {
            Ok(NodeKind::Leaf)
        }
    }

    fn destroy(&mut self) {
        self.handle.state.lock().destroyed = true;
    }
}
