//! Collaborators used by the mock, stub and time-freeze directives.
//!
//! The core only relies on start/stop semantics ([`ScopedResource`]). [`InMemoryMocks`] and
//! [`FrozenClock`] are simple shared-state implementations: an action caller reads the active
//! patches, stubs and frozen instant from them and records the calls it observed.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::value::Value;

/// A start/stop paired external effect bound to a test-case or action-case lifetime.
pub trait ScopedResource: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn describe(&self) -> String;
}

/// One observed call on a patched target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockCall {
    /// Attribute path under the target that was called, empty for the target itself.
    #[serde(default)]
    pub path: String,
    /// `[args, kwargs]`.
    pub args: Value,
}

pub trait MockingCollaborator: Send + Sync {
    fn patch(&self, target: &str, patch: &Value) -> Box<dyn ScopedResource>;
    fn calls(&self, target: &str) -> Vec<MockCall>;
    fn stub_action(&self, service: &str, action: &str, stub: &Value) -> Box<dyn ScopedResource>;
    /// Request bodies the stubbed action received.
    fn stub_calls(&self, service: &str, action: &str) -> Vec<Value>;
}

pub trait TimeFreezer: Send + Sync {
    fn freeze(&self, at: NaiveDateTime) -> Box<dyn ScopedResource>;
}

/// The collaborators available to directive hooks. Either may be absent; directives that need
/// a missing one fail at set-up.
#[derive(Clone, Default)]
pub struct Harness {
    pub mocks: Option<Arc<dyn MockingCollaborator>>,
    pub clock: Option<Arc<dyn TimeFreezer>>,
}

impl Harness {
    pub fn new(mocks: Arc<dyn MockingCollaborator>, clock: Arc<dyn TimeFreezer>) -> Self {
        Self {
            mocks: Some(mocks),
            clock: Some(clock),
        }
    }
}

fn stub_key(service: &str, action: &str) -> String {
    format!("{service}.{action}")
}

#[derive(Debug, Default)]
struct MockState {
    patches: IndexMap<String, Vec<Value>>,
    stubs: IndexMap<String, Vec<Value>>,
    calls: IndexMap<String, Vec<MockCall>>,
    stub_calls: IndexMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Copy)]
enum Table {
    Patches,
    Stubs,
}

/// Patch and stub registry kept in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMocks {
    state: Arc<Mutex<MockState>>,
}

impl InMemoryMocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost active patch for `target`.
    pub fn active_patch(&self, target: &str) -> Option<Value> {
        self.state.lock().patches.get(target).and_then(|s| s.last().cloned())
    }

    pub fn active_stub(&self, service: &str, action: &str) -> Option<Value> {
        self.state
            .lock()
            .stubs
            .get(&stub_key(service, action))
            .and_then(|s| s.last().cloned())
    }

    pub fn record_call(&self, target: &str, call: MockCall) {
        self.state
            .lock()
            .calls
            .entry(target.to_string())
            .or_default()
            .push(call);
    }

    pub fn record_stub_call(&self, service: &str, action: &str, body: Value) {
        self.state
            .lock()
            .stub_calls
            .entry(stub_key(service, action))
            .or_default()
            .push(body);
    }

    /// Every active patch and stub, innermost wins: `{"mocks": {..}, "stubs": {..}}`.
    pub fn snapshot(&self) -> Value {
        let state = self.state.lock();
        let active = |table: &IndexMap<String, Vec<Value>>| {
            Value::Map(
                table
                    .iter()
                    .filter_map(|(k, stack)| stack.last().map(|v| (k.clone(), v.clone())))
                    .collect(),
            )
        };
        let mut out = IndexMap::new();
        out.insert("mocks".to_string(), active(&state.patches));
        out.insert("stubs".to_string(), active(&state.stubs));
        Value::Map(out)
    }

    fn resource(&self, table: Table, key: String, value: Value) -> Box<dyn ScopedResource> {
        Box::new(PatchResource {
            state: Arc::clone(&self.state),
            table,
            key,
            value,
            started: false,
        })
    }
}

impl MockingCollaborator for InMemoryMocks {
    fn patch(&self, target: &str, patch: &Value) -> Box<dyn ScopedResource> {
        self.resource(Table::Patches, target.to_string(), patch.clone())
    }

    fn calls(&self, target: &str) -> Vec<MockCall> {
        self.state.lock().calls.get(target).cloned().unwrap_or_default()
    }

    fn stub_action(&self, service: &str, action: &str, stub: &Value) -> Box<dyn ScopedResource> {
        self.resource(Table::Stubs, stub_key(service, action), stub.clone())
    }

    fn stub_calls(&self, service: &str, action: &str) -> Vec<Value> {
        self.state
            .lock()
            .stub_calls
            .get(&stub_key(service, action))
            .cloned()
            .unwrap_or_default()
    }
}

struct PatchResource {
    state: Arc<Mutex<MockState>>,
    table: Table,
    key: String,
    value: Value,
    started: bool,
}

impl ScopedResource for PatchResource {
    fn start(&mut self) -> Result<()> {
        self.push();
        self.started = true;
        debug!(resource = %self.describe(), "started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Err(anyhow!("{} stopped before it was started", self.describe()));
        }
        let mut state = self.state.lock();
        let stack = match self.table {
            Table::Patches => state.patches.get_mut(&self.key),
            Table::Stubs => state.stubs.get_mut(&self.key),
        };
        match stack.and_then(|s| s.pop()) {
            Some(_) => {
                self.started = false;
                debug!(resource = %self.describe(), "stopped");
                Ok(())
            }
            None => Err(anyhow!("{} was not active", self.describe())),
        }
    }

    fn describe(&self) -> String {
        match self.table {
            Table::Patches => format!("mock {}", self.key),
            Table::Stubs => format!("stub action {}", self.key),
        }
    }
}

impl PatchResource {
    /// Push the patch. Entering the outermost scope for a key forgets calls from earlier scopes.
    fn push(&self) {
        let mut state = self.state.lock();
        let state = &mut *state;
        match self.table {
            Table::Patches => {
                let stack = state.patches.entry(self.key.clone()).or_default();
                if stack.is_empty() {
                    state.calls.shift_remove(&self.key);
                }
                stack.push(self.value.clone());
            }
            Table::Stubs => {
                let stack = state.stubs.entry(self.key.clone()).or_default();
                if stack.is_empty() {
                    state.stub_calls.shift_remove(&self.key);
                }
                stack.push(self.value.clone());
            }
        }
    }
}

/// A clock that reports the innermost frozen instant.
#[derive(Debug, Clone, Default)]
pub struct FrozenClock {
    frozen: Arc<Mutex<Vec<NaiveDateTime>>>,
}

impl FrozenClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frozen_at(&self) -> Option<NaiveDateTime> {
        self.frozen.lock().last().copied()
    }
}

impl TimeFreezer for FrozenClock {
    fn freeze(&self, at: NaiveDateTime) -> Box<dyn ScopedResource> {
        Box::new(Freeze {
            frozen: Arc::clone(&self.frozen),
            at,
            started: false,
        })
    }
}

struct Freeze {
    frozen: Arc<Mutex<Vec<NaiveDateTime>>>,
    at: NaiveDateTime,
    started: bool,
}

impl ScopedResource for Freeze {
    fn start(&mut self) -> Result<()> {
        self.frozen.lock().push(self.at);
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Err(anyhow!("{} stopped before it was started", self.describe()));
        }
        self.frozen
            .lock()
            .pop()
            .map(|_| ())
            .ok_or_else(|| anyhow!("{} was not active", self.describe()))?;
        self.started = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("freeze time at {}", self.at)
    }
}
