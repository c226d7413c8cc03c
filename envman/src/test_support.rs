//! Test-only fakes for the process, clock, id and storage seams.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use serde_json::Value;

use crate::error::{ProcessError, StoreError};
use crate::io::clock::Clock;
use crate::io::ids::IdSource;
use crate::io::kv::KeyValueStore;
use crate::io::process::ProcessInvoker;

/// Replays canned results in order and records the arguments it was called with.
///
/// Calls beyond the script fail.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    script: RefCell<VecDeque<Result<String, String>>>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next call succeeds with `stdout`.
    pub fn ok(self, stdout: &str) -> Self {
        self.script.borrow_mut().push_back(Ok(stdout.to_string()));
        self
    }

    /// Next call exits with status 1 and `stderr`.
    pub fn fail(self, stderr: &str) -> Self {
        self.script.borrow_mut().push_back(Err(stderr.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl ProcessInvoker for ScriptedInvoker {
    fn invoke(&self, args: &[&str]) -> Result<String, ProcessError> {
        self.calls
            .borrow_mut()
            .push(args.iter().map(|arg| arg.to_string()).collect());
        match self.script.borrow_mut().pop_front() {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(stderr)) => Err(ProcessError::Failed {
                program: "reg.exe".to_string(),
                code: Some(1),
                stderr,
            }),
            None => Err(ProcessError::Failed {
                program: "reg.exe".to_string(),
                code: Some(1),
                stderr: "unscripted call".to_string(),
            }),
        }
    }
}

/// Clock that advances one millisecond per reading.
#[derive(Debug)]
pub struct TickClock {
    next: Cell<i64>,
}

impl TickClock {
    pub fn starting_at(millis: i64) -> Self {
        Self {
            next: Cell::new(millis),
        }
    }
}

impl Clock for TickClock {
    fn now_millis(&self) -> i64 {
        let now = self.next.get();
        self.next.set(now + 1);
        now
    }
}

/// Ids `<prefix>-1`, `<prefix>-2`, ...
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    counter: Cell<u64>,
}

impl SequentialIds {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            counter: Cell::new(0),
        }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.counter.get() + 1;
        self.counter.set(n);
        format!("{}-{n}", self.prefix)
    }
}

/// Store whose writes always fail; reads see nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    fn set(&self, key: &str, _value: &Value) -> Result<(), StoreError> {
        Err(StoreError::io(
            key,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only store"),
        ))
    }
}
