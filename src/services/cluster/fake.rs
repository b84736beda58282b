//! Scripted in-memory driver for exercising the connection manager

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ClusterDriver, ClusterHandle, DriverError, ProbeResult, SharedHandle};
use crate::services::credentials::Credential;

#[derive(Debug)]
pub(crate) struct FakeHandle {
    id: usize,
    bucket: String,
    username: String,
    closed: AtomicBool,
    healthy: AtomicBool,
    probes: AtomicU32,
    ping_delay: Mutex<Duration>,
}

impl FakeHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Make subsequent pings fail
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Hold each ping for `delay` before checking the handle's state
    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl ClusterHandle for FakeHandle {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn probe(&self, _key: &str) -> Result<ProbeResult, DriverError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        Ok(ProbeResult::NotFound)
    }

    async fn ping(&self) -> Result<(), DriverError> {
        let delay = *self.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(DriverError::Unreachable("node down".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Driver whose `open` outcomes are scripted by the test
#[derive(Default)]
pub(crate) struct FakeDriver {
    script: Mutex<VecDeque<DriverError>>,
    persistent_failure: Mutex<Option<DriverError>>,
    rejected_users: Mutex<HashSet<String>>,
    open_delay: Mutex<Duration>,
    opens: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `open` with `err`; queued failures are consumed in order
    pub fn fail_next(&self, err: DriverError) {
        self.script.lock().unwrap().push_back(err);
    }

    /// Fail every `open` with `err` until cleared
    pub fn fail_always(&self, err: Option<DriverError>) {
        *self.persistent_failure.lock().unwrap() = err;
    }

    /// Reject this username as unauthorized
    pub fn reject_user(&self, username: &str) {
        self.rejected_users.lock().unwrap().insert(username.to_string());
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn handle(&self, index: usize) -> Arc<FakeHandle> {
        self.handles.lock().unwrap()[index].clone()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    fn outcome(&self, credential: &Credential) -> Option<DriverError> {
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Some(err);
        }
        if let Some(err) = self.persistent_failure.lock().unwrap().clone() {
            return Some(err);
        }
        if self.rejected_users.lock().unwrap().contains(credential.username()) {
            return Some(DriverError::Unauthorized(format!(
                "user {} not recognized",
                credential.username()
            )));
        }
        None
    }
}

#[async_trait]
impl ClusterDriver for FakeDriver {
    async fn open(
        &self,
        _target: &str,
        bucket: &str,
        credential: &Credential,
    ) -> Result<SharedHandle, DriverError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcome(credential);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = outcome {
            return Err(err);
        }

        let mut handles = self.handles.lock().unwrap();
        let handle = Arc::new(FakeHandle {
            id: handles.len(),
            bucket: bucket.to_string(),
            username: credential.username().to_string(),
            closed: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            probes: AtomicU32::new(0),
            ping_delay: Mutex::new(Duration::ZERO),
        });
        handles.push(handle.clone());
        Ok(handle)
    }
}

/// Whether two shared handles point at the same object
pub(crate) fn same_handle(a: &SharedHandle, b: &Arc<FakeHandle>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
