//! In-process connector for exercising the supervisor without an upstream.
//!
//! Every opened channel is recorded; tests can fail opens per owner and kill
//! live channels to simulate a silent disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use archivist_core::{Archive, ArchiveId, OwnerId, Verbosity};
use async_trait::async_trait;

use crate::channel::{union_terms, StreamChannel, StreamConnector};
use crate::error::StreamError;

/// One call to [`StreamConnector::open`] that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedChannel {
    pub owner: OwnerId,
    pub archives: Vec<ArchiveId>,
    pub terms: Vec<String>,
}

#[derive(Debug)]
struct ChannelFlags {
    running: AtomicBool,
    disconnected: AtomicBool,
    log_closed: AtomicBool,
    verbosity: AtomicU8,
}

/// Observed state of the most recent channel for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub running: bool,
    pub disconnected: bool,
    pub log_closed: bool,
    pub verbosity: Verbosity,
}

#[derive(Default)]
struct MockState {
    opened: Vec<OpenedChannel>,
    failing: HashSet<OwnerId>,
    latest: HashMap<OwnerId, Arc<ChannelFlags>>,
    all: Vec<Arc<ChannelFlags>>,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every future open for `owner` fail.
    pub fn fail_for(&self, owner: &str) {
        self.lock().failing.insert(OwnerId::new(owner));
    }

    pub fn recover(&self, owner: &str) {
        self.lock().failing.remove(&OwnerId::new(owner));
    }

    /// Mark the owner's current channel as dead without disconnecting it.
    pub fn kill(&self, owner: &str) {
        if let Some(flags) = self.lock().latest.get(&OwnerId::new(owner)) {
            flags.running.store(false, Ordering::SeqCst);
        }
    }

    pub fn opened(&self) -> Vec<OpenedChannel> {
        self.lock().opened.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opened.len()
    }

    /// Channels opened and not yet disconnected.
    pub fn live_count(&self) -> usize {
        self.lock()
            .all
            .iter()
            .filter(|f| !f.disconnected.load(Ordering::SeqCst))
            .count()
    }

    pub fn inspect(&self, owner: &str) -> Option<ChannelState> {
        self.lock().latest.get(&OwnerId::new(owner)).map(|f| ChannelState {
            running: f.running.load(Ordering::SeqCst),
            disconnected: f.disconnected.load(Ordering::SeqCst),
            log_closed: f.log_closed.load(Ordering::SeqCst),
            verbosity: Verbosity::try_from(f.verbosity.load(Ordering::SeqCst)).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn open(
        &self,
        owner: &OwnerId,
        archives: &[Archive],
        verbosity: Verbosity,
    ) -> Result<Box<dyn StreamChannel>, StreamError> {
        let mut state = self.lock();
        if state.failing.contains(owner) {
            return Err(StreamError::Rejected {
                owner: owner.clone(),
                status: 401,
            });
        }

        let ids: Vec<ArchiveId> = archives.iter().map(|a| a.id).collect();
        let flags = Arc::new(ChannelFlags {
            running: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            log_closed: AtomicBool::new(false),
            verbosity: AtomicU8::new(verbosity.into()),
        });
        state.opened.push(OpenedChannel {
            owner: owner.clone(),
            archives: ids.clone(),
            terms: union_terms(archives),
        });
        state.latest.insert(owner.clone(), Arc::clone(&flags));
        state.all.push(Arc::clone(&flags));

        Ok(Box::new(MockChannel {
            owner: owner.clone(),
            archives: ids,
            flags,
        }))
    }
}

struct MockChannel {
    owner: OwnerId,
    archives: Vec<ArchiveId>,
    flags: Arc<ChannelFlags>,
}

impl StreamChannel for MockChannel {
    fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    fn channels(&self) -> &[ArchiveId] {
        &self.archives
    }

    fn disconnect(&mut self) {
        self.flags.running.store(false, Ordering::SeqCst);
        self.flags.disconnected.store(true, Ordering::SeqCst);
    }

    fn close_log(&mut self) -> Result<(), StreamError> {
        self.flags.log_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_verbosity(&mut self, level: Verbosity) {
        self.flags.verbosity.store(level.into(), Ordering::SeqCst);
    }
}
