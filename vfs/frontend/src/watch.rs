//! Change notification for watched paths.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bfs_core::{Stats, path};
use parking_lot::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct WatcherId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The entry appeared, disappeared or moved.
    Rename,
    /// The entry's content or attributes changed.
    Change,
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEventKind::Rename => f.write_str("rename"),
            WatchEventKind::Change => f.write_str("change"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Basename of the entry the event is about.
    pub filename: String,
    pub stats: Option<Stats>,
}

pub type WatchListener = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Watchers {
    next_id: AtomicU64,
    by_path: RwLock<HashMap<String, Vec<(WatcherId, WatchListener)>>>,
}

impl fmt::Debug for Watchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchers")
            .field("paths", &self.by_path.read().len())
            .finish()
    }
}

impl Watchers {
    pub(crate) fn watch(&self, path: String, listener: WatchListener) -> WatcherId {
        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_path
            .write()
            .entry(path)
            .or_default()
            .push((id, listener));
        id
    }

    pub(crate) fn unwatch(&self, id: WatcherId) -> bool {
        let mut by_path = self.by_path.write();
        let mut found = false;
        by_path.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            found |= listeners.len() != before;
            !listeners.is_empty()
        });
        found
    }

    /// Notifies listeners on `p` and on its parent directory.
    pub(crate) fn trigger(&self, p: &str, kind: WatchEventKind, stats: Option<Stats>) {
        let targets: Vec<WatchListener> = {
            let by_path = self.by_path.read();
            if by_path.is_empty() {
                return;
            }
            let own = by_path.get(p).into_iter().flatten();
            let parent = if p == "/" {
                None
            } else {
                by_path.get(path::dirname(p))
            };
            own.chain(parent.into_iter().flatten())
                .map(|(_, l)| l.clone())
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        tracing::trace!(path = p, %kind, listeners = targets.len(), "dispatching watch event");
        let event = WatchEvent {
            kind,
            filename: path::basename(p).to_owned(),
            stats,
        };
        for listener in targets {
            listener(&event);
        }
    }
}
