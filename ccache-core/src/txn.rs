//! # Transaction Sessions
//!
//! Purpose: Per-session MULTI queue and WATCH set. Sessions are explicit
//! handles passed through every `execute` call; the registry never infers
//! caller identity from runtime internals.
//!
//! State machine per session: `idle` until MULTI, then `buffering` where
//! data commands queue; EXEC/DISCARD return to idle. WATCH is only legal
//! while idle and records the version observed at watch time.

use std::collections::HashMap;

use ahash::RandomState;
use dashmap::DashMap;

use ccache_common::{CacheError, CacheResult};

/// Opaque per-client session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// One queued command descriptor: uppercased name plus raw arguments.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
struct Session {
    queued: Vec<QueuedCommand>,
    watches: HashMap<String, u64>,
    buffering: bool,
}

/// Everything EXEC needs, detached from the registry in one step.
pub struct ExecState {
    pub queued: Vec<QueuedCommand>,
    pub watches: HashMap<String, u64>,
}

pub struct SessionRegistry {
    sessions: DashMap<u64, Session, RandomState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn begin_multi(&self, session: SessionId) -> CacheResult<()> {
        let mut state = self.sessions.entry(session.0).or_default();
        if state.buffering {
            return Err(CacheError::NestedMulti);
        }
        state.buffering = true;
        state.queued.clear();
        Ok(())
    }

    pub fn discard(&self, session: SessionId) -> CacheResult<()> {
        let mut state = self.sessions.entry(session.0).or_default();
        if !state.buffering {
            return Err(CacheError::DiscardWithoutMulti);
        }
        state.buffering = false;
        state.queued.clear();
        state.watches.clear();
        Ok(())
    }

    /// Records `(key, version)` pairs observed now. Rejected while buffering.
    pub fn watch(&self, session: SessionId, observed: Vec<(String, u64)>) -> CacheResult<()> {
        let mut state = self.sessions.entry(session.0).or_default();
        if state.buffering {
            return Err(CacheError::WatchInsideMulti);
        }
        for (key, version) in observed {
            state.watches.insert(key, version);
        }
        Ok(())
    }

    pub fn unwatch(&self, session: SessionId) {
        if let Some(mut state) = self.sessions.get_mut(&session.0) {
            state.watches.clear();
        }
    }

    pub fn is_buffering(&self, session: SessionId) -> bool {
        self.sessions
            .get(&session.0)
            .map(|s| s.buffering)
            .unwrap_or(false)
    }

    pub fn queue(&self, session: SessionId, name: String, args: Vec<String>) {
        if let Some(mut state) = self.sessions.get_mut(&session.0) {
            state.queued.push(QueuedCommand { name, args });
        }
    }

    /// Detaches the queue and watch set for EXEC, resetting the session to
    /// idle. Errors when the session was not buffering.
    pub fn take_exec(&self, session: SessionId) -> CacheResult<ExecState> {
        let mut state = self
            .sessions
            .get_mut(&session.0)
            .ok_or(CacheError::ExecWithoutMulti)?;
        if !state.buffering {
            return Err(CacheError::ExecWithoutMulti);
        }
        state.buffering = false;
        Ok(ExecState {
            queued: std::mem::take(&mut state.queued),
            watches: std::mem::take(&mut state.watches),
        })
    }

    /// Disconnect cleanup: drop any pending queue and always unwatch.
    pub fn end_session(&self, session: SessionId) {
        self.sessions.remove(&session.0);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SessionId = SessionId(1);

    #[test]
    fn multi_exec_lifecycle() {
        let sessions = SessionRegistry::new();
        assert!(!sessions.is_buffering(S));

        sessions.begin_multi(S).unwrap();
        assert!(sessions.is_buffering(S));
        assert_eq!(sessions.begin_multi(S), Err(CacheError::NestedMulti));

        sessions.queue(S, "SET".into(), vec!["k".into(), "v".into()]);
        sessions.queue(S, "GET".into(), vec!["k".into()]);

        let exec = sessions.take_exec(S).unwrap();
        assert_eq!(exec.queued.len(), 2);
        assert_eq!(exec.queued[0].name, "SET");
        assert!(!sessions.is_buffering(S));
        assert_eq!(
            sessions.take_exec(S).err(),
            Some(CacheError::ExecWithoutMulti)
        );
    }

    #[test]
    fn watch_rules() {
        let sessions = SessionRegistry::new();
        sessions.watch(S, vec![("k".into(), 3)]).unwrap();

        sessions.begin_multi(S).unwrap();
        assert_eq!(
            sessions.watch(S, vec![("x".into(), 0)]),
            Err(CacheError::WatchInsideMulti)
        );

        let exec = sessions.take_exec(S).unwrap();
        assert_eq!(exec.watches.get("k"), Some(&3));
    }

    #[test]
    fn discard_clears_queue_and_watches() {
        let sessions = SessionRegistry::new();
        assert_eq!(sessions.discard(S), Err(CacheError::DiscardWithoutMulti));

        sessions.watch(S, vec![("k".into(), 1)]).unwrap();
        sessions.begin_multi(S).unwrap();
        sessions.queue(S, "SET".into(), vec!["k".into(), "v".into()]);
        sessions.discard(S).unwrap();

        sessions.begin_multi(S).unwrap();
        let exec = sessions.take_exec(S).unwrap();
        assert!(exec.queued.is_empty());
        assert!(exec.watches.is_empty());
    }
}
