use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arbor_core::sync::lock_or_recover;

use crate::error::{ArchiveError, Result};
use crate::opener::{ArchiveOpener, ZipOpener};
use crate::session::{ArchiveSession, SessionOwner};
use crate::validity::{ArchiveValidity, ValidityCache};

/// Opens archives through an opener, remembering failures in a
/// [`ValidityCache`] and pooling opened archives per caching session.
pub struct ArchiveManager<P: ArchiveOpener = ZipOpener> {
    opener: P,
    validity: ValidityCache,
    sessions: Mutex<HashMap<SessionOwner, ArchiveSession<P::Archive>>>,
}

impl ArchiveManager<ZipOpener> {
    pub fn zip(validity: ValidityCache) -> Self {
        Self::new(ZipOpener, validity)
    }
}

impl<P: ArchiveOpener> ArchiveManager<P> {
    pub fn new(opener: P, validity: ValidityCache) -> Self {
        Self {
            opener,
            validity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn validity(&self) -> &ValidityCache {
        &self.validity
    }

    pub fn opener(&self) -> &P {
        &self.opener
    }

    /// Whether `path` can be opened, checking at most once per TTL.
    pub fn is_valid(&self, path: &Path) -> bool {
        self.validity
            .is_valid(path, |path| self.opener.open(path).map(drop))
    }

    /// Opens `path`, or hands out the archive pooled for `session`.
    ///
    /// Paths cached as invalid fail with [`ArchiveError::KnownInvalid`] without
    /// checking. A failed open is cached as invalid; a successful one as valid.
    pub fn open(&self, path: &Path, session: Option<SessionOwner>) -> Result<Arc<P::Archive>> {
        if let Some(owner) = session {
            let sessions = lock_or_recover(&self.sessions, "arbor.archive");
            if let Some(archive) = sessions.get(&owner).and_then(|s| s.get(path)) {
                return Ok(archive);
            }
        }

        if let Some(ArchiveValidity::Invalid { reason }) = self.validity.validity(path) {
            return Err(ArchiveError::KnownInvalid {
                path: path.to_path_buf(),
                reason,
            });
        }

        let archive = match self.opener.open(path) {
            Ok(archive) => Arc::new(archive),
            Err(err) => {
                tracing::debug!(
                    target = "arbor.archive",
                    path = %path.display(),
                    error = %err,
                    "failed to open archive"
                );
                self.validity.mark_invalid(path, err.to_string());
                return Err(err);
            }
        };
        self.validity.mark_valid(path);

        if let Some(owner) = session {
            let mut sessions = lock_or_recover(&self.sessions, "arbor.archive");
            if let Some(state) = sessions.get_mut(&owner).filter(|s| s.is_active()) {
                return Ok(state.insert(path, archive));
            }
        }
        Ok(archive)
    }

    /// Releases `archive`. Inside an active session that pools it, the close
    /// is deferred to the session's flush. Returns `true` if it was released
    /// here.
    pub fn close(&self, archive: Arc<P::Archive>, path: &Path, session: Option<SessionOwner>) -> bool {
        if let Some(owner) = session {
            let mut sessions = lock_or_recover(&self.sessions, "arbor.archive");
            if let Some(state) = sessions.get_mut(&owner) {
                if state.defer_close(path) {
                    return false;
                }
            }
        }
        drop(archive);
        true
    }

    /// Starts (or nests into) the caching session of `owner`. Returns the
    /// nesting depth.
    pub fn enter_session(&self, owner: SessionOwner) -> usize {
        let mut sessions = lock_or_recover(&self.sessions, "arbor.archive");
        sessions
            .entry(owner)
            .or_insert_with(|| ArchiveSession::new(owner))
            .enter()
    }

    /// Leaves one level of `owner`'s session. When the outermost level is
    /// left the pool is released and the number of released archives is
    /// returned; otherwise `0`.
    ///
    /// Only the owner's own session is affected: a caller flushing with an
    /// owner that has no session releases nothing.
    pub fn flush(&self, owner: SessionOwner) -> usize {
        let state = {
            let mut sessions = lock_or_recover(&self.sessions, "arbor.archive");
            let Some(state) = sessions.get_mut(&owner) else {
                tracing::debug!(
                    target = "arbor.archive",
                    owner = %owner,
                    "flush without an active session"
                );
                return 0;
            };
            if !state.leave() {
                return 0;
            }
            match sessions.remove(&owner) {
                Some(state) => state,
                None => return 0,
            }
        };
        Self::release(owner, state, "flushed archive session")
    }

    /// Ends `owner`'s session at any nesting depth and releases its pool.
    /// Other owners' sessions are untouched.
    pub fn end_session(&self, owner: SessionOwner) -> usize {
        let removed = lock_or_recover(&self.sessions, "arbor.archive").remove(&owner);
        match removed {
            Some(state) => Self::release(owner, state, "ended archive session"),
            None => 0,
        }
    }

    // Archives are dropped outside the sessions lock.
    fn release(owner: SessionOwner, mut state: ArchiveSession<P::Archive>, what: &str) -> usize {
        let deferred_closes = state.deferred_closes();
        let released = state.drain().len();
        tracing::trace!(
            target = "arbor.archive",
            owner = %owner,
            released,
            deferred_closes,
            "{what}"
        );
        released
    }

    pub fn session_depth(&self, owner: SessionOwner) -> usize {
        lock_or_recover(&self.sessions, "arbor.archive")
            .get(&owner)
            .map_or(0, ArchiveSession::depth)
    }

    pub fn pooled(&self, owner: SessionOwner) -> usize {
        lock_or_recover(&self.sessions, "arbor.archive")
            .get(&owner)
            .map_or(0, ArchiveSession::len)
    }

    /// Ends every session and releases all pooled archives.
    pub fn shutdown(&self) -> usize {
        let sessions = std::mem::take(&mut *lock_or_recover(&self.sessions, "arbor.archive"));
        sessions
            .into_values()
            .map(|mut state| state.drain().len())
            .sum()
    }
}

impl<P: ArchiveOpener> std::fmt::Debug for ArchiveManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveManager")
            .field("validity", &self.validity)
            .field(
                "sessions",
                &lock_or_recover(&self.sessions, "arbor.archive").len(),
            )
            .finish()
    }
}
