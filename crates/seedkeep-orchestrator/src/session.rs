//! Who is asking: caller identity supplied by the transport layer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account that owns torrents added without a known user.
pub const DEFAULT_OWNER: &str = "localclient";

/// Authorization level attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    /// May only read status.
    ReadOnly,
    /// May manage their own torrents.
    Normal,
    /// Sees and manages every torrent.
    Admin,
}

/// Identity of the session issuing a command or query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Transport session identifier, also the key of status diff caches.
    pub session_id: Uuid,
    /// Account name.
    pub user: String,
    /// Authorization level of the session.
    pub auth_level: AuthLevel,
}

impl Caller {
    /// Construct a caller.
    #[must_use]
    pub fn new(session_id: Uuid, user: impl Into<String>, auth_level: AuthLevel) -> Self {
        Self {
            session_id,
            user: user.into(),
            auth_level,
        }
    }

    /// The in-process administrator used when no transport is involved.
    #[must_use]
    pub fn local_admin() -> Self {
        Self::new(Uuid::nil(), DEFAULT_OWNER, AuthLevel::Admin)
    }

    /// Whether the caller sees every torrent.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.auth_level == AuthLevel::Admin
    }
}

/// Session and account lookups provided by the transport layer.
pub trait SessionDirectory: Send + Sync {
    /// Whether the transport still holds the session.
    fn is_session_valid(&self, session_id: Uuid) -> bool;

    /// Whether an account with this name exists.
    fn has_account(&self, user: &str) -> bool;
}

/// Directory for a single local user: every session is valid and only
/// [`DEFAULT_OWNER`] exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSessions;

impl SessionDirectory for LocalSessions {
    fn is_session_valid(&self, _session_id: Uuid) -> bool {
        true
    }

    fn has_account(&self, user: &str) -> bool {
        user == DEFAULT_OWNER
    }
}

/// Owner recorded for a new torrent: the requested account when it exists,
/// otherwise [`DEFAULT_OWNER`].
pub(crate) fn resolve_owner(directory: &dyn SessionDirectory, requested: Option<&str>) -> String {
    requested
        .map(str::trim)
        .filter(|user| !user.is_empty() && directory.has_account(user))
        .map_or_else(|| DEFAULT_OWNER.to_string(), str::to_string)
}
