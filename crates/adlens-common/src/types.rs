pub type SessionId = String;
pub type UserId = String;

/// Stable key identifying one checkpoint owner, derived from (user, session).
pub type ThreadId = String;

/// Derive the thread identifier for a (user, session) pair.
pub fn thread_id(user_id: &str, session_id: &str) -> ThreadId {
    format!("{user_id}:{session_id}")
}
