//! Out-of-band membership query used to make joins idempotent.
//!
//! Before sending a `join` frame the client asks whether the local user is
//! already in the outpost. The answer comes from outside the socket (usually
//! the REST API), so it is abstracted behind [`MembershipProbe`].

use async_trait::async_trait;

use crate::error::LiveError;

/// Answers "is this user already a member of this outpost?".
#[async_trait]
pub trait MembershipProbe: Send + Sync + 'static {
    /// # Errors
    ///
    /// Any error is treated as "not a member" and the join goes ahead.
    async fn is_member(&self, outpost_uuid: &str, user_address: &str) -> Result<bool, LiveError>;
}

/// A probe that never knows of any membership, so every join is sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMembershipProbe;

#[async_trait]
impl MembershipProbe for NoMembershipProbe {
    async fn is_member(&self, _outpost_uuid: &str, _user_address: &str) -> Result<bool, LiveError> {
        Ok(false)
    }
}
