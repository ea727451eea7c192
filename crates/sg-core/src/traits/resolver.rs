//! Command resolution

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::types::{CommandSpec, UserId};

/// Maps an authenticated user to the command their session runs
#[async_trait]
pub trait CommandResolver: Send + Sync {
    /// Build the command for `user`
    async fn resolve(&self, user: &UserId) -> Result<CommandSpec, ResolveError>;
}
