//! Action abstraction: per-event match + effect logic.
//!
//! An [`ActionFactory`] is registered once at startup. For every inbound
//! event the dispatcher asks each factory for a fresh [`Action`] bound to
//! that event, so no state is shared between events.

pub mod clone;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ActionError;
use crate::event::WebhookEvent;

pub use clone::{CloneAction, CloneActionFactory, GitCloner, RepoCloner};
pub use registry::ActionRegistry;

/// A unit of matching + effecting logic, bound to one event.
///
/// `matches` decides whether `act` runs and must not have effects beyond
/// logging and appending to the report. `act` performs the side effect and
/// is expected to absorb and describe its own failures; an `Err` from either
/// is recorded by the dispatcher against this action. `info` is called
/// whether or not the action matched.
#[async_trait]
pub trait Action: Send {
    /// Name used in reports and log lines.
    fn name(&self) -> &str;

    async fn matches(&mut self) -> Result<bool, ActionError>;

    async fn act(&mut self) -> Result<(), ActionError>;

    /// Report text accumulated so far. Never fails.
    fn info(&self) -> String;
}

/// Builds a fresh [`Action`] for each event.
pub trait ActionFactory: Send + Sync {
    /// Name of the actions this factory builds.
    fn name(&self) -> &str;

    fn build(&self, event: Arc<WebhookEvent>) -> Box<dyn Action>;
}
