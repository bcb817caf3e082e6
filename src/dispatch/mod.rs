//! Event dispatch: registry walk, report, isolated execution.
//!
//! One accepted request flows through:
//! 1. `Isolation::isolate()`: a fresh unit, decoupled from the listener
//! 2. `Dispatcher::dispatch()`: match → act → info per registered action
//! 3. `Notifier::notify()`: email the report to the event's author

pub mod dispatcher;
pub mod isolation;
pub mod report;

use std::sync::Arc;

use crate::event::WebhookEvent;
use crate::notify::{Notifier, NotifyOutcome};

pub use dispatcher::Dispatcher;
pub use isolation::{Isolation, UnitExit, UnitHandle, UnitId};
pub use report::{ActionOutcome, ActionSection, ActionStage, DispatchReport};

/// The work one isolated unit performs: dispatch, then notify.
#[derive(Clone)]
pub struct Pipeline {
    dispatcher: Dispatcher,
    notifier: Notifier,
}

impl Pipeline {
    pub fn new(dispatcher: Dispatcher, notifier: Notifier) -> Self {
        Self {
            dispatcher,
            notifier,
        }
    }

    pub async fn run(&self, event: Arc<WebhookEvent>) -> (DispatchReport, NotifyOutcome) {
        let report = self.dispatcher.dispatch(Arc::clone(&event)).await;
        let outcome = self.notifier.notify(&event, &report).await;
        (report, outcome)
    }
}
