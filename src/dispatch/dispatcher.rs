//! Runs every registered action against one event, in registry order.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::Instrument;

use crate::actions::{Action, ActionFactory, ActionRegistry};
use crate::dispatch::report::{ActionOutcome, ActionSection, ActionStage, DispatchReport};
use crate::error::ActionError;
use crate::event::WebhookEvent;

/// Sequential match → act → info over the registry.
///
/// Actions run one at a time; a slow action delays the ones after it. A
/// failure, panic or timeout in one action is recorded in its section and
/// the next action still runs.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    action_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            action_timeout: None,
        }
    }

    /// Bound each of `matches` and `act` by `timeout`.
    pub fn with_action_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub async fn dispatch(&self, event: Arc<WebhookEvent>) -> DispatchReport {
        let mut report = DispatchReport::new(&event);

        for factory in self.registry.all() {
            let span = tracing::info_span!("action", action = %factory.name());
            let section = self
                .run_action(factory.as_ref(), Arc::clone(&event))
                .instrument(span)
                .await;
            report.push(section);
        }

        tracing::info!(
            actions = report.sections.len(),
            failures = report.failures(),
            "Dispatch complete"
        );
        report
    }

    async fn run_action(
        &self,
        factory: &dyn ActionFactory,
        event: Arc<WebhookEvent>,
    ) -> ActionSection {
        let delivery_id = event.delivery_id.clone();

        let mut action = match std::panic::catch_unwind(AssertUnwindSafe(|| factory.build(event)))
        {
            Ok(action) => action,
            Err(panic) => {
                let error = ActionError::Panicked {
                    name: factory.name().to_string(),
                    message: panic_message(panic.as_ref()),
                };
                tracing::error!(delivery = %delivery_id, action = %factory.name(), "Failed to construct action: {error}");
                return ActionSection {
                    action: factory.name().to_string(),
                    outcome: ActionOutcome::Failed {
                        stage: ActionStage::Match,
                        error: error.to_string(),
                    },
                    info: String::new(),
                };
            }
        };

        let name = action.name().to_string();
        let outcome = self.drive(&name, action.as_mut()).await;

        match &outcome {
            ActionOutcome::Failed { stage, error } => {
                tracing::error!(delivery = %delivery_id, action = %name, %stage, "Action failed: {error}");
            }
            ActionOutcome::Acted => tracing::debug!(action = %name, "Action completed"),
            ActionOutcome::Skipped => tracing::debug!(action = %name, "Action did not match"),
        }

        let info = std::panic::catch_unwind(AssertUnwindSafe(|| action.info())).unwrap_or_else(|panic| {
            tracing::error!(delivery = %delivery_id, action = %name, "info() panicked");
            format!("(report unavailable: {})\n", panic_message(panic.as_ref()))
        });

        ActionSection {
            action: name,
            outcome,
            info,
        }
    }

    async fn drive(&self, name: &str, action: &mut dyn Action) -> ActionOutcome {
        let matched = match self.guarded(name, action.matches()).await {
            Ok(matched) => matched,
            Err(e) => {
                return ActionOutcome::Failed {
                    stage: ActionStage::Match,
                    error: e.to_string(),
                };
            }
        };
        if !matched {
            return ActionOutcome::Skipped;
        }

        match self.guarded(name, action.act()).await {
            Ok(()) => ActionOutcome::Acted,
            Err(e) => ActionOutcome::Failed {
                stage: ActionStage::Act,
                error: e.to_string(),
            },
        }
    }

    /// Await `fut`, turning panics and timeouts into `ActionError`s.
    async fn guarded<T, F>(&self, name: &str, fut: F) -> Result<T, ActionError>
    where
        F: Future<Output = Result<T, ActionError>>,
    {
        let caught = AssertUnwindSafe(fut).catch_unwind();
        let result = match self.action_timeout {
            Some(limit) => tokio::time::timeout(limit, caught)
                .await
                .map_err(|_| ActionError::Timeout {
                    name: name.to_string(),
                    timeout: limit,
                })?,
            None => caught.await,
        };

        result.unwrap_or_else(|panic| {
            Err(ActionError::Panicked {
                name: name.to_string(),
                message: panic_message(panic.as_ref()),
            })
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// What a scripted action does when driven.
    #[derive(Clone, Copy)]
    enum Script {
        Match,
        NoMatch,
        ErrInMatch,
        ErrInAct,
        PanicInAct,
        Hang,
    }

    struct ScriptedFactory {
        name: &'static str,
        script: Script,
        log: Arc<Mutex<Vec<String>>>,
    }

    struct Scripted {
        name: &'static str,
        script: Script,
        log: Arc<Mutex<Vec<String>>>,
        alert: String,
    }

    impl ActionFactory for ScriptedFactory {
        fn name(&self) -> &str {
            self.name
        }
        fn build(&self, _event: Arc<WebhookEvent>) -> Box<dyn Action> {
            Box::new(Scripted {
                name: self.name,
                script: self.script,
                log: Arc::clone(&self.log),
                alert: String::new(),
            })
        }
    }

    #[async_trait]
    impl Action for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn matches(&mut self) -> Result<bool, ActionError> {
            self.log.lock().unwrap().push(format!("{}:match", self.name));
            match self.script {
                Script::NoMatch => {
                    self.alert.push_str("not for me\n");
                    Ok(false)
                }
                Script::ErrInMatch => Err(ActionError::MissingField {
                    field: "repository.url".into(),
                }),
                _ => Ok(true),
            }
        }

        async fn act(&mut self) -> Result<(), ActionError> {
            self.log.lock().unwrap().push(format!("{}:act", self.name));
            self.alert.push_str("acting\n");
            match self.script {
                Script::ErrInAct => Err(ActionError::InvalidField {
                    field: "x".into(),
                    reason: "bad".into(),
                }),
                Script::PanicInAct => panic!("act exploded"),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                _ => {
                    self.alert.push_str("done\n");
                    Ok(())
                }
            }
        }

        fn info(&self) -> String {
            self.alert.clone()
        }
    }

    fn registry(entries: &[(&'static str, Script)], log: &Arc<Mutex<Vec<String>>>) -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        for (name, script) in entries {
            registry.register(Arc::new(ScriptedFactory {
                name: *name,
                script: *script,
                log: Arc::clone(log),
            }));
        }
        Arc::new(registry)
    }

    fn event(kind: &str) -> Arc<WebhookEvent> {
        Arc::new(WebhookEvent::new(
            "abc-123",
            kind,
            json!({"repository": {"url": "https://x/org/foo"}}),
        ))
    }

    #[tokio::test]
    async fn test_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(registry(
            &[("c", Script::Match), ("a", Script::NoMatch), ("b", Script::Match)],
            &log,
        ));

        let report = dispatcher.dispatch(event("push")).await;

        assert_eq!(report.action_names(), vec!["c", "a", "b"]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["c:match", "c:act", "a:match", "b:match", "b:act"]
        );
        assert_eq!(report.sections[1].outcome, ActionOutcome::Skipped);
        assert_eq!(report.sections[1].info, "not for me\n");

        let text = report.render();
        let c = text.find("Messages related to c.").unwrap();
        let a = text.find("Messages related to a.").unwrap();
        let b = text.find("Messages related to b.").unwrap();
        assert!(c < a && a < b);
        assert!(text.starts_with("Handling push event from repository https://x/org/foo."));
    }

    #[tokio::test]
    async fn test_info_present_for_unmatched_actions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(registry(&[("quiet", Script::NoMatch)], &log));

        let report = dispatcher.dispatch(event("issues")).await;
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.sections[0].info, "not for me\n");
        assert!(!log.lock().unwrap().contains(&"quiet:act".to_string()));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(registry(
            &[
                ("bad_match", Script::ErrInMatch),
                ("bad_act", Script::ErrInAct),
                ("panics", Script::PanicInAct),
                ("fine", Script::Match),
            ],
            &log,
        ));

        let report = dispatcher.dispatch(event("push")).await;

        assert_eq!(report.action_names(), vec!["bad_match", "bad_act", "panics", "fine"]);
        assert_eq!(report.failures(), 3);
        assert!(matches!(
            report.sections[0].outcome,
            ActionOutcome::Failed { stage: ActionStage::Match, .. }
        ));
        assert!(matches!(
            report.sections[1].outcome,
            ActionOutcome::Failed { stage: ActionStage::Act, .. }
        ));
        match &report.sections[2].outcome {
            ActionOutcome::Failed { stage, error } => {
                assert_eq!(*stage, ActionStage::Act);
                assert!(error.contains("act exploded"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // State accumulated before the panic is still reported.
        assert_eq!(report.sections[2].info, "acting\n");
        assert_eq!(report.sections[3].outcome, ActionOutcome::Acted);
        assert!(report.render().contains("Action failed during act"));
    }

    #[tokio::test]
    async fn test_action_timeout_is_recorded() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(registry(&[("slow", Script::Hang), ("next", Script::Match)], &log))
            .with_action_timeout(Some(Duration::from_millis(50)));

        let report = dispatcher.dispatch(event("push")).await;

        match &report.sections[0].outcome {
            ActionOutcome::Failed { stage, error } => {
                assert_eq!(*stage, ActionStage::Act);
                assert!(error.contains("timed out"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(report.sections[1].outcome, ActionOutcome::Acted);
    }

    #[tokio::test]
    async fn test_empty_registry_yields_header_only() {
        let dispatcher = Dispatcher::new(Arc::new(ActionRegistry::new()));
        let report = dispatcher.dispatch(event("push")).await;
        assert!(report.sections.is_empty());
        assert_eq!(
            report.render(),
            "Handling push event from repository https://x/org/foo.\n\n"
        );
    }

    #[test]
    fn test_panic_message() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
