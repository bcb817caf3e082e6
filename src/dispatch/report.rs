//! Dispatch report: what each registered action did for one event.

use std::fmt;

use serde::Serialize;

use crate::event::WebhookEvent;

/// Horizontal rule framing each action's section.
pub const SECTION_RULE: &str = "=================================================";

/// Which step of an action raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStage {
    Match,
    Act,
}

impl fmt::Display for ActionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => f.write_str("match"),
            Self::Act => f.write_str("act"),
        }
    }
}

/// Outcome of one action for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// `matches` returned false.
    Skipped,
    /// `matches` returned true and `act` completed.
    Acted,
    /// `matches` or `act` failed, timed out or panicked.
    Failed { stage: ActionStage, error: String },
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One action's contribution to the report.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSection {
    pub action: String,
    pub outcome: ActionOutcome,
    /// Text returned by the action's `info`.
    pub info: String,
}

impl ActionSection {
    fn write_to(&self, out: &mut String) {
        out.push_str(&format!("Messages related to {}.\n", self.action));
        out.push_str(SECTION_RULE);
        out.push('\n');
        out.push_str(&self.info);
        if let ActionOutcome::Failed { stage, error } = &self.outcome {
            if !self.info.is_empty() && !self.info.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!("Action failed during {stage}: {error}\n"));
        }
        out.push('\n');
        out.push_str(SECTION_RULE);
        out.push('\n');
    }
}

/// Aggregated report for one event, in registry order.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub delivery_id: String,
    pub event_type: String,
    pub repository_url: Option<String>,
    pub sections: Vec<ActionSection>,
}

impl DispatchReport {
    pub fn new(event: &WebhookEvent) -> Self {
        Self {
            delivery_id: event.delivery_id.clone(),
            event_type: event.event_type.clone(),
            repository_url: event.repository_url().map(String::from),
            sections: Vec::new(),
        }
    }

    pub fn push(&mut self, section: ActionSection) {
        self.sections.push(section);
    }

    /// Repository URL or a placeholder.
    pub fn repository_label(&self) -> &str {
        self.repository_url.as_deref().unwrap_or("<unknown repository>")
    }

    pub fn header(&self) -> String {
        format!(
            "Handling {} event from repository {}.\n\n",
            self.event_type,
            self.repository_label()
        )
    }

    /// Action names, in the order they ran.
    pub fn action_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.action.as_str()).collect()
    }

    pub fn failures(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.outcome.is_failure())
            .count()
    }

    /// Full plain-text body.
    pub fn render(&self) -> String {
        let mut out = self.header();
        for section in &self.sections {
            section.write_to(&mut out);
        }
        out
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
