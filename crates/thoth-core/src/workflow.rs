//! Declarative browser workflow model
//!
//! A workflow is an ordered step list executed against one headless
//! browser context. The model lives here so browser-kind adapter params
//! can embed it; the engine itself is in `thoth-browser`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepAction {
    Navigate,
    Type,
    Click,
    Wait,
    Extract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub action: StepAction,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// EXTRACT: record field name -> CSS selector relative to `selector`.
    #[serde(default)]
    pub fields: Option<BTreeMap<String, String>>,
    /// TYPE steps flagged parameterized receive the run's keyword string.
    #[serde(default)]
    pub parameterized: bool,
    /// WAIT without a selector sleeps this long instead.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Selectors for an optional login form fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSlots {
    pub username_selector: String,
    pub password_selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserWorkflow {
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub credentials: Option<CredentialSlots>,
}

impl BrowserWorkflow {
    /// Check each step carries the operands its action needs.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.steps.is_empty() {
            return Err(DiscoveryError::Config(
                "workflow has no steps".to_string(),
            ));
        }
        for (i, step) in self.steps.iter().enumerate() {
            let missing = |what: &str| {
                DiscoveryError::Config(format!(
                    "step {} ({:?}) is missing {what}",
                    i + 1,
                    step.action
                ))
            };
            match step.action {
                StepAction::Navigate => {
                    if step.url.as_deref().is_none_or(str::is_empty) {
                        return Err(missing("a url"));
                    }
                }
                StepAction::Type => {
                    if step.selector.as_deref().is_none_or(str::is_empty) {
                        return Err(missing("a selector"));
                    }
                    if step.text.is_none() && !step.parameterized {
                        return Err(missing("text (or the parameterized flag)"));
                    }
                }
                StepAction::Click => {
                    if step.selector.as_deref().is_none_or(str::is_empty) {
                        return Err(missing("a selector"));
                    }
                }
                StepAction::Wait => {
                    if step.selector.is_none() && step.wait_ms.is_none() {
                        return Err(missing("a selector or wait_ms"));
                    }
                }
                StepAction::Extract => {
                    if step.selector.as_deref().is_none_or(str::is_empty) {
                        return Err(missing("a selector"));
                    }
                    if step.fields.as_ref().is_none_or(BTreeMap::is_empty) {
                        return Err(missing("a non-empty fields map"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether any TYPE step accepts injected keywords.
    pub fn has_parameterized_input(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.action == StepAction::Type && s.parameterized)
    }
}
