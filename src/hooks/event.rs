//! Hook names, invocation context and handler results.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Fixed lifecycle points at which plugin handlers run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookName {
    BeforeInit,
    AfterInit,
    BeforePlan,
    AfterPlan,
    BeforeExecute,
    AfterExecute,
    BeforeAudit,
    AfterAudit,
    BeforeRecovery,
    AfterRecovery,
    BeforeTest,
    AfterTest,
    BeforeCommit,
    AfterCommit,

    /// Workflow finished successfully.
    OnComplete,
    /// Workflow hit an error.
    OnError,
    /// A file in the project changed.
    OnFileChange,
}

impl HookName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeInit => "before-init",
            Self::AfterInit => "after-init",
            Self::BeforePlan => "before-plan",
            Self::AfterPlan => "after-plan",
            Self::BeforeExecute => "before-execute",
            Self::AfterExecute => "after-execute",
            Self::BeforeAudit => "before-audit",
            Self::AfterAudit => "after-audit",
            Self::BeforeRecovery => "before-recovery",
            Self::AfterRecovery => "after-recovery",
            Self::BeforeTest => "before-test",
            Self::AfterTest => "after-test",
            Self::BeforeCommit => "before-commit",
            Self::AfterCommit => "after-commit",
            Self::OnComplete => "on-complete",
            Self::OnError => "on-error",
            Self::OnFileChange => "on-file-change",
        }
    }

    pub fn is_before_hook(&self) -> bool {
        matches!(
            self,
            Self::BeforeInit
                | Self::BeforePlan
                | Self::BeforeExecute
                | Self::BeforeAudit
                | Self::BeforeRecovery
                | Self::BeforeTest
                | Self::BeforeCommit
        )
    }

    /// A failing handler on a critical hook blocks the workflow stage.
    pub fn is_critical(&self) -> bool {
        self.is_before_hook()
    }

    pub fn all() -> &'static [HookName] {
        &[
            Self::BeforeInit,
            Self::AfterInit,
            Self::BeforePlan,
            Self::AfterPlan,
            Self::BeforeExecute,
            Self::AfterExecute,
            Self::BeforeAudit,
            Self::AfterAudit,
            Self::BeforeRecovery,
            Self::AfterRecovery,
            Self::BeforeTest,
            Self::AfterTest,
            Self::BeforeCommit,
            Self::AfterCommit,
            Self::OnComplete,
            Self::OnError,
            Self::OnFileChange,
        ]
    }
}

impl std::fmt::Display for HookName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookName {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| crate::Error::UnknownHook(s.to_string()))
    }
}

/// Per-dispatch invocation context.
///
/// The caller owns one context per dispatch and hands it to the dispatcher
/// mutably; handlers only ever see it by shared reference; the dispatcher
/// folds each handler's `data` into `metadata` before the next one runs.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub session_id: String,
    pub task: String,
    pub phase: String,
    /// Orchestrator configuration visible to all handlers.
    pub config: Value,
    pub metadata: Map<String, Value>,
    /// Checked between handlers, never mid-handler.
    pub cancellation: CancellationToken,
}

impl Default for HookContext {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            task: String::new(),
            phase: String::new(),
            config: Value::Object(Map::new()),
            metadata: Map::new(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl HookContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Folds a handler's contribution into `metadata`, whether or not the
    /// handler succeeded.
    ///
    /// Object keys are merged (later plugins overwrite earlier keys); any
    /// other value is stored under the contributing plugin's name.
    pub(crate) fn merge_data(&mut self, plugin: &str, data: &Value) {
        match data {
            Value::Object(map) => {
                for (key, value) in map {
                    self.metadata.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => {
                self.metadata.insert(plugin.to_string(), other.clone());
            }
        }
    }
}

/// Result returned by a single handler.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stop_propagation: bool,
    /// A recoverable failure never aborts dispatch and is ignored by the
    /// aggregate, even on critical hooks.
    #[serde(default)]
    pub recoverable: bool,
}

impl HookResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_with(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub(crate) fn timeout() -> Self {
        Self::failure(TIMEOUT_ERROR)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn stop(mut self) -> Self {
        self.stop_propagation = true;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn is_timeout(&self) -> bool {
        !self.success && self.error.as_deref() == Some(TIMEOUT_ERROR)
    }

    /// Counts toward the dispatch aggregate.
    pub fn counts_as_success(&self) -> bool {
        self.success || self.recoverable
    }
}

pub(crate) const TIMEOUT_ERROR: &str = "timeout";
