//! The `Step` tagged union and the results it produces.
//!
//! Modeled as a sealed sum type rather than virtual dispatch: the
//! executor's `match` over `Step` is both the dispatcher and the
//! authoritative step catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Category;
use crate::selector::Selector;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseStep {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Step {
    Tap {
        #[serde(flatten)]
        base: BaseStep,
        selector: Selector,
    },
    DoubleTap {
        #[serde(flatten)]
        base: BaseStep,
        selector: Selector,
    },
    LongPress {
        #[serde(flatten)]
        base: BaseStep,
        selector: Selector,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    TapOnPoint {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        point: Option<String>,
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
    },
    Swipe {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
        #[serde(default)]
        direction: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    Scroll {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        direction: Option<String>,
    },
    ScrollUntilVisible {
        #[serde(flatten)]
        base: BaseStep,
        selector: Selector,
        #[serde(default)]
        direction: Option<String>,
    },
    InputText {
        #[serde(flatten)]
        base: BaseStep,
        text: String,
    },
    InputRandom {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        data_type: Option<String>,
        #[serde(default)]
        length: Option<usize>,
    },
    EraseText {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        count: Option<u32>,
    },
    AssertVisible {
        #[serde(flatten)]
        base: BaseStep,
        selector: Selector,
    },
    AssertNotVisible {
        #[serde(flatten)]
        base: BaseStep,
        selector: Selector,
    },
    WaitUntil {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        visible: Option<Selector>,
        #[serde(default)]
        not_visible: Option<Selector>,
    },
    WaitForAnimationToEnd {
        #[serde(flatten)]
        base: BaseStep,
    },
    Back {
        #[serde(flatten)]
        base: BaseStep,
    },
    HideKeyboard {
        #[serde(flatten)]
        base: BaseStep,
    },
    LaunchApp {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        app_id: Option<String>,
        #[serde(default)]
        clear_state: bool,
        #[serde(default = "default_true")]
        stop_first: bool,
    },
    StopApp {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        app_id: Option<String>,
    },
    KillApp {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        app_id: Option<String>,
    },
    ClearState {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        app_id: Option<String>,
    },
    SetLocation {
        #[serde(flatten)]
        base: BaseStep,
        latitude: String,
        longitude: String,
    },
    SetOrientation {
        #[serde(flatten)]
        base: BaseStep,
        orientation: String,
    },
    OpenLink {
        #[serde(flatten)]
        base: BaseStep,
        link: String,
        #[serde(default)]
        auto_verify: bool,
        #[serde(default)]
        browser: bool,
    },
    CopyTextFrom {
        #[serde(flatten)]
        base: BaseStep,
        selector: Selector,
    },
    PasteText {
        #[serde(flatten)]
        base: BaseStep,
    },
    SetClipboard {
        #[serde(flatten)]
        base: BaseStep,
        text: String,
    },
    PressKey {
        #[serde(flatten)]
        base: BaseStep,
        key: String,
    },
    TakeScreenshot {
        #[serde(flatten)]
        base: BaseStep,
        #[serde(default)]
        label: Option<String>,
    },
    RunScript {
        #[serde(flatten)]
        base: BaseStep,
        script: String,
    },
}

impl Step {
    pub fn base(&self) -> &BaseStep {
        match self {
            Step::Tap { base, .. }
            | Step::DoubleTap { base, .. }
            | Step::LongPress { base, .. }
            | Step::TapOnPoint { base, .. }
            | Step::Swipe { base, .. }
            | Step::Scroll { base, .. }
            | Step::ScrollUntilVisible { base, .. }
            | Step::InputText { base, .. }
            | Step::InputRandom { base, .. }
            | Step::EraseText { base, .. }
            | Step::AssertVisible { base, .. }
            | Step::AssertNotVisible { base, .. }
            | Step::WaitUntil { base, .. }
            | Step::WaitForAnimationToEnd { base }
            | Step::Back { base }
            | Step::HideKeyboard { base }
            | Step::LaunchApp { base, .. }
            | Step::StopApp { base, .. }
            | Step::KillApp { base, .. }
            | Step::ClearState { base, .. }
            | Step::SetLocation { base, .. }
            | Step::SetOrientation { base, .. }
            | Step::OpenLink { base, .. }
            | Step::CopyTextFrom { base, .. }
            | Step::PasteText { base }
            | Step::SetClipboard { base, .. }
            | Step::PressKey { base, .. }
            | Step::TakeScreenshot { base, .. }
            | Step::RunScript { base, .. } => base,
        }
    }

    /// The tag used on `StepResult.command` — matches the serde `kind` tag.
    pub fn command_tag(&self) -> &'static str {
        match self {
            Step::Tap { .. } => "tap",
            Step::DoubleTap { .. } => "doubleTap",
            Step::LongPress { .. } => "longPress",
            Step::TapOnPoint { .. } => "tapOnPoint",
            Step::Swipe { .. } => "swipe",
            Step::Scroll { .. } => "scroll",
            Step::ScrollUntilVisible { .. } => "scrollUntilVisible",
            Step::InputText { .. } => "inputText",
            Step::InputRandom { .. } => "inputRandom",
            Step::EraseText { .. } => "eraseText",
            Step::AssertVisible { .. } => "assertVisible",
            Step::AssertNotVisible { .. } => "assertNotVisible",
            Step::WaitUntil { .. } => "waitUntil",
            Step::WaitForAnimationToEnd { .. } => "waitForAnimationToEnd",
            Step::Back { .. } => "back",
            Step::HideKeyboard { .. } => "hideKeyboard",
            Step::LaunchApp { .. } => "launchApp",
            Step::StopApp { .. } => "stopApp",
            Step::KillApp { .. } => "killApp",
            Step::ClearState { .. } => "clearState",
            Step::SetLocation { .. } => "setLocation",
            Step::SetOrientation { .. } => "setOrientation",
            Step::OpenLink { .. } => "openLink",
            Step::CopyTextFrom { .. } => "copyTextFrom",
            Step::PasteText { .. } => "pasteText",
            Step::SetClipboard { .. } => "setClipboard",
            Step::PressKey { .. } => "pressKey",
            Step::TakeScreenshot { .. } => "takeScreenshot",
            Step::RunScript { .. } => "runScript",
        }
    }
}

/// The outcome of one driver-level command, before the executor attaches
/// timing and step bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub element: Option<crate::resolver::ElementInfo>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Errored,
    Skipped,
    Warned,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Passed
                | StepStatus::Failed
                | StepStatus::Errored
                | StepStatus::Skipped
                | StepStatus::Warned
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, StepStatus::Passed | StepStatus::Warned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub command: String,
    pub status: StepStatus,
    #[serde(default)]
    pub category: Option<Category>,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub retry_errors: Vec<String>,
    #[serde(default)]
    pub flaky: bool,
    #[serde(default)]
    pub attachments: Vec<String>,

    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub element: Option<crate::resolver::ElementInfo>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl StepResult {
    pub fn from_command_result(
        index: usize,
        command: &str,
        status: StepStatus,
        category: Option<Category>,
        result: CommandResult,
    ) -> Self {
        Self {
            index,
            command: command.to_string(),
            status,
            category,
            attempt: 1,
            max_attempts: 1,
            retry_errors: Vec::new(),
            flaky: false,
            attachments: Vec::new(),
            success: result.success,
            error: result.error,
            duration_ms: result.duration_ms,
            message: result.message,
            element: result.element,
            data: result.data,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResults {
    #[serde(default)]
    pub steps: Vec<StepResult>,
}

impl HookResults {
    pub fn has_failure(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.status, StepStatus::Failed | StepStatus::Errored))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warned: usize,
    pub flaky: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Passed,
    Failed,
    Warned,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowResult {
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub on_flow_start: HookResults,
    #[serde(default)]
    pub on_flow_complete: HookResults,
}

impl FlowResult {
    /// Roll up the hooks and main steps into one overall status.
    pub fn aggregate_status(&self) -> AggregateStatus {
        if self.on_flow_start.has_failure() {
            return AggregateStatus::Failed;
        }
        if self.steps.iter().any(|s| matches!(s.status, StepStatus::Failed | StepStatus::Errored)) {
            return AggregateStatus::Failed;
        }
        if self.on_flow_complete.has_failure() {
            return AggregateStatus::Failed;
        }
        if self.steps.iter().any(|s| s.status == StepStatus::Warned) {
            return AggregateStatus::Warned;
        }
        AggregateStatus::Passed
    }

    pub fn summary(&self) -> FlowSummary {
        let mut summary = FlowSummary::default();
        for step in &self.steps {
            match step.status {
                StepStatus::Passed => summary.passed += 1,
                StepStatus::Failed | StepStatus::Errored => summary.failed += 1,
                StepStatus::Skipped => summary.skipped += 1,
                StepStatus::Warned => summary.warned += 1,
                StepStatus::Pending | StepStatus::Running => {}
            }
            if step.flaky {
                summary.flaky += 1;
            }
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        matches!(self.aggregate_status(), AggregateStatus::Passed | AggregateStatus::Warned)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteResult {
    pub flows: Vec<(String, FlowResult)>,
    #[serde(default)]
    pub generated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SuiteResult {
    pub fn passed_flow_count(&self) -> usize {
        self.flows.iter().filter(|(_, f)| f.is_success()).count()
    }

    /// `true` iff the flow list is non-empty and every flow `IsSuccess`.
    pub fn success(&self) -> bool {
        !self.flows.is_empty() && self.flows.iter().all(|(_, f)| f.is_success())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowWithHooks {
    #[serde(default)]
    pub on_flow_start: Vec<Step>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub on_flow_complete: Vec<Step>,
}

pub type Details = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: StepStatus) -> StepResult {
        StepResult {
            index: 0,
            command: "tap".to_string(),
            status,
            category: None,
            attempt: 1,
            max_attempts: 1,
            retry_errors: Vec::new(),
            flaky: false,
            attachments: Vec::new(),
            success: status.is_success(),
            error: None,
            duration_ms: 0,
            message: None,
            element: None,
            data: None,
        }
    }

    #[test]
    fn terminal_and_success_predicates_cover_expected_statuses() {
        for status in [
            StepStatus::Passed,
            StepStatus::Failed,
            StepStatus::Errored,
            StepStatus::Skipped,
            StepStatus::Warned,
        ] {
            assert!(status.is_terminal());
        }
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());

        assert!(StepStatus::Passed.is_success());
        assert!(StepStatus::Warned.is_success());
        assert!(!StepStatus::Failed.is_success());
    }

    #[test]
    fn on_flow_start_failure_marks_whole_flow_failed() {
        let flow = FlowResult {
            steps: vec![result(StepStatus::Passed)],
            on_flow_start: HookResults {
                steps: vec![result(StepStatus::Failed)],
            },
            on_flow_complete: HookResults::default(),
        };
        assert_eq!(flow.aggregate_status(), AggregateStatus::Failed);
    }

    #[test]
    fn warned_step_with_no_failures_yields_warned_flow() {
        let flow = FlowResult {
            steps: vec![result(StepStatus::Passed), result(StepStatus::Warned)],
            on_flow_start: HookResults::default(),
            on_flow_complete: HookResults::default(),
        };
        assert_eq!(flow.aggregate_status(), AggregateStatus::Warned);
    }

    #[test]
    fn all_passed_yields_passed_flow() {
        let flow = FlowResult {
            steps: vec![result(StepStatus::Passed), result(StepStatus::Passed)],
            on_flow_start: HookResults::default(),
            on_flow_complete: HookResults::default(),
        };
        assert_eq!(flow.aggregate_status(), AggregateStatus::Passed);
    }

    #[test]
    fn summary_counts_errored_as_failed() {
        let flow = FlowResult {
            steps: vec![result(StepStatus::Passed), result(StepStatus::Errored)],
            on_flow_start: HookResults::default(),
            on_flow_complete: HookResults::default(),
        };
        let summary = flow.summary();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn suite_success_requires_non_empty_and_all_passing() {
        let empty = SuiteResult::default();
        assert!(!empty.success());

        let one_passed = SuiteResult {
            flows: vec![("a".to_string(), FlowResult {
                steps: vec![result(StepStatus::Passed)],
                on_flow_start: HookResults::default(),
                on_flow_complete: HookResults::default(),
            })],
            generated_at: None,
        };
        assert!(one_passed.success());
    }
}
