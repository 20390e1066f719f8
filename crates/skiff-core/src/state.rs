use serde::{Deserialize, Serialize};

/// Task states, totally ordered along the agent pipeline. The wire names
/// match what the client-side manager expects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "AGENT_STAGING_INPUT_PENDING")]
    AgentStagingInputPending,
    #[serde(rename = "AGENT_STAGING_INPUT")]
    AgentStagingInput,
    #[serde(rename = "AGENT_SCHEDULING_PENDING")]
    AgentSchedulingPending,
    #[serde(rename = "AGENT_SCHEDULING")]
    AgentScheduling,
    #[serde(rename = "AGENT_EXECUTING_PENDING")]
    AgentExecutingPending,
    #[serde(rename = "AGENT_EXECUTING")]
    AgentExecuting,
    #[serde(rename = "AGENT_STAGING_OUTPUT_PENDING")]
    AgentStagingOutputPending,
    #[serde(rename = "AGENT_STAGING_OUTPUT")]
    AgentStagingOutput,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELED")]
    Canceled,
}

impl TaskState {
    /// Numeric position in the state order. All final states share one
    /// value so that none of them compares ahead of another.
    pub fn value(&self) -> i32 {
        match self {
            Self::New => 0,
            Self::AgentStagingInputPending => 1,
            Self::AgentStagingInput => 2,
            Self::AgentSchedulingPending => 3,
            Self::AgentScheduling => 4,
            Self::AgentExecutingPending => 5,
            Self::AgentExecuting => 6,
            Self::AgentStagingOutputPending => 7,
            Self::AgentStagingOutput => 8,
            Self::Done | Self::Failed | Self::Canceled => 9,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    /// Whether a task in this state holds slots on the resource map.
    pub fn holds_slots(&self) -> bool {
        matches!(
            self,
            Self::AgentExecutingPending | Self::AgentExecuting | Self::AgentStagingOutputPending
        )
    }

    /// States passed through when advancing from `self` to `target`,
    /// target included. Empty if `target` is not ahead of `self`.
    pub fn progression(&self, target: TaskState) -> Vec<TaskState> {
        const ORDER: [TaskState; 10] = [
            TaskState::New,
            TaskState::AgentStagingInputPending,
            TaskState::AgentStagingInput,
            TaskState::AgentSchedulingPending,
            TaskState::AgentScheduling,
            TaskState::AgentExecutingPending,
            TaskState::AgentExecuting,
            TaskState::AgentStagingOutputPending,
            TaskState::AgentStagingOutput,
            TaskState::Done,
        ];
        if target.value() <= self.value() {
            return Vec::new();
        }
        let mut passed: Vec<TaskState> = ORDER
            .iter()
            .copied()
            .filter(|s| s.value() > self.value() && s.value() < target.value())
            .collect();
        passed.push(target);
        passed
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::AgentStagingInputPending => "AGENT_STAGING_INPUT_PENDING",
            Self::AgentStagingInput => "AGENT_STAGING_INPUT",
            Self::AgentSchedulingPending => "AGENT_SCHEDULING_PENDING",
            Self::AgentScheduling => "AGENT_SCHEDULING",
            Self::AgentExecutingPending => "AGENT_EXECUTING_PENDING",
            Self::AgentExecuting => "AGENT_EXECUTING",
            Self::AgentStagingOutputPending => "AGENT_STAGING_OUTPUT_PENDING",
            Self::AgentStagingOutput => "AGENT_STAGING_OUTPUT",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finals_share_one_value() {
        assert_eq!(TaskState::Done.value(), TaskState::Failed.value());
        assert_eq!(TaskState::Done.value(), TaskState::Canceled.value());
        assert!(TaskState::Done.is_final());
        assert!(!TaskState::AgentExecuting.is_final());
    }

    #[test]
    fn progression_fills_intermediate_states() {
        let passed = TaskState::AgentSchedulingPending.progression(TaskState::AgentExecutingPending);
        assert_eq!(
            passed,
            vec![TaskState::AgentScheduling, TaskState::AgentExecutingPending]
        );
    }

    #[test]
    fn progression_never_goes_backward() {
        assert!(TaskState::AgentExecuting
            .progression(TaskState::AgentSchedulingPending)
            .is_empty());
        assert!(TaskState::Done.progression(TaskState::Done).is_empty());
    }

    #[test]
    fn holds_slots_matches_executing_window() {
        assert!(TaskState::AgentExecutingPending.holds_slots());
        assert!(TaskState::AgentExecuting.holds_slots());
        assert!(TaskState::AgentStagingOutputPending.holds_slots());
        assert!(!TaskState::AgentStagingOutput.holds_slots());
        assert!(!TaskState::AgentSchedulingPending.holds_slots());
    }

    #[test]
    fn wire_names_round_trip() {
        let json = serde_json::to_string(&TaskState::AgentExecutingPending).unwrap();
        assert_eq!(json, "\"AGENT_EXECUTING_PENDING\"");
        let back: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskState::AgentExecutingPending);
    }
}
