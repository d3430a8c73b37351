use events::Stage;

use crate::error::{OrchestratorError, Result};

/// Which state machine a stage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageScope {
    /// `preparing_workspace -> executing_provider -> completed`
    Job,
    /// `analyzing -> generating_message -> ... -> completed`
    AutoCommit,
}

/// Guards the order in which one pipeline run enters its stages.
///
/// Stages may be skipped but never repeated or revisited. `pushed` and
/// `push_failed` share a rank, so at most one of them is entered. The
/// auto-commit scope can only run between `executing_provider` and the job's
/// own `completed`.
#[derive(Debug, Default)]
pub struct StageTracker {
    job: Option<Stage>,
    commit: Option<Stage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, scope: StageScope, to: Stage) -> Result<()> {
        if self.job == Some(Stage::Completed) {
            return Err(OrchestratorError::invalid_transition(self.job, to));
        }

        match scope {
            StageScope::Job => {
                if to.is_commit_stage() {
                    return Err(OrchestratorError::invalid_transition(self.job, to));
                }
                Self::check_order(self.job, to)
            }
            StageScope::AutoCommit => {
                if self.job != Some(Stage::ExecutingProvider) {
                    return Err(OrchestratorError::invalid_transition(self.job, to));
                }
                if !to.is_commit_stage() && to != Stage::Completed {
                    return Err(OrchestratorError::invalid_transition(self.commit, to));
                }
                Self::check_order(self.commit, to)
            }
        }
    }

    fn check_order(current: Option<Stage>, to: Stage) -> Result<()> {
        match current {
            Some(from) if to.rank() <= from.rank() => {
                Err(OrchestratorError::invalid_transition(Some(from), to))
            }
            _ => Ok(()),
        }
    }

    pub fn enter(&mut self, scope: StageScope, to: Stage) -> Result<()> {
        self.validate(scope, to)?;
        match scope {
            StageScope::Job => self.job = Some(to),
            StageScope::AutoCommit => self.commit = Some(to),
        }
        Ok(())
    }

    pub fn current(&self) -> Option<Stage> {
        self.job
    }

    pub fn current_commit(&self) -> Option<Stage> {
        self.commit
    }

    pub fn is_finished(&self) -> bool {
        self.job == Some(Stage::Completed)
    }
}
