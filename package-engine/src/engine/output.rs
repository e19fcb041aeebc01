use tracing::warn;

use crate::installer::REBOOT_EXIT_CODE;

/// Final status of one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    InProgress,
    Success,
    Failed,
    Cancelled,
    Shutdown,
    RebootRequested,
}

impl RequestStatus {
    pub fn is_reboot(&self) -> bool {
        matches!(self, RequestStatus::RebootRequested)
    }
}

/// Mutable request outcome threaded through plan computation and execution.
/// The first decision sticks unless execution explicitly overrides it.
#[derive(Debug)]
pub struct RequestOutcome {
    status: RequestStatus,
    exit_code: i64,
}

impl Default for RequestOutcome {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestOutcome {
    pub fn new() -> Self {
        Self {
            status: RequestStatus::InProgress,
            exit_code: 0,
        }
    }

    pub fn mark_succeeded(&mut self) {
        self.status = RequestStatus::Success;
        self.exit_code = 0;
    }

    pub fn mark_failed(&mut self) {
        self.status = RequestStatus::Failed;
        self.exit_code = 1;
    }

    pub fn mark_cancelled(&mut self) {
        self.status = RequestStatus::Cancelled;
        self.exit_code = 1;
    }

    pub fn mark_shutdown(&mut self) {
        self.status = RequestStatus::Shutdown;
        self.exit_code = 1;
    }

    pub fn mark_reboot_requested(&mut self) {
        self.status = RequestStatus::RebootRequested;
        self.exit_code = REBOOT_EXIT_CODE;
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn exit_code(&self) -> i64 {
        self.exit_code
    }

    /// A decided outcome short-circuits execution.
    pub fn is_decided(&self) -> bool {
        matches!(self.status, RequestStatus::Success | RequestStatus::Failed)
    }

    /// Collapses a never-decided outcome into a failure at the request
    /// boundary.
    pub fn final_status(&self) -> RequestStatus {
        if self.status == RequestStatus::InProgress {
            warn!("request concluded without a decision, reporting failure");
            return RequestStatus::Failed;
        }
        self.status
    }
}

/// What the embedding runtime receives back from one engine invocation.
#[derive(Debug)]
pub struct EngineOutput {
    pub status: RequestStatus,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}
