use crate::package_id::PackageVersion;
use crate::trace::Tracer;

pub mod script;

/// Exit code an installer hook uses to request a host reboot before the
/// transition can conclude. Not an error.
pub const REBOOT_EXIT_CODE: i64 = 3010;

/// 8-bit reboot exit code for shell hooks, which cannot return 3010.
pub const REBOOT_SCRIPT_EXIT_CODE: i64 = 194;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Success,
    Failed,
    TimedOut,
}

/// Captured outcome of one installer hook invocation.
#[derive(Debug, Clone)]
pub struct HookOutput {
    pub status: HookStatus,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl HookOutput {
    pub fn from_exit_code(exit_code: i64, stdout: String, stderr: String) -> Self {
        let status = match exit_code {
            0 | REBOOT_EXIT_CODE | REBOOT_SCRIPT_EXIT_CODE => HookStatus::Success,
            _ => HookStatus::Failed,
        };
        Self {
            status,
            exit_code,
            stdout,
            stderr,
        }
    }

    pub fn failed(exit_code: i64, stderr: String) -> Self {
        Self {
            status: HookStatus::Failed,
            exit_code,
            stdout: String::new(),
            stderr,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == HookStatus::Success && !self.is_reboot()
    }

    /// A reboot request is signalled through the reboot exit codes; a timed
    /// out hook never requests one.
    pub fn is_reboot(&self) -> bool {
        self.status != HookStatus::TimedOut
            && (self.exit_code == REBOOT_EXIT_CODE || self.exit_code == REBOOT_SCRIPT_EXIT_CODE)
    }
}

/// Per-package lifecycle hooks, produced by the repository from the on-disk
/// artifact tree of one concrete (package, version).
pub trait Installer {
    fn install(&self, tracer: &Tracer) -> HookOutput;
    fn uninstall(&self, tracer: &Tracer) -> HookOutput;
    fn validate(&self, tracer: &Tracer) -> HookOutput;

    /// Version this installer was built for.
    fn version(&self) -> &PackageVersion;

    /// Canonical package identifier this installer was built for.
    fn package_name(&self) -> &str;
}
