//! Hand-rolled collaborator fakes shared by the unit tests of the planner and
//! the executor.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

use crate::config::EngineConfig;
use crate::installer::{HookOutput, Installer, REBOOT_EXIT_CODE};
use crate::package_id::{PackageId, PackageVersion};
use crate::repository::{
    DownloadDelegate, InstallState, PackageRepository, RepositoryError,
};
use crate::service::{PackageResult, PackageService, ResolvedManifest, ServiceError};
use crate::trace::Tracer;

fn success() -> HookOutput {
    HookOutput::from_exit_code(0, String::new(), String::new())
}

fn failure(exit_code: i64) -> HookOutput {
    HookOutput::from_exit_code(exit_code, String::new(), "hook failed".to_string())
}

/// Scriptable [`Installer`] recording every hook invocation. Hooks succeed
/// unless a queued outcome says otherwise.
pub(crate) struct FakeInstaller {
    package_id: String,
    version: PackageVersion,
    install_outcomes: RefCell<VecDeque<HookOutput>>,
    uninstall_outcomes: RefCell<VecDeque<HookOutput>>,
    validate_outcomes: RefCell<VecDeque<HookOutput>>,
    calls: Rc<RefCell<Vec<String>>>,
}

impl FakeInstaller {
    pub fn new(package_id: &str, version: &str) -> Self {
        Self {
            package_id: package_id.to_string(),
            version: PackageVersion::new(version),
            install_outcomes: RefCell::default(),
            uninstall_outcomes: RefCell::default(),
            validate_outcomes: RefCell::default(),
            calls: Rc::default(),
        }
    }

    pub fn failing_install(self, times: usize) -> Self {
        self.install_outcomes
            .borrow_mut()
            .extend(std::iter::repeat_with(|| failure(1)).take(times));
        self
    }

    pub fn failing_uninstall(self, times: usize) -> Self {
        self.uninstall_outcomes
            .borrow_mut()
            .extend(std::iter::repeat_with(|| failure(1)).take(times));
        self
    }

    pub fn failing_validate(self, times: usize) -> Self {
        self.validate_outcomes
            .borrow_mut()
            .extend(std::iter::repeat_with(|| failure(1)).take(times));
        self
    }

    pub fn rebooting_install(self) -> Self {
        self.install_outcomes
            .borrow_mut()
            .push_back(HookOutput::from_exit_code(
                REBOOT_EXIT_CODE,
                String::new(),
                String::new(),
            ));
        self
    }

    pub fn calls(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.calls)
    }

    fn run(&self, hook: &str, outcomes: &RefCell<VecDeque<HookOutput>>) -> HookOutput {
        self.calls
            .borrow_mut()
            .push(format!("{hook}:{}", self.version));
        outcomes.borrow_mut().pop_front().unwrap_or_else(success)
    }
}

impl Installer for FakeInstaller {
    fn install(&self, _tracer: &Tracer) -> HookOutput {
        self.run("install", &self.install_outcomes)
    }

    fn uninstall(&self, _tracer: &Tracer) -> HookOutput {
        self.run("uninstall", &self.uninstall_outcomes)
    }

    fn validate(&self, _tracer: &Tracer) -> HookOutput {
        self.run("validate", &self.validate_outcomes)
    }

    fn version(&self) -> &PackageVersion {
        &self.version
    }

    fn package_name(&self) -> &str {
        &self.package_id
    }
}

/// In-memory [`PackageRepository`] recording state transitions, refreshes and
/// artifact removals.
pub(crate) struct FakeRepository {
    state: Cell<InstallState>,
    current_version: RefCell<Option<PackageVersion>>,
    installed_version: RefCell<Option<PackageVersion>>,
    valid_versions: RefCell<HashSet<String>>,
    refresh_failures: RefCell<HashSet<String>>,
    fail_all_refreshes: Cell<bool>,
    refreshed: RefCell<Vec<String>>,
    removed: RefCell<Vec<String>>,
    state_writes: RefCell<Vec<(String, InstallState)>>,
    trace_persist_count: Cell<usize>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self {
            state: Cell::new(InstallState::None),
            current_version: RefCell::default(),
            installed_version: RefCell::default(),
            valid_versions: RefCell::default(),
            refresh_failures: RefCell::default(),
            fail_all_refreshes: Cell::new(false),
            refreshed: RefCell::default(),
            removed: RefCell::default(),
            state_writes: RefCell::default(),
            trace_persist_count: Cell::new(0),
        }
    }

    /// A repository observing `version` installed, valid and in `Installed`
    /// state.
    pub fn installed(version: &str) -> Self {
        let repository = Self::new();
        repository.state.set(InstallState::Installed);
        *repository.current_version.borrow_mut() = Some(PackageVersion::new(version));
        *repository.installed_version.borrow_mut() = Some(PackageVersion::new(version));
        repository
            .valid_versions
            .borrow_mut()
            .insert(version.to_string());
        repository
    }

    pub fn set_observed_state(&self, state: InstallState, current: Option<PackageVersion>) {
        self.state.set(state);
        *self.current_version.borrow_mut() = current;
    }

    pub fn invalidate(&self, version: &str) {
        self.valid_versions.borrow_mut().remove(version);
    }

    pub fn fail_refresh(&self) {
        self.fail_all_refreshes.set(true);
    }

    pub fn fail_refresh_of(&self, version: &str) {
        self.refresh_failures.borrow_mut().insert(version.to_string());
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.borrow().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.borrow().clone()
    }

    pub fn state_writes(&self) -> Vec<(String, InstallState)> {
        self.state_writes.borrow().clone()
    }

    pub fn trace_persist_count(&self) -> usize {
        self.trace_persist_count.get()
    }
}

impl PackageRepository for FakeRepository {
    fn lock_package(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
        _action: &str,
    ) -> Result<(), RepositoryError> {
        Ok(())
    }

    fn unlock_package(&self, _tracer: &Tracer, _id: &PackageId) {}

    fn get_installed_version(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
    ) -> Result<Option<PackageVersion>, RepositoryError> {
        Ok(self.installed_version.borrow().clone())
    }

    fn get_install_state(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
    ) -> Result<(InstallState, Option<PackageVersion>), RepositoryError> {
        Ok((self.state.get(), self.current_version.borrow().clone()))
    }

    fn set_install_state(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
        version: &PackageVersion,
        state: InstallState,
    ) -> Result<(), RepositoryError> {
        self.state.set(state);
        *self.current_version.borrow_mut() = Some(version.clone());
        match state {
            InstallState::Installed => {
                *self.installed_version.borrow_mut() = Some(version.clone());
            }
            InstallState::Uninstalled => {
                *self.installed_version.borrow_mut() = None;
            }
            _ => {}
        }
        self.state_writes
            .borrow_mut()
            .push((version.to_string(), state));
        Ok(())
    }

    fn validate_package(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<(), RepositoryError> {
        if self.valid_versions.borrow().contains(version.as_str()) {
            Ok(())
        } else {
            Err(RepositoryError::IntegrityMismatch {
                package_id: id.to_string(),
                version: version.to_string(),
                reason: "not locally available".to_string(),
            })
        }
    }

    fn refresh_package(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
        version: &PackageVersion,
        _service_name: &str,
        _download: &DownloadDelegate<'_>,
    ) -> Result<(), RepositoryError> {
        self.refreshed.borrow_mut().push(version.to_string());
        if self.fail_all_refreshes.get()
            || self.refresh_failures.borrow().contains(version.as_str())
        {
            return Err(RepositoryError::Download("refresh failed".to_string()));
        }
        self.valid_versions
            .borrow_mut()
            .insert(version.as_str().to_string());
        Ok(())
    }

    fn get_installer(
        &self,
        _config: &EngineConfig,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Box<dyn Installer> {
        Box::new(FakeInstaller::new(id.as_str(), version.as_str()))
    }

    fn write_manifest(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
        _version: &PackageVersion,
        _service_name: &str,
        _content: &[u8],
    ) -> Result<bool, RepositoryError> {
        Ok(false)
    }

    fn remove_package(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
        version: &PackageVersion,
    ) -> Result<(), RepositoryError> {
        self.removed.borrow_mut().push(version.to_string());
        self.valid_versions.borrow_mut().remove(version.as_str());
        Ok(())
    }

    fn load_traces(&self, _tracer: &Tracer, _id: &PackageId) -> Result<(), RepositoryError> {
        Ok(())
    }

    fn persist_traces(&self, _tracer: &Tracer, _id: &PackageId) -> Result<(), RepositoryError> {
        self.trace_persist_count.set(self.trace_persist_count.get() + 1);
        Ok(())
    }
}

/// [`PackageService`] stub for tests that never reach the network.
pub(crate) struct FakeService;

impl FakeService {
    pub fn new() -> Self {
        Self
    }
}

impl PackageService for FakeService {
    fn download_manifest(
        &self,
        _tracer: &Tracer,
        _name: &str,
        _version: &PackageVersion,
    ) -> Result<ResolvedManifest, ServiceError> {
        Err(ServiceError::Manifest(
            "manifest download not scripted".to_string(),
        ))
    }

    fn download_artifact(
        &self,
        _tracer: &Tracer,
        _id: &PackageId,
        _version: &PackageVersion,
    ) -> Result<PathBuf, ServiceError> {
        Err(ServiceError::Artifact(
            "artifact download not scripted".to_string(),
        ))
    }

    fn package_service_name(&self) -> &'static str {
        "fake-service"
    }

    fn report_result(&self, _tracer: &Tracer, _result: PackageResult) -> Result<(), ServiceError> {
        Ok(())
    }
}
