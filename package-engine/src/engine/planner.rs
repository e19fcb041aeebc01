//! Plan computation: turns the requested action plus the observed package
//! state into the installers to run and the entry state for execution.

use std::path::Path;

use super::input::{ConfigureRequest, INSTALL_ACTION, UNINSTALL_ACTION};
use super::output::RequestOutcome;
use super::EngineError;
use crate::config::EngineConfig;
use crate::extract;
use crate::installer::Installer;
use crate::package_id::{PackageId, PackageVersion};
use crate::repository::{InstallState, PackageRepository, RepositoryError};
use crate::service::PackageService;
use crate::trace::Tracer;

/// What execution has to work with: the target installer, the installer of
/// the previously installed version (when one has to be removed), and the
/// observed entry state.
pub struct Plan {
    pub inst: Option<Box<dyn Installer>>,
    pub uninst: Option<Box<dyn Installer>>,
    pub state: InstallState,
    pub installed_version: Option<PackageVersion>,
}

impl Plan {
    fn empty(state: InstallState, installed_version: Option<PackageVersion>) -> Self {
        Self {
            inst: None,
            uninst: None,
            state,
            installed_version,
        }
    }
}

/// Ensures the packages needed for the requested scenario are locally present
/// and returns their installers. A request that can already be decided here
/// (short-circuit success, ensure failure, unsupported action) is marked on
/// `outcome` and returns an empty plan.
#[allow(clippy::too_many_arguments)]
pub fn prepare(
    tracer: &Tracer,
    config: &EngineConfig,
    repository: &dyn PackageRepository,
    service: &dyn PackageService,
    input: &ConfigureRequest,
    package_id: &PackageId,
    resolved_version: &PackageVersion,
    same_as_cache: bool,
    outcome: &mut RequestOutcome,
) -> Plan {
    let prepare_section = tracer.begin_section(&format!("prepare {}", input.action));
    let plan = match input.action.as_str() {
        INSTALL_ACTION => prepare_install(
            tracer,
            config,
            repository,
            service,
            package_id,
            resolved_version,
            same_as_cache,
            outcome,
        ),
        UNINSTALL_ACTION => prepare_uninstall(
            tracer,
            config,
            repository,
            service,
            input,
            package_id,
            resolved_version,
            same_as_cache,
            outcome,
        ),
        other => {
            prepare_section.append_error(&format!("unsupported action: {other}"));
            outcome.mark_failed();
            Plan::empty(InstallState::None, None)
        }
    };
    prepare_section.end();
    plan
}

#[allow(clippy::too_many_arguments)]
fn prepare_install(
    tracer: &Tracer,
    config: &EngineConfig,
    repository: &dyn PackageRepository,
    service: &dyn PackageService,
    package_id: &PackageId,
    resolved_version: &PackageVersion,
    same_as_cache: bool,
    outcome: &mut RequestOutcome,
) -> Plan {
    let section = tracer.begin_section("determine version to install");
    let (installed_version, install_state) = match version_to_install(tracer, repository, package_id)
    {
        Ok(observed) => observed,
        Err(err) => {
            section.with_error(&err);
            section.end();
            outcome.mark_failed();
            return Plan::empty(InstallState::None, None);
        }
    };
    section.append_debug(&format!(
        "installed: {installed_version:?} in state {install_state:?}, to install: {resolved_version}"
    ));
    section.end();

    let section = tracer.begin_section("ensure package is locally available");
    let inst = match ensure_package(
        tracer,
        config,
        repository,
        service,
        package_id,
        resolved_version,
        same_as_cache,
    ) {
        Ok(installer) => installer,
        Err(err) => {
            section.with_error(&err);
            section.end();
            outcome.mark_failed();
            return Plan::empty(install_state, installed_version);
        }
    };
    section.end();

    let section = tracer.begin_section("ensure old package is locally available");
    let mut uninst = None;
    if let Some(installed) = installed_version.as_ref() {
        if install_state != InstallState::None
            && (installed != resolved_version || !same_as_cache)
        {
            match ensure_package(
                tracer,
                config,
                repository,
                service,
                package_id,
                installed,
                same_as_cache,
            ) {
                Ok(installer) => uninst = Some(installer),
                // Proceed without the old installer; a required uninstall
                // then installs on top of the previous version.
                Err(err) => {
                    section.with_error(&err);
                }
            }
        }
    }
    section.end();

    Plan {
        inst: Some(inst),
        uninst,
        state: install_state,
        installed_version,
    }
}

#[allow(clippy::too_many_arguments)]
fn prepare_uninstall(
    tracer: &Tracer,
    config: &EngineConfig,
    repository: &dyn PackageRepository,
    service: &dyn PackageService,
    input: &ConfigureRequest,
    package_id: &PackageId,
    resolved_version: &PackageVersion,
    same_as_cache: bool,
    outcome: &mut RequestOutcome,
) -> Plan {
    let section = tracer.begin_section("determine version to uninstall");
    let (installed_version, install_state) =
        match version_to_uninstall(tracer, repository, package_id) {
            Ok(observed) => observed,
            Err(err) => {
                section.with_error(&err);
                section.end();
                outcome.mark_failed();
                return Plan::empty(InstallState::None, None);
            }
        };

    // An unpinned uninstall targets whatever is installed.
    let target_version = if input.version.is_latest() {
        installed_version.clone()
    } else {
        Some(resolved_version.clone())
    };

    let installed = match installed_version.as_ref() {
        Some(installed)
            if target_version.as_ref() == Some(installed)
                && !matches!(
                    install_state,
                    InstallState::None | InstallState::Uninstalled
                ) =>
        {
            installed.clone()
        }
        _ => {
            section.append_debug(&format!("version {target_version:?} is not installed"));
            section.end();
            outcome.mark_succeeded();
            return Plan::empty(InstallState::None, installed_version);
        }
    };
    section.append_debug(&format!(
        "installed: {installed} in state {install_state:?}"
    ));
    section.end();

    let section = tracer.begin_section("ensure package is locally available");
    match ensure_package(
        tracer,
        config,
        repository,
        service,
        package_id,
        &installed,
        same_as_cache,
    ) {
        Ok(installer) => {
            section.end();
            Plan {
                inst: None,
                uninst: Some(installer),
                state: install_state,
                installed_version,
            }
        }
        Err(err) => {
            section.with_error(&err);
            section.end();
            outcome.mark_failed();
            Plan::empty(install_state, installed_version)
        }
    }
}

/// Validates the local copy of the manifest and package content, refreshing
/// them from the service when invalid or stale, and returns the installer
/// bound to the resulting artifact tree.
pub(crate) fn ensure_package(
    tracer: &Tracer,
    config: &EngineConfig,
    repository: &dyn PackageRepository,
    service: &dyn PackageService,
    package_id: &PackageId,
    version: &PackageVersion,
    same_as_cache: bool,
) -> Result<Box<dyn Installer>, EngineError> {
    let section = tracer.begin_section("ensure package is available locally");

    let (current_state, current_version) = match repository.get_install_state(tracer, package_id) {
        Ok(observed) => observed,
        Err(err) => {
            section.with_error(&err);
            section.end();
            return Err(err.into());
        }
    };

    let needs_refresh = match repository.validate_package(tracer, package_id, version) {
        Err(err) => {
            section.append_debug(&format!("local content invalid: {err}"));
            true
        }
        Ok(()) => {
            current_version.as_ref() == Some(version)
                && (current_state == InstallState::Failed || !same_as_cache)
        }
    };

    if needs_refresh {
        section.append_debug(&format!(
            "current {current_version:?} target {version} state {current_state:?}"
        ));
        section.append_debug(&format!(
            "refreshing package content for {package_id} {version}"
        ));
        let delegate = build_download_delegate(service, package_id, version);
        if let Err(err) = repository.refresh_package(
            tracer,
            package_id,
            version,
            service.package_service_name(),
            &delegate,
        ) {
            section.with_error(&err);
            section.end();
            return Err(err.into());
        }
        if let Err(err) = repository.validate_package(tracer, package_id, version) {
            // still invalid after a fresh download: record the failed target
            if let Err(state_err) =
                repository.set_install_state(tracer, package_id, version, InstallState::Failed)
            {
                tracer.error_current(&state_err);
            }
            section.with_error(&err);
            section.end();
            return Err(err.into());
        }
    }

    section.end();
    Ok(repository.get_installer(config, package_id, version))
}

/// Builds the delegate the repository runs to populate a scratch directory:
/// download the compressed blob, unpack it, drop the blob.
fn build_download_delegate<'a>(
    service: &'a dyn PackageService,
    package_id: &'a PackageId,
    version: &'a PackageVersion,
) -> impl Fn(&Tracer, &Path) -> Result<(), RepositoryError> + 'a {
    move |tracer, target_dir| {
        let section = tracer.begin_section("download artifact");
        let blob = match service.download_artifact(tracer, package_id, version) {
            Ok(blob) => blob,
            Err(err) => {
                section.with_error(&err);
                section.end();
                return Err(RepositoryError::Download(err.to_string()));
            }
        };
        if let Err(err) = extract::extract_tar_gz(&blob, target_dir) {
            section.with_error(&err);
            section.end();
            return Err(RepositoryError::Download(format!(
                "failed to extract installer package {}: {err}",
                blob.display()
            )));
        }
        if let Err(err) = std::fs::remove_file(&blob) {
            section.with_error(&err);
            section.end();
            return Err(RepositoryError::Download(format!(
                "failed to delete compressed package {}: {err}",
                blob.display()
            )));
        }
        section.end();
        Ok(())
    }
}

/// Which version an install operates against: normally the last successfully
/// installed one; after a failure the version the failed transition operated
/// on, so the retry and any rollback are driven from it.
fn version_to_install(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
) -> Result<(Option<PackageVersion>, InstallState), RepositoryError> {
    let mut installed_version = repository.get_installed_version(tracer, package_id)?;
    let (current_state, current_version) = repository.get_install_state(tracer, package_id)?;
    if current_state == InstallState::Failed {
        installed_version = current_version;
    }
    Ok((installed_version, current_state))
}

fn version_to_uninstall(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
) -> Result<(Option<PackageVersion>, InstallState), RepositoryError> {
    let installed_version = repository.get_installed_version(tracer, package_id)?;
    let (current_state, _) = repository.get_install_state(tracer, package_id)?;
    if installed_version.is_none() {
        return Ok((None, InstallState::None));
    }
    Ok((installed_version, current_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::output::RequestStatus;
    use crate::test_support::{FakeRepository, FakeService};

    fn install_request(version: &str) -> ConfigureRequest {
        ConfigureRequest {
            name: "web".to_string(),
            version: PackageVersion::new(version),
            action: INSTALL_ACTION.to_string(),
            repository: String::new(),
        }
    }

    fn uninstall_request(version: &str) -> ConfigureRequest {
        ConfigureRequest {
            action: UNINSTALL_ACTION.to_string(),
            ..install_request(version)
        }
    }

    fn pkg() -> PackageId {
        PackageId::try_from("arn-web").unwrap()
    }

    fn v(version: &str) -> PackageVersion {
        PackageVersion::new(version)
    }

    fn prepare_with(
        repository: &FakeRepository,
        input: &ConfigureRequest,
        resolved: &PackageVersion,
        same_as_cache: bool,
        outcome: &mut RequestOutcome,
    ) -> Plan {
        prepare(
            &Tracer::new(),
            &EngineConfig::default(),
            repository,
            &FakeService::new(),
            input,
            &pkg(),
            resolved,
            same_as_cache,
            outcome,
        )
    }

    #[test]
    fn fresh_install_plans_target_only_and_refreshes_it() {
        let repository = FakeRepository::new();
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &install_request("1.0"),
            &v("1.0"),
            false,
            &mut outcome,
        );

        assert!(!outcome.is_decided());
        assert!(plan.inst.is_some());
        assert!(plan.uninst.is_none());
        assert_eq!(plan.state, InstallState::None);
        assert_eq!(repository.refreshed(), vec!["1.0"]);
    }

    #[test]
    fn upgrade_plans_both_installers() {
        let repository = FakeRepository::installed("1.0");
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &install_request("2.0"),
            &v("2.0"),
            false,
            &mut outcome,
        );

        assert!(!outcome.is_decided());
        assert_eq!(
            plan.inst.as_ref().map(|installer| installer.version().clone()),
            Some(v("2.0"))
        );
        assert_eq!(
            plan.uninst.as_ref().map(|installer| installer.version().clone()),
            Some(v("1.0"))
        );
        assert_eq!(plan.installed_version, Some(v("1.0")));
        // the target is refreshed; the old version is the current one and the
        // manifest changed, so it is re-ensured too
        assert_eq!(repository.refreshed(), vec!["2.0", "1.0"]);
    }

    #[test]
    fn cache_hit_on_installed_version_skips_refresh() {
        let repository = FakeRepository::installed("1.0");
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &install_request("1.0"),
            &v("1.0"),
            true,
            &mut outcome,
        );

        assert!(plan.inst.is_some());
        assert!(plan.uninst.is_none());
        assert!(repository.refreshed().is_empty());
    }

    #[test]
    fn changed_manifest_on_installed_version_forces_refresh_and_old_installer() {
        let repository = FakeRepository::installed("1.0");
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &install_request("1.0"),
            &v("1.0"),
            false,
            &mut outcome,
        );

        // same version but stale cache: re-ensure it and keep an uninstaller
        assert!(plan.inst.is_some());
        assert!(plan.uninst.is_some());
        assert_eq!(repository.refreshed(), vec!["1.0", "1.0"]);
    }

    #[test]
    fn failed_state_drives_install_from_current_version() {
        let repository = FakeRepository::installed("1.0");
        repository.set_observed_state(InstallState::Failed, Some(v("2.0")));
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &install_request("2.0"),
            &v("2.0"),
            false,
            &mut outcome,
        );

        assert_eq!(plan.installed_version, Some(v("2.0")));
        assert_eq!(plan.state, InstallState::Failed);
    }

    #[test]
    fn ensure_failure_of_target_fails_the_request() {
        let repository = FakeRepository::new();
        repository.fail_refresh();
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &install_request("1.0"),
            &v("1.0"),
            false,
            &mut outcome,
        );

        assert_eq!(outcome.status(), RequestStatus::Failed);
        assert!(plan.inst.is_none());
    }

    #[test]
    fn ensure_failure_of_old_version_is_not_fatal() {
        let repository = FakeRepository::installed("1.0");
        // the old artifact is gone and cannot be refreshed again
        repository.invalidate("1.0");
        repository.fail_refresh_of("1.0");
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &install_request("2.0"),
            &v("2.0"),
            false,
            &mut outcome,
        );

        assert!(!outcome.is_decided());
        assert!(plan.inst.is_some());
        assert!(plan.uninst.is_none());
    }

    #[test]
    fn uninstall_of_absent_package_short_circuits_success() {
        let repository = FakeRepository::new();
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &uninstall_request(""),
            &v("1.0"),
            false,
            &mut outcome,
        );

        assert_eq!(outcome.status(), RequestStatus::Success);
        assert!(plan.inst.is_none());
        assert!(plan.uninst.is_none());
        assert_eq!(plan.state, InstallState::None);
        assert!(repository.refreshed().is_empty());
    }

    #[test]
    fn uninstall_of_different_version_short_circuits_success() {
        let repository = FakeRepository::installed("1.0");
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &uninstall_request("2.0"),
            &v("2.0"),
            false,
            &mut outcome,
        );

        assert_eq!(outcome.status(), RequestStatus::Success);
        assert!(plan.uninst.is_none());
    }

    #[test]
    fn uninstall_of_installed_version_plans_uninstaller() {
        let repository = FakeRepository::installed("1.0");
        let mut outcome = RequestOutcome::new();

        let plan = prepare_with(
            &repository,
            &uninstall_request(""),
            &v("1.0"),
            false,
            &mut outcome,
        );

        assert!(!outcome.is_decided());
        assert!(plan.inst.is_none());
        assert_eq!(
            plan.uninst.as_ref().map(|installer| installer.version().clone()),
            Some(v("1.0"))
        );
    }

    #[test]
    fn unsupported_action_fails_the_request() {
        let repository = FakeRepository::new();
        let mut outcome = RequestOutcome::new();

        let request = ConfigureRequest {
            action: "Reinstall".to_string(),
            ..install_request("1.0")
        };
        let plan = prepare_with(&repository, &request, &v("1.0"), false, &mut outcome);

        assert_eq!(outcome.status(), RequestStatus::Failed);
        assert!(plan.inst.is_none());
        assert!(plan.uninst.is_none());
    }
}
