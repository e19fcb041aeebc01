//! Execution driver: runs installer hooks against the computed plan, drives
//! rollback on failure, interprets reboot requests and finalizes the
//! persisted install state.

use tracing::debug;

use super::output::RequestOutcome;
use super::planner::Plan;
use crate::installer::Installer;
use crate::package_id::PackageId;
use crate::repository::{InstallState, PackageRepository};
use crate::trace::Tracer;

/// Entry fast-path: returns true when the version being installed is already
/// in a valid installed state (including a transition concluded by a reboot),
/// finalizing the persisted state and the request outcome accordingly.
pub fn check_already_installed(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    plan: &Plan,
    outcome: &mut RequestOutcome,
) -> bool {
    let check_section = tracer.begin_section("check if already installed");

    let Some(inst) = plan.inst.as_deref() else {
        check_section.with_exit_code(1);
        check_section.end();
        return false;
    };
    let target_version = inst.version();
    let package_name = inst.package_name();
    let install_state = plan.state;

    let mut inst_to_check: Option<&dyn Installer> = None;
    // A resumed rollback validates the version being rolled back to, which
    // supports rolling back to an installer with an unconditional reboot.
    if plan.uninst.is_some() && install_state == InstallState::RollbackInstall {
        inst_to_check = plan.uninst.as_deref();
    }
    if (plan.installed_version.as_ref() == Some(target_version)
        && matches!(install_state, InstallState::Installed | InstallState::Unknown))
        || install_state == InstallState::Installing
    {
        inst_to_check = Some(inst);
    }

    if let Some(to_check) = inst_to_check {
        let validate_section = tracer.begin_section(&format!(
            "run validate for {}/{}",
            to_check.package_name(),
            to_check.version()
        ));
        let validate_output = to_check.validate(tracer);
        validate_section.with_exit_code(validate_output.exit_code);

        if validate_output.is_success() {
            match install_state {
                InstallState::Installing => {
                    validate_section.append_info(&format!(
                        "Successfully installed {package_name} {target_version}"
                    ));
                    if let Some(uninst) = plan.uninst.as_deref() {
                        cleanup_after_uninstall(tracer, repository, package_id, uninst);
                    }
                    outcome.mark_succeeded();
                }
                InstallState::RollbackInstall => {
                    validate_section.append_info(&format!(
                        "Failed to install {package_name} {target_version}, successfully rolled back to {} {}",
                        to_check.package_name(),
                        to_check.version()
                    ));
                    cleanup_after_uninstall(tracer, repository, package_id, inst);
                    outcome.mark_failed();
                }
                _ => {
                    validate_section.append_debug(&format!(
                        "{package_name} {target_version} is already installed"
                    ));
                    outcome.mark_succeeded();
                }
            }
            if !matches!(
                install_state,
                InstallState::Installed | InstallState::Unknown
            ) {
                if let Err(err) = repository.set_install_state(
                    tracer,
                    package_id,
                    to_check.version(),
                    InstallState::Installed,
                ) {
                    tracer.error_current(&err);
                }
            }
            validate_section.end();
            check_section.end();
            return true;
        }

        validate_section.append_info(&validate_output.stdout);
        validate_section.append_error(&validate_output.stderr);
        validate_section.end();
    }

    check_section.with_exit_code(1);
    check_section.end();
    false
}

/// Runs the main state transitions for the plan, entering at the persisted
/// state observed during plan computation.
pub fn execute(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    plan: &Plan,
    outcome: &mut RequestOutcome,
) {
    let inst = plan.inst.as_deref();
    let uninst = plan.uninst.as_deref();
    debug!(
        entry_state = ?plan.state,
        has_inst = inst.is_some(),
        has_uninst = uninst.is_some(),
        "executing configuration change"
    );

    match plan.state {
        // resume a rollback: re-install the previously installed version
        InstallState::RollbackInstall => match uninst {
            Some(old) => execute_install(tracer, repository, package_id, old, inst, true, outcome),
            None => fail_without_installer(tracer, repository, package_id, plan, outcome),
        },
        // resume a rollback that was still removing the failed new version
        InstallState::RollbackUninstall => match inst {
            Some(new) => {
                execute_uninstall(tracer, repository, package_id, new, uninst, true, outcome)
            }
            None => fail_without_installer(tracer, repository, package_id, plan, outcome),
        },
        // an interrupted install retries the install hook; an uninstaller, if
        // present, is only cleanup material for after success
        InstallState::Installing => match inst {
            Some(target) => {
                execute_install(tracer, repository, package_id, target, uninst, false, outcome)
            }
            None => fail_without_installer(tracer, repository, package_id, plan, outcome),
        },
        _ => {
            if let Some(old) = uninst {
                // remove the present version first; for an install request the
                // target installer runs afterwards
                execute_uninstall(tracer, repository, package_id, old, inst, false, outcome);
            } else if let Some(target) = inst {
                execute_install(tracer, repository, package_id, target, None, false, outcome);
            } else {
                tracer.error_current(&"no installer available for the requested transition");
                outcome.mark_failed();
            }
        }
    }
}

/// Installs `target`. In the rollback arm `other` is the failed new version
/// to clean up after success; in the forward arm it is the old version to
/// clean up after success and to roll back to on failure.
fn execute_install(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    target: &dyn Installer,
    other: Option<&dyn Installer>,
    rollback: bool,
    outcome: &mut RequestOutcome,
) {
    let state = if rollback {
        InstallState::RollbackInstall
    } else {
        InstallState::Installing
    };
    if !enter_transition(tracer, repository, package_id, target, state, outcome) {
        return;
    }

    let section = tracer.begin_section(&format!(
        "run install for {}/{}",
        target.package_name(),
        target.version()
    ));
    let mut output = target.install(tracer);
    section.with_exit_code(output.exit_code);
    if output.is_reboot() {
        section.append_info("install requested a reboot");
        section.end();
        outcome.mark_reboot_requested();
        return;
    }

    if output.is_success() {
        output = target.validate(tracer);
        section.with_exit_code(output.exit_code);
        if output.is_reboot() {
            section.append_info("validate requested a reboot");
            section.end();
            outcome.mark_reboot_requested();
            return;
        }
    }

    if output.is_success() {
        if let Some(other) = other {
            cleanup_after_uninstall(tracer, repository, package_id, other);
        }
        if let Err(err) =
            repository.set_install_state(tracer, package_id, target.version(), InstallState::Installed)
        {
            section.with_error(&err);
            section.end();
            outcome.mark_failed();
            return;
        }
        if rollback {
            section.append_info(&format!(
                "successfully rolled back to {} {}",
                target.package_name(),
                target.version()
            ));
            outcome.mark_failed();
        } else {
            section.append_info(&format!(
                "Successfully installed {} {}",
                target.package_name(),
                target.version()
            ));
            outcome.mark_succeeded();
        }
        section.end();
        return;
    }

    section.append_info(&output.stdout);
    section.append_error(&output.stderr);

    if !rollback {
        if let Some(old) = other {
            section.append_error(&format!(
                "Failed to install {} {}, rolling back to {} {}",
                target.package_name(),
                target.version(),
                old.package_name(),
                old.version()
            ));
            section.end();
            execute_install(tracer, repository, package_id, old, Some(target), true, outcome);
            return;
        }
    }
    section.end();
    conclude_failed(tracer, repository, package_id, target, outcome);
}

/// Uninstalls `target`. In the forward arm `next_inst` is the version to
/// install afterwards (upgrade); in the rollback arm it is the previously
/// installed version to re-install.
fn execute_uninstall(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    target: &dyn Installer,
    next_inst: Option<&dyn Installer>,
    rollback: bool,
    outcome: &mut RequestOutcome,
) {
    let state = if rollback {
        InstallState::RollbackUninstall
    } else {
        InstallState::Uninstalling
    };
    if !enter_transition(tracer, repository, package_id, target, state, outcome) {
        return;
    }

    let section = tracer.begin_section(&format!(
        "run uninstall for {}/{}",
        target.package_name(),
        target.version()
    ));
    let output = target.uninstall(tracer);
    section.with_exit_code(output.exit_code);
    if output.is_reboot() {
        section.append_info("uninstall requested a reboot");
        section.end();
        outcome.mark_reboot_requested();
        return;
    }

    if output.is_success() {
        section.end();
        if rollback {
            // removed the failed new version; now re-install the old one
            match next_inst {
                Some(old) => execute_install(
                    tracer,
                    repository,
                    package_id,
                    old,
                    Some(target),
                    true,
                    outcome,
                ),
                None => conclude_failed(tracer, repository, package_id, target, outcome),
            }
        } else if let Some(next) = next_inst {
            execute_install(
                tracer,
                repository,
                package_id,
                next,
                Some(target),
                false,
                outcome,
            );
        } else {
            cleanup_after_uninstall(tracer, repository, package_id, target);
            if let Err(err) = repository.set_install_state(
                tracer,
                package_id,
                target.version(),
                InstallState::Uninstalled,
            ) {
                tracer.error_current(&err);
                outcome.mark_failed();
                return;
            }
            tracer.info_current(&format!(
                "Successfully uninstalled {} {}",
                target.package_name(),
                target.version()
            ));
            outcome.mark_succeeded();
        }
        return;
    }

    section.append_info(&output.stdout);
    section.append_error(&output.stderr);

    if !rollback {
        if let Some(next) = next_inst {
            // could not remove the old version during an upgrade: re-enter it
            section.append_error(&format!(
                "Failed to uninstall {} {}, rolling back to it",
                target.package_name(),
                target.version()
            ));
            section.end();
            execute_install(tracer, repository, package_id, target, Some(next), true, outcome);
            return;
        }
    }
    section.end();
    conclude_failed(tracer, repository, package_id, target, outcome);
}

/// Persists the non-terminal transition state and makes the trace buffer
/// durable before the hook runs, so a crash or reboot mid-hook can be
/// resumed with its history intact.
fn enter_transition(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    target: &dyn Installer,
    state: InstallState,
    outcome: &mut RequestOutcome,
) -> bool {
    if let Err(err) = repository.set_install_state(tracer, package_id, target.version(), state) {
        tracer.error_current(&err);
        outcome.mark_failed();
        return false;
    }
    if let Err(err) = repository.persist_traces(tracer, package_id) {
        tracer.error_current(&err);
    }
    true
}

fn conclude_failed(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    target: &dyn Installer,
    outcome: &mut RequestOutcome,
) {
    if let Err(err) =
        repository.set_install_state(tracer, package_id, target.version(), InstallState::Failed)
    {
        tracer.error_current(&err);
    }
    outcome.mark_failed();
}

fn fail_without_installer(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    plan: &Plan,
    outcome: &mut RequestOutcome,
) {
    tracer.error_current(&format!(
        "cannot resume from {:?}: required installer is not available",
        plan.state
    ));
    if let Some(version) = plan
        .inst
        .as_deref()
        .or(plan.uninst.as_deref())
        .map(|installer| installer.version().clone())
        .or_else(|| plan.installed_version.clone())
    {
        if let Err(err) =
            repository.set_install_state(tracer, package_id, &version, InstallState::Failed)
        {
            tracer.error_current(&err);
        }
    }
    outcome.mark_failed();
}

/// Deletes the stored artifact tree of a version whose uninstall is logically
/// final; the top-level record state stays with the successor transition.
fn cleanup_after_uninstall(
    tracer: &Tracer,
    repository: &dyn PackageRepository,
    package_id: &PackageId,
    installer: &dyn Installer,
) {
    let section = tracer.begin_section(&format!(
        "cleanup {}/{}",
        installer.package_name(),
        installer.version()
    ));
    if let Err(err) = repository.remove_package(tracer, package_id, installer.version()) {
        section.with_error(&err);
    }
    section.end();
}
