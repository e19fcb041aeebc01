//! Request orchestration: cancellation check, input validation, service
//! selection, manifest resolution, locking, plan computation, execution and
//! result reporting, in that order. The lock is released on every exit path.

use thiserror::Error;
use tracing::{debug, error};

use crate::cancel::CancelFlag;
use crate::config::EngineConfig;
use crate::package_id::PackageVersion;
use crate::platform;
use crate::repository::{LocalFileRepository, PackageRepository, RepositoryError};
use crate::service::selector::{select_service, ServiceSelector};
use crate::service::{PackageResult, PackageService, ResolvedManifest, ServiceError};
use crate::trace::Tracer;

pub mod executor;
pub mod input;
pub mod output;
pub mod planner;

use input::{parse_and_validate, ConfigureRequest, INSTALL_ACTION, UNINSTALL_ACTION};
use output::{EngineOutput, RequestOutcome};
use planner::Plan;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// The package configuration engine. One [`Engine::execute`] call serves one
/// declarative request; the engine is reentrant across packages and the
/// per-package lock serializes requests for the same package across
/// processes.
pub struct Engine<R: PackageRepository> {
    config: EngineConfig,
    repository: R,
    selector: ServiceSelector,
}

impl Engine<LocalFileRepository> {
    pub fn new(config: EngineConfig) -> Self {
        let repository = LocalFileRepository::new(config.repository_root.clone());
        Self {
            config,
            repository,
            selector: select_service,
        }
    }
}

impl<R: PackageRepository> Engine<R> {
    /// Builds an engine over explicit collaborators; used by the embedding
    /// agent's composition root and by tests.
    pub fn with_parts(config: EngineConfig, repository: R, selector: ServiceSelector) -> Self {
        Self {
            config,
            repository,
            selector,
        }
    }

    /// Runs one request to completion and returns its outcome with the
    /// rendered trace streams.
    pub fn execute(&self, raw_input: &serde_json::Value, cancel: &CancelFlag) -> EngineOutput {
        let tracer = Tracer::new();
        let main_section = tracer.begin_section("configure package");
        let mut outcome = RequestOutcome::new();

        if cancel.shutdown() {
            outcome.mark_shutdown();
        } else if cancel.canceled() {
            outcome.mark_cancelled();
        } else {
            match parse_and_validate(raw_input) {
                Ok(request) => self.execute_configure(&tracer, &request, &mut outcome),
                Err(err) => {
                    tracer.error_current(&err);
                    outcome.mark_failed();
                }
            }
        }

        main_section.end();
        let (stdout, stderr) = tracer.render();
        EngineOutput {
            status: outcome.final_status(),
            exit_code: outcome.exit_code(),
            stdout,
            stderr,
        }
    }

    fn execute_configure(
        &self,
        tracer: &Tracer,
        request: &ConfigureRequest,
        outcome: &mut RequestOutcome,
    ) {
        let region = platform::region();
        let service = (self.selector)(
            tracer,
            &self.config,
            &request.repository,
            region.as_deref(),
            &self.repository,
        );

        // The manifest is always downloaded before acting on the request: it
        // resolves the name and any `latest` hint to a concrete target.
        let resolved = match resolve_manifest(tracer, service.as_ref(), request) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracer.error_current(&err);
                outcome.mark_failed();
                return;
            }
        };

        // One action at a time per package, across concurrent runtimes.
        if let Err(err) =
            self.repository
                .lock_package(tracer, &resolved.package_id, &request.action)
        {
            tracer.error_current(&err);
            outcome.mark_failed();
            return;
        }
        self.locked_configure(tracer, request, service.as_ref(), &resolved, outcome);
        self.repository.unlock_package(tracer, &resolved.package_id);
    }

    fn locked_configure(
        &self,
        tracer: &Tracer,
        request: &ConfigureRequest,
        service: &dyn PackageService,
        resolved: &ResolvedManifest,
        outcome: &mut RequestOutcome,
    ) {
        debug!(
            action = %request.action,
            name = %request.name,
            version = %request.version,
            "preparing configuration change"
        );
        let plan = planner::prepare(
            tracer,
            &self.config,
            &self.repository,
            service,
            request,
            &resolved.package_id,
            &resolved.version,
            resolved.same_as_cache,
            outcome,
        );
        debug!(
            has_inst = plan.inst.is_some(),
            has_uninst = plan.uninst.is_some(),
            entry_state = ?plan.state,
            package_id = %resolved.package_id,
            installed_version = ?plan.installed_version,
            "prepared configuration change"
        );

        if !outcome.is_decided() {
            let already_installed = executor::check_already_installed(
                tracer,
                &self.repository,
                &resolved.package_id,
                &plan,
                outcome,
            );
            // A changed manifest forces execution even for an apparently
            // installed package; its content has moved under the version.
            if !already_installed || !resolved.same_as_cache {
                debug!(status = ?outcome.status(), "running state transitions");
                executor::execute(
                    tracer,
                    &self.repository,
                    &resolved.package_id,
                    &plan,
                    outcome,
                );
            }
        }

        if let Err(err) = self.repository.load_traces(tracer, &resolved.package_id) {
            error!("Error loading prior traces: {err}");
        }
        if outcome.status().is_reboot() {
            if let Err(err) = self.repository.persist_traces(tracer, &resolved.package_id) {
                error!("Error persisting traces: {err}");
            }
        } else {
            self.report_result(tracer, request, service, resolved, &plan, outcome);
        }
    }

    fn report_result(
        &self,
        tracer: &Tracer,
        request: &ConfigureRequest,
        service: &dyn PackageService,
        resolved: &ResolvedManifest,
        plan: &Plan,
        outcome: &mut RequestOutcome,
    ) {
        let version = match request.action.as_str() {
            INSTALL_ACTION => plan.inst.as_deref().map(|installer| installer.version().clone()),
            UNINSTALL_ACTION => plan
                .uninst
                .as_deref()
                .map(|installer| installer.version().clone()),
            _ => None,
        }
        .unwrap_or_else(|| resolved.version.clone());

        let result = PackageResult {
            exit_code: outcome.exit_code(),
            operation: request.action.clone(),
            package_name: request.name.clone(),
            previous_package_version: plan.installed_version.clone(),
            timing: tracer.earliest_start(),
            version,
            trace: tracer.records(),
        };
        if let Err(err) = service.report_result(tracer, result) {
            // reporting is best-effort; the request outcome stands
            tracer.error_current(&format!("Error reporting results: {err}"));
        }
    }
}

pub(crate) fn resolve_manifest(
    tracer: &Tracer,
    service: &dyn PackageService,
    request: &ConfigureRequest,
) -> Result<ResolvedManifest, ServiceError> {
    let section = tracer.begin_section("download manifest");
    let hint = if request.version.is_latest() {
        PackageVersion::latest()
    } else {
        request.version.clone()
    };
    match service.download_manifest(tracer, &request.name, &hint) {
        Ok(resolved) => {
            section.append_debug(&format!(
                "got manifest for package {} version {} same_as_cache {}",
                resolved.package_id, resolved.version, resolved.same_as_cache
            ));
            section.end();
            Ok(resolved)
        }
        Err(err) => {
            section.with_error(&err);
            section.end();
            Err(err)
        }
    }
}
