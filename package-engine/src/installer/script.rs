use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{HookOutput, HookStatus, Installer};
use crate::package_id::{PackageId, PackageVersion};
use crate::trace::Tracer;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const INSTALL_SCRIPT: &str = "install.sh";
pub const UNINSTALL_SCRIPT: &str = "uninstall.sh";
pub const VALIDATE_SCRIPT: &str = "validate.sh";

/// Installer backed by the hook scripts of an unpacked artifact tree.
///
/// Each hook runs `sh <script>` with the artifact root as working directory,
/// captured stdio and an upper time bound. A hook that overruns the bound is
/// killed and reported as timed out.
pub struct ScriptInstaller {
    package_id: PackageId,
    version: PackageVersion,
    artifact_dir: PathBuf,
    hook_timeout: Duration,
}

impl ScriptInstaller {
    pub fn new(
        package_id: PackageId,
        version: PackageVersion,
        artifact_dir: PathBuf,
        hook_timeout: Duration,
    ) -> Self {
        Self {
            package_id,
            version,
            artifact_dir,
            hook_timeout,
        }
    }

    fn run_script(&self, tracer: &Tracer, script: &str) -> HookOutput {
        let script_path = self.artifact_dir.join(script);
        if !script_path.is_file() {
            // A package may omit its validate hook; presence of the artifact
            // tree is then the whole check.
            if script == VALIDATE_SCRIPT {
                return if self.artifact_dir.is_dir() {
                    HookOutput::from_exit_code(0, String::new(), String::new())
                } else {
                    HookOutput::failed(
                        1,
                        format!("artifact tree missing at {}", self.artifact_dir.display()),
                    )
                };
            }
            return HookOutput::failed(
                1,
                format!("hook script {script} missing for {}", self.package_id),
            );
        }

        tracer.info_current(&format!(
            "running {script} for {} {}",
            self.package_id, self.version
        ));
        debug!(package_id = %self.package_id, script, "running installer hook");

        let child = Command::new("sh")
            .arg(&script_path)
            .current_dir(&self.artifact_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(err) => {
                return HookOutput::failed(-1, format!("failed to start {script}: {err}"));
            }
        };

        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let status = match self.wait_with_timeout(&mut child) {
            Ok(status) => status,
            Err(mut output) => {
                // collect whatever the killed process wrote
                output.stdout = join_reader(stdout_reader);
                let captured = join_reader(stderr_reader);
                if !captured.is_empty() {
                    output.stderr = format!("{captured}\n{}", output.stderr);
                }
                return output;
            }
        };

        let exit_code = i64::from(status.code().unwrap_or(-1));
        HookOutput::from_exit_code(exit_code, join_reader(stdout_reader), join_reader(stderr_reader))
    }

    fn wait_with_timeout(&self, child: &mut Child) -> Result<std::process::ExitStatus, HookOutput> {
        let deadline = Instant::now() + self.hook_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!(
                            package_id = %self.package_id,
                            "installer hook exceeded {}s, killing it",
                            self.hook_timeout.as_secs()
                        );
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(HookOutput {
                            status: HookStatus::TimedOut,
                            exit_code: -1,
                            stdout: String::new(),
                            stderr: format!(
                                "hook timed out after {}s",
                                self.hook_timeout.as_secs()
                            ),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    return Err(HookOutput::failed(
                        -1,
                        format!("failed waiting for hook: {err}"),
                    ));
                }
            }
        }
    }
}

impl Installer for ScriptInstaller {
    fn install(&self, tracer: &Tracer) -> HookOutput {
        self.run_script(tracer, INSTALL_SCRIPT)
    }

    fn uninstall(&self, tracer: &Tracer) -> HookOutput {
        self.run_script(tracer, UNINSTALL_SCRIPT)
    }

    fn validate(&self, tracer: &Tracer) -> HookOutput {
        self.run_script(tracer, VALIDATE_SCRIPT)
    }

    fn version(&self) -> &PackageVersion {
        &self.version
    }

    fn package_name(&self) -> &str {
        self.package_id.as_str()
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
