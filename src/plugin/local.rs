//! Local runtime environment builder
//!
//! Materializes an isolated python virtual environment for an extracted
//! plugin: installs declared dependencies under a hard cap and an idle
//! watchdog, pre-compiles sources, and patches known-bad pinned SDK
//! versions.

use crate::core::config::LocalRuntimeConfig;
use crate::core::error::{HarborError, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info};

/// Ready marker relative to the working path; presence asserts usability
pub const READY_MARKER: &str = ".venv/dify/plugin.json";

/// Replacement file for SDK versions below the patch cutoff
const SDK_PATCH: &str = include_str!("patches/ai_model.py");

/// First SDK version that no longer needs the patch
const SDK_PATCH_CUTOFF: &str = "0.0.1b70";

/// Hard cap on dependency installation
const INSTALL_HARD_CAP: Duration = Duration::from_secs(600);

/// How often the idle watchdog checks for installer output
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

fn sdk_version_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?:dify[_-]plugin)(?:~=|==)([0-9.a-z]+)").expect("sdk regex is valid")
    })
}

/// On-disk state of one local plugin runtime
#[derive(Debug, Clone)]
pub struct LocalRuntimeState {
    /// Directory holding the extracted package and `requirements.txt`
    pub working_path: PathBuf,
    /// Interpreter inside the built environment, set on success
    pub interpreter_path: Option<PathBuf>,
}

impl LocalRuntimeState {
    pub fn new(working_path: PathBuf) -> Self {
        Self {
            working_path,
            interpreter_path: None,
        }
    }
}

/// Removes the venv unless the build reached success
struct VenvCleanup {
    venv: PathBuf,
    success: bool,
}

impl Drop for VenvCleanup {
    fn drop(&mut self) {
        if !self.success {
            let _ = std::fs::remove_dir_all(&self.venv);
        }
    }
}

/// Builds plugin virtual environments with bounded concurrency
pub struct EnvironmentBuilder {
    config: LocalRuntimeConfig,
    build_permits: Arc<Semaphore>,
    working_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EnvironmentBuilder {
    pub fn new(config: LocalRuntimeConfig) -> Self {
        let build_permits = Arc::new(Semaphore::new(config.env_init_concurrency));
        Self {
            config,
            build_permits,
            working_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn working_lock(&self, working_path: &Path) -> Arc<Mutex<()>> {
        let key = working_path.to_string_lossy().into_owned();
        self.working_locks
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Initialize the runtime environment for an extracted plugin.
    ///
    /// Fast path: a venv with a readable ready marker is reused as-is.
    /// A venv without the marker is considered stale and rebuilt.
    pub async fn init_environment(&self, identity: &str, state: &mut LocalRuntimeState) -> Result<()> {
        let path_lock = self.working_lock(&state.working_path);
        let _path_guard = path_lock.lock().await;
        let _build_permit = self
            .build_permits
            .acquire()
            .await
            .map_err(|e| HarborError::build(format!("environment builder is shut down: {}", e)))?;

        let working_path = state.working_path.clone();
        let venv = working_path.join(".venv");
        let marker = working_path.join(READY_MARKER);
        let interpreter = venv.join("bin/python");

        if venv.is_dir() {
            if marker.is_file() {
                state.interpreter_path = Some(interpreter.clone());
                if let Err(e) = self.patch_plugin_sdk(&working_path, &interpreter).await {
                    error!(identity, "failed to patch the plugin sdk: {}", e);
                }
                return Ok(());
            }
            // stale environment, rebuild from scratch
            std::fs::remove_dir_all(&venv)?;
        }

        let output = Command::new(&self.config.python_interpreter_path)
            .args(["-m", "venv", ".venv"])
            .current_dir(&working_path)
            .output()
            .await
            .map_err(|e| HarborError::build(format!("failed to run base interpreter: {}", e)))?;
        if !output.status.success() {
            let _ = std::fs::remove_dir_all(&venv);
            return Err(HarborError::build(format!(
                "failed to create virtual environment: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let mut cleanup = VenvCleanup {
            venv: venv.clone(),
            success: false,
        };

        let pip = venv.join("bin/pip");
        if !pip.is_file() {
            return Err(HarborError::build(format!(
                "failed to find pip at {}",
                pip.display()
            )));
        }
        if !interpreter.is_file() {
            return Err(HarborError::build(format!(
                "failed to find python at {}",
                interpreter.display()
            )));
        }
        state.interpreter_path = Some(interpreter.clone());

        let requirements = working_path.join("requirements.txt");
        if !requirements.is_file() {
            return Err(HarborError::build(format!(
                "failed to find requirements.txt in {}",
                working_path.display()
            )));
        }

        self.install_dependencies(identity, &working_path, &pip).await?;
        self.precompile(identity, &working_path, &interpreter).await?;

        if let Err(e) = self.patch_plugin_sdk(&working_path, &interpreter).await {
            error!(identity, "failed to patch the plugin sdk: {}", e);
        }

        std::fs::create_dir_all(working_path.join(".venv/dify"))?;
        std::fs::write(
            &marker,
            format!("{{\"timestamp\":{}}}", chrono::Utc::now().timestamp()),
        )?;

        cleanup.success = true;
        info!(identity, path = %working_path.display(), "plugin environment ready");
        Ok(())
    }

    fn pip_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["install".into(), "--disable-pip-version-check".into()];

        if !self.config.pip_http_proxy.is_empty() {
            args.push("--proxy".into());
            args.push(self.config.pip_http_proxy.clone());
        } else if !self.config.pip_https_proxy.is_empty() {
            args.push("--proxy".into());
            args.push(self.config.pip_https_proxy.clone());
        }

        if !self.config.pip_mirror_url.is_empty() {
            args.push("-i".into());
            args.push(self.config.pip_mirror_url.clone());
        }

        args.push("-r".into());
        args.push("requirements.txt".into());

        if self.config.pip_prefer_binary {
            args.push("--prefer-binary".into());
        }

        if self.config.pip_verbose {
            args.push("-vvv".into());
        }

        if !self.config.pip_extra_args.is_empty() {
            args.extend(
                self.config
                    .pip_extra_args
                    .split_whitespace()
                    .map(String::from),
            );
        }

        args
    }

    /// Run the package installer under the hard cap and the idle watchdog
    async fn install_dependencies(&self, identity: &str, working_path: &Path, pip: &Path) -> Result<()> {
        let idle_timeout = Duration::from_secs(self.config.env_init_idle_timeout);

        let mut child = Command::new(pip)
            .args(self.pip_args())
            .current_dir(working_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarborError::build(format!("failed to start package installer: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarborError::build("failed to get installer stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HarborError::build("failed to get installer stderr"))?;

        let last_active = Arc::new(StdMutex::new(Instant::now()));
        let err_msg = Arc::new(StdMutex::new(String::new()));

        let stdout_task = tokio::spawn({
            let last_active = last_active.clone();
            let identity = identity.to_string();
            async move {
                let mut reader = stdout;
                let mut buf = [0u8; 1024];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            info!(
                                "installing {} - {}",
                                identity,
                                String::from_utf8_lossy(&buf[..n]).trim_end()
                            );
                            *last_active.lock().unwrap() = Instant::now();
                        }
                    }
                }
            }
        });

        let stderr_task = tokio::spawn({
            let last_active = last_active.clone();
            let err_msg = err_msg.clone();
            async move {
                let mut reader = stderr;
                let mut buf = [0u8; 1024];
                loop {
                    // partial reads are accumulated before any exit so no
                    // installer output is lost to a close race
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            err_msg
                                .lock()
                                .unwrap()
                                .push_str(&String::from_utf8_lossy(&buf[..n]));
                            *last_active.lock().unwrap() = Instant::now();
                        }
                    }
                }
            }
        });

        let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
        ticker.tick().await; // consume the immediate first tick
        let hard_cap = tokio::time::sleep(INSTALL_HARD_CAP);
        tokio::pin!(hard_cap);

        let mut killed = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| {
                        HarborError::build(format!("failed to wait for installer: {}", e))
                    })?;
                }
                _ = ticker.tick(), if !killed => {
                    let idle = last_active.lock().unwrap().elapsed();
                    if idle > idle_timeout {
                        let _ = child.start_kill();
                        killed = true;
                        err_msg.lock().unwrap().push_str(&format!(
                            "init process exited due to no activity for {} seconds",
                            self.config.env_init_idle_timeout
                        ));
                    }
                }
                _ = &mut hard_cap, if !killed => {
                    let _ = child.start_kill();
                    killed = true;
                    err_msg.lock().unwrap().push_str(&format!(
                        "dependency installation exceeded {} seconds",
                        INSTALL_HARD_CAP.as_secs()
                    ));
                }
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if killed || !status.success() {
            let stderr_tail = err_msg.lock().unwrap().clone();
            return Err(HarborError::BuildError {
                reason: format!("failed to install dependencies: {}", stderr_tail),
                timed_out: killed,
            });
        }

        Ok(())
    }

    /// Pre-compile the source tree to avoid costly compilation on first invocation
    async fn precompile(&self, identity: &str, working_path: &Path, interpreter: &Path) -> Result<()> {
        let mut child = Command::new(interpreter)
            .args(["-m", "compileall", "."])
            .current_dir(working_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarborError::build(format!("failed to start compiler: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarborError::build("failed to get compiler stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HarborError::build("failed to get compiler stderr"))?;

        let stdout_task = tokio::spawn({
            let identity = identity.to_string();
            async move {
                let mut reader = stdout;
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]);
                            if let Some(line) = chunk.lines().find(|line| !line.is_empty()) {
                                info!("pre-compiling {} - {}", identity, line);
                            }
                        }
                    }
                }
            }
        });

        let err_msg = Arc::new(StdMutex::new(String::new()));
        let stderr_task = tokio::spawn({
            let err_msg = err_msg.clone();
            async move {
                let mut reader = stderr;
                let mut buf = [0u8; 1024];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            err_msg
                                .lock()
                                .unwrap()
                                .push_str(&String::from_utf8_lossy(&buf[..n]));
                        }
                    }
                }
            }
        });

        let status = tokio::time::timeout(INSTALL_HARD_CAP, child.wait())
            .await
            .map_err(|_| HarborError::BuildError {
                reason: "pre-compile exceeded the time cap".to_string(),
                timed_out: true,
            })?
            .map_err(|e| HarborError::build(format!("failed to wait for compiler: {}", e)))?;

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if !status.success() {
            return Err(HarborError::build(format!(
                "failed to pre-compile the plugin: {}",
                err_msg.lock().unwrap()
            )));
        }

        Ok(())
    }

    /// Overwrite the known-bad SDK file for pinned versions below the cutoff.
    ///
    /// Failures here are reported to the caller but never abort a build.
    pub async fn patch_plugin_sdk(&self, working_path: &Path, interpreter: &Path) -> Result<()> {
        let requirements = std::fs::read_to_string(working_path.join("requirements.txt"))
            .map_err(|e| HarborError::build(format!("failed to read requirements.txt: {}", e)))?;

        let Some(version) = extract_sdk_version(&requirements) else {
            debug!("no pinned plugin sdk version found, skipping patch");
            return Ok(());
        };

        if !sdk_version_lt(&version, SDK_PATCH_CUTOFF) {
            return Ok(());
        }

        let output = Command::new(interpreter)
            .args([
                "-c",
                "import importlib.util;print(importlib.util.find_spec('dify_plugin').origin)",
            ])
            .current_dir(working_path)
            .output()
            .await
            .map_err(|e| HarborError::build(format!("failed to locate the plugin sdk: {}", e)))?;

        if !output.status.success() {
            return Err(HarborError::build(format!(
                "failed to locate the plugin sdk: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let origin = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let sdk_dir = Path::new(&origin)
            .parent()
            .ok_or_else(|| HarborError::build("plugin sdk origin has no parent directory"))?;

        let patch_path = sdk_dir.join("interfaces/model/ai_model.py");
        if !patch_path.is_file() {
            return Err(HarborError::build(format!(
                "failed to find the patch target: {}",
                patch_path.display()
            )));
        }

        std::fs::write(&patch_path, SDK_PATCH)?;
        info!(version = %version, path = %patch_path.display(), "patched plugin sdk");
        Ok(())
    }
}

/// Extract the pinned SDK version from a requirements file
fn extract_sdk_version(requirements: &str) -> Option<String> {
    sdk_version_regex()
        .captures(requirements)
        .map(|captures| captures[1].to_string())
}

fn split_segment(segment: &str) -> (u64, String, u64) {
    let numeric_end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    let numeric = segment[..numeric_end].parse().unwrap_or(0);

    let rest = &segment[numeric_end..];
    let alpha_end = rest
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(rest.len());
    let alpha = rest[..alpha_end].to_string();
    let suffix = rest[alpha_end..].parse().unwrap_or(0);

    (numeric, alpha, suffix)
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let (a_num, a_alpha, a_suffix) = split_segment(a);
    let (b_num, b_alpha, b_suffix) = split_segment(b);

    a_num.cmp(&b_num).then_with(|| {
        // a bare release segment ranks above any pre-release tag
        match (a_alpha.is_empty(), b_alpha.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a_alpha.cmp(&b_alpha).then(a_suffix.cmp(&b_suffix)),
        }
    })
}

/// Compare dotted pre-release versions like `0.0.1b69`
fn sdk_version_lt(version: &str, cutoff: &str) -> bool {
    let left: Vec<&str> = version.split('.').collect();
    let right: Vec<&str> = cutoff.split('.').collect();

    for i in 0..left.len().max(right.len()) {
        let a = left.get(i).copied().unwrap_or("0");
        let b = right.get(i).copied().unwrap_or("0");
        match compare_segments(a, b) {
            Ordering::Less => return true,
            Ordering::Greater => return false,
            Ordering::Equal => {}
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_sdk_version() {
        assert_eq!(
            extract_sdk_version("dify_plugin==0.0.1b69\nrequests==2.0.0\n").as_deref(),
            Some("0.0.1b69")
        );
        assert_eq!(
            extract_sdk_version("dify-plugin~=0.2.0\n").as_deref(),
            Some("0.2.0")
        );
        assert_eq!(extract_sdk_version("requests==2.0.0\n"), None);
    }

    #[test]
    fn test_sdk_version_ordering() {
        assert!(sdk_version_lt("0.0.1b69", "0.0.1b70"));
        assert!(!sdk_version_lt("0.0.1b70", "0.0.1b70"));
        assert!(!sdk_version_lt("0.0.2", "0.0.1b70"));
        assert!(!sdk_version_lt("0.2.0", "0.0.1b70"));
        // a pre-release sorts below its release
        assert!(sdk_version_lt("0.0.1b69", "0.0.1"));
        assert!(!sdk_version_lt("0.0.1", "0.0.1b70"));
    }

    #[cfg(unix)]
    mod with_fake_interpreter {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        const FAKE_INTERPRETER: &str = r#"#!/bin/sh
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then
    mkdir -p "$3/bin"
    cp "$0" "$3/bin/python"
    cp "$0" "$3/bin/pip"
    exit 0
fi
if [ "$1" = "install" ]; then
    echo "Collecting packages"
    exit 0
fi
if [ "$1" = "-m" ] && [ "$2" = "compileall" ]; then
    echo "Compiling ."
    exit 0
fi
exit 0
"#;

        const SLOW_PIP_INTERPRETER: &str = r#"#!/bin/sh
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then
    mkdir -p "$3/bin"
    cp "$0" "$3/bin/python"
    cp "$0" "$3/bin/pip"
    exit 0
fi
if [ "$1" = "install" ]; then
    sleep 60
    exit 0
fi
exit 0
"#;

        fn write_executable(path: &Path, content: &str) {
            std::fs::write(path, content).unwrap();
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn builder_config(interpreter: &Path, idle_timeout: u64) -> LocalRuntimeConfig {
            LocalRuntimeConfig {
                python_interpreter_path: interpreter.to_string_lossy().into_owned(),
                env_init_idle_timeout: idle_timeout,
                env_init_concurrency: 2,
                launching_concurrency: 2,
                pip_http_proxy: String::new(),
                pip_https_proxy: String::new(),
                pip_mirror_url: String::new(),
                pip_prefer_binary: false,
                pip_verbose: false,
                pip_extra_args: String::new(),
            }
        }

        fn working_dir(dir: &TempDir) -> PathBuf {
            let working = dir.path().join("plugin");
            std::fs::create_dir_all(&working).unwrap();
            std::fs::write(working.join("requirements.txt"), "dify_plugin==0.2.0\n").unwrap();
            working
        }

        #[tokio::test]
        async fn test_init_environment_builds_and_marks_ready() {
            let dir = TempDir::new().unwrap();
            let interpreter = dir.path().join("python3");
            write_executable(&interpreter, FAKE_INTERPRETER);

            let builder = EnvironmentBuilder::new(builder_config(&interpreter, 120));
            let mut state = LocalRuntimeState::new(working_dir(&dir));

            builder.init_environment("alice/calc:1.0.0", &mut state).await.unwrap();

            assert!(state.working_path.join(READY_MARKER).is_file());
            assert_eq!(
                state.interpreter_path.as_deref(),
                Some(state.working_path.join(".venv/bin/python").as_path())
            );
        }

        #[tokio::test]
        async fn test_init_environment_reuses_ready_venv() {
            let dir = TempDir::new().unwrap();
            let interpreter = dir.path().join("python3");
            write_executable(&interpreter, FAKE_INTERPRETER);

            let builder = EnvironmentBuilder::new(builder_config(&interpreter, 120));
            let mut state = LocalRuntimeState::new(working_dir(&dir));
            builder.init_environment("alice/calc:1.0.0", &mut state).await.unwrap();

            // leave a sentinel; a rebuild would remove it
            let sentinel = state.working_path.join(".venv/sentinel");
            std::fs::write(&sentinel, "keep").unwrap();

            let mut state = LocalRuntimeState::new(state.working_path);
            builder.init_environment("alice/calc:1.0.0", &mut state).await.unwrap();
            assert!(sentinel.is_file());
        }

        #[tokio::test]
        async fn test_stale_venv_without_marker_is_rebuilt() {
            let dir = TempDir::new().unwrap();
            let interpreter = dir.path().join("python3");
            write_executable(&interpreter, FAKE_INTERPRETER);

            let working = working_dir(&dir);
            // a venv without the ready marker is stale
            std::fs::create_dir_all(working.join(".venv")).unwrap();
            std::fs::write(working.join(".venv/stale"), "old").unwrap();

            let builder = EnvironmentBuilder::new(builder_config(&interpreter, 120));
            let mut state = LocalRuntimeState::new(working);
            builder.init_environment("alice/calc:1.0.0", &mut state).await.unwrap();

            assert!(!state.working_path.join(".venv/stale").exists());
            assert!(state.working_path.join(READY_MARKER).is_file());
        }

        #[tokio::test]
        async fn test_missing_requirements_fails_and_cleans_venv() {
            let dir = TempDir::new().unwrap();
            let interpreter = dir.path().join("python3");
            write_executable(&interpreter, FAKE_INTERPRETER);

            let working = dir.path().join("plugin");
            std::fs::create_dir_all(&working).unwrap();

            let builder = EnvironmentBuilder::new(builder_config(&interpreter, 120));
            let mut state = LocalRuntimeState::new(working);

            let err = builder
                .init_environment("alice/calc:1.0.0", &mut state)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("requirements.txt"));
            assert!(!state.working_path.join(".venv").exists());
        }

        #[tokio::test]
        async fn test_idle_watchdog_kills_silent_installer() {
            let dir = TempDir::new().unwrap();
            let interpreter = dir.path().join("python3");
            write_executable(&interpreter, SLOW_PIP_INTERPRETER);

            let builder = EnvironmentBuilder::new(builder_config(&interpreter, 1));
            let mut state = LocalRuntimeState::new(working_dir(&dir));

            let err = builder
                .init_environment("alice/calc:1.0.0", &mut state)
                .await
                .unwrap_err();

            match err {
                HarborError::BuildError { reason, timed_out } => {
                    assert!(timed_out);
                    assert!(reason.contains("no activity for 1 seconds"));
                }
                other => panic!("expected BuildError, got {:?}", other),
            }
            assert!(!state.working_path.join(".venv").exists());
        }

        #[tokio::test]
        async fn test_sdk_patch_applied_for_pinned_old_version() {
            let dir = TempDir::new().unwrap();

            // fake sdk install location
            let sdk_dir = dir.path().join("site-packages/dify_plugin");
            let patch_target = sdk_dir.join("interfaces/model/ai_model.py");
            std::fs::create_dir_all(patch_target.parent().unwrap()).unwrap();
            std::fs::write(&patch_target, "# buggy original").unwrap();

            // interpreter that reports the sdk origin
            let interpreter = dir.path().join("python3");
            write_executable(
                &interpreter,
                &format!(
                    "#!/bin/sh\nif [ \"$1\" = \"-c\" ]; then\n    echo \"{}\"\n    exit 0\nfi\nexit 0\n",
                    sdk_dir.join("__init__.py").display()
                ),
            );

            let working = dir.path().join("plugin");
            std::fs::create_dir_all(&working).unwrap();
            std::fs::write(working.join("requirements.txt"), "dify_plugin==0.0.1b69\n").unwrap();

            let builder = EnvironmentBuilder::new(builder_config(&interpreter, 120));
            builder.patch_plugin_sdk(&working, &interpreter).await.unwrap();

            let patched = std::fs::read_to_string(&patch_target).unwrap();
            assert_eq!(patched, SDK_PATCH);
        }

        #[tokio::test]
        async fn test_sdk_patch_skipped_for_new_version() {
            let dir = TempDir::new().unwrap();
            let interpreter = dir.path().join("python3");
            write_executable(&interpreter, "#!/bin/sh\nexit 1\n");

            let working = dir.path().join("plugin");
            std::fs::create_dir_all(&working).unwrap();
            std::fs::write(working.join("requirements.txt"), "dify_plugin==0.2.0\n").unwrap();

            // interpreter exits non-zero, but it is never invoked for new versions
            let builder = EnvironmentBuilder::new(builder_config(&interpreter, 120));
            builder.patch_plugin_sdk(&working, &interpreter).await.unwrap();
        }
    }
}
