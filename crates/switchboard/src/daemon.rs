//! Foreground and background execution.
//!
//! `run` serves in the current process. `start` spawns a detached copy of
//! this executable running `run --daemonized` and records its PID in the PID
//! file; `stop` signals the recorded PID and deletes the file. The PID file
//! check in `start` is the only single-instance guard; two concurrent
//! `start` invocations can both pass it.

use crate::cli::CliArgs;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors reported by daemon control operations.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("PID file {} not found. Is the server running?", .0.display())]
    PidFileMissing(PathBuf),

    #[error("Cannot send termination signal to process {pid}: {reason}")]
    ProcessSignalFailed { pid: u32, reason: String },

    #[error("Server already running with PID {pid}{}", stale_hint(.alive))]
    AlreadyRunning { pid: u32, alive: bool },

    #[error("Unknown operation \"{0}\". Use one of: run, start, stop, restart")]
    UnknownOperation(String),

    #[error("Failed to spawn background process: {0}")]
    Spawn(String),

    #[error("PID file error: {0}")]
    Io(#[from] io::Error),
}

fn stale_hint(alive: &bool) -> &'static str {
    if *alive {
        ""
    } else {
        ". The process does not seem to be alive; use -f to ignore the stale PID file"
    }
}

impl DaemonError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::UnknownOperation(_) => 2,
            _ => 1,
        }
    }
}

/// The verb given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Run,
    Start,
    Stop,
    Restart,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Run => "run",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(Operation::Run),
            "start" => Ok(Operation::Start),
            "stop" => Ok(Operation::Stop),
            "restart" => Ok(Operation::Restart),
            other => Err(DaemonError::UnknownOperation(other.to_string())),
        }
    }
}

/// What the caller should do after [`DaemonController::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Continue into the server loop in this process.
    Serve,
    /// Work is done; exit successfully.
    Exit,
}

/// A PID file holding one decimal process id.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the recorded PID, or `None` when there is no PID file.
    pub fn read(&self) -> Result<Option<u32>, DaemonError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        content.trim().parse::<u32>().map(Some).map_err(|_| {
            DaemonError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} does not contain a process id", self.path.display()),
            ))
        })
    }

    /// Records `pid`, replacing any previous content.
    ///
    /// # Errors
    ///
    /// [`DaemonError::Io`] when the file cannot be written, for instance
    /// because its directory does not exist.
    pub fn write(&self, pid: u32) -> Result<(), DaemonError> {
        std::fs::write(&self.path, pid.to_string())?;
        Ok(())
    }

    /// Deletes the PID file. A missing file is not an error.
    pub fn remove(&self) -> Result<(), DaemonError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Best-effort liveness check using signal 0.
///
/// A process we may not signal (`EPERM`) still counts as alive.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 only checks for existence and permission; nothing is
    // delivered and no memory is touched.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

/// Sends SIGTERM to `pid`.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn terminate(pid: u32) -> Result<(), DaemonError> {
    let signal_failed = |reason: String| DaemonError::ProcessSignalFailed { pid, reason };

    let target = libc::pid_t::try_from(pid)
        .map_err(|_| signal_failed("invalid process id".to_string()))?;
    if target <= 0 {
        return Err(signal_failed("invalid process id".to_string()));
    }

    // SAFETY: `target` is a positive pid, so exactly one process is
    // addressed; kill(2) has no memory-safety preconditions.
    let ret = unsafe { libc::kill(target, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(signal_failed(io::Error::last_os_error().to_string()))
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<(), DaemonError> {
    Err(DaemonError::ProcessSignalFailed {
        pid,
        reason: "signals are not supported on this platform".to_string(),
    })
}

/// Launches the background server and returns its PID.
pub trait Spawner {
    fn spawn(&self) -> Result<u32, DaemonError>;
}

/// Spawns this executable again as `run --daemonized`, detached from the
/// terminal.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Spawner re-running the current executable with the given options.
    pub fn for_current_exe(
        args: &CliArgs,
        config_path: &Path,
        pid_file: &Path,
    ) -> Result<Self, DaemonError> {
        let program = std::env::current_exe()
            .map_err(|e| DaemonError::Spawn(format!("cannot locate current executable: {e}")))?;
        Ok(Self::new(program, child_args(args, config_path, pid_file)))
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self) -> Result<u32, DaemonError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| DaemonError::Spawn(format!("{}: {e}", self.program.display())))?;
        Ok(child.id())
    }
}

/// Arguments for the background child. `--force` is never forwarded: the
/// parent has already dealt with any previous instance.
pub fn child_args(args: &CliArgs, config_path: &Path, pid_file: &Path) -> Vec<OsString> {
    let mut child: Vec<OsString> = vec![
        "run".into(),
        "--daemonized".into(),
        "--config".into(),
        config_path.as_os_str().to_owned(),
        "--pid-file".into(),
        pid_file.as_os_str().to_owned(),
    ];
    if args.debug {
        child.push("--debug".into());
    }
    if let Some(bind) = &args.bind_address {
        child.push("--bind".into());
        child.push(bind.into());
    }
    if let Some(port) = args.port {
        child.push("--port".into());
        child.push(port.to_string().into());
    }
    if let Some(level) = &args.log_level {
        child.push("--log-level".into());
        child.push(level.into());
    }
    if args.json_logs {
        child.push("--json-logs".into());
    }
    child
}

/// Drives run/start/stop/restart against a PID file.
pub struct DaemonController<S: Spawner> {
    pid_file: PidFile,
    force: bool,
    spawner: S,
    stop_timeout: Duration,
}

impl<S: Spawner> DaemonController<S> {
    pub fn new(pid_file: PidFile, force: bool, spawner: S) -> Self {
        Self {
            pid_file,
            force,
            spawner,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// How long `stop` waits for the signalled process to exit.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Runs `operation`. With force set, any recorded instance is stopped
    /// silently first.
    pub fn execute(&self, operation: Operation) -> Result<ControlOutcome, DaemonError> {
        debug!("Executing {} (force: {})", operation, self.force);
        if self.force {
            self.stop(true)?;
        }

        match operation {
            Operation::Run => Ok(ControlOutcome::Serve),
            Operation::Start => {
                self.start()?;
                Ok(ControlOutcome::Exit)
            }
            Operation::Stop => {
                if !self.force {
                    self.stop(false)?;
                }
                Ok(ControlOutcome::Exit)
            }
            Operation::Restart => {
                if !self.force {
                    self.stop(true)?;
                }
                self.start()?;
                Ok(ControlOutcome::Exit)
            }
        }
    }

    /// Spawns the background server and records its PID.
    ///
    /// Without force, an existing PID file is an [`DaemonError::AlreadyRunning`]
    /// and nothing is spawned.
    ///
    /// # Returns
    ///
    /// The PID of the spawned child.
    ///
    /// # Errors
    ///
    /// Spawn failures are returned as is. If the PID file cannot be written
    /// the child is sent SIGTERM before the write error is returned.
    pub fn start(&self) -> Result<u32, DaemonError> {
        if !self.force {
            if let Some(pid) = self.pid_file.read()? {
                return Err(DaemonError::AlreadyRunning {
                    pid,
                    alive: process_alive(pid),
                });
            }
        }

        let pid = self.spawner.spawn()?;
        if let Err(e) = self.pid_file.write(pid) {
            // Without a PID file nothing could ever stop the child.
            warn!(
                "Cannot record PID {} in {}, terminating it",
                pid,
                self.pid_file.path().display()
            );
            if let Err(kill_error) = terminate(pid) {
                warn!("{}", kill_error);
            }
            return Err(e);
        }
        info!("Server started in background with PID {}", pid);
        Ok(pid)
    }

    /// Signals the recorded instance and deletes the PID file.
    ///
    /// Returns whether an instance was stopped. With `silent`, a missing PID
    /// file or a failed signal is logged at debug level and reported as
    /// `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Without `silent`: [`DaemonError::PidFileMissing`] when nothing is
    /// recorded, and any error from signalling the process.
    pub fn stop(&self, silent: bool) -> Result<bool, DaemonError> {
        let pid = match self.pid_file.read() {
            Ok(Some(pid)) => pid,
            Ok(None) if silent => {
                debug!("No PID file at {}, nothing to stop", self.pid_file.path().display());
                return Ok(false);
            }
            Ok(None) => return Err(DaemonError::PidFileMissing(self.pid_file.path().to_path_buf())),
            Err(e) if silent => {
                debug!("Ignoring unreadable PID file: {}", e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        match terminate(pid) {
            Ok(()) => {
                self.wait_for_exit(pid);
                self.pid_file.remove()?;
                info!("Server with PID {} stopped", pid);
                Ok(true)
            }
            Err(e) if silent => {
                debug!("Ignoring stop failure: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn wait_for_exit(&self, pid: u32) {
        let deadline = Instant::now() + self.stop_timeout;
        while process_alive(pid) {
            if Instant::now() >= deadline {
                if !self.stop_timeout.is_zero() {
                    warn!("Process {} still alive after {:?}", pid, self.stop_timeout);
                }
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::{tempdir, TempDir};

    /// Larger than any kernel pid_max, so never a live process.
    const DEAD_PID: u32 = 2_147_483_000;

    struct RecordingSpawner {
        pid: u32,
        calls: Cell<usize>,
    }

    impl RecordingSpawner {
        fn new(pid: u32) -> Self {
            Self {
                pid,
                calls: Cell::new(0),
            }
        }
    }

    impl Spawner for &RecordingSpawner {
        fn spawn(&self) -> Result<u32, DaemonError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.pid)
        }
    }

    fn pid_file() -> (TempDir, PidFile) {
        let dir = tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("ws-server.pid"));
        (dir, pid_file)
    }

    fn controller<'a>(
        pid_file: &PidFile,
        force: bool,
        spawner: &'a RecordingSpawner,
    ) -> DaemonController<&'a RecordingSpawner> {
        DaemonController::new(pid_file.clone(), force, spawner).with_stop_timeout(Duration::ZERO)
    }

    #[test]
    fn test_operation_parsing() {
        assert_eq!("run".parse::<Operation>().unwrap(), Operation::Run);
        assert_eq!("restart".parse::<Operation>().unwrap(), Operation::Restart);

        let err = "reload".parse::<Operation>().unwrap_err();
        assert!(matches!(err, DaemonError::UnknownOperation(ref op) if op == "reload"));
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_pid_file_round_trip() {
        let (_dir, pid_file) = pid_file();
        assert_eq!(pid_file.read().unwrap(), None);

        pid_file.write(4242).unwrap();
        assert_eq!(std::fs::read_to_string(pid_file.path()).unwrap(), "4242");
        assert_eq!(pid_file.read().unwrap(), Some(4242));

        pid_file.remove().unwrap();
        assert!(!pid_file.path().exists());
        pid_file.remove().unwrap();
    }

    #[test]
    fn test_pid_file_with_garbage_is_an_error() {
        let (_dir, pid_file) = pid_file();
        std::fs::write(pid_file.path(), "not a pid").unwrap();
        assert!(matches!(pid_file.read(), Err(DaemonError::Io(_))));
    }

    #[test]
    fn test_process_liveness() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(DEAD_PID));
        assert!(!process_alive(0));
    }

    #[test]
    fn test_run_serves_without_pid_file() {
        let (_dir, pid_file) = pid_file();
        let spawner = RecordingSpawner::new(100);
        let outcome = controller(&pid_file, false, &spawner).execute(Operation::Run).unwrap();

        assert_eq!(outcome, ControlOutcome::Serve);
        assert!(!pid_file.path().exists());
        assert_eq!(spawner.calls.get(), 0);
    }

    #[test]
    fn test_start_records_child_pid() {
        let (_dir, pid_file) = pid_file();
        let spawner = RecordingSpawner::new(31337);
        let outcome = controller(&pid_file, false, &spawner).execute(Operation::Start).unwrap();

        assert_eq!(outcome, ControlOutcome::Exit);
        assert_eq!(pid_file.read().unwrap(), Some(31337));
        assert_eq!(spawner.calls.get(), 1);
    }

    #[test]
    fn test_start_refuses_when_pid_file_exists() {
        let (_dir, pid_file) = pid_file();
        let own_pid = std::process::id();
        pid_file.write(own_pid).unwrap();
        let spawner = RecordingSpawner::new(100);

        let err = controller(&pid_file, false, &spawner).execute(Operation::Start).unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { pid, alive: true } if pid == own_pid));
        assert_ne!(err.exit_code(), 0);
        assert_eq!(spawner.calls.get(), 0);
        assert_eq!(pid_file.read().unwrap(), Some(own_pid));
    }

    #[test]
    fn test_stale_pid_file_suggests_force() {
        let (_dir, pid_file) = pid_file();
        pid_file.write(DEAD_PID).unwrap();
        let spawner = RecordingSpawner::new(100);

        let err = controller(&pid_file, false, &spawner).start().unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { alive: false, .. }));
        assert!(err.to_string().contains("-f"));
    }

    #[test]
    fn test_forced_start_ignores_stale_pid_file() {
        let (_dir, pid_file) = pid_file();
        pid_file.write(DEAD_PID).unwrap();
        let spawner = RecordingSpawner::new(777);

        let outcome = controller(&pid_file, true, &spawner).execute(Operation::Start).unwrap();
        assert_eq!(outcome, ControlOutcome::Exit);
        assert_eq!(pid_file.read().unwrap(), Some(777));
        assert_eq!(spawner.calls.get(), 1);
    }

    #[test]
    fn test_stop_without_pid_file() {
        let (_dir, pid_file) = pid_file();
        let spawner = RecordingSpawner::new(100);
        let controller = controller(&pid_file, false, &spawner);

        assert!(matches!(
            controller.execute(Operation::Stop),
            Err(DaemonError::PidFileMissing(_))
        ));
        assert!(!controller.stop(true).unwrap());
    }

    #[test]
    fn test_stop_of_dead_process_reports_signal_failure() {
        let (_dir, pid_file) = pid_file();
        pid_file.write(DEAD_PID).unwrap();
        let spawner = RecordingSpawner::new(100);
        let controller = controller(&pid_file, false, &spawner);

        assert!(matches!(
            controller.stop(false),
            Err(DaemonError::ProcessSignalFailed { pid: DEAD_PID, .. })
        ));
        assert!(!controller.stop(true).unwrap());
        assert!(pid_file.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_terminates_recorded_process() {
        use std::os::unix::process::ExitStatusExt;

        let (_dir, pid_file) = pid_file();
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        pid_file.write(child.id()).unwrap();
        let spawner = RecordingSpawner::new(100);

        let outcome = controller(&pid_file, false, &spawner).execute(Operation::Stop).unwrap();
        assert_eq!(outcome, ControlOutcome::Exit);
        assert!(!pid_file.path().exists());

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    /// Starts a real short-lived process so termination can be observed.
    #[cfg(unix)]
    struct SleepSpawner {
        child: std::cell::RefCell<Option<std::process::Child>>,
    }

    #[cfg(unix)]
    impl Spawner for &SleepSpawner {
        fn spawn(&self) -> Result<u32, DaemonError> {
            let child = Command::new("sleep").arg("30").spawn()?;
            let pid = child.id();
            *self.child.borrow_mut() = Some(child);
            Ok(pid)
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_start_terminates_child_when_pid_file_cannot_be_written() {
        use std::os::unix::process::ExitStatusExt;

        let dir = tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("missing").join("ws-server.pid"));
        let spawner = SleepSpawner {
            child: std::cell::RefCell::new(None),
        };
        let controller = DaemonController::new(pid_file.clone(), false, &spawner);

        assert!(matches!(controller.start(), Err(DaemonError::Io(_))));
        assert!(!pid_file.path().exists());

        let mut child = spawner.child.borrow_mut().take().expect("child was spawned");
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    #[test]
    fn test_restart_without_running_instance_starts() {
        let (_dir, pid_file) = pid_file();
        let spawner = RecordingSpawner::new(555);

        let outcome = controller(&pid_file, false, &spawner).execute(Operation::Restart).unwrap();
        assert_eq!(outcome, ControlOutcome::Exit);
        assert_eq!(pid_file.read().unwrap(), Some(555));
    }

    #[test]
    fn test_child_args_never_forward_force() {
        let args = CliArgs::parse_from(["switchboard", "start", "-f", "-d", "--port", "9100"]);
        let child = child_args(
            &args,
            Path::new("/etc/switchboard.toml"),
            Path::new("/tmp/ws-server.pid"),
        );
        let child: Vec<String> = child.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(&child[..2], &["run", "--daemonized"]);
        assert!(child.contains(&"--debug".to_string()));
        assert!(child.windows(2).any(|w| w == ["--port", "9100"]));
        assert!(child.windows(2).any(|w| w == ["--pid-file", "/tmp/ws-server.pid"]));
        assert!(!child.iter().any(|a| a == "-f" || a == "--force"));
    }
}
