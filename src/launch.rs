//! Launching uplod
//!
//! [`launch`] starts a uplod process with the default flags merged with the
//! caller's settings, and streams the child's stdout and stderr into
//! `uplod-output.log`. The caller owns the returned [`UplodProcess`]: nothing
//! here restarts or supervises the daemon.
//!
//! # Example
//! ```no_run
//! use uplo_sdk::launch::{launch, LaunchSettings};
//!
//! # async fn example() -> uplo_sdk::Result<()> {
//! let settings = LaunchSettings::new()
//!     .set("uplo-directory", "/var/lib/uplo")
//!     .set("authenticate-api", true);
//! let mut uplod = launch("/usr/local/bin/uplod", settings)?;
//! let status = uplod.wait().await?;
//! println!("uplod exited: {}", status);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Setting whose value also decides where the output log is written
pub const DIRECTORY_SETTING: &str = "uplo-directory";

/// Name of the file the daemon's output is written to
pub const LOG_FILE_NAME: &str = "uplod-output.log";

const PUMP_BUFFER_SIZE: usize = 8 * 1024;

/// Value of a single uplod flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Text(String),
    Bool(bool),
    Path(PathBuf),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Text(text) => write!(f, "{}", text),
            SettingValue::Bool(value) => write!(f, "{}", value),
            SettingValue::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<PathBuf> for SettingValue {
    fn from(value: PathBuf) -> Self {
        SettingValue::Path(value)
    }
}

impl From<&Path> for SettingValue {
    fn from(value: &Path) -> Self {
        SettingValue::Path(value.to_path_buf())
    }
}

/// Ordered flag name -> value map used to build the uplod command line.
///
/// Setting an existing key replaces its value in place; new keys are
/// appended, so flags come out in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSettings {
    entries: Vec<(String, SettingValue)>,
}

impl LaunchSettings {
    /// Empty settings; merged over [`LaunchSettings::defaults`] by [`launch`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The flags uplod is started with when the caller sets nothing.
    pub fn defaults() -> Self {
        Self::new()
            .set("api-addr", "localhost:8480")
            .set("host-addr", ":8482")
            .set("rpc-addr", ":8481")
            .set("authenticate-api", false)
            .set("disable-api-security", false)
    }

    /// Builder form of [`LaunchSettings::insert`].
    pub fn set(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply `overrides` on top of these settings, key for key.
    pub fn merge(mut self, overrides: LaunchSettings) -> Self {
        for (key, value) in overrides.entries {
            self.insert(key, value);
        }
        self
    }

    /// Render the command-line flags.
    ///
    /// Every entry becomes `--key=value`, except entries whose value is
    /// exactly `false`, which are left out. Empty strings and `"0"` are kept.
    pub fn to_flags(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, value)| *value != SettingValue::Bool(false))
            .map(|(key, value)| format!("--{}={}", key, value))
            .collect()
    }

    /// Where the daemon's output log goes: inside `uplo-directory` when it is
    /// set, otherwise in the current working directory.
    pub fn log_path(&self) -> PathBuf {
        match self.get(DIRECTORY_SETTING) {
            Some(SettingValue::Path(dir)) => dir.join(LOG_FILE_NAME),
            Some(SettingValue::Text(dir)) => Path::new(dir).join(LOG_FILE_NAME),
            _ => PathBuf::from(LOG_FILE_NAME),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for LaunchSettings
where
    K: Into<String>,
    V: Into<SettingValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = LaunchSettings::new();
        for (key, value) in iter {
            settings.insert(key, value);
        }
        settings
    }
}

/// Everything [`launch`] decides before it starts the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    /// Defaults merged with the caller's settings
    pub settings: LaunchSettings,
    pub flags: Vec<String>,
    pub log_path: PathBuf,
    /// Uid the child runs as, when the platform has one
    pub uid: Option<u32>,
}

impl LaunchPlan {
    /// Resolve the flags, log path and uid for starting `program`.
    ///
    /// # Arguments
    /// * `program` - Path to the uplod executable
    /// * `settings` - Overrides for [`LaunchSettings::defaults`]
    pub fn new(program: impl Into<PathBuf>, settings: LaunchSettings) -> Self {
        let settings = LaunchSettings::defaults().merge(settings);
        let flags = settings.to_flags();
        let log_path = settings.log_path();
        Self {
            program: program.into(),
            settings,
            flags,
            log_path,
            uid: effective_uid(),
        }
    }

    /// Start the process described by this plan.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<UplodProcess> {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.flags)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        if let Some(uid) = self.uid {
            command.uid(uid);
        }

        tracing::info!(
            "Starting {} {} (output: {})",
            self.program.display(),
            self.flags.join(" "),
            self.log_path.display()
        );

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            path: self.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pump = tokio::spawn(pump_output(stdout, stderr, tokio::fs::File::from_std(log)));

        Ok(UplodProcess {
            child,
            flags: self.flags,
            log_path: self.log_path,
            pump: Some(pump),
        })
    }
}

/// Launch uplod at `program` with `settings` merged over the defaults.
///
/// Spawn failures are returned immediately as [`Error::Spawn`]; nothing is
/// retried. Must be called from within a tokio runtime.
pub fn launch(program: impl Into<PathBuf>, settings: LaunchSettings) -> Result<UplodProcess> {
    LaunchPlan::new(program, settings).spawn()
}

/// A running uplod started by [`launch`].
#[derive(Debug)]
pub struct UplodProcess {
    child: Child,
    flags: Vec<String>,
    log_path: PathBuf,
    pump: Option<JoinHandle<std::io::Result<u64>>>,
}

impl UplodProcess {
    /// OS process id, `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Kill the process and wait for it to exit.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }

    /// Wait for the process to exit and for its output to be flushed to the
    /// log file.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        if let Some(pump) = self.pump.take() {
            match pump.await {
                Ok(Ok(bytes)) => {
                    tracing::debug!("Wrote {} bytes to {}", bytes, self.log_path.display());
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Output pump for {} failed: {}", self.log_path.display(), e);
                }
            }
        }
        Ok(status)
    }
}

#[cfg(unix)]
fn effective_uid() -> Option<u32> {
    Some(nix::unistd::geteuid().as_raw())
}

#[cfg(not(unix))]
fn effective_uid() -> Option<u32> {
    None
}

/// Copy stdout and stderr into `log` as data arrives, until both close.
async fn pump_output(
    mut stdout: Option<ChildStdout>,
    mut stderr: Option<ChildStderr>,
    mut log: tokio::fs::File,
) -> std::io::Result<u64> {
    let mut out_buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut err_buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut out_open = true;
    let mut err_open = true;
    let mut written = 0u64;

    while out_open || err_open {
        tokio::select! {
            n = read_some(&mut stdout, &mut out_buf), if out_open => {
                let n = n?;
                if n == 0 {
                    out_open = false;
                } else {
                    log.write_all(&out_buf[..n]).await?;
                    written += n as u64;
                }
            }
            n = read_some(&mut stderr, &mut err_buf), if err_open => {
                let n = n?;
                if n == 0 {
                    err_open = false;
                } else {
                    log.write_all(&err_buf[..n]).await?;
                    written += n as u64;
                }
            }
        }
    }

    log.flush().await?;
    Ok(written)
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_flags() -> Vec<String> {
        vec![
            "--api-addr=localhost:8480".to_string(),
            "--host-addr=:8482".to_string(),
            "--rpc-addr=:8481".to_string(),
        ]
    }

    #[test]
    fn test_default_flags() {
        let plan = LaunchPlan::new("testpath", LaunchSettings::new());
        assert_eq!(plan.program, PathBuf::from("testpath"));
        assert_eq!(plan.flags, default_flags());
        assert_eq!(plan.log_path, PathBuf::from("uplod-output.log"));
    }

    #[test]
    fn test_overrides_keep_default_order() {
        let settings = LaunchSettings::new()
            .set("testflag", "x")
            .set("api-addr", "127.0.0.1:9980")
            .set("disable-api-security", true);
        let plan = LaunchPlan::new("testpath", settings);
        assert_eq!(
            plan.flags,
            vec![
                "--api-addr=127.0.0.1:9980",
                "--host-addr=:8482",
                "--rpc-addr=:8481",
                "--disable-api-security=true",
                "--testflag=x",
            ]
        );
    }

    #[test]
    fn test_boolean_flags() {
        let plan = LaunchPlan::new("testpath", LaunchSettings::new().set("testflag", true));
        assert!(plan.flags.contains(&"--testflag=true".to_string()));
        assert!(!plan.flags.contains(&"--testflag=false".to_string()));

        let plan = LaunchPlan::new("testpath", LaunchSettings::new().set("testflag", false));
        assert!(plan.flags.iter().all(|flag| !flag.starts_with("--testflag")));
        assert_eq!(plan.flags, default_flags());
    }

    #[test]
    fn test_only_false_is_dropped() {
        let settings = LaunchSettings::new()
            .set("empty", "")
            .set("zero", "0")
            .set("host-addr", false);
        let plan = LaunchPlan::new("testpath", settings);
        assert_eq!(
            plan.flags,
            vec!["--api-addr=localhost:8480", "--rpc-addr=:8481", "--empty=", "--zero=0"]
        );
    }

    #[test]
    fn test_directory_setting() {
        let plan = LaunchPlan::new(
            "testpath",
            LaunchSettings::new().set(DIRECTORY_SETTING, "testdir"),
        );
        assert!(plan.flags.contains(&"--uplo-directory=testdir".to_string()));
        assert_eq!(plan.log_path, Path::new("testdir").join("uplod-output.log"));

        let plan = LaunchPlan::new(
            "testpath",
            LaunchSettings::new().set(DIRECTORY_SETTING, PathBuf::from("/var/lib/uplo")),
        );
        assert!(plan.flags.contains(&"--uplo-directory=/var/lib/uplo".to_string()));
        assert_eq!(plan.log_path, PathBuf::from("/var/lib/uplo/uplod-output.log"));
    }

    #[test]
    fn test_settings_from_iter() {
        let settings: LaunchSettings = vec![("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings.get("a"), Some(&SettingValue::Text("3".to_string())));
        assert_eq!(settings.to_flags(), vec!["--a=3", "--b=2"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_as_effective_uid() {
        let plan = LaunchPlan::new("testpath", LaunchSettings::new());
        assert_eq!(plan.uid, Some(nix::unistd::geteuid().as_raw()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_writes_output_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LaunchSettings::new().set(DIRECTORY_SETTING, dir.path());

        let mut process = launch("/bin/echo", settings).unwrap();
        assert_eq!(process.log_path(), dir.path().join(LOG_FILE_NAME));
        let status = process.wait().await.unwrap();
        assert!(status.success());

        let log = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        let expected = format!(
            "--api-addr=localhost:8480 --host-addr=:8482 --rpc-addr=:8481 --uplo-directory={}\n",
            dir.path().display()
        );
        assert_eq!(log, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_captures_stderr_and_appends() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-uplod");
        std::fs::write(&script, "#!/bin/sh\necho \"out $1\"\necho \"err $2\" >&2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join(LOG_FILE_NAME), "previous run\n").unwrap();

        let settings = LaunchSettings::new().set(DIRECTORY_SETTING, dir.path());
        let mut process = launch(&script, settings).unwrap();
        process.wait().await.unwrap();

        let log = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert!(log.starts_with("previous run\n"));
        assert!(log.contains("out --api-addr=localhost:8480\n"));
        assert!(log.contains("err --host-addr=:8482\n"));
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("does-not-exist");
        let settings = LaunchSettings::new().set(DIRECTORY_SETTING, dir.path());

        match launch(&program, settings) {
            Err(Error::Spawn { path, source }) => {
                assert_eq!(path, program);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected spawn error, got {:?}", other.map(|p| p.id())),
        }
    }
}
