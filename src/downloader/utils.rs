// Helper functions for backend implementations

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use time::macros::format_description;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};
use tracing::debug;

use crate::downloader::models::NetworkConfig;

const OUTPUT_PREFIX: &str = "youtube-video";
const OUTPUT_EXT: &str = "mp4";

lazy_static::lazy_static! {
    // Stems handed out by this process; files may not exist yet
    static ref RESERVED_STEMS: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
}

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, String> {
    debug!(program, args = %args.join(" "), "spawning");

    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| format!("Failed to capture stdout from {}", program))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| format!("Failed to capture stderr from {}", program))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stdout: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stderr: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });

    match timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await {
        Ok(status_res) => {
            let status = status_res.map_err(|e| format!("Failed to wait for {}: {}", program, e))?;
            let stdout = stdout_task
                .await
                .map_err(|e| format!("stdout task failed: {}", e))??;
            let stderr = stderr_task
                .await
                .map_err(|e| format!("stderr task failed: {}", e))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(format!("Timed out after {}s", timeout_secs))
        }
    }
}

/// Locate an executable
///
/// `env_var` wins when set, then common install paths, then `which`.
/// Falls back to the bare name so the OS can still search `PATH`.
pub fn find_binary(name: &str, env_var: &str) -> String {
    if let Ok(path) = std::env::var(env_var) {
        if !path.trim().is_empty() {
            return path;
        }
    }

    let common_paths = [
        format!("/opt/homebrew/bin/{}", name), // Homebrew on Apple Silicon
        format!("/usr/local/bin/{}", name),    // Homebrew on Intel Mac
        format!("/usr/bin/{}", name),
    ];

    for path in common_paths {
        if Path::new(&path).exists() {
            return path;
        }
    }

    if let Ok(output) = std::process::Command::new("which").arg(name).output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return path;
            }
        }
    }

    name.to_string()
}

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(proxy) = &config.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    args
}

/// Build timeout arguments for yt-dlp
pub fn get_timeout_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(timeout) = config.timeout {
        args.push("--socket-timeout".to_string());
        args.push(timeout.to_string());
    }

    args
}

/// Filesystem-safe UTC timestamp with millisecond precision
///
/// `2024-05-01T10:20:30.123Z` becomes `2024-05-01T10-20-30-123Z`.
pub fn filesystem_timestamp(now: OffsetDateTime) -> String {
    let stamp = format_description!(
        "[year]-[month]-[day]T[hour]-[minute]-[second]-[subsecond digits:3]Z"
    );
    now.format(stamp)
        .unwrap_or_else(|_| (now.unix_timestamp_nanos() / 1_000_000).to_string())
}

/// Output and temporary file locations for one session
///
/// A timestamp-derived stem stays reserved in this process until the
/// value is dropped; by then the files on disk keep it taken.
#[derive(Debug, PartialEq, Eq)]
pub struct SessionPaths {
    dir: PathBuf,
    stem: String,
    output: PathBuf,
    reserved: Option<PathBuf>,
}

impl SessionPaths {
    /// Pick the paths for a new session in `dir`
    ///
    /// An explicit name is used as given (with `.mp4` appended when it has
    /// no extension). Otherwise the name is timestamp-derived and suffixed
    /// with `-1`, `-2`, ... until it collides with nothing on disk or
    /// handed out earlier by this process.
    pub fn allocate(dir: &Path, explicit_name: Option<&str>) -> Self {
        Self::allocate_at(dir, explicit_name, OffsetDateTime::now_utc())
    }

    pub fn allocate_at(dir: &Path, explicit_name: Option<&str>, now: OffsetDateTime) -> Self {
        if let Some(name) = explicit_name.map(str::trim).filter(|n| !n.is_empty()) {
            let file = if Path::new(name).extension().is_some() {
                name.to_string()
            } else {
                format!("{}.{}", name, OUTPUT_EXT)
            };
            let stem = Path::new(&file)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| OUTPUT_PREFIX.to_string());
            return Self {
                dir: dir.to_path_buf(),
                stem,
                output: dir.join(file),
                reserved: None,
            };
        }

        let base = format!("{}-{}", OUTPUT_PREFIX, filesystem_timestamp(now));
        let mut reserved = RESERVED_STEMS.lock().unwrap_or_else(|e| e.into_inner());
        let mut n = 0u32;
        loop {
            let stem = if n == 0 { base.clone() } else { format!("{}-{}", base, n) };
            let key = dir.join(&stem);
            if !reserved.contains(&key) && !stem_in_use(dir, &stem) {
                reserved.insert(key.clone());
                return Self {
                    dir: dir.to_path_buf(),
                    output: dir.join(format!("{}.{}", stem, OUTPUT_EXT)),
                    stem,
                    reserved: Some(key),
                };
            }
            n += 1;
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn temp_video(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}-temp-video.{}", self.stem, ext))
    }

    pub fn temp_audio(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}-temp-audio.{}", self.stem, ext))
    }
}

impl Drop for SessionPaths {
    fn drop(&mut self) {
        if let Some(key) = self.reserved.take() {
            RESERVED_STEMS
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
        }
    }
}

fn stem_in_use(dir: &Path, stem: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let dotted = format!("{}.", stem);
    let temp = format!("{}-temp-", stem);
    entries
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().to_string())
        .any(|name| name.starts_with(&dotted) || name.starts_with(&temp))
}
