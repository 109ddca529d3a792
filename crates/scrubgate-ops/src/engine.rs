//! The external tag-scrubbing engine.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use scrubgate_core::EngineConfig;

use crate::OperationError;

/// Tags copied back from the source after everything else is removed.
pub const PRESERVED_TAGS: &[&str] = &[
    "ExposureTime",
    "FNumber",
    "ImageSize",
    "Title",
    "FocalLength",
    "ISO",
    "Orientation",
];

/// Tag bundles preserved unless running in paranoia mode.
pub const PRESERVED_BUNDLES: &[&str] = &["ColorSpaceTags"];

/// Groups each preserved tag is requested from.
pub const TAG_GROUPS: &[&str] = &[
    "",
    "XMP",
    "XMP-dc",
    "EXIF",
    "IPTC",
    "Makernotes",
    "Comment",
    "PhotoShop",
];

/// Byte limit for a stamped copyright notice.
pub const MAX_COPYRIGHT_BYTES: usize = 128;

/// Byte limit for a stamped comment.
pub const MAX_COMMENT_BYTES: usize = 256;

/// Exit status and diagnostics of one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Process exit code; `None` when killed by a signal.
    pub exit_code: Option<i32>,
    /// Standard error, decoded lossily.
    pub stderr: String,
}

impl EngineOutput {
    /// A clean exit.
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            stderr: String::new(),
        }
    }

    /// A failed exit with diagnostics.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status zero.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable exit status.
    pub fn status(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Something that writes a scrubbed copy of `source` to `destination`.
///
/// Implementations must never modify `source`. An `Err` means the engine
/// could not be run at all; a run that failed is an `Ok` with a non-zero
/// exit code.
#[allow(async_fn_in_trait)]
pub trait ScrubEngine {
    /// Scrub one file.
    async fn scrub(&self, source: &Path, destination: &Path) -> Result<EngineOutput, OperationError>;
}

/// ExifTool run as a subprocess, one file per invocation.
#[derive(Debug, Clone)]
pub struct ExiftoolEngine {
    config: EngineConfig,
    copyright: Option<String>,
    comment: Option<String>,
}

impl ExiftoolEngine {
    /// Create an engine from its settings, truncating stamp values to their limits.
    pub fn new(config: EngineConfig) -> Self {
        let copyright = config
            .copyright
            .as_deref()
            .map(|value| stamp_value("copyright", value, MAX_COPYRIGHT_BYTES));
        let comment = config
            .comment
            .as_deref()
            .map(|value| stamp_value("comment", value, MAX_COMMENT_BYTES));
        Self {
            config,
            copyright,
            comment,
        }
    }

    /// Invocation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Full argument list after the program name.
    pub fn args(&self, source: &Path, destination: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.config.program_args.iter().map(OsString::from).collect();

        for fixed in ["-P", "-m", "-all=", "-gps:all=", "-tagsFromFile", "@"] {
            args.push(fixed.into());
        }
        args.extend(preserve_args(self.config.paranoia).into_iter().map(OsString::from));
        if self.config.paranoia {
            args.push("-ICC_Profile:all=".into());
        }
        if let Some(copyright) = &self.copyright {
            args.push(format!("-EXIF:Copyright={copyright}").into());
            args.push(format!("-XMP-dc:Rights={copyright}").into());
        }
        if let Some(comment) = &self.comment {
            args.push(format!("-EXIF:UserComment={comment}").into());
            args.push(format!("-XMP-dc:Description={comment}").into());
        }

        args.push("-o".into());
        args.push(destination.as_os_str().to_owned());
        args.push(source.as_os_str().to_owned());
        args
    }
}

impl ScrubEngine for ExiftoolEngine {
    async fn scrub(&self, source: &Path, destination: &Path) -> Result<EngineOutput, OperationError> {
        let args = self.args(source, destination);
        debug!(
            program = %self.config.program.display(),
            args = ?args,
            "running engine"
        );

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OperationError::EngineSpawn {
                program: self.config.program.clone(),
                source,
            })?;

        let limit = self.timeout();
        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(EngineOutput {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(OperationError::io("Failed to wait for engine on", source, e)),
            Err(_) => {
                warn!(path = %source.display(), timeout_secs = limit.as_secs(), "engine timed out");
                Err(OperationError::EngineTimeout {
                    path: source.to_path_buf(),
                    timeout: limit,
                })
            }
        }
    }
}

/// `-Tag` / `-Group:Tag` arguments for every preserved tag, in order, without repeats.
pub fn preserve_args(paranoia: bool) -> Vec<String> {
    let bundles: &[&str] = if paranoia { &[] } else { PRESERVED_BUNDLES };
    let mut args: Vec<String> = Vec::new();
    for tag in PRESERVED_TAGS.iter().chain(bundles) {
        for group in TAG_GROUPS {
            let arg = if group.is_empty() {
                format!("-{tag}")
            } else {
                format!("-{group}:{tag}")
            };
            if !args.contains(&arg) {
                args.push(arg);
            }
        }
    }
    args
}

/// Cut `value` to at most `max_bytes` without splitting a character.
pub fn truncate_utf8(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn stamp_value(label: &str, value: &str, max_bytes: usize) -> String {
    let cut = truncate_utf8(value, max_bytes);
    if cut.len() < value.len() {
        warn!(
            field = label,
            limit = max_bytes,
            original = value.len(),
            "stamp value truncated"
        );
    }
    cut.to_string()
}
