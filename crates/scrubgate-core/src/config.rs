//! Intake configuration types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Default stability window.
pub const DEFAULT_STABLE_SECONDS: u64 = 120;

/// Default upper bound for a single engine invocation.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 60;

/// File name of the state file when no explicit location is configured.
pub const STATE_FILE_NAME: &str = ".scrubgate_state.json";

/// File name of the run lock when no explicit location is configured.
pub const LOCK_FILE_NAME: &str = ".scrubgate.lock";

/// Name patterns of files that are still being uploaded or synced.
pub const DEFAULT_TEMP_PATTERNS: &[&str] = &[
    ".*",
    "~*",
    "*.part",
    "*.partial",
    "*.tmp",
    "*.crdownload",
    "*.download",
    "*.filepart",
    "*.uploading",
    "*.!sync",
];

/// What to do with an intake file whose name already exists in the output directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum DuplicatePolicy {
    /// Remove the intake copy without scrubbing it.
    #[default]
    #[strum(to_string = "delete")]
    Delete,
    /// Move the intake copy into the errors directory.
    #[serde(alias = "move")]
    #[strum(to_string = "quarantine", serialize = "move")]
    Quarantine,
}

/// Where stability state is persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StateLocation {
    /// Persistence switched off; every run decides from the current observation only.
    Disabled,
    /// JSON state file at this path.
    Path(PathBuf),
}

impl StateLocation {
    /// The configuration value that switches persistence off.
    pub const DISABLED: &'static str = "disabled";

    /// Path of the state file, if persistence is enabled.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Disabled => None,
            Self::Path(path) => Some(path),
        }
    }
}

impl FromStr for StateLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("state location cannot be empty".to_string());
        }
        if trimmed.eq_ignore_ascii_case(Self::DISABLED) {
            Ok(Self::Disabled)
        } else {
            Ok(Self::Path(PathBuf::from(trimmed)))
        }
    }
}

impl TryFrom<String> for StateLocation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StateLocation> for String {
    fn from(value: StateLocation) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str(Self::DISABLED),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Settings for the external tag-scrubbing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable.
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Arguments placed before the engine's own arguments (for wrapper programs).
    #[serde(default)]
    pub program_args: Vec<String>,

    /// Also strip the ICC profile.
    #[serde(default)]
    pub paranoia: bool,

    /// Copyright notice stamped into every output.
    #[serde(default)]
    pub copyright: Option<String>,

    /// Comment stamped into every output.
    #[serde(default)]
    pub comment: Option<String>,

    /// Seconds before a hung engine invocation is killed.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_program() -> PathBuf {
    PathBuf::from("exiftool")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_ENGINE_TIMEOUT_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            program_args: Vec::new(),
            paranoia: false,
            copyright: None,
            comment: None,
            timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Use a different engine executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Prepend arguments, e.g. a script path when the program is an interpreter.
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    /// Set the invocation timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Configuration for one intake pass.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct IntakeConfig {
    /// Hot folder that receives uploads.
    pub input_dir: PathBuf,

    /// Where scrubbed copies are published.
    pub output_dir: PathBuf,

    /// Where originals go after processing, successful or not.
    pub processed_dir: PathBuf,

    /// Quarantine for duplicates.
    pub errors_dir: PathBuf,

    /// Descend into subdirectories of the input directory.
    #[builder(default = "false")]
    #[serde(default)]
    pub recursive: bool,

    /// Seconds a file must stay unchanged before it is scrubbed.
    #[builder(default = "DEFAULT_STABLE_SECONDS")]
    #[serde(default = "default_stable_seconds")]
    pub stable_seconds: u64,

    /// State persistence (None = state file inside the processed directory).
    #[builder(default)]
    #[serde(default)]
    pub state: Option<StateLocation>,

    /// Duplicate handling.
    #[builder(default)]
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,

    /// Delete originals after a successful scrub instead of keeping them in processed.
    #[builder(default = "false")]
    #[serde(default)]
    pub delete_original: bool,

    /// Report what would happen without touching anything.
    #[builder(default = "false")]
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum number of files handed to the engine per run.
    #[builder(default)]
    #[serde(default)]
    pub max_files: Option<usize>,

    /// Glob patterns of in-progress upload names.
    #[builder(default = "default_temp_patterns()")]
    #[serde(default = "default_temp_patterns")]
    pub temp_patterns: Vec<String>,

    /// Run lock file (None = lock file inside the errors directory).
    #[builder(default)]
    #[serde(default)]
    pub lock_path: Option<PathBuf>,

    /// External engine settings.
    #[builder(default)]
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_stable_seconds() -> u64 {
    DEFAULT_STABLE_SECONDS
}

/// The default temporary-name patterns as owned strings.
pub fn default_temp_patterns() -> Vec<String> {
    DEFAULT_TEMP_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl IntakeConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let dirs = [
            ("input", &self.input_dir),
            ("output", &self.output_dir),
            ("processed", &self.processed_dir),
            ("errors", &self.errors_dir),
        ];
        for (label, dir) in dirs {
            match dir {
                Some(path) if path.as_os_str().is_empty() => {
                    return Err(format!("{label} directory cannot be empty"));
                }
                Some(_) => {}
                None => return Err(format!("{label} directory is required")),
            }
        }
        if let Some(engine) = &self.engine {
            if engine.timeout_secs == 0 {
                return Err("engine timeout must be at least one second".to_string());
            }
        }
        Ok(())
    }
}

impl IntakeConfig {
    /// Create a new config builder.
    pub fn builder() -> IntakeConfigBuilder {
        IntakeConfigBuilder::default()
    }

    /// Effective state location.
    pub fn state_location(&self) -> StateLocation {
        self.state
            .clone()
            .unwrap_or_else(|| StateLocation::Path(self.processed_dir.join(STATE_FILE_NAME)))
    }

    /// Effective lock file path.
    pub fn lock_file(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| self.errors_dir.join(LOCK_FILE_NAME))
    }

    /// The directories every read and write must stay inside.
    pub fn allowed_roots(&self) -> Vec<PathBuf> {
        vec![
            self.input_dir.clone(),
            self.output_dir.clone(),
            self.processed_dir.clone(),
            self.errors_dir.clone(),
        ]
    }

    /// The directories checked before a run, with their labels.
    pub fn labelled_dirs(&self) -> [(&'static str, &PathBuf); 4] {
        [
            ("Input", &self.input_dir),
            ("Output", &self.output_dir),
            ("Processed", &self.processed_dir),
            ("Errors", &self.errors_dir),
        ]
    }
}
