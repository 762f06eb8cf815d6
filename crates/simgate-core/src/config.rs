//! Run configuration: the config document and the process-visible inputs.

use crate::error::{Result, SimgateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Variable naming the subsystem(s) under test.
pub const ENV_SUBSYSTEM: &str = "TEST_SUBSYSTEM";
/// Variable naming the project root that holds one folder per subsystem.
pub const ENV_BASE_PATH: &str = "BASE_PATH";
/// Variable naming the configuration document.
pub const ENV_CONFIG_FILE: &str = "CONFIG_FILE";

/// Default engine timeout (one hour).
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
/// Hard cap on launch retries regardless of configuration.
pub const MAX_LAUNCH_RETRIES: u32 = 3;

/// Folder names looked up under `<baseRoot>/<subsystem>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FolderNames {
    /// Folder holding test-suite artifacts.
    pub test_suites: String,

    /// Folder receiving exported results.
    pub test_results: String,
}

impl Default for FolderNames {
    fn default() -> Self {
        Self {
            test_suites: "TestSuites".to_string(),
            test_results: "TestResults".to_string(),
        }
    }
}

/// How to launch the external engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine executable.
    pub program: String,

    /// Execution directive passed verbatim (no per-run positional context).
    #[serde(default)]
    pub args: Vec<String>,

    /// Wall-clock limit for one invocation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after a launch failure (capped at [`MAX_LAUNCH_RETRIES`]).
    #[serde(default = "default_launch_retries")]
    pub launch_retries: u32,

    /// How long to keep draining output after the engine was killed.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// Extra variables exported to the engine.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_launch_retries() -> u32 {
    1
}

fn default_drain_grace_ms() -> u64 {
    2_000
}

impl EngineConfig {
    /// Engine config with defaults for everything but the program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            launch_retries: default_launch_retries(),
            drain_grace_ms: default_drain_grace_ms(),
            env: BTreeMap::new(),
        }
    }

    /// Builder-style args.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Retries actually applied.
    pub fn effective_launch_retries(&self) -> u32 {
        self.launch_retries.min(MAX_LAUNCH_RETRIES)
    }
}

/// The configuration document named by `CONFIG_FILE`.
///
/// Unknown keys are ignored; `engine.program` is the only required key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    #[serde(default)]
    pub folders: FolderNames,

    /// Recognized suite-file extension (leading dot optional).
    #[serde(default = "default_suite_extension")]
    pub suite_extension: String,

    pub engine: EngineConfig,
}

fn default_suite_extension() -> String {
    "mldatx".to_string()
}

impl HarnessConfig {
    /// Config with default folders and extension around the given engine.
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            folders: FolderNames::default(),
            suite_extension: default_suite_extension(),
            engine,
        }
    }

    /// Load and validate a config file. `.json` files are parsed as JSON,
    /// everything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SimgateError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_toml_str(&raw)
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| SimgateError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| SimgateError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.engine.program.trim().is_empty() {
            return Err(SimgateError::InvalidConfig(
                "engine.program must not be empty".to_string(),
            ));
        }
        if self.engine.timeout_secs == 0 {
            return Err(SimgateError::InvalidConfig(
                "engine.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.folders.test_suites.trim().is_empty() || self.folders.test_results.trim().is_empty()
        {
            return Err(SimgateError::InvalidConfig(
                "folder names must not be empty".to_string(),
            ));
        }
        if self.extension().is_empty() {
            return Err(SimgateError::InvalidConfig(
                "suite_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Suite extension without its leading dot.
    pub fn extension(&self) -> &str {
        normalize_extension(&self.suite_extension)
    }
}

/// Strip surrounding whitespace and a single leading dot.
pub fn normalize_extension(ext: &str) -> &str {
    let ext = ext.trim();
    ext.strip_prefix('.').unwrap_or(ext)
}

/// Named inputs a run starts from, as read from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInputs {
    /// Subsystems in caller order; empty when `TEST_SUBSYSTEM` is absent.
    pub subsystems: Vec<String>,

    pub base_root: Option<PathBuf>,

    pub config_file: Option<PathBuf>,
}

impl RunInputs {
    /// Read `TEST_SUBSYSTEM`, `BASE_PATH` and `CONFIG_FILE` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build inputs from an arbitrary variable lookup. Empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            subsystems: non_empty(ENV_SUBSYSTEM)
                .map(|raw| parse_subsystem_list(&raw))
                .unwrap_or_default(),
            base_root: non_empty(ENV_BASE_PATH).map(|v| PathBuf::from(v.trim())),
            config_file: non_empty(ENV_CONFIG_FILE).map(|v| PathBuf::from(v.trim())),
        }
    }
}

/// Split a comma-separated subsystem list, keeping caller order and dropping
/// blanks and repeats.
pub fn parse_subsystem_list(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [engine]
            program = "matlab"
            "#,
        )
        .unwrap();

        assert_eq!(config.folders.test_suites, "TestSuites");
        assert_eq!(config.folders.test_results, "TestResults");
        assert_eq!(config.extension(), "mldatx");
        assert_eq!(config.engine.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.engine.launch_retries, 1);
        assert!(config.engine.args.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = HarnessConfig::from_toml_str(
            r#"
            project = "vehicle"
            suite_extension = ".mldatx"
            [folders]
            test_suites = "Suites"
            colour = "blue"
            [engine]
            program = "matlab"
            args = ["-batch", "run_suite"]
            timeout_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.folders.test_suites, "Suites");
        assert_eq!(config.folders.test_results, "TestResults");
        assert_eq!(config.extension(), "mldatx");
        assert_eq!(config.engine.args, vec!["-batch", "run_suite"]);
        assert_eq!(config.engine.timeout_secs, 120);
    }

    #[test]
    fn test_missing_engine_is_invalid_config() {
        let err = HarnessConfig::from_toml_str("[folders]\ntest_suites = \"S\"\n").unwrap_err();
        assert!(matches!(err, SimgateError::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_program_is_invalid_config() {
        let err = HarnessConfig::from_toml_str("[engine]\nprogram = \"  \"\n").unwrap_err();
        assert!(matches!(err, SimgateError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_timeout_is_invalid_config() {
        let err =
            HarnessConfig::from_toml_str("[engine]\nprogram = \"x\"\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_json_document() {
        let config = HarnessConfig::from_json_str(
            r#"{"engine": {"program": "engine.sh", "launch_retries": 9}, "extra": 1}"#,
        )
        .unwrap();
        assert_eq!(config.engine.program, "engine.sh");
        assert_eq!(config.engine.effective_launch_retries(), MAX_LAUNCH_RETRIES);
    }

    #[test]
    fn test_load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("simgate.json");
        std::fs::write(&json_path, r#"{"engine": {"program": "a"}}"#).unwrap();
        let toml_path = dir.path().join("simgate.toml");
        std::fs::write(&toml_path, "[engine]\nprogram = \"b\"\n").unwrap();

        assert_eq!(HarnessConfig::load(&json_path).unwrap().engine.program, "a");
        assert_eq!(HarnessConfig::load(&toml_path).unwrap().engine.program, "b");
    }

    #[test]
    fn test_load_missing_file_is_invalid_config() {
        let err = HarnessConfig::load(Path::new("/nonexistent/simgate.toml")).unwrap_err();
        assert!(matches!(err, SimgateError::InvalidConfig(_)));
    }

    #[test]
    fn test_run_inputs_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_SUBSYSTEM, "Brakes, Steering,,Brakes"),
            (ENV_BASE_PATH, "/work/project"),
            (ENV_CONFIG_FILE, "   "),
        ]
        .into_iter()
        .collect();

        let inputs = RunInputs::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(inputs.subsystems, vec!["Brakes", "Steering"]);
        assert_eq!(inputs.base_root, Some(PathBuf::from("/work/project")));
        assert_eq!(inputs.config_file, None);
    }

    #[test]
    fn test_run_inputs_absent_subsystem() {
        let inputs = RunInputs::from_lookup(|_| None);
        assert!(inputs.subsystems.is_empty());
        assert!(inputs.base_root.is_none());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".mldatx"), "mldatx");
        assert_eq!(normalize_extension("mldatx"), "mldatx");
        assert_eq!(normalize_extension(" .xml "), "xml");
    }
}
