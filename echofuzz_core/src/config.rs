use crate::mutator::Alphabet;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const ASCII_LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
const WHITESPACE: &str = " \t\n\r\x0b\x0c";

const DEFAULT_ATTACK_KEYWORDS: [&str; 4] = ["not allowed", "forbidden", "error", "denied"];

/// Errors that make a run impossible. All of them are raised before the
/// baseline probe executes.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Target command is empty")]
    EmptyCommand,
    #[error("Probe length must be a positive integer")]
    ZeroProbeLength,
    #[error("Mutation rate must be within [0, 1], got {0}")]
    MutationRateOutOfRange(f64),
    #[error("Probes per worker must be a positive integer")]
    ZeroProbesPerWorker,
    #[error("Process timeout must be greater than zero")]
    ZeroTimeout,
    #[error("Classifier threshold must be within [0, 1], got {0}")]
    ClassifierThresholdOutOfRange(f64),
    #[error("Unknown vulnerability profile '{0}'")]
    UnknownProfile(String),
}

/// Selects the probe alphabet, the attack-keyword deny-list and the marker.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VulnerabilityProfile {
    #[default]
    AutomatedFuzzing,
    FormatString,
}

impl VulnerabilityProfile {
    pub fn alphabet(&self) -> Alphabet {
        let chars = match self {
            VulnerabilityProfile::AutomatedFuzzing => {
                [ASCII_LETTERS, DIGITS, PUNCTUATION, WHITESPACE].concat()
            }
            // '%' is already part of the punctuation set; repeating it doubles its weight.
            VulnerabilityProfile::FormatString => {
                [ASCII_LETTERS, DIGITS, PUNCTUATION, " %"].concat()
            }
        };
        Alphabet::from(chars.as_bytes())
    }

    pub fn attack_keywords(&self) -> Vec<String> {
        DEFAULT_ATTACK_KEYWORDS.iter().map(|k| k.to_string()).collect()
    }

    pub fn marker(&self) -> &'static str {
        match self {
            VulnerabilityProfile::AutomatedFuzzing => "<m>",
            VulnerabilityProfile::FormatString => "<MARKER>",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VulnerabilityProfile::AutomatedFuzzing => "automated-fuzzing",
            VulnerabilityProfile::FormatString => "format-string",
        }
    }
}

impl fmt::Display for VulnerabilityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VulnerabilityProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "automated-fuzzing" | "automated" | "1" => Ok(VulnerabilityProfile::AutomatedFuzzing),
            "format-string" | "2" => Ok(VulnerabilityProfile::FormatString),
            _ => Err(ConfigError::UnknownProfile(s.to_string())),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_ms: default_timeout_ms(),
            working_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_probe_length")]
    pub probe_length: usize,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default = "default_probes_per_worker")]
    pub probes_per_worker: usize,
    #[serde(default)]
    pub profile: VulnerabilityProfile,
    pub seed: Option<u64>,
    #[serde(default = "default_classifier_threshold")]
    pub classifier_threshold: f64,
}

pub fn default_probe_length() -> usize {
    32
}
pub fn default_mutation_rate() -> f64 {
    0.1
}
pub fn default_probes_per_worker() -> usize {
    100
}
pub fn default_classifier_threshold() -> f64 {
    0.25
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            probe_length: default_probe_length(),
            mutation_rate: default_mutation_rate(),
            probes_per_worker: default_probes_per_worker(),
            profile: VulnerabilityProfile::default(),
            seed: None,
            classifier_threshold: default_classifier_threshold(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    #[serde(default = "default_results_file")]
    pub results_file: PathBuf,
}

pub fn default_results_file() -> PathBuf {
    PathBuf::from("fuzzing_results.txt")
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_file: default_results_file(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExploitSettings {
    #[serde(default = "default_flag_pattern")]
    pub flag_pattern: String,
}

pub fn default_flag_pattern() -> String {
    "flag{".to_string()
}

impl Default for ExploitSettings {
    fn default() -> Self {
        Self {
            flag_pattern: default_flag_pattern(),
        }
    }
}

/// On-disk configuration as written by the operator. Every section is
/// optional; [`EchofuzzConfig::validate`] turns it into a [`RunConfig`].
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EchofuzzConfig {
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub exploit: ExploitSettings,
}

impl EchofuzzConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Checks every operator-supplied value and freezes the result.
    pub fn validate(&self) -> Result<RunConfig, ConfigError> {
        if self.target.command.is_empty() || self.target.command[0].trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        if self.target.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let fuzzer = &self.fuzzer;
        if fuzzer.probe_length == 0 {
            return Err(ConfigError::ZeroProbeLength);
        }
        if !(0.0..=1.0).contains(&fuzzer.mutation_rate) {
            return Err(ConfigError::MutationRateOutOfRange(fuzzer.mutation_rate));
        }
        if fuzzer.probes_per_worker == 0 {
            return Err(ConfigError::ZeroProbesPerWorker);
        }
        if !(0.0..=1.0).contains(&fuzzer.classifier_threshold) {
            return Err(ConfigError::ClassifierThresholdOutOfRange(
                fuzzer.classifier_threshold,
            ));
        }

        Ok(RunConfig {
            command: self.target.command.clone(),
            timeout: Duration::from_millis(self.target.timeout_ms),
            working_dir: self.target.working_dir.clone(),
            probe_length: fuzzer.probe_length,
            mutation_rate: fuzzer.mutation_rate,
            probes_per_worker: fuzzer.probes_per_worker,
            profile: fuzzer.profile,
            alphabet: fuzzer.profile.alphabet(),
            attack_keywords: fuzzer.profile.attack_keywords(),
            marker: fuzzer.profile.marker().to_string(),
            seed: fuzzer.seed,
            classifier_threshold: fuzzer.classifier_threshold,
            results_file: self.output.results_file.clone(),
            flag_pattern: self.exploit.flag_pattern.clone(),
        })
    }
}

/// Validated, immutable configuration shared by every component of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub probe_length: usize,
    pub mutation_rate: f64,
    pub probes_per_worker: usize,
    pub profile: VulnerabilityProfile,
    pub alphabet: Alphabet,
    pub attack_keywords: Vec<String>,
    pub marker: String,
    pub seed: Option<u64>,
    pub classifier_threshold: f64,
    pub results_file: PathBuf,
    pub flag_pattern: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_command() -> EchofuzzConfig {
        let mut config = EchofuzzConfig::default();
        config.target.command = vec!["./app".to_string()];
        config
    }

    #[test]
    fn parses_full_toml_document() {
        let config = EchofuzzConfig::from_toml_str(
            r#"
            [target]
            command = ["./app", "--verbose"]
            timeout-ms = 1500

            [fuzzer]
            probe-length = 16
            mutation-rate = 0.5
            probes-per-worker = 7
            profile = "format-string"
            seed = 99

            [output]
            results-file = "out.txt"

            [exploit]
            flag-pattern = "CTF{"
            "#,
        )
        .expect("valid config");

        let run = config.validate().expect("valid run config");
        assert_eq!(run.command, vec!["./app", "--verbose"]);
        assert_eq!(run.timeout, Duration::from_millis(1500));
        assert_eq!(run.probe_length, 16);
        assert_eq!(run.probes_per_worker, 7);
        assert_eq!(run.profile, VulnerabilityProfile::FormatString);
        assert_eq!(run.marker, "<MARKER>");
        assert_eq!(run.seed, Some(99));
        assert_eq!(run.results_file, PathBuf::from("out.txt"));
        assert_eq!(run.flag_pattern, "CTF{");
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = EchofuzzConfig::from_toml_str("[target]\ncommand = [\"cat\"]\n").unwrap();
        let run = config.validate().unwrap();
        assert_eq!(run.timeout, Duration::from_secs(5));
        assert_eq!(run.profile, VulnerabilityProfile::AutomatedFuzzing);
        assert_eq!(run.marker, "<m>");
        assert_eq!(run.probe_length, default_probe_length());
    }

    #[test]
    fn unknown_fields_and_profiles_are_rejected() {
        assert!(EchofuzzConfig::from_toml_str("[fuzzer]\nthreads = 4\n").is_err());
        assert!(EchofuzzConfig::from_toml_str("[fuzzer]\nprofile = \"sql\"\n").is_err());
    }

    #[test]
    fn validation_rejects_malformed_values() {
        assert_eq!(
            EchofuzzConfig::default().validate().unwrap_err(),
            ConfigError::EmptyCommand
        );

        let mut config = config_with_command();
        config.fuzzer.probe_length = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::ZeroProbeLength);

        let mut config = config_with_command();
        config.fuzzer.mutation_rate = 1.5;
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::MutationRateOutOfRange(1.5)
        );

        let mut config = config_with_command();
        config.fuzzer.mutation_rate = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MutationRateOutOfRange(_))
        ));

        let mut config = config_with_command();
        config.fuzzer.probes_per_worker = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::ZeroProbesPerWorker);

        let mut config = config_with_command();
        config.target.timeout_ms = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::ZeroTimeout);

        let mut config = config_with_command();
        config.fuzzer.classifier_threshold = 1.25;
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::ClassifierThresholdOutOfRange(1.25)
        );

        let mut config = config_with_command();
        config.fuzzer.classifier_threshold = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ClassifierThresholdOutOfRange(_))
        ));

        let mut config = config_with_command();
        config.fuzzer.classifier_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn profile_parsing_accepts_names_and_menu_numbers() {
        assert_eq!(
            "format-string".parse::<VulnerabilityProfile>().unwrap(),
            VulnerabilityProfile::FormatString
        );
        assert_eq!(
            "Automated_Fuzzing".parse::<VulnerabilityProfile>().unwrap(),
            VulnerabilityProfile::AutomatedFuzzing
        );
        assert_eq!(
            "2".parse::<VulnerabilityProfile>().unwrap(),
            VulnerabilityProfile::FormatString
        );
        assert_eq!(
            "3".parse::<VulnerabilityProfile>().unwrap_err(),
            ConfigError::UnknownProfile("3".to_string())
        );
    }

    #[test]
    fn format_string_alphabet_weights_percent_twice() {
        let alphabet = VulnerabilityProfile::FormatString.alphabet();
        let percents = alphabet.as_bytes().iter().filter(|&&b| b == b'%').count();
        assert_eq!(percents, 2);
        assert!(alphabet.as_bytes().contains(&b' '));
        assert!(!alphabet.as_bytes().contains(&b'\n'));

        let automated = VulnerabilityProfile::AutomatedFuzzing.alphabet();
        assert!(automated.as_bytes().contains(&b'\n'));
        assert_eq!(automated.len(), 52 + 10 + 32 + 6);
    }
}
