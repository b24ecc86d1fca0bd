//! Pool configuration.
//!
//! Configuration is fixed when a [`Pool`](crate::Pool) is built. It can be
//! written in code or loaded from TOML:
//!
//! ```toml
//! mode = "process"
//! policy = "session"
//! max_instances = 4
//! call_timeout_ms = 30000
//!
//! [worker]
//! program = "/usr/local/bin/pdfhost-worker"
//! args = ["--engine", "memory"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where instances run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
	/// In the caller's process behind the process-wide native lock.
	#[default]
	InProcess,
	/// On an isolated engine thread reached only through frames.
	Sandbox,
	/// One worker process per instance.
	Process,
}

impl Mode {
	/// Name used in logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::InProcess => "in_process",
			Self::Sandbox => "sandbox",
			Self::Process => "process",
		}
	}
}

/// How callers use instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeasePolicy {
	/// Callers lease an instance for a whole document session.
	#[default]
	Session,
	/// Every request goes to whichever instance is free or owns its references.
	PerCall,
}

/// Worker process bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
	/// Worker executable.
	pub program: PathBuf,
	/// Arguments passed to the worker.
	pub args: Vec<String>,
	/// Extra environment variables.
	pub env: BTreeMap<String, String>,
}

/// Pool construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
	/// Where instances run.
	pub mode: Mode,
	/// How callers use instances.
	pub policy: LeasePolicy,
	/// Upper bound on live plus starting instances.
	pub max_instances: usize,
	/// Instances kept warm.
	pub min_instances: usize,
	/// How long `acquire` waits; unbounded when unset.
	pub acquire_timeout_ms: Option<u64>,
	/// How long a single call may run; unbounded when unset.
	pub call_timeout_ms: Option<u64>,
	/// How long a worker has to answer the handshake.
	pub handshake_timeout_ms: u64,
	/// Operations after which an instance is recycled.
	pub max_operations: Option<u64>,
	/// Ping instances before handing them out.
	pub ping_on_acquire: bool,
	/// Delay between failed instance starts.
	pub respawn_backoff_ms: u64,
	/// Worker bootstrap, used in process mode.
	pub worker: WorkerConfig,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			mode: Mode::default(),
			policy: LeasePolicy::default(),
			max_instances: 1,
			min_instances: 0,
			acquire_timeout_ms: None,
			call_timeout_ms: None,
			handshake_timeout_ms: 10_000,
			max_operations: None,
			ping_on_acquire: false,
			respawn_backoff_ms: 250,
			worker: WorkerConfig::default(),
		}
	}
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// TOML syntax or schema error.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A value is out of range.
	#[error("invalid value for '{field}': {reason}")]
	Invalid {
		/// Offending field.
		field: &'static str,
		/// What is wrong with it.
		reason: &'static str,
	},
}

impl PoolConfig {
	/// Parses and validates TOML.
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let source = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&source)
	}

	/// Checks value ranges.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
		if self.max_instances == 0 {
			return invalid("max_instances", "must be at least 1");
		}
		if self.min_instances > self.max_instances {
			return invalid("min_instances", "must not exceed max_instances");
		}
		if self.max_operations == Some(0) {
			return invalid("max_operations", "must be at least 1");
		}
		if self.call_timeout_ms == Some(0) {
			return invalid("call_timeout_ms", "must be at least 1");
		}
		if self.mode == Mode::Process && self.worker.program.as_os_str().is_empty() {
			return invalid("worker.program", "required in process mode");
		}
		Ok(())
	}

	/// Acquire deadline.
	pub fn acquire_timeout(&self) -> Option<Duration> {
		self.acquire_timeout_ms.map(Duration::from_millis)
	}

	/// Per-call deadline.
	pub fn call_timeout(&self) -> Option<Duration> {
		self.call_timeout_ms.map(Duration::from_millis)
	}

	/// Handshake deadline.
	pub fn handshake_timeout(&self) -> Duration {
		Duration::from_millis(self.handshake_timeout_ms)
	}

	/// Delay between failed starts.
	pub fn respawn_backoff(&self) -> Duration {
		Duration::from_millis(self.respawn_backoff_ms)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn parses_process_config() {
		let config = PoolConfig::from_toml_str(
			r#"
			mode = "process"
			policy = "per_call"
			max_instances = 4
			min_instances = 1
			call_timeout_ms = 5000
			max_operations = 100

			[worker]
			program = "/usr/bin/pdfhost-worker"
			args = ["--engine", "memory"]
			env = { RUST_LOG = "debug" }
			"#,
		)
		.unwrap();

		assert_eq!(config.mode, Mode::Process);
		assert_eq!(config.policy, LeasePolicy::PerCall);
		assert_eq!(config.call_timeout(), Some(Duration::from_secs(5)));
		assert_eq!(config.acquire_timeout(), None);
		assert_eq!(config.worker.args, vec!["--engine", "memory"]);
		assert_eq!(config.worker.env.get("RUST_LOG").map(String::as_str), Some("debug"));
		assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
	}

	#[test]
	fn defaults_are_a_single_in_process_instance() {
		let config = PoolConfig::from_toml_str("").unwrap();
		assert_eq!(config, PoolConfig::default());
		assert_eq!(config.max_instances, 1);
	}

	#[test]
	fn rejects_inconsistent_bounds() {
		let error = PoolConfig::from_toml_str("max_instances = 1\nmin_instances = 2").unwrap_err();
		assert_eq!(error.to_string(), "invalid value for 'min_instances': must not exceed max_instances");
		assert!(matches!(
			PoolConfig::from_toml_str("mode = \"process\"").unwrap_err(),
			ConfigError::Invalid {
				field: "worker.program",
				..
			}
		));
		assert!(matches!(PoolConfig::from_toml_str("bogus = 1").unwrap_err(), ConfigError::Toml(_)));
	}

	#[test]
	fn load_reports_missing_files() {
		let dir = tempfile::tempdir().unwrap();
		let error = PoolConfig::load(&dir.path().join("absent.toml")).unwrap_err();
		assert!(matches!(error, ConfigError::Io { .. }));
	}
}
