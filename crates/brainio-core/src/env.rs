use std::env;
use std::path::PathBuf;

use crate::error::{BrainioError, Result};

const DEFAULT_REGION: &str = "us-east-1";

/// Environment-driven configuration for catalogs, caches, and transports.
#[derive(Debug, Clone)]
pub struct BrainioConfig {
    pub home: PathBuf,
    pub rsync: RsyncSettings,
    pub s3: S3Settings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsyncSettings {
    pub program: String,
    pub ssh_program: String,
}

impl Default for RsyncSettings {
    fn default() -> Self {
        Self {
            program: "rsync".into(),
            ssh_program: "ssh".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Region used when the location host does not name one.
    pub default_region: String,
    pub endpoint: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            default_region: DEFAULT_REGION.into(),
            endpoint: None,
        }
    }
}

impl BrainioConfig {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            rsync: RsyncSettings::default(),
            s3: S3Settings::default(),
        }
    }

    /// Build a [`BrainioConfig`] by reading the documented BRAINIO_* variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_home(None)
    }

    /// Same as [`BrainioConfig::from_env`], with `home` taking precedence over `BRAINIO_HOME`.
    pub fn from_env_with_home(home: Option<PathBuf>) -> Result<Self> {
        Self::resolve(|key| env::var(key).ok(), home)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Self::resolve(lookup, None)
    }

    fn resolve(lookup: impl Fn(&str) -> Option<String>, home: Option<PathBuf>) -> Result<Self> {
        let home = match home.or_else(|| {
            lookup("BRAINIO_HOME")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        }) {
            Some(home) => home,
            None => dirs::home_dir()
                .map(|home| home.join("brainio"))
                .ok_or_else(|| BrainioError::Config {
                    reason: "BRAINIO_HOME is unset and no home directory is available".into(),
                })?,
        };

        let defaults = RsyncSettings::default();
        let rsync = RsyncSettings {
            program: lookup("BRAINIO_RSYNC_BIN").unwrap_or(defaults.program),
            ssh_program: lookup("BRAINIO_SSH_BIN").unwrap_or(defaults.ssh_program),
        };

        let s3 = S3Settings {
            default_region: lookup("BRAINIO_S3_REGION")
                .or_else(|| lookup("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.into()),
            endpoint: lookup("BRAINIO_S3_ENDPOINT").filter(|value| !value.is_empty()),
        };

        Ok(Self { home, rsync, s3 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_documented_variables() {
        let cfg = BrainioConfig::from_lookup(lookup_from(&[
            ("BRAINIO_HOME", "/data/brainio"),
            ("BRAINIO_RSYNC_BIN", "/usr/local/bin/rsync"),
            ("AWS_REGION", "eu-west-1"),
            ("BRAINIO_S3_ENDPOINT", "http://localhost:9000"),
        ]))
        .unwrap();
        assert_eq!(cfg.home, PathBuf::from("/data/brainio"));
        assert_eq!(cfg.rsync.program, "/usr/local/bin/rsync");
        assert_eq!(cfg.rsync.ssh_program, "ssh");
        assert_eq!(cfg.s3.default_region, "eu-west-1");
        assert_eq!(cfg.s3.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn brainio_region_wins_over_aws_region() {
        let cfg = BrainioConfig::from_lookup(lookup_from(&[
            ("BRAINIO_HOME", "/tmp/b"),
            ("BRAINIO_S3_REGION", "us-west-2"),
            ("AWS_REGION", "eu-west-1"),
        ]))
        .unwrap();
        assert_eq!(cfg.s3.default_region, "us-west-2");
    }

    #[test]
    fn explicit_home_beats_environment() {
        let cfg = BrainioConfig::resolve(
            lookup_from(&[("BRAINIO_HOME", "/data/brainio")]),
            Some(PathBuf::from("/scratch/brainio")),
        )
        .unwrap();
        assert_eq!(cfg.home, PathBuf::from("/scratch/brainio"));
    }

    #[test]
    fn defaults_home_under_user_directory() {
        let result = BrainioConfig::from_lookup(lookup_from(&[]));
        match dirs::home_dir() {
            Some(home) => {
                let cfg = result.unwrap();
                assert_eq!(cfg.home, home.join("brainio"));
                assert_eq!(cfg.s3, S3Settings::default());
            }
            None => assert!(matches!(result, Err(BrainioError::Config { .. }))),
        }
    }
}
