//! Typed view of the platform configuration record.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;

use super::error::TraderError;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    fn parse(raw: &str) -> Option<Environment> {
        match raw {
            "dev" => Some(Environment::Dev),
            "staging" => Some(Environment::Staging),
            "prod" => Some(Environment::Prod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub root_path: PathBuf,
    pub db_root_path: PathBuf,
    pub configs_root_path: PathBuf,
    pub logs_root_path: PathBuf,
    pub debug: bool,
    pub job_name: String,
    pub xml_file: String,
    pub timezone: Tz,
    pub http_timeout: Duration,
}

impl Settings {
    /// Validate and load the `[platform]` section. `environment` and
    /// `root_path` are required; the other paths default to subdirectories
    /// of the root.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TraderError> {
        let environment_raw = config
            .get_string("platform", "environment")
            .ok_or_else(|| TraderError::ConfigMissing {
                section: "platform".into(),
                key: "environment".into(),
            })?;
        let environment =
            Environment::parse(&environment_raw).ok_or_else(|| TraderError::ConfigInvalid {
                section: "platform".into(),
                key: "environment".into(),
                reason: format!("{environment_raw} is not one of dev, staging, prod"),
            })?;

        let root_path: PathBuf = config
            .get_string("platform", "root_path")
            .ok_or_else(|| TraderError::ConfigMissing {
                section: "platform".into(),
                key: "root_path".into(),
            })?
            .into();

        let sub = |key: &str, default: &str| -> PathBuf {
            config
                .get_string("platform", key)
                .map(PathBuf::from)
                .unwrap_or_else(|| root_path.join(default))
        };

        let timezone_raw = config
            .get_string("platform", "timezone")
            .unwrap_or_else(|| "America/New_York".into());
        let timezone: Tz =
            timezone_raw
                .parse()
                .map_err(|_| TraderError::ConfigInvalid {
                    section: "platform".into(),
                    key: "timezone".into(),
                    reason: format!("{timezone_raw} is not an IANA timezone name"),
                })?;

        Ok(Settings {
            environment,
            db_root_path: sub("db_root_path", "db"),
            configs_root_path: sub("configs_root_path", "configs"),
            logs_root_path: sub("logs_root_path", "logs"),
            root_path,
            debug: config.get_bool("platform", "debug", false),
            job_name: config
                .get_string("platform", "job_name")
                .unwrap_or_else(|| "autotrader".into()),
            xml_file: config
                .get_string("platform", "xml_file")
                .unwrap_or_else(|| "strategy.xml".into()),
            timezone,
            http_timeout: Duration::from_secs(
                config.get_int("platform", "http_timeout_secs", 10) as u64,
            ),
        })
    }

    /// Current wall-clock time in the configured timezone.
    pub fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.timezone).naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn adapter(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let settings = Settings::from_config(&adapter(
            "[platform]\nenvironment = dev\nroot_path = /srv/autotrader\n",
        ))
        .unwrap();
        assert_eq!(settings.environment, Environment::Dev);
        assert_eq!(settings.db_root_path, PathBuf::from("/srv/autotrader/db"));
        assert_eq!(settings.logs_root_path, PathBuf::from("/srv/autotrader/logs"));
        assert_eq!(settings.job_name, "autotrader");
        assert_eq!(settings.http_timeout, Duration::from_secs(10));
        assert_eq!(settings.timezone, chrono_tz::America::New_York);
        assert!(!settings.debug);
    }

    #[test]
    fn explicit_paths_override_defaults() {
        let settings = Settings::from_config(&adapter(
            "[platform]\nenvironment = prod\nroot_path = /srv\ndb_root_path = /data/db\nhttp_timeout_secs = 30\ntimezone = Australia/Sydney\n",
        ))
        .unwrap();
        assert_eq!(settings.environment, Environment::Prod);
        assert_eq!(settings.db_root_path, PathBuf::from("/data/db"));
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
        assert_eq!(settings.timezone, chrono_tz::Australia::Sydney);
    }

    #[test]
    fn missing_environment_is_fatal() {
        let err = Settings::from_config(&adapter("[platform]\nroot_path = /srv\n")).unwrap_err();
        assert!(matches!(err, TraderError::ConfigMissing { .. }));
    }

    #[test]
    fn bad_environment_is_fatal() {
        let err = Settings::from_config(&adapter(
            "[platform]\nenvironment = qa\nroot_path = /srv\n",
        ))
        .unwrap_err();
        assert!(matches!(err, TraderError::ConfigInvalid { .. }));
    }

    #[test]
    fn bad_timezone_is_fatal() {
        let err = Settings::from_config(&adapter(
            "[platform]\nenvironment = dev\nroot_path = /srv\ntimezone = Mars/Olympus\n",
        ))
        .unwrap_err();
        assert!(matches!(err, TraderError::ConfigInvalid { .. }));
    }
}
