//! Access policy: IP allow/deny lists, basic authentication and hidden files.

pub mod acl;
pub mod auth;
pub mod pattern;

use crate::{config::ServerConfig, errors::StartError};
use acl::AccessList;
use auth::BasicAuth;
use pattern::HiddenPattern;

/// The policy compiled from a configuration snapshot at start.
#[derive(Debug, Clone, Default)]
pub(crate) struct AccessPolicy {
    pub(crate) acl: AccessList,
    pub(crate) auth: Option<BasicAuth>,
    pub(crate) hidden: HiddenPattern,
}

impl AccessPolicy {
    pub(crate) fn from_config(config: &ServerConfig) -> Result<Self, StartError> {
        Ok(AccessPolicy {
            acl: config.ip_access_control_list.parse()?,
            auth: BasicAuth::from_config(config),
            hidden: config.hidden_file_pattern.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_from_config() {
        let config = ServerConfig {
            ip_access_control_list: "+127.0.0.1".into(),
            hidden_file_pattern: "**/.*".into(),
            basic_auth_username: "u".into(),
            basic_auth_password: "p".into(),
            ..ServerConfig::default()
        };

        let policy = AccessPolicy::from_config(&config).unwrap();
        assert!(!policy.acl.is_empty());
        assert!(policy.auth.is_some());
        assert!(policy.hidden.is_hidden("/.env"));
    }

    #[test]
    fn invalid_parts_fail() {
        let config = ServerConfig {
            ip_access_control_list: "127.0.0.1".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            AccessPolicy::from_config(&config),
            Err(StartError::Acl(_))
        ));

        let config = ServerConfig {
            hidden_file_pattern: "/[z-a]".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            AccessPolicy::from_config(&config),
            Err(StartError::Pattern(_))
        ));
    }
}
