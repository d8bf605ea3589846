use serde::Deserialize;

/// Contents of `logging.yaml`: log level/format and which diagnostic-context
/// fields the per-request span records.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LoggingFile {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Default tracing filter, overridable via `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of the human format.
    pub json: bool,
    pub mdc: MdcConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".into(),
            json: false,
            mdc: MdcConfig::default(),
        }
    }
}

/// Diagnostic-context field switches. Request-scoped fields are recorded on
/// the request span; user fields are recorded once resolution has run.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct MdcConfig {
    pub request_id: bool,
    pub method: bool,
    pub path: bool,
    pub remote_addr: bool,
    pub user_id: bool,
    pub roles: bool,
    pub organization: bool,
    pub auth_method: bool,
    /// Stamped on every span when non-empty.
    pub application_name: String,
}

impl Default for MdcConfig {
    fn default() -> Self {
        MdcConfig {
            request_id: true,
            method: true,
            path: true,
            remote_addr: true,
            user_id: true,
            roles: true,
            organization: true,
            auth_method: true,
            application_name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_file_parses() {
        let yaml = r#"
logging:
  level: debug
  json: true
  mdc:
    roles: false
    application-name: geogw
"#;
        let file: LoggingFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.logging.level, "debug");
        assert!(file.logging.json);
        assert!(!file.logging.mdc.roles);
        assert!(file.logging.mdc.request_id);
        assert_eq!(file.logging.mdc.application_name, "geogw");
    }
}
