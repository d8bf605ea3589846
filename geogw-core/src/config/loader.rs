use std::path::Path;

use super::ConfigError;

/// Read a YAML file, resolve `${...}` placeholders, and deserialize it.
///
/// A missing file yields the type's `Default` so every configuration file in
/// the data directory is optional; an unreadable or malformed file is an
/// error.
pub(crate) fn load_yaml_file<T>(path: &Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
    load_yaml_str(&content).map_err(|e| match e {
        ConfigError::Load(msg) => ConfigError::Load(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Parse a YAML string after `${...}` placeholder resolution. Blank content
/// yields the type's `Default`.
pub(crate) fn load_yaml_str<T>(content: &str) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    let resolved = resolve_placeholders(content)?;
    if resolved.trim().is_empty() {
        return Ok(T::default());
    }
    let deserializer = serde_yaml::Deserializer::from_str(&resolved);
    serde_yaml::with::singleton_map_recursive::deserialize(deserializer)
        .map_err(|e| ConfigError::Load(e.to_string()))
}

/// Resolve `${VAR}` and `${VAR:default}` placeholders against the process
/// environment.
///
/// A placeholder without a default for an unset variable is an error: the
/// configuration is incomplete and startup must fail.
pub(crate) fn resolve_placeholders(value: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::Load("unclosed ${...} placeholder".into()))?;
        let reference = &after[..end];
        let (name, default) = match reference.split_once(':') {
            Some((n, d)) => (n.trim(), Some(d)),
            None => (reference.trim(), None),
        };
        match std::env::var(name) {
            Ok(val) => result.push_str(&val),
            Err(_) => match default {
                Some(d) => result.push_str(d),
                None => {
                    return Err(ConfigError::Load(format!(
                        "environment variable '{name}' is not set and has no default"
                    )))
                }
            },
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}
