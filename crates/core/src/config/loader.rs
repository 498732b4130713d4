//! Configuration file loading

use super::schema::ConfigSchema;
use crate::error::{Error, ErrorCode, Result, ResultExt};
use std::path::{Path, PathBuf};

/// Configuration wrapper
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub schema: ConfigSchema,
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file path or the first standard location found,
    /// falling back to defaults when none exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) if !p.exists() => return Err(config_not_found(p)),
            Some(p) => Some(p.to_path_buf()),
            None => find_config_file(),
        };

        let schema = match &config_path {
            Some(p) => load_config_file(p)?,
            None => ConfigSchema::default(),
        };

        schema.validate()?;

        Ok(Self {
            schema,
            path: config_path,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let schema: ConfigSchema = toml::from_str(content)?;
        schema.validate()?;
        Ok(Self { schema, path: None })
    }
}

fn config_not_found(path: &Path) -> Error {
    Error::new(
        ErrorCode::ConfigNotFound,
        format!("Configuration file not found: {}", path.display()),
    )
}

/// Find configuration file in standard locations
fn find_config_file() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = [".carevisit.toml", "carevisit.toml", ".config/carevisit.toml"]
        .iter()
        .map(PathBuf::from)
        .collect();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("carevisit").join("config.toml"));
    }

    candidates.into_iter().find(|candidate| candidate.exists())
}

/// Load and parse a TOML configuration file
fn load_config_file(path: &Path) -> Result<ConfigSchema> {
    let what = || format!("loading {}", path.display());
    let content = std::fs::read_to_string(path).context(what())?;
    toml::from_str::<ConfigSchema>(&content).context(what())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevisit_geo::DistanceUnits;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.path.is_none());
        assert_eq!(
            config.schema.checkin.precise_fix_timeout(),
            Duration::from_secs(15)
        );
        assert_eq!(config.schema.checkin.units, DistanceUnits::Imperial);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[checkin]\nprecise_fix_timeout_ms = 5000\nunits = \"metric\"\n\n[telemetry]\njson = true"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.schema.checkin.precise_fix_timeout_ms, 5000);
        assert_eq!(config.schema.checkin.units, DistanceUnits::Metric);
        assert!(config.schema.telemetry.json);
        assert_eq!(config.schema.telemetry.log_level, "info");
        assert_eq!(config.path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_config_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/carevisit.toml"))).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigNotFound);
        assert!(err.suggestion.is_some());
    }

    #[test]
    fn test_config_parse_error_has_context() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[checkin\nbroken").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigParseError);
        assert_eq!(err.context.len(), 1);
        assert!(err.suggestion.is_none());
    }

    #[test]
    fn test_config_validation() {
        let err = Config::from_toml("[checkin]\nprecise_fix_timeout_ms = 0").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigValidationError);

        let err = Config::from_toml("[api]\nbase_url = \"ftp://example.com\"").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigValidationError);

        assert!(Config::from_toml("[api]\nbase_url = \"https://x.supabase.co\"").is_ok());
    }
}
