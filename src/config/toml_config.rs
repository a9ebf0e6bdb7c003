use crate::config::{ColumnMapping, CommitPolicy, PipelineSettings, TransformPolicy};
use crate::domain::model::ConnectionParams;
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_database_url, validate_path, validate_required_field, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub source: SourceSection,
    pub database: DatabaseSection,
    #[serde(default)]
    pub load: LoadSection,
    pub error_handling: Option<ErrorHandlingSection>,
    pub monitoring: Option<MonitoringSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    pub path: PathBuf,
    pub delimiter: Option<String>,
    pub date_format: Option<String>,
    pub decimal_separator: Option<String>,
    /// Empty string disables thousands grouping.
    pub thousands_separator: Option<String>,
    pub chunk_size: Option<usize>,
    pub prefetch_chunks: Option<usize>,
    pub columns: Option<ColumnMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSection {
    pub batch_size: Option<usize>,
    pub commit_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingSection {
    pub on_transform_error: Option<TransformPolicy>,
    pub on_commit_error: Option<CommitPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSection {
    pub enabled: bool,
    pub json_logs: Option<bool>,
}

fn single_char(field: &str, value: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(EtlError::InvalidConfigValueError {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be exactly one character".to_string(),
        }),
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${MYSQL_PASSWORD})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn json_logs(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.json_logs)
            .unwrap_or(false)
    }
}

impl ConfigProvider for TomlConfig {
    fn input_path(&self) -> &Path {
        &self.source.path
    }

    fn connection(&self) -> Result<ConnectionParams> {
        let db = &self.database;
        if let Some(url) = &db.url {
            return ConnectionParams::from_url(url);
        }

        let host = validate_required_field("database.host", &db.host)?;
        let user = validate_required_field("database.user", &db.user)?;
        let database = validate_required_field("database.database", &db.database)?;
        let params = ConnectionParams::new(
            host.clone(),
            user.clone(),
            db.password.clone().unwrap_or_default(),
            database.clone(),
        );

        Ok(match db.port {
            Some(port) => params.with_port(port),
            None => params,
        })
    }

    fn settings(&self) -> Result<PipelineSettings> {
        let defaults = PipelineSettings::default();
        let source = &self.source;

        let delimiter = match &source.delimiter {
            Some(value) => single_char("source.delimiter", value)?,
            None => defaults.delimiter,
        };
        let decimal_separator = match &source.decimal_separator {
            Some(value) => single_char("source.decimal_separator", value)?,
            None => defaults.decimal_separator,
        };
        let thousands_separator = match source.thousands_separator.as_deref() {
            Some("") => None,
            Some(value) => Some(single_char("source.thousands_separator", value)?),
            None => defaults.thousands_separator,
        };
        let (on_transform_error, on_commit_error) = match &self.error_handling {
            Some(section) => (
                section.on_transform_error.unwrap_or_default(),
                section.on_commit_error.unwrap_or_default(),
            ),
            None => (TransformPolicy::default(), CommitPolicy::default()),
        };

        Ok(PipelineSettings {
            batch_size: self.load.batch_size.unwrap_or(defaults.batch_size),
            chunk_size: source.chunk_size.unwrap_or(defaults.chunk_size),
            prefetch_chunks: source.prefetch_chunks.unwrap_or(defaults.prefetch_chunks),
            delimiter,
            date_format: source.date_format.clone().unwrap_or(defaults.date_format),
            decimal_separator,
            thousands_separator,
            columns: source.columns.clone().unwrap_or(defaults.columns),
            table: self.database.table.clone().unwrap_or(defaults.table),
            on_transform_error,
            on_commit_error,
            commit_timeout: self.load.commit_timeout_seconds.map(Duration::from_secs),
        })
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        validate_path("source.path", &self.source.path.to_string_lossy())?;

        if let Some(url) = &self.database.url {
            validate_database_url("database.url", url)?;
        }
        self.connection()?;

        self.settings()?.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let toml_content = r#"
[source]
path = "levantamento_irmaos.csv"

[database]
host = "localhost"
user = "root"
database = "payments_db"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings, PipelineSettings::default());
        assert!(!config.monitoring_enabled());

        let connection = config.connection().unwrap();
        assert_eq!(connection.port, 3306);
        assert!(connection.password.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[source]
path = "data/export.tsv"
delimiter = "\t"
date_format = "%Y-%m-%d"
decimal_separator = "."
thousands_separator = ""
chunk_size = 5000

[source.columns]
status = "status"
member_id = "member"

[database]
url = "mysql://loader:pw@db.internal:3307/finance"
table = "staging_payments"

[load]
batch_size = 250
commit_timeout_seconds = 15

[error_handling]
on_transform_error = "skip"
on_commit_error = "abort"

[monitoring]
enabled = true
json_logs = true
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.delimiter, '\t');
        assert_eq!(settings.decimal_separator, '.');
        assert_eq!(settings.thousands_separator, None);
        assert_eq!(settings.chunk_size, 5000);
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.table, "staging_payments");
        assert_eq!(settings.columns.status, "status");
        // unspecified columns keep their defaults
        assert_eq!(settings.columns.amount, "Valor");
        assert_eq!(settings.on_transform_error, TransformPolicy::Skip);
        assert_eq!(settings.on_commit_error, CommitPolicy::Abort);
        assert_eq!(settings.commit_timeout, Some(Duration::from_secs(15)));
        assert!(config.monitoring_enabled());
        assert!(config.json_logs());

        let connection = config.connection().unwrap();
        assert_eq!(connection.host, "db.internal");
        assert_eq!(connection.user, "loader");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("PAYMENTS_ETL_TEST_PASSWORD", "from-env");

        let toml_content = r#"
[source]
path = "input.csv"

[database]
host = "localhost"
user = "root"
password = "${PAYMENTS_ETL_TEST_PASSWORD}"
database = "payments_db"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.connection().unwrap().password, "from-env");

        std::env::remove_var("PAYMENTS_ETL_TEST_PASSWORD");
    }

    #[test]
    fn test_config_validation() {
        let toml_content = r#"
[source]
path = "input.csv"
delimiter = ";;"

[database]
host = "localhost"
user = "root"
database = "payments_db"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        let missing_user = r#"
[source]
path = "input.csv"

[database]
host = "localhost"
database = "payments_db"
"#;
        let config = TomlConfig::from_toml_str(missing_user).unwrap();
        assert!(matches!(
            config.connection(),
            Err(EtlError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();

        let toml_content = r#"
[source]
path = "input.csv"

[database]
url = "mysql://root@localhost/payments_db"
"#;

        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.input_path(), Path::new("input.csv"));
    }
}
