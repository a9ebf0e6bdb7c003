#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_delimiter, validate_identifier, validate_non_empty_string, validate_positive_number,
    validate_range, Validate,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use toml_config::TomlConfig;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Upper bound for `batch_size`. Seven bound values per row keeps the
/// multi-row INSERT far below MySQL's 65,535 placeholder limit.
pub const MAX_BATCH_SIZE: usize = 1000;

/// What to do with a record that fails to transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum TransformPolicy {
    /// End the run.
    #[default]
    Fail,
    /// Log, count and drop the record.
    Skip,
}

/// What to do after a batch is rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Count the failure and move on to the next batch.
    #[default]
    Continue,
    /// End the run as failed.
    Abort,
}

/// Source header name for each destination field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub status: String,
    pub member_id: String,
    pub due_date: String,
    pub amount: String,
    pub description: String,
    pub kind: String,
    pub payment_method: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            status: "Situação".to_string(),
            member_id: "Irmão".to_string(),
            due_date: "Vencimento".to_string(),
            amount: "Valor".to_string(),
            description: "Descrição".to_string(),
            kind: "Tipo".to_string(),
            payment_method: "Forma de Pagamento".to_string(),
        }
    }
}

impl ColumnMapping {
    /// Header names in destination column order.
    pub fn headers(&self) -> [&str; 7] {
        [
            self.status.as_str(),
            self.member_id.as_str(),
            self.due_date.as_str(),
            self.amount.as_str(),
            self.description.as_str(),
            self.kind.as_str(),
            self.payment_method.as_str(),
        ]
    }
}

/// Tuning knobs and policies for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub chunk_size: usize,
    /// Chunks the reader may run ahead of the committer.
    pub prefetch_chunks: usize,
    pub delimiter: char,
    /// chrono format string for the due date.
    pub date_format: String,
    pub decimal_separator: char,
    pub thousands_separator: Option<char>,
    pub columns: ColumnMapping,
    pub table: String,
    pub on_transform_error: TransformPolicy,
    pub on_commit_error: CommitPolicy,
    pub commit_timeout: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            prefetch_chunks: 2,
            delimiter: ';',
            date_format: "%d/%m/%Y".to_string(),
            decimal_separator: ',',
            thousands_separator: Some('.'),
            columns: ColumnMapping::default(),
            table: "payments".to_string(),
            on_transform_error: TransformPolicy::default(),
            on_commit_error: CommitPolicy::default(),
            commit_timeout: None,
        }
    }
}

impl PipelineSettings {
    pub fn delimiter_byte(&self) -> Result<u8> {
        validate_delimiter("delimiter", self.delimiter)
    }
}

impl Validate for PipelineSettings {
    fn validate(&self) -> Result<()> {
        validate_range("batch_size", self.batch_size, 1, MAX_BATCH_SIZE)?;
        validate_positive_number("chunk_size", self.chunk_size, 1)?;
        validate_positive_number("prefetch_chunks", self.prefetch_chunks, 1)?;
        self.delimiter_byte()?;
        validate_non_empty_string("date_format", &self.date_format)?;
        validate_identifier("table", &self.table)?;

        if self.thousands_separator == Some(self.decimal_separator) {
            return Err(EtlError::InvalidConfigValueError {
                field: "thousands_separator".to_string(),
                value: self.decimal_separator.to_string(),
                reason: "must differ from the decimal separator".to_string(),
            });
        }

        for (field, header) in [
            ("columns.status", &self.columns.status),
            ("columns.member_id", &self.columns.member_id),
            ("columns.due_date", &self.columns.due_date),
            ("columns.amount", &self.columns.amount),
            ("columns.description", &self.columns.description),
            ("columns.kind", &self.columns.kind),
            ("columns.payment_method", &self.columns.payment_method),
        ] {
            validate_non_empty_string(field, header)?;
        }

        if let Some(timeout) = self.commit_timeout {
            if timeout.is_zero() {
                return Err(EtlError::InvalidConfigValueError {
                    field: "commit_timeout".to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}
