use crate::config::{ColumnMapping, PipelineSettings};
use crate::domain::model::{PaymentRow, RawRecord};
use crate::utils::error::{TransformError, TransformErrorKind};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Locale rules for the amount column, e.g. `1.234,56` with `,` as decimal mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountFormat {
    pub decimal_separator: char,
    pub thousands_separator: Option<char>,
}

impl AmountFormat {
    /// Normalizes `raw` to a `Decimal`. Returns `None` for anything that is not a plain number.
    ///
    /// The grouping separator is only accepted between groups of three digits
    /// (`1.234.567,89`), so `150.00` or `1.5` under Brazilian rules is rejected
    /// rather than read as `15000` or `15`.
    pub fn parse(&self, raw: &str) -> Option<Decimal> {
        let trimmed = raw.trim();
        let (sign, unsigned) = match trimmed.strip_prefix(&['-', '+'][..]) {
            Some(rest) => (&trimmed[..1], rest),
            None => ("", trimmed),
        };

        let (integer, fraction) = match unsigned.split_once(self.decimal_separator) {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (unsigned, None),
        };

        let mut normalized = String::with_capacity(trimmed.len());
        normalized.push_str(sign);
        match self.thousands_separator {
            Some(sep) if integer.contains(sep) => {
                let mut groups = integer.split(sep);
                let leading = groups.next()?;
                if !(1..=3).contains(&leading.len()) || !all_digits(leading) {
                    return None;
                }
                normalized.push_str(leading);
                for group in groups {
                    if group.len() != 3 || !all_digits(group) {
                        return None;
                    }
                    normalized.push_str(group);
                }
            }
            _ => {
                if integer.is_empty() || !all_digits(integer) {
                    return None;
                }
                normalized.push_str(integer);
            }
        }

        if let Some(fraction) = fraction {
            if fraction.is_empty() || !all_digits(fraction) {
                return None;
            }
            normalized.push('.');
            normalized.push_str(fraction);
        }

        Decimal::from_str(&normalized).ok()
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// Maps one raw input record onto the destination schema.
///
/// Pure and deterministic: the same record always yields the same row or the
/// same error.
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    columns: ColumnMapping,
    date_format: String,
    amount_format: AmountFormat,
}

impl RecordTransformer {
    pub fn new(columns: ColumnMapping, date_format: impl Into<String>, amount_format: AmountFormat) -> Self {
        Self {
            columns,
            date_format: date_format.into(),
            amount_format,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.columns.clone(),
            settings.date_format.clone(),
            AmountFormat {
                decimal_separator: settings.decimal_separator,
                thousands_separator: settings.thousands_separator,
            },
        )
    }

    // chrono's `%Y` takes any digit count, so "10/05/24" would land in year 24.
    fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let date = NaiveDate::parse_from_str(raw.trim(), &self.date_format).ok()?;
        if self.date_format.contains("%Y") && !(1000..=9999).contains(&date.year()) {
            return None;
        }
        Some(date)
    }

    pub fn transform(&self, raw: &RawRecord) -> Result<PaymentRow, TransformError> {
        let columns = &self.columns;

        let status = required(raw, &columns.status)?;
        let member_id = required(raw, &columns.member_id)?;

        let due_date_raw = required(raw, &columns.due_date)?;
        let due_date = self
            .parse_date(due_date_raw)
            .ok_or_else(|| error(raw, TransformErrorKind::InvalidDate, &columns.due_date, Some(due_date_raw)))?;

        let amount_raw = required(raw, &columns.amount)?;
        let amount = self
            .amount_format
            .parse(amount_raw)
            .ok_or_else(|| error(raw, TransformErrorKind::InvalidAmount, &columns.amount, Some(amount_raw)))?;

        let description = required(raw, &columns.description)?;
        let kind = required(raw, &columns.kind)?;

        let payment_method = raw
            .get(&columns.payment_method)
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string);

        Ok(PaymentRow {
            status: status.to_string(),
            member_id: member_id.to_string(),
            due_date,
            amount,
            description: description.to_string(),
            kind: kind.to_string(),
            payment_method,
        })
    }
}

fn required<'a>(raw: &'a RawRecord, column: &str) -> Result<&'a str, TransformError> {
    raw.get(column)
        .ok_or_else(|| error(raw, TransformErrorKind::MissingField, column, None))
}

fn error(raw: &RawRecord, kind: TransformErrorKind, field: &str, value: Option<&str>) -> TransformError {
    TransformError {
        kind,
        field: field.to_string(),
        raw_value: value.map(str::to_string),
        line: (raw.line() > 0).then_some(raw.line()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADERS: [&str; 7] = [
        "Situação",
        "Irmão",
        "Vencimento",
        "Valor",
        "Descrição",
        "Tipo",
        "Forma de Pagamento",
    ];

    fn record(values: [&str; 7]) -> RawRecord {
        RawRecord::from_pairs(HEADERS.into_iter().zip(values))
    }

    fn transformer() -> RecordTransformer {
        RecordTransformer::from_settings(&PipelineSettings::default())
    }

    #[test]
    fn test_transform_reference_row() {
        let row = transformer()
            .transform(&record(["1", "Jo", "10/05/2024", "150,00", "rent", "fee", "cash"]))
            .unwrap();

        assert_eq!(row.status, "1");
        assert_eq!(row.member_id, "Jo");
        assert_eq!(row.due_date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert_eq!(row.amount, Decimal::new(15000, 2));
        assert_eq!(row.description, "rent");
        assert_eq!(row.kind, "fee");
        assert_eq!(row.payment_method.as_deref(), Some("cash"));
    }

    #[test]
    fn test_blank_payment_method_becomes_null() {
        let t = transformer();
        let empty = t
            .transform(&record(["Pago", "42", "01/12/2023", "80,5", "mensalidade", "fee", ""]))
            .unwrap();
        assert_eq!(empty.payment_method, None);
        assert_eq!(empty.amount, Decimal::new(805, 1));

        let blank = t
            .transform(&record(["Pago", "42", "01/12/2023", "80,5", "mensalidade", "fee", "   "]))
            .unwrap();
        assert_eq!(blank.payment_method, None);
    }

    #[test]
    fn test_short_row_without_payment_method_is_null() {
        let headers = std::sync::Arc::new(csv::StringRecord::from(HEADERS.to_vec()));
        let values = csv::StringRecord::from(vec!["1", "Jo", "10/05/2024", "150,00", "rent", "fee"]);
        let row = transformer().transform(&RawRecord::new(headers, values, 2)).unwrap();
        assert_eq!(row.payment_method, None);
    }

    #[test]
    fn test_text_fields_are_not_trimmed() {
        let row = transformer()
            .transform(&record([" Pago ", "Jo", "10/05/2024", "1", " rent", "fee ", "pix"]))
            .unwrap();
        assert_eq!(row.status, " Pago ");
        assert_eq!(row.description, " rent");
        assert_eq!(row.kind, "fee ");
    }

    #[test]
    fn test_missing_field() {
        let raw = RawRecord::from_pairs([("Situação", "1"), ("Irmão", "Jo")]);
        let err = transformer().transform(&raw).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::MissingField);
        assert_eq!(err.field, "Vencimento");
        assert_eq!(err.raw_value, None);
    }

    #[test]
    fn test_invalid_calendar_date() {
        let err = transformer()
            .transform(&record(["1", "Jo", "31/02/2024", "150,00", "rent", "fee", "cash"]))
            .unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidDate);
        assert_eq!(err.field, "Vencimento");
        assert_eq!(err.raw_value.as_deref(), Some("31/02/2024"));

        // month/day order is not guessed
        let err = transformer()
            .transform(&record(["1", "Jo", "2024-05-10", "150,00", "rent", "fee", "cash"]))
            .unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidDate);
    }

    #[test]
    fn test_short_year_is_invalid_date() {
        for bad in ["10/05/24", "10/05/202", "10/05/0"] {
            let err = transformer()
                .transform(&record(["1", "Jo", bad, "150,00", "rent", "fee", "cash"]))
                .unwrap_err();
            assert_eq!(err.kind, TransformErrorKind::InvalidDate, "input {:?}", bad);
            assert_eq!(err.raw_value.as_deref(), Some(bad));
        }

        // unpadded day and month are still fine
        let row = transformer()
            .transform(&record(["1", "Jo", "1/5/2024", "150,00", "rent", "fee", "cash"]))
            .unwrap();
        assert_eq!(row.due_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }

    #[test]
    fn test_invalid_amount() {
        for bad in ["", "abc", "12,34,56", "1-0", "R$ 10,00", ","] {
            let err = transformer()
                .transform(&record(["1", "Jo", "10/05/2024", bad, "rent", "fee", "cash"]))
                .unwrap_err();
            assert_eq!(err.kind, TransformErrorKind::InvalidAmount, "input {:?}", bad);
            assert_eq!(err.field, "Valor");
        }
    }

    #[test]
    fn test_amount_locale_formats() {
        let br = AmountFormat {
            decimal_separator: ',',
            thousands_separator: Some('.'),
        };
        assert_eq!(br.parse("1.234,56"), Some(Decimal::new(123456, 2)));
        assert_eq!(br.parse("-75,10"), Some(Decimal::new(-7510, 2)));
        assert_eq!(br.parse(" 10 "), Some(Decimal::new(10, 0)));
        assert_eq!(br.parse("0,00"), Some(Decimal::new(0, 2)));

        let us = AmountFormat {
            decimal_separator: '.',
            thousands_separator: Some(','),
        };
        assert_eq!(us.parse("1,234.56"), Some(Decimal::new(123456, 2)));
        assert_eq!(us.parse("1.234,56"), None);
    }

    #[test]
    fn test_amount_grouping_must_be_well_formed() {
        let br = AmountFormat {
            decimal_separator: ',',
            thousands_separator: Some('.'),
        };
        assert_eq!(br.parse("1.234.567,89"), Some(Decimal::new(123456789, 2)));
        assert_eq!(br.parse("-1.000"), Some(Decimal::new(-1000, 0)));
        for bad in ["150.00", "1.5", "12.34.5,6", ".5", "1234.567", "1.234.", "5,", "-,5"] {
            assert_eq!(br.parse(bad), None, "input {:?}", bad);
        }

        let plain = AmountFormat {
            decimal_separator: ',',
            thousands_separator: None,
        };
        assert_eq!(plain.parse("1234,5"), Some(Decimal::new(12345, 1)));
        assert_eq!(plain.parse("1.234,5"), None);
    }

    #[test]
    fn test_misread_amount_is_reported_not_stored() {
        let err = transformer()
            .transform(&record(["1", "Jo", "10/05/2024", "150.00", "rent", "fee", "cash"]))
            .unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidAmount);
        assert_eq!(err.raw_value.as_deref(), Some("150.00"));
    }

    #[test]
    fn test_transform_is_idempotent() {
        let t = transformer();
        let raw = record(["1", "Jo", "10/05/2024", "150,00", "rent", "fee", ""]);
        assert_eq!(t.transform(&raw).unwrap(), t.transform(&raw).unwrap());

        let bad = record(["1", "Jo", "99/99/2024", "150,00", "rent", "fee", ""]);
        assert_eq!(t.transform(&bad).unwrap_err(), t.transform(&bad).unwrap_err());
    }

    #[test]
    fn test_custom_columns_and_date_format() {
        let settings = PipelineSettings {
            date_format: "%Y-%m-%d".to_string(),
            columns: ColumnMapping {
                status: "status".into(),
                member_id: "member".into(),
                due_date: "due".into(),
                amount: "amount".into(),
                description: "description".into(),
                kind: "kind".into(),
                payment_method: "method".into(),
            },
            ..PipelineSettings::default()
        };
        let raw = RawRecord::from_pairs([
            ("status", "open"),
            ("member", "7"),
            ("due", "2024-01-31"),
            ("amount", "9,99"),
            ("description", "x"),
            ("kind", "y"),
            ("method", "card"),
        ]);
        let row = RecordTransformer::from_settings(&settings).transform(&raw).unwrap();
        assert_eq!(row.due_date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(row.amount, Decimal::new(999, 2));
    }
}
