//! Report and ticket exports saved as downloaded files.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::info;

use crate::client::TmsClient;
use crate::error::{Result, TmsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportKind {
    Tickets,
    TimeLogs,
    MonthlyEffort,
    DevVsBau,
    DeveloperBreakdown,
}

impl ExportKind {
    pub fn path(self) -> &'static str {
        match self {
            ExportKind::Tickets => "/export/tickets",
            ExportKind::TimeLogs => "/export/time-logs",
            ExportKind::MonthlyEffort => "/export/reports/monthly-effort",
            ExportKind::DevVsBau => "/export/reports/dev-vs-bau",
            ExportKind::DeveloperBreakdown => "/export/reports/developer-breakdown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExportKind::Tickets => "Tickets",
            ExportKind::TimeLogs => "Time Logs",
            ExportKind::MonthlyEffort => "Monthly Effort Report",
            ExportKind::DevVsBau => "DEV vs BAU Report",
            ExportKind::DeveloperBreakdown => "Developer Breakdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExportFormat {
    #[default]
    Excel,
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Excel => "excel",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportFilters {
    pub month: Option<u32>,
    pub year: Option<i32>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ExportFilters {
    fn query(&self, format: ExportFormat) -> Vec<(&'static str, String)> {
        let mut query = vec![("format", format.as_str().to_string())];
        if let Some(month) = self.month {
            query.push(("month", month.to_string()));
        }
        if let Some(year) = self.year {
            query.push(("year", year.to_string()));
        }
        if let Some(start) = &self.start_date {
            query.push(("start_date", start.clone()));
        }
        if let Some(end) = &self.end_date {
            query.push(("end_date", end.clone()));
        }
        query
    }
}

/// `export_<unix-millis>.<xlsx|csv>`
pub fn file_name(format: ExportFormat, timestamp_millis: i64) -> String {
    format!("export_{timestamp_millis}.{}", format.extension())
}

/// Download an export into `dir` and return the written path.
pub async fn download(
    client: &TmsClient,
    kind: ExportKind,
    format: ExportFormat,
    filters: &ExportFilters,
    dir: &Path,
) -> Result<PathBuf> {
    if let Some(month) = filters.month {
        if !(1..=12).contains(&month) {
            return Err(TmsError::validation(vec![crate::error::FieldError::new(
                "month",
                "Month must be between 1 and 12",
            )]));
        }
    }

    let query = filters.query(format);
    let bytes = client.download(kind.path(), &query).await?;

    let path = dir.join(file_name(format, chrono::Utc::now().timestamp_millis()));
    std::fs::write(&path, &bytes)?;
    info!(kind = kind.label(), path = %path.display(), bytes = bytes.len(), "export saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TokenPair;
    use mockito::Matcher;
    use regex::Regex;

    #[test]
    fn test_file_name_matches_format() {
        assert_eq!(file_name(ExportFormat::Excel, 1_700_000_000_123), "export_1700000000123.xlsx");
        assert_eq!(file_name(ExportFormat::Csv, 42), "export_42.csv");
    }

    #[tokio::test]
    async fn test_download_writes_timestamped_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/export/reports/monthly-effort")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("format".into(), "csv".into()),
                Matcher::UrlEncoded("month".into(), "3".into()),
                Matcher::UrlEncoded("year".into(), "2026".into()),
            ]))
            .with_header("content-type", "text/csv")
            .with_body("name,hours\nann,12\n")
            .create_async()
            .await;

        let client = TmsClient::new(server.url());
        client.set_tokens(Some(TokenPair {
            access_token: "token".into(),
            refresh_token: None,
        }));
        let dir = tempfile::tempdir().unwrap();
        let filters = ExportFilters {
            month: Some(3),
            year: Some(2026),
            ..ExportFilters::default()
        };

        let path = download(&client, ExportKind::MonthlyEffort, ExportFormat::Csv, &filters, dir.path())
            .await
            .unwrap();

        mock.assert_async().await;
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(Regex::new(r"^export_\d+\.csv$").unwrap().is_match(name));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "name,hours\nann,12\n");
    }

    #[tokio::test]
    async fn test_invalid_month_is_rejected_before_request() {
        let client = TmsClient::new("http://127.0.0.1:1");
        let filters = ExportFilters {
            month: Some(13),
            ..ExportFilters::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = download(&client, ExportKind::MonthlyEffort, ExportFormat::Excel, &filters, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TmsError::Validation { .. }));
    }
}
