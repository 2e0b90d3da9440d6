//! History command implementation.

use anyhow::{Context, Result, bail};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use waypost_core::HistoryQuery;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{as_json, format_sample_line};
use crate::util::{build_tracker, write_output};

/// Parse a datetime string in RFC3339 or YYYY-MM-DD format.
fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    // Try RFC3339 first (e.g., "2026-01-15T10:30:00Z")
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }

    // Try YYYY-MM-DD format (treat as start of day in UTC)
    if let Ok(date) = time::Date::parse(s, format_description!("[year]-[month]-[day]")) {
        return Ok(date.midnight().assume_utc());
    }

    bail!(
        "Invalid date format '{}'. Use RFC3339 (e.g., 2026-01-15T10:30:00Z) or YYYY-MM-DD",
        s
    )
}

/// Arguments for the history command.
pub struct HistoryArgs {
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub format: OutputFormat,
}

fn build_query(args: &HistoryArgs) -> Result<HistoryQuery> {
    let mut query = HistoryQuery::new();
    if let Some(from) = &args.from {
        query = query.since(parse_datetime(from)?);
    }
    if let Some(to) = &args.to {
        query = query.until(parse_datetime(to)?);
    }
    if let Some(page) = args.page {
        if page == 0 {
            bail!("Page numbers start at 1");
        }
        query = query.page(page);
    }
    if let Some(page_size) = args.page_size {
        query = query.page_size(page_size);
    }
    Ok(query)
}

pub async fn cmd_history(config: &Config, args: HistoryArgs) -> Result<()> {
    // Parse date filters upfront to fail fast
    let query = build_query(&args)?;
    let tracker = build_tracker(config, None)?;
    let page = tracker
        .history(&query)
        .await
        .context("Failed to fetch history")?;

    let content = match args.format {
        OutputFormat::Json => as_json(&page)?,
        OutputFormat::Text => {
            if page.items.is_empty() {
                "No samples in range.\n".to_string()
            } else {
                let mut out = String::new();
                for sample in &page.items {
                    out.push_str(&format_sample_line(sample));
                    out.push('\n');
                }
                out.push_str(&format!(
                    "Page {} ({} per page), {} sample(s) total\n",
                    page.page, page.page_size, page.total
                ));
                out
            }
        }
    };
    write_output(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_datetime_rfc3339() {
        let dt = parse_datetime("2026-01-15T10:30:00Z").unwrap();
        assert_eq!(dt, datetime!(2026-01-15 10:30:00 UTC));
    }

    #[test]
    fn test_parse_datetime_date_only() {
        let dt = parse_datetime("2026-01-15").unwrap();
        assert_eq!(dt, datetime!(2026-01-15 00:00:00 UTC));
    }

    #[test]
    fn test_parse_datetime_invalid() {
        assert!(parse_datetime("15/01/2026").is_err());
        assert!(parse_datetime("").is_err());
    }

    #[test]
    fn test_build_query_rejects_page_zero() {
        let args = HistoryArgs {
            from: None,
            to: None,
            page: Some(0),
            page_size: None,
            format: OutputFormat::Text,
        };
        assert!(build_query(&args).is_err());
    }

    #[test]
    fn test_build_query_pairs() {
        let args = HistoryArgs {
            from: Some("2026-01-15".into()),
            to: None,
            page: Some(2),
            page_size: Some(50),
            format: OutputFormat::Json,
        };
        let pairs = build_query(&args).unwrap().to_query_pairs();
        assert!(pairs.iter().any(|(k, v)| *k == "page" && v == "2"));
        assert!(pairs.iter().any(|(k, v)| *k == "pageSize" && v == "50"));
    }
}
