//! Backend ingestion API.
//!
//! [`LocationApi`] is the seam between the engine and the HTTP backend. The
//! `http-client` feature provides [`HttpLocationApi`](crate::http::HttpLocationApi);
//! tests use [`MockApi`](crate::mock::MockApi).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use waypost_types::{DeviceInfo, LocationPreferences, LocationSample};

use crate::error::Result;

/// Endpoints consumed by the tracker.
///
/// All calls are authenticated by the implementation; the engine never sees
/// the token.
#[async_trait]
pub trait LocationApi: Send + Sync {
    /// `POST /session/start`. Returns the server-issued session id.
    async fn start_session(&self, device: &DeviceInfo) -> Result<String>;

    /// `POST /session/{id}/end`.
    async fn end_session(&self, session_id: &str) -> Result<()>;

    /// `POST /location/record`.
    async fn record_location(&self, sample: &LocationSample, session_id: &str) -> Result<()>;

    /// `GET /preferences`.
    async fn get_preferences(&self) -> Result<LocationPreferences>;

    /// `PUT /preferences`. Returns the preferences as stored by the backend.
    async fn update_preferences(
        &self,
        preferences: &LocationPreferences,
    ) -> Result<LocationPreferences>;

    /// `GET /history`.
    async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage>;

    /// `GET /current`. `None` when the backend has no sample yet.
    async fn current(&self) -> Result<Option<LocationSample>>;
}

/// Body of `POST /location/record`: the sample plus its session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordLocationRequest<'a> {
    #[serde(flatten)]
    pub sample: &'a LocationSample,
    pub session_id: &'a str,
}

/// Response of `POST /session/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartResponse {
    pub session_id: String,
}

/// Date range and pagination for `GET /history`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    /// 1-based page number.
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Builder Methods ====================

    #[must_use]
    pub fn since(mut self, from: OffsetDateTime) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn until(mut self, to: OffsetDateTime) -> Self {
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Query-string pairs, omitting unset fields.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(from) = self.from.and_then(|t| t.format(&Rfc3339).ok()) {
            pairs.push(("from", from));
        }
        if let Some(to) = self.to.and_then(|t| t.format(&Rfc3339).ok()) {
            pairs.push(("to", to));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            pairs.push(("pageSize", page_size.to_string()));
        }
        pairs
    }
}

/// One page of `GET /history`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryPage {
    pub items: Vec<LocationSample>,
    /// Total number of samples across all pages.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use waypost_types::{NetworkType, Position, SampleSource};

    #[test]
    fn test_record_request_flattens_sample() {
        let sample = LocationSample::from_position(
            &Position::now(56.95, 24.1, 8.0),
            "device_abc",
            NetworkType::Wifi,
            None,
            SampleSource::Watch,
        );
        let body = RecordLocationRequest {
            sample: &sample,
            session_id: "sess-1",
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["sessionId"], "sess-1");
        assert_eq!(json["latitude"], 56.95);
        assert_eq!(json["deviceId"], "device_abc");
        assert_eq!(json["networkType"], "wifi");
        assert!(json.get("batteryLevel").is_none());
    }

    #[test]
    fn test_history_query_pairs() {
        let query = HistoryQuery::new()
            .since(datetime!(2025-03-01 00:00 UTC))
            .page(2)
            .page_size(50);

        assert_eq!(
            query.to_query_pairs(),
            vec![
                ("from", "2025-03-01T00:00:00Z".to_string()),
                ("page", "2".to_string()),
                ("pageSize", "50".to_string()),
            ]
        );
        assert!(HistoryQuery::new().to_query_pairs().is_empty());
    }

    #[test]
    fn test_history_page_tolerates_missing_fields() {
        let page: HistoryPage = serde_json::from_str(r#"{"items": [], "total": 3}"#).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.page, 0);
    }
}
