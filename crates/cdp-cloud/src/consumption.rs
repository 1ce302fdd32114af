//! CDP Consumption client (`/api/v1/consumption`).
//!
//! Unlike the other services this API pages with
//! `nextPageToken`/`pageToken`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::client::{CdpClient, Squelch};
use crate::error::CdpResult;
use crate::pagination::{Paginator, NEXT_PAGE_TOKEN, PAGE_TOKEN};

const BASE: &str = "/api/v1/consumption";

#[derive(Clone)]
pub struct ConsumptionClient {
    client: CdpClient,
}

impl ConsumptionClient {
    pub fn new(client: CdpClient) -> Self {
        Self { client }
    }

    fn paginator(&self) -> Paginator {
        self.client
            .paginator()
            .with_token_fields(NEXT_PAGE_TOKEN, PAGE_TOKEN)
    }

    /// Compute usage records between two timestamps, passed through as
    /// given (ISO 8601).
    pub async fn list_compute_usage_records(
        &self,
        from_timestamp: &str,
        to_timestamp: &str,
    ) -> CdpResult<Vec<Value>> {
        let body = json!({
            "fromTimestamp": from_timestamp,
            "toTimestamp": to_timestamp,
        });
        let resp = self
            .client
            .post_paginated(
                &format!("{}/listComputeUsageRecords", BASE),
                &body,
                &self.paginator(),
                &Squelch::none(),
            )
            .await?;
        Ok(resp
            .and_then(|r| r.get("records").and_then(Value::as_array).cloned())
            .unwrap_or_default())
    }

    pub async fn list_compute_usage_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CdpResult<Vec<Value>> {
        self.list_compute_usage_records(&iso_timestamp(from), &iso_timestamp(to))
            .await
    }
}

/// `2024-01-01T00:00:00Z`
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::mock_client;
    use chrono::TimeZone;

    #[test]
    fn timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(iso_timestamp(at), "2024-03-05T07:08:09Z");
    }

    #[tokio::test]
    async fn usage_records_follow_next_page_token() {
        let (client, rest) = mock_client(vec![
            Ok(Some(json!({"records": [{"id": 1}], "nextPageToken": "p2"}))),
            Ok(Some(json!({"records": [{"id": 2}], "nextPageToken": ""}))),
        ]);
        let usage = ConsumptionClient::new(client);
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let records = usage.list_compute_usage_between(from, to).await.unwrap();
        assert_eq!(records, vec![json!({"id": 1}), json!({"id": 2})]);

        let calls = rest.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].path, "/api/v1/consumption/listComputeUsageRecords");
        assert_eq!(
            calls[0].payload,
            Some(json!({
                "fromTimestamp": "2024-01-01T00:00:00Z",
                "toTimestamp": "2024-02-01T00:00:00Z",
                "pageSize": 100
            }))
        );
        let second = calls[1].payload.clone().unwrap();
        assert_eq!(second["pageToken"], "p2");
        assert!(second.get("startingToken").is_none());
    }
}
