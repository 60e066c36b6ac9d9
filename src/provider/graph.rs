//! Microsoft Graph calendar provider.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{CalendarProvider, EventFilter, ProviderError, RawEvent, RawEventInput};
use crate::limits::MAX_LIST_PAGES;
use crate::model::Ms;
use crate::observability::{PROVIDER_ERRORS_TOTAL, PROVIDER_REQUEST_DURATION_SECONDS};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
/// Times in UTC and bodies as plain text, so a created event and the same
/// event listed later carry identical descriptions.
const PREFER_HEADER: &str = r#"outlook.timezone="UTC", outlook.body-content-type="text""#;
const EVENT_SELECT: &str = "id,subject,start,end,location,attendees,organizer,body,bodyPreview,showAs";
const BUSY_SELECT: &str = "id,subject,start,end,showAs";

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    value: Vec<RawEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Talks to `/me/events` and `/me/calendar/calendarView` on behalf of the
/// signed-in user. Times are requested in UTC.
#[derive(Clone)]
pub struct GraphCalendarProvider {
    client: Client,
    base_url: Url,
}

impl GraphCalendarProvider {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ProviderError::InvalidResponse(format!("base URL cannot hold a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<Response, ProviderError> {
        let started = Instant::now();
        let result = request.send().await;
        metrics::histogram!(PROVIDER_REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            metrics::counter!(PROVIDER_ERRORS_TOTAL, "op" => op).increment(1);
            ProviderError::Unavailable(format!("Graph request failed: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        metrics::counter!(PROVIDER_ERRORS_TOTAL, "op" => op).increment(1);
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        warn!(op, %status, "Graph API error");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ProviderError::Unauthorized(format!("Graph API error ({status}): {error_text}")))
            }
            _ => Err(ProviderError::Unavailable(format!("Graph API error ({status}): {error_text}"))),
        }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse Graph response: {e}")))
    }

    /// GET `first`, then follow `@odata.nextLink` up to the page cap.
    async fn collect_pages(&self, op: &'static str, token: &str, first: Url) -> Result<Vec<RawEvent>, ProviderError> {
        let mut events = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages == MAX_LIST_PAGES {
                warn!(op, pages, "Graph listing truncated at page cap");
                break;
            }
            pages += 1;

            let request = self
                .client
                .get(url)
                .bearer_auth(token)
                .header("Prefer", PREFER_HEADER);
            let page: EventPage = Self::json(self.send(op, request).await?).await?;
            events.extend(page.value);

            next = match page.next_link {
                Some(link) => Some(
                    Url::parse(&link)
                        .map_err(|e| ProviderError::InvalidResponse(format!("bad nextLink {link}: {e}")))?,
                ),
                None => None,
            };
        }

        debug!(op, pages, events = events.len(), "Graph listing complete");
        Ok(events)
    }
}

fn utc_param(ms: Ms) -> Result<String, ProviderError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| ProviderError::InvalidResponse(format!("timestamp out of range: {ms}")))
}

#[async_trait]
impl CalendarProvider for GraphCalendarProvider {
    async fn list_events(&self, token: &str, filter: &EventFilter) -> Result<Vec<RawEvent>, ProviderError> {
        let mut url = self.url(&["me", "events"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("$select", EVENT_SELECT);
            query.append_pair("$top", &filter.top.to_string());
            if let Some(since) = filter.since {
                let since = utc_param(since)?;
                query.append_pair("$filter", &format!("start/dateTime ge '{}'", since.trim_end_matches('Z')));
            }
        }
        self.collect_pages("list_events", token, url).await
    }

    async fn create_event(&self, token: &str, input: &RawEventInput) -> Result<RawEvent, ProviderError> {
        let url = self.url(&["me", "events"])?;
        let request = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Prefer", PREFER_HEADER)
            .json(input);
        Self::json(self.send("create_event", request).await?).await
    }

    async fn update_event(&self, token: &str, id: &str, input: &RawEventInput) -> Result<RawEvent, ProviderError> {
        let url = self.url(&["me", "events", id])?;
        let request = self
            .client
            .patch(url)
            .bearer_auth(token)
            .header("Prefer", PREFER_HEADER)
            .json(input);
        Self::json(self.send("update_event", request).await?).await
    }

    async fn delete_event(&self, token: &str, id: &str) -> Result<(), ProviderError> {
        let url = self.url(&["me", "events", id])?;
        let request = self.client.delete(url).bearer_auth(token);
        self.send("delete_event", request).await?;
        Ok(())
    }

    async fn list_events_in_range(&self, token: &str, start: Ms, end: Ms) -> Result<Vec<RawEvent>, ProviderError> {
        let mut url = self.url(&["me", "calendar", "calendarView"])?;
        url.query_pairs_mut()
            .append_pair("startDateTime", &utc_param(start)?)
            .append_pair("endDateTime", &utc_param(end)?)
            .append_pair("$select", BUSY_SELECT);
        self.collect_pages("list_events_in_range", token, url).await
    }
}
