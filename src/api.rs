//! HTTP layer: the streaming scrape endpoint.
//!
//! `GET /api/scrape?keyword=K&total=N` runs a full scrape and streams it as
//! Server-Sent Events. The protocol is what the dashboard's `EventSource`
//! expects: a `start` event, one `data` event per collected listing, then
//! `complete` or `error`:
//!
//! ```text
//! data: {"status":"start","message":"Starting scrape for cafe"}
//! data: {"status":"data","data":{"NAME":"...","CONTACT NO":"...",...}}
//! data: {"status":"complete","message":"Scraping completed, 12 new results"}
//! ```
//!
//! The scrape itself is blocking (headless Chrome), so it runs on a
//! `spawn_blocking` task and feeds the SSE stream through a channel.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::error;

use crate::collector::ListingRecord;
use crate::proxy::ProxyRotator;
use crate::runner::{self, ScrapeSettings};
use crate::store::CsvRow;

pub struct AppState {
    pub rotator: ProxyRotator,
    pub settings: ScrapeSettings,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeQuery {
    pub keyword: Option<String>,
    pub total: Option<usize>,
}

fn start_event(keyword: &str) -> Value {
    json!({ "status": "start", "message": format!("Starting scrape for {keyword}") })
}

fn data_event(record: &ListingRecord) -> Value {
    json!({ "status": "data", "data": CsvRow::from(record) })
}

fn complete_event(count: usize) -> Value {
    json!({ "status": "complete", "message": format!("Scraping completed, {count} new results") })
}

fn error_event(message: &str) -> Value {
    json!({ "status": "error", "message": message })
}

/// Streaming scrape endpoint. Missing or blank `keyword` is a 400;
/// `total` defaults to 10.
pub async fn scrape_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScrapeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let keyword = query
        .keyword
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let total = query.total.unwrap_or(10);

    let (tx, rx) = tokio::sync::mpsc::channel::<Value>(64);

    tokio::task::spawn_blocking(move || {
        // Sends fail only when the client disconnected; the scrape keeps
        // going so the CSV still gets the results.
        let _ = tx.blocking_send(start_event(&keyword));

        let record_tx = tx.clone();
        let result = runner::scrape_keyword(
            &keyword,
            total,
            &state.settings,
            &state.rotator,
            |record| {
                let _ = record_tx.blocking_send(data_event(record));
            },
        );

        match result {
            Ok(records) => {
                let _ = tx.blocking_send(complete_event(records.len()));
            }
            Err(e) => {
                error!(keyword, error = %e, "scrape failed");
                let _ = tx.blocking_send(error_event(&e.to_string()));
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|value| {
        Ok(Event::default()
            .json_data(&value)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
