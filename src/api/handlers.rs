use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::metrics;
use crate::model::context::RequestHeaders;
use crate::model::request::AuctionRequest;
use crate::model::response::PreBidResponse;
use crate::AppState;

/// Handles one auction request.
///
/// The body is taken as raw bytes so that even a malformed payload still
/// gets a well-formed response with an error status instead of a framework
/// rejection.
pub async fn handle_auction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_headers = request_headers_from(&headers);
    let cookies = cookies_from(&headers);

    let mut body = body.to_vec();
    let request = match simd_json::serde::from_slice::<AuctionRequest>(&mut body) {
        Ok(request) => request,
        Err(err) => {
            metrics::inc_error_requests();
            let response =
                PreBidResponse::with_status("", format!("Error parsing request: {err}"));
            return (StatusCode::OK, Json(response)).into_response();
        }
    };

    let (response, set_cookie) = state
        .orchestrator
        .process(request, request_headers, cookies)
        .await;

    (StatusCode::OK, [(header::SET_COOKIE, set_cookie)], Json(response)).into_response()
}

fn request_headers_from(headers: &HeaderMap) -> RequestHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    RequestHeaders {
        referer: get("referer"),
        user_agent: get("user-agent"),
        remote_addr: get("x-forwarded-for")
            .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string())),
        secure: get("x-forwarded-proto").as_deref() == Some("https"),
    }
}

fn cookies_from(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
