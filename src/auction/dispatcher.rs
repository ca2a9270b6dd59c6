use std::sync::Arc;

use futures::future::join_all;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::adapter::{Adapter, ExchangeCall, OutboundRequest};
use crate::auction::timeout::GlobalTimeout;
use crate::auction::transport::HttpTransport;
use crate::error::PreBidError;
use crate::model::context::PreBidContext;
use crate::model::request::Bidder;
use crate::model::response::{BidderResult, BidderStatus};
use crate::openrtb::response::BidResponse;

/// Scatter/gather engine: issues every bidder's upstream calls concurrently
/// under one shared deadline and produces exactly one terminal
/// [`BidderResult`] per bidder.
///
/// Failures never cross bidder boundaries. The returned vector is complete:
/// aggregation starts only after every bidder has settled.
pub async fn dispatch(
    pairs: Vec<(Bidder, Arc<dyn Adapter>)>,
    context: Arc<PreBidContext>,
    transport: Arc<dyn HttpTransport>,
) -> Vec<BidderResult> {
    let tasks: Vec<_> = pairs
        .into_iter()
        .map(|(bidder, adapter)| {
            let context = Arc::clone(&context);
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { call_bidder(bidder, adapter, context, transport).await })
        })
        .collect();

    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| joined.ok())
        .collect()
}

async fn call_bidder(
    bidder: Bidder,
    adapter: Arc<dyn Adapter>,
    context: Arc<PreBidContext>,
    transport: Arc<dyn HttpTransport>,
) -> BidderResult {
    let start = Instant::now();
    let mut status = BidderStatus::for_bidder(adapter.code());

    if context.app.is_none() && context.uids_cookie.uid_from(adapter.cookie_family()).is_none() {
        status.no_cookie = Some(true);
        status.usersync = Some(adapter.usersync_info().clone());
    }

    let requests = match adapter.build_requests(&bidder, &context) {
        Ok(requests) => requests,
        Err(err) => {
            status.error = Some(err.to_string());
            status.response_time_ms = Some(start.elapsed().as_millis() as u64);
            return BidderResult {
                bidder_status: status,
                bids: Vec::new(),
            };
        }
    };

    // No eligible ad units for this bidder; skip the network entirely.
    if requests.is_empty() {
        status.num_bids = Some(0);
        status.no_bid = Some(true);
        status.response_time_ms = Some(0);
        return BidderResult {
            bidder_status: status,
            bids: Vec::new(),
        };
    }

    if context.timeout.has_expired() {
        status.timed_out = Some(true);
        status.response_time_ms = Some(start.elapsed().as_millis() as u64);
        return BidderResult {
            bidder_status: status,
            bids: Vec::new(),
        };
    }

    let outcomes = join_all(
        requests
            .iter()
            .map(|request| exchange(request, &context.timeout, transport.as_ref())),
    )
    .await;

    let elapsed = start.elapsed().as_millis() as u64;
    let mut bids = Vec::new();
    let mut timed_out = false;
    let mut error: Option<String> = None;

    for outcome in outcomes {
        match outcome {
            Ok(call) => match adapter.parse_response(&bidder, &call) {
                Ok(parsed) => bids.extend(parsed),
                Err(err) => {
                    error.get_or_insert_with(|| err.to_string());
                }
            },
            Err(PreBidError::Timeout) => timed_out = true,
            Err(err) => {
                error.get_or_insert_with(|| err.to_string());
            }
        }
    }

    for bid in &mut bids {
        bid.response_time_ms = Some(elapsed);
    }

    status.response_time_ms = Some(elapsed);
    status.num_bids = Some(bids.len());
    if timed_out {
        status.timed_out = Some(true);
    }
    if let Some(message) = error {
        debug!(bidder = %bidder.bidder_code, "bidder call failed: {message}");
        status.error = Some(message);
    } else if bids.is_empty() && !timed_out {
        status.no_bid = Some(true);
    }

    BidderResult {
        bidder_status: status,
        bids,
    }
}

/// Performs one outbound call against the remaining global budget. An
/// already-exhausted budget or an elapsed deadline both surface as
/// [`PreBidError::Timeout`]; the in-flight response, if any, is discarded.
async fn exchange(
    request: &OutboundRequest,
    deadline: &GlobalTimeout,
    transport: &dyn HttpTransport,
) -> Result<ExchangeCall, PreBidError> {
    let remaining = deadline.remaining();
    if remaining.is_zero() {
        return Err(PreBidError::Timeout);
    }
    let bytes = match timeout(remaining, transport.call(request)).await {
        Err(_) => return Err(PreBidError::Timeout),
        Ok(Err(err)) => return Err(err),
        Ok(Ok(bytes)) => bytes,
    };

    // Bidders answer no-bid with an empty body.
    let response = if bytes.is_empty() {
        BidResponse::default()
    } else {
        let mut bytes = bytes;
        simd_json::serde::from_slice::<BidResponse>(&mut bytes)
            .map_err(|err| PreBidError::Transport(err.to_string()))?
    };

    Ok(ExchangeCall {
        request: request.body.clone(),
        response,
    })
}
