//! Metric emission for the auction pipeline. Every call is fire-and-forget
//! through the `metrics` facade and never blocks the response path.

use metrics::{counter, histogram};

use crate::model::response::{Bid, BidderStatus};

pub fn inc_requests(account_id: &str, is_app: bool) {
    counter!("prebid.requests").increment(1);
    if is_app {
        counter!("prebid.app_requests").increment(1);
    }
    counter!("prebid.account.requests", "account" => account_id.to_string()).increment(1);
}

pub fn inc_error_requests() {
    counter!("prebid.error_requests").increment(1);
}

pub fn inc_no_cookie_requests() {
    counter!("prebid.no_cookie_requests").increment(1);
}

pub fn observe_request_time(millis: u64) {
    histogram!("prebid.request_time").record(millis as f64);
}

/// Per-adapter accounting from a settled bidder status plus its bids.
pub fn observe_bidder_status(account_id: &str, status: &BidderStatus, bids: &[Bid]) {
    let adapter = status.bidder.clone();
    counter!("prebid.adapter.requests", "adapter" => adapter.clone()).increment(1);

    if let Some(millis) = status.response_time_ms {
        histogram!("prebid.adapter.request_time", "adapter" => adapter.clone())
            .record(millis as f64);
    }
    if status.timed_out == Some(true) {
        counter!("prebid.adapter.timeout_requests", "adapter" => adapter.clone()).increment(1);
    }
    if status.error.is_some() {
        counter!("prebid.adapter.error_requests", "adapter" => adapter.clone()).increment(1);
    }
    if status.no_cookie == Some(true) {
        counter!("prebid.adapter.no_cookie_requests", "adapter" => adapter.clone()).increment(1);
    }
    if status.no_bid == Some(true) {
        counter!("prebid.adapter.no_bid_requests", "adapter" => adapter.clone()).increment(1);
    }

    if !bids.is_empty() {
        counter!(
            "prebid.account.bids_received",
            "account" => account_id.to_string()
        )
        .increment(bids.len() as u64);
    }
    for bid in bids {
        // Price histograms are kept in minor currency units.
        let minor_units = (bid.price * 1000.0).round();
        histogram!("prebid.adapter.prices", "adapter" => adapter.clone()).record(minor_units);
        histogram!("prebid.account.prices", "account" => account_id.to_string())
            .record(minor_units);
    }
}
