use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::request::MediaType;

/// A single bid as it appears in the final broker response.
///
/// Created by an adapter parsing an upstream response; the targeting map and
/// cache handle are filled in by the later aggregation/cache stages and the
/// bid is never touched again once the response is assembled.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Bid {
    pub bid_id: String,
    /// Ad unit code this bid answers.
    pub code: String,
    pub bidder: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nurl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creative_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_server_targeting: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_url: Option<String>,
}

/// Usersync descriptor handed to the page when a bidder has no synced id.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UsersyncInfo {
    pub url: String,
    /// "redirect" or "iframe".
    #[serde(rename = "type")]
    pub sync_type: String,
    pub support_cors: bool,
}

/// Per-bidder outcome reported back to the publisher.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BidderStatus {
    pub bidder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_bids: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_cookie: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_bid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usersync: Option<UsersyncInfo>,
}

impl BidderStatus {
    pub fn for_bidder(bidder: impl Into<String>) -> Self {
        BidderStatus {
            bidder: bidder.into(),
            ..Default::default()
        }
    }
}

/// The dispatcher's terminal outcome for one bidder: exactly one status plus
/// zero or more bids.
#[derive(Debug, Clone, Default)]
pub struct BidderResult {
    pub bidder_status: BidderStatus,
    pub bids: Vec<Bid>,
}

/// Unified auction response.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PreBidResponse {
    pub tid: String,
    pub status: String,
    pub bidder_status: Vec<BidderStatus>,
    pub bids: Vec<Bid>,
}

impl PreBidResponse {
    /// Well-formed response carrying only a status, used for every fatal
    /// pipeline error so the client never sees a bare transport failure.
    pub fn with_status(tid: impl Into<String>, status: impl Into<String>) -> Self {
        PreBidResponse {
            tid: tid.into(),
            status: status.into(),
            bidder_status: Vec::new(),
            bids: Vec::new(),
        }
    }
}
