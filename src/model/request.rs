use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::openrtb::request::{App, Device, Format, User};

/// Inbound auction payload as posted by the publisher page or SDK.
///
/// Parsed once per HTTP request and immediately turned into a validated
/// [`crate::model::context::PreBidContext`]; nothing downstream reads this
/// shape directly.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AuctionRequest {
    /// Transaction id correlating request and response; generated if absent.
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub timeout_millis: Option<u64>,
    #[serde(default)]
    pub ad_units: Vec<AdUnit>,
    /// Non-zero: store winning markup in the external cache.
    #[serde(default)]
    pub cache_markup: Option<u8>,
    /// Non-zero: rank bids per ad unit and attach ad-server targeting.
    #[serde(default)]
    pub sort_bids: Option<u8>,
    #[serde(default)]
    pub app: Option<App>,
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub user: Option<User>,
}

/// One publisher ad slot with the bidders competing for it.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AdUnit {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub sizes: Vec<Format>,
    #[serde(default)]
    pub media_types: Vec<String>,
    #[serde(default)]
    pub instl: Option<u8>,
    #[serde(default)]
    pub bids: Vec<AdUnitBidEntry>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AdUnitBidEntry {
    pub bidder: String,
    /// Opaque bidder-specific parameter blob, validated by the owning adapter.
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub bid_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Banner,
    Video,
}

impl MediaType {
    pub fn parse(value: &str) -> Option<MediaType> {
        match value {
            "banner" => Some(MediaType::Banner),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }
}

/// One ad slot's bid request addressed to one bidder.
#[derive(Debug, Clone)]
pub struct AdUnitBid {
    pub bidder_code: String,
    pub ad_unit_code: String,
    /// Correlates this request with bids coming back for it.
    pub bid_id: String,
    pub sizes: Vec<Format>,
    pub media_types: Vec<MediaType>,
    pub instl: Option<u8>,
    pub params: Option<Value>,
}

/// A bidder name plus every ad unit bid addressed to it within one auction.
#[derive(Debug, Clone)]
pub struct Bidder {
    pub bidder_code: String,
    pub ad_unit_bids: Vec<AdUnitBid>,
}

impl Bidder {
    pub fn of(bidder_code: impl Into<String>, ad_unit_bids: Vec<AdUnitBid>) -> Self {
        Self {
            bidder_code: bidder_code.into(),
            ad_unit_bids,
        }
    }
}
