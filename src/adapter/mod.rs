use serde::de::DeserializeOwned;

use crate::error::PreBidError;
use crate::model::context::PreBidContext;
use crate::model::request::{AdUnitBid, Bidder, MediaType};
use crate::model::response::{Bid, UsersyncInfo};
use crate::openrtb::request::{App, Banner, BidRequest, Device, Site, Source, User, Video};
use crate::openrtb::response::BidResponse;

pub mod appnexus;
pub mod catalog;
pub mod pulsepoint;

/// One outbound HTTP exchange an adapter wants the dispatcher to perform.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub uri: String,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: BidRequest,
}

impl OutboundRequest {
    pub fn of(uri: impl Into<String>, body: BidRequest) -> Self {
        Self {
            uri: uri.into(),
            headers: base_headers(),
            body,
        }
    }
}

/// A completed outbound exchange handed back to the adapter for parsing.
#[derive(Debug, Clone)]
pub struct ExchangeCall {
    pub request: BidRequest,
    pub response: BidResponse,
}

/// The contract every bidder integration implements. All bidder-specific
/// knowledge lives behind it; orchestration never branches on bidder
/// identity beyond the catalog lookup.
pub trait Adapter: Send + Sync {
    /// Stable bidder identifier used for lookups, metrics and response
    /// labeling.
    fn code(&self) -> &'static str;

    /// Cookie family the usersync flow stores this bidder's id under.
    fn cookie_family(&self) -> &'static str;

    fn usersync_info(&self) -> &UsersyncInfo;

    /// Translates the generic auction context into bidder-specific wire
    /// requests. Zero requests means no eligible ad units, which is not an
    /// error; a params failure is scoped to this bidder alone.
    fn build_requests(
        &self,
        bidder: &Bidder,
        context: &PreBidContext,
    ) -> Result<Vec<OutboundRequest>, PreBidError>;

    /// Maps an upstream response back into generic bids, correlating each
    /// upstream bid with its originating ad unit bid via the echoed imp id.
    fn parse_response(
        &self,
        bidder: &Bidder,
        call: &ExchangeCall,
    ) -> Result<Vec<Bid>, PreBidError>;
}

pub fn base_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Content-Type", "application/json"),
        ("Accept", "application/json"),
    ]
}

/// Request-shaping rules shared by every adapter so app/site/device/user and
/// timeout propagation stay identical across integrations.
pub fn base_bid_request(
    context: &PreBidContext,
    cookie_family: &str,
    publisher_id: Option<String>,
) -> BidRequest {
    let publisher = publisher_id.map(|id| crate::openrtb::request::Publisher { id: Some(id) });
    BidRequest {
        id: context.tid.clone(),
        imp: Vec::new(),
        app: make_app(context, publisher.clone()),
        site: make_site(context, publisher),
        device: make_device(context),
        user: make_user(context, cookie_family),
        source: make_source(context),
        at: Some(1),
        tmax: Some(context.timeout.remaining().as_millis() as u64),
    }
}

fn make_app(context: &PreBidContext, publisher: Option<crate::openrtb::request::Publisher>) -> Option<App> {
    context.app.as_ref().map(|app| App {
        publisher,
        ..app.clone()
    })
}

fn make_site(context: &PreBidContext, publisher: Option<crate::openrtb::request::Publisher>) -> Option<Site> {
    context.site.as_ref().map(|site| Site {
        publisher,
        ..site.clone()
    })
}

fn make_device(context: &PreBidContext) -> Option<Device> {
    context.device.clone()
}

fn make_user(context: &PreBidContext, cookie_family: &str) -> Option<User> {
    let buyeruid = context.uids_cookie.uid_from(cookie_family).map(str::to_string);
    match (&context.user, buyeruid) {
        (None, None) => None,
        (user, buyeruid) => {
            let mut user = user.clone().unwrap_or_default();
            if user.buyeruid.is_none() {
                user.buyeruid = buyeruid;
            }
            Some(user)
        }
    }
}

fn make_source(context: &PreBidContext) -> Option<Source> {
    Some(Source {
        fd: Some(1),
        tid: Some(context.tid.clone()),
    })
}

/// Media types of one ad unit bid narrowed to what a bidder supports.
pub fn allowed_media_types(ad_unit_bid: &AdUnitBid, allowed: &[MediaType]) -> Vec<MediaType> {
    ad_unit_bid
        .media_types
        .iter()
        .copied()
        .filter(|media_type| allowed.contains(media_type))
        .collect()
}

/// Typed view over an ad unit bid's opaque params blob.
pub fn parse_params<T: DeserializeOwned>(
    ad_unit_bid: &AdUnitBid,
    bidder_code: &str,
) -> Result<T, PreBidError> {
    let params = ad_unit_bid
        .params
        .clone()
        .ok_or_else(|| PreBidError::validation(format!("{bidder_code} params section is missing")))?;
    serde_json::from_value(params)
        .map_err(|err| PreBidError::validation(err.to_string()))
}

pub fn banner_for(ad_unit_bid: &AdUnitBid) -> Banner {
    let first = ad_unit_bid.sizes.first();
    Banner {
        w: first.map(|size| size.w),
        h: first.map(|size| size.h),
        format: ad_unit_bid.sizes.clone(),
        topframe: Some(0),
    }
}

pub fn video_for(ad_unit_bid: &AdUnitBid) -> Video {
    let first = ad_unit_bid.sizes.first();
    Video {
        mimes: vec!["video/mp4".to_string()],
        w: first.map(|size| size.w),
        h: first.map(|size| size.h),
        ..Video::default()
    }
}

/// The originating ad unit bid for an upstream bid's echoed imp id.
pub fn lookup_bid<'a>(
    ad_unit_bids: &'a [AdUnitBid],
    ad_unit_code: &str,
) -> Result<&'a AdUnitBid, PreBidError> {
    ad_unit_bids
        .iter()
        .find(|ad_unit_bid| ad_unit_bid.ad_unit_code == ad_unit_code)
        .ok_or_else(|| PreBidError::UnmatchedBid(ad_unit_code.to_string()))
}

/// Flattens an upstream response into its bid objects.
pub fn response_bids(response: &BidResponse) -> impl Iterator<Item = &crate::openrtb::response::Bid> {
    response
        .seatbid
        .iter()
        .flat_map(|seatbid| seatbid.bid.iter())
}

/// Usersync descriptor pointing back through the broker's /setuid endpoint.
pub fn redirect_usersync(
    usersync_url: &str,
    external_url: &str,
    bidder_code: &str,
) -> UsersyncInfo {
    let redirect: String = url::form_urlencoded::byte_serialize(
        format!("{external_url}/setuid?bidder={bidder_code}&uid=").as_bytes(),
    )
    .collect();
    UsersyncInfo {
        url: format!("{usersync_url}{redirect}"),
        sync_type: "redirect".to_string(),
        support_cors: false,
    }
}
