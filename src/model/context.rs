use std::collections::HashMap;

use tokio::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::auction::timeout::GlobalTimeout;
use crate::cookie::uids::UidsCookie;
use crate::error::PreBidError;
use crate::model::request::{AdUnitBid, AuctionRequest, Bidder, MediaType};
use crate::openrtb::request::{App, Device, Site, User};

const DEFAULT_TIMEOUT_MS: u64 = 250;
const MAX_TIMEOUT_MS: u64 = 2000;

/// Request headers the context factory cares about.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
    pub secure: bool,
}

/// Validated, immutable view of one auction request. Built once per inbound
/// HTTP request and threaded read-only through the whole pipeline.
#[derive(Debug, Clone)]
pub struct PreBidContext {
    pub tid: String,
    pub account_id: String,
    pub timeout: GlobalTimeout,
    pub bidders: Vec<Bidder>,
    pub cache_markup: bool,
    pub sort_bids: bool,
    pub app: Option<App>,
    pub site: Option<Site>,
    pub device: Option<Device>,
    pub user: Option<User>,
    pub secure: Option<u8>,
    pub uids_cookie: UidsCookie,
    /// Set when the identity store has no usable synced id and the request is
    /// not app-scoped; drives the top-level "no_cookie" status.
    pub no_live_uids: bool,
}

impl PreBidContext {
    pub fn from_request(
        request: AuctionRequest,
        headers: &RequestHeaders,
        uids_cookie: UidsCookie,
    ) -> Result<PreBidContext, PreBidError> {
        let account_id = request
            .account_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PreBidError::validation("account_id is required"))?;

        if request.ad_units.is_empty() {
            return Err(PreBidError::validation("ad_units are required"));
        }

        let tid = request
            .tid
            .clone()
            .filter(|tid| !tid.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let timeout = GlobalTimeout::create(Duration::from_millis(clamp_timeout(
            request.timeout_millis,
        )));

        let bidders = extract_bidders(&request)?;

        let is_app = request.app.is_some();
        let no_live_uids = !is_app && !uids_cookie.has_live_uids();

        let mut device = request.device.unwrap_or_default();
        if device.ua.is_none() {
            device.ua.clone_from(&headers.user_agent);
        }
        if device.ip.is_none() {
            device.ip.clone_from(&headers.remote_addr);
        }

        Ok(PreBidContext {
            tid,
            account_id,
            timeout,
            bidders,
            cache_markup: request.cache_markup.unwrap_or(0) != 0,
            sort_bids: request.sort_bids.unwrap_or(0) != 0,
            site: if is_app {
                None
            } else {
                site_from_referer(headers.referer.as_deref())
            },
            app: request.app,
            device: Some(device),
            user: request.user,
            secure: headers.secure.then_some(1),
            uids_cookie,
            no_live_uids,
        })
    }

    pub fn ad_unit_bid(&self, bidder_code: &str, ad_unit_code: &str) -> Option<&AdUnitBid> {
        self.bidders
            .iter()
            .find(|bidder| bidder.bidder_code == bidder_code)
            .and_then(|bidder| {
                bidder
                    .ad_unit_bids
                    .iter()
                    .find(|bid| bid.ad_unit_code == ad_unit_code)
            })
    }
}

fn clamp_timeout(timeout_millis: Option<u64>) -> u64 {
    match timeout_millis {
        Some(millis) if millis > 0 && millis <= MAX_TIMEOUT_MS => millis,
        _ => DEFAULT_TIMEOUT_MS,
    }
}

/// Groups ad units by bidder name, preserving first-seen bidder order so
/// status lists are deterministic.
fn extract_bidders(request: &AuctionRequest) -> Result<Vec<Bidder>, PreBidError> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<AdUnitBid>> = HashMap::new();

    for ad_unit in &request.ad_units {
        if ad_unit.code.is_empty() {
            return Err(PreBidError::validation("ad unit code is required"));
        }
        if ad_unit.bids.is_empty() {
            return Err(PreBidError::validation(format!(
                "ad unit '{}' has no bids",
                ad_unit.code
            )));
        }
        let media_types = parse_media_types(&ad_unit.media_types);
        for entry in &ad_unit.bids {
            let ad_unit_bid = AdUnitBid {
                bidder_code: entry.bidder.clone(),
                ad_unit_code: ad_unit.code.clone(),
                bid_id: entry
                    .bid_id
                    .clone()
                    .unwrap_or_else(|| rand::random::<u64>().to_string()),
                sizes: ad_unit.sizes.clone(),
                media_types: media_types.clone(),
                instl: ad_unit.instl,
                params: entry.params.clone(),
            };
            if !grouped.contains_key(&entry.bidder) {
                order.push(entry.bidder.clone());
            }
            grouped.entry(entry.bidder.clone()).or_default().push(ad_unit_bid);
        }
    }

    Ok(order
        .into_iter()
        .map(|code| {
            let ad_unit_bids = grouped.remove(&code).unwrap_or_default();
            Bidder::of(code, ad_unit_bids)
        })
        .collect())
}

fn parse_media_types(names: &[String]) -> Vec<MediaType> {
    let mut media_types: Vec<MediaType> = names
        .iter()
        .filter_map(|name| MediaType::parse(name))
        .collect();
    media_types.dedup();
    if media_types.is_empty() {
        media_types.push(MediaType::Banner);
    }
    media_types
}

fn site_from_referer(referer: Option<&str>) -> Option<Site> {
    let referer = referer?;
    let url = Url::parse(referer).ok()?;
    Some(Site {
        domain: url.host_str().map(str::to_string),
        page: Some(referer.to_string()),
        publisher: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::request::{AdUnit, AdUnitBidEntry};
    use crate::openrtb::request::Format;

    fn request_with_units(ad_units: Vec<AdUnit>) -> AuctionRequest {
        AuctionRequest {
            account_id: Some("acct-1".to_string()),
            ad_units,
            ..Default::default()
        }
    }

    fn ad_unit(code: &str, bidders: &[&str]) -> AdUnit {
        AdUnit {
            code: code.to_string(),
            sizes: vec![Format { w: 300, h: 250 }],
            bids: bidders
                .iter()
                .map(|bidder| AdUnitBidEntry {
                    bidder: bidder.to_string(),
                    params: None,
                    bid_id: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn groups_ad_units_by_bidder_preserving_order() {
        let request = request_with_units(vec![
            ad_unit("slot-1", &["rubicon", "appnexus"]),
            ad_unit("slot-2", &["appnexus"]),
        ]);
        let context =
            PreBidContext::from_request(request, &RequestHeaders::default(), UidsCookie::default())
                .unwrap();

        assert_eq!(context.bidders.len(), 2);
        assert_eq!(context.bidders[0].bidder_code, "rubicon");
        assert_eq!(context.bidders[0].ad_unit_bids.len(), 1);
        assert_eq!(context.bidders[1].bidder_code, "appnexus");
        assert_eq!(context.bidders[1].ad_unit_bids.len(), 2);
    }

    #[test]
    fn generates_tid_and_bid_ids_when_absent() {
        let request = request_with_units(vec![ad_unit("slot-1", &["rubicon"])]);
        let context =
            PreBidContext::from_request(request, &RequestHeaders::default(), UidsCookie::default())
                .unwrap();
        assert!(!context.tid.is_empty());
        assert!(!context.bidders[0].ad_unit_bids[0].bid_id.is_empty());
    }

    #[test]
    fn rejects_missing_account_id() {
        let mut request = request_with_units(vec![ad_unit("slot-1", &["rubicon"])]);
        request.account_id = None;
        let result =
            PreBidContext::from_request(request, &RequestHeaders::default(), UidsCookie::default());
        assert_eq!(
            result.unwrap_err(),
            PreBidError::Validation("account_id is required".to_string())
        );
    }

    #[test]
    fn rejects_ad_unit_without_bids() {
        let mut unit = ad_unit("slot-1", &[]);
        unit.bids.clear();
        let result = PreBidContext::from_request(
            request_with_units(vec![unit]),
            &RequestHeaders::default(),
            UidsCookie::default(),
        );
        assert!(matches!(result, Err(PreBidError::Validation(_))));
    }

    #[test]
    fn out_of_range_timeouts_fall_back_to_default() {
        for millis in [None, Some(0), Some(5000)] {
            let mut request = request_with_units(vec![ad_unit("slot-1", &["rubicon"])]);
            request.timeout_millis = millis;
            let context = PreBidContext::from_request(
                request,
                &RequestHeaders::default(),
                UidsCookie::default(),
            )
            .unwrap();
            let remaining = context.timeout.remaining();
            assert!(remaining <= Duration::from_millis(DEFAULT_TIMEOUT_MS));
            assert!(remaining > Duration::from_millis(DEFAULT_TIMEOUT_MS / 2));
        }
    }

    #[test]
    fn referer_header_becomes_site_domain() {
        let headers = RequestHeaders {
            referer: Some("https://example.com/page?x=1".to_string()),
            ..Default::default()
        };
        let request = request_with_units(vec![ad_unit("slot-1", &["rubicon"])]);
        let context =
            PreBidContext::from_request(request, &headers, UidsCookie::default()).unwrap();
        let site = context.site.unwrap();
        assert_eq!(site.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn media_types_default_to_banner() {
        let request = request_with_units(vec![ad_unit("slot-1", &["rubicon"])]);
        let context =
            PreBidContext::from_request(request, &RequestHeaders::default(), UidsCookie::default())
                .unwrap();
        assert_eq!(
            context.bidders[0].ad_unit_bids[0].media_types,
            vec![MediaType::Banner]
        );
    }

    #[test]
    fn no_live_uids_is_skipped_for_app_requests() {
        let mut request = request_with_units(vec![ad_unit("slot-1", &["rubicon"])]);
        request.app = Some(App::default());
        let context =
            PreBidContext::from_request(request, &RequestHeaders::default(), UidsCookie::default())
                .unwrap();
        assert!(!context.no_live_uids);
        assert!(context.site.is_none());
    }
}
