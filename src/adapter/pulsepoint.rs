use serde::Deserialize;

use crate::adapter::{
    allowed_media_types, banner_for, base_bid_request, lookup_bid, parse_params, redirect_usersync,
    response_bids, video_for, Adapter, ExchangeCall, OutboundRequest,
};
use crate::error::PreBidError;
use crate::model::context::PreBidContext;
use crate::model::request::{AdUnitBid, Bidder, MediaType};
use crate::model::response::{Bid, UsersyncInfo};
use crate::openrtb::request::Imp;

const ALLOWED_MEDIA_TYPES: &[MediaType] = &[MediaType::Banner, MediaType::Video];

/// Raw params blob shape: {"cp": publisher id, "ct": tag id, "cf": "WxH"}.
#[derive(Deserialize, Debug, Default)]
struct PulsepointParams {
    #[serde(default)]
    cp: Option<u64>,
    #[serde(default)]
    ct: Option<u64>,
    #[serde(default)]
    cf: Option<String>,
}

/// Validated per-ad-unit params.
#[derive(Debug, Clone)]
struct Params {
    publisher_id: String,
    tag_id: String,
    ad_size_width: u32,
    ad_size_height: u32,
}

pub struct PulsepointAdapter {
    endpoint_url: String,
    usersync: UsersyncInfo,
}

impl PulsepointAdapter {
    pub fn new(endpoint_url: &str, usersync_url: &str, external_url: &str) -> Self {
        Self {
            endpoint_url: endpoint_url.to_string(),
            usersync: redirect_usersync(usersync_url, external_url, "pulsepoint"),
        }
    }

    fn parse_and_validate_params(ad_unit_bid: &AdUnitBid) -> Result<Params, PreBidError> {
        let raw: PulsepointParams = parse_params(ad_unit_bid, "pulsepoint")?;

        let publisher_id = match raw.cp {
            Some(id) if id != 0 => id,
            _ => return Err(PreBidError::validation("Missing PublisherId param cp")),
        };
        let tag_id = match raw.ct {
            Some(id) if id != 0 => id,
            _ => return Err(PreBidError::validation("Missing TagId param ct")),
        };
        let ad_size = raw
            .cf
            .filter(|size| !size.is_empty())
            .ok_or_else(|| PreBidError::validation("Missing AdSize param cf"))?;

        let lowered = ad_size.to_lowercase();
        let sizes: Vec<&str> = lowered.split('x').collect();
        if sizes.len() != 2 {
            return Err(PreBidError::validation(format!(
                "Invalid AdSize param {ad_size}"
            )));
        }
        let width: u32 = sizes[0]
            .parse()
            .map_err(|_| PreBidError::validation(format!("Invalid Width param {}", sizes[0])))?;
        let height: u32 = sizes[1]
            .parse()
            .map_err(|_| PreBidError::validation(format!("Invalid Height param {}", sizes[1])))?;

        Ok(Params {
            publisher_id: publisher_id.to_string(),
            tag_id: tag_id.to_string(),
            ad_size_width: width,
            ad_size_height: height,
        })
    }

    fn imps_for(
        ad_unit_bid: &AdUnitBid,
        params: &Params,
        context: &PreBidContext,
    ) -> Vec<Imp> {
        allowed_media_types(ad_unit_bid, ALLOWED_MEDIA_TYPES)
            .into_iter()
            .map(|media_type| {
                let mut imp = Imp {
                    id: ad_unit_bid.ad_unit_code.clone(),
                    tagid: Some(params.tag_id.clone()),
                    instl: ad_unit_bid.instl,
                    secure: context.secure,
                    ..Imp::default()
                };
                match media_type {
                    MediaType::Banner => {
                        let mut banner = banner_for(ad_unit_bid);
                        banner.w = Some(params.ad_size_width);
                        banner.h = Some(params.ad_size_height);
                        imp.banner = Some(banner);
                    }
                    MediaType::Video => imp.video = Some(video_for(ad_unit_bid)),
                }
                imp
            })
            .collect()
    }
}

impl Adapter for PulsepointAdapter {
    fn code(&self) -> &'static str {
        "pulsepoint"
    }

    fn cookie_family(&self) -> &'static str {
        "pulsepoint"
    }

    fn usersync_info(&self) -> &UsersyncInfo {
        &self.usersync
    }

    fn build_requests(
        &self,
        bidder: &Bidder,
        context: &PreBidContext,
    ) -> Result<Vec<OutboundRequest>, PreBidError> {
        let with_params: Vec<(&AdUnitBid, Params)> = bidder
            .ad_unit_bids
            .iter()
            .map(|ad_unit_bid| {
                Self::parse_and_validate_params(ad_unit_bid).map(|params| (ad_unit_bid, params))
            })
            .collect::<Result<_, _>>()?;

        let imps: Vec<Imp> = with_params
            .iter()
            .flat_map(|(ad_unit_bid, params)| Self::imps_for(ad_unit_bid, params, context))
            .collect();
        if imps.is_empty() {
            return Ok(Vec::new());
        }

        // Last params entry wins, matching how the publisher id is shared
        // across all of a page's ad units.
        let publisher_id = with_params
            .last()
            .map(|(_, params)| params.publisher_id.clone());

        let mut body = base_bid_request(context, self.cookie_family(), publisher_id);
        body.imp = imps;

        Ok(vec![OutboundRequest::of(&self.endpoint_url, body)])
    }

    fn parse_response(
        &self,
        bidder: &Bidder,
        call: &ExchangeCall,
    ) -> Result<Vec<Bid>, PreBidError> {
        response_bids(&call.response)
            .map(|upstream| {
                let ad_unit_bid = lookup_bid(&bidder.ad_unit_bids, &upstream.impid)?;
                Ok(Bid {
                    bid_id: ad_unit_bid.bid_id.clone(),
                    code: upstream.impid.clone(),
                    bidder: ad_unit_bid.bidder_code.clone(),
                    price: upstream.price,
                    adm: upstream.adm.clone(),
                    nurl: upstream.nurl.clone(),
                    creative_id: upstream.crid.clone(),
                    width: upstream.w,
                    height: upstream.h,
                    media_type: Some(media_type_of(upstream, ad_unit_bid)),
                    ..Bid::default()
                })
            })
            .collect()
    }
}

fn media_type_of(upstream: &crate::openrtb::response::Bid, ad_unit_bid: &AdUnitBid) -> MediaType {
    // VAST markup marks a video bid; anything else is treated as the ad
    // unit's primary media type.
    if upstream.adm.as_deref().is_some_and(|adm| adm.contains("<VAST")) {
        MediaType::Video
    } else {
        ad_unit_bid
            .media_types
            .first()
            .copied()
            .unwrap_or(MediaType::Banner)
    }
}
