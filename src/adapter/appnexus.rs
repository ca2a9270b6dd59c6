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

/// Raw params blob: a placement id, or a member id plus inventory code.
#[derive(Deserialize, Debug, Default)]
struct AppnexusParams {
    #[serde(default)]
    placement_id: Option<u64>,
    #[serde(default)]
    member: Option<String>,
    #[serde(default)]
    inv_code: Option<String>,
}

struct Params {
    tag_id: String,
    member: Option<String>,
}

pub struct AppnexusAdapter {
    endpoint_url: String,
    usersync: UsersyncInfo,
}

impl AppnexusAdapter {
    pub fn new(endpoint_url: &str, usersync_url: &str, external_url: &str) -> Self {
        Self {
            endpoint_url: endpoint_url.to_string(),
            usersync: redirect_usersync(usersync_url, external_url, "adnxs"),
        }
    }

    fn parse_and_validate_params(ad_unit_bid: &AdUnitBid) -> Result<Params, PreBidError> {
        let raw: AppnexusParams = parse_params(ad_unit_bid, "appnexus")?;
        match (raw.placement_id, raw.member, raw.inv_code) {
            (Some(placement_id), _, _) if placement_id != 0 => Ok(Params {
                tag_id: placement_id.to_string(),
                member: None,
            }),
            (_, Some(member), Some(inv_code)) if !member.is_empty() && !inv_code.is_empty() => {
                Ok(Params {
                    tag_id: inv_code,
                    member: Some(member),
                })
            }
            _ => Err(PreBidError::validation(
                "No placement or member+invcode provided",
            )),
        }
    }
}

impl Adapter for AppnexusAdapter {
    fn code(&self) -> &'static str {
        "appnexus"
    }

    fn cookie_family(&self) -> &'static str {
        "adnxs"
    }

    fn usersync_info(&self) -> &UsersyncInfo {
        &self.usersync
    }

    fn build_requests(
        &self,
        bidder: &Bidder,
        context: &PreBidContext,
    ) -> Result<Vec<OutboundRequest>, PreBidError> {
        let mut imps = Vec::new();
        let mut member = None;
        for ad_unit_bid in &bidder.ad_unit_bids {
            let params = Self::parse_and_validate_params(ad_unit_bid)?;
            if params.member.is_some() {
                member = params.member.clone();
            }
            for media_type in allowed_media_types(ad_unit_bid, ALLOWED_MEDIA_TYPES) {
                let mut imp = Imp {
                    id: ad_unit_bid.ad_unit_code.clone(),
                    tagid: Some(params.tag_id.clone()),
                    instl: ad_unit_bid.instl,
                    secure: context.secure,
                    ..Imp::default()
                };
                match media_type {
                    MediaType::Banner => imp.banner = Some(banner_for(ad_unit_bid)),
                    MediaType::Video => imp.video = Some(video_for(ad_unit_bid)),
                }
                imps.push(imp);
            }
        }
        if imps.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = base_bid_request(context, self.cookie_family(), member.clone());
        body.imp = imps;

        let uri = match member {
            Some(member) => format!("{}?member_id={member}", self.endpoint_url),
            None => self.endpoint_url.clone(),
        };
        Ok(vec![OutboundRequest::of(uri, body)])
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
                    deal_id: upstream.dealid.clone(),
                    width: upstream.w,
                    height: upstream.h,
                    media_type: ad_unit_bid.media_types.first().copied(),
                    ..Bid::default()
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::test_context;
    use serde_json::json;

    fn adapter() -> AppnexusAdapter {
        AppnexusAdapter::new(
            "http://appnexus.example/openrtb2",
            "http://sync.appnexus.example/getuid?",
            "http://broker.example",
        )
    }

    #[test]
    fn placement_id_becomes_tagid() {
        let context = test_context("appnexus", Some(json!({"placement_id": 9880618})));
        let requests = adapter()
            .build_requests(&context.bidders[0], &context)
            .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].uri, "http://appnexus.example/openrtb2");
        assert_eq!(requests[0].body.imp[0].tagid.as_deref(), Some("9880618"));
    }

    #[test]
    fn member_and_inv_code_route_through_member_endpoint() {
        let context = test_context(
            "appnexus",
            Some(json!({"member": "958", "inv_code": "abc"})),
        );
        let requests = adapter()
            .build_requests(&context.bidders[0], &context)
            .unwrap();
        assert_eq!(
            requests[0].uri,
            "http://appnexus.example/openrtb2?member_id=958"
        );
        assert_eq!(requests[0].body.imp[0].tagid.as_deref(), Some("abc"));
    }

    #[test]
    fn missing_placement_and_member_is_reported() {
        let context = test_context("appnexus", Some(json!({})));
        let error = adapter()
            .build_requests(&context.bidders[0], &context)
            .unwrap_err();
        assert_eq!(
            error,
            PreBidError::Validation("No placement or member+invcode provided".to_string())
        );
    }
}
