use std::collections::BTreeMap;

use crate::model::context::PreBidContext;
use crate::model::request::MediaType;
use crate::model::response::{Bid, BidderResult, BidderStatus};
use crate::settings::Account;

/// Flattens every settled bidder result into one bid list and one status
/// list. Unknown bidder names get a synthetic status so the response always
/// carries exactly one entry per requested bidder.
pub fn merge(
    context: &PreBidContext,
    results: Vec<BidderResult>,
    unsupported: Vec<String>,
) -> (Vec<Bid>, Vec<BidderStatus>) {
    let mut bids = Vec::new();
    let mut statuses = Vec::new();

    for result in results {
        statuses.push(result.bidder_status);
        bids.extend(result.bids);
    }
    for bidder_code in unsupported {
        let mut status = BidderStatus::for_bidder(bidder_code);
        status.error = Some("Unsupported bidder".to_string());
        statuses.push(status);
    }

    for bid in &mut bids {
        recover_dimensions(context, bid);
    }

    (bids, statuses)
}

/// Upstreams frequently omit banner dimensions; the ad unit's first
/// configured size stands in. Video bids are exempt.
fn recover_dimensions(context: &PreBidContext, bid: &mut Bid) {
    if bid.media_type == Some(MediaType::Video) {
        return;
    }
    if bid.width.is_some() && bid.height.is_some() {
        return;
    }
    if let Some(ad_unit_bid) = context.ad_unit_bid(&bid.bidder, &bid.code) {
        if let Some(size) = ad_unit_bid.sizes.first() {
            bid.width = Some(size.w);
            bid.height = Some(size.h);
        }
    }
}

/// Ranks bids within each ad unit by descending price (stable, so ties keep
/// arrival order) and attaches ad-server targeting. Ordering must happen
/// before key assignment: only the top bid per ad unit gets the winner-tier
/// keys.
pub fn assign_targeting(bids: &mut Vec<Bid>, account: &Account) {
    bids.sort_by(|a, b| {
        a.code
            .cmp(&b.code)
            .then_with(|| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut previous_code: Option<String> = None;
    for bid in bids.iter_mut() {
        let is_winner = previous_code.as_deref() != Some(bid.code.as_str());
        previous_code = Some(bid.code.clone());

        if is_winner {
            let targeting = bid.ad_server_targeting.get_or_insert_with(BTreeMap::new);
            targeting.insert("hb_bidder".to_string(), bid.bidder.clone());
            targeting.insert(
                "hb_pb".to_string(),
                price_bucket(bid.price, account.price_granularity.as_deref()),
            );
            if let (Some(width), Some(height)) = (bid.width, bid.height) {
                targeting.insert("hb_size".to_string(), format!("{width}x{height}"));
            }
            if let Some(cache_id) = &bid.cache_id {
                targeting.insert("hb_cache_id".to_string(), cache_id.clone());
            }
        }
    }
}

/// Rounds a price down into its ad-server line-item bucket.
fn price_bucket(price: f64, granularity: Option<&str>) -> String {
    let (increment, cap) = match granularity {
        Some("low") => (0.5, 5.0),
        Some("high") => (0.01, 20.0),
        // "med" is the default granularity.
        _ => (0.1, 20.0),
    };
    let bucketed = if price >= cap {
        cap
    } else {
        (price / increment).floor() * increment
    };
    format!("{bucketed:.2}")
}
