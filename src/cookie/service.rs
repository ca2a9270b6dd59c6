use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::{Duration, Utc};
use tracing::debug;

use crate::cookie::uids::{Uids, UidsCookie, UidsModel, UidWithExpiry};

pub const COOKIE_NAME: &str = "uids";

/// How long the rewritten cookie itself lives.
const COOKIE_TTL_DAYS: i64 = 180;
/// How long an individual synced id stays considered fresh.
const UID_TTL_DAYS: i64 = 14;

/// Decodes and re-encodes the per-user identity cookie.
///
/// Identity is best effort: a missing or unreadable cookie yields a fresh
/// empty record, never a failed request. The server only reads and rewrites
/// the value per request; it stores nothing.
pub struct UidsCookieService {
    opt_out_cookie_name: Option<String>,
    opt_out_cookie_value: Option<String>,
    host_cookie_family: Option<String>,
    host_cookie_name: Option<String>,
    host_cookie_domain: Option<String>,
}

impl UidsCookieService {
    pub fn new(
        opt_out_cookie_name: Option<String>,
        opt_out_cookie_value: Option<String>,
        host_cookie_family: Option<String>,
        host_cookie_name: Option<String>,
        host_cookie_domain: Option<String>,
    ) -> Self {
        Self {
            opt_out_cookie_name,
            opt_out_cookie_value,
            host_cookie_family,
            host_cookie_name,
            host_cookie_domain,
        }
    }

    /// Builds the identity view for one request from its cookie map.
    pub fn parse_from_cookies(&self, cookies: &HashMap<String, String>) -> UidsCookie {
        let mut uids = cookies
            .get(COOKIE_NAME)
            .and_then(|value| Self::decode(value))
            .unwrap_or_else(|| Uids {
                bday: Some(Utc::now()),
                ..Uids::default()
            });

        // A configured host-level cookie stands in for exactly one family.
        if let (Some(family), Some(name)) = (&self.host_cookie_family, &self.host_cookie_name) {
            if !uids.uids.contains_key(family) {
                if let Some(host_uid) = cookies.get(name) {
                    uids.uids
                        .insert(family.clone(), UidWithExpiry::live(host_uid.clone()));
                }
            }
        }

        if self.is_opted_out(cookies) {
            uids.optout = true;
        }

        UidsCookie::new(uids)
    }

    /// Raw value of the configured host-level identity cookie, if any.
    pub fn parse_host_cookie(&self, cookies: &HashMap<String, String>) -> Option<String> {
        self.host_cookie_name
            .as_ref()
            .and_then(|name| cookies.get(name))
            .cloned()
    }

    fn is_opted_out(&self, cookies: &HashMap<String, String>) -> bool {
        match (&self.opt_out_cookie_name, &self.opt_out_cookie_value) {
            (Some(name), Some(value)) => cookies.get(name) == Some(value),
            _ => false,
        }
    }

    fn decode(value: &str) -> Option<Uids> {
        let bytes = match URL_SAFE.decode(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("uids cookie is not valid base64: {err}");
                return None;
            }
        };
        match serde_json::from_slice::<UidsModel>(&bytes) {
            Ok(model) => Some(Uids::from_model(model)),
            Err(err) => {
                debug!("uids cookie is not a valid uids record: {err}");
                None
            }
        }
    }

    /// Serializes the record back into a Set-Cookie header value. Every
    /// per-family id gets a fresh short expiry; the cookie itself gets the
    /// long one.
    pub fn to_set_cookie(&self, cookie: &UidsCookie) -> String {
        let record = cookie.record();
        let uid_expiry = Utc::now() + Duration::days(UID_TTL_DAYS);
        let temp_uids: HashMap<String, UidWithExpiry> = record
            .uids
            .iter()
            .map(|(family, entry)| {
                (
                    family.clone(),
                    UidWithExpiry {
                        uid: entry.uid.clone(),
                        expires: Some(entry.expires.unwrap_or(uid_expiry)),
                    },
                )
            })
            .collect();

        let model = UidsModel {
            uids: None,
            temp_uids: Some(temp_uids),
            bday: Some(record.bday.unwrap_or_else(Utc::now)),
            optout: record.optout.then_some(true),
        };
        let json = serde_json::to_vec(&model).unwrap_or_default();
        let value = URL_SAFE.encode(json);

        let max_age = Duration::days(COOKIE_TTL_DAYS).num_seconds();
        let mut header = format!("{COOKIE_NAME}={value}; Path=/; Max-Age={max_age}");
        if let Some(domain) = &self.host_cookie_domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        header
    }
}
