use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Reserved placeholder ids meaning "user declined to sync" for a given
/// cookie family. They must never surface as usable ids.
static SENTINEL_UIDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert("audienceNetwork", "0");
    map
});

pub fn is_sentinel(family: &str, uid: &str) -> bool {
    SENTINEL_UIDS.get(family).is_some_and(|sentinel| *sentinel == uid)
}

/// A synced external id together with its own expiry, independent of the
/// cookie's expiry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UidWithExpiry {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl UidWithExpiry {
    /// An id with no expiry of its own, treated as live.
    pub fn live(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            expires: None,
        }
    }

    pub fn is_live(&self) -> bool {
        match self.expires {
            Some(expires) => expires > Utc::now(),
            None => true,
        }
    }
}

/// The uids cookie blob exactly as it travels on the wire. Both the current
/// (`tempUIDs`) and the deprecated (`uids`) shape may be present.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UidsModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uids: Option<HashMap<String, String>>,
    #[serde(rename = "tempUIDs", default, skip_serializing_if = "Option::is_none")]
    pub temp_uids: Option<HashMap<String, UidWithExpiry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bday: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optout: Option<bool>,
}

/// Which of the two wire shapes a decoded blob carried.
#[derive(Debug, Clone)]
pub enum DecodedShape {
    Current(HashMap<String, UidWithExpiry>),
    Legacy(HashMap<String, String>),
}

impl DecodedShape {
    pub fn of(model: &UidsModel) -> Self {
        match &model.temp_uids {
            Some(current) if !current.is_empty() => DecodedShape::Current(current.clone()),
            _ => DecodedShape::Legacy(model.uids.clone().unwrap_or_default()),
        }
    }

    /// Normalization step: everything downstream sees the current shape only.
    pub fn normalize(self) -> HashMap<String, UidWithExpiry> {
        match self {
            DecodedShape::Current(uids) => uids,
            DecodedShape::Legacy(uids) => uids
                .into_iter()
                .map(|(family, uid)| (family, UidWithExpiry::live(uid)))
                .collect(),
        }
    }
}

/// Normalized identity record for one user.
#[derive(Debug, Clone, Default)]
pub struct Uids {
    pub uids: HashMap<String, UidWithExpiry>,
    pub bday: Option<DateTime<Utc>>,
    pub optout: bool,
}

impl Uids {
    pub fn from_model(model: UidsModel) -> Self {
        let optout = model.optout.unwrap_or(false);
        let bday = model.bday;
        Uids {
            uids: DecodedShape::of(&model).normalize(),
            bday,
            optout,
        }
    }
}

/// Read-side view over a [`Uids`] record with opt-out and sentinel rules
/// applied. Owned exclusively by the single in-flight auction that parsed it.
#[derive(Debug, Clone, Default)]
pub struct UidsCookie {
    uids: Uids,
}

impl UidsCookie {
    pub fn new(uids: Uids) -> Self {
        Self { uids }
    }

    /// Usable synced id for a cookie family. Opted-out users and sentinel
    /// placeholders read as absent.
    pub fn uid_from(&self, family: &str) -> Option<&str> {
        if self.uids.optout {
            return None;
        }
        self.uids
            .uids
            .get(family)
            .filter(|entry| !is_sentinel(family, &entry.uid))
            .map(|entry| entry.uid.as_str())
    }

    pub fn allows_sync(&self) -> bool {
        !self.uids.optout
    }

    pub fn has_live_uids(&self) -> bool {
        !self.uids.optout
            && self
                .uids
                .uids
                .iter()
                .any(|(family, entry)| entry.is_live() && !is_sentinel(family, &entry.uid))
    }

    /// Returns an updated record; the original is consumed, never mutated in
    /// place.
    pub fn update_uid(mut self, family: impl Into<String>, uid: impl Into<String>) -> Self {
        self.uids
            .uids
            .insert(family.into(), UidWithExpiry::live(uid));
        self
    }

    pub(crate) fn record(&self) -> &Uids {
        &self.uids
    }
}
