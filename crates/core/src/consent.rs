use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Tracking-consent status reported by the user.
///
/// Any call may move the status to any other value; there is no one-way
/// transition in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    /// The user has not been asked, or the answer is not yet known.
    #[default]
    Unknown,
    /// The user granted consent to at least one category.
    Consented,
    /// The user refused consent.
    NotConsented,
}

impl std::fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Consented => f.write_str("consented"),
            Self::NotConsented => f.write_str("not_consented"),
        }
    }
}

/// Purpose categories a user can consent to individually.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConsentCategory {
    Analytics,
    Affiliates,
    DisplayAds,
    Email,
    Personalization,
    Search,
    Social,
    BigData,
    Mobile,
    Engagement,
    Monitoring,
    Crm,
    Cdp,
    CookieMatch,
    Misc,
}

impl ConsentCategory {
    /// The complete category set, granted when consent is given without an
    /// explicit selection.
    #[must_use]
    pub fn all() -> BTreeSet<Self> {
        [
            Self::Analytics,
            Self::Affiliates,
            Self::DisplayAds,
            Self::Email,
            Self::Personalization,
            Self::Search,
            Self::Social,
            Self::BigData,
            Self::Mobile,
            Self::Engagement,
            Self::Monitoring,
            Self::Crm,
            Self::Cdp,
            Self::CookieMatch,
            Self::Misc,
        ]
        .into_iter()
        .collect()
    }
}

/// Policy variant selecting how consent state is reported.
///
/// The state machine is identical under both policies; only the merge fields
/// contributed to outgoing events differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentPolicy {
    /// Partial consent: "consented with fewer than all categories" is a
    /// distinct reportable state from full consent.
    #[default]
    Gdpr,
    /// Binary opt-out: only consented / not-consented is distinguished.
    Ccpa,
}

impl ConsentPolicy {
    /// The policy identifier used in merged event fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gdpr => "gdpr",
            Self::Ccpa => "ccpa",
        }
    }
}

/// The user's persisted consent selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentPreferences {
    /// Current consent status.
    pub status: ConsentStatus,
    /// Granted categories. Empty unless `status` is `Consented`.
    #[serde(default)]
    pub categories: BTreeSet<ConsentCategory>,
}

impl ConsentPreferences {
    /// Whether every category has been granted.
    #[must_use]
    pub fn is_full_consent(&self) -> bool {
        self.status == ConsentStatus::Consented && self.categories == ConsentCategory::all()
    }
}
