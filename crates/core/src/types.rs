//! Shared domain vocabulary used across the services.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ---------------------------------------------------------------------------
// Client context
// ---------------------------------------------------------------------------

/// Origin of an inbound request as seen by the security pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContext {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Context for calls that did not arrive over HTTP (background jobs, tests).
    pub fn unknown() -> Self {
        Self::new("unknown", "unknown")
    }
}

// ---------------------------------------------------------------------------
// Cantons
// ---------------------------------------------------------------------------

/// The 26 Swiss cantons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Canton {
    Zh,
    Be,
    Lu,
    Ur,
    Sz,
    Ow,
    Nw,
    Gl,
    Zg,
    Fr,
    So,
    Bs,
    Bl,
    Sh,
    Ar,
    Ai,
    Sg,
    Gr,
    Ag,
    Tg,
    Ti,
    Vd,
    Vs,
    Ne,
    Ge,
    Ju,
}

impl Canton {
    pub const ALL: [Canton; 26] = [
        Canton::Zh,
        Canton::Be,
        Canton::Lu,
        Canton::Ur,
        Canton::Sz,
        Canton::Ow,
        Canton::Nw,
        Canton::Gl,
        Canton::Zg,
        Canton::Fr,
        Canton::So,
        Canton::Bs,
        Canton::Bl,
        Canton::Sh,
        Canton::Ar,
        Canton::Ai,
        Canton::Sg,
        Canton::Gr,
        Canton::Ag,
        Canton::Tg,
        Canton::Ti,
        Canton::Vd,
        Canton::Vs,
        Canton::Ne,
        Canton::Ge,
        Canton::Ju,
    ];

    /// Two-letter official abbreviation.
    pub fn code(self) -> &'static str {
        match self {
            Canton::Zh => "ZH",
            Canton::Be => "BE",
            Canton::Lu => "LU",
            Canton::Ur => "UR",
            Canton::Sz => "SZ",
            Canton::Ow => "OW",
            Canton::Nw => "NW",
            Canton::Gl => "GL",
            Canton::Zg => "ZG",
            Canton::Fr => "FR",
            Canton::So => "SO",
            Canton::Bs => "BS",
            Canton::Bl => "BL",
            Canton::Sh => "SH",
            Canton::Ar => "AR",
            Canton::Ai => "AI",
            Canton::Sg => "SG",
            Canton::Gr => "GR",
            Canton::Ag => "AG",
            Canton::Tg => "TG",
            Canton::Ti => "TI",
            Canton::Vd => "VD",
            Canton::Vs => "VS",
            Canton::Ne => "NE",
            Canton::Ge => "GE",
            Canton::Ju => "JU",
        }
    }
}

impl fmt::Display for Canton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Canton {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Canton::ALL
            .into_iter()
            .find(|c| c.code() == upper)
            .ok_or_else(|| format!("Unknown canton '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Channel a verification code is delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Email,
    Phone,
}

impl ContactMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactMethod::Email => "email",
            ContactMethod::Phone => "phone",
        }
    }
}

/// What a verification code unlocks. Medical access gets stricter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    ContactVerification,
    PaymentVerification,
    MedicalAccess,
}

impl CodePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            CodePurpose::ContactVerification => "contact_verification",
            CodePurpose::PaymentVerification => "payment_verification",
            CodePurpose::MedicalAccess => "medical_access",
        }
    }

    pub fn is_medical(self) -> bool {
        matches!(self, CodePurpose::MedicalAccess)
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Payment rails accepted for Swiss customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    Card,
    Postfinance,
    Twint,
}

impl PaymentMethodKind {
    pub const ALL: [PaymentMethodKind; 3] = [
        PaymentMethodKind::Card,
        PaymentMethodKind::Postfinance,
        PaymentMethodKind::Twint,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethodKind::Card => "card",
            PaymentMethodKind::Postfinance => "postfinance",
            PaymentMethodKind::Twint => "twint",
        }
    }
}

// ---------------------------------------------------------------------------
// Insurance
// ---------------------------------------------------------------------------

/// Swiss basic-insurance models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsuranceModel {
    Standard,
    Flex,
    Hmo,
    /// Family-doctor model.
    Hausarzt,
    Telmed,
}

impl InsuranceModel {
    pub fn as_str(self) -> &'static str {
        match self {
            InsuranceModel::Standard => "standard",
            InsuranceModel::Flex => "flex",
            InsuranceModel::Hmo => "hmo",
            InsuranceModel::Hausarzt => "hausarzt",
            InsuranceModel::Telmed => "telmed",
        }
    }

    /// Gatekeeper models always route specialist care through a referral.
    pub fn forces_referral(self) -> bool {
        matches!(
            self,
            InsuranceModel::Hmo | InsuranceModel::Hausarzt | InsuranceModel::Telmed
        )
    }
}
