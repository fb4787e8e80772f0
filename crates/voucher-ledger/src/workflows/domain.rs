use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateListId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

macro_rules! display_inner {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        })+
    };
}

display_inner!(
    ResourceId,
    AssignmentId,
    ProviderId,
    CandidateId,
    CandidateListId,
    ActorId
);

/// Provider-specific product variant a voucher is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCode {
    Proctored,
    NonProctored,
    Speaking,
    Writing,
}

impl ServiceCode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Proctored => "proctored",
            Self::NonProctored => "non_proctored",
            Self::Speaking => "speaking",
            Self::Writing => "writing",
        }
    }
}

impl fmt::Display for ServiceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service code '{0}'")]
pub struct UnknownServiceCode(pub String);

impl FromStr for ServiceCode {
    type Err = UnknownServiceCode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "proctored" => Ok(Self::Proctored),
            "non_proctored" | "nonproctored" => Ok(Self::NonProctored),
            "speaking" => Ok(Self::Speaking),
            "writing" => Ok(Self::Writing),
            _ => Err(UnknownServiceCode(value.to_string())),
        }
    }
}

/// The (provider, service code) pair every pool, allocator and importer is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub provider: ProviderId,
    pub service_code: ServiceCode,
}

impl ServiceKey {
    pub fn new(provider: impl Into<String>, service_code: ServiceCode) -> Self {
        Self {
            provider: ProviderId::new(provider),
            service_code,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.service_code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Available,
    Reserved,
    Sent,
    Redeemed,
    Expired,
    Disabled,
}

impl ResourceStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Sent => "sent",
            Self::Redeemed => "redeemed",
            Self::Expired => "expired",
            Self::Disabled => "disabled",
        }
    }

    /// Terminal rows are never picked up by the expiry sweep again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Redeemed | Self::Expired | Self::Disabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub provider: ProviderId,
    pub service_code: ServiceCode,
    pub code: String,
    pub status: ResourceStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            provider: self.provider.clone(),
            service_code: self.service_code,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at.is_some_and(|expires| expires < now)
    }
}

/// Resource row before the store has assigned it an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub provider: ProviderId,
    pub service_code: ServiceCode,
    pub code: String,
    pub status: ResourceStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Redeemed,
    Expired,
    Reassigned,
}

impl AssignmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Redeemed => "redeemed",
            Self::Expired => "expired",
            Self::Reassigned => "reassigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub provider: ProviderId,
    pub service_code: ServiceCode,
    pub resource_id: ResourceId,
    pub resource_code: String,
    pub candidate_id: CandidateId,
    pub assigned_by: ActorId,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Assigned
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            provider: self.provider.clone(),
            service_code: self.service_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub resource: Resource,
    pub candidate_id: CandidateId,
    pub assigned_by: ActorId,
    pub assigned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn resource(status: ResourceStatus, expires_at: Option<DateTime<Utc>>) -> Resource {
        Resource {
            id: ResourceId(1),
            provider: ProviderId::new("accredit"),
            service_code: ServiceCode::Proctored,
            code: "ACC1".to_string(),
            status,
            sent_at: None,
            expires_at,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn service_code_parses_common_spellings() {
        assert_eq!("Proctored".parse::<ServiceCode>(), Ok(ServiceCode::Proctored));
        assert_eq!("non-proctored".parse::<ServiceCode>(), Ok(ServiceCode::NonProctored));
        assert_eq!(" writing ".parse::<ServiceCode>(), Ok(ServiceCode::Writing));
        assert!("listening".parse::<ServiceCode>().is_err());
    }

    #[test]
    fn expiry_ignores_terminal_and_open_ended_rows() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let past = Some(now - chrono::Duration::days(1));

        assert!(resource(ResourceStatus::Available, past).is_expired_at(now));
        assert!(resource(ResourceStatus::Sent, past).is_expired_at(now));
        assert!(!resource(ResourceStatus::Redeemed, past).is_expired_at(now));
        assert!(!resource(ResourceStatus::Disabled, past).is_expired_at(now));
        assert!(!resource(ResourceStatus::Available, None).is_expired_at(now));
        assert!(!resource(ResourceStatus::Available, Some(now)).is_expired_at(now));
    }
}
