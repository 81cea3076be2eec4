use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, GeoPoint, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(Error::invalid_data(format!(
                "unknown session status '{value}'"
            ))),
        }
    }
}

/// One canvasser's active walking period.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkSession {
    pub id: String,
    pub canvasser_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub houses_visited: u32,
    pub voters_contacted: u32,
    pub total_distance_m: f64,
    pub duration_minutes: u32,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
}

impl WalkSession {
    pub fn start(canvasser_id: &str, at: GeoPoint, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            canvasser_id: canvasser_id.to_owned(),
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            houses_visited: 0,
            voters_contacted: 0,
            total_distance_m: 0.0,
            duration_minutes: 0,
            start_lat: Some(at.lat),
            start_lng: Some(at.lng),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimStatus {
    /// Reserved by a canvasser.
    Claimed,
    /// Canvasser is at the house.
    Visiting,
    /// Successfully visited.
    Visited,
    /// Lease lapsed without a visit.
    Expired,
    /// Manually released by the canvasser.
    Released,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Visiting => "visiting",
            Self::Visited => "visited",
            Self::Expired => "expired",
            Self::Released => "released",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "claimed" => Ok(Self::Claimed),
            "visiting" => Ok(Self::Visiting),
            "visited" => Ok(Self::Visited),
            "expired" => Ok(Self::Expired),
            "released" => Ok(Self::Released),
            _ => Err(Error::invalid_data(format!("unknown claim status '{value}'"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Visited | Self::Expired | Self::Released)
    }
}

/// Longest lease a house claim may carry, in minutes.
pub const MAX_CLAIM_MINUTES: i64 = 24 * 60;

/// Time-boxed exclusive reservation of one address for one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseClaim {
    pub id: String,
    pub session_id: String,
    /// Denormalized at claim time so the claim stays self-describing.
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ClaimStatus,
    pub visited_at: Option<DateTime<Utc>>,
    pub voters_contacted: u32,
    pub voters_home: u32,
    pub contact_ids: Vec<String>,
}

impl HouseClaim {
    pub fn new(
        session_id: &str,
        address: &str,
        at: GeoPoint,
        now: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Self> {
        if !(1..=MAX_CLAIM_MINUTES).contains(&duration_minutes) {
            return Err(Error::invalid_input(format!(
                "claim duration must be between 1 and {MAX_CLAIM_MINUTES} minutes, \
                 got {duration_minutes}"
            )));
        }
        let lease = chrono::Duration::try_minutes(duration_minutes).ok_or_else(|| {
            Error::invalid_input(format!("claim duration {duration_minutes} out of range"))
        })?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            address: address.to_owned(),
            lat: at.lat,
            lng: at.lng,
            claimed_at: now,
            expires_at: now + lease,
            status: ClaimStatus::Claimed,
            visited_at: None,
            voters_contacted: 0,
            voters_home: 0,
            contact_ids: Vec::new(),
        })
    }

    /// A claim holds its address only while unexpired and in a holding
    /// state. Expiry is evaluated lazily against the stored timestamp,
    /// never against a rewritten status.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, ClaimStatus::Claimed | ClaimStatus::Visiting)
            && self.expires_at > now
    }

    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    SessionStarted,
    RouteGenerated,
    HouseClaimed,
    HouseReleased,
    ArrivedAtHouse,
    DepartedHouse,
    ContactMade,
    SessionPaused,
    SessionResumed,
    SessionEnded,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::RouteGenerated => "route_generated",
            Self::HouseClaimed => "house_claimed",
            Self::HouseReleased => "house_released",
            Self::ArrivedAtHouse => "arrived_at_house",
            Self::DepartedHouse => "departed_house",
            Self::ContactMade => "contact_made",
            Self::SessionPaused => "session_paused",
            Self::SessionResumed => "session_resumed",
            Self::SessionEnded => "session_ended",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "session_started" => Ok(Self::SessionStarted),
            "route_generated" => Ok(Self::RouteGenerated),
            "house_claimed" => Ok(Self::HouseClaimed),
            "house_released" => Ok(Self::HouseReleased),
            "arrived_at_house" => Ok(Self::ArrivedAtHouse),
            "departed_house" => Ok(Self::DepartedHouse),
            "contact_made" => Ok(Self::ContactMade),
            "session_paused" => Ok(Self::SessionPaused),
            "session_resumed" => Ok(Self::SessionResumed),
            "session_ended" => Ok(Self::SessionEnded),
            _ => Err(Error::invalid_data(format!(
                "unknown activity kind '{value}'"
            ))),
        }
    }
}

/// Append-only event log entry for a walk session. Never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkActivity {
    pub id: String,
    pub session_id: String,
    pub kind: ActivityKind,
    pub lat: f64,
    pub lng: f64,
    pub claim_id: Option<String>,
    pub description: Option<String>,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl WalkActivity {
    pub fn new(session_id: &str, kind: ActivityKind, at: GeoPoint, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            kind,
            lat: at.lat,
            lng: at.lng,
            claim_id: None,
            description: None,
            data: None,
            timestamp: now,
        }
    }

    pub fn with_claim(mut self, claim_id: &str) -> Self {
        self.claim_id = Some(claim_id.to_owned());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Narrow read-side projection of the external voter store. Imported
/// out of band; this crate only resolves addresses against it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub id: String,
    pub name: String,
    pub address: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ActivityKind, ClaimStatus, HouseClaim, SessionStatus};
    use crate::GeoPoint;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()).expect("parse"), status);
        }
        for status in [
            ClaimStatus::Claimed,
            ClaimStatus::Visiting,
            ClaimStatus::Visited,
            ClaimStatus::Expired,
            ClaimStatus::Released,
        ] {
            assert_eq!(ClaimStatus::parse(status.as_str()).expect("parse"), status);
        }
        for kind in [
            ActivityKind::SessionStarted,
            ActivityKind::DepartedHouse,
            ActivityKind::SessionEnded,
        ] {
            assert_eq!(ActivityKind::parse(kind.as_str()).expect("parse"), kind);
        }
    }

    #[test]
    fn terminal_statuses_are_flagged() {
        assert!(!ClaimStatus::Claimed.is_terminal());
        assert!(!ClaimStatus::Visiting.is_terminal());
        assert!(ClaimStatus::Visited.is_terminal());
        assert!(ClaimStatus::Expired.is_terminal());
        assert!(ClaimStatus::Released.is_terminal());
    }

    #[test]
    fn claim_duration_bounds_are_enforced() {
        let now = Utc::now();
        let at = GeoPoint::new(33.5, -86.8);
        assert!(HouseClaim::new("s1", "100 Main St", at, now, 0).is_err());
        assert!(HouseClaim::new("s1", "100 Main St", at, now, -5).is_err());
        assert!(HouseClaim::new("s1", "100 Main St", at, now, i64::MAX).is_err());
        assert!(HouseClaim::new("s1", "100 Main St", at, now, super::MAX_CLAIM_MINUTES).is_ok());
    }

    #[test]
    fn lapsed_claim_is_inactive_regardless_of_status() {
        let now = Utc::now();
        let mut claim = HouseClaim::new("s1", "100 Main St", GeoPoint::new(33.5, -86.8), now, 30)
            .expect("claim");
        assert!(claim.is_active(now));
        assert!(!claim.is_active(now + Duration::minutes(31)));

        claim.status = ClaimStatus::Visiting;
        assert!(!claim.is_active(now + Duration::minutes(31)));

        claim.status = ClaimStatus::Released;
        assert!(!claim.is_active(now));
    }
}
