//! Orchestration over the store and the coordination channel. Every
//! public operation validates its inputs first, then runs the store
//! work, then logs activities and fans events out.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::{
    availability::{self, AvailableHouse},
    channel::WalkChannel,
    model::{
        ActivityKind, ClaimStatus, HouseClaim, SessionStatus, WalkActivity, WalkSession,
        MAX_CLAIM_MINUTES,
    },
    route::{self, OptimizedRoute},
    solver::TourStrategy,
    store::{ClaimBatch, ClaimRequest, Database},
    Error, GeoPoint, Result,
};

pub const DEFAULT_CLAIM_MINUTES: i64 = 30;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSession {
    pub session: WalkSession,
    pub active_claims: Vec<HouseClaim>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyCanvasser {
    pub canvasser_id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_m: f64,
    pub last_update: chrono::DateTime<Utc>,
    pub houses_visited_today: u32,
}

#[derive(Clone)]
pub struct WalkService {
    db: Database,
    channel: WalkChannel,
    default_claim_minutes: i64,
}

impl WalkService {
    pub fn new(db: Database, channel: WalkChannel, default_claim_minutes: i64) -> Self {
        Self {
            db,
            channel,
            default_claim_minutes,
        }
    }

    pub fn channel(&self) -> &WalkChannel {
        &self.channel
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    fn check_point(at: GeoPoint) -> Result<GeoPoint> {
        if !at.is_valid() {
            return Err(Error::invalid_input(format!("invalid coordinate {at}")));
        }
        Ok(at)
    }

    pub async fn start_session(&self, canvasser_id: &str, at: GeoPoint) -> Result<WalkSession> {
        Self::check_point(at)?;
        if canvasser_id.is_empty() {
            return Err(Error::invalid_input("canvasser id must not be empty"));
        }
        if let Some(existing) = self.db.active_session_for(canvasser_id.to_owned()).await? {
            return Err(Error::invalid_input(format!(
                "canvasser '{canvasser_id}' already has active session '{}'",
                existing.id
            )));
        }

        let now = Utc::now();
        let session = self
            .db
            .insert_session(WalkSession::start(canvasser_id, at, now))
            .await?;
        self.db
            .append_activity(WalkActivity::new(
                &session.id,
                ActivityKind::SessionStarted,
                at,
                now,
            ))
            .await?;
        log::info!("service: session start canvasser={canvasser_id} session={}", session.id);
        Ok(session)
    }

    /// Close the canvasser's active session. Claims still merely
    /// `claimed` go back to the pool; `visiting` ones are left to
    /// lapse on their own lease.
    pub async fn end_session(&self, canvasser_id: &str, at: GeoPoint) -> Result<WalkSession> {
        Self::check_point(at)?;
        let session = self
            .db
            .active_session_for(canvasser_id.to_owned())
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("no active session for canvasser '{canvasser_id}'"))
            })?;

        let now = Utc::now();
        let released = self.db.release_pending(session.id.clone()).await?;
        for claim in &released {
            self.channel.notify_house_released(claim, canvasser_id, now);
        }

        let ended = self
            .db
            .end_session(session.id.clone(), SessionStatus::Completed, now)
            .await?;
        self.db
            .append_activity(WalkActivity::new(
                &ended.id,
                ActivityKind::SessionEnded,
                at,
                now,
            ))
            .await?;
        log::info!(
            "service: session end canvasser={canvasser_id} session={} released={}",
            ended.id,
            released.len()
        );
        Ok(ended)
    }

    pub async fn current_session(&self, canvasser_id: &str) -> Result<Option<CurrentSession>> {
        let Some(session) = self.db.active_session_for(canvasser_id.to_owned()).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        let active_claims = self
            .db
            .claims_for_session(session.id.clone())
            .await?
            .into_iter()
            .filter(|claim| claim.is_active(now))
            .collect();
        Ok(Some(CurrentSession {
            session,
            active_claims,
        }))
    }

    pub async fn available_houses(
        &self,
        center: GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<AvailableHouse>> {
        Self::check_point(center)?;
        if radius_km <= 0.0 || !radius_km.is_finite() {
            return Err(Error::invalid_input(format!("invalid radius {radius_km}")));
        }
        availability::available_houses(&self.db, center, radius_km, limit, Utc::now()).await
    }

    pub async fn build_route(
        &self,
        canvasser_id: Option<&str>,
        start: GeoPoint,
        addresses: &[String],
        strategy: TourStrategy,
    ) -> Result<OptimizedRoute> {
        Self::check_point(start)?;
        let route = route::build_route(&self.db, start, addresses, strategy).await?;

        if let Some(canvasser_id) = canvasser_id {
            if let Some(session) = self.db.active_session_for(canvasser_id.to_owned()).await? {
                self.db
                    .append_activity(
                        WalkActivity::new(
                            &session.id,
                            ActivityKind::RouteGenerated,
                            start,
                            Utc::now(),
                        )
                        .with_data(json!({
                            "stops": route.houses.len(),
                            "totalDistanceM": route.total_distance_m,
                        })),
                    )
                    .await?;
            }
        }
        Ok(route)
    }

    /// Partial success: contested or unresolvable addresses land in
    /// `skipped` while the rest are granted.
    pub async fn claim_houses(
        &self,
        canvasser_id: &str,
        addresses: &[String],
        minutes: Option<i64>,
    ) -> Result<ClaimBatch> {
        if addresses.is_empty() {
            return Err(Error::invalid_input("no addresses to claim"));
        }
        let minutes = minutes.unwrap_or(self.default_claim_minutes);
        if !(1..=MAX_CLAIM_MINUTES).contains(&minutes) {
            return Err(Error::invalid_input(format!(
                "claim duration must be between 1 and {MAX_CLAIM_MINUTES} minutes, got {minutes}"
            )));
        }
        let session = self
            .db
            .active_session_for(canvasser_id.to_owned())
            .await?
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "canvasser '{canvasser_id}' has no active session to claim under"
                ))
            })?;

        let resolved = self.db.resolve_addresses(addresses.to_vec()).await?;
        let mut seen_unresolved = std::collections::HashSet::new();
        let unresolved: Vec<String> = addresses
            .iter()
            .filter(|address| {
                resolved.iter().all(|house| house.address != address.as_str())
                    && seen_unresolved.insert(address.as_str())
            })
            .cloned()
            .collect();

        let requests: Vec<ClaimRequest> = resolved
            .iter()
            .map(|house| ClaimRequest {
                address: house.address.clone(),
                lat: house.lat,
                lng: house.lng,
            })
            .collect();

        let now = Utc::now();
        let mut batch = self
            .db
            .claim_houses(session.id.clone(), requests, minutes, now)
            .await?;
        batch.skipped.extend(unresolved);

        for claim in &batch.granted {
            self.db
                .append_activity(
                    WalkActivity::new(&session.id, ActivityKind::HouseClaimed, claim.location(), now)
                        .with_claim(&claim.id)
                        .with_description(claim.address.clone()),
                )
                .await?;
            self.channel.notify_house_claimed(claim, canvasser_id, now);
        }
        Ok(batch)
    }

    pub async fn arrive(&self, claim_id: &str, at: GeoPoint) -> Result<HouseClaim> {
        Self::check_point(at)?;
        let now = Utc::now();
        let claim = self.db.mark_arrived(claim_id.to_owned(), now).await?;
        self.db
            .append_activity(
                WalkActivity::new(&claim.session_id, ActivityKind::ArrivedAtHouse, at, now)
                    .with_claim(&claim.id)
                    .with_description(claim.address.clone()),
            )
            .await?;
        Ok(claim)
    }

    pub async fn complete(
        &self,
        claim_id: &str,
        at: GeoPoint,
        voters_contacted: u32,
        voters_home: u32,
        contact_ids: Vec<String>,
    ) -> Result<HouseClaim> {
        Self::check_point(at)?;
        let now = Utc::now();
        let claim = self
            .db
            .mark_completed(claim_id.to_owned(), now, voters_contacted, voters_home, contact_ids)
            .await?;
        let session = self.db.session_by_id(claim.session_id.clone()).await?;

        let leg = self.leg_to(&session, &claim).await?;
        self.db
            .record_visit(session.id.clone(), voters_contacted, leg)
            .await?;
        self.db
            .append_activity(
                WalkActivity::new(&claim.session_id, ActivityKind::DepartedHouse, at, now)
                    .with_claim(&claim.id)
                    .with_description(claim.address.clone())
                    .with_data(json!({
                        "votersContacted": voters_contacted,
                        "votersHome": voters_home,
                    })),
            )
            .await?;
        self.channel
            .notify_house_completed(&claim, &session.canvasser_id, now);
        log::info!(
            "service: visit complete claim={} address={} contacted={voters_contacted}",
            claim.id,
            claim.address
        );
        Ok(claim)
    }

    /// Walking distance attributed to this visit: from the previous
    /// visited house of the session, or from the session's start point
    /// for the first visit.
    async fn leg_to(&self, session: &WalkSession, claim: &HouseClaim) -> Result<f64> {
        let previous = self
            .db
            .claims_for_session(session.id.clone())
            .await?
            .into_iter()
            .filter(|other| other.id != claim.id && other.status == ClaimStatus::Visited)
            .max_by_key(|other| other.visited_at)
            .map(|other| other.location())
            .or_else(|| match (session.start_lat, session.start_lng) {
                (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
                _ => None,
            });
        Ok(previous.map_or(0.0, |from| from.dist(&claim.location())))
    }

    pub async fn release(&self, claim_id: &str) -> Result<HouseClaim> {
        let now = Utc::now();
        let claim = self.db.mark_released(claim_id.to_owned(), now).await?;
        let session = self.db.session_by_id(claim.session_id.clone()).await?;
        self.db
            .append_activity(
                WalkActivity::new(
                    &claim.session_id,
                    ActivityKind::HouseReleased,
                    claim.location(),
                    now,
                )
                .with_claim(&claim.id)
                .with_description(claim.address.clone()),
            )
            .await?;
        self.channel
            .notify_house_released(&claim, &session.canvasser_id, now);
        Ok(claim)
    }

    pub async fn nearby_canvassers(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<NearbyCanvasser>> {
        Self::check_point(center)?;
        let now = Utc::now();
        let mut nearby = Vec::new();
        for (entry, distance_m) in self.channel.nearby_canvassers(center, radius_km) {
            let houses_visited_today = self
                .db
                .houses_visited_today(entry.canvasser_id.clone(), now)
                .await?;
            nearby.push(NearbyCanvasser {
                canvasser_id: entry.canvasser_id,
                name: entry.name,
                lat: entry.lat,
                lng: entry.lng,
                distance_m,
                last_update: entry.last_update,
                houses_visited_today,
            });
        }
        Ok(nearby)
    }
}
