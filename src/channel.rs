//! In-memory realtime coordination: a broadcast bus of typed events
//! plus a roster of canvassers currently in the field. Nothing here
//! survives a restart; the roster rebuilds from joins and the store
//! remains the source of truth for claims.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{model::HouseClaim, GeoPoint};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything the coordination surface can announce. Serialized with
/// an explicit `type` tag so clients can dispatch without sniffing
/// payload shapes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WalkEvent {
    HouseClaimed {
        claim_id: String,
        address: String,
        canvasser_id: String,
        canvasser_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
    HouseReleased {
        claim_id: String,
        address: String,
        canvasser_id: String,
        canvasser_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
    HouseCompleted {
        claim_id: String,
        address: String,
        canvasser_id: String,
        canvasser_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
    CanvasserJoined {
        canvasser_id: String,
        name: String,
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
    },
    CanvasserLeft {
        canvasser_id: String,
        name: String,
        timestamp: DateTime<Utc>,
    },
    CanvasserLocation {
        canvasser_id: String,
        name: String,
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
    },
}

/// Transient roster projection of one connected canvasser.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCanvasser {
    pub canvasser_id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub last_update: DateTime<Utc>,
}

impl ActiveCanvasser {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

#[derive(Clone)]
pub struct WalkChannel {
    events: broadcast::Sender<WalkEvent>,
    roster: Arc<DashMap<String, ActiveCanvasser>>,
}

impl WalkChannel {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            events,
            roster: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalkEvent> {
        self.events.subscribe()
    }

    /// Best-effort fan-out; with no subscribers the event is dropped.
    fn publish(&self, event: WalkEvent) {
        if self.events.send(event).is_err() {
            log::trace!("channel: no subscribers, event dropped");
        }
    }

    pub fn join(&self, canvasser_id: &str, name: &str, at: GeoPoint, now: DateTime<Utc>) {
        self.roster.insert(
            canvasser_id.to_owned(),
            ActiveCanvasser {
                canvasser_id: canvasser_id.to_owned(),
                name: name.to_owned(),
                lat: at.lat,
                lng: at.lng,
                last_update: now,
            },
        );
        log::info!("channel: join canvasser={canvasser_id} roster={}", self.roster.len());
        self.publish(WalkEvent::CanvasserJoined {
            canvasser_id: canvasser_id.to_owned(),
            name: name.to_owned(),
            lat: at.lat,
            lng: at.lng,
            timestamp: now,
        });
    }

    pub fn leave(&self, canvasser_id: &str, now: DateTime<Utc>) {
        if let Some((_, entry)) = self.roster.remove(canvasser_id) {
            log::info!("channel: leave canvasser={canvasser_id} roster={}", self.roster.len());
            self.publish(WalkEvent::CanvasserLeft {
                canvasser_id: entry.canvasser_id,
                name: entry.name,
                timestamp: now,
            });
        }
    }

    /// Location ping from a joined canvasser; pings from unknown ids
    /// are dropped rather than creating half-filled roster entries.
    pub fn update_location(&self, canvasser_id: &str, at: GeoPoint, now: DateTime<Utc>) {
        let Some(mut entry) = self.roster.get_mut(canvasser_id) else {
            log::debug!("channel: location ping from unjoined canvasser={canvasser_id}");
            return;
        };
        entry.lat = at.lat;
        entry.lng = at.lng;
        entry.last_update = now;
        let name = entry.name.clone();
        drop(entry);

        self.publish(WalkEvent::CanvasserLocation {
            canvasser_id: canvasser_id.to_owned(),
            name,
            lat: at.lat,
            lng: at.lng,
            timestamp: now,
        });
    }

    fn name_of(&self, canvasser_id: &str) -> Option<String> {
        self.roster.get(canvasser_id).map(|entry| entry.name.clone())
    }

    pub fn notify_house_claimed(&self, claim: &HouseClaim, canvasser_id: &str, now: DateTime<Utc>) {
        self.publish(WalkEvent::HouseClaimed {
            claim_id: claim.id.clone(),
            address: claim.address.clone(),
            canvasser_id: canvasser_id.to_owned(),
            canvasser_name: self.name_of(canvasser_id),
            timestamp: now,
        });
    }

    pub fn notify_house_released(&self, claim: &HouseClaim, canvasser_id: &str, now: DateTime<Utc>) {
        self.publish(WalkEvent::HouseReleased {
            claim_id: claim.id.clone(),
            address: claim.address.clone(),
            canvasser_id: canvasser_id.to_owned(),
            canvasser_name: self.name_of(canvasser_id),
            timestamp: now,
        });
    }

    pub fn notify_house_completed(
        &self,
        claim: &HouseClaim,
        canvasser_id: &str,
        now: DateTime<Utc>,
    ) {
        self.publish(WalkEvent::HouseCompleted {
            claim_id: claim.id.clone(),
            address: claim.address.clone(),
            canvasser_id: canvasser_id.to_owned(),
            canvasser_name: self.name_of(canvasser_id),
            timestamp: now,
        });
    }

    /// Roster entries within `radius_km` of `center`, nearest first,
    /// paired with their distance in meters.
    pub fn nearby_canvassers(&self, center: GeoPoint, radius_km: f64) -> Vec<(ActiveCanvasser, f64)> {
        let radius_m = radius_km * 1000.0;
        let mut nearby: Vec<(ActiveCanvasser, f64)> = self
            .roster
            .iter()
            .filter_map(|entry| {
                let canvasser = entry.value().clone();
                let distance = center.dist(&canvasser.location());
                (distance <= radius_m).then_some((canvasser, distance))
            })
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        nearby
    }

    /// Drop roster entries that have not pinged within `max_age`.
    pub fn prune_stale(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let before = self.roster.len();
        self.roster.retain(|_, entry| now - entry.last_update <= max_age);
        let pruned = before - self.roster.len();
        if pruned > 0 {
            log::info!("channel: pruned stale entries n={pruned} roster={}", self.roster.len());
        }
        pruned
    }

    pub fn roster_size(&self) -> usize {
        self.roster.len()
    }
}

impl Default for WalkChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
