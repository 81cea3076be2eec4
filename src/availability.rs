//! Which houses are open for canvassing right now.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    store::{Database, VoterSummary},
    GeoPoint, Result,
};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableHouse {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_m: f64,
    pub voter_count: u32,
    pub voters: Vec<VoterSummary>,
}

/// Houses within `radius_km` of `center` that no unexpired claim
/// holds, nearest first, at most `limit`. Expiry is evaluated here
/// against the stored timestamps; a lapsed claim excludes nothing.
pub async fn available_houses(
    db: &Database,
    center: GeoPoint,
    radius_km: f64,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<AvailableHouse>> {
    let held = db.active_claim_addresses(now).await?;
    let houses = db.houses_with_coordinates().await?;
    let radius_m = radius_km * 1000.0;

    let mut available: Vec<AvailableHouse> = houses
        .into_iter()
        .filter(|house| !held.contains(&house.address))
        .filter_map(|house| {
            let distance_m = center.dist(&house.location());
            (distance_m <= radius_m).then(|| AvailableHouse {
                distance_m,
                voter_count: house.voter_count(),
                address: house.address,
                lat: house.lat,
                lng: house.lng,
                voters: house.voters,
            })
        })
        .collect();

    available.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    available.truncate(limit);

    log::debug!(
        "availability: center={center} radius_km={radius_km} held={} returned={}",
        held.len(),
        available.len()
    );
    Ok(available)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::available_houses;
    use crate::model::Voter;
    use crate::store::test_support::{seed_session, temp_db};
    use crate::store::ClaimRequest;
    use crate::GeoPoint;

    fn voter(id: &str, address: &str, lat: f64, lng: f64) -> Voter {
        Voter {
            id: id.to_owned(),
            name: format!("Voter {id}"),
            address: address.to_owned(),
            lat: Some(lat),
            lng: Some(lng),
        }
    }

    #[tokio::test]
    async fn filters_by_radius_and_sorts_by_distance() {
        let (db, _dir) = temp_db();
        let center = GeoPoint::new(33.5000, -86.8000);
        db.insert_voters(vec![
            voter("v1", "Near House", 33.5005, -86.8000),
            voter("v2", "Mid House", 33.5050, -86.8000),
            voter("v3", "Far House", 33.6000, -86.8000),
        ])
        .await
        .expect("seed");

        let houses = available_houses(&db, center, 2.0, 10, Utc::now())
            .await
            .expect("query");
        let addresses: Vec<&str> = houses.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(addresses, vec!["Near House", "Mid House"]);
        assert!(houses[0].distance_m < houses[1].distance_m);
    }

    #[tokio::test]
    async fn actively_claimed_houses_are_excluded_until_lapse() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let center = GeoPoint::new(33.5000, -86.8000);
        let now = Utc::now();
        db.insert_voters(vec![voter("v1", "100 Main St", 33.5005, -86.8000)])
            .await
            .expect("seed");

        db.claim_houses(
            "session-a".into(),
            vec![ClaimRequest {
                address: "100 Main St".into(),
                lat: 33.5005,
                lng: -86.8000,
            }],
            30,
            now,
        )
        .await
        .expect("claim");

        let during = available_houses(&db, center, 2.0, 10, now).await.expect("query");
        assert!(during.is_empty());

        let after = available_houses(&db, center, 2.0, 10, now + Duration::minutes(31))
            .await
            .expect("query after lapse");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].address, "100 Main St");
    }

    #[tokio::test]
    async fn limit_truncates_after_sorting() {
        let (db, _dir) = temp_db();
        let center = GeoPoint::new(33.5000, -86.8000);
        db.insert_voters(vec![
            voter("v1", "Far House", 33.5100, -86.8000),
            voter("v2", "Near House", 33.5005, -86.8000),
        ])
        .await
        .expect("seed");

        let houses = available_houses(&db, center, 5.0, 1, Utc::now())
            .await
            .expect("query");
        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].address, "Near House");
    }
}
