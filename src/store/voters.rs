//! Read-side queries over the externally-fed voter table.

use rusqlite::params;
use serde::Serialize;

use super::Database;
use crate::{model::Voter, GeoPoint, Result};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterSummary {
    pub id: String,
    pub name: String,
}

/// One street address with the geocoded voters registered at it. The
/// first voter's coordinate stands in for the house.
#[derive(Clone, Debug)]
pub struct ResolvedHouse {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub voters: Vec<VoterSummary>,
}

impl ResolvedHouse {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    pub fn voter_count(&self) -> u32 {
        self.voters.len() as u32
    }
}

impl Database {
    /// Seed path used by imports and tests; upserts by voter id.
    pub async fn insert_voters(&self, voters: Vec<Voter>) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO voters (id, name, address, lat, lng)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for voter in &voters {
                    stmt.execute(params![
                        voter.id,
                        voter.name,
                        voter.address,
                        voter.lat,
                        voter.lng
                    ])?;
                }
            }
            tx.commit()?;
            log::debug!("store: seeded voters n={}", voters.len());
            Ok(())
        })
        .await
    }

    /// Resolve addresses to houses, preserving input order. Addresses
    /// with no geocoded voter are dropped, not errors.
    pub async fn resolve_addresses(&self, addresses: Vec<String>) -> Result<Vec<ResolvedHouse>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, lat, lng FROM voters
                 WHERE address = ?1 AND lat IS NOT NULL AND lng IS NOT NULL
                 ORDER BY id",
            )?;

            let mut houses = Vec::new();
            for address in addresses {
                let rows = stmt.query_map(params![address], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                })?;

                let mut voters = Vec::new();
                let mut coordinate = None;
                for row in rows {
                    let (id, name, lat, lng) = row?;
                    coordinate.get_or_insert((lat, lng));
                    voters.push(VoterSummary { id, name });
                }

                if let Some((lat, lng)) = coordinate {
                    houses.push(ResolvedHouse {
                        address,
                        lat,
                        lng,
                        voters,
                    });
                }
            }
            Ok(houses)
        })
        .await
    }

    /// Every address with at least one geocoded voter, grouped.
    pub async fn houses_with_coordinates(&self) -> Result<Vec<ResolvedHouse>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT address, id, name, lat, lng FROM voters
                 WHERE lat IS NOT NULL AND lng IS NOT NULL
                 ORDER BY address, id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?;

            let mut houses: Vec<ResolvedHouse> = Vec::new();
            for row in rows {
                let (address, id, name, lat, lng) = row?;
                match houses.last_mut() {
                    Some(house) if house.address == address => {
                        house.voters.push(VoterSummary { id, name });
                    }
                    _ => houses.push(ResolvedHouse {
                        address,
                        lat,
                        lng,
                        voters: vec![VoterSummary { id, name }],
                    }),
                }
            }
            Ok(houses)
        })
        .await
    }
}
