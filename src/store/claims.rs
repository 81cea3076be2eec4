//! House-claim persistence and state transitions.
//!
//! Every transition runs inside the store worker, so the active-claim
//! check and the write it guards are never interleaved with another
//! caller's.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime, to_count, Database};
use crate::{
    model::{ClaimStatus, HouseClaim},
    Error, Result,
};

const CLAIM_COLUMNS: &str = "id, session_id, address, lat, lng, status, claimed_at, expires_at, \
                             visited_at, voters_contacted, voters_home, contacted_voter_ids";

/// One address a session wants to reserve, already resolved to a
/// coordinate.
#[derive(Clone, Debug)]
pub struct ClaimRequest {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

/// Outcome of a claim batch. Partial success by design: contested
/// addresses land in `skipped`, never in an error.
#[derive(Clone, Debug, Default)]
pub struct ClaimBatch {
    pub granted: Vec<HouseClaim>,
    pub skipped: Vec<String>,
}

struct ClaimRow {
    id: String,
    session_id: String,
    address: String,
    lat: f64,
    lng: f64,
    status: String,
    claimed_at: String,
    expires_at: String,
    visited_at: Option<String>,
    voters_contacted: i64,
    voters_home: i64,
    contacted_voter_ids: String,
}

impl ClaimRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            address: row.get(2)?,
            lat: row.get(3)?,
            lng: row.get(4)?,
            status: row.get(5)?,
            claimed_at: row.get(6)?,
            expires_at: row.get(7)?,
            visited_at: row.get(8)?,
            voters_contacted: row.get(9)?,
            voters_home: row.get(10)?,
            contacted_voter_ids: row.get(11)?,
        })
    }

    fn into_claim(self) -> Result<HouseClaim> {
        Ok(HouseClaim {
            id: self.id,
            session_id: self.session_id,
            address: self.address,
            lat: self.lat,
            lng: self.lng,
            claimed_at: parse_datetime(&self.claimed_at)?,
            expires_at: parse_datetime(&self.expires_at)?,
            status: ClaimStatus::parse(&self.status)?,
            visited_at: self.visited_at.as_deref().map(parse_datetime).transpose()?,
            voters_contacted: to_count(self.voters_contacted)?,
            voters_home: to_count(self.voters_home)?,
            contact_ids: serde_json::from_str(&self.contacted_voter_ids)
                .map_err(|err| Error::invalid_data(format!("bad contact id list: {err}")))?,
        })
    }
}

fn fetch_claim(conn: &Connection, id: &str) -> Result<HouseClaim> {
    let row = conn
        .query_row(
            &format!("SELECT {CLAIM_COLUMNS} FROM house_claims WHERE id = ?1"),
            params![id],
            ClaimRow::read,
        )
        .optional()?;

    match row {
        Some(row) => row.into_claim(),
        None => Err(Error::not_found(format!("house claim '{id}' not found"))),
    }
}

fn insert_claim(conn: &Connection, claim: &HouseClaim) -> Result<()> {
    let contact_ids = serde_json::to_string(&claim.contact_ids)
        .map_err(|err| Error::invalid_data(format!("bad contact id list: {err}")))?;
    conn.execute(
        "INSERT INTO house_claims (id, session_id, address, lat, lng, status, claimed_at, \
         expires_at, visited_at, voters_contacted, voters_home, contacted_voter_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            claim.id,
            claim.session_id,
            claim.address,
            claim.lat,
            claim.lng,
            claim.status.as_str(),
            claim.claimed_at.to_rfc3339(),
            claim.expires_at.to_rfc3339(),
            claim.visited_at.map(|t| t.to_rfc3339()),
            i64::from(claim.voters_contacted),
            i64::from(claim.voters_home),
            contact_ids,
        ],
    )?;
    Ok(())
}

/// A holding-state row whose lease has lapsed. The status is in
/// ('claimed','visiting') so the lexicographic query already narrowed
/// candidates; the time comparison happens here, on parsed values.
fn address_is_held(conn: &Connection, address: &str, now: DateTime<Utc>) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT expires_at FROM house_claims
         WHERE address = ?1 AND status IN ('claimed', 'visiting')",
    )?;
    let rows = stmt.query_map(params![address], |row| row.get::<_, String>(0))?;
    for row in rows {
        if parse_datetime(&row?)? > now {
            return Ok(true);
        }
    }
    Ok(false)
}

/// If the claim's lease has lapsed while it still held the address,
/// rewrite it to `expired` and report the lapse. Readers never depend
/// on this rewrite; it only keeps the table tidy.
fn expire_if_lapsed(conn: &Connection, claim: &HouseClaim, now: DateTime<Utc>) -> Result<bool> {
    if !claim.status.is_terminal() && claim.expires_at <= now {
        conn.execute(
            "UPDATE house_claims SET status = 'expired' WHERE id = ?1",
            params![claim.id],
        )?;
        log::debug!("claims: lapsed id={} address={}", claim.id, claim.address);
        return Ok(true);
    }
    Ok(false)
}

impl Database {
    /// Reserve a batch of addresses for one session. The whole batch
    /// runs in one transaction on the worker thread; an address that
    /// is already actively held (or repeated within the batch) is
    /// skipped, and the rest still succeed.
    pub async fn claim_houses(
        &self,
        session_id: String,
        requests: Vec<ClaimRequest>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<ClaimBatch> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut batch = ClaimBatch::default();
            let mut seen = HashSet::new();

            for request in requests {
                if !seen.insert(request.address.clone())
                    || address_is_held(&tx, &request.address, now)?
                {
                    batch.skipped.push(request.address);
                    continue;
                }

                let claim = HouseClaim::new(
                    &session_id,
                    &request.address,
                    crate::GeoPoint::new(request.lat, request.lng),
                    now,
                    duration_minutes,
                )?;
                insert_claim(&tx, &claim)?;
                batch.granted.push(claim);
            }

            tx.commit()?;
            log::info!(
                "claims: batch session={session_id} granted={} skipped={}",
                batch.granted.len(),
                batch.skipped.len()
            );
            Ok(batch)
        })
        .await
    }

    pub async fn claim_by_id(&self, id: String) -> Result<HouseClaim> {
        self.execute(move |conn| fetch_claim(conn, &id)).await
    }

    /// Claimed -> Visiting. Any other state, or a lapsed lease, is a
    /// state violation.
    pub async fn mark_arrived(&self, id: String, now: DateTime<Utc>) -> Result<HouseClaim> {
        self.execute(move |conn| {
            let claim = fetch_claim(conn, &id)?;
            if expire_if_lapsed(conn, &claim, now)? {
                return Err(Error::claim_state(format!(
                    "claim '{id}' expired at {}",
                    claim.expires_at.to_rfc3339()
                )));
            }
            if claim.status != ClaimStatus::Claimed {
                return Err(Error::claim_state(format!(
                    "cannot arrive at claim '{id}' in state '{}'",
                    claim.status.as_str()
                )));
            }
            conn.execute(
                "UPDATE house_claims SET status = 'visiting' WHERE id = ?1",
                params![id],
            )?;
            fetch_claim(conn, &id)
        })
        .await
    }

    /// Visiting -> Visited, stamping the visit time and results.
    pub async fn mark_completed(
        &self,
        id: String,
        now: DateTime<Utc>,
        voters_contacted: u32,
        voters_home: u32,
        contact_ids: Vec<String>,
    ) -> Result<HouseClaim> {
        self.execute(move |conn| {
            let claim = fetch_claim(conn, &id)?;
            if expire_if_lapsed(conn, &claim, now)? {
                return Err(Error::claim_state(format!(
                    "claim '{id}' expired at {}",
                    claim.expires_at.to_rfc3339()
                )));
            }
            if claim.status != ClaimStatus::Visiting {
                return Err(Error::claim_state(format!(
                    "cannot complete claim '{id}' in state '{}'",
                    claim.status.as_str()
                )));
            }
            let contact_json = serde_json::to_string(&contact_ids)
                .map_err(|err| Error::invalid_data(format!("bad contact id list: {err}")))?;
            conn.execute(
                "UPDATE house_claims SET status = 'visited', visited_at = ?1, \
                 voters_contacted = ?2, voters_home = ?3, contacted_voter_ids = ?4
                 WHERE id = ?5",
                params![
                    now.to_rfc3339(),
                    i64::from(voters_contacted),
                    i64::from(voters_home),
                    contact_json,
                    id
                ],
            )?;
            fetch_claim(conn, &id)
        })
        .await
    }

    /// Claimed or Visiting -> Released.
    pub async fn mark_released(&self, id: String, now: DateTime<Utc>) -> Result<HouseClaim> {
        self.execute(move |conn| {
            let claim = fetch_claim(conn, &id)?;
            if expire_if_lapsed(conn, &claim, now)? {
                return Err(Error::claim_state(format!(
                    "claim '{id}' expired at {}",
                    claim.expires_at.to_rfc3339()
                )));
            }
            if claim.status.is_terminal() {
                return Err(Error::claim_state(format!(
                    "cannot release claim '{id}' in state '{}'",
                    claim.status.as_str()
                )));
            }
            conn.execute(
                "UPDATE house_claims SET status = 'released' WHERE id = ?1",
                params![id],
            )?;
            fetch_claim(conn, &id)
        })
        .await
    }

    /// Release every still-`claimed` claim of a closing session and
    /// return them. `visiting` claims are left to lapse on their own.
    pub async fn release_pending(&self, session_id: String) -> Result<Vec<HouseClaim>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut pending = Vec::new();
            {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {CLAIM_COLUMNS} FROM house_claims
                     WHERE session_id = ?1 AND status = 'claimed'"
                ))?;
                let rows = stmt.query_map(params![session_id], ClaimRow::read)?;
                for row in rows {
                    pending.push(row?.into_claim()?);
                }
            }

            for claim in &mut pending {
                tx.execute(
                    "UPDATE house_claims SET status = 'released' WHERE id = ?1",
                    params![claim.id],
                )?;
                claim.status = ClaimStatus::Released;
            }
            tx.commit()?;
            Ok(pending)
        })
        .await
    }

    pub async fn claims_for_session(&self, session_id: String) -> Result<Vec<HouseClaim>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CLAIM_COLUMNS} FROM house_claims
                 WHERE session_id = ?1 ORDER BY claimed_at, id"
            ))?;
            let rows = stmt.query_map(params![session_id], ClaimRow::read)?;
            let mut claims = Vec::new();
            for row in rows {
                claims.push(row?.into_claim()?);
            }
            Ok(claims)
        })
        .await
    }

    /// Addresses currently held by an unexpired claim.
    pub async fn active_claim_addresses(&self, now: DateTime<Utc>) -> Result<HashSet<String>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT address, expires_at FROM house_claims
                 WHERE status IN ('claimed', 'visiting')",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut held = HashSet::new();
            for row in rows {
                let (address, expires_at) = row?;
                if parse_datetime(&expires_at)? > now {
                    held.insert(address);
                }
            }
            Ok(held)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::ClaimRequest;
    use crate::model::ClaimStatus;
    use crate::store::test_support::{seed_session, temp_db};
    use crate::Error;

    fn request(address: &str) -> ClaimRequest {
        ClaimRequest {
            address: address.to_owned(),
            lat: 33.405,
            lng: -86.811,
        }
    }

    #[tokio::test]
    async fn second_claim_on_held_address_is_skipped() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        seed_session(&db, "session-b").await;
        let now = Utc::now();

        let first = db
            .claim_houses("session-a".into(), vec![request("100 Main St")], 30, now)
            .await
            .expect("first batch");
        assert_eq!(first.granted.len(), 1);
        assert!(first.skipped.is_empty());

        let second = db
            .claim_houses("session-b".into(), vec![request("100 Main St")], 30, now)
            .await
            .expect("second batch");
        assert!(second.granted.is_empty());
        assert_eq!(second.skipped, vec!["100 Main St".to_owned()]);
    }

    #[tokio::test]
    async fn lapsed_claim_frees_the_address() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        seed_session(&db, "session-b").await;
        let now = Utc::now();

        db.claim_houses("session-a".into(), vec![request("100 Main St")], 30, now)
            .await
            .expect("first batch");

        let later = now + Duration::minutes(31);
        let batch = db
            .claim_houses("session-b".into(), vec![request("100 Main St")], 30, later)
            .await
            .expect("reclaim after lapse");
        assert_eq!(batch.granted.len(), 1);

        let held = db.active_claim_addresses(later).await.expect("held set");
        assert!(held.contains("100 Main St"));
        assert_eq!(held.len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_duration_is_an_error_not_a_dead_worker() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let now = Utc::now();

        let result = db
            .claim_houses("session-a".into(), vec![request("100 Main St")], i64::MAX, now)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let batch = db
            .claim_houses("session-a".into(), vec![request("100 Main St")], 30, now)
            .await
            .expect("worker still serving");
        assert_eq!(batch.granted.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_addresses_within_a_batch_collapse_to_one() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let batch = db
            .claim_houses(
                "session-a".into(),
                vec![request("100 Main St"), request("100 Main St")],
                30,
                Utc::now(),
            )
            .await
            .expect("batch");
        assert_eq!(batch.granted.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_strict() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let now = Utc::now();

        let batch = db
            .claim_houses("session-a".into(), vec![request("100 Main St")], 30, now)
            .await
            .expect("claim");
        let id = batch.granted[0].id.clone();

        // Complete before arrive is a violation.
        let early = db
            .mark_completed(id.clone(), now, 1, 1, vec!["v1".into()])
            .await;
        assert!(matches!(early, Err(Error::ClaimState(_))));

        let visiting = db.mark_arrived(id.clone(), now).await.expect("arrive");
        assert_eq!(visiting.status, ClaimStatus::Visiting);

        let visited = db
            .mark_completed(id.clone(), now, 2, 1, vec!["v1".into(), "v2".into()])
            .await
            .expect("complete");
        assert_eq!(visited.status, ClaimStatus::Visited);
        assert_eq!(visited.voters_contacted, 2);
        assert!(visited.visited_at.is_some());
        assert_eq!(visited.contact_ids.len(), 2);

        // Terminal states never transition again.
        let again = db.mark_arrived(id.clone(), now).await;
        assert!(matches!(again, Err(Error::ClaimState(_))));
        let release = db.mark_released(id, now).await;
        assert!(matches!(release, Err(Error::ClaimState(_))));
    }

    #[tokio::test]
    async fn arrive_on_expired_claim_is_rejected_and_marks_expired() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let now = Utc::now();

        let batch = db
            .claim_houses("session-a".into(), vec![request("100 Main St")], 30, now)
            .await
            .expect("claim");
        let id = batch.granted[0].id.clone();

        let later = now + Duration::minutes(31);
        let arrive = db.mark_arrived(id.clone(), later).await;
        assert!(matches!(arrive, Err(Error::ClaimState(_))));

        let claim = db.claim_by_id(id).await.expect("fetch");
        assert_eq!(claim.status, ClaimStatus::Expired);
    }

    #[tokio::test]
    async fn session_end_releases_only_claimed_claims() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let now = Utc::now();

        let batch = db
            .claim_houses(
                "session-a".into(),
                vec![request("100 Main St"), request("200 Oak Ave")],
                30,
                now,
            )
            .await
            .expect("claim");
        let visiting_id = batch.granted[0].id.clone();
        db.mark_arrived(visiting_id.clone(), now).await.expect("arrive");

        let released = db
            .release_pending("session-a".into())
            .await
            .expect("release pending");
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].address, batch.granted[1].address);

        let still_visiting = db.claim_by_id(visiting_id).await.expect("fetch");
        assert_eq!(still_visiting.status, ClaimStatus::Visiting);
    }
}
