use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime, to_count, Database};
use crate::{
    model::{SessionStatus, WalkSession},
    Error, Result,
};

const SESSION_COLUMNS: &str = "id, canvasser_id, status, started_at, ended_at, start_lat, \
                               start_lng, houses_visited, voters_contacted, total_distance_m, \
                               duration_minutes";

struct SessionRow {
    id: String,
    canvasser_id: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
    start_lat: Option<f64>,
    start_lng: Option<f64>,
    houses_visited: i64,
    voters_contacted: i64,
    total_distance_m: f64,
    duration_minutes: i64,
}

impl SessionRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            canvasser_id: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            start_lat: row.get(5)?,
            start_lng: row.get(6)?,
            houses_visited: row.get(7)?,
            voters_contacted: row.get(8)?,
            total_distance_m: row.get(9)?,
            duration_minutes: row.get(10)?,
        })
    }

    fn into_session(self) -> Result<WalkSession> {
        Ok(WalkSession {
            id: self.id,
            canvasser_id: self.canvasser_id,
            status: SessionStatus::parse(&self.status)?,
            started_at: parse_datetime(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_datetime).transpose()?,
            houses_visited: to_count(self.houses_visited)?,
            voters_contacted: to_count(self.voters_contacted)?,
            total_distance_m: self.total_distance_m,
            duration_minutes: to_count(self.duration_minutes)?,
            start_lat: self.start_lat,
            start_lng: self.start_lng,
        })
    }
}

pub(super) fn fetch_session(conn: &Connection, id: &str) -> Result<WalkSession> {
    let row = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM walk_sessions WHERE id = ?1"),
            params![id],
            SessionRow::read,
        )
        .optional()?;

    match row {
        Some(row) => row.into_session(),
        None => Err(Error::not_found(format!("walk session '{id}' not found"))),
    }
}

impl Database {
    pub async fn insert_session(&self, session: WalkSession) -> Result<WalkSession> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO walk_sessions (id, canvasser_id, status, started_at, ended_at, \
                 start_lat, start_lng, houses_visited, voters_contacted, total_distance_m, \
                 duration_minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    session.id,
                    session.canvasser_id,
                    session.status.as_str(),
                    session.started_at.to_rfc3339(),
                    session.ended_at.map(|t| t.to_rfc3339()),
                    session.start_lat,
                    session.start_lng,
                    i64::from(session.houses_visited),
                    i64::from(session.voters_contacted),
                    session.total_distance_m,
                    i64::from(session.duration_minutes),
                ],
            )?;
            Ok(session)
        })
        .await
    }

    pub async fn session_by_id(&self, id: String) -> Result<WalkSession> {
        self.execute(move |conn| fetch_session(conn, &id)).await
    }

    pub async fn active_session_for(&self, canvasser_id: String) -> Result<Option<WalkSession>> {
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM walk_sessions
                         WHERE canvasser_id = ?1 AND status = 'active'
                         ORDER BY started_at DESC LIMIT 1"
                    ),
                    params![canvasser_id],
                    SessionRow::read,
                )
                .optional()?;
            row.map(SessionRow::into_session).transpose()
        })
        .await
    }

    /// Close a session, stamping its end time and wall-clock duration.
    pub async fn end_session(
        &self,
        id: String,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<WalkSession> {
        self.execute(move |conn| {
            let session = fetch_session(conn, &id)?;
            if session.status != SessionStatus::Active && session.status != SessionStatus::Paused {
                return Err(Error::invalid_input(format!(
                    "walk session '{id}' is already {}",
                    session.status.as_str()
                )));
            }

            let duration = (ended_at - session.started_at).num_minutes().max(0);
            conn.execute(
                "UPDATE walk_sessions SET status = ?1, ended_at = ?2, duration_minutes = ?3
                 WHERE id = ?4",
                params![status.as_str(), ended_at.to_rfc3339(), duration, id],
            )?;
            fetch_session(conn, &id)
        })
        .await
    }

    /// Accumulate one completed house visit onto the owning session.
    pub async fn record_visit(
        &self,
        id: String,
        voters_contacted: u32,
        leg_distance_m: f64,
    ) -> Result<()> {
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE walk_sessions SET
                     houses_visited = houses_visited + 1,
                     voters_contacted = voters_contacted + ?1,
                     total_distance_m = total_distance_m + ?2
                 WHERE id = ?3",
                params![i64::from(voters_contacted), leg_distance_m, id],
            )?;
            if updated == 0 {
                return Err(Error::not_found(format!("walk session '{id}' not found")));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::model::{SessionStatus, WalkSession};
    use crate::store::test_support::temp_db;
    use crate::{Error, GeoPoint};

    #[tokio::test]
    async fn session_round_trips_and_ends() {
        let (db, _dir) = temp_db();
        let started = Utc::now();
        let session = WalkSession::start("canvasser-1", GeoPoint::new(33.4, -86.8), started);
        let id = session.id.clone();
        db.insert_session(session).await.expect("insert");

        let active = db
            .active_session_for("canvasser-1".into())
            .await
            .expect("query")
            .expect("has active session");
        assert_eq!(active.id, id);
        assert_eq!(active.status, SessionStatus::Active);

        let ended = db
            .end_session(
                id.clone(),
                SessionStatus::Completed,
                started + Duration::minutes(42),
            )
            .await
            .expect("end");
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.duration_minutes, 42);

        assert!(db
            .active_session_for("canvasser-1".into())
            .await
            .expect("query")
            .is_none());

        let again = db.end_session(id, SessionStatus::Completed, Utc::now()).await;
        assert!(matches!(again, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn record_visit_accumulates() {
        let (db, _dir) = temp_db();
        let session = WalkSession::start("canvasser-1", GeoPoint::new(33.4, -86.8), Utc::now());
        let id = session.id.clone();
        db.insert_session(session).await.expect("insert");

        db.record_visit(id.clone(), 2, 120.0).await.expect("first visit");
        db.record_visit(id.clone(), 1, 80.0).await.expect("second visit");

        let session = db.session_by_id(id).await.expect("fetch");
        assert_eq!(session.houses_visited, 2);
        assert_eq!(session.voters_contacted, 3);
        assert!((session.total_distance_m - 200.0).abs() < 1e-9);

        let missing = db.record_visit("nope".into(), 0, 0.0).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}
