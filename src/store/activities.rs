use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{parse_datetime, Database};
use crate::{
    model::{ActivityKind, WalkActivity},
    Error, Result,
};

impl Database {
    /// Append one entry to the per-session event log.
    pub async fn append_activity(&self, activity: WalkActivity) -> Result<WalkActivity> {
        self.execute(move |conn| {
            let data = activity
                .data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|err| Error::invalid_data(format!("bad activity payload: {err}")))?;
            conn.execute(
                "INSERT INTO walk_activities (id, session_id, kind, lat, lng, claim_id, \
                 description, data, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    activity.id,
                    activity.session_id,
                    activity.kind.as_str(),
                    activity.lat,
                    activity.lng,
                    activity.claim_id,
                    activity.description,
                    data,
                    activity.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(activity)
        })
        .await
    }

    pub async fn activities_for_session(&self, session_id: String) -> Result<Vec<WalkActivity>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, kind, lat, lng, claim_id, description, data, occurred_at
                 FROM walk_activities WHERE session_id = ?1 ORDER BY occurred_at, id",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?;

            let mut activities = Vec::new();
            for row in rows {
                let (id, session_id, kind, lat, lng, claim_id, description, data, occurred_at) =
                    row?;
                activities.push(WalkActivity {
                    id,
                    session_id,
                    kind: ActivityKind::parse(&kind)?,
                    lat,
                    lng,
                    claim_id,
                    description,
                    data: data
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()
                        .map_err(|err| {
                            Error::invalid_data(format!("bad activity payload: {err}"))
                        })?,
                    timestamp: parse_datetime(&occurred_at)?,
                });
            }
            Ok(activities)
        })
        .await
    }

    /// Houses a canvasser finished since UTC midnight, counted from
    /// `departed_house` log entries across all of their sessions.
    pub async fn houses_visited_today(
        &self,
        canvasser_id: String,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT a.occurred_at FROM walk_activities a
                 JOIN walk_sessions s ON s.id = a.session_id
                 WHERE s.canvasser_id = ?1 AND a.kind = 'departed_house'",
            )?;
            let rows = stmt.query_map(params![canvasser_id], |row| row.get::<_, String>(0))?;

            let midnight = now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .ok_or_else(|| Error::invalid_data("failed to derive UTC midnight"))?;

            let mut count: u32 = 0;
            for row in rows {
                if parse_datetime(&row?)? >= midnight {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use crate::model::{ActivityKind, WalkActivity};
    use crate::store::test_support::{seed_session, temp_db};
    use crate::GeoPoint;

    #[tokio::test]
    async fn activities_round_trip_in_order() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let now = Utc::now();
        let at = GeoPoint::new(33.4, -86.8);

        db.append_activity(WalkActivity::new(
            "session-a",
            ActivityKind::SessionStarted,
            at,
            now,
        ))
        .await
        .expect("append start");
        db.append_activity(
            WalkActivity::new(
                "session-a",
                ActivityKind::DepartedHouse,
                at,
                now + Duration::minutes(5),
            )
            .with_description("100 Main St")
            .with_data(json!({ "votersContacted": 2 })),
        )
        .await
        .expect("append visit");

        let activities = db
            .activities_for_session("session-a".into())
            .await
            .expect("list");
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].kind, ActivityKind::SessionStarted);
        assert_eq!(activities[1].description.as_deref(), Some("100 Main St"));
        assert_eq!(
            activities[1].data.as_ref().and_then(|d| d["votersContacted"].as_i64()),
            Some(2)
        );
    }

    #[tokio::test]
    async fn visited_today_counts_only_departures_since_midnight() {
        let (db, _dir) = temp_db();
        seed_session(&db, "session-a").await;
        let now = Utc::now();
        let at = GeoPoint::new(33.4, -86.8);

        db.append_activity(WalkActivity::new(
            "session-a",
            ActivityKind::DepartedHouse,
            at,
            now,
        ))
        .await
        .expect("append today");
        db.append_activity(WalkActivity::new(
            "session-a",
            ActivityKind::DepartedHouse,
            at,
            now - Duration::days(2),
        ))
        .await
        .expect("append stale");
        db.append_activity(WalkActivity::new(
            "session-a",
            ActivityKind::HouseClaimed,
            at,
            now,
        ))
        .await
        .expect("append other kind");

        let count = db
            .houses_visited_today("canvasser-session-a".into(), now)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }
}
