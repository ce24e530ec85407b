//! SQLite-backed catalog store.

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::CatalogStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Clone)]
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog database at {:?}", path))?;

        open_versioned(&mut conn, CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        info!(
            "Opened catalog: {} bands, {} albums, {} tracks, {} upcoming releases",
            store.get_bands_count(),
            store.get_albums_count(),
            store.get_tracks_count(),
            store.get_upcoming_count()
        );
        Ok(store)
    }

    // =========================================================================
    // Internal Helper Methods
    // =========================================================================

    /// Fixed-width UTC timestamps so that string comparison in SQL matches
    /// chronological order.
    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn format_date(date: &Option<NaiveDate>) -> Option<String> {
        date.map(|d| d.format("%Y-%m-%d").to_string())
    }

    fn parse_date(s: Option<String>) -> Option<NaiveDate> {
        s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
    }

    fn get_band_rowid(conn: &Connection, external_id: i64) -> Result<Option<i64>> {
        Ok(conn
            .query_row(
                "SELECT rowid FROM bands WHERE external_id = ?1",
                params![external_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn get_band_genres(conn: &Connection, band_rowid: i64) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT genre FROM band_genres WHERE band_rowid = ?1 ORDER BY position",
        )?;
        let genres = stmt
            .query_map(params![band_rowid], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(genres)
    }

    fn count(&self, table: &'static str) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
            r.get::<_, i64>(0)
        })
        .map(|c| c as usize)
        .unwrap_or(0)
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn get_band_by_external_id(&self, external_id: i64) -> Result<Option<BandRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT rowid, external_id, slug, display_name, country_of_origin,
                        lifecycle_status, follower_count, last_synced_at
                 FROM bands WHERE external_id = ?1",
                params![external_id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, i64>(6)?,
                        r.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, external_id, slug, display_name, country, status, followers, synced)) = row
        else {
            return Ok(None);
        };

        Ok(Some(BandRecord {
            id,
            external_id,
            slug,
            display_name,
            country_of_origin: country,
            genre_tags: Self::get_band_genres(&conn, id)?,
            lifecycle_status: status,
            follower_count: followers,
            last_synced_at: synced.as_deref().and_then(Self::parse_datetime),
        }))
    }

    fn upsert_bands(&self, bands: &[NewBand]) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Self::format_datetime(&Utc::now());
        let mut outcome = UpsertOutcome::default();

        for band in bands {
            let changed = tx.execute(
                "INSERT INTO bands (external_id, slug, display_name, country_of_origin, lifecycle_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(external_id) DO NOTHING",
                params![
                    band.external_id,
                    band.slug,
                    band.display_name,
                    band.country_of_origin,
                    band.lifecycle_status,
                    now
                ],
            )?;

            if changed == 0 {
                outcome.ignored += 1;
                continue;
            }

            let band_rowid = tx.last_insert_rowid();
            for (position, genre) in band.genre_tags.iter().enumerate() {
                tx.execute(
                    "INSERT INTO band_genres (band_rowid, position, genre) VALUES (?1, ?2, ?3)
                     ON CONFLICT(band_rowid, genre) DO NOTHING",
                    params![band_rowid, position as i64, genre],
                )?;
            }
            outcome.inserted += 1;
        }

        tx.commit()?;
        debug!(
            "Upserted {} bands ({} new, {} already known)",
            bands.len(),
            outcome.inserted,
            outcome.ignored
        );
        Ok(outcome)
    }

    fn get_all_band_external_links(&self) -> Result<Vec<BandLink>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT external_id, slug, display_name FROM bands ORDER BY external_id",
        )?;
        let links = stmt
            .query_map([], |r| {
                Ok(BandLink {
                    external_id: r.get(0)?,
                    slug: r.get(1)?,
                    display_name: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn get_bands_needing_album_sync(
        &self,
        shard: Shard,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<BandLink>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT external_id, slug, display_name FROM bands
             WHERE (external_id % ?1) = ?2
               AND (last_synced_at IS NULL OR last_synced_at < ?3)
             ORDER BY external_id",
        )?;
        let links = stmt
            .query_map(
                params![
                    shard.count() as i64,
                    shard.index() as i64,
                    Self::format_datetime(&stale_before)
                ],
                |r| {
                    Ok(BandLink {
                        external_id: r.get(0)?,
                        slug: r.get(1)?,
                        display_name: r.get(2)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn mark_band_synced(&self, external_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE bands SET last_synced_at = ?1 WHERE external_id = ?2",
            params![Self::format_datetime(&at), external_id],
        )?;
        Ok(())
    }

    fn get_album_id_by_external_id(&self, external_id: i64) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT rowid FROM albums WHERE external_id = ?1",
                params![external_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn upsert_album(&self, album: &NewAlbum) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT rowid FROM albums WHERE external_id = ?1",
                params![album.external_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let band_rowid = Self::get_band_rowid(&conn, album.band_external_id)?.with_context(|| {
            format!(
                "Band {} not found for album {}",
                album.band_external_id, album.external_id
            )
        })?;

        conn.execute(
            "INSERT INTO albums (external_id, band_rowid, display_name, release_type, release_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                album.external_id,
                band_rowid,
                album.display_name,
                album.release_type,
                Self::format_date(&album.release_date),
                Self::format_datetime(&Utc::now())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn upsert_tracks(&self, album_id: i64, tracks: &[NewTrack]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for track in tracks {
            inserted += tx.execute(
                "INSERT INTO tracks (album_rowid, track_number, title, duration_seconds)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(album_rowid, track_number, title) DO NOTHING",
                params![
                    album_id,
                    track.track_number,
                    track.title,
                    track.duration_seconds
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_album_tracks(&self, album_id: i64) -> Result<Vec<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rowid, album_rowid, title, track_number, duration_seconds
             FROM tracks WHERE album_rowid = ?1 ORDER BY track_number",
        )?;
        let tracks = stmt
            .query_map(params![album_id], |r| {
                Ok(TrackRecord {
                    id: r.get(0)?,
                    album_id: r.get(1)?,
                    title: r.get(2)?,
                    track_number: r.get(3)?,
                    duration_seconds: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    fn upsert_upcoming_release(&self, release: &NewUpcomingRelease) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let band_rowid =
            Self::get_band_rowid(&conn, release.band_external_id)?.with_context(|| {
                format!(
                    "Band {} not found for upcoming release {}",
                    release.band_external_id, release.album_external_id
                )
            })?;

        let changed = conn.execute(
            "INSERT INTO upcoming_releases
                (album_external_id, band_rowid, album_name, release_type, release_date, genre_tags, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(album_external_id) DO NOTHING",
            params![
                release.album_external_id,
                band_rowid,
                release.album_name,
                release.release_type,
                Self::format_date(&release.release_date),
                serde_json::to_string(&release.genre_tags)?,
                Self::format_datetime(&Utc::now())
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_upcoming_releases_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UpcomingReleaseRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT u.rowid, u.album_external_id, u.band_rowid, b.display_name, u.album_name,
                    u.release_type, u.release_date, u.genre_tags, u.captured_at
             FROM upcoming_releases u
             JOIN bands b ON b.rowid = u.band_rowid
             WHERE u.release_date >= ?1 AND u.release_date <= ?2
             ORDER BY u.release_date, u.album_external_id",
        )?;
        let records = stmt
            .query_map(
                params![
                    from.format("%Y-%m-%d").to_string(),
                    to.format("%Y-%m-%d").to_string()
                ],
                |r| {
                    let genre_json: String = r.get(7)?;
                    let captured_at: String = r.get(8)?;
                    Ok(UpcomingReleaseRecord {
                        id: r.get(0)?,
                        album_external_id: r.get(1)?,
                        band_id: r.get(2)?,
                        band_name: r.get(3)?,
                        album_name: r.get(4)?,
                        release_type: r.get(5)?,
                        release_date: Self::parse_date(r.get(6)?),
                        genre_tags: serde_json::from_str(&genre_json).unwrap_or_default(),
                        captured_at: Self::parse_datetime(&captured_at).unwrap_or_else(Utc::now),
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn get_bands_count(&self) -> usize {
        self.count("bands")
    }

    fn get_albums_count(&self) -> usize {
        self.count("albums")
    }

    fn get_tracks_count(&self) -> usize {
        self.count("tracks")
    }

    fn get_upcoming_count(&self) -> usize {
        self.count("upcoming_releases")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn make_store() -> (SqliteCatalogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCatalogStore::new(temp_dir.path().join("catalog.db")).unwrap();
        (store, temp_dir)
    }

    fn band(external_id: i64, name: &str) -> NewBand {
        NewBand {
            external_id,
            slug: name.to_lowercase().replace(' ', "_"),
            display_name: name.to_string(),
            country_of_origin: "Norway".to_string(),
            genre_tags: vec!["Black".to_string(), "Death".to_string()],
            lifecycle_status: "Active".to_string(),
        }
    }

    fn upcoming(album_external_id: i64, band_external_id: i64, name: &str) -> NewUpcomingRelease {
        NewUpcomingRelease {
            album_external_id,
            band_external_id,
            album_name: name.to_string(),
            release_type: "Full-length".to_string(),
            release_date: NaiveDate::from_ymd_opt(2030, 3, 1),
            genre_tags: vec!["Doom".to_string()],
        }
    }

    #[test]
    fn band_round_trip_keeps_genre_order() {
        let (store, _dir) = make_store();
        let mut b = band(10, "Zeal");
        b.genre_tags = vec!["Thrash".into(), "Avant Garde".into(), "Black".into()];
        store.upsert_bands(&[b]).unwrap();

        let stored = store.get_band_by_external_id(10).unwrap().unwrap();
        assert_eq!(stored.display_name, "Zeal");
        assert_eq!(stored.genre_tags, vec!["Thrash", "Avant Garde", "Black"]);
        assert_eq!(stored.follower_count, 0);
        assert!(stored.last_synced_at.is_none());
        assert!(store.get_band_by_external_id(11).unwrap().is_none());
    }

    #[test]
    fn reupsert_band_keeps_first_write() {
        let (store, _dir) = make_store();
        let first = store.upsert_bands(&[band(123, "Test Band")]).unwrap();
        assert_eq!(first.inserted, 1);

        let mut renamed = band(123, "Renamed Band");
        renamed.genre_tags = vec!["Grindcore".to_string()];
        let second = store.upsert_bands(&[renamed, band(124, "Other")]).unwrap();
        assert_eq!(
            second,
            UpsertOutcome {
                inserted: 1,
                ignored: 1
            }
        );

        let stored = store.get_band_by_external_id(123).unwrap().unwrap();
        assert_eq!(stored.display_name, "Test Band");
        assert_eq!(stored.genre_tags, vec!["Black", "Death"]);
        assert_eq!(store.get_bands_count(), 2);
    }

    #[test]
    fn upsert_album_returns_existing_id() {
        let (store, _dir) = make_store();
        store.upsert_bands(&[band(1, "A")]).unwrap();

        let album = NewAlbum {
            external_id: 500,
            band_external_id: 1,
            display_name: "First".to_string(),
            release_type: "Demo".to_string(),
            release_date: NaiveDate::from_ymd_opt(1996, 1, 2),
        };
        let id = store.upsert_album(&album).unwrap();

        let mut changed = album.clone();
        changed.display_name = "Changed".to_string();
        assert_eq!(store.upsert_album(&changed).unwrap(), id);
        assert_eq!(store.get_album_id_by_external_id(500).unwrap(), Some(id));
        assert_eq!(store.get_albums_count(), 1);
    }

    #[test]
    fn upsert_album_requires_band() {
        let (store, _dir) = make_store();
        let album = NewAlbum {
            external_id: 1,
            band_external_id: 999,
            display_name: "Orphan".to_string(),
            release_type: "Single".to_string(),
            release_date: None,
        };
        let err = store.upsert_album(&album).unwrap_err();
        assert!(err.to_string().contains("Band 999 not found"));
        assert_eq!(store.get_albums_count(), 0);
    }

    #[test]
    fn tracks_are_deduplicated() {
        let (store, _dir) = make_store();
        store.upsert_bands(&[band(1, "A")]).unwrap();
        let album_id = store
            .upsert_album(&NewAlbum {
                external_id: 7,
                band_external_id: 1,
                display_name: "LP".to_string(),
                release_type: "Full-length".to_string(),
                release_date: None,
            })
            .unwrap();

        let tracks = vec![
            NewTrack {
                track_number: 1,
                title: "Intro".to_string(),
                duration_seconds: Some(61),
            },
            NewTrack {
                track_number: 2,
                title: "Outro".to_string(),
                duration_seconds: None,
            },
        ];
        assert_eq!(store.upsert_tracks(album_id, &tracks).unwrap(), 2);
        assert_eq!(store.upsert_tracks(album_id, &tracks).unwrap(), 0);

        let stored = store.get_album_tracks(album_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].duration_seconds, Some(61));
        assert_eq!(stored[1].duration_seconds, None);
    }

    #[test]
    fn upcoming_release_is_captured_once() {
        let (store, _dir) = make_store();
        store.upsert_bands(&[band(1, "A")]).unwrap();

        assert!(store.upsert_upcoming_release(&upcoming(77, 1, "Original")).unwrap());
        let mut again = upcoming(77, 1, "Renamed");
        again.genre_tags = vec!["Sludge".to_string()];
        assert!(!store.upsert_upcoming_release(&again).unwrap());

        assert_eq!(store.get_upcoming_count(), 1);
        let from = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2030, 12, 31).unwrap();
        let records = store.get_upcoming_releases_between(from, to).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].album_name, "Original");
        assert_eq!(records[0].genre_tags, vec!["Doom"]);
        assert_eq!(records[0].band_name, "A");
    }

    #[test]
    fn upcoming_release_requires_band() {
        let (store, _dir) = make_store();
        assert!(store.upsert_upcoming_release(&upcoming(1, 42, "X")).is_err());
        assert_eq!(store.get_upcoming_count(), 0);
    }

    #[test]
    fn bands_needing_sync_respect_shard_and_staleness() {
        let (store, _dir) = make_store();
        let bands: Vec<NewBand> = (1..=6).map(|i| band(i, &format!("Band {}", i))).collect();
        store.upsert_bands(&bands).unwrap();

        let now = Utc::now();
        store.mark_band_synced(2, now).unwrap();
        store.mark_band_synced(4, now - Duration::days(60)).unwrap();

        let shard = Shard::new(0, 2).unwrap();
        let stale_before = now - Duration::days(30);
        let ids: Vec<i64> = store
            .get_bands_needing_album_sync(shard, stale_before)
            .unwrap()
            .into_iter()
            .map(|b| b.external_id)
            .collect();
        assert_eq!(ids, vec![4, 6]);

        let all: Vec<i64> = store
            .get_bands_needing_album_sync(Shard::ALL, stale_before)
            .unwrap()
            .into_iter()
            .map(|b| b.external_id)
            .collect();
        assert_eq!(all, vec![1, 3, 4, 5, 6]);
    }

    #[test]
    fn reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.db");
        {
            let store = SqliteCatalogStore::new(&path).unwrap();
            store.upsert_bands(&[band(1, "A")]).unwrap();
        }
        let store = SqliteCatalogStore::new(&path).unwrap();
        assert_eq!(store.get_bands_count(), 1);
        assert_eq!(store.get_all_band_external_links().unwrap().len(), 1);
    }
}
