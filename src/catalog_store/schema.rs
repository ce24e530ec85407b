//! SQLite schema definitions for the catalog database.
//!
//! Rows are keyed by an integer rowid; the numeric id assigned by the
//! upstream catalog is stored as `external_id` and is unique per table.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, OnDelete, SqlType, Table, VersionedSchema};

const BAND_FK: ForeignKey = ForeignKey {
    table: "bands",
    column: "rowid",
    on_delete: OnDelete::Cascade,
};

const ALBUM_FK: ForeignKey = ForeignKey {
    table: "albums",
    column: "rowid",
    on_delete: OnDelete::Cascade,
};

// =============================================================================
// Version 1 - Bands, albums, tracks
// =============================================================================

const BANDS_TABLE_V1: Table = Table {
    name: "bands",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("external_id", &SqlType::Integer, non_null = true),
        sqlite_column!("slug", &SqlType::Text, non_null = true),
        sqlite_column!("display_name", &SqlType::Text, non_null = true),
        sqlite_column!("country_of_origin", &SqlType::Text, non_null = true),
        sqlite_column!("lifecycle_status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "follower_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_synced_at", &SqlType::Text),
    ],
    indices: &[("idx_bands_last_synced", "last_synced_at")],
    unique_constraints: &[&["external_id"]],
};

/// Band <-> genre tag, `position` keeps first-occurrence order.
const BAND_GENRES_TABLE_V1: Table = Table {
    name: "band_genres",
    columns: &[
        sqlite_column!(
            "band_rowid",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&BAND_FK)
        ),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
        sqlite_column!("genre", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_band_genres_genre", "genre")],
    unique_constraints: &[&["band_rowid", "genre"]],
};

const ALBUMS_TABLE_V1: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("external_id", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "band_rowid",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&BAND_FK)
        ),
        sqlite_column!("display_name", &SqlType::Text, non_null = true),
        sqlite_column!("release_type", &SqlType::Text, non_null = true),
        sqlite_column!("release_date", &SqlType::Text), // YYYY-MM-DD, NULL when unparseable
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_albums_band", "band_rowid")],
    unique_constraints: &[&["external_id"]],
};

const TRACKS_TABLE_V1: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "album_rowid",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ALBUM_FK)
        ),
        sqlite_column!("track_number", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("duration_seconds", &SqlType::Integer),
    ],
    indices: &[("idx_tracks_album", "album_rowid")],
    unique_constraints: &[&["album_rowid", "track_number", "title"]],
};

// =============================================================================
// Version 2 - Upcoming releases
// =============================================================================

const UPCOMING_RELEASES_TABLE_V2: Table = Table {
    name: "upcoming_releases",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("album_external_id", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "band_rowid",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&BAND_FK)
        ),
        sqlite_column!("album_name", &SqlType::Text, non_null = true),
        sqlite_column!("release_type", &SqlType::Text, non_null = true),
        sqlite_column!("release_date", &SqlType::Text),
        sqlite_column!("genre_tags", &SqlType::Text, non_null = true), // JSON array snapshot
        sqlite_column!("captured_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_upcoming_release_date", "release_date")],
    unique_constraints: &[&["album_external_id"]],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    UPCOMING_RELEASES_TABLE_V2.create(conn)
}

/// Version 1: bands, band genres, albums, tracks
/// Version 2: upcoming releases
pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            BANDS_TABLE_V1,
            BAND_GENRES_TABLE_V1,
            ALBUMS_TABLE_V1,
            TRACKS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            BANDS_TABLE_V1,
            BAND_GENRES_TABLE_V1,
            ALBUMS_TABLE_V1,
            TRACKS_TABLE_V1,
            UPCOMING_RELEASES_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
