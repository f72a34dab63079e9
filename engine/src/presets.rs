// --- Geometry presets (SQLite) ------------------------------------------------
//
// Named window rectangles an operator can recall with one call. The store is
// an in-memory map mirrored to a single SQLite table; every mutation rewrites
// the affected row inside a transaction.
//
// rusqlite is synchronous, so callers on the runtime go through
// `spawn_blocking` (see `load_presets_or_default` / `persist_*`).

use std::collections::BTreeMap;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::player::Geometry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub geometry: Geometry,
    #[serde(default)]
    pub description: String,
}

pub type Presets = BTreeMap<String, PresetEntry>;

fn db_init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS geometry_presets (
            name        TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            x           INTEGER NOT NULL,
            y           INTEGER NOT NULL,
            width       INTEGER NOT NULL,
            height      INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

pub fn db_load_presets(conn: &Connection) -> anyhow::Result<Presets> {
    db_init(conn)?;

    let mut stmt = conn.prepare(
        "SELECT name, description, x, y, width, height FROM geometry_presets ORDER BY name ASC",
    )?;
    let mut rows = stmt.query([])?;

    let mut out = Presets::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        out.insert(
            name,
            PresetEntry {
                description: row.get(1)?,
                geometry: Geometry {
                    x: row.get(2)?,
                    y: row.get(3)?,
                    width: row.get(4)?,
                    height: row.get(5)?,
                },
            },
        );
    }
    Ok(out)
}

pub fn db_save_preset(conn: &mut Connection, name: &str, entry: &PresetEntry) -> anyhow::Result<()> {
    db_init(conn)?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO geometry_presets (name, description, x, y, width, height)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(name) DO UPDATE SET
            description = excluded.description,
            x = excluded.x,
            y = excluded.y,
            width = excluded.width,
            height = excluded.height",
        params![
            name,
            entry.description,
            entry.geometry.x,
            entry.geometry.y,
            entry.geometry.width,
            entry.geometry.height
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// Returns whether a row was removed.
pub fn db_delete_preset(conn: &mut Connection, name: &str) -> anyhow::Result<bool> {
    db_init(conn)?;
    let n = conn.execute("DELETE FROM geometry_presets WHERE name = ?1", params![name])?;
    Ok(n > 0)
}

/// Layouts for a 1920x1080 panel, seeded on first start.
pub fn default_presets() -> Presets {
    let g = |x, y, width, height| Geometry { x, y, width, height };
    [
        ("fullscreen", "Full screen", g(0, 0, 1920, 1080)),
        ("left-half", "Left half of screen", g(0, 0, 960, 1080)),
        ("right-half", "Right half of screen", g(960, 0, 960, 1080)),
        ("top-half", "Top half of screen", g(0, 0, 1920, 540)),
        ("bottom-half", "Bottom half of screen", g(0, 540, 1920, 540)),
        ("center-large", "Centered 80% size", g(192, 108, 1536, 864)),
        ("corner-pip", "Picture-in-picture (bottom right)", g(1280, 720, 640, 360)),
    ]
    .into_iter()
    .map(|(name, description, geometry)| {
        (
            name.to_string(),
            PresetEntry {
                geometry,
                description: description.to_string(),
            },
        )
    })
    .collect()
}

/// Load presets, seeding the defaults into an empty table.
pub fn db_load_or_seed(conn: &mut Connection) -> anyhow::Result<Presets> {
    let existing = db_load_presets(conn)?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    let defaults = default_presets();
    for (name, entry) in &defaults {
        db_save_preset(conn, name, entry)?;
    }
    info!("seeded {} default presets", defaults.len());
    Ok(defaults)
}

pub async fn load_presets_or_default(db_path: String) -> Presets {
    let res = tokio::task::spawn_blocking(move || -> anyhow::Result<Presets> {
        let mut conn = Connection::open(db_path)?;
        db_load_or_seed(&mut conn)
    })
    .await;

    match res {
        Ok(Ok(p)) => {
            info!("loaded {} presets", p.len());
            p
        }
        Ok(Err(e)) => {
            warn!("failed to load presets from sqlite, using defaults: {e}");
            default_presets()
        }
        Err(e) => {
            warn!("failed to join preset load task, using defaults: {e}");
            default_presets()
        }
    }
}

pub async fn persist_preset(db_path: String, name: String, entry: PresetEntry) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn = Connection::open(db_path)?;
        db_save_preset(&mut conn, &name, &entry)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))?
}

pub async fn persist_delete(db_path: String, name: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        let mut conn = Connection::open(db_path)?;
        db_delete_preset(&mut conn, &name)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("presets.db")).unwrap();
        (dir, conn)
    }

    #[test]
    fn empty_db_is_seeded_with_defaults() {
        let (_dir, mut conn) = open_temp();
        let presets = db_load_or_seed(&mut conn).unwrap();
        assert_eq!(presets.len(), 7);
        assert_eq!(
            presets["corner-pip"].geometry,
            Geometry { x: 1280, y: 720, width: 640, height: 360 }
        );

        // Seeding happens once; a second load reads what is stored.
        assert_eq!(db_load_presets(&conn).unwrap(), presets);
    }

    #[test]
    fn save_replaces_existing_entry() {
        let (_dir, mut conn) = open_temp();
        let entry = PresetEntry {
            geometry: Geometry { x: 10, y: 20, width: 300, height: 200 },
            description: "lobby".into(),
        };
        db_save_preset(&mut conn, "lobby", &entry).unwrap();

        let moved = PresetEntry {
            geometry: Geometry { x: 0, y: 0, width: 300, height: 200 },
            description: String::new(),
        };
        db_save_preset(&mut conn, "lobby", &moved).unwrap();

        let all = db_load_presets(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["lobby"], moved);
    }

    #[test]
    fn delete_reports_whether_anything_was_removed() {
        let (_dir, mut conn) = open_temp();
        db_load_or_seed(&mut conn).unwrap();
        assert!(db_delete_preset(&mut conn, "top-half").unwrap());
        assert!(!db_delete_preset(&mut conn, "top-half").unwrap());
        assert_eq!(db_load_presets(&conn).unwrap().len(), 6);
    }

    #[test]
    fn preset_map_serializes_by_name() {
        let v = serde_json::to_value(default_presets()).unwrap();
        assert_eq!(v["left-half"]["geometry"]["width"], 960);
        assert_eq!(v["left-half"]["description"], "Left half of screen");
    }
}
