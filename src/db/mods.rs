//! Mod operations

use super::error::{Result, StoreError};
use super::schema::{ModRecord, MOD_COLUMNS};
use super::transaction::Session;
use super::{unix_now, Database};
use rusqlite::{params, OptionalExtension};

fn select_sql(filter: &str) -> String {
    format!("SELECT {} FROM mods {}", MOD_COLUMNS, filter)
}

pub(crate) fn query_all(s: &Session<'_>) -> Result<Vec<ModRecord>> {
    let mut stmt = s
        .conn()
        .prepare(&select_sql("ORDER BY display_order ASC, name ASC, id ASC"))?;

    let mods = stmt
        .query_map([], ModRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(mods)
}

fn query_one(s: &Session<'_>, filter: &str, value: &str) -> Result<Option<ModRecord>> {
    s.conn()
        .query_row(&select_sql(filter), params![value], ModRecord::from_row)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn find_by_id(s: &Session<'_>, id: &str) -> Result<Option<ModRecord>> {
    query_one(s, "WHERE id = ?1", id)
}

pub(crate) fn find_by_path(s: &Session<'_>, path: &str) -> Result<Option<ModRecord>> {
    query_one(s, "WHERE path = ?1 ORDER BY display_order ASC LIMIT 1", path)
}

pub(crate) fn find_by_executable_path(s: &Session<'_>, path: &str) -> Result<Option<ModRecord>> {
    query_one(
        s,
        "WHERE executable_path = ?1 ORDER BY display_order ASC LIMIT 1",
        path,
    )
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

/// Insert or update a mod, resolving identity by id first and path second.
///
/// A record whose id is unknown but whose path matches an existing row takes
/// over that row's id, so reinstalling into the same folder updates in place.
/// `date_added` is kept from the stored row, or stamped now for new records.
pub(crate) fn upsert_in(s: &mut Session<'_>, m: &ModRecord) -> Result<ModRecord> {
    s.transaction("upsert_mod", |s| {
        let existing = match find_by_id(s, &m.id)? {
            Some(found) => Some(found),
            None => find_by_path(s, &m.path)?,
        };

        if let Some(owner) = find_by_path(s, &m.path)? {
            let target_id = existing.as_ref().map(|e| e.id.as_str()).unwrap_or(m.id.as_str());
            if owner.id != target_id {
                return Err(StoreError::PathConflict {
                    path: m.path.clone(),
                    existing_id: owner.id,
                });
            }
        }

        let mut record = m.clone();
        if let Some(existing) = &existing {
            if existing.id != m.id {
                tracing::debug!(
                    "Mod at '{}' already stored as {}, updating in place",
                    m.path,
                    existing.id
                );
            }
            record.id = existing.id.clone();
            record.date_added = record.date_added.or(existing.date_added);
        }
        if record.date_added.is_none() {
            record.date_added = Some(unix_now());
        }

        let engine_data = serde_json::to_string(&record.engine)?;
        let contributors = to_json(&record.contributors)?;
        let gamebanana = to_json(&record.gamebanana)?;

        s.conn().execute(
            r#"
            INSERT INTO mods (id, name, path, executable_path, icon_data, banner_data,
                              logo_data, logo_position, version, description, engine_data,
                              display_order, display_order_in_folder, folder_id, last_played,
                              date_added, save_terminal_output, contributors, gamebanana)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                path = excluded.path,
                executable_path = excluded.executable_path,
                icon_data = excluded.icon_data,
                banner_data = excluded.banner_data,
                logo_data = excluded.logo_data,
                logo_position = excluded.logo_position,
                version = excluded.version,
                description = excluded.description,
                engine_data = excluded.engine_data,
                display_order = excluded.display_order,
                display_order_in_folder = excluded.display_order_in_folder,
                folder_id = excluded.folder_id,
                last_played = excluded.last_played,
                date_added = excluded.date_added,
                save_terminal_output = excluded.save_terminal_output,
                contributors = excluded.contributors,
                gamebanana = excluded.gamebanana
            "#,
            params![
                record.id,
                record.name,
                record.path,
                record.executable_path,
                record.icon_data,
                record.banner_data,
                record.logo_data,
                record.logo_position.map(|p| p.as_str()),
                record.version,
                record.description,
                engine_data,
                record.display_order,
                record.display_order_in_folder,
                record.folder_id,
                record.last_played,
                record.date_added,
                record.save_terminal_output as i32,
                contributors,
                gamebanana,
            ],
        )?;

        Ok(record)
    })
}

pub(crate) fn upsert_many_in(s: &mut Session<'_>, mods: &[ModRecord]) -> Result<Vec<ModRecord>> {
    s.transaction("upsert_mods", |s| {
        mods.iter().map(|m| upsert_in(s, m)).collect()
    })
}

/// Delete a mod and its engine-mod profiles. Returns whether a row was removed.
pub(crate) fn delete_in(s: &mut Session<'_>, mod_id: &str) -> Result<bool> {
    s.transaction("delete_mod", |s| {
        let profiles = super::profiles::delete_for_parent_in(s, mod_id)?;
        let deleted = s
            .conn()
            .execute("DELETE FROM mods WHERE id = ?1", params![mod_id])?;
        if profiles > 0 {
            tracing::debug!("Deleted {} profiles with mod {}", profiles, mod_id);
        }
        Ok(deleted > 0)
    })
}

/// Point a mod at a folder (or at none). Moving into the folder it is already
/// in leaves its position untouched; otherwise it is appended at the end.
pub(crate) fn move_to_folder_in(
    s: &mut Session<'_>,
    mod_id: &str,
    folder_id: Option<&str>,
) -> Result<()> {
    s.transaction("move_mod_to_folder", |s| {
        let current = find_by_id(s, mod_id)?.ok_or_else(|| StoreError::not_found("mod", mod_id))?;

        let Some(folder_id) = folder_id else {
            s.conn().execute(
                "UPDATE mods SET folder_id = NULL, display_order_in_folder = 0 WHERE id = ?1",
                params![mod_id],
            )?;
            return Ok(());
        };

        if !super::folders::exists(s, folder_id)? {
            return Err(StoreError::not_found("folder", folder_id));
        }

        if current.folder_id.as_deref() == Some(folder_id) {
            tracing::debug!("Mod {} already in folder {}", mod_id, folder_id);
            return Ok(());
        }

        let next_position: i64 = s.conn().query_row(
            "SELECT COALESCE(MAX(display_order_in_folder) + 1, 0) FROM mods WHERE folder_id = ?1",
            params![folder_id],
            |row| row.get(0),
        )?;
        s.conn().execute(
            "UPDATE mods SET folder_id = ?1, display_order_in_folder = ?2 WHERE id = ?3",
            params![folder_id, next_position, mod_id],
        )?;
        Ok(())
    })
}

/// Set `display_order` to each id's index in `ordered_ids`
pub(crate) fn reorder_in(s: &mut Session<'_>, ordered_ids: &[String]) -> Result<()> {
    s.transaction("reorder_mods", |s| {
        let mut stmt = s.conn().prepare("UPDATE mods SET display_order = ?1 WHERE id = ?2")?;
        for (position, id) in ordered_ids.iter().enumerate() {
            if stmt.execute(params![position as i64, id])? == 0 {
                tracing::debug!("Skipping unknown mod {} while reordering", id);
            }
        }
        Ok(())
    })
}

/// Mirror of [`upsert_in`] applied to an in-memory list, for optimistic sync
pub(crate) fn apply_upsert(mods: &mut Vec<ModRecord>, m: &ModRecord) {
    let position = mods
        .iter()
        .position(|e| e.id == m.id)
        .or_else(|| mods.iter().position(|e| e.path == m.path));

    match position {
        Some(i) => {
            let mut record = m.clone();
            record.id = mods[i].id.clone();
            record.date_added = record.date_added.or(mods[i].date_added);
            mods[i] = record;
        }
        None => mods.push(m.clone()),
    }
    mods.sort_by(|a, b| {
        (a.display_order, &a.name, &a.id).cmp(&(b.display_order, &b.name, &b.id))
    });
}

impl Database {
    // ========== Mod Operations ==========

    /// All mods in display order
    pub async fn get_all_mods(&self) -> Result<Vec<ModRecord>> {
        self.run("get_all_mods", false, |s| query_all(s)).await
    }

    pub async fn get_mod(&self, mod_id: &str) -> Result<Option<ModRecord>> {
        self.run("get_mod", false, |s| find_by_id(s, mod_id)).await
    }

    /// Lookup used by the installer to decide between fresh install and update
    pub async fn get_mod_by_path(&self, path: &str) -> Result<Option<ModRecord>> {
        self.run("get_mod_by_path", false, |s| find_by_path(s, path))
            .await
    }

    pub async fn get_mod_by_executable_path(&self, path: &str) -> Result<Option<ModRecord>> {
        self.run("get_mod_by_executable_path", false, |s| {
            find_by_executable_path(s, path)
        })
        .await
    }

    /// Insert or update one mod, returning the record as stored
    pub async fn upsert_mod(&self, m: &ModRecord) -> Result<ModRecord> {
        self.mutate("upsert_mod", |mods| apply_upsert(mods, m), |s| upsert_in(s, m))
            .await
    }

    /// Insert or update several mods; either all are stored or none are
    pub async fn upsert_mods(&self, mods: &[ModRecord]) -> Result<Vec<ModRecord>> {
        self.mutate(
            "upsert_mods",
            |list| {
                for m in mods {
                    apply_upsert(list, m);
                }
            },
            |s| upsert_many_in(s, mods),
        )
        .await
    }

    /// Delete a mod; its engine-mod profiles go with it
    pub async fn delete_mod(&self, mod_id: &str) -> Result<bool> {
        self.mutate(
            "delete_mod",
            |mods| mods.retain(|m| m.id != mod_id),
            |s| delete_in(s, mod_id),
        )
        .await
    }

    /// Move a mod into a folder, or out of any folder with `None`
    pub async fn move_mod_to_folder(&self, mod_id: &str, folder_id: Option<&str>) -> Result<()> {
        self.mutate(
            "move_mod_to_folder",
            |mods| {
                if let Some(m) = mods.iter_mut().find(|m| m.id == mod_id) {
                    m.folder_id = folder_id.map(ToOwned::to_owned);
                }
            },
            |s| move_to_folder_in(s, mod_id, folder_id),
        )
        .await
    }

    /// Assign `display_order` 0..n following `ordered_ids`
    pub async fn reorder_mods(&self, ordered_ids: &[String]) -> Result<()> {
        self.mutate(
            "reorder_mods",
            |mods| {
                for m in mods.iter_mut() {
                    if let Some(i) = ordered_ids.iter().position(|id| *id == m.id) {
                        m.display_order = i as i64;
                    }
                }
                mods.sort_by_key(|m| m.display_order);
            },
            |s| reorder_in(s, ordered_ids),
        )
        .await
    }

    /// Record the end of a play session
    pub async fn update_last_played(&self, mod_id: &str, timestamp: i64) -> Result<()> {
        self.mutate(
            "update_last_played",
            |mods| {
                if let Some(m) = mods.iter_mut().find(|m| m.id == mod_id) {
                    m.last_played = Some(timestamp);
                }
            },
            |s| {
                let updated = s.conn().execute(
                    "UPDATE mods SET last_played = ?1 WHERE id = ?2",
                    params![timestamp, mod_id],
                )?;
                if updated == 0 {
                    return Err(StoreError::not_found("mod", mod_id));
                }
                Ok(())
            },
        )
        .await
    }
}
