//! Engine-mod profile operations

use super::error::{Result, StoreError};
use super::schema::ProfileRecord;
use super::transaction::Session;
use super::{mods, unix_now, Database};
use rusqlite::{params, OptionalExtension};

const PROFILE_COLUMNS: &str =
    "id, name, icon_data, parent_mod_id, mod_states, created_at, updated_at";

pub(crate) fn query_for_parent(s: &Session<'_>, parent_mod_id: &str) -> Result<Vec<ProfileRecord>> {
    let mut stmt = s.conn().prepare(&format!(
        "SELECT {} FROM engine_mod_profiles WHERE parent_mod_id = ?1 ORDER BY created_at ASC, name ASC",
        PROFILE_COLUMNS
    ))?;
    let profiles = stmt
        .query_map(params![parent_mod_id], ProfileRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(profiles)
}

pub(crate) fn find(s: &Session<'_>, profile_id: &str) -> Result<Option<ProfileRecord>> {
    s.conn()
        .query_row(
            &format!(
                "SELECT {} FROM engine_mod_profiles WHERE id = ?1",
                PROFILE_COLUMNS
            ),
            params![profile_id],
            ProfileRecord::from_row,
        )
        .optional()
        .map_err(Into::into)
}

/// Store a profile. The parent mod must exist. `created_at` is kept from the
/// stored row (or stamped now) and `updated_at` always moves to now.
pub(crate) fn upsert_in(s: &mut Session<'_>, profile: &ProfileRecord) -> Result<ProfileRecord> {
    s.transaction("upsert_profile", |s| {
        if mods::find_by_id(s, &profile.parent_mod_id)?.is_none() {
            return Err(StoreError::not_found("mod", profile.parent_mod_id.as_str()));
        }

        let now = unix_now();
        let mut record = profile.clone();
        if let Some(existing) = find(s, &profile.id)? {
            record.created_at = existing.created_at;
        }
        if record.created_at == 0 {
            record.created_at = now;
        }
        record.updated_at = now;

        let mod_states = serde_json::to_string(&record.mod_states)?;
        s.conn().execute(
            r#"
            INSERT INTO engine_mod_profiles (id, name, icon_data, parent_mod_id, mod_states,
                                             created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                icon_data = excluded.icon_data,
                parent_mod_id = excluded.parent_mod_id,
                mod_states = excluded.mod_states,
                updated_at = excluded.updated_at
            "#,
            params![
                record.id,
                record.name,
                record.icon_data,
                record.parent_mod_id,
                mod_states,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(record)
    })
}

pub(crate) fn delete_for_parent_in(s: &mut Session<'_>, parent_mod_id: &str) -> Result<usize> {
    let deleted = s.conn().execute(
        "DELETE FROM engine_mod_profiles WHERE parent_mod_id = ?1",
        params![parent_mod_id],
    )?;
    Ok(deleted)
}

impl Database {
    // ========== Profile Operations ==========

    /// Profiles owned by an engine mod, oldest first
    pub async fn get_profiles_for_mod(&self, parent_mod_id: &str) -> Result<Vec<ProfileRecord>> {
        self.run("get_profiles_for_mod", false, |s| {
            query_for_parent(s, parent_mod_id)
        })
        .await
    }

    pub async fn get_profile(&self, profile_id: &str) -> Result<Option<ProfileRecord>> {
        self.run("get_profile", false, |s| find(s, profile_id)).await
    }

    pub async fn upsert_profile(&self, profile: &ProfileRecord) -> Result<ProfileRecord> {
        let saved = self
            .run("upsert_profile", true, |s| upsert_in(s, profile))
            .await?;
        tracing::info!(
            "Saved profile '{}' for mod {}",
            saved.name,
            saved.parent_mod_id
        );
        Ok(saved)
    }

    pub async fn delete_profile(&self, profile_id: &str) -> Result<bool> {
        let deleted = self
            .run("delete_profile", false, |s| {
                s.conn()
                    .execute(
                        "DELETE FROM engine_mod_profiles WHERE id = ?1",
                        params![profile_id],
                    )
                    .map_err(Into::into)
            })
            .await?;
        Ok(deleted > 0)
    }
}
