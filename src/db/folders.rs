//! Folder operations
//!
//! Membership is never stored on the folder row. It is read back from
//! `mods.folder_id`, ordered by each mod's position inside the folder.

use super::error::{Result, StoreError};
use super::schema::{DisplayItem, DisplayItemKind, FolderRecord};
use super::transaction::Session;
use super::{mods, Database};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

pub(crate) fn exists(s: &Session<'_>, folder_id: &str) -> Result<bool> {
    let count: i64 = s.conn().query_row(
        "SELECT COUNT(*) FROM folders WHERE id = ?1",
        params![folder_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Member ids for every folder that has at least one mod
fn memberships(s: &Session<'_>) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = s.conn().prepare(
        r#"
        SELECT id, folder_id FROM mods
        WHERE folder_id IS NOT NULL
        ORDER BY display_order_in_folder ASC, display_order ASC, id ASC
        "#,
    )?;

    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (mod_id, folder_id) = row?;
        members.entry(folder_id).or_default().push(mod_id);
    }
    Ok(members)
}

pub(crate) fn query_all(s: &Session<'_>) -> Result<Vec<FolderRecord>> {
    let mut stmt = s.conn().prepare(
        "SELECT id, name, color, display_order FROM folders ORDER BY display_order ASC, name ASC, id ASC",
    )?;
    let mut folders = stmt
        .query_map([], FolderRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut members = memberships(s)?;
    for folder in &mut folders {
        folder.mods = members.remove(&folder.id).unwrap_or_default();
    }
    Ok(folders)
}

pub(crate) fn find(s: &Session<'_>, folder_id: &str) -> Result<Option<FolderRecord>> {
    let folder = s
        .conn()
        .query_row(
            "SELECT id, name, color, display_order FROM folders WHERE id = ?1",
            params![folder_id],
            FolderRecord::from_row,
        )
        .optional()?;

    let Some(mut folder) = folder else {
        return Ok(None);
    };

    let mut stmt = s.conn().prepare(
        r#"
        SELECT id FROM mods WHERE folder_id = ?1
        ORDER BY display_order_in_folder ASC, display_order ASC, id ASC
        "#,
    )?;
    folder.mods = stmt
        .query_map(params![folder_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(Some(folder))
}

/// Store the folder row and pull every listed mod into it
pub(crate) fn upsert_in(s: &mut Session<'_>, folder: &FolderRecord) -> Result<FolderRecord> {
    s.transaction("upsert_folder", |s| {
        s.conn().execute(
            r#"
            INSERT INTO folders (id, name, color, display_order)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                color = excluded.color,
                display_order = excluded.display_order
            "#,
            params![folder.id, folder.name, folder.color, folder.display_order],
        )?;

        for mod_id in &folder.mods {
            if mods::find_by_id(s, mod_id)?.is_none() {
                tracing::debug!("Folder {} lists unknown mod {}, skipping", folder.id, mod_id);
                continue;
            }
            mods::move_to_folder_in(s, mod_id, Some(&folder.id))?;
        }

        find(s, &folder.id)?.ok_or_else(|| StoreError::not_found("folder", folder.id.as_str()))
    })
}

pub(crate) fn upsert_many_in(
    s: &mut Session<'_>,
    folders: &[FolderRecord],
) -> Result<Vec<FolderRecord>> {
    s.transaction("upsert_folders", |s| {
        folders.iter().map(|f| upsert_in(s, f)).collect()
    })
}

/// Remove the folder; its mods stay, with no folder
pub(crate) fn delete_in(s: &mut Session<'_>, folder_id: &str) -> Result<bool> {
    s.transaction("delete_folder", |s| {
        let released = s.conn().execute(
            "UPDATE mods SET folder_id = NULL, display_order_in_folder = 0 WHERE folder_id = ?1",
            params![folder_id],
        )?;
        let deleted = s
            .conn()
            .execute("DELETE FROM folders WHERE id = ?1", params![folder_id])?;
        tracing::debug!(
            "Deleted folder {} and released {} mods",
            folder_id,
            released
        );
        Ok(deleted > 0)
    })
}

pub(crate) fn reorder_in(s: &mut Session<'_>, ordered_ids: &[String]) -> Result<()> {
    s.transaction("reorder_folders", |s| {
        let mut stmt = s.conn().prepare("UPDATE folders SET display_order = ?1 WHERE id = ?2")?;
        for (position, id) in ordered_ids.iter().enumerate() {
            stmt.execute(params![position as i64, id])?;
        }
        Ok(())
    })
}

/// Set `display_order_in_folder` for mods of one folder; ids outside it are ignored
pub(crate) fn reorder_contents_in(
    s: &mut Session<'_>,
    folder_id: &str,
    ordered_ids: &[String],
) -> Result<()> {
    s.transaction("reorder_folder_contents", |s| {
        if !exists(s, folder_id)? {
            return Err(StoreError::not_found("folder", folder_id));
        }
        let mut stmt = s.conn().prepare(
            "UPDATE mods SET display_order_in_folder = ?1 WHERE id = ?2 AND folder_id = ?3",
        )?;
        for (position, id) in ordered_ids.iter().enumerate() {
            stmt.execute(params![position as i64, id, folder_id])?;
        }
        Ok(())
    })
}

/// One ordering across the top-level list of mods and folders
pub(crate) fn update_display_order_in(s: &mut Session<'_>, items: &[DisplayItem]) -> Result<()> {
    s.transaction("update_display_order", |s| {
        for (position, item) in items.iter().enumerate() {
            let sql = match item.kind {
                DisplayItemKind::Folder => "UPDATE folders SET display_order = ?1 WHERE id = ?2",
                DisplayItemKind::Mod => "UPDATE mods SET display_order = ?1 WHERE id = ?2",
            };
            s.conn().execute(sql, params![position as i64, item.id])?;
        }
        Ok(())
    })
}

impl Database {
    // ========== Folder Operations ==========

    /// All folders in display order, with their member mod ids
    pub async fn get_all_folders(&self) -> Result<Vec<FolderRecord>> {
        self.run("get_all_folders", false, |s| query_all(s)).await
    }

    pub async fn get_folder(&self, folder_id: &str) -> Result<Option<FolderRecord>> {
        self.run("get_folder", false, |s| find(s, folder_id)).await
    }

    /// Insert or update a folder; mods listed in `folder.mods` are moved into it
    pub async fn upsert_folder(&self, folder: &FolderRecord) -> Result<FolderRecord> {
        self.mutate(
            "upsert_folder",
            |list| {
                for m in list.iter_mut().filter(|m| folder.mods.contains(&m.id)) {
                    m.folder_id = Some(folder.id.clone());
                }
            },
            |s| upsert_in(s, folder),
        )
        .await
    }

    pub async fn upsert_folders(&self, folders: &[FolderRecord]) -> Result<Vec<FolderRecord>> {
        self.mutate(
            "upsert_folders",
            |list| {
                for folder in folders {
                    for m in list.iter_mut().filter(|m| folder.mods.contains(&m.id)) {
                        m.folder_id = Some(folder.id.clone());
                    }
                }
            },
            |s| upsert_many_in(s, folders),
        )
        .await
    }

    /// Delete a folder without deleting its mods
    pub async fn delete_folder(&self, folder_id: &str) -> Result<bool> {
        self.mutate(
            "delete_folder",
            |list| {
                for m in list
                    .iter_mut()
                    .filter(|m| m.folder_id.as_deref() == Some(folder_id))
                {
                    m.folder_id = None;
                    m.display_order_in_folder = 0;
                }
            },
            |s| delete_in(s, folder_id),
        )
        .await
    }

    /// Folder rows only; the mod list is unchanged so nothing is synced
    pub async fn reorder_folders(&self, ordered_ids: &[String]) -> Result<()> {
        self.run("reorder_folders", true, |s| reorder_in(s, ordered_ids))
            .await
    }

    pub async fn reorder_folder_contents(
        &self,
        folder_id: &str,
        ordered_ids: &[String],
    ) -> Result<()> {
        self.mutate(
            "reorder_folder_contents",
            |list| {
                for (position, id) in ordered_ids.iter().enumerate() {
                    if let Some(m) = list
                        .iter_mut()
                        .find(|m| m.id == *id && m.folder_id.as_deref() == Some(folder_id))
                    {
                        m.display_order_in_folder = position as i64;
                    }
                }
            },
            |s| reorder_contents_in(s, folder_id, ordered_ids),
        )
        .await
    }

    /// Apply the sidebar order, where mods and folders share one sequence
    pub async fn update_display_order(&self, items: &[DisplayItem]) -> Result<()> {
        self.mutate(
            "update_display_order",
            |list| {
                for (position, item) in items.iter().enumerate() {
                    if item.kind != DisplayItemKind::Mod {
                        continue;
                    }
                    if let Some(m) = list.iter_mut().find(|m| m.id == item.id) {
                        m.display_order = position as i64;
                    }
                }
                list.sort_by_key(|m| m.display_order);
            },
            |s| update_display_order_in(s, items),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::db::ModRecord;

    #[tokio::test]
    async fn test_delete_folder_keeps_mods() {
        let db = open_db().await;
        let m1 = db.upsert_mod(&ModRecord::new("M1", "/m1")).await.unwrap();
        let m2 = db.upsert_mod(&ModRecord::new("M2", "/m2")).await.unwrap();

        let mut folder = FolderRecord::new("Favourites", "#FF0088");
        folder.mods = vec![m1.id.clone(), m2.id.clone()];
        let folder = db.upsert_folder(&folder).await.unwrap();
        assert_eq!(folder.mods, vec![m1.id.clone(), m2.id.clone()]);

        assert!(db.delete_folder(&folder.id).await.unwrap());

        let mods = db.get_all_mods().await.unwrap();
        assert_eq!(mods.len(), 2);
        assert!(mods.iter().all(|m| m.folder_id.is_none()));
        assert!(db.get_folder(&folder.id).await.unwrap().is_none());
        assert!(db.get_all_folders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_membership_is_derived_from_mods() {
        let db = open_db().await;
        let folder = db
            .upsert_folder(&FolderRecord::new("F", "#00FF00"))
            .await
            .unwrap();
        let mut m = ModRecord::new("M", "/m");
        m.folder_id = Some(folder.id.clone());
        db.upsert_mod(&m).await.unwrap();

        let folders = db.get_all_folders().await.unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].mods, vec![m.id.clone()]);

        // Clearing the mod's folder empties the derived list
        m.folder_id = None;
        db.upsert_mod(&m).await.unwrap();
        assert!(db.get_all_folders().await.unwrap()[0].mods.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_folder_skips_unknown_mods() {
        let db = open_db().await;
        let mut folder = FolderRecord::new("F", "#00FF00");
        folder.mods = vec!["ghost".to_string()];
        let saved = db.upsert_folder(&folder).await.unwrap();
        assert!(saved.mods.is_empty());
    }

    #[tokio::test]
    async fn test_reorder_folders_and_contents() {
        let db = open_db().await;
        let a = db.upsert_folder(&FolderRecord::new("a", "#1")).await.unwrap();
        let b = db.upsert_folder(&FolderRecord::new("b", "#2")).await.unwrap();
        db.reorder_folders(&[b.id.clone(), a.id.clone()]).await.unwrap();

        let folders = db.get_all_folders().await.unwrap();
        assert_eq!(folders[0].id, b.id);
        assert_eq!(folders[0].display_order, 0);
        assert_eq!(folders[1].display_order, 1);

        let m1 = db.upsert_mod(&ModRecord::new("m1", "/m1")).await.unwrap();
        let m2 = db.upsert_mod(&ModRecord::new("m2", "/m2")).await.unwrap();
        db.move_mod_to_folder(&m1.id, Some(&a.id)).await.unwrap();
        db.move_mod_to_folder(&m2.id, Some(&a.id)).await.unwrap();
        db.reorder_folder_contents(&a.id, &[m2.id.clone(), m1.id.clone()])
            .await
            .unwrap();

        let a = db.get_folder(&a.id).await.unwrap().unwrap();
        assert_eq!(a.mods, vec![m2.id, m1.id]);
    }

    #[tokio::test]
    async fn test_update_display_order_mixed_items() {
        let db = open_db().await;
        let folder = db.upsert_folder(&FolderRecord::new("F", "#1")).await.unwrap();
        let x = db.upsert_mod(&ModRecord::new("x", "/x")).await.unwrap();
        let y = db.upsert_mod(&ModRecord::new("y", "/y")).await.unwrap();

        db.update_display_order(&[
            DisplayItem::mod_item(&y.id),
            DisplayItem::folder_item(&folder.id),
            DisplayItem::mod_item(&x.id),
        ])
        .await
        .unwrap();

        let mods = db.get_all_mods().await.unwrap();
        assert_eq!((mods[0].id.as_str(), mods[0].display_order), (y.id.as_str(), 0));
        assert_eq!((mods[1].id.as_str(), mods[1].display_order), (x.id.as_str(), 2));
        assert_eq!(db.get_folder(&folder.id).await.unwrap().unwrap().display_order, 1);
    }

    #[tokio::test]
    async fn test_batch_folder_upsert() {
        let db = open_db().await;
        let folders = vec![FolderRecord::new("one", "#1"), FolderRecord::new("two", "#2")];
        let saved = db.upsert_folders(&folders).await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(db.get_all_folders().await.unwrap().len(), 2);
    }
}
