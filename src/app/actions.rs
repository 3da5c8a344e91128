//! Maintenance commands run from the CLI

use super::App;
use crate::db::{FolderRecord, ModRecord};
use anyhow::{bail, Result};

fn folder_label(m: &ModRecord) -> &str {
    m.folder_id.as_deref().unwrap_or("-")
}

impl App {
    pub async fn cmd_migrate(&self) -> Result<()> {
        // App::new already ran ensure_schema; report what the ledger holds
        let applied = self.db.applied_migrations().await?;
        println!("Applied migrations:");
        println!("{:-<60}", "");
        for m in applied {
            println!("  {:<45} {}", m.migration_name, m.applied_at);
        }
        Ok(())
    }

    pub async fn cmd_mod_list(&self) -> Result<()> {
        let mods = self.db.get_all_mods().await?;

        if mods.is_empty() {
            println!("No mods in the store.");
            return Ok(());
        }

        println!("Mods:");
        println!("{:-<60}", "");
        for (i, m) in mods.iter().enumerate() {
            println!(
                "{:>3}. {} [{}] ({}) folder: {}",
                i + 1,
                m.name,
                m.engine.engine_type,
                m.id,
                folder_label(m)
            );
        }
        Ok(())
    }

    pub async fn cmd_mod_info(&self, id: &str) -> Result<()> {
        let Some(m) = self.db.get_mod(id).await? else {
            bail!("Mod '{}' not found", id);
        };

        println!("{}", m.name);
        println!("{:-<40}", "");
        println!("Id:          {}", m.id);
        println!("Path:        {}", m.path);
        if let Some(exe) = &m.executable_path {
            println!("Executable:  {}", exe);
        }
        println!("Engine:      {}", m.engine.engine_name);
        println!("Version:     {}", m.version.as_deref().unwrap_or("-"));
        println!("Folder:      {}", folder_label(&m));
        println!("Order:       {}", m.display_order);
        if let Some(played) = m.last_played {
            println!("Last played: {}", format_timestamp(played));
        }
        if let Some(added) = m.date_added {
            println!("Added:       {}", format_timestamp(added));
        }

        let profiles = self.db.get_profiles_for_mod(&m.id).await?;
        if !profiles.is_empty() {
            println!("Profiles:");
            for p in profiles {
                let enabled = p.mod_states.values().filter(|on| **on).count();
                println!("  {} ({}/{} enabled)", p.name, enabled, p.mod_states.len());
            }
        }
        Ok(())
    }

    pub async fn cmd_mod_remove(&self, id: &str) -> Result<()> {
        if self.db.delete_mod(id).await? {
            println!("Removed mod {}", id);
        } else {
            println!("No mod with id {}", id);
        }
        Ok(())
    }

    pub async fn cmd_mod_move(&self, id: &str, folder: Option<&str>) -> Result<()> {
        self.db.move_mod_to_folder(id, folder).await?;
        match folder {
            Some(f) => println!("Moved {} into folder {}", id, f),
            None => println!("Removed {} from its folder", id),
        }
        Ok(())
    }

    pub async fn cmd_folder_list(&self) -> Result<()> {
        let folders = self.db.get_all_folders().await?;

        if folders.is_empty() {
            println!("No folders.");
            return Ok(());
        }

        println!("Folders:");
        println!("{:-<60}", "");
        for f in folders {
            println!("{} {} ({}) - {} mods", f.color, f.name, f.id, f.mods.len());
        }
        Ok(())
    }

    pub async fn cmd_folder_create(&self, name: &str, color: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Folder name cannot be empty");
        }
        let folder = self.db.upsert_folder(&FolderRecord::new(name, color)).await?;
        println!("Created folder {} ({})", folder.name, folder.id);
        Ok(())
    }

    pub async fn cmd_folder_delete(&self, id: &str) -> Result<()> {
        if self.db.delete_folder(id).await? {
            println!("Deleted folder {}; its mods were kept", id);
        } else {
            println!("No folder with id {}", id);
        }
        Ok(())
    }

    pub async fn cmd_status(&self) -> Result<()> {
        let config = self.config.read().await;
        let mods = self.db.get_all_mods().await?;
        let folders = self.db.get_all_folders().await?;
        let migrations = self.db.applied_migrations().await?;
        let diag = self.db.diagnostics().await;

        println!("Store Status");
        println!("{:-<40}", "");
        println!("Database:     {}", config.database_file().display());
        let in_folders = mods.iter().filter(|m| m.folder_id.is_some()).count();
        println!("Mods:         {} ({} in folders)", mods.len(), in_folders);
        println!("Folders:      {}", folders.len());
        println!("Migrations:   {}", migrations.len());
        println!(
            "Transactions: {} started, {} committed, {} rolled back",
            diag.transactions.started, diag.transactions.committed, diag.transactions.rolled_back
        );
        println!("Mirror:       {} mods", self.mirror.len());
        Ok(())
    }
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
