//! Database record types

use rusqlite::Row;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Display order given to records that were never explicitly placed
pub const DEFAULT_DISPLAY_ORDER: i64 = 9999;

/// Column list shared by every mod query, in [`ModRecord::from_row`] order
pub(crate) const MOD_COLUMNS: &str = "id, name, path, executable_path, icon_data, banner_data, \
     logo_data, logo_position, version, description, engine_data, display_order, \
     display_order_in_folder, folder_id, last_played, date_added, save_terminal_output, \
     contributors, gamebanana";

/// Game-engine variant a mod targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EngineType {
    #[default]
    Unknown,
    Psych,
    Vanilla,
    Codename,
    Kade,
    FpsPlus,
    PreVSlice,
    Other(String),
}

impl EngineType {
    pub fn as_str(&self) -> &str {
        match self {
            EngineType::Unknown => "unknown",
            EngineType::Psych => "psych",
            EngineType::Vanilla => "vanilla",
            EngineType::Codename => "codename",
            EngineType::Kade => "kade",
            EngineType::FpsPlus => "fps-plus",
            EngineType::PreVSlice => "prevslice",
            EngineType::Other(tag) => tag,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            EngineType::Unknown => "Unknown Engine",
            EngineType::Psych => "Psych Engine",
            EngineType::Vanilla => "V-Slice",
            EngineType::Codename => "Codename Engine",
            EngineType::Kade => "Kade Engine",
            EngineType::FpsPlus => "FPS Plus",
            EngineType::PreVSlice => "Pre-V-Slice",
            EngineType::Other(tag) => tag,
        }
    }
}

impl From<String> for EngineType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "unknown" => EngineType::Unknown,
            "psych" => EngineType::Psych,
            "vanilla" => EngineType::Vanilla,
            "codename" => EngineType::Codename,
            "kade" => EngineType::Kade,
            "fps-plus" | "fpsplus" => EngineType::FpsPlus,
            "prevslice" | "pre-vslice" => EngineType::PreVSlice,
            _ => EngineType::Other(value),
        }
    }
}

impl From<EngineType> for String {
    fn from(value: EngineType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine description embedded in every mod, stored as JSON in `engine_data`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub engine_type: EngineType,
    pub engine_name: String,
    /// Base64 encoded engine icon
    pub engine_icon: String,
    /// Whether the engine has a dedicated mods folder
    pub mods_folder: bool,
    pub mods_folder_path: Option<String>,
}

impl Engine {
    pub fn new(engine_type: EngineType) -> Self {
        Self {
            engine_name: engine_type.display_name().to_string(),
            engine_type,
            ..Self::default()
        }
    }
}

/// Where the logo sits on the banner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoPosition {
    LeftBottom,
    LeftMiddle,
    Middle,
}

impl LogoPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoPosition::LeftBottom => "left_bottom",
            LogoPosition::LeftMiddle => "left_middle",
            LogoPosition::Middle => "middle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "left_bottom" => Some(LogoPosition::LeftBottom),
            "left_middle" => Some(LogoPosition::LeftMiddle),
            "middle" => Some(LogoPosition::Middle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    /// Path relative to the mod's metadata folder, or base64 data
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorGroup {
    pub group: String,
    pub members: Vec<Contributor>,
}

/// Link back to the GameBanana submission a mod was installed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBananaLink {
    pub id: i64,
    pub url: String,
    pub model_type: String,
}

/// Mod database record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub executable_path: Option<String>,
    pub icon_data: Option<String>,
    pub banner_data: Option<String>,
    pub logo_data: Option<String>,
    pub logo_position: Option<LogoPosition>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub engine: Engine,
    pub display_order: i64,
    pub display_order_in_folder: i64,
    pub folder_id: Option<String>,
    /// Unix timestamp (seconds)
    pub last_played: Option<i64>,
    /// Unix timestamp (seconds)
    pub date_added: Option<i64>,
    pub save_terminal_output: bool,
    pub contributors: Option<Vec<ContributorGroup>>,
    pub gamebanana: Option<GameBananaLink>,
}

impl ModRecord {
    /// A fresh record with a new id and default placement
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            path: path.into(),
            executable_path: None,
            icon_data: None,
            banner_data: None,
            logo_data: None,
            logo_position: None,
            version: None,
            description: None,
            engine: Engine::default(),
            display_order: DEFAULT_DISPLAY_ORDER,
            display_order_in_folder: 0,
            folder_id: None,
            last_played: None,
            date_added: None,
            save_terminal_output: false,
            contributors: None,
            gamebanana: None,
        }
    }

    /// Map a row selected with [`MOD_COLUMNS`].
    ///
    /// Scalar columns must have the expected SQLite type; embedded JSON values
    /// that fail to parse fall back to their defaults with a warning.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;

        let engine = match row.get::<_, Option<String>>(10)? {
            Some(raw) => parse_embedded(&id, "engine_data", &raw).unwrap_or_default(),
            None => Engine::default(),
        };
        let logo_position = row
            .get::<_, Option<String>>(7)?
            .and_then(|raw| LogoPosition::parse(&raw));
        let contributors = row
            .get::<_, Option<String>>(17)?
            .and_then(|raw| parse_embedded(&id, "contributors", &raw));
        let gamebanana = row
            .get::<_, Option<String>>(18)?
            .and_then(|raw| parse_embedded(&id, "gamebanana", &raw));

        Ok(Self {
            name: row.get(1)?,
            path: row.get(2)?,
            executable_path: row.get(3)?,
            icon_data: row.get(4)?,
            banner_data: row.get(5)?,
            logo_data: row.get(6)?,
            logo_position,
            version: row.get(8)?,
            description: row.get(9)?,
            engine,
            display_order: row
                .get::<_, Option<i64>>(11)?
                .unwrap_or(DEFAULT_DISPLAY_ORDER),
            display_order_in_folder: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
            folder_id: row.get(13)?,
            last_played: row.get(14)?,
            date_added: row.get(15)?,
            save_terminal_output: row.get::<_, Option<i64>>(16)?.unwrap_or(0) != 0,
            contributors,
            gamebanana,
            id,
        })
    }
}

/// Parse an embedded JSON column, logging and discarding corrupt values.
fn parse_embedded<T: DeserializeOwned>(record_id: &str, column: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} for record {}, using default: {}",
                column,
                record_id,
                e
            );
            None
        }
    }
}

/// Folder database record; `mods` is derived from `mods.folder_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    pub color: String,
    pub display_order: i64,
    pub mods: Vec<String>,
}

impl FolderRecord {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            color: color.into(),
            display_order: DEFAULT_DISPLAY_ORDER,
            mods: Vec::new(),
        }
    }

    /// Map `SELECT id, name, color, display_order FROM folders`
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            color: row.get(2)?,
            display_order: row
                .get::<_, Option<i64>>(3)?
                .unwrap_or(DEFAULT_DISPLAY_ORDER),
            mods: Vec::new(),
        })
    }
}

/// Named snapshot of which sub-mods inside an engine's mods folder are enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub name: String,
    pub icon_data: Option<String>,
    pub parent_mod_id: String,
    /// Sub-mod folder path -> enabled
    pub mod_states: BTreeMap<String, bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProfileRecord {
    pub fn new(name: impl Into<String>, parent_mod_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            icon_data: None,
            parent_mod_id: parent_mod_id.into(),
            mod_states: BTreeMap::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Map `SELECT id, name, icon_data, parent_mod_id, mod_states, created_at, updated_at`
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        let mod_states = row
            .get::<_, Option<String>>(4)?
            .and_then(|raw| parse_embedded(&id, "mod_states", &raw))
            .unwrap_or_default();

        Ok(Self {
            name: row.get(1)?,
            icon_data: row.get(2)?,
            parent_mod_id: row.get(3)?,
            mod_states,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            id,
        })
    }
}

/// Kind of entry in the mixed sidebar ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayItemKind {
    Mod,
    Folder,
}

/// One position in the top-level list, which interleaves mods and folders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DisplayItemKind,
}

impl DisplayItem {
    pub fn mod_item(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DisplayItemKind::Mod,
        }
    }

    pub fn folder_item(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DisplayItemKind::Folder,
        }
    }
}

/// Applied migration, as recorded in `schema_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub migration_name: String,
    pub applied_at: String,
}

impl MigrationRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            migration_name: row.get(0)?,
            applied_at: row.get(1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_type_round_trips_known_tags() {
        for tag in ["psych", "vanilla", "codename", "kade", "fps-plus", "prevslice"] {
            let parsed = EngineType::from(tag.to_string());
            assert!(!matches!(parsed, EngineType::Other(_)), "{}", tag);
            assert_eq!(parsed.as_str(), tag);
        }
    }

    #[test]
    fn test_engine_type_keeps_unknown_tags() {
        let parsed = EngineType::from("ludum".to_string());
        assert_eq!(parsed, EngineType::Other("ludum".to_string()));
        assert_eq!(parsed.as_str(), "ludum");
    }

    #[test]
    fn test_engine_defaults_for_missing_fields() {
        let engine: Engine = serde_json::from_str(r#"{"engine_type":"psych"}"#).unwrap();
        assert_eq!(engine.engine_type, EngineType::Psych);
        assert!(!engine.mods_folder);
        assert_eq!(engine.mods_folder_path, None);
    }

    #[test]
    fn test_engine_json_shape() {
        let mut engine = Engine::new(EngineType::Psych);
        engine.mods_folder = true;
        engine.mods_folder_path = Some("mods".to_string());
        let value = serde_json::to_value(&engine).unwrap();
        assert_eq!(value["engine_type"], "psych");
        assert_eq!(value["engine_name"], "Psych Engine");
        assert_eq!(value["mods_folder"], true);
        assert_eq!(value["mods_folder_path"], "mods");
    }

    #[test]
    fn test_new_mod_defaults() {
        let m = ModRecord::new("Foo", "/m1");
        assert_eq!(m.display_order, DEFAULT_DISPLAY_ORDER);
        assert_eq!(m.engine, Engine::default());
        assert!(uuid::Uuid::parse_str(&m.id).is_ok());
    }

    #[test]
    fn test_display_item_serializes_type_tag() {
        let value = serde_json::to_value(DisplayItem::folder_item("f1")).unwrap();
        assert_eq!(value["type"], "folder");
        assert_eq!(value["id"], "f1");
    }
}
