use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of persisted application settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    ExportPath,
    DisplayUnit,
}

impl SettingKey {
    pub const ALL: [SettingKey; 2] = [SettingKey::ExportPath, SettingKey::DisplayUnit];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::ExportPath => "export_path",
            SettingKey::DisplayUnit => "display_unit",
        }
    }

    /// Value assumed when no row has been written yet.
    pub fn default_value(self) -> &'static str {
        match self {
            SettingKey::ExportPath => "",
            SettingKey::DisplayUnit => "millions",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "export_path" => Ok(SettingKey::ExportPath),
            "display_unit" => Ok(SettingKey::DisplayUnit),
            other => Err(format!("unknown setting: {other}")),
        }
    }
}
