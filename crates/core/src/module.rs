//! Module catalogue: the business modules that exchange events and own entities.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A business module that owns a family of entities.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Users,
    Projects,
    Tasks,
    Leads,
    EmailLists,
    EmailCampaigns,
    Posts,
    UniverseInstances,
    Workflows,
    AuraChats,
    MediaFolders,
    Analytics,
    Activities,
    Notifications,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 14] = [
        ModuleKind::Users,
        ModuleKind::Projects,
        ModuleKind::Tasks,
        ModuleKind::Leads,
        ModuleKind::EmailLists,
        ModuleKind::EmailCampaigns,
        ModuleKind::Posts,
        ModuleKind::UniverseInstances,
        ModuleKind::Workflows,
        ModuleKind::AuraChats,
        ModuleKind::MediaFolders,
        ModuleKind::Analytics,
        ModuleKind::Activities,
        ModuleKind::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Users => "users",
            ModuleKind::Projects => "projects",
            ModuleKind::Tasks => "tasks",
            ModuleKind::Leads => "leads",
            ModuleKind::EmailLists => "email_lists",
            ModuleKind::EmailCampaigns => "email_campaigns",
            ModuleKind::Posts => "posts",
            ModuleKind::UniverseInstances => "universe_instances",
            ModuleKind::Workflows => "workflows",
            ModuleKind::AuraChats => "aura_chats",
            ModuleKind::MediaFolders => "media_folders",
            ModuleKind::Analytics => "analytics",
            ModuleKind::Activities => "activities",
            ModuleKind::Notifications => "notifications",
        }
    }
}

impl core::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DomainError::unknown_kind(format!("module '{s}'")))
    }
}

/// Entity kinds that can act as the root of a relationship lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    User,
    Project,
    Lead,
}

impl RootKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootKind::User => "user",
            RootKind::Project => "project",
            RootKind::Lead => "lead",
        }
    }

    /// The module that stores entities of this kind.
    pub fn module(&self) -> ModuleKind {
        match self {
            RootKind::User => ModuleKind::Users,
            RootKind::Project => ModuleKind::Projects,
            RootKind::Lead => ModuleKind::Leads,
        }
    }
}

impl core::fmt::Display for RootKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RootKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(RootKind::User),
            "project" => Ok(RootKind::Project),
            "lead" => Ok(RootKind::Lead),
            other => Err(DomainError::unknown_kind(format!("root '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_names_parse_back() {
        for m in ModuleKind::ALL {
            assert_eq!(m.as_str().parse::<ModuleKind>().unwrap(), m);
        }
    }

    #[test]
    fn unknown_root_is_rejected() {
        assert!(matches!(
            "campaign".parse::<RootKind>(),
            Err(DomainError::UnknownKind(_))
        ));
    }
}
