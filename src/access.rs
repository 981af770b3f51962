//! Role-based visibility of documents.
//!
//! Roles are an attribute of the requesting user, teams are an attribute of
//! each document. The index itself knows nothing about either: visibility
//! is resolved from the current Metadata Index on every call, so a team
//! reassignment takes effect on the next query.

use std::{collections::HashSet, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    doc_id::DocumentKey,
    error::{Error, Result},
    metadata::{DocumentMetadata, MetadataIndex},
};

/// Owning team of a document.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Team {
    /// Visible to every role.
    #[default]
    #[serde(rename = "Unassigned")]
    Unassigned,
    #[serde(rename = "Data Tribe")]
    DataTribe,
    #[serde(rename = "Mobile Application Tribe")]
    MobileApplicationTribe,
    #[serde(rename = "Risk Tribe")]
    RiskTribe,
    #[serde(rename = "Card Tribe")]
    CardTribe,
}

impl Team {
    pub const ALL: [Team; 5] = [
        Team::Unassigned,
        Team::DataTribe,
        Team::MobileApplicationTribe,
        Team::RiskTribe,
        Team::CardTribe,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Team::Unassigned => "Unassigned",
            Team::DataTribe => "Data Tribe",
            Team::MobileApplicationTribe => "Mobile Application Tribe",
            Team::RiskTribe => "Risk Tribe",
            Team::CardTribe => "Card Tribe",
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Team {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Team::ALL
            .into_iter()
            .find(|team| team.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::NotFound {
                kind: "team",
                name: wanted.to_string(),
            })
    }
}

/// The role a query is issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sees every document in the index.
    Admin,
    /// Sees documents owned by the team plus unassigned ones.
    Member(Team),
}

impl Role {
    /// Whether a document owned by `team` is visible under this role.
    pub fn can_see(self, team: Team) -> bool {
        match self {
            Role::Admin => true,
            Role::Member(own) => team == own || team == Team::Unassigned,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => f.write_str("Admin"),
            Role::Member(team) => team.fmt(f),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("admin") {
            return Ok(Role::Admin);
        }
        s.parse::<Team>().map(Role::Member).map_err(|_| Error::NotFound {
            kind: "role",
            name: s.trim().to_string(),
        })
    }
}

/// Resolve the set of document keys `role` may see.
pub fn accessible_documents(
    index: &MetadataIndex,
    role: Role,
) -> Result<HashSet<DocumentKey>> {
    Ok(index
        .all()?
        .into_iter()
        .filter(|(_, meta)| role.can_see(meta.team))
        .map(|(key, _)| key)
        .collect())
}

/// Metadata of every document visible to `role`, ordered by key.
///
/// A `filter` keeps only documents whose file name contains it, ignoring
/// case. A blank filter keeps everything.
pub fn library(
    index: &MetadataIndex,
    role: Role,
    filter: Option<&str>,
) -> Result<Vec<(DocumentKey, DocumentMetadata)>> {
    let needle = filter
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_lowercase);
    Ok(index
        .all()?
        .into_iter()
        .filter(|(_, meta)| role.can_see(meta.team))
        .filter(|(_, meta)| match &needle {
            Some(needle) => meta.file_name.to_lowercase().contains(needle),
            None => true,
        })
        .collect())
}
