//! Volume mounts and their backing sources.
//!
//! A configuration document describes a volume with a flat set of optional
//! fields. Decoding folds them into a [`VolumeSource`] with exactly one
//! active case, so a conflicting document never becomes a [`VolumeSpec`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while folding a volume document into a [`VolumeSpec`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// More than one volume source is populated.
    #[error(
        "volume {volume:?}: only one of `empty_dir` volume, `git_repo` volume, `secret` volume or storage account volume (`share_name`, `storage_account_name`, and `storage_account_key`) can be specified"
    )]
    SourceConflict {
        /// Name of the offending volume.
        volume: String,
    },
    /// No volume source is populated.
    #[error(
        "volume {volume:?}: only one of `empty_dir` volume, `git_repo` volume, `secret` volume or storage account volume (`share_name`, `storage_account_name`, and `storage_account_key`) can be specified"
    )]
    MissingSource {
        /// Name of the offending volume.
        volume: String,
    },
    /// Only some of the storage account fields are populated.
    #[error(
        "volume {volume:?}: when using a storage account volume, all of `share_name`, `storage_account_name`, `storage_account_key` must be specified"
    )]
    IncompleteAzureFile {
        /// Name of the offending volume.
        volume: String,
    },
}

/// Git repository cloned into a volume when the group starts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GitRepoVolume {
    /// Repository URL.
    pub url: String,
    /// Target directory inside the volume.
    #[serde(
        default,
        deserialize_with = "super::blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub directory: Option<String>,
    /// Commit hash to check out.
    #[serde(
        default,
        deserialize_with = "super::blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision: Option<String>,
}

/// Azure Files share mounted into a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AzureFileShare {
    /// File share name.
    pub share_name: String,
    /// Storage account holding the share.
    pub storage_account_name: String,
    /// Storage account access key. Never returned by the API.
    pub storage_account_key: String,
}

/// Backing store of a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeSource {
    /// Scratch directory shared by the containers that mount it.
    EmptyDir,
    /// Git repository checkout.
    GitRepo(GitRepoVolume),
    /// Secret files; values are never returned by the API.
    Secret(BTreeMap<String, String>),
    /// Azure Files share.
    AzureFile(AzureFileShare),
}

impl VolumeSource {
    /// Returns true for the empty-dir case.
    #[must_use]
    pub const fn is_empty_dir(&self) -> bool {
        matches!(self, Self::EmptyDir)
    }
}

/// A volume mounted into a container.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "VolumeDocument", into = "VolumeDocument")]
pub struct VolumeSpec {
    /// Volume name, shared between the mount and the group-level volume.
    pub name: String,
    /// Path inside the container.
    pub mount_path: String,
    /// Whether the mount is read only.
    pub read_only: bool,
    /// Backing store.
    pub source: VolumeSource,
}

/// Flat, document-shaped form of a volume as users write it.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeDocument {
    /// Volume name.
    pub name: String,
    /// Mount path inside the container.
    pub mount_path: String,
    /// Whether the mount is read only.
    #[serde(default)]
    pub read_only: bool,
    /// Selects an empty-dir volume.
    #[serde(default, skip_serializing_if = "is_false")]
    pub empty_dir: bool,
    /// Selects a git repository volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<GitRepoVolume>,
    /// Selects a secret volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<BTreeMap<String, String>>,
    /// Azure Files share name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_name: Option<String>,
    /// Azure Files storage account name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_name: Option<String>,
    /// Azure Files storage account key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_key: Option<String>,
}

const fn is_false(value: &bool) -> bool {
    !*value
}

fn non_blank(value: Option<&String>) -> bool {
    value.is_some_and(|text| !text.is_empty())
}

impl TryFrom<VolumeDocument> for VolumeSpec {
    type Error = VolumeError;

    fn try_from(document: VolumeDocument) -> Result<Self, Self::Error> {
        let VolumeDocument {
            name,
            mount_path,
            read_only,
            empty_dir,
            git_repo,
            secret,
            share_name,
            storage_account_name,
            storage_account_key,
        } = document;

        let has_share = non_blank(share_name.as_ref());
        let has_account = non_blank(storage_account_name.as_ref());
        let has_key = storage_account_key.is_some();
        let any_storage = has_share || has_account || has_key;
        let populated = [empty_dir, git_repo.is_some(), secret.is_some(), any_storage]
            .into_iter()
            .filter(|set| *set)
            .count();

        if populated > 1 {
            return Err(VolumeError::SourceConflict { volume: name });
        }

        let source = if empty_dir {
            VolumeSource::EmptyDir
        } else if let Some(repo) = git_repo {
            VolumeSource::GitRepo(repo)
        } else if let Some(entries) = secret {
            VolumeSource::Secret(entries)
        } else {
            match (share_name, storage_account_name, storage_account_key) {
                (Some(share), Some(account), Some(key)) if has_share && has_account => {
                    VolumeSource::AzureFile(AzureFileShare {
                        share_name: share,
                        storage_account_name: account,
                        storage_account_key: key,
                    })
                }
                _ if any_storage => return Err(VolumeError::IncompleteAzureFile { volume: name }),
                _ => return Err(VolumeError::MissingSource { volume: name }),
            }
        };

        Ok(Self {
            name,
            mount_path,
            read_only,
            source,
        })
    }
}

impl From<VolumeSpec> for VolumeDocument {
    fn from(spec: VolumeSpec) -> Self {
        let mut document = Self {
            name: spec.name,
            mount_path: spec.mount_path,
            read_only: spec.read_only,
            ..Self::default()
        };
        match spec.source {
            VolumeSource::EmptyDir => document.empty_dir = true,
            VolumeSource::GitRepo(repo) => document.git_repo = Some(repo),
            VolumeSource::Secret(entries) => document.secret = Some(entries),
            VolumeSource::AzureFile(share) => {
                document.share_name = Some(share.share_name);
                document.storage_account_name = Some(share.storage_account_name);
                document.storage_account_key = Some(share.storage_account_key);
            }
        }
        document
    }
}
