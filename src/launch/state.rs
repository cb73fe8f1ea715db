//! States of a single launch selection

use crate::model::{Update, UpdateId};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

/// Why the selector settled on the embedded update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    /// No cached update survived filtering and verification
    NoCandidates,
    /// The catalog could not be queried
    CatalogUnavailable(String),
    /// The host cut selection short
    ShortCircuit,
    /// The cache lock stayed held past its timeout
    LockUnavailable,
    /// Selection exceeded the cold start budget
    TimedOut,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCandidates => write!(f, "no launchable cached update"),
            Self::CatalogUnavailable(reason) => write!(f, "catalog unavailable: {reason}"),
            Self::ShortCircuit => write!(f, "selection short-circuited"),
            Self::LockUnavailable => write!(f, "cache lock unavailable"),
            Self::TimedOut => write!(f, "cold start timeout elapsed"),
        }
    }
}

/// Why a candidate was passed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    /// Failed launches reached the threshold without any success
    RolledBack { failed_launches: u32 },
    /// The catalog lists no launch asset
    NoLaunchAsset,
    /// A file is absent and no embedded copy could restore it
    MissingAsset { key: String },
    /// A file exists but its hash does not match
    CorruptAsset { key: String },
    /// Verification hit an error unrelated to the file's content
    Unreadable { key: Option<String>, reason: String },
}

impl Rejection {
    /// Asset key to flag in the catalog, for rejections caused by file state
    pub fn broken_key(&self) -> Option<&str> {
        match self {
            Self::MissingAsset { key } | Self::CorruptAsset { key } => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RolledBack { failed_launches } => {
                write!(f, "rolled back after {failed_launches} failed launch(es)")
            }
            Self::NoLaunchAsset => write!(f, "no launch asset"),
            Self::MissingAsset { key } => write!(f, "asset {key} missing"),
            Self::CorruptAsset { key } => write!(f, "asset {key} corrupt"),
            Self::Unreadable { key: Some(key), reason } => {
                write!(f, "asset {key} unreadable: {reason}")
            }
            Self::Unreadable { key: None, reason } => write!(f, "unreadable: {reason}"),
        }
    }
}

/// Selection state machine
///
/// `Idle -> Selecting -> Verifying* -> Selected`, with `Fallback` reachable
/// from any non-terminal state. A fallback is terminal once the embedded
/// launch asset resolved; if it cannot be, the machine ends in `Fatal`.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchState {
    Idle,
    Selecting,
    Verifying {
        candidate: Update,
        remaining: VecDeque<Update>,
    },
    Selected {
        update: Update,
        launch_asset_path: PathBuf,
    },
    Fallback {
        reason: FallbackReason,
        launch_asset_path: Option<PathBuf>,
    },
    Fatal {
        reason: String,
    },
}

impl LaunchState {
    pub fn fallback(reason: FallbackReason) -> Self {
        Self::Fallback {
            reason,
            launch_asset_path: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::Verifying { .. } => "verifying",
            Self::Selected { .. } => "selected",
            Self::Fallback { .. } => "fallback",
            Self::Fatal { .. } => "fatal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Selected { .. }
                | Self::Fatal { .. }
                | Self::Fallback {
                    launch_asset_path: Some(_),
                    ..
                }
        )
    }

    /// Whether the machine already committed to the embedded update
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// What happened during one selection, for logs and the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaunchReport {
    /// Candidates returned by the catalog before any filtering
    pub candidates: usize,
    pub rejected: Vec<(UpdateId, Rejection)>,
    /// Assets restored from the embedded bundle
    pub repaired: Vec<String>,
    /// Updates flagged not ready because their files were broken
    pub marked_not_ready: u64,
    /// State names in the order they were entered
    pub transitions: Vec<&'static str>,
}
