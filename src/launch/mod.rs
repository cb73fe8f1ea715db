//! Launch selection
//!
//! - `selector`: the state machine choosing between cached updates
//! - `embedded`: the update shipped with the host, always the last resort
//! - `state`: states, fallback reasons and per-launch reports

pub mod embedded;
pub mod selector;
pub mod state;

pub use embedded::{EmbeddedBundle, EmbeddedManifest};
pub use selector::{LaunchOutcome, LaunchPolicy, LaunchSelector, ShortCircuit};
pub use state::{FallbackReason, LaunchReport, LaunchState, Rejection};

use crate::model::{Update, UpdateId};
use std::path::{Path, PathBuf};

/// The update the host should boot
#[derive(Debug, Clone)]
pub enum LaunchSelection {
    /// A verified update from the cache
    Cached {
        update: Update,
        launch_asset_path: PathBuf,
    },
    /// The update compiled into the host
    Embedded {
        manifest: EmbeddedManifest,
        launch_asset_path: PathBuf,
        reason: FallbackReason,
    },
}

impl LaunchSelection {
    pub fn launch_asset_path(&self) -> &Path {
        match self {
            Self::Cached {
                launch_asset_path, ..
            }
            | Self::Embedded {
                launch_asset_path, ..
            } => launch_asset_path,
        }
    }

    pub fn update_id(&self) -> UpdateId {
        match self {
            Self::Cached { update, .. } => update.id,
            Self::Embedded { manifest, .. } => manifest.id,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Embedded { .. })
    }
}
