//! Scene configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "fixedTimestepSecs": 0.02, "maxFixedStepsPerFrame": 8 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneConfig {
    /// Length of one FixedUpdate tick, in seconds.
    pub fixed_timestep_secs: f64,
    /// Upper bound on FixedUpdate ticks per frame. `None` runs every tick
    /// that is due.
    pub max_fixed_steps_per_frame: Option<u32>,
    pub start_paused: bool,
}

impl SceneConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The fixed step as a `Duration`. Non-finite or non-positive values
    /// fall back to the default.
    pub fn fixed_timestep(&self) -> Duration {
        Duration::try_from_secs_f64(self.fixed_timestep_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_FIXED_TIMESTEP))
    }
}

const DEFAULT_FIXED_TIMESTEP: f64 = 1.0 / 60.0;

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            fixed_timestep_secs: DEFAULT_FIXED_TIMESTEP,
            max_fixed_steps_per_frame: None,
            start_paused: false,
        }
    }
}
