// config.rs
//
// Tunables for the max-pressure controller. Every field has a default taken
// from global_variables, so a JSON file only needs to name what it overrides.

use crate::errors::{ControlError, Result};
use crate::global_variables::{
    BETA_OUT, CHECK_EVERY, COOLDOWN, EXT_STEP, FALLBACK_AFTER, GAP_EXTEND_THRESHOLD,
    GAP_SWITCH_THRESHOLD, MAX_EXT_ADD, MIN_REMAINING_FOR_EXTENSION, MIN_SERVE, SWITCH_WINDOW,
    WAIT_WEIGHT,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which clock throttles decision evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// `check_every` seconds of real time between evaluations.
    WallClock,
    /// `check_every` seconds of simulated time between evaluations.
    SimTime,
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::WallClock
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub check_every: f64,
    pub cadence: Cadence,
    pub ext_step: f64,
    pub max_ext_add: f64,
    pub switch_window: f64,
    pub min_serve: f64,
    pub cooldown: f64,
    /// Outbound discount. Zero turns pressure into a pure inbound queue measure.
    pub beta_out: f64,
    /// Weight of accumulated waiting time in inbound lane pressure.
    pub wait_weight: f64,
    pub gap_extend_threshold: f64,
    pub gap_switch_threshold: f64,
    pub fallback_after: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            check_every: CHECK_EVERY,
            cadence: Cadence::default(),
            ext_step: EXT_STEP,
            max_ext_add: MAX_EXT_ADD,
            switch_window: SWITCH_WINDOW,
            min_serve: MIN_SERVE,
            cooldown: COOLDOWN,
            beta_out: BETA_OUT,
            wait_weight: WAIT_WEIGHT,
            gap_extend_threshold: GAP_EXTEND_THRESHOLD,
            gap_switch_threshold: GAP_SWITCH_THRESHOLD,
            fallback_after: FALLBACK_AFTER,
        }
    }
}

impl ControllerConfig {
    /// Loads a config from a JSON file; missing fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: ControllerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("check_every", self.check_every),
            ("ext_step", self.ext_step),
            ("max_ext_add", self.max_ext_add),
            ("switch_window", self.switch_window),
            ("min_serve", self.min_serve),
            ("cooldown", self.cooldown),
            ("beta_out", self.beta_out),
            ("wait_weight", self.wait_weight),
            ("gap_extend_threshold", self.gap_extend_threshold),
            ("gap_switch_threshold", self.gap_switch_threshold),
            ("fallback_after", self.fallback_after),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ControlError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.max_ext_add <= MIN_REMAINING_FOR_EXTENSION {
            return Err(ControlError::Config(format!(
                "max_ext_add must exceed {} seconds, got {}",
                MIN_REMAINING_FOR_EXTENSION, self.max_ext_add
            )));
        }
        Ok(())
    }

    /// True when `rem` lies inside the window where extending is allowed.
    pub fn extension_window_contains(&self, rem: f64) -> bool {
        (MIN_REMAINING_FOR_EXTENSION..self.max_ext_add).contains(&rem)
    }
}
