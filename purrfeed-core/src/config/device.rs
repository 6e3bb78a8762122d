//! Device and node configuration
//!
//! Defaults match the reference feeder mechanics: a 4600-step feed stroke
//! inside a 6000-step slider, driven at 10000 steps/s.

use crate::motion::MotionParams;
use crate::recovery::RecoveryConfig;
use crate::traits::Direction;

/// Maximum devices driven by one node
pub const MAX_DEVICES: usize = 4;

/// Maximum feed lanes (one per cat)
pub const MAX_LANES: usize = 2;

/// What a slider does in the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceRole {
    /// Pushes food out of the container
    Pump,
    /// Tips the weighed portion into the bowl
    Dumper,
}

/// Where the home signal comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomeSource {
    /// Digital endstop or an externally routed signal
    Sensor,
    /// Stall against the mechanical end of travel
    Stall,
}

/// Per-axis configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Device id on the wire and storage address
    pub address: u8,
    pub role: DeviceRole,
    pub home_source: HomeSource,
    pub toward_home: Direction,
    /// Steps/s
    pub max_speed: f32,
    /// Steps/s²
    pub acceleration: f32,
    /// Feed stroke in steps
    pub travel: u32,
    /// Mechanical range of the slider in steps
    pub max_range: u32,
    pub run_current_ma: u16,
    pub emergency_current_ma: u16,
    /// Dispense cycles per emergency run
    pub emergency_cycles: u8,
    /// Lower stall thresholds automatically after repeated stalls
    pub auto_stall_reduction: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: 0,
            role: DeviceRole::Pump,
            home_source: HomeSource::Sensor,
            toward_home: Direction::Positive,
            max_speed: 10_000.0,
            acceleration: 100_000.0,
            travel: 4600,
            max_range: 6000,
            run_current_ma: 600,
            emergency_current_ma: 1000,
            emergency_cycles: 4,
            auto_stall_reduction: true,
        }
    }
}

impl DeviceConfig {
    pub fn new(address: u8, role: DeviceRole, toward_home: Direction) -> Self {
        Self {
            address,
            role,
            toward_home,
            ..Self::default()
        }
    }

    pub fn with_home_source(mut self, source: HomeSource) -> Self {
        self.home_source = source;
        self
    }

    pub fn motion_params(&self) -> MotionParams {
        MotionParams::new(self.max_speed, self.acceleration)
    }

    pub fn recovery(&self) -> RecoveryConfig {
        RecoveryConfig {
            toward_home: self.toward_home,
            max_range: self.max_range,
            normal_distance: self.travel,
        }
    }

    /// Signed steps for `fraction` of the feed stroke away from home
    pub fn away(&self, fraction: f32) -> i32 {
        self.toward_home.opposite().steps(self.stroke(fraction))
    }

    /// Signed steps for `fraction` of the feed stroke toward home
    pub fn toward(&self, fraction: f32) -> i32 {
        self.toward_home.steps(self.stroke(fraction))
    }

    fn stroke(&self, fraction: f32) -> u32 {
        (self.travel as f32 * fraction + 0.5) as u32
    }
}

/// Configuration of the device-coordination node
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// The approximate phase stops this many grams short of the target
    pub approx_offset_g: f32,
    /// Approximate cycles without measurable gain before giving up
    pub max_cycles_without_progress: u8,
    /// Grams in a full container (top sensor covered)
    pub high_capacity_g: u16,
    /// Grams left when the side sensor uncovers
    pub low_capacity_g: u16,
    /// Estimated grams per pump cycle when no scale is fitted
    pub nominal_grams_per_cycle: f32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            approx_offset_g: 4.0,
            max_cycles_without_progress: 10,
            high_capacity_g: 1000,
            low_capacity_g: 150,
            nominal_grams_per_cycle: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.motion_params().decel_distance(), 500);
        assert_eq!(config.recovery().normal_distance, 4600);
        assert_eq!(config.run_current_ma, 600);
        assert_eq!(config.emergency_cycles, 4);
    }

    #[test]
    fn test_stroke_fractions() {
        let config = DeviceConfig::new(1, DeviceRole::Dumper, Direction::Negative);
        assert_eq!(config.away(0.2), 920);
        assert_eq!(config.toward(1.2), -5520);
        assert_eq!(config.away(0.01), 46);
        assert_eq!(config.toward(0.0), 0);
    }
}
