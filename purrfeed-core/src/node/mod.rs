//! Device-coordination context (context B)
//!
//! [`FeederNode`] owns the devices and the device end of the inter-context
//! link. Each [`FeederNode::poll`] drains the command queue and advances
//! the current mode by one bounded step.
//!
//! ```text
//!            Mode cmd          mode finished
//! Standby ----------> Mode --------------------> Standby
//!    |                  ^
//!    | Feed cmd         |
//!    +------------------+ (Feeding)
//! ```
//!
//! Mode commands that arrive while another mode is running wait until it
//! returns to Standby. Every mode change is echoed as a Status report.

use heapless::{Deque, Vec};
use micromath::F32Ext;
use purrfeed_hal::storage::BlobStore;
use purrfeed_protocol::message::payload_to_mass;
use purrfeed_protocol::{
    CalibrationStep, ChannelError, Command, Endpoint, ErrorCode, MessageError, OperatingMode,
    Report, WarningCode, NO_DEVICE,
};

use crate::autotune::AutotunePreset;
use crate::config::{NodeConfig, MAX_DEVICES, MAX_LANES};
use crate::device::{DeviceStatus, FeederDevice};
use crate::fill::{FillMonitor, FillSample, FillVariant};

/// Feed commands buffered ahead of the running one
pub const MAX_QUEUED_FEEDS: usize = 4;

/// Samples averaged per weighing between cycles
const MEASURE_SAMPLES: u8 = 10;

/// Smallest mass gain that counts as progress (g)
const MIN_PROGRESS_G: f32 = 0.5;

/// Node setup errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeError {
    TooManyDevices,
    TooManyLanes,
    /// Lane names a device address that was never added
    UnknownDevice(u8),
}

/// A feed lane: the pump that dispenses and an optional dumper that tips
/// the weighed portion into the bowl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lane {
    /// Id carried by Feed commands and Amount reports
    pub id: u8,
    pub pump: u8,
    pub dumper: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
struct LaneSlots {
    id: u8,
    pump: usize,
    dumper: Option<usize>,
    scale: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FeedJob {
    lane: usize,
    grams: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FeedStage {
    PrimePump,
    PrimeDumper,
    Approximate,
    Accurate,
    ReturnPump,
    /// No scale: fixed number of cycles
    Blind { cycles_left: u16 },
    Empty,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FeedRun {
    job: FeedJob,
    stage: FeedStage,
    last_mass: f32,
    idle_cycles: u8,
    dispensed: f32,
}

impl FeedRun {
    fn new(job: FeedJob) -> Self {
        Self {
            job,
            stage: FeedStage::PrimePump,
            last_mass: 0.0,
            idle_cycles: 0,
            dispensed: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DeviceOp {
    Prime,
    MoveCycle,
    MoveCycleAccurate,
    ReturnHome,
    EmptyScale,
    Emergency,
    Autotune(AutotunePreset),
}

/// Context-B event loop state
pub struct FeederNode<'a, 'd, B, const N: usize> {
    endpoint: Endpoint<'a, N>,
    devices: Vec<&'d mut dyn FeederDevice, MAX_DEVICES>,
    lanes: Vec<LaneSlots, MAX_LANES>,
    store: B,
    config: NodeConfig,
    mode: OperatingMode,
    pending_mode: Option<OperatingMode>,
    jobs: Deque<FeedJob, MAX_QUEUED_FEEDS>,
    run: Option<FeedRun>,
    /// Next device for modes that visit every device
    cursor: usize,
    calibration_step: Option<CalibrationStep>,
    fill: FillMonitor,
    last_fed: [u16; MAX_LANES],
}

impl<'a, 'd, B: BlobStore, const N: usize> FeederNode<'a, 'd, B, N> {
    pub fn new(endpoint: Endpoint<'a, N>, store: B, config: NodeConfig, fill: FillVariant) -> Self {
        Self {
            endpoint,
            devices: Vec::new(),
            lanes: Vec::new(),
            store,
            config,
            mode: OperatingMode::Standby,
            pending_mode: None,
            jobs: Deque::new(),
            run: None,
            cursor: 0,
            calibration_step: None,
            fill: FillMonitor::new(fill, &config),
            last_fed: [0; MAX_LANES],
        }
    }

    pub fn add_device(&mut self, device: &'d mut dyn FeederDevice) -> Result<(), NodeError> {
        self.devices
            .push(device)
            .map_err(|_| NodeError::TooManyDevices)
    }

    /// Register a lane; its devices must already be added
    pub fn add_lane(&mut self, lane: Lane) -> Result<(), NodeError> {
        let pump = self
            .device_index(lane.pump)
            .ok_or(NodeError::UnknownDevice(lane.pump))?;
        let dumper = match lane.dumper {
            Some(address) => Some(
                self.device_index(address)
                    .ok_or(NodeError::UnknownDevice(address))?,
            ),
            None => None,
        };
        let scale = dumper
            .filter(|&i| self.devices[i].has_scale())
            .or(Some(pump).filter(|&i| self.devices[i].has_scale()));

        self.lanes
            .push(LaneSlots {
                id: lane.id,
                pump,
                dumper,
                scale,
            })
            .map_err(|_| NodeError::TooManyLanes)
    }

    fn device_index(&self, address: u8) -> Option<usize> {
        self.devices.iter().position(|d| d.address() == address)
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Grams scheduled per day on each lane, for the fill estimate
    pub fn set_daily_totals(&mut self, totals: [u16; MAX_LANES]) {
        self.fill.set_daily_totals(totals);
    }

    /// Report the container level after feeding
    pub fn update_fill(&mut self, sample: FillSample) {
        let last_fed = core::mem::take(&mut self.last_fed);
        for report in self.fill.update(sample, last_fed) {
            self.send(report);
        }
    }

    fn send(&self, report: Report) {
        if !self.endpoint.send_report(report) {
            log_warn!("node: link full, {:?} dropped", report);
        }
    }

    /// Handle pending commands and advance the current mode
    pub fn poll(&mut self) {
        while let Some(received) = self.endpoint.receive_command() {
            self.handle(received);
        }

        if self.mode == OperatingMode::Standby {
            if let Some(mode) = self.pending_mode.take() {
                self.enter(mode);
            } else if !self.jobs.is_empty() {
                self.enter(OperatingMode::Feeding);
            }
        }

        match self.mode {
            OperatingMode::Standby => {}
            OperatingMode::Feeding => self.step_feeding(),
            OperatingMode::Calibrating => self.step_calibration(),
            OperatingMode::Autotuning => self.step_autotune(),
            OperatingMode::Emergency => self.step_emergency(),
        }
    }

    fn handle(&mut self, received: Result<Command, ChannelError>) {
        match received {
            Ok(Command::SetMode(mode)) => self.pending_mode = Some(mode),
            Ok(Command::Feed { lane, centigrams }) => {
                let Some(index) = self.lanes.iter().position(|l| l.id == lane) else {
                    log_warn!("node: feed for unknown lane {}", lane);
                    self.channel_fault();
                    return;
                };
                let job = FeedJob {
                    lane: index,
                    grams: payload_to_mass(centigrams),
                };
                if self.jobs.push_back(job).is_err() {
                    log_warn!("node: feed queue full");
                    self.channel_fault();
                }
            }
            Err(ChannelError::Malformed(MessageError::InvalidCode(code))) => {
                log_warn!("node: invalid mode {}", code);
                self.send(Report::Warning {
                    device: NO_DEVICE,
                    code: WarningCode::InvalidMode,
                });
            }
            Err(err) => {
                log_warn!("node: channel fault {:?}", err);
                self.channel_fault();
            }
        }
    }

    fn channel_fault(&self) {
        self.send(Report::Error {
            device: NO_DEVICE,
            code: ErrorCode::ChannelFault,
        });
    }

    fn enter(&mut self, mode: OperatingMode) {
        log_info!("node: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        self.cursor = 0;
        self.calibration_step = None;
        if mode == OperatingMode::Calibrating {
            if let Some(index) = self.scale_device() {
                self.devices[index].reset_calibration();
            }
        }
        self.send(Report::Status(mode));
    }

    fn scale_device(&self) -> Option<usize> {
        self.devices.iter().position(|d| d.has_scale())
    }

    /// Run one step of a device operation, forwarding its faults once done
    fn operate(&mut self, index: usize, op: DeviceOp) -> DeviceStatus {
        let device = &mut self.devices[index];
        let status = match op {
            DeviceOp::Prime => device.prime(),
            DeviceOp::MoveCycle => device.move_cycle(),
            DeviceOp::MoveCycleAccurate => device.move_cycle_accurate(),
            DeviceOp::ReturnHome => device.return_home(),
            DeviceOp::EmptyScale => device.empty_scale(),
            DeviceOp::Emergency => device.emergency_move(),
            DeviceOp::Autotune(preset) => device.autotune(preset),
        };
        if status.is_done() {
            self.forward(index);
        }
        status
    }

    /// Send a device's pending warning and error
    fn forward(&mut self, index: usize) {
        let device = &mut self.devices[index];
        let address = device.address();
        let warning = device.take_warning();
        let error = device.take_error();

        if let Some(code) = warning.filter(|c| !c.is_none()) {
            self.send(Report::Warning {
                device: address,
                code,
            });
        }
        if let Some(code) = error.filter(|c| !c.is_none()) {
            self.send(Report::Error {
                device: address,
                code,
            });
        }
    }

    fn persist_thresholds(&mut self, index: usize) {
        if self.devices[index].thresholds_dirty() {
            self.devices[index].save_thresholds(&mut self.store);
            self.forward(index);
        }
    }

    fn measure(&mut self, lane: LaneSlots) -> Option<f32> {
        let index = lane.scale?;
        match self.devices[index].measure(MEASURE_SAMPLES) {
            Ok(grams) => Some(grams),
            Err(_) => {
                self.send(Report::Error {
                    device: self.devices[index].address(),
                    code: ErrorCode::ScaleConnection,
                });
                None
            }
        }
    }

    fn step_feeding(&mut self) {
        let run = match self.run.take() {
            Some(run) => run,
            None => match self.jobs.pop_front() {
                Some(job) => {
                    log_info!("node: feeding {} g on lane {}", job.grams, self.lanes[job.lane].id);
                    FeedRun::new(job)
                }
                None => {
                    self.enter(OperatingMode::Standby);
                    return;
                }
            },
        };
        let lane = self.lanes[run.job.lane];
        self.run = self.feed_step(run, lane);
    }

    /// Stage that follows priming
    fn dispense_stage(&self, run: &FeedRun, lane: LaneSlots) -> FeedStage {
        if lane.scale.is_none() {
            let cycles = (run.job.grams / self.config.nominal_grams_per_cycle).ceil();
            return FeedStage::Blind {
                cycles_left: cycles.max(0.0) as u16,
            };
        }
        if run.job.grams - self.config.approx_offset_g > 0.0 {
            FeedStage::Approximate
        } else {
            FeedStage::Accurate
        }
    }

    /// Track mass gain per cycle; false once too many cycles were idle
    fn check_progress(&mut self, run: &mut FeedRun, mass: f32, lane: LaneSlots) -> bool {
        if mass > run.last_mass + MIN_PROGRESS_G {
            run.last_mass = mass;
            run.idle_cycles = 0;
            return true;
        }
        run.idle_cycles += 1;
        if run.idle_cycles > self.config.max_cycles_without_progress {
            log_error!("node: no food after {} cycles", run.idle_cycles);
            self.send(Report::Error {
                device: self.devices[lane.pump].address(),
                code: ErrorCode::FeedCycles,
            });
            return false;
        }
        true
    }

    /// Advance a feed run; `None` once it has finished or failed
    fn feed_step(&mut self, mut run: FeedRun, lane: LaneSlots) -> Option<FeedRun> {
        match run.stage {
            FeedStage::PrimePump => match self.operate(lane.pump, DeviceOp::Prime) {
                DeviceStatus::Busy => {}
                DeviceStatus::Error => return None,
                DeviceStatus::Ok | DeviceStatus::Warning => {
                    run.stage = if lane.dumper.is_some() {
                        FeedStage::PrimeDumper
                    } else {
                        self.dispense_stage(&run, lane)
                    };
                }
            },
            FeedStage::PrimeDumper => {
                let dumper = lane.dumper?;
                match self.operate(dumper, DeviceOp::Prime) {
                    DeviceStatus::Busy => {}
                    DeviceStatus::Error => return None,
                    DeviceStatus::Ok | DeviceStatus::Warning => {
                        run.stage = self.dispense_stage(&run, lane);
                    }
                }
            }
            FeedStage::Approximate => match self.operate(lane.pump, DeviceOp::MoveCycle) {
                DeviceStatus::Busy => {}
                DeviceStatus::Error => return None,
                DeviceStatus::Ok | DeviceStatus::Warning => {
                    let mass = self.measure(lane)?;
                    if mass >= run.job.grams - self.config.approx_offset_g {
                        run.last_mass = mass;
                        run.idle_cycles = 0;
                        run.stage = FeedStage::Accurate;
                    } else if !self.check_progress(&mut run, mass, lane) {
                        return None;
                    }
                }
            },
            FeedStage::Accurate => match self.operate(lane.pump, DeviceOp::MoveCycleAccurate) {
                DeviceStatus::Busy => {}
                DeviceStatus::Error => return None,
                DeviceStatus::Ok | DeviceStatus::Warning => {
                    let mass = self.measure(lane)?;
                    if mass >= run.job.grams {
                        run.dispensed = mass;
                        run.stage = FeedStage::ReturnPump;
                    } else if self.devices[lane.pump].is_home()
                        && !self.check_progress(&mut run, mass, lane)
                    {
                        return None;
                    }
                }
            },
            FeedStage::ReturnPump => match self.operate(lane.pump, DeviceOp::ReturnHome) {
                DeviceStatus::Busy => {}
                DeviceStatus::Error => return None,
                DeviceStatus::Ok | DeviceStatus::Warning => {
                    run.stage = if lane.dumper.is_some() {
                        FeedStage::Empty
                    } else {
                        FeedStage::Report
                    };
                }
            },
            FeedStage::Blind { cycles_left: 0 } => {
                run.stage = if lane.dumper.is_some() {
                    FeedStage::Empty
                } else {
                    FeedStage::Report
                };
            }
            FeedStage::Blind { cycles_left } => match self.operate(lane.pump, DeviceOp::MoveCycle) {
                DeviceStatus::Busy => {}
                DeviceStatus::Error => return None,
                DeviceStatus::Ok | DeviceStatus::Warning => {
                    run.dispensed += self.config.nominal_grams_per_cycle;
                    run.stage = FeedStage::Blind {
                        cycles_left: cycles_left - 1,
                    };
                }
            },
            FeedStage::Empty => {
                let dumper = lane.dumper?;
                match self.operate(dumper, DeviceOp::EmptyScale) {
                    DeviceStatus::Busy => {}
                    DeviceStatus::Error => return None,
                    DeviceStatus::Ok | DeviceStatus::Warning => run.stage = FeedStage::Report,
                }
            }
            FeedStage::Report => {
                log_info!("node: lane {} fed {} g", lane.id, run.dispensed);
                self.send(Report::amount(lane.id, run.dispensed));
                self.last_fed[run.job.lane] = run.dispensed.max(0.0) as u16;
                self.persist_thresholds(lane.pump);
                if let Some(dumper) = lane.dumper {
                    self.persist_thresholds(dumper);
                }
                return None;
            }
        }
        Some(run)
    }

    fn step_calibration(&mut self) {
        let Some(index) = self.scale_device() else {
            self.send(Report::Calibration {
                device: NO_DEVICE,
                step: CalibrationStep::Error,
            });
            self.enter(OperatingMode::Standby);
            return;
        };

        let step = self.devices[index].calibrate_scale(&mut self.store, None);
        if self.calibration_step != Some(step) {
            self.calibration_step = Some(step);
            self.send(Report::Calibration {
                device: self.devices[index].address(),
                step,
            });
        }
        if step.is_terminal() {
            self.enter(OperatingMode::Standby);
        }
    }

    fn step_autotune(&mut self) {
        let index = self.cursor;
        if index >= self.devices.len() {
            self.enter(OperatingMode::Standby);
            return;
        }
        match self.operate(index, DeviceOp::Autotune(AutotunePreset::Quick)) {
            DeviceStatus::Busy => {}
            DeviceStatus::Ok | DeviceStatus::Warning => {
                self.persist_thresholds(index);
                self.cursor += 1;
            }
            DeviceStatus::Error => self.cursor += 1,
        }
    }

    fn step_emergency(&mut self) {
        let index = self.cursor;
        if index >= self.devices.len() {
            self.enter(OperatingMode::Standby);
            return;
        }
        self.operate(index, DeviceOp::Emergency);
        self.cursor += 1;
    }
}
