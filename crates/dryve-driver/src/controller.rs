//! Motion controller: sequences SDO calls and state transitions into the
//! drive's motion primitives.
//!
//! Every operation is a blocking, synchronous sequence of SDO calls with
//! explicit deadlines. The first error aborts the remaining steps and
//! surfaces unchanged; a fault observed in the statusword aborts pending
//! motion steps with the drive's reported error code.

use dryve_common::{DriveError, DriveResult, MotionConfig};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cia402::{self, Controlword, DriveState, OperationMode, Statusword};
use crate::od;
use crate::sdo::SdoClient;
use crate::transport::Transport;

/// Velocity/acceleration profile for a positioning move, in device units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionProfile {
    /// Profile velocity.
    pub velocity: u32,
    /// Profile acceleration.
    pub acceleration: u32,
    /// Profile deceleration.
    pub deceleration: u32,
}

impl MotionProfile {
    /// The default profile configured for the controller.
    #[must_use]
    pub fn from_config(config: &MotionConfig) -> Self {
        Self {
            velocity: config.profile_velocity,
            acceleration: config.profile_acceleration,
            deceleration: config.profile_deceleration,
        }
    }
}

/// Composite status snapshot. Derived entirely from fresh reads; nothing
/// here is cached between calls.
#[derive(Debug, Clone, Copy)]
pub struct DriveStatus {
    /// Drive state decoded from the statusword.
    pub state: DriveState,
    /// The raw statusword the state was decoded from.
    pub statusword: Statusword,
    /// Actual position, in device units.
    pub position: i32,
    /// Actual velocity, in device units.
    pub velocity: i32,
    /// Error code of the last fault (0 if none).
    pub error_code: u16,
    /// Target-reached flag.
    pub target_reached: bool,
    /// Homing-attained flag.
    pub homing_attained: bool,
    /// Warning flag.
    pub warning: bool,
}

/// High-level drive controller over an SDO client.
pub struct DriveController<T: Transport> {
    sdo: SdoClient<T>,
    motion: MotionConfig,
}

impl<T: Transport> DriveController<T> {
    /// Create a controller with the given timing configuration.
    pub fn new(sdo: SdoClient<T>, motion: MotionConfig) -> Self {
        Self { sdo, motion }
    }

    /// Establish the transport session.
    pub fn connect(&self) -> DriveResult<()> {
        self.sdo.transport().connect()
    }

    /// The underlying SDO client.
    pub fn sdo(&self) -> &SdoClient<T> {
        &self.sdo
    }

    fn read_statusword(&self) -> DriveResult<Statusword> {
        let raw = self.sdo.read(&od::STATUSWORD)?;
        Ok(Statusword::from_raw(raw as u16))
    }

    fn write_controlword(&self, cw: Controlword) -> DriveResult<()> {
        self.sdo.write(&od::CONTROLWORD, i64::from(cw.bits()))
    }

    /// Read the drive's error code after a fault was observed. A failed
    /// read must not mask the fault itself, so it degrades to code 0.
    fn fault_code(&self) -> u16 {
        match self.sdo.read(&od::ERROR_CODE) {
            Ok(code) => code as u16,
            Err(err) => {
                warn!(error = %err, "failed to read error code after fault");
                0
            }
        }
    }

    /// Walk the power state machine to `desired`, writing one controlword
    /// hop at a time and re-reading the statusword after each, bounded by
    /// the configured state timeout.
    fn walk_to(&self, desired: DriveState, tolerate_fault: bool) -> DriveResult<()> {
        let started = Instant::now();
        loop {
            let sw = self.read_statusword()?;
            let current = sw.state();
            if current == desired {
                return Ok(());
            }
            if !tolerate_fault && sw.fault() {
                let code = self.fault_code();
                warn!(code = format!("0x{code:04X}"), "fault while walking state machine");
                return Err(DriveError::DriveFault { code });
            }
            if started.elapsed() >= self.motion.state_timeout {
                return Err(DriveError::StateTransitionTimeout {
                    target: desired.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            if let Some(cw) = cia402::controlword_for(current, desired) {
                debug!(
                    from = %current,
                    to = %desired,
                    controlword = format!("0x{:04X}", cw.bits()),
                    "state hop"
                );
                self.write_controlword(cw)?;
            }
            thread::sleep(self.motion.poll_interval);
        }
    }

    /// Poll the statusword until the motion completion condition holds.
    fn wait_motion_complete(
        &self,
        budget: Duration,
        homing: bool,
        target: &str,
    ) -> DriveResult<()> {
        let started = Instant::now();
        loop {
            let sw = self.read_statusword()?;
            if sw.fault() {
                let code = self.fault_code();
                warn!(code = format!("0x{code:04X}"), "fault during motion");
                return Err(DriveError::DriveFault { code });
            }
            let done = if homing {
                sw.homing_attained() && sw.target_reached()
            } else {
                sw.target_reached()
            };
            if done {
                return Ok(());
            }
            if started.elapsed() >= budget {
                return Err(DriveError::StateTransitionTimeout {
                    target: target.into(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            thread::sleep(self.motion.poll_interval);
        }
    }

    /// Drive the state machine to Operation Enabled.
    ///
    /// From Switch On Disabled this issues the shutdown, switch-on, and
    /// enable-operation controlwords in order, re-reading the statusword
    /// after each hop. A fault along the way surfaces as
    /// [`DriveError::DriveFault`]; recover with [`Self::fault_reset`].
    pub fn enable(&self) -> DriveResult<()> {
        info!("enabling drive");
        self.walk_to(DriveState::OperationEnabled, false)
    }

    /// Disable the power stage (back to Switch On Disabled). Tolerates a
    /// faulted drive by going through the fault-reset edge.
    pub fn disable(&self) -> DriveResult<()> {
        info!("disabling drive");
        self.walk_to(DriveState::SwitchOnDisabled, true)
    }

    /// Clear a latched fault and wait for Switch On Disabled. A no-op if
    /// the drive does not report a fault.
    pub fn fault_reset(&self) -> DriveResult<()> {
        let sw = self.read_statusword()?;
        if !sw.fault() {
            debug!("no fault to reset");
            return Ok(());
        }
        info!("resetting drive fault");
        // Rising edge on bit 7 clears the latched fault.
        self.write_controlword(Controlword::fault_reset())?;
        self.walk_to(DriveState::SwitchOnDisabled, true)
    }

    /// Quick-stop the drive and wait until the ramp ends. Depending on the
    /// device's quick-stop option the drive parks in Quick Stop Active or
    /// falls through to Switched On / Switch On Disabled; all three count
    /// as stopped.
    pub fn stop(&self) -> DriveResult<()> {
        info!("quick stop requested");
        self.write_controlword(Controlword::quick_stop())?;
        let started = Instant::now();
        loop {
            let sw = self.read_statusword()?;
            if sw.fault() {
                let code = self.fault_code();
                return Err(DriveError::DriveFault { code });
            }
            let state = sw.state();
            if matches!(
                state,
                DriveState::QuickStopActive
                    | DriveState::SwitchedOn
                    | DriveState::SwitchOnDisabled
            ) {
                info!(%state, "drive stopped");
                return Ok(());
            }
            if started.elapsed() >= self.motion.state_timeout {
                return Err(DriveError::StateTransitionTimeout {
                    target: DriveState::QuickStopActive.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            thread::sleep(self.motion.poll_interval);
        }
    }

    /// Select a mode of operation and wait until the drive's display
    /// object confirms it.
    pub fn set_mode(&self, mode: OperationMode) -> DriveResult<()> {
        self.sdo
            .write(&od::MODE_OF_OPERATION, i64::from(mode.raw()))?;
        let started = Instant::now();
        loop {
            let display = self.sdo.read(&od::MODE_OF_OPERATION_DISPLAY)?;
            if display == i64::from(mode.raw()) {
                debug!(?mode, "mode of operation active");
                return Ok(());
            }
            if started.elapsed() >= self.motion.state_timeout {
                return Err(DriveError::StateTransitionTimeout {
                    target: format!("mode {mode:?}"),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            thread::sleep(self.motion.poll_interval);
        }
    }

    /// Write the homing parameter set (method, search speeds, acceleration).
    pub fn configure_homing(
        &self,
        method: i8,
        speed_switch: u32,
        speed_zero: u32,
        acceleration: u32,
    ) -> DriveResult<()> {
        self.sdo.write(&od::HOMING_METHOD, i64::from(method))?;
        self.sdo
            .write(&od::HOMING_SPEED_SWITCH, i64::from(speed_switch))?;
        self.sdo
            .write(&od::HOMING_SPEED_ZERO, i64::from(speed_zero))?;
        self.sdo
            .write(&od::HOMING_ACCELERATION, i64::from(acceleration))?;
        Ok(())
    }

    /// Run the drive's homing sequence and wait for completion.
    pub fn home(&self) -> DriveResult<()> {
        info!("starting homing sequence");
        self.enable()?;
        self.set_mode(OperationMode::Homing)?;
        // Arm with the trigger bit low, then raise it: the rising edge
        // starts the homing run.
        self.write_controlword(Controlword::enable_operation())?;
        self.write_controlword(Controlword::start_motion())?;
        self.wait_motion_complete(self.motion.homing_timeout, true, "homing complete")?;
        self.write_controlword(Controlword::enable_operation())?;
        info!("homing complete");
        Ok(())
    }

    /// Move to an absolute position using the configured default profile.
    pub fn move_to_position(&self, target: i32) -> DriveResult<()> {
        self.move_with_profile(target, &MotionProfile::from_config(&self.motion))
    }

    /// Move to an absolute position with an explicit motion profile.
    pub fn move_with_profile(&self, target: i32, profile: &MotionProfile) -> DriveResult<()> {
        info!(target, velocity = profile.velocity, "moving to position");
        self.enable()?;
        self.set_mode(OperationMode::ProfilePosition)?;
        self.sdo
            .write(&od::PROFILE_VELOCITY, i64::from(profile.velocity))?;
        self.sdo
            .write(&od::PROFILE_ACCELERATION, i64::from(profile.acceleration))?;
        self.sdo
            .write(&od::PROFILE_DECELERATION, i64::from(profile.deceleration))?;
        self.sdo.write(&od::TARGET_POSITION, i64::from(target))?;
        // Latch the setpoint: trigger bit low, then the rising edge.
        self.write_controlword(Controlword::enable_operation())?;
        self.write_controlword(Controlword::start_motion())?;
        self.wait_motion_complete(self.motion.motion_timeout, false, "target reached")?;
        self.write_controlword(Controlword::enable_operation())?;
        info!(target, "target reached");
        Ok(())
    }

    /// Read a composite status snapshot. Never mutates drive state.
    pub fn get_status(&self) -> DriveResult<DriveStatus> {
        let sw = self.read_statusword()?;
        let position = self.sdo.read(&od::ACTUAL_POSITION)? as i32;
        let velocity = self.sdo.read(&od::ACTUAL_VELOCITY)? as i32;
        let error_code = self.sdo.read(&od::ERROR_CODE)? as u16;
        Ok(DriveStatus {
            state: sw.state(),
            statusword: sw,
            position,
            velocity,
            error_code,
            target_reached: sw.target_reached(),
            homing_attained: sw.homing_attained(),
            warning: sw.warning(),
        })
    }
}
