//! CiA‑402 drive power state machine.
//!
//! Everything here is pure: the statusword decoder maps raw 16-bit words to
//! drive states, and [`controlword_for`] computes the controlword for the
//! next legal hop toward a desired state. I/O and polling live in the
//! controller.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// CiA‑402 controlword bits (object 0x6040).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Controlword: u16 {
        /// Switch on.
        const SWITCH_ON        = 0x0001;
        /// Enable voltage.
        const ENABLE_VOLTAGE   = 0x0002;
        /// Quick stop (active low: clearing it while voltage is enabled
        /// commands the quick stop).
        const QUICK_STOP       = 0x0004;
        /// Enable operation.
        const ENABLE_OPERATION = 0x0008;
        /// New setpoint / start motion trigger (mode specific, bit 4).
        const NEW_SETPOINT     = 0x0010;
        /// Fault reset (rising edge clears a latched fault).
        const FAULT_RESET      = 0x0080;
    }
}

impl Controlword {
    /// "Shutdown" command: Switch On Disabled → Ready to Switch On.
    #[must_use]
    pub fn shutdown() -> Self {
        Self::ENABLE_VOLTAGE | Self::QUICK_STOP
    }

    /// "Switch on" command: Ready to Switch On → Switched On.
    #[must_use]
    pub fn switch_on() -> Self {
        Self::SWITCH_ON | Self::ENABLE_VOLTAGE | Self::QUICK_STOP
    }

    /// "Enable operation" command: Switched On → Operation Enabled.
    #[must_use]
    pub fn enable_operation() -> Self {
        Self::SWITCH_ON | Self::ENABLE_VOLTAGE | Self::QUICK_STOP | Self::ENABLE_OPERATION
    }

    /// "Disable voltage" command: drops back to Switch On Disabled.
    #[must_use]
    pub fn disable_voltage() -> Self {
        Self::empty()
    }

    /// "Quick stop" command: Operation Enabled → Quick Stop Active.
    #[must_use]
    pub fn quick_stop() -> Self {
        Self::ENABLE_VOLTAGE
    }

    /// "Fault reset" command: Fault → Switch On Disabled.
    #[must_use]
    pub fn fault_reset() -> Self {
        Self::FAULT_RESET
    }

    /// Motion trigger: enable-operation pattern with the new-setpoint bit.
    #[must_use]
    pub fn start_motion() -> Self {
        Self::enable_operation() | Self::NEW_SETPOINT
    }
}

bitflags! {
    /// CiA‑402 statusword bits (object 0x6041).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Statusword: u16 {
        /// Ready to switch on.
        const READY_TO_SWITCH_ON = 0x0001;
        /// Switched on.
        const SWITCHED_ON        = 0x0002;
        /// Operation enabled.
        const OPERATION_ENABLED  = 0x0004;
        /// Fault.
        const FAULT              = 0x0008;
        /// Voltage enabled.
        const VOLTAGE_ENABLED    = 0x0010;
        /// Quick stop (active low).
        const QUICK_STOP         = 0x0020;
        /// Switch on disabled.
        const SWITCH_ON_DISABLED = 0x0040;
        /// Warning.
        const WARNING            = 0x0080;
        /// Remote control active.
        const REMOTE             = 0x0200;
        /// Target reached.
        const TARGET_REACHED     = 0x0400;
        /// Internal limit active.
        const INTERNAL_LIMIT     = 0x0800;
        /// Homing attained (bit 12, homing mode).
        const HOMING_ATTAINED    = 0x1000;
        /// Following / homing error (bit 13).
        const FOLLOWING_ERROR    = 0x2000;
    }
}

impl Statusword {
    /// Wrap a raw statusword. All 16 bits are preserved, including ones not
    /// named above; the statusword is untrusted external input.
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self::from_bits_retain(raw)
    }

    /// The raw 16-bit word.
    #[must_use]
    pub fn raw(self) -> u16 {
        self.bits()
    }

    /// Drive state derived from this word. Never cached by callers; always
    /// recomputed from the latest read.
    #[must_use]
    pub fn state(self) -> DriveState {
        decode_status(self.bits())
    }

    /// Fault bit set.
    #[must_use]
    pub fn fault(self) -> bool {
        self.contains(Self::FAULT)
    }

    /// Warning bit set.
    #[must_use]
    pub fn warning(self) -> bool {
        self.contains(Self::WARNING)
    }

    /// Target-reached bit set.
    #[must_use]
    pub fn target_reached(self) -> bool {
        self.contains(Self::TARGET_REACHED)
    }

    /// Homing-attained bit set.
    #[must_use]
    pub fn homing_attained(self) -> bool {
        self.contains(Self::HOMING_ATTAINED)
    }
}

/// CiA‑402 drive power states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveState {
    /// Drive is initializing; no command is accepted.
    NotReadyToSwitchOn,
    /// Power stage disabled; shutdown command is accepted.
    SwitchOnDisabled,
    /// Ready for the switch-on command.
    ReadyToSwitchOn,
    /// Power stage enabled, operation not yet enabled.
    SwitchedOn,
    /// Drive follows motion commands.
    OperationEnabled,
    /// Quick stop ramp in progress.
    QuickStopActive,
    /// Fault reaction ramp in progress; transitions to Fault automatically.
    FaultReactionActive,
    /// Latched fault; only fault reset is accepted.
    Fault,
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotReadyToSwitchOn => "Not Ready to Switch On",
            Self::SwitchOnDisabled => "Switch On Disabled",
            Self::ReadyToSwitchOn => "Ready to Switch On",
            Self::SwitchedOn => "Switched On",
            Self::OperationEnabled => "Operation Enabled",
            Self::QuickStopActive => "Quick Stop Active",
            Self::FaultReactionActive => "Fault Reaction Active",
            Self::Fault => "Fault",
        };
        f.write_str(name)
    }
}

/// Mode of operation values the controller uses (object 0x6060).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum OperationMode {
    /// Profile position mode.
    ProfilePosition = 1,
    /// Homing mode.
    Homing = 6,
}

impl OperationMode {
    /// The raw mode value written to the drive.
    #[must_use]
    pub fn raw(self) -> i8 {
        self as i8
    }
}

/// Decode a raw statusword into the drive state.
///
/// The mask/value table follows the CiA‑402 profile. Fault-family patterns
/// are checked first so a fault is never masked by other bits, and every
/// 16-bit value maps to exactly one state: unrecognized patterns fall back
/// to [`DriveState::NotReadyToSwitchOn`] rather than failing, since the
/// statusword is untrusted external input.
#[must_use]
pub fn decode_status(raw: u16) -> DriveState {
    if raw & 0x004F == 0x000F {
        return DriveState::FaultReactionActive;
    }
    if raw & 0x004F == 0x0008 {
        return DriveState::Fault;
    }
    match raw & 0x006F {
        0x0021 => DriveState::ReadyToSwitchOn,
        0x0023 => DriveState::SwitchedOn,
        0x0027 => DriveState::OperationEnabled,
        0x0007 => DriveState::QuickStopActive,
        _ => {
            if raw & 0x004F == 0x0040 {
                DriveState::SwitchOnDisabled
            } else {
                DriveState::NotReadyToSwitchOn
            }
        }
    }
}

/// Compute the controlword requesting the next legal hop from `current`
/// toward `desired`.
///
/// Returns `None` when the drive is already in `desired`, when `current`
/// only leaves by automatic transition (Not Ready to Switch On, Fault
/// Reaction Active), or when `desired` cannot be commanded at all (the
/// fault-family states are entered by the drive, never requested).
#[must_use]
pub fn controlword_for(current: DriveState, desired: DriveState) -> Option<Controlword> {
    use DriveState::{
        Fault, FaultReactionActive, NotReadyToSwitchOn, OperationEnabled, QuickStopActive,
        ReadyToSwitchOn, SwitchOnDisabled, SwitchedOn,
    };

    if current == desired {
        return None;
    }
    // Only the commandable states can be requested.
    if matches!(desired, NotReadyToSwitchOn | FaultReactionActive | Fault) {
        return None;
    }

    let cw = match (current, desired) {
        // These states transition automatically; there is nothing to send.
        (NotReadyToSwitchOn | FaultReactionActive, _) => return None,

        // Leaving a latched fault always goes through the reset edge.
        (Fault, _) => Controlword::fault_reset(),

        // Power-up chain.
        (SwitchOnDisabled, _) => Controlword::shutdown(),
        (ReadyToSwitchOn, SwitchOnDisabled) => Controlword::disable_voltage(),
        (ReadyToSwitchOn, _) => Controlword::switch_on(),
        (SwitchedOn, SwitchOnDisabled) => Controlword::disable_voltage(),
        (SwitchedOn, ReadyToSwitchOn) => Controlword::shutdown(),
        (SwitchedOn, _) => Controlword::enable_operation(),

        // Leaving Operation Enabled.
        (OperationEnabled, QuickStopActive) => Controlword::quick_stop(),
        (OperationEnabled, SwitchedOn) => Controlword::switch_on(),
        (OperationEnabled, ReadyToSwitchOn) => Controlword::shutdown(),
        (OperationEnabled, _) => Controlword::disable_voltage(),

        // Leaving the quick stop ramp.
        (QuickStopActive, OperationEnabled) => Controlword::enable_operation(),
        (QuickStopActive, _) => Controlword::disable_voltage(),
    };
    Some(cw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controlword_patterns() {
        assert_eq!(Controlword::shutdown().bits(), 0x0006);
        assert_eq!(Controlword::switch_on().bits(), 0x0007);
        assert_eq!(Controlword::enable_operation().bits(), 0x000F);
        assert_eq!(Controlword::disable_voltage().bits(), 0x0000);
        assert_eq!(Controlword::quick_stop().bits(), 0x0002);
        assert_eq!(Controlword::fault_reset().bits(), 0x0080);
        assert_eq!(Controlword::start_motion().bits(), 0x001F);
    }

    #[test]
    fn test_decode_canonical_patterns() {
        assert_eq!(decode_status(0x0000), DriveState::NotReadyToSwitchOn);
        assert_eq!(decode_status(0x0040), DriveState::SwitchOnDisabled);
        assert_eq!(decode_status(0x0021), DriveState::ReadyToSwitchOn);
        assert_eq!(decode_status(0x0023), DriveState::SwitchedOn);
        assert_eq!(decode_status(0x0027), DriveState::OperationEnabled);
        assert_eq!(decode_status(0x0007), DriveState::QuickStopActive);
        assert_eq!(decode_status(0x000F), DriveState::FaultReactionActive);
        assert_eq!(decode_status(0x0008), DriveState::Fault);
    }

    #[test]
    fn test_decode_ignores_mode_specific_bits() {
        // Voltage-enabled, warning, remote, target-reached, homing-attained
        // bits must not change the decoded state.
        assert_eq!(decode_status(0x0637), DriveState::OperationEnabled);
        assert_eq!(decode_status(0x1637), DriveState::OperationEnabled);
        assert_eq!(decode_status(0x0250), DriveState::SwitchOnDisabled);
    }

    #[test]
    fn test_decode_is_total() {
        // Every possible word decodes without panicking, and fault-family
        // patterns always win over everything else set alongside them.
        for raw in 0..=u16::MAX {
            let state = decode_status(raw);
            if raw & 0x004F == 0x000F {
                assert_eq!(state, DriveState::FaultReactionActive, "raw=0x{raw:04X}");
            } else if raw & 0x004F == 0x0008 {
                assert_eq!(state, DriveState::Fault, "raw=0x{raw:04X}");
            }
        }
    }

    #[test]
    fn test_statusword_flags() {
        let sw = Statusword::from_raw(0x1427);
        assert_eq!(sw.state(), DriveState::OperationEnabled);
        assert!(sw.target_reached());
        assert!(sw.homing_attained());
        assert!(!sw.fault());
        assert!(!sw.warning());
    }

    /// Commandable target states.
    const TARGETS: [DriveState; 5] = [
        DriveState::SwitchOnDisabled,
        DriveState::ReadyToSwitchOn,
        DriveState::SwitchedOn,
        DriveState::OperationEnabled,
        DriveState::QuickStopActive,
    ];

    /// What a conforming drive does with a controlword, per the CiA‑402
    /// transition table. Mirrors the mock drive used in integration tests.
    fn apply(state: DriveState, cw: Controlword) -> DriveState {
        use DriveState::{
            Fault, OperationEnabled, QuickStopActive, ReadyToSwitchOn, SwitchOnDisabled,
            SwitchedOn,
        };
        let bits = cw.bits();
        if bits & 0x0080 != 0 {
            return if state == Fault { SwitchOnDisabled } else { state };
        }
        match bits & 0x008F {
            0x000F => match state {
                SwitchedOn | QuickStopActive => OperationEnabled,
                other => other,
            },
            0x0007 => match state {
                ReadyToSwitchOn | OperationEnabled => SwitchedOn,
                other => other,
            },
            0x0006 => match state {
                SwitchOnDisabled | SwitchedOn | OperationEnabled => ReadyToSwitchOn,
                other => other,
            },
            0x0002 => match state {
                OperationEnabled => QuickStopActive,
                ReadyToSwitchOn | SwitchedOn => SwitchOnDisabled,
                other => other,
            },
            0x0000 => match state {
                ReadyToSwitchOn | SwitchedOn | OperationEnabled | QuickStopActive => {
                    SwitchOnDisabled
                }
                other => other,
            },
            _ => state,
        }
    }

    #[test]
    fn test_single_hop_is_always_legal() {
        // Whatever controlword_for proposes must actually move a conforming
        // drive (or leave it in place while it progresses automatically);
        // it must never push the drive into a fault-family state.
        let all = [
            DriveState::NotReadyToSwitchOn,
            DriveState::SwitchOnDisabled,
            DriveState::ReadyToSwitchOn,
            DriveState::SwitchedOn,
            DriveState::OperationEnabled,
            DriveState::QuickStopActive,
            DriveState::FaultReactionActive,
            DriveState::Fault,
        ];
        for current in all {
            for desired in TARGETS {
                if let Some(cw) = controlword_for(current, desired) {
                    let next = apply(current, cw);
                    assert_ne!(
                        next,
                        DriveState::FaultReactionActive,
                        "{current} -> {desired}"
                    );
                    assert_ne!(next, DriveState::Fault, "{current} -> {desired}");
                }
            }
        }
    }

    #[test]
    fn test_chained_hops_reach_every_target() {
        // From every commandable start state (plus Fault), repeatedly
        // following controlword_for must reach the desired state within a
        // bounded number of hops.
        let starts = [
            DriveState::SwitchOnDisabled,
            DriveState::ReadyToSwitchOn,
            DriveState::SwitchedOn,
            DriveState::OperationEnabled,
            DriveState::QuickStopActive,
            DriveState::Fault,
        ];
        for start in starts {
            for desired in TARGETS {
                let mut state = start;
                let mut hops = 0;
                while state != desired {
                    let cw = controlword_for(state, desired)
                        .unwrap_or_else(|| panic!("no hop from {state} toward {desired}"));
                    state = apply(state, cw);
                    hops += 1;
                    assert!(hops <= 8, "{start} -> {desired} did not converge");
                }
            }
        }
    }

    #[test]
    fn test_no_command_from_automatic_states() {
        assert_eq!(
            controlword_for(DriveState::NotReadyToSwitchOn, DriveState::OperationEnabled),
            None
        );
        assert_eq!(
            controlword_for(DriveState::FaultReactionActive, DriveState::SwitchOnDisabled),
            None
        );
    }

    #[test]
    fn test_fault_states_cannot_be_requested() {
        assert_eq!(
            controlword_for(DriveState::OperationEnabled, DriveState::Fault),
            None
        );
        assert_eq!(
            controlword_for(DriveState::SwitchedOn, DriveState::NotReadyToSwitchOn),
            None
        );
    }

    #[test]
    fn test_fault_recovery_goes_through_reset() {
        assert_eq!(
            controlword_for(DriveState::Fault, DriveState::OperationEnabled),
            Some(Controlword::fault_reset())
        );
    }
}
