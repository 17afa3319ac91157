//! Adaptive readback
//!
//! Staged readback packs pixels into a driver-owned buffer and maps it
//! afterwards, which only pays off if the pack returns before the transfer
//! is done. Some drivers block in the pack anyway, so the engine times the
//! first frames of every transfer-format epoch and demotes to synchronous
//! readback when the pack accounts for most of the transfer time.
//!
//! ## Phases
//!
//! ```text
//!   Synchronous                       (configured)
//!   Trial { frames, sync_frames } --> Stable     (10 frames, not all blocking)
//!                                 \-> Demoted    (10 blocking frames)
//! ```
//!
//! A change of canonical transfer format resets the engine to its initial
//! phase. Nothing else ever moves it backwards: a demoted engine stays
//! demoted until the format changes.

pub mod profile;

use crate::config::ReadbackMode;
use crate::format::TransferFormat;
use crate::logging::OnceNotice;
use std::time::Duration;

/// Frames of evidence gathered per format epoch
pub const TRIAL_FRAMES: u32 = 10;

/// Blocking frames within the trial that demote staged readback
pub const DEMOTE_AFTER: u32 = 10;

/// Pack time over total time above which a frame counts as blocking
pub const BLOCKING_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Configured for synchronous readback
    Synchronous,
    /// Staged readback, still timing frames
    Trial { frames: u32, sync_frames: u32 },
    /// Staged readback, proven to overlap
    Stable,
    /// Staged readback turned out to block and has been switched off
    Demoted,
    /// Readback disabled by configuration
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPath {
    Staged,
    Synchronous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stabilized,
    Demoted,
}

#[derive(Debug)]
pub struct ReadbackEngine {
    mode: ReadbackMode,
    phase: Phase,
    last_format: Option<TransferFormat>,
    path_notice: OnceNotice,
    demotion_notice: OnceNotice,
}

impl ReadbackEngine {
    pub fn new(mode: ReadbackMode) -> Self {
        Self {
            mode,
            phase: Self::initial_phase(mode),
            last_format: None,
            path_notice: OnceNotice::new(),
            demotion_notice: OnceNotice::new(),
        }
    }

    fn initial_phase(mode: ReadbackMode) -> Phase {
        match mode {
            ReadbackMode::Pbo => Phase::Trial {
                frames: 0,
                sync_frames: 0,
            },
            ReadbackMode::Sync => Phase::Synchronous,
            ReadbackMode::None => Phase::Disabled,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> ReadbackMode {
        self.mode
    }

    pub fn last_format(&self) -> Option<TransferFormat> {
        self.last_format
    }

    /// Start a new epoch if the canonical format differs from the last one
    /// seen. Returns true when that happened.
    pub fn observe_format(&mut self, format: TransferFormat) -> bool {
        let canonical = format.canonical();
        let changed = matches!(self.last_format, Some(last) if last != canonical);
        if changed {
            self.reset();
        }
        self.last_format = Some(canonical);
        changed
    }

    fn reset(&mut self) {
        self.phase = Self::initial_phase(self.mode);
        self.path_notice.reset();
        self.demotion_notice.reset();
    }

    /// Transfer path for the next frame, `None` when readback is disabled
    pub fn path(&self) -> Option<TransferPath> {
        match self.phase {
            Phase::Trial { .. } | Phase::Stable => Some(TransferPath::Staged),
            Phase::Synchronous | Phase::Demoted => Some(TransferPath::Synchronous),
            Phase::Disabled => None,
        }
    }

    pub fn uses_staged(&self) -> bool {
        self.path() == Some(TransferPath::Staged)
    }

    /// Feed the timing of one staged frame
    pub fn record_staged(&mut self, pack: Duration, total: Duration) -> Option<Transition> {
        let Phase::Trial {
            mut frames,
            mut sync_frames,
        } = self.phase
        else {
            return None;
        };

        frames += 1;
        if is_blocking(pack, total) {
            sync_frames += 1;
        }

        if sync_frames >= DEMOTE_AFTER {
            self.phase = Phase::Demoted;
            Some(Transition::Demoted)
        } else if frames >= TRIAL_FRAMES {
            self.phase = Phase::Stable;
            Some(Transition::Stabilized)
        } else {
            self.phase = Phase::Trial {
                frames,
                sync_frames,
            };
            None
        }
    }

    /// True once per epoch, for the "using X readback" notice
    pub fn should_announce_path(&self) -> bool {
        self.path_notice.fire()
    }

    /// True once per epoch, for the demotion notice
    pub fn should_report_demotion(&self) -> bool {
        self.demotion_notice.fire()
    }
}

fn is_blocking(pack: Duration, total: Duration) -> bool {
    if total.is_zero() {
        return false;
    }
    pack.as_secs_f64() / total.as_secs_f64() > BLOCKING_RATIO
}

/// Human-readable explanation of a demotion, one line per entry.
///
/// `native` is the surface's own transfer format and `requested` the one
/// the transport asked for.
pub fn demotion_notice(
    native: TransferFormat,
    requested: TransferFormat,
    force_alpha: bool,
) -> Vec<String> {
    let mut lines =
        vec!["Staged readback is not behaving asynchronously. Disabling it.".to_string()];
    if requested == native {
        return lines;
    }
    lines.push(format!(
        "This could be due to a mismatch between the readback pixel format ({}) and the surface pixel format ({}).",
        requested, native
    ));
    let drops_alpha = native.alpha_counterpart() == Some(requested) && native.components() == 4;
    let adds_alpha = native.alpha_counterpart() == Some(requested) && native.components() == 3;
    if drops_alpha && force_alpha {
        lines.push("Try setting VSURF_FORCEALPHA=0.".to_string());
    } else if adds_alpha && !force_alpha {
        lines.push("Try setting VSURF_FORCEALPHA=1.".to_string());
    }
    lines
}
