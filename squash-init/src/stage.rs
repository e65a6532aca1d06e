//! Linear boot stage tracking.
//!
//! Stages only move forward one step at a time. Nothing before
//! [`BootStage::RootSwitched`] can be rolled back, so the tracker exists to
//! catch sequencing bugs rather than to drive recovery.

use std::fmt;

use tracing::info;

use crate::error::{BootError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStage {
    Start,
    PseudoFsMounted,
    ImageLocated,
    LoopAttached,
    NewRootMounted,
    PseudoFsRelocated,
    RootSwitched,
    OldRootReclaimed,
    /// An exec of an init candidate has been issued. A failed exec chain
    /// ends here with `NoInit`.
    HandedOff,
}

impl BootStage {
    /// The only stage allowed to follow `self`.
    pub fn successor(self) -> Option<BootStage> {
        use BootStage::*;
        match self {
            Start => Some(PseudoFsMounted),
            PseudoFsMounted => Some(ImageLocated),
            ImageLocated => Some(LoopAttached),
            LoopAttached => Some(NewRootMounted),
            NewRootMounted => Some(PseudoFsRelocated),
            PseudoFsRelocated => Some(RootSwitched),
            RootSwitched => Some(OldRootReclaimed),
            OldRootReclaimed => Some(HandedOff),
            HandedOff => None,
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct StageTracker {
    current: BootStage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: BootStage::Start,
        }
    }

    pub fn current(&self) -> BootStage {
        self.current
    }

    /// Move to `next`, which must be the immediate successor of the current stage.
    pub fn advance(&mut self, next: BootStage) -> Result<()> {
        if self.current.successor() != Some(next) {
            return Err(BootError::StageOrder {
                current: self.current,
                next,
            });
        }
        info!(stage = %next, "boot stage reached");
        self.current = next;
        Ok(())
    }
}
