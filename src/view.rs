//! Projection of the [`WorldModel`] onto something the player can see.
//!
//! A [`ViewSlot`] holds the view currently rendering plus at most one view
//! waiting to replace it.  Replacement happens only at a tick boundary, so a
//! view is never destroyed while the tick that uses it is still running:
//!
//! ```text
//!   tick N:   replace(B)          current = A, pending = B
//!             render              A.update
//!   tick N+1: swap_at_boundary    A.destroy, current = B
//!             render              B.update
//! ```

use log::info;

use crate::world::WorldModel;

pub trait WorldView {
    /// Reflect the current model.  Called once per online tick.
    fn update(&mut self, world: &WorldModel);

    /// Release everything the view created.  No `update` follows.
    fn destroy(&mut self);
}

#[derive(Default)]
pub struct ViewSlot {
    current: Option<Box<dyn WorldView>>,
    pending: Option<Box<dyn WorldView>>,
}

impl ViewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot that starts out rendering `view`.
    pub fn with_current(view: Box<dyn WorldView>) -> Self {
        Self {
            current: Some(view),
            pending: None,
        }
    }

    /// Queue `view` to take over at the next boundary.  A view queued
    /// earlier and never shown is destroyed right away.
    pub fn replace(&mut self, view: Box<dyn WorldView>) {
        if let Some(mut never_shown) = self.pending.replace(view) {
            never_shown.destroy();
        }
    }

    /// Install the pending view, destroying the one it replaces.
    ///
    /// Returns `true` when a swap happened.
    pub fn swap_at_boundary(&mut self) -> bool {
        let Some(next) = self.pending.take() else {
            return false;
        };
        if let Some(mut previous) = self.current.replace(next) {
            previous.destroy();
            info!("Previous View destroyed");
        }
        true
    }

    pub fn render(&mut self, world: &WorldModel) {
        if let Some(view) = self.current.as_mut() {
            view.update(world);
        }
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the view that should survive a controller reconstruction: the
    /// pending one if a swap is outstanding, otherwise the current one.
    /// Whichever is left behind is destroyed.
    pub fn into_surviving(mut self) -> Option<Box<dyn WorldView>> {
        match self.pending.take() {
            Some(next) => {
                if let Some(mut previous) = self.current.take() {
                    previous.destroy();
                }
                Some(next)
            }
            None => self.current.take(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingView
// ---------------------------------------------------------------------------

/// View that reports form-count changes through the log.  Used by the
/// headless client.
#[derive(Debug, Default)]
pub struct LoggingView {
    last_count: Option<usize>,
    destroyed: bool,
}

impl LoggingView {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorldView for LoggingView {
    fn update(&mut self, world: &WorldModel) {
        if self.destroyed {
            return;
        }
        let count = world.form_count();
        if self.last_count != Some(count) {
            info!(
                "[view] {} forms in view (player form {:?})",
                count, world.player_character_form_idx
            );
            self.last_count = Some(count);
        }
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.last_count = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
