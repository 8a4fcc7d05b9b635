//! State that outlives a single [`SyncController`](crate::SyncController).
//!
//! The host owns one `SessionContext` for the whole process.  A controller
//! is built from it and hands it back through `into_context`, so a rebuilt
//! controller keeps the open connection, the accumulated world, and the
//! view on screen.

use crate::transport::{Connector, Session};
use crate::view::WorldView;
use crate::world::RemoteServer;

pub struct SessionContext<C: Connector> {
    pub session: Option<Session<C>>,
    pub remote: Option<RemoteServer>,
    pub view: Option<Box<dyn WorldView>>,
}

impl<C: Connector> SessionContext<C> {
    /// Nothing stored yet: the first controller connects from scratch.
    pub fn new() -> Self {
        Self {
            session: None,
            remote: None,
            view: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.remote.is_none() && self.view.is_none()
    }
}

impl<C: Connector> Default for SessionContext<C> {
    fn default() -> Self {
        Self::new()
    }
}
