//! Traits for collaborators of the sorter stage

use crate::common::EventRef;
use tokio::sync::mpsc;

/// Row decoder fed by the sorter stage.
///
/// The stage sends every forwarded row event to [`Mounter::input`] after
/// arming its finish signal; the mounter decodes it off the critical path
/// and calls [`mark_finished`](crate::common::PolymorphicEvent::mark_finished).
pub trait Mounter: Send + Sync {
    /// Sender side of the mounter's input queue.
    fn input(&self) -> mpsc::Sender<EventRef>;
}
