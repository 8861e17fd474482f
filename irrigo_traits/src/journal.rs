use crate::HwResult;

/// Last durable record of an actuator move.
///
/// `in_progress` is written `true` before the first increment of a move and
/// `false` (together with the final position) after the last one. Finding it
/// `true` on startup means power was lost mid-move and the recorded position
/// cannot be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JournalEntry {
    pub in_progress: bool,
    pub position: i32,
}

impl JournalEntry {
    pub fn idle(position: i32) -> Self {
        Self {
            in_progress: false,
            position,
        }
    }

    pub fn moving(position: i32) -> Self {
        Self {
            in_progress: true,
            position,
        }
    }
}

/// Durable storage for a single actuator's journal entry.
///
/// `store` must not return before the entry is durable.
pub trait JournalStore: Send {
    /// `Ok(None)` when nothing was ever written.
    fn load(&mut self) -> HwResult<Option<JournalEntry>>;
    fn store(&mut self, entry: JournalEntry) -> HwResult<()>;
}

impl<J: JournalStore + ?Sized> JournalStore for Box<J> {
    fn load(&mut self) -> HwResult<Option<JournalEntry>> {
        (**self).load()
    }

    fn store(&mut self, entry: JournalEntry) -> HwResult<()> {
        (**self).store(entry)
    }
}
