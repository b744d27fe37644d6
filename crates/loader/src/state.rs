use thiserror::Error;

/// Lifecycle of a latent texture within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    NotStarted,
    /// In the copy-destination state.
    Writable,
    /// Permanently in the shader-resource state.
    Finalized,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("texture slot {0} is out of range")]
    UnknownSlot(usize),
    #[error("texture slot {0} was already finalized")]
    AlreadyFinalized(usize),
    #[error("texture slot {0} was never made writable")]
    NotWritable(usize),
}

/// Tracks texture slots so each one gets exactly one begin-write and one
/// finalize transition per batch.
#[derive(Debug, Clone, Default)]
pub struct ResourceStateTracker {
    states: Vec<ResourceState>,
}

impl ResourceStateTracker {
    pub fn new(slots: usize) -> Self {
        Self {
            states: vec![ResourceState::NotStarted; slots],
        }
    }

    pub fn state(&self, slot: usize) -> Option<ResourceState> {
        self.states.get(slot).copied()
    }

    /// Returns `true` when the caller has to record the transition.
    pub fn begin_write(&mut self, slot: usize) -> Result<bool, StateError> {
        let state = self
            .states
            .get_mut(slot)
            .ok_or(StateError::UnknownSlot(slot))?;
        match *state {
            ResourceState::NotStarted => {
                *state = ResourceState::Writable;
                Ok(true)
            }
            ResourceState::Writable => Ok(false),
            ResourceState::Finalized => Err(StateError::AlreadyFinalized(slot)),
        }
    }

    /// Returns `true` when the caller has to record the transition.
    pub fn finalize(&mut self, slot: usize) -> Result<bool, StateError> {
        let state = self
            .states
            .get_mut(slot)
            .ok_or(StateError::UnknownSlot(slot))?;
        match *state {
            ResourceState::NotStarted => Err(StateError::NotWritable(slot)),
            ResourceState::Writable => {
                *state = ResourceState::Finalized;
                Ok(true)
            }
            ResourceState::Finalized => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_transition_each_way() {
        let mut tracker = ResourceStateTracker::new(2);
        assert_eq!(tracker.begin_write(1), Ok(true));
        assert_eq!(tracker.begin_write(1), Ok(false));
        assert_eq!(tracker.finalize(1), Ok(true));
        assert_eq!(tracker.finalize(1), Ok(false));
        assert_eq!(tracker.state(0), Some(ResourceState::NotStarted));
        assert_eq!(tracker.state(1), Some(ResourceState::Finalized));
    }

    #[test]
    fn no_writes_after_finalize() {
        let mut tracker = ResourceStateTracker::new(1);
        assert_eq!(tracker.finalize(0), Err(StateError::NotWritable(0)));
        tracker.begin_write(0).unwrap();
        tracker.finalize(0).unwrap();
        assert_eq!(tracker.begin_write(0), Err(StateError::AlreadyFinalized(0)));
        assert_eq!(tracker.begin_write(3), Err(StateError::UnknownSlot(3)));
    }
}
