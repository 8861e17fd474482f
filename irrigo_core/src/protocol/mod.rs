//! Per-channel irrigation protocols: primitive steps and the sequencer that
//! runs an ordered, optionally cyclic list of them.

pub mod sequencer;
pub mod step;

pub use sequencer::{MAX_STEPS, Sequencer, SequencerTick};
pub use step::{
    HoldWeight, OscillateInRange, Step, StepContext, StepKind, StepOutcome, StepProgress, Wait,
};
