pub mod assembler;
pub mod scaler;
pub mod scheduler;
pub mod scorer;

pub use assembler::{assemble, AssembledInput};
pub use scaler::{ScaleError, Scaler};
pub use scorer::{CycleReport, ModelOutcome, Scorer, Stage};
