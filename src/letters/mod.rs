//! Letters: data model and the review workflow.

pub mod model;
pub mod workflow;

pub use model::{
    CreateLetterInput, Letter, LetterPatch, LetterStatus, LetterType, LetterView, NewLetter,
};
pub use workflow::LetterWorkflow;
