//! Side workflows run by the coordinator outside the generation cycle.

pub mod hud;
pub mod poster;

pub use hud::{HudGenerationResult, HudWorkflow};
pub use poster::{PosterOutcome, PosterWorkflow};
