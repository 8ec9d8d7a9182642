//! Data models for the daily planner entities.
//!
//! - `TaskRecord`: a scheduled fitness/diet/other task for one day
//! - `ProfileRecord`: per-user physical attributes and nutrition targets
//! - `CompletionRecord`: per-day completion flag

pub mod completion;
pub mod profile;
pub mod task;

pub use completion::CompletionRecord;
pub use profile::{ActivityLevel, FitnessGoal, Gender, NutritionTargets, ProfileRecord};
pub use task::{ExerciseEntry, FoodItem, TaskCategory, TaskDetails, TaskDraft, TaskPatch, TaskRecord};
