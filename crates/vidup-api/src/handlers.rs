//! Request handlers.

pub mod health;
pub mod jobs;
pub mod storyboard;
pub mod submit;

pub use health::*;
pub use jobs::*;
pub use storyboard::*;
pub use submit::*;
