mod error;
mod outcome;

pub use error::{QpError, Result};
pub use outcome::Outcome;
