pub mod artifact;
pub mod errors;
pub mod job;
pub mod params;
pub mod process;

pub use artifact::*;
pub use errors::*;
pub use job::*;
pub use params::*;
pub use process::*;
