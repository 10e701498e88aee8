pub mod debug;
pub mod paths;
pub mod settings;

pub use debug::*;
pub use paths::*;
pub use settings::*;
