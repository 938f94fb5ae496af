pub mod analyze;
pub mod analyzers;
pub mod features;
pub mod settings;

pub use analyze::*;
pub use analyzers::*;
pub use features::*;
pub use settings::*;
