pub mod content;
pub mod extensions;

pub use content::*;
pub use extensions::*;
