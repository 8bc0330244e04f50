mod draft;

pub use draft::{handle_line, Command};
