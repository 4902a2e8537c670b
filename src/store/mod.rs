pub mod context;
pub mod io;
pub mod types;

pub use context::DataContext;
pub use io::*;
pub use types::{Column, Table};
