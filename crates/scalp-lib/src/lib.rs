pub mod config;
pub mod heatmap;
pub mod io;
pub mod pipeline;
pub mod remote;
pub mod session;
pub mod signal;
pub mod trace;
pub mod viewsync;

pub use pipeline::*;
pub use session::*;
pub use signal::*;
