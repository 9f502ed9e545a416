pub mod codec;
pub mod config;
mod ply;
pub use ply::{read_ply, write_ply, write_ply_binary};
mod workspace;
pub use workspace::{read_calibration, FusionWorkspace};
