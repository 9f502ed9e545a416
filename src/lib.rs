pub mod camera;
pub mod consistency;
pub mod error;
pub mod fusion;
pub mod image;
pub mod io;
pub mod maps;
pub mod model;

mod utils;

pub use crate::fusion::{DepthFusion, FusedMapOutput, FusedPoint, FusionParameters};
pub use crate::model::Model;
