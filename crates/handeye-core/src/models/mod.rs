//! Camera model: pinhole intrinsics followed by Brown–Conrady distortion.
//!
//! `pixel = intrinsics(distortion(projection(p_c)))`

mod camera;
mod distortion;
mod intrinsics;

pub use camera::*;
pub use distortion::*;
pub use intrinsics::*;
