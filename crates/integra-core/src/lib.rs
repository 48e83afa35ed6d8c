pub mod cancel;
pub mod consts;
pub mod error;
pub mod fileset;
pub mod io;
pub mod math;
pub mod noise;
pub mod pipeline;
pub mod stack;
pub mod transform;
