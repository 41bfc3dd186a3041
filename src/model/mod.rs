mod adapter;
mod convnet;

pub use adapter::*;
pub use convnet::*;
