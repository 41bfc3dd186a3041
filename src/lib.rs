//! Visual explanations for Burn image classifiers.
//!
//! Given a convolutional classifier and an input image, this crate computes
//! which image regions most influenced the predicted class:
//!
//! - [`GradCam`] produces a class-activation heatmap from the gradients of the
//!   predicted class w.r.t. an internal convolutional layer (guided Grad-CAM).
//! - [`render_heatmap`] and [`overlay_heatmap`] turn a raw activation map
//!   into a displayable RGBA heatmap or blend it over the input image.
//! - [`Annotator`] derives bounding boxes or directional arrows from a
//!   colorized heatmap.
//! - [`SurrogateExplainer`] wraps an external local-surrogate algorithm
//!   (perturbation sampling + local fit) behind a fixed call contract.
//!
//! # Example
//!
//! ```ignore
//! use burn::backend::{Autodiff, NdArray};
//! use gradcam_burn::{model::ConvNetConfig, Annotator, GradCam};
//!
//! type B = Autodiff<NdArray>;
//!
//! let device = Default::default();
//! let model = ConvNetConfig::new().init::<B>(&device);
//! let cam = GradCam::new(model, &device)?;
//! let heatmap = cam.compute_heatmap(&image)?;
//! let boxes = Annotator::new().bounding_boxes(&heatmap);
//! ```

mod annotate;
mod cam;
mod error;
pub mod model;
mod render;
mod surrogate;

pub use annotate::*;
pub use cam::*;
pub use error::*;
pub use render::*;
pub use surrogate::*;

/// Canonical display width. Every image leaving the pipeline is at this size.
pub const WIDTH: u32 = 224;
/// Canonical display height.
pub const HEIGHT: u32 = 224;
