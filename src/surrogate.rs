use std::collections::HashSet;

use image::{Rgb, RgbImage};

use crate::error::ExplainError;

/// Number of perturbed samples the surrogate is asked to draw.
pub const SAMPLE_BUDGET: usize = 500;
/// Explanations are fitted for this many top-scoring labels.
pub const TOP_LABELS: usize = 3;
/// Gray level used to hide super-pixels that are perturbed away or masked out.
pub const HIDE_COLOR: u8 = 1;
/// At most this many super-pixels contribute to the rendered explanation.
pub const MAX_FEATURES: usize = 5;

const BOUNDARY_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Sampling contract handed to the external surrogate algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurrogateRequest {
    pub num_samples: usize,
    pub top_labels: usize,
    pub hide_color: u8,
}

/// Per-pixel super-pixel labels for one image.
#[derive(Debug, Clone)]
pub struct Segmentation {
    width: u32,
    height: u32,
    labels: Vec<usize>,
}

impl Segmentation {
    pub fn new(width: u32, height: u32, labels: Vec<usize>) -> Result<Self, ExplainError> {
        if labels.len() != (width * height) as usize {
            return Err(ExplainError::Surrogate(format!(
                "segmentation has {} labels for a {}x{} image",
                labels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn label(&self, x: u32, y: u32) -> usize {
        self.labels[(y * self.width + x) as usize]
    }
}

/// Result of one surrogate fit: the segmentation it worked on, the labels it
/// explained (ranked by predicted score), and per-label feature weights as
/// `(segment, weight)` pairs.
#[derive(Debug, Clone)]
pub struct SurrogateExplanation {
    pub segments: Segmentation,
    pub top_labels: Vec<usize>,
    pub feature_weights: Vec<(usize, Vec<(usize, f32)>)>,
}

impl SurrogateExplanation {
    fn weights_for(&self, label: usize) -> Option<&[(usize, f32)]> {
        self.feature_weights
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, w)| w.as_slice())
    }
}

/// The external local-surrogate algorithm: segments the image into
/// super-pixels, samples `request.num_samples` perturbations through
/// `predict`, and fits an interpretable local model per top label. Not
/// implemented in this crate.
pub trait LocalSurrogate {
    fn explain(
        &self,
        image: &RgbImage,
        predict: &dyn Fn(&[RgbImage]) -> Vec<Vec<f32>>,
        request: &SurrogateRequest,
    ) -> Result<SurrogateExplanation, ExplainError>;
}

/// Wrapper applying the fixed call contract to a [`LocalSurrogate`]: 500
/// perturbed samples over the top-3 labels with one hidden baseline color,
/// then the single top label's explanation rendered from its 5 strongest
/// super-pixels (positive and negative), all other regions masked out.
pub struct SurrogateExplainer<S: LocalSurrogate> {
    surrogate: S,
}

impl<S: LocalSurrogate> SurrogateExplainer<S> {
    pub fn new(surrogate: S) -> Self {
        Self { surrogate }
    }

    /// Explain the top predicted class of one image, returning the masked
    /// image with super-pixel boundaries drawn for visualization.
    pub fn explain(
        &self,
        image: &RgbImage,
        predict: &dyn Fn(&[RgbImage]) -> Vec<Vec<f32>>,
    ) -> Result<RgbImage, ExplainError> {
        let request = SurrogateRequest {
            num_samples: SAMPLE_BUDGET,
            top_labels: TOP_LABELS,
            hide_color: HIDE_COLOR,
        };
        let explanation = self.surrogate.explain(image, predict, &request)?;

        if explanation.segments.dimensions() != image.dimensions() {
            return Err(ExplainError::Surrogate(
                "segmentation does not match the image".to_string(),
            ));
        }
        let top = *explanation
            .top_labels
            .first()
            .ok_or_else(|| ExplainError::Surrogate("no labels explained".to_string()))?;
        let weights = explanation
            .weights_for(top)
            .ok_or_else(|| ExplainError::Surrogate(format!("no weights for label {top}")))?;

        // Strongest super-pixels by absolute weight, either sign.
        let mut ranked = weights.to_vec();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        let keep: HashSet<usize> = ranked
            .iter()
            .take(MAX_FEATURES)
            .map(|(segment, _)| *segment)
            .collect();

        let mut out = image.clone();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            if !keep.contains(&explanation.segments.label(x, y)) {
                *pixel = Rgb([HIDE_COLOR; 3]);
            }
        }
        mark_boundaries(&mut out, &explanation.segments);
        Ok(out)
    }
}

/// Color every pixel whose super-pixel label differs from its right or lower
/// neighbor.
fn mark_boundaries(image: &mut RgbImage, segments: &Segmentation) {
    let (width, height) = image.dimensions();
    for y in 0..height {
        for x in 0..width {
            let label = segments.label(x, y);
            let boundary = (x + 1 < width && segments.label(x + 1, y) != label)
                || (y + 1 < height && segments.label(x, y + 1) != label);
            if boundary {
                image.put_pixel(x, y, BOUNDARY_COLOR);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed four-quadrant segmentation with hand-specified weights; asserts
    /// the wrapper passes the documented sampling contract through.
    struct QuadrantSurrogate;

    impl LocalSurrogate for QuadrantSurrogate {
        fn explain(
            &self,
            image: &RgbImage,
            _predict: &dyn Fn(&[RgbImage]) -> Vec<Vec<f32>>,
            request: &SurrogateRequest,
        ) -> Result<SurrogateExplanation, ExplainError> {
            assert_eq!(
                request,
                &SurrogateRequest {
                    num_samples: 500,
                    top_labels: 3,
                    hide_color: 1,
                }
            );

            let (width, height) = image.dimensions();
            let labels = (0..height)
                .flat_map(|y| {
                    (0..width).map(move |x| {
                        usize::from(x >= width / 2) + 2 * usize::from(y >= height / 2)
                    })
                })
                .collect();
            Ok(SurrogateExplanation {
                segments: Segmentation::new(width, height, labels)?,
                top_labels: vec![2, 0, 1],
                feature_weights: vec![
                    (2, vec![(0, 0.8), (1, -0.5), (2, 0.01), (3, 0.02)]),
                    (0, vec![(0, 0.1)]),
                ],
            })
        }
    }

    fn predict_stub(batch: &[RgbImage]) -> Vec<Vec<f32>> {
        batch.iter().map(|_| vec![0.25; 4]).collect()
    }

    #[test]
    fn masks_all_but_the_five_strongest_segments() {
        struct StripeSurrogate;
        impl LocalSurrogate for StripeSurrogate {
            fn explain(
                &self,
                image: &RgbImage,
                _predict: &dyn Fn(&[RgbImage]) -> Vec<Vec<f32>>,
                _request: &SurrogateRequest,
            ) -> Result<SurrogateExplanation, ExplainError> {
                let (width, height) = image.dimensions();
                // Six vertical stripes, two pixels wide each.
                let labels = (0..height)
                    .flat_map(|_| (0..width).map(|x| x as usize / 2))
                    .collect();
                Ok(SurrogateExplanation {
                    segments: Segmentation::new(width, height, labels)?,
                    top_labels: vec![0],
                    feature_weights: vec![(
                        0,
                        vec![
                            (0, 0.9),
                            (1, -0.8),
                            (2, 0.7),
                            (3, 0.6),
                            (4, -0.5),
                            (5, 0.1),
                        ],
                    )],
                })
            }
        }

        let image = RgbImage::from_pixel(12, 4, Rgb([90, 90, 90]));
        let explainer = SurrogateExplainer::new(StripeSurrogate);
        let out = explainer.explain(&image, &predict_stub).unwrap();

        // Negative weights count toward the top five; only the weakest stripe
        // is hidden. Stripe borders are marked on top of the mask.
        assert_eq!(out.get_pixel(0, 0), &Rgb([90, 90, 90]));
        assert_eq!(out.get_pixel(10, 0), &Rgb([HIDE_COLOR; 3]));
        assert_eq!(out.get_pixel(9, 0), &Rgb([255, 255, 0]));
    }

    #[test]
    fn contract_and_boundaries() {
        let image = RgbImage::from_pixel(8, 8, Rgb([90, 90, 90]));
        let explainer = SurrogateExplainer::new(QuadrantSurrogate);
        let out = explainer.explain(&image, &predict_stub).unwrap();

        // All four segments rank within the top five features, so no pixel is
        // hidden; the quadrant borders are marked.
        assert_eq!(out.get_pixel(3, 0), &Rgb([255, 255, 0]));
        assert_eq!(out.get_pixel(0, 3), &Rgb([255, 255, 0]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([90, 90, 90]));
        assert_eq!(out.get_pixel(6, 6), &Rgb([90, 90, 90]));
    }

    #[test]
    fn missing_labels_is_a_surrogate_error() {
        struct EmptySurrogate;
        impl LocalSurrogate for EmptySurrogate {
            fn explain(
                &self,
                image: &RgbImage,
                _predict: &dyn Fn(&[RgbImage]) -> Vec<Vec<f32>>,
                _request: &SurrogateRequest,
            ) -> Result<SurrogateExplanation, ExplainError> {
                let (width, height) = image.dimensions();
                Ok(SurrogateExplanation {
                    segments: Segmentation::new(width, height, vec![0; (width * height) as usize])?,
                    top_labels: vec![],
                    feature_weights: vec![],
                })
            }
        }

        let image = RgbImage::new(4, 4);
        let explainer = SurrogateExplainer::new(EmptySurrogate);
        let err = explainer.explain(&image, &predict_stub).unwrap_err();
        assert!(matches!(err, ExplainError::Surrogate(_)));
    }
}
