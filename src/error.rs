/// Error type for explanation operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplainError {
    /// The classifier has no layer with a 4-dimensional output, so no spatial
    /// activations exist to explain. Structural property of the model; not
    /// retryable.
    NoSpatialLayer,
    /// The requested layer does not exist or has no spatial (4D) output.
    UnknownLayer(String),
    /// The input image does not match the expected width/height.
    InvalidImageShape {
        expected: (u32, u32),
        got: (u32, u32),
    },
    /// The requested class index is out of range for the classifier.
    InvalidClass { index: usize, num_classes: usize },
    /// The external surrogate algorithm failed or returned inconsistent data.
    Surrogate(String),
}

impl std::fmt::Display for ExplainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExplainError::NoSpatialLayer => {
                write!(f, "Could not find a layer with a 4D output. Cannot apply Grad-CAM.")
            }
            ExplainError::UnknownLayer(name) => {
                write!(f, "Unknown or non-spatial layer: {}", name)
            }
            ExplainError::InvalidImageShape { expected, got } => write!(
                f,
                "Invalid image shape: expected {}x{}, got {}x{}",
                expected.0, expected.1, got.0, got.1
            ),
            ExplainError::InvalidClass { index, num_classes } => write!(
                f,
                "Class index {} out of range for {} classes",
                index, num_classes
            ),
            ExplainError::Surrogate(msg) => write!(f, "Surrogate explanation error: {}", msg),
        }
    }
}

impl std::error::Error for ExplainError {}
