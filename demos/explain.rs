use burn::backend::{Autodiff, NdArray};
use gradcam_burn::model::{ConvNetConfig, SpatialClassifier};
use gradcam_burn::{overlay_heatmap, quantize_map, Annotator, Colormap, GradCam, OVERLAY_ALPHA};

type Backend = Autodiff<NdArray<f32>>;

pub fn main() {
    // Parse arguments
    let img_path = std::env::args().nth(1).expect("No image path provided");

    // Create the classifier (randomly initialized unless weights are loaded)
    let device = Default::default();
    let model = ConvNetConfig::new().init::<Backend>(&device);

    // Load image
    let img = image::open(&img_path)
        .map_err(|err| format!("Failed to load image {img_path}.\nError: {err}"))
        .unwrap();

    // Resize to the classifier's native input size
    let (width, height) = model.input_size();
    let resized_img = img
        .resize_exact(
            width,
            height,
            image::imageops::FilterType::Triangle, // also known as bilinear in 2D
        )
        .into_rgb8();

    // Classify
    let probs = model.predict(&resized_img, &device).unwrap();
    let (idx, score) = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .unwrap();
    println!("Predicted grade: {}\nScore: {:.4}", idx, score);

    // Explain the prediction
    let cam = GradCam::new(model, &device)
        .map_err(|err| format!("Failed to build the explainer.\nError: {err}"))
        .unwrap();
    println!("Target layer: {}", cam.target_layer());

    let heatmap = cam.compute_heatmap(&resized_img).unwrap();
    heatmap.save("heatmap.png").unwrap();

    // Overlay the raw heatmap on the input
    let raw = quantize_map(
        &cam.activation_map(&resized_img).unwrap(),
        cam.model().input_size(),
    );
    let (_, blended) =
        overlay_heatmap(&raw, &resized_img, OVERLAY_ALPHA, &Colormap::default()).unwrap();
    blended.save("overlay.png").unwrap();

    // Regions of interest as boxes and arrows
    let annotator = Annotator::new();
    annotator.bounding_boxes(&heatmap).save("boxes.png").unwrap();
    annotator.arrows(&heatmap).save("arrows.png").unwrap();

    println!("Saved heatmap.png, overlay.png, boxes.png, arrows.png");
}
