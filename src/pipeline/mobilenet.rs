//! On-device food pre-screen classifier — behind the `onnx-classifier`
//! feature.
//!
//! A MobileNet-class ImageNet classifier served by ONNX Runtime. The
//! pipeline only sees the `Classifier` trait; this module supplies the
//! production implementation plus the loader wired to the app's models
//! directory.

#[cfg(feature = "onnx-classifier")]
mod onnx {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use ort::session::Session;

    use crate::pipeline::classifier::ClassifierLoader;
    use crate::pipeline::detector::{Classifier, ClassifierError, Prediction};

    /// Model input edge (MobileNet v2: 224x224 RGB).
    const INPUT_SIZE: u32 = 224;

    /// ImageNet channel statistics for input normalization.
    const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

    /// ONNX Runtime image classifier.
    ///
    /// Requires two files in the model directory:
    /// - `model.onnx` — the classifier weights
    /// - `labels.txt` — one class label per line, index-aligned with the
    ///   model's output logits
    ///
    /// Uses interior mutability (Mutex) because `ort::Session::run` requires
    /// `&mut self` but the `Classifier` trait exposes `&self` for shared use.
    pub struct OnnxClassifier {
        session: Mutex<Session>,
        labels: Vec<String>,
    }

    impl OnnxClassifier {
        /// Load model weights and labels from a directory.
        pub fn load(model_dir: &Path) -> Result<Self, ClassifierError> {
            let model_path = model_dir.join("model.onnx");
            let labels_path = model_dir.join("labels.txt");

            if !model_path.exists() {
                return Err(ClassifierError::Load(format!(
                    "model not found at {}",
                    model_path.display()
                )));
            }
            if !labels_path.exists() {
                return Err(ClassifierError::Load(format!(
                    "labels not found at {}",
                    labels_path.display()
                )));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| ClassifierError::Load(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| ClassifierError::Load(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| {
                    ClassifierError::Load(format!("ONNX load failed: {e}"))
                })?;

            let labels: Vec<String> = std::fs::read_to_string(&labels_path)
                .map_err(|e| ClassifierError::Load(format!("labels read failed: {e}")))?
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect();

            if labels.is_empty() {
                return Err(ClassifierError::Load("labels file is empty".into()));
            }

            tracing::info!(
                labels = labels.len(),
                "ONNX classifier loaded from {}",
                model_dir.display()
            );

            Ok(Self {
                session: Mutex::new(session),
                labels,
            })
        }

        /// Decode + resize + normalize into an NCHW tensor.
        fn prepare_input(
            &self,
            image_bytes: &[u8],
        ) -> Result<ndarray::Array4<f32>, ClassifierError> {
            let img = image::load_from_memory(image_bytes)
                .map_err(|e| ClassifierError::Inference(format!("decode failed: {e}")))?
                .resize_exact(
                    INPUT_SIZE,
                    INPUT_SIZE,
                    image::imageops::FilterType::Triangle,
                )
                .to_rgb8();

            let size = INPUT_SIZE as usize;
            let mut input = ndarray::Array4::<f32>::zeros((1, 3, size, size));
            for (x, y, pixel) in img.enumerate_pixels() {
                for channel in 0..3 {
                    let value = pixel.0[channel] as f32 / 255.0;
                    input[[0, channel, y as usize, x as usize]] =
                        (value - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
                }
            }
            Ok(input)
        }
    }

    impl Classifier for OnnxClassifier {
        fn classify(
            &self,
            image_bytes: &[u8],
            top_k: usize,
        ) -> Result<Vec<Prediction>, ClassifierError> {
            use ort::value::TensorRef;

            let input = self.prepare_input(image_bytes)?;
            let tensor = TensorRef::from_array_view(&input)
                .map_err(|e| ClassifierError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| ClassifierError::Inference("session lock poisoned".into()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| ClassifierError::Inference(format!("inference failed: {e}")))?;

            let (shape, logits) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| ClassifierError::Inference(format!("output extraction: {e}")))?;

            let class_count = *shape.last().unwrap_or(&0) as usize;
            if class_count != self.labels.len() {
                return Err(ClassifierError::Inference(format!(
                    "model emits {class_count} classes but labels file has {}",
                    self.labels.len()
                )));
            }

            let probabilities = softmax(&logits[..class_count]);
            let mut ranked: Vec<(usize, f32)> = probabilities.into_iter().enumerate().collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            Ok(ranked
                .into_iter()
                .take(top_k)
                .map(|(index, probability)| Prediction {
                    label: self.labels[index].clone(),
                    probability,
                })
                .collect())
        }
    }

    /// Numerically stable softmax.
    fn softmax(logits: &[f32]) -> Vec<f32> {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        if sum > 0.0 {
            exps.into_iter().map(|e| e / sum).collect()
        } else {
            exps
        }
    }

    /// Loader that reads the classifier from a model directory on first use.
    pub struct FileClassifierLoader {
        model_dir: PathBuf,
    }

    impl FileClassifierLoader {
        pub fn new(model_dir: PathBuf) -> Self {
            Self { model_dir }
        }

        /// Loader pointed at the app's default classifier directory.
        pub fn default_location() -> Self {
            Self::new(crate::config::classifier_model_dir())
        }
    }

    impl ClassifierLoader for FileClassifierLoader {
        fn load(&self) -> Result<Arc<dyn Classifier>, ClassifierError> {
            Ok(Arc::new(OnnxClassifier::load(&self.model_dir)?))
        }
    }

}

#[cfg(feature = "onnx-classifier")]
pub use onnx::{FileClassifierLoader, OnnxClassifier};
