use std::path::Path;

use image::DynamicImage;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Descriptor, DescriptorExtractor, ExtractError};

const SCRFD_MODEL: &str = "scrfd_500m_bnkps.onnx";
const ARCFACE_MODEL: &str = "w600k_r50.onnx";
const SCRFD_INPUT: u32 = 640;
const ARCFACE_INPUT: u32 = 112;
const MIN_FACE_PX: f32 = 8.0;
/// On unit-length ArcFace vectors, about cosine similarity 0.4.
pub const ARCFACE_TOLERANCE: f64 = 1.1;

#[derive(Debug, Clone)]
struct FaceBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// SCRFD detection followed by ArcFace embedding, both run in-process.
///
/// When several faces are detected the most confident one is embedded. The
/// descriptor is the L2-normalised 512-d ArcFace vector.
pub struct OnnxExtractor {
    confidence_threshold: f32,
    scrfd: Mutex<Session>,
    arcface: Mutex<Session>,
}

fn model_err(context: &str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Model(format!("{}: {}", context, e))
}

impl OnnxExtractor {
    pub fn load(models_dir: &Path) -> Result<Self, ExtractError> {
        let scrfd_path = models_dir.join(SCRFD_MODEL);
        let arcface_path = models_dir.join(ARCFACE_MODEL);
        if !scrfd_path.exists() || !arcface_path.exists() {
            return Err(ExtractError::Model(format!(
                "face models missing; expected SCRFD at {:?} and ArcFace at {:?}",
                scrfd_path, arcface_path
            )));
        }

        let scrfd = Session::builder()
            .map_err(|e| model_err("session builder", e))?
            .commit_from_file(&scrfd_path)
            .map_err(|e| model_err("failed to create SCRFD session", e))?;
        let arcface = Session::builder()
            .map_err(|e| model_err("session builder", e))?
            .commit_from_file(&arcface_path)
            .map_err(|e| model_err("failed to create ArcFace session", e))?;

        let confidence_threshold = std::env::var("FACEMATCH_FACE_CONFIDENCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.5);

        info!("Face models loaded: SCRFD={:?} ArcFace={:?}", scrfd_path, arcface_path);
        Ok(Self {
            confidence_threshold,
            scrfd: Mutex::new(scrfd),
            arcface: Mutex::new(arcface),
        })
    }

    /// Letterbox into a 640x640 BGR tensor normalised to roughly [-1, 1].
    fn preprocess_scrfd(image: &DynamicImage) -> (Vec<f32>, f32) {
        let (ow, oh) = (image.width() as f32, image.height() as f32);
        let side = SCRFD_INPUT as f32;
        let scale = side / ow.max(oh);
        let nw = ((ow * scale) as u32).max(1);
        let nh = ((oh * scale) as u32).max(1);
        let resized = image.resize_exact(nw, nh, image::imageops::FilterType::Triangle);
        let mut padded = DynamicImage::new_rgb8(SCRFD_INPUT, SCRFD_INPUT);
        image::imageops::overlay(&mut padded, &resized, 0, 0);
        let rgb = padded.to_rgb8();
        let n = (SCRFD_INPUT * SCRFD_INPUT) as usize;
        let mut data = vec![0f32; 3 * n];
        for (i, p) in rgb.pixels().enumerate() {
            // InsightFace detectors expect BGR
            data[i] = (p[2] as f32 - 127.5) / 128.0;
            data[n + i] = (p[1] as f32 - 127.5) / 128.0;
            data[2 * n + i] = (p[0] as f32 - 127.5) / 128.0;
        }
        (data, scale)
    }

    fn preprocess_arcface(face: &DynamicImage) -> Vec<f32> {
        let rgb = face
            .resize_exact(ARCFACE_INPUT, ARCFACE_INPUT, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let n = (ARCFACE_INPUT * ARCFACE_INPUT) as usize;
        let mut data = vec![0f32; 3 * n];
        for (i, p) in rgb.pixels().enumerate() {
            for c in 0..3 {
                data[c * n + i] = (p[c] as f32 - 127.5) / 128.0;
            }
        }
        data
    }

    fn detect_best(&self, image: &DynamicImage) -> Result<Option<FaceBox>, ExtractError> {
        let (data, scale) = Self::preprocess_scrfd(image);
        let (img_w, img_h) = (image.width() as f32, image.height() as f32);

        let mut session = self.scrfd.lock();
        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((vec![1i64, 3, SCRFD_INPUT as i64, SCRFD_INPUT as i64], data))
            .map_err(|e| model_err("failed to create SCRFD input tensor", e))?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .map_err(|e| model_err("SCRFD inference failed", e))?;

        let mut best: Option<FaceBox> = None;
        for stride in [8u32, 16, 32] {
            let (Some(sv), Some(bv)) = (
                outputs.get(&format!("score_{}", stride)),
                outputs.get(&format!("bbox_{}", stride)),
            ) else {
                continue;
            };
            let (Ok((_, scores)), Ok((_, boxes))) = (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>()) else {
                continue;
            };
            let grid = (SCRFD_INPUT / stride) as usize;
            let points = grid * grid;
            if points == 0 || scores.len() % points != 0 || boxes.len() < scores.len() * 4 {
                debug!("SCRFD stride {}: unexpected output sizes", stride);
                continue;
            }
            let anchors = scores.len() / points;
            let s = stride as f32;
            for (idx, &conf) in scores.iter().enumerate() {
                if conf < self.confidence_threshold {
                    continue;
                }
                if best.as_ref().is_some_and(|b| b.confidence >= conf) {
                    continue;
                }
                let cell = idx / anchors;
                let cx = (cell % grid) as f32 * s;
                let cy = (cell / grid) as f32 * s;
                let b = &boxes[idx * 4..idx * 4 + 4];
                let x1 = ((cx - b[0] * s) / scale).clamp(0.0, img_w);
                let y1 = ((cy - b[1] * s) / scale).clamp(0.0, img_h);
                let x2 = ((cx + b[2] * s) / scale).clamp(0.0, img_w);
                let y2 = ((cy + b[3] * s) / scale).clamp(0.0, img_h);
                if x2 - x1 < MIN_FACE_PX || y2 - y1 < MIN_FACE_PX {
                    continue;
                }
                best = Some(FaceBox { x1, y1, x2, y2, confidence: conf });
            }
        }
        Ok(best)
    }

    fn embed(&self, face: &DynamicImage) -> Result<Option<Descriptor>, ExtractError> {
        let data = Self::preprocess_arcface(face);
        let mut session = self.arcface.lock();
        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((vec![1i64, 3, ARCFACE_INPUT as i64, ARCFACE_INPUT as i64], data))
            .map_err(|e| model_err("failed to create ArcFace input tensor", e))?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .map_err(|e| model_err("ArcFace inference failed", e))?;
        let Some(key) = outputs.keys().next().map(str::to_string) else {
            return Err(ExtractError::Model("ArcFace produced no outputs".into()));
        };
        let Some(value) = outputs.get(&key) else {
            return Ok(None);
        };
        let (_, slice) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| model_err("failed to read ArcFace output", e))?;
        let norm = slice.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Ok(None);
        }
        Ok(Some(slice.iter().map(|x| (*x / norm) as f64).collect()))
    }
}

impl DescriptorExtractor for OnnxExtractor {
    fn name(&self) -> &str {
        "onnx"
    }

    fn default_tolerance(&self) -> f64 {
        ARCFACE_TOLERANCE
    }

    fn extract(&self, bytes: &[u8]) -> Result<Option<Descriptor>, ExtractError> {
        let img = image::load_from_memory(bytes)?;
        let Some(face) = self.detect_best(&img)? else {
            return Ok(None);
        };
        debug!(
            "Face at ({:.0},{:.0})-({:.0},{:.0}) conf={:.3}",
            face.x1, face.y1, face.x2, face.y2, face.confidence
        );
        let (x1, y1) = (face.x1 as u32, face.y1 as u32);
        let (x2, y2) = (face.x2 as u32, face.y2 as u32);
        if x2 <= x1 || y2 <= y1 {
            return Ok(None);
        }
        let crop = img.crop_imm(x1, y1, x2 - x1, y2 - y1);
        self.embed(&crop)
    }
}
