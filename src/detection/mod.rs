pub mod detector;
pub mod interpret;
pub mod ocr;

pub use detector::{ObjectDetector, YoloDetector, YoloParams};
pub use interpret::{InterpreterConfig, interpret};
pub use ocr::{OcrsRecognizer, TextRecognizer};
