use std::fs;
use std::process::Command;
use thiserror::Error;

/// Errors raised while recognizing text in an image.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Temporary files for the OCR engine could not be prepared.
    #[error("failed to stage image for OCR: {0}")]
    Io(#[from] std::io::Error),
    /// OCR engine exited unsuccessfully.
    #[error("OCR engine failed: {0}")]
    Engine(String),
}

/// Recognizes text in a raster image.
pub trait TextRecognizer: Send + Sync {
    /// Return the text recognized in `image` (encoded image bytes, e.g. JPEG).
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// OCR through the `tesseract` command-line tool.
pub struct TesseractRecognizer {
    language: String,
}

impl TesseractRecognizer {
    /// Recognize text using the given Tesseract language pack (e.g. `eng`).
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Check whether `tesseract` is installed and runnable.
    pub fn is_available() -> bool {
        Command::new("tesseract")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let temp_dir = std::env::temp_dir().join(format!("rusty-docs-ocr-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir)?;
        let input_path = temp_dir.join("image.jpg");

        let result = fs::write(&input_path, image)
            .map_err(OcrError::from)
            .and_then(|()| {
                Command::new("tesseract")
                    .arg(&input_path)
                    .arg("stdout")
                    .args(["-l", &self.language])
                    .output()
                    .map_err(OcrError::from)
            });
        fs::remove_dir_all(&temp_dir).ok();

        let output = result?;
        if !output.status.success() {
            return Err(OcrError::Engine(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
