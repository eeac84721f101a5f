//! Pulls image file paths out of a user message so vision models receive the
//! images themselves instead of their paths.

use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref IMAGE_EXTENSION: Regex = Regex::new(r"(?i)\.(?:jpg|jpeg|png|gif|bmp|webp)$").unwrap();
    static ref REPEATED_BLANKS: Regex = Regex::new(r"[ \t]{2,}").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedImages {
    /// The message with the image paths removed
    pub text: String,
    /// Base64 encoded image contents, in the order the paths appeared
    pub images: Vec<String>,
    pub paths: Vec<PathBuf>,
}

pub fn encode_image(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Find whitespace-separated tokens naming existing image files (`~` is expanded)
/// and load them. Tokens that are not readable image files are left in the text.
pub fn extract_images(text: &str) -> ExtractedImages {
    let mut extracted = ExtractedImages::default();
    let mut remaining = text.to_string();

    for token in text.split_whitespace() {
        if !IMAGE_EXTENSION.is_match(token) {
            continue;
        }
        let path = PathBuf::from(shellexpand::tilde(token).into_owned());
        if !path.is_file() {
            continue;
        }
        match encode_image(&path) {
            Ok(encoded) => {
                extracted.images.push(encoded);
                extracted.paths.push(path);
                remaining = remaining.replacen(token, "", 1);
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "could not read image");
            }
        }
    }

    extracted.text = if extracted.images.is_empty() {
        remaining
    } else {
        REPEATED_BLANKS.replace_all(&remaining, " ").trim().to_string()
    };
    extracted
}
