//! Image I/O operations service
//!
//! Keeps file access and image encoding out of the composition logic: loading
//! uploads, writing canvases and masks, and the base64 data URIs hosted
//! models accept in place of uploaded files.

use crate::error::{Result, StudioError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Read an upload from disk as raw bytes
    ///
    /// Decoding is left to [`SourceImage::from_bytes`] so that undecodable
    /// files surface as `InvalidImage`.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use backdrop_studio::services::ImageIOService;
    ///
    /// let bytes = ImageIOService::read_upload("product.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    ///
    /// [`SourceImage::from_bytes`]: crate::types::SourceImage::from_bytes
    pub fn read_upload<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            return Err(StudioError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }
        std::fs::read(path_ref).map_err(|e| StudioError::file_io_error("read image file", path_ref, &e))
    }

    /// Save an image, choosing the encoder from the file extension
    ///
    /// Parent directories are created as needed. Unknown or missing extensions
    /// fall back to PNG.
    pub fn save_image<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StudioError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }

        let format = ImageFormat::from_path(path_ref).unwrap_or(ImageFormat::Png);
        let result = match format {
            // JPEG has no alpha channel
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path_ref, format),
            _ => image.save_with_format(path_ref, format),
        };
        result?;

        log::debug!("Saved {:?} image to {}", format, path_ref.display());
        Ok(())
    }

    /// Write already-encoded image bytes (e.g. a downloaded result) to disk
    pub fn write_bytes<P: AsRef<Path>>(bytes: &[u8], path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StudioError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }
        std::fs::write(path_ref, bytes)
            .map_err(|e| StudioError::file_io_error("write output file", path_ref, &e))
    }

    /// Encode an image as PNG bytes
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Encode an image as a `data:image/png;base64,...` URI
    pub fn png_data_uri(image: &DynamicImage) -> Result<String> {
        let png = Self::encode_png(image)?;
        Ok(format!("{}{}", PNG_DATA_URI_PREFIX, STANDARD.encode(png)))
    }

    /// Decode the payload of a base64 data URI
    ///
    /// Returns `None` when `uri` is not a base64 data URI or the payload does
    /// not decode.
    #[must_use]
    pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
        let rest = uri.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        if !header.ends_with(";base64") {
            return None;
        }
        STANDARD.decode(payload.trim()).ok()
    }

    /// Decode image bytes from memory
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }

    /// Read all bytes from an async reader
    pub async fn read_from_reader<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;
        Ok(buffer)
    }
}
