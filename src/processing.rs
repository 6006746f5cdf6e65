use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use image::{
    error::{ImageFormatHint, UnsupportedError, UnsupportedErrorKind},
    imageops::FilterType,
    ColorType, DynamicImage, ImageError, ImageFormat, ImageReader, Limits,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    config::Config,
    utils::{get_file_extension, processed_name},
};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to open {0:?}: {1}")]
    Open(PathBuf, #[source] std::io::Error),

    #[error("Not a file path: {0:?}")]
    InvalidPath(PathBuf),

    #[error("Failed to decode image: {0}")]
    Decode(#[source] ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(#[source] ImageError),

    #[error("Failed to write {0:?}: {1}")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("Image processing exceeded {0:?}")]
    Timeout(Duration),

    #[error("Image processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Produces the bounded-size derived copy of a stored upload.
#[derive(Debug, Clone)]
pub struct ImageTransformer {
    max_dimension: u32,
    max_source_dimension: u32,
    timeout: Duration,
}

impl ImageTransformer {
    pub fn new(max_dimension: u32, max_source_dimension: u32, timeout: Duration) -> Self {
        Self {
            max_dimension,
            max_source_dimension,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_dimension,
            config.max_source_dimension,
            config.processing_timeout(),
        )
    }

    /// Writes `processed_<name>` next to `source` and returns its path.
    /// The source file is left untouched and an existing derived file is
    /// never overwritten.
    ///
    /// The timeout bounds the work as well as the wait: a task that is still
    /// running past its deadline gives up before writing anything.
    pub async fn process(&self, source: &Path) -> Result<PathBuf, TransformError> {
        let source = source.to_path_buf();
        let this = self.clone();
        let deadline = Instant::now() + self.timeout;

        // Decoding and resampling are CPU heavy, keep them off the async workers.
        let task = tokio::task::spawn_blocking(move || this.process_blocking(&source, deadline));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(TransformError::Timeout(self.timeout)),
        }
    }

    fn process_blocking(&self, source: &Path, deadline: Instant) -> Result<PathBuf, TransformError> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransformError::InvalidPath(source.to_path_buf()))?;
        let target = source.with_file_name(processed_name(file_name));

        let mut reader = ImageReader::open(source)
            .map_err(|e| TransformError::Open(source.to_path_buf(), e))?
            .with_guessed_format()
            .map_err(|e| TransformError::Open(source.to_path_buf(), e))?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_source_dimension);
        limits.max_image_height = Some(self.max_source_dimension);
        reader.limits(limits);

        let source_format = reader.format();
        let img = reader.decode().map_err(TransformError::Decode)?;
        self.check_deadline(deadline)?;

        let (width, height) = bounded_dimensions(img.width(), img.height(), self.max_dimension);
        debug!(
            from_w = img.width(),
            from_h = img.height(),
            to_w = width,
            to_h = height,
            "Resizing image"
        );

        let thumbnail = if (width, height) == (img.width(), img.height()) {
            img
        } else {
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        let format = output_format(file_name, source_format).ok_or_else(|| {
            TransformError::Encode(ImageError::Unsupported(
                UnsupportedError::from_format_and_kind(
                    ImageFormatHint::Unknown,
                    UnsupportedErrorKind::Format(ImageFormatHint::Unknown),
                ),
            ))
        })?;

        let thumbnail = encodable(thumbnail, format);
        self.check_deadline(deadline)?;

        write_new(&thumbnail, &target, format)?;
        Ok(target)
    }

    fn check_deadline(&self, deadline: Instant) -> Result<(), TransformError> {
        if Instant::now() >= deadline {
            return Err(TransformError::Timeout(self.timeout));
        }
        Ok(())
    }
}

/// Converts to a pixel layout the encoder for `format` accepts.
fn encodable(img: DynamicImage, format: ImageFormat) -> DynamicImage {
    let color = img.color();
    match format {
        ImageFormat::Png => match color {
            ColorType::Rgb32F => DynamicImage::ImageRgb16(img.to_rgb16()),
            ColorType::Rgba32F => DynamicImage::ImageRgba16(img.to_rgba16()),
            _ => img,
        },
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => match color {
            ColorType::L8 | ColorType::Rgb8 => img,
            _ => DynamicImage::ImageRgb8(img.to_rgb8()),
        },
        ImageFormat::Gif => match color {
            ColorType::Rgba8 => img,
            _ => DynamicImage::ImageRgba8(img.to_rgba8()),
        },
        _ => match color {
            ColorType::Rgb8 | ColorType::Rgba8 => img,
            c if c.has_alpha() => DynamicImage::ImageRgba8(img.to_rgba8()),
            _ => DynamicImage::ImageRgb8(img.to_rgb8()),
        },
    }
}

/// Encodes into a freshly created file; a partial file is removed on failure.
fn write_new(img: &DynamicImage, target: &Path, format: ImageFormat) -> Result<(), TransformError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|e| TransformError::Write(target.to_path_buf(), e))?;
    let mut writer = BufWriter::new(file);

    let written = img
        .write_to(&mut writer, format)
        .map_err(TransformError::Encode)
        .and_then(|()| {
            writer
                .flush()
                .map_err(|e| TransformError::Write(target.to_path_buf(), e))
        });

    if written.is_err() {
        drop(writer);
        let _ = std::fs::remove_file(target);
    }
    written
}

/// Dimensions that fit within `max` on both axes with the aspect ratio kept.
/// Images already within bounds are returned unchanged (no upscaling).
pub fn bounded_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }

    let scale = |short: u32, long: u32| -> u32 {
        let scaled = (short as u64 * max as u64 + long as u64 / 2) / long as u64;
        scaled.clamp(1, max as u64) as u32
    };

    if width >= height {
        (max, scale(height, width))
    } else {
        (scale(width, height), max)
    }
}

/// The format the target's extension names if we can write it,
/// otherwise whatever the source decoded as.
fn output_format(file_name: &str, source_format: Option<ImageFormat>) -> Option<ImageFormat> {
    get_file_extension(file_name)
        .and_then(ImageFormat::from_extension)
        .filter(|f| f.writing_enabled())
        .or(source_format.filter(|f| f.writing_enabled()))
}
