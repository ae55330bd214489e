use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs;
use std::path::{Path, PathBuf};

/// Longest edge of generated thumbnails, in pixels.
pub const THUMBNAIL_SIZE: u32 = 200;

/// Reads only the image header to find its size.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .with_guessed_format()?;
    let dims = reader
        .into_dimensions()
        .with_context(|| format!("Failed to read image header of {}", path.display()))?;
    Ok(dims)
}

pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    Ok(img)
}

/// Scales `src` to fit within `size`x`size` keeping its aspect ratio and
/// stores it as `<file name>.jpg` inside `thumbs_dir`.
pub fn generate_thumbnail(src: &Path, thumbs_dir: &Path, size: u32) -> Result<PathBuf> {
    let name = src
        .file_name()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Cannot derive a thumbnail name from {}", src.display()))?;
    fs::create_dir_all(thumbs_dir)?;
    let target = thumbs_dir.join(format!("{}.jpg", name));

    let img = decode_image(src)?;
    let thumb = img.thumbnail(size, size);
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(thumb.to_rgb8())
        .save_with_format(&target, ImageFormat::Jpeg)
        .with_context(|| format!("Failed to save thumbnail {}", target.display()))?;

    log::debug!("Generated thumbnail: {}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 120, 200]))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn thumbnail_keeps_aspect_ratio() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("wide.png");
        write_png(&src, 400, 100);

        let thumb = generate_thumbnail(&src, &dir.path().join("thumbs"), 200).unwrap();

        assert_eq!(thumb.file_name().unwrap(), "wide.png.jpg");
        assert_eq!(image_dimensions(&thumb).unwrap(), (200, 50));
    }

    #[test]
    fn same_stem_different_extension_get_separate_thumbnails() {
        let dir = TempDir::new().unwrap();
        let thumbs = dir.path().join("thumbs");
        let png = dir.path().join("a.png");
        let jpg = dir.path().join("a.jpg");
        write_png(&png, 40, 20);
        RgbImage::from_pixel(20, 40, Rgb([1, 2, 3]))
            .save_with_format(&jpg, ImageFormat::Jpeg)
            .unwrap();

        let png_thumb = generate_thumbnail(&png, &thumbs, 10).unwrap();
        let jpg_thumb = generate_thumbnail(&jpg, &thumbs, 10).unwrap();

        assert_ne!(png_thumb, jpg_thumb);
        assert_eq!(image_dimensions(&png_thumb).unwrap(), (10, 5));
        assert_eq!(image_dimensions(&jpg_thumb).unwrap(), (5, 10));
    }

    #[test]
    fn dimensions_do_not_depend_on_extension() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("noext");
        write_png(&src, 33, 21);
        assert_eq!(image_dimensions(&src).unwrap(), (33, 21));
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bad.jpg");
        fs::write(&src, b"definitely not an image").unwrap();
        assert!(generate_thumbnail(&src, dir.path(), 200).is_err());
    }
}
