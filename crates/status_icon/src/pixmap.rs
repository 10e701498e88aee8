//! Conversion between image data and the StatusNotifierItem [icon format].
//!
//! [icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/

use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum PixmapError {
    #[error("loading icon from file {path:?}")]
    Load {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("writing icon to {path:?}")]
    Write {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("pixmap of {width}x{height} has {len} bytes of data")]
    Malformed { width: i32, height: i32, len: usize },
}

/// One icon image in network byte order ARGB32, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pixmap {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

/// The wire representation of a pixmap, `(iiay)`.
pub type WirePixmap = (i32, i32, Vec<u8>);

impl Pixmap {
    /// Build a pixmap from tightly packed RGBA rows.
    pub fn from_rgba(width: i32, height: i32, rgba: &[u8]) -> Self {
        let mut data = Vec::with_capacity(rgba.len());
        for chunk in rgba.chunks_exact(4) {
            data.extend_from_slice(&[chunk[3], chunk[0], chunk[1], chunk[2]]);
        }
        Pixmap { width, height, data }
    }

    /// Build a pixmap from tightly packed RGB rows, treating every pixel as opaque.
    pub fn from_rgb(width: i32, height: i32, rgb: &[u8]) -> Self {
        let mut data = Vec::with_capacity(rgb.len() / 3 * 4);
        for chunk in rgb.chunks_exact(3) {
            data.extend_from_slice(&[0xff, chunk[0], chunk[1], chunk[2]]);
        }
        Pixmap { width, height, data }
    }

    pub fn from_image(image: &image::DynamicImage) -> Self {
        let (width, height) = (image.width() as i32, image.height() as i32);
        match image {
            image::DynamicImage::ImageRgb8(rgb) => Pixmap::from_rgb(width, height, rgb.as_raw()),
            other => Pixmap::from_rgba(width, height, other.to_rgba8().as_raw()),
        }
    }

    /// Load an image file scaled to fit `size`x`size`, keeping its aspect ratio.
    pub fn load_file(path: &Path, size: u32) -> Result<Self, PixmapError> {
        let image = image::open(path).map_err(|source| PixmapError::Load { path: path.display().to_string(), source })?;
        let image = if image.width() != size || image.height() != size {
            image.resize(size, size, image::imageops::FilterType::Triangle)
        } else {
            image
        };
        Ok(Pixmap::from_image(&image))
    }

    pub fn from_wire((width, height, data): WirePixmap) -> Self {
        Pixmap { width, height, data }
    }

    pub fn into_wire(self) -> WirePixmap {
        (self.width, self.height, self.data)
    }

    /// Whether the dimensions are positive and the data holds exactly one ARGB32 value per pixel.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.width as usize * self.height as usize * 4
    }

    fn check(&self) -> Result<(), PixmapError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(PixmapError::Malformed { width: self.width, height: self.height, len: self.data.len() })
        }
    }

    /// The image as RGBA rows.
    pub fn to_rgba(&self) -> Result<Vec<u8>, PixmapError> {
        self.check()?;
        let mut rgba = self.data.clone();
        // ARGB -> RGBA
        for chunk in rgba.chunks_mut(4) {
            chunk.rotate_left(1);
        }
        Ok(rgba)
    }

    pub fn write_png(&self, path: &Path) -> Result<(), PixmapError> {
        let rgba = self.to_rgba()?;
        image::save_buffer_with_format(
            path,
            &rgba,
            self.width as u32,
            self.height as u32,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .map_err(|source| PixmapError::Write { path: path.display().to_string(), source })
    }
}

/// Pick the biggest well formed pixmap, skipping malformed ones with a warning.
pub fn largest_valid(pixmaps: Vec<WirePixmap>) -> Option<Pixmap> {
    pixmaps
        .into_iter()
        .map(Pixmap::from_wire)
        .filter(|pixmap| {
            let valid = pixmap.is_valid();
            if !valid {
                log::warn!(
                    "skipping malformed pixmap of {}x{} with {} bytes",
                    pixmap.width,
                    pixmap.height,
                    pixmap.data.len()
                );
            }
            valid
        })
        .max_by_key(|pixmap| pixmap.width as i64 * pixmap.height as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rgba_is_stored_alpha_first() {
        let rgba = [10, 20, 30, 40, 50, 60, 70, 80];
        let pixmap = Pixmap::from_rgba(2, 1, &rgba);
        assert_eq!(pixmap.data, vec![40, 10, 20, 30, 80, 50, 60, 70]);
        assert_eq!(pixmap.to_rgba().unwrap(), rgba.to_vec());
    }

    #[test]
    fn rgb_becomes_opaque() {
        let pixmap = Pixmap::from_rgb(1, 1, &[1, 2, 3]);
        assert_eq!(pixmap.data, vec![0xff, 1, 2, 3]);
    }

    #[test]
    fn malformed_pixmaps_are_skipped() {
        let pixmaps = vec![(64, 64, vec![0; 12]), (2, 2, vec![0; 16]), (1, 1, vec![0; 4]), (0, 0, vec![])];
        let chosen = largest_valid(pixmaps).unwrap();
        assert_eq!((chosen.width, chosen.height), (2, 2));
        assert!(largest_valid(vec![(3, 3, vec![0; 3])]).is_none());
        assert!(Pixmap::from_wire((3, 3, vec![0; 3])).to_rgba().is_err());
    }

    #[test]
    fn png_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icon.png");
        let pixmap = Pixmap::from_rgba(2, 2, &[255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255, 0, 0, 0, 0]);
        pixmap.write_png(&path).unwrap();
        let loaded = Pixmap::load_file(&path, 2).unwrap();
        assert_eq!(loaded, pixmap);
    }
}
