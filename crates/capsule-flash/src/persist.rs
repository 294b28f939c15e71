use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{FlashError, FlashResult};
use crate::image::FlashImage;

/// Magic bytes opening every image file.
pub const IMAGE_MAGIC: &[u8; 4] = b"CAPS";
/// Current image file format version.
pub const IMAGE_VERSION: u32 = 1;

/// Header size: 4 bytes magic + 4 bytes version + 4 bytes CRC.
const HEADER_SIZE: usize = 12;

impl FlashImage {
    /// Serialize the image into a framed byte vector.
    ///
    /// On-disk format:
    /// ```text
    /// [4 bytes: magic "CAPS"]
    /// [4 bytes: format version (big-endian u32)]
    /// [4 bytes: CRC32 of payload (big-endian u32)]
    /// [N bytes: payload (bincode-serialized FlashImage)]
    /// ```
    pub fn to_bytes(&self) -> FlashResult<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| FlashError::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(IMAGE_MAGIC);
        out.extend_from_slice(&IMAGE_VERSION.to_be_bytes());
        out.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a framed image, verifying magic, version, checksum, and that the
    /// file table fits the memory it describes.
    pub fn from_bytes(data: &[u8]) -> FlashResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FlashError::Serialization(format!(
                "image too short: {} bytes",
                data.len()
            )));
        }
        if &data[0..4] != IMAGE_MAGIC {
            return Err(FlashError::InvalidMagic {
                expected: String::from_utf8_lossy(IMAGE_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != IMAGE_VERSION {
            return Err(FlashError::UnsupportedVersion(version));
        }
        let expected = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let payload = &data[HEADER_SIZE..];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(FlashError::ChecksumMismatch { expected, actual });
        }
        let image: Self =
            bincode::deserialize(payload).map_err(|e| FlashError::Serialization(e.to_string()))?;
        image.validate()?;
        Ok(image)
    }

    /// Write the image to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> FlashResult<()> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &bytes)?;
        debug!(path = %path.display(), len = bytes.len(), "flash image saved");
        Ok(())
    }

    /// Read an image previously written by [`save`](Self::save).
    pub fn load(path: &Path) -> FlashResult<Self> {
        let bytes = fs::read(path)?;
        let image = Self::from_bytes(&bytes)?;
        debug!(path = %path.display(), files = image.files().len(), "flash image loaded");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_types::{CodeAddress, FileType};

    fn sample_image() -> FlashImage {
        let mut image = FlashImage::builder(0x400)
            .file(FileType::LIBRARY, &[1, 2, 3])
            .capsule_buffer(32)
            .build();
        image.poke(CodeAddress::new(0x404), &[0x0a, 0x00]).unwrap();
        image
    }

    #[test]
    fn bytes_roundtrip() {
        let image = sample_image();
        let bytes = image.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"CAPS");
        assert_eq!(FlashImage::from_bytes(&bytes).unwrap(), image);
    }

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("device.img");
        let image = sample_image();
        image.save(&path).unwrap();
        assert_eq!(FlashImage::load(&path).unwrap(), image);
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let mut bytes = sample_image().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            FlashImage::from_bytes(&bytes),
            Err(FlashError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic() {
        let mut bytes = sample_image().to_bytes().unwrap();
        bytes[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            FlashImage::from_bytes(&bytes),
            Err(FlashError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn bad_version() {
        let mut bytes = sample_image().to_bytes().unwrap();
        bytes[4..8].copy_from_slice(&9u32.to_be_bytes());
        assert!(matches!(
            FlashImage::from_bytes(&bytes),
            Err(FlashError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn too_short() {
        assert!(matches!(
            FlashImage::from_bytes(&[1, 2, 3]),
            Err(FlashError::Serialization(_))
        ));
    }
}
