//! The partial-histogram checkpoint file.
//!
//! A little-endian binary snapshot of the six aggregate partials of a
//! partial-histogram cache. Corruption is never fatal: a reader that cannot
//! validate the file discards it and recomputes.
//!
//! Layout: magic `AUSX`, version (u32), number of bodies (u32), number of
//! bins (u32), then the six partials in order (aa, aw, ww, ax, xx, wx), each
//! as a 2-byte category tag, a 4-byte length and `length × f64` values.

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// The file magic.
pub const MAGIC: [u8; 4] = *b"AUSX";

/// The current format version.
pub const VERSION: u32 = 1;

/// Category tags, in file order.
const TAGS: [u16; 6] = [0, 1, 2, 3, 4, 5];

/// A deserialized checkpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    /// Number of bodies the cache was built for.
    pub bodies: u32,
    /// Number of distance bins.
    pub bins: u32,
    /// The aggregate partials, in file order: aa, aw, ww, ax, xx, wx.
    pub partials: [Vec<f64>; 6],
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.into(),
    ))
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    let mut buf = [0; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

impl Checkpoint {
    /// Constructor.
    ///
    /// # Panics
    ///
    /// Panics if the partials differ in length from `bins`.
    #[must_use]
    pub fn new(bodies: u32, partials: [Vec<f64>; 6]) -> Self {
        let bins = partials[0].len() as u32;
        assert!(partials.iter().all(|p| p.len() as u32 == bins));
        Self {
            bodies,
            bins,
            partials,
        }
    }

    /// Serializes the checkpoint. Writing is not buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying writer fails.
    pub fn write(&self, mut writer: impl Write) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&self.bodies.to_le_bytes())?;
        writer.write_all(&self.bins.to_le_bytes())?;
        for (tag, partial) in TAGS.iter().zip(&self.partials) {
            writer.write_all(&tag.to_le_bytes())?;
            writer.write_all(&(partial.len() as u32).to_le_bytes())?;
            for value in partial {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Deserializes a checkpoint. Reading is not buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] for wrong magic bytes, an unknown version, tag
    /// or length mismatches, or truncation. All of these are non-fatal to
    /// the cache, which discards the file and recomputes.
    pub fn read(mut reader: impl Read) -> Result<Self> {
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(corrupt(format!("wrong magic bytes {magic:?}")));
        }
        let version = read_u32(&mut reader)?;
        if version != VERSION {
            return Err(corrupt(format!("unsupported checkpoint version {version}")));
        }
        let bodies = read_u32(&mut reader)?;
        let bins = read_u32(&mut reader)?;
        if bins == 0 || bins > 1 << 24 {
            return Err(corrupt(format!("implausible bin count {bins}")));
        }

        let mut partials: [Vec<f64>; 6] = Default::default();
        for (expected_tag, slot) in TAGS.iter().zip(&mut partials) {
            let tag = read_u16(&mut reader)?;
            if tag != *expected_tag {
                return Err(corrupt(format!(
                    "unexpected category tag {tag}, expected {expected_tag}"
                )));
            }
            let len = read_u32(&mut reader)?;
            if len != bins {
                return Err(corrupt(format!(
                    "partial {tag} has {len} bins, expected {bins}"
                )));
            }
            let mut values = vec![0.0; len as usize];
            let mut buf = [0; 8];
            for value in &mut values {
                reader.read_exact(&mut buf)?;
                *value = f64::from_le_bytes(buf);
            }
            *slot = values;
        }

        Ok(Self {
            bodies,
            bins,
            partials,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Checkpoint {
        let partials = [
            vec![36.0, 0.0, 72.0],
            vec![0.0, 6.0, 0.0],
            vec![100.0, 0.0, 0.0],
            vec![1.0, 2.0, 3.0],
            vec![0.5, 0.0, 0.0],
            vec![0.0, 0.25, 0.0],
        ];
        Checkpoint::new(3, partials)
    }

    #[test]
    fn round_trip() {
        let checkpoint = sample();
        let mut buffer = Vec::new();
        checkpoint.write(&mut buffer).unwrap();
        let restored = Checkpoint::read(Cursor::new(buffer)).unwrap();
        assert_eq!(checkpoint, restored);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut buffer = Vec::new();
        sample().write(&mut buffer).unwrap();
        buffer[0] = b'Z';
        assert!(matches!(
            Checkpoint::read(Cursor::new(buffer)),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buffer = Vec::new();
        sample().write(&mut buffer).unwrap();
        buffer[4] = 99;
        assert!(Checkpoint::read(Cursor::new(buffer)).is_err());
    }

    #[test]
    fn truncation_is_rejected() {
        let mut buffer = Vec::new();
        sample().write(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 5);
        assert!(Checkpoint::read(Cursor::new(buffer)).is_err());
    }
}
