/// Binary tensor records and their stream codec
use std::io::{self, Read, Write};

use ndarray::{Array4, Axis};

use crate::{DatasetError, Result};

/// Record header: four little-endian u64 dimensions (width, height, maps, samples).
const HEADER_BYTES: usize = 32;

/// A dense rank-4 tensor of `f32` values, laid out `[sample, map, y, x]`.
///
/// This is the unit of storage in a dataset stream: one record per
/// serialized tensor, self-delimiting via its header. A tensor that decodes
/// to zero elements is the in-band end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Array4<f32>,
}

impl Tensor {
    /// Zero-filled tensor with the given shape.
    pub fn new(samples: usize, maps: usize, height: usize, width: usize) -> Self {
        Self {
            data: Array4::zeros((samples, maps, height, width)),
        }
    }

    /// Tensor filled with a constant value.
    pub fn filled(samples: usize, maps: usize, height: usize, width: usize, value: f32) -> Self {
        Self {
            data: Array4::from_elem((samples, maps, height, width), value),
        }
    }

    /// The zero-element tensor, which serializes as the stream sentinel.
    pub fn empty() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Number of sample slots.
    pub fn samples(&self) -> usize {
        self.data.shape()[0]
    }

    /// Number of feature maps (channels).
    pub fn maps(&self) -> usize {
        self.data.shape()[1]
    }

    /// Spatial height in pixels.
    pub fn height(&self) -> usize {
        self.data.shape()[2]
    }

    /// Spatial width in pixels.
    pub fn width(&self) -> usize {
        self.data.shape()[3]
    }

    /// Total element count; zero marks the end-of-stream sentinel.
    pub fn elements(&self) -> usize {
        self.data.len()
    }

    /// Read one value.
    pub fn get(&self, x: usize, y: usize, map: usize, sample: usize) -> f32 {
        self.data[[sample, map, y, x]]
    }

    /// Write one value.
    pub fn set(&mut self, x: usize, y: usize, map: usize, sample: usize, value: f32) {
        self.data[[sample, map, y, x]] = value;
    }

    /// Write this tensor as one self-delimiting record.
    pub fn serialize<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        for dim in [self.width(), self.height(), self.maps(), self.samples()] {
            writer.write_all(&(dim as u64).to_le_bytes())?;
        }
        if self.elements() == 0 {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(self.elements() * 4);
        for &v in self.data.iter() {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        writer.write_all(&payload)?;
        Ok(())
    }

    /// Decode one record from the stream's current position, advancing past it.
    ///
    /// Returns `Ok(None)` when the stream is cleanly exhausted (no bytes
    /// available at a record boundary). A record whose header declares zero
    /// elements is returned as `Some`, so callers can distinguish the in-band
    /// sentinel from physical end-of-stream. Anything else that cannot be
    /// decoded as a record (partial header, truncated payload, dimensions
    /// that overflow the element computation) is a `Malformed` error.
    pub fn deserialize<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Self>> {
        let mut header = [0u8; HEADER_BYTES];
        match read_header(reader, &mut header)? {
            HeaderRead::Eof => return Ok(None),
            HeaderRead::Partial(n) => {
                return Err(DatasetError::Malformed(format!(
                    "header cut short after {n} of {HEADER_BYTES} bytes"
                )))
            }
            HeaderRead::Full => {}
        }

        let mut dims = [0usize; 4];
        for (dim, chunk) in dims.iter_mut().zip(header.chunks_exact(8)) {
            let raw = u64::from_le_bytes(chunk.try_into().unwrap());
            *dim = usize::try_from(raw).map_err(|_| {
                DatasetError::Malformed(format!("dimension {raw} does not fit in memory"))
            })?;
        }
        let [width, height, maps, samples] = dims;

        let elements = samples
            .checked_mul(maps)
            .and_then(|n| n.checked_mul(height))
            .and_then(|n| n.checked_mul(width))
            .filter(|n| n.checked_mul(4).is_some())
            .ok_or_else(|| {
                DatasetError::Malformed(format!(
                    "dimensions {width}x{height}x{maps}x{samples} overflow the element count"
                ))
            })?;

        if elements == 0 {
            return Ok(Some(Self::new(samples, maps, height, width)));
        }

        let mut bytes = vec![0u8; elements * 4];
        reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                DatasetError::Malformed(format!(
                    "payload cut short, expected {elements} elements"
                ))
            } else {
                DatasetError::Io(e)
            }
        })?;

        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let data = Array4::from_shape_vec((samples, maps, height, width), values)
            .map_err(|e| DatasetError::Malformed(e.to_string()))?;
        Ok(Some(Self { data }))
    }

    /// Copy one sample's payload from `source` into a slot of `dest`.
    ///
    /// Returns `false` instead of panicking when either slot is out of range
    /// or the per-sample geometry (maps, height, width) differs.
    pub fn copy_sample(
        source: &Tensor,
        source_sample: usize,
        dest: &mut Tensor,
        dest_sample: usize,
    ) -> bool {
        if source_sample >= source.samples() || dest_sample >= dest.samples() {
            return false;
        }
        let src = source.data.index_axis(Axis(0), source_sample);
        let mut dst = dest.data.index_axis_mut(Axis(0), dest_sample);
        if src.shape() != dst.shape() {
            return false;
        }
        dst.assign(&src);
        true
    }
}

enum HeaderRead {
    /// No bytes available: clean end of stream.
    Eof,
    /// Stream ended inside the header.
    Partial(usize),
    Full,
}

fn read_header<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8; HEADER_BYTES]) -> Result<HeaderRead> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(match filled {
        0 => HeaderRead::Eof,
        n if n < HEADER_BYTES => HeaderRead::Partial(n),
        _ => HeaderRead::Full,
    })
}
