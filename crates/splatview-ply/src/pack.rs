use std::fmt;
use std::str::FromStr;

use glam::Vec3;
use thiserror::Error;
use tracing::trace_span;

use crate::cloud::PointCloud;

/// Floats per packed vertex: position xyz followed by normalized rgb.
pub const FLOATS_PER_POINT: usize = 6;

/// Largest point count that can still be addressed with 16 bit indices.
pub const U16_INDEX_LIMIT: usize = u16::MAX as usize + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Upper bound on the number of points handed to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MaxPoints(usize);

impl MaxPoints {
    pub const DEFAULT: Self = Self(200_000);

    pub const fn new(max_points: usize) -> Self {
        Self(max_points)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl Default for MaxPoints {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for MaxPoints {
    type Error = PackError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value).map(Self).map_err(|_e| {
            PackError::InvalidArgument(format!("max points must be non-negative, got {value}"))
        })
    }
}

impl FromStr for MaxPoints {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_e| PackError::InvalidArgument(format!("not an integer: {s:?}")))?;
        Self::try_from(value)
    }
}

impl fmt::Display for MaxPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Index list for a packed buffer.
///
/// Nb: Small buffers use 16 bit indices. Past 65536 points those can't address
/// every vertex anymore, so 32 bit indices are used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackedIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl PackedIndices {
    fn sequential(count: usize) -> Self {
        if count <= U16_INDEX_LIMIT {
            Self::U16((0..count).map(|i| i as u16).collect())
        } else {
            Self::U32((0..count).map(|i| i as u32).collect())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U16(indices) => indices.len(),
            Self::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            Self::U16(indices) => Box::new(indices.iter().map(|&i| i as u32)),
            Self::U32(indices) => Box::new(indices.iter().copied()),
        }
    }

    /// Size of a single index in bytes.
    pub fn stride(&self) -> usize {
        match self {
            Self::U16(_) => size_of::<u16>(),
            Self::U32(_) => size_of::<u32>(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U16(indices) => bytemuck::cast_slice(indices),
            Self::U32(indices) => bytemuck::cast_slice(indices),
        }
    }
}

/// Interleaved vertex data and index list ready for a point-list draw.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBuffer {
    floats: Vec<f32>,
    indices: PackedIndices,
}

impl PackedBuffer {
    pub fn empty() -> Self {
        Self {
            floats: Vec::new(),
            indices: PackedIndices::U16(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn floats(&self) -> &[f32] {
        &self.floats
    }

    pub fn indices(&self) -> &PackedIndices {
        &self.indices
    }

    /// Vertex data as raw bytes, 24 bytes per point.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.floats)
    }

    pub fn index_bytes(&self) -> &[u8] {
        self.indices.as_bytes()
    }

    /// Byte stride between two vertices.
    pub const fn vertex_stride() -> usize {
        FLOATS_PER_POINT * size_of::<f32>()
    }

    /// Expand back into positions and 8 bit colors.
    pub fn unpack(&self) -> impl Iterator<Item = (Vec3, [u8; 3])> + '_ {
        self.floats.chunks_exact(FLOATS_PER_POINT).map(|v| {
            let channel = |c: f32| (c * 255.0).round().clamp(0.0, 255.0) as u8;
            (
                Vec3::new(v[0], v[1], v[2]),
                [channel(v[3]), channel(v[4]), channel(v[5])],
            )
        })
    }
}

/// Pack the first `max_points` points of a cloud into an interleaved buffer.
pub fn pack(cloud: &PointCloud, max_points: MaxPoints) -> PackedBuffer {
    let _span = trace_span!("Pack points").entered();

    let count = cloud.len().min(max_points.get());
    if count == 0 {
        return PackedBuffer::empty();
    }
    if count < cloud.len() {
        log::info!("Truncating point cloud from {} to {count} points", cloud.len());
    }

    let mut floats = Vec::with_capacity(count * FLOATS_PER_POINT);
    for point in &cloud.points()[..count] {
        let [r, g, b] = point.color;
        floats.extend([
            point.position.x,
            point.position.y,
            point.position.z,
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
        ]);
    }

    PackedBuffer {
        floats,
        indices: PackedIndices::sequential(count),
    }
}
