pub mod cloud;
pub mod decode;
pub mod pack;

pub use cloud::{Point, PointCloud};
pub use decode::{FormatError, decode, decode_bytes, decode_str};
pub use pack::{MaxPoints, PackError, PackedBuffer, PackedIndices, pack};
