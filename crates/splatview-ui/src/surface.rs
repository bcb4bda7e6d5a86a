use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use glam::{Mat4, UVec2};
use splatview_ply::PackedBuffer;
use thiserror::Error;

use crate::camera_controls::CameraController;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("Surface isn't open")]
    NotOpen,
    #[error("Invalid surface size {0}")]
    InvalidSize(UVec2),
}

/// Something that can show packed points.
///
/// Geometry is owned by the surface through a [`GeometryHandle`]: loading new
/// geometry drops the old handle, and closing or dropping the surface drops the
/// current one.
pub trait ViewerSurface {
    fn open(&mut self, size: UVec2) -> Result<(), SurfaceError>;
    fn resize(&mut self, size: UVec2) -> Result<(), SurfaceError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;

    /// Replace the displayed geometry.
    fn load_geometry(&mut self, buffer: &PackedBuffer) -> Result<(), SurfaceError>;
    fn clear_geometry(&mut self);

    fn draw(&mut self, camera: &CameraController) -> Result<(), SurfaceError>;
}

/// Uploaded geometry. Releases its resources when dropped.
pub struct GeometryHandle {
    count: usize,
    byte_size: usize,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl GeometryHandle {
    pub fn new(count: usize, byte_size: usize, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            count,
            byte_size,
            release: Some(Box::new(release)),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }
}

impl Drop for GeometryHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for GeometryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryHandle")
            .field("count", &self.count)
            .field("byte_size", &self.byte_size)
            .finish_non_exhaustive()
    }
}

/// Counters shared between a headless surface and whoever wants to watch it.
#[derive(Debug, Default)]
pub struct SurfaceStats {
    live_geometry: AtomicUsize,
    uploads: AtomicUsize,
    frames: AtomicU64,
}

impl SurfaceStats {
    pub fn live_geometry(&self) -> usize {
        self.live_geometry.load(Ordering::Relaxed)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// A surface that keeps geometry in memory and draws nothing.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    size: Option<UVec2>,
    geometry: Option<GeometryHandle>,
    last_view_proj: Option<Mat4>,
    stats: Arc<SurfaceStats>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<SurfaceStats> {
        self.stats.clone()
    }

    pub fn size(&self) -> Option<UVec2> {
        self.size
    }

    pub fn geometry(&self) -> Option<&GeometryHandle> {
        self.geometry.as_ref()
    }

    /// View projection matrix used for the last frame.
    pub fn last_view_proj(&self) -> Option<Mat4> {
        self.last_view_proj
    }

    fn check_size(size: UVec2) -> Result<UVec2, SurfaceError> {
        if size.min_element() == 0 {
            Err(SurfaceError::InvalidSize(size))
        } else {
            Ok(size)
        }
    }
}

impl ViewerSurface for HeadlessSurface {
    fn open(&mut self, size: UVec2) -> Result<(), SurfaceError> {
        self.size = Some(Self::check_size(size)?);
        log::debug!("Opened headless surface at {size}");
        Ok(())
    }

    fn resize(&mut self, size: UVec2) -> Result<(), SurfaceError> {
        if self.size.is_none() {
            return Err(SurfaceError::NotOpen);
        }
        self.size = Some(Self::check_size(size)?);
        Ok(())
    }

    fn close(&mut self) {
        self.clear_geometry();
        self.size = None;
        self.last_view_proj = None;
    }

    fn is_open(&self) -> bool {
        self.size.is_some()
    }

    fn load_geometry(&mut self, buffer: &PackedBuffer) -> Result<(), SurfaceError> {
        if !self.is_open() {
            return Err(SurfaceError::NotOpen);
        }
        // Drop the old geometry before creating the new one.
        self.clear_geometry();

        let byte_size = buffer.vertex_bytes().len() + buffer.index_bytes().len();
        self.stats.uploads.fetch_add(1, Ordering::Relaxed);
        self.stats.live_geometry.fetch_add(1, Ordering::Relaxed);
        let stats = self.stats.clone();
        self.geometry = Some(GeometryHandle::new(buffer.count(), byte_size, move || {
            stats.live_geometry.fetch_sub(1, Ordering::Relaxed);
        }));
        Ok(())
    }

    fn clear_geometry(&mut self) {
        self.geometry = None;
    }

    fn draw(&mut self, camera: &CameraController) -> Result<(), SurfaceError> {
        let size = self.size.ok_or(SurfaceError::NotOpen)?;
        let aspect = size.x as f32 / size.y as f32;
        let proj = Mat4::perspective_rh(camera.settings.fov_y, aspect, 0.01, 1000.0);
        self.last_view_proj = Some(proj * Mat4::from(camera.world_to_local()));
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splatview_ply::{MaxPoints, PointCloud, pack};

    fn buffer(count: usize) -> PackedBuffer {
        let cloud: PointCloud = (0..count)
            .map(|i| splatview_ply::Point::new(glam::Vec3::splat(i as f32), [1, 2, 3]))
            .collect();
        pack(&cloud, MaxPoints::default())
    }

    #[test]
    fn test_lifecycle() {
        let mut surface = HeadlessSurface::new();
        assert_eq!(
            surface.load_geometry(&buffer(3)),
            Err(SurfaceError::NotOpen)
        );
        assert_eq!(
            surface.open(UVec2::new(0, 10)),
            Err(SurfaceError::InvalidSize(UVec2::new(0, 10)))
        );

        surface.open(UVec2::new(640, 480)).unwrap();
        surface.resize(UVec2::new(320, 240)).unwrap();
        assert_eq!(surface.size(), Some(UVec2::new(320, 240)));

        surface.draw(&CameraController::default()).unwrap();
        assert_eq!(surface.stats().frames(), 1);
        assert!(surface.last_view_proj().is_some());

        surface.close();
        assert!(!surface.is_open());
        assert_eq!(
            surface.draw(&CameraController::default()),
            Err(SurfaceError::NotOpen)
        );
    }

    #[test]
    fn test_geometry_is_released() {
        let mut surface = HeadlessSurface::new();
        let stats = surface.stats();
        surface.open(UVec2::new(64, 64)).unwrap();

        surface.load_geometry(&buffer(3)).unwrap();
        assert_eq!(surface.geometry().map(|g| g.count()), Some(3));
        // 3 * 24 bytes of vertices, 3 * 2 bytes of indices.
        assert_eq!(surface.geometry().map(|g| g.byte_size()), Some(78));

        // Replacing keeps a single live geometry.
        surface.load_geometry(&buffer(5)).unwrap();
        assert_eq!(stats.live_geometry(), 1);
        assert_eq!(stats.uploads(), 2);

        surface.clear_geometry();
        assert_eq!(stats.live_geometry(), 0);

        surface.load_geometry(&buffer(2)).unwrap();
        surface.close();
        assert_eq!(stats.live_geometry(), 0);

        surface.open(UVec2::new(64, 64)).unwrap();
        surface.load_geometry(&buffer(2)).unwrap();
        drop(surface);
        assert_eq!(stats.live_geometry(), 0);
    }
}
