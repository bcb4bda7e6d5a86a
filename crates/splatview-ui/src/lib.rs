pub mod camera_controls;
pub mod screen;
pub mod surface;
pub mod ui_process;

pub use screen::{Screen, ScreenEvent};
pub use surface::{HeadlessSurface, ViewerSurface};
pub use ui_process::{StartError, UiProcess};
