use core::f32;

use glam::{Affine3A, Quat, Vec2, Vec3};
use splatview_ply::PointCloud;

/// Where the camera starts, and where it goes back to for an empty cloud.
pub const HOME_POSITION: Vec3 = Vec3::new(0.0, 0.0, 3.0);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraClamping {
    pub min_focus_distance: Option<f32>,
    pub max_focus_distance: Option<f32>,
    pub min_pitch: Option<f32>,
    pub max_pitch: Option<f32>,
    pub min_yaw: Option<f32>,
    pub max_yaw: Option<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraSettings {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub speed_scale: Option<f32>,
    pub clamping: CameraClamping,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_y: 0.8,
            speed_scale: None,
            clamping: CameraClamping::default(),
        }
    }
}

/// Pointer input gathered over one frame, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraInput {
    /// Drag that orbits around the focal point.
    pub orbit: Vec2,
    /// Drag that moves the focal point.
    pub pan: Vec2,
    /// Scroll, positive zooms in.
    pub scroll: f32,
    /// Size of the viewport the input happened in.
    pub viewport: Vec2,
}

#[derive(Clone, Debug)]
pub struct CameraController {
    pub position: Vec3,
    pub rotation: Quat,
    pub focus_distance: f32,
    pub settings: CameraSettings,
    orbit_velocity: Vec2,
}

pub fn smooth_orbit(
    position: Vec3,
    rotation: Quat,
    delta_yaw: f32,
    delta_pitch: f32,
    clamping: &CameraClamping,
    dt: f32,
    distance: f32,
) -> (Vec3, Quat) {
    let focal_point = position + rotation * Vec3::Z * distance;
    let forward = rotation * Vec3::Z;
    let current_pitch = -forward.y.asin();

    let new_pitch = smooth_clamp(
        current_pitch - delta_pitch,
        clamping.min_pitch.map(|x| x.to_radians()),
        clamping.max_pitch.map(|x| x.to_radians()),
        dt,
        50.0,
    );

    let delta_pitch = current_pitch - new_pitch;
    let pitch = Quat::from_axis_angle(rotation * Vec3::X, -delta_pitch);

    let forward_proj = Vec3::new(forward.x, 0.0, forward.z).normalize();
    let current_yaw = (-forward_proj.x).atan2(forward_proj.z);

    let new_yaw = smooth_clamp(
        current_yaw - delta_yaw,
        clamping.min_yaw.map(|x| x.to_radians()),
        clamping.max_yaw.map(|x| x.to_radians()),
        dt,
        50.0,
    );

    let delta_yaw = current_yaw - new_yaw;
    let yaw = Quat::from_axis_angle(Vec3::NEG_Y, -delta_yaw);
    let new_rotation = (yaw * pitch * rotation).normalize();
    let new_position = focal_point - new_rotation * Vec3::Z * distance;

    (new_position, new_rotation)
}

fn exp_lerp(a: f32, b: f32, dt: f32, lambda: f32) -> f32 {
    let lerp_exp = (-lambda * dt).exp();
    a * lerp_exp + b * (1.0 - lerp_exp)
}

fn exp_lerp2(a: Vec2, b: Vec2, dt: f32, lambda: f32) -> Vec2 {
    glam::vec2(
        exp_lerp(a.x, b.x, dt, lambda),
        exp_lerp(a.y, b.y, dt, lambda),
    )
}

fn smooth_clamp(val: f32, min: Option<f32>, max: Option<f32>, dt: f32, lambda: f32) -> f32 {
    let mut target = val;
    if let Some(min) = min {
        target = target.max(min);
    }
    if let Some(max) = max {
        target = target.min(max);
    }
    exp_lerp(val, target, dt, lambda)
}

impl Default for CameraController {
    fn default() -> Self {
        Self::home(CameraSettings::default())
    }
}

impl CameraController {
    pub fn new(position: Vec3, rotation: Quat, mut settings: CameraSettings) -> Self {
        if settings.clamping.min_pitch.is_none() {
            settings.clamping.min_pitch = Some(-85.0);
        }
        if settings.clamping.max_pitch.is_none() {
            settings.clamping.max_pitch = Some(85.0);
        }
        Self {
            position,
            rotation,
            focus_distance: 5.0,
            settings,
            orbit_velocity: Vec2::ZERO,
        }
    }

    /// Camera at the home position looking at the origin.
    pub fn home(settings: CameraSettings) -> Self {
        let mut controls = Self::new(HOME_POSITION, Quat::IDENTITY, settings);
        controls.look_at(Vec3::ZERO, HOME_POSITION.length());
        controls
    }

    /// Point the camera at a focal point from the given distance.
    pub fn look_at(&mut self, focal_point: Vec3, distance: f32) {
        let forward = (focal_point - self.position).normalize_or(Vec3::Z);
        // Build from yaw and pitch so the camera never ends up rolled.
        let yaw = (-forward.x).atan2(forward.z);
        let pitch = -forward.y.asin();
        self.rotation = Quat::from_axis_angle(Vec3::NEG_Y, yaw) * Quat::from_rotation_x(pitch);
        self.focus_distance = distance;
        self.position = focal_point - self.rotation * Vec3::Z * distance;
        self.stop_movement();
    }

    pub fn focal_point(&self) -> Vec3 {
        self.position + self.rotation * Vec3::Z * self.focus_distance
    }

    /// Current pitch in degrees.
    pub fn pitch(&self) -> f32 {
        -(self.rotation * Vec3::Z).y.asin().to_degrees()
    }

    /// Move the camera so the whole cloud is in view.
    pub fn frame_cloud(&mut self, cloud: &PointCloud) {
        let Some((min, max)) = cloud.bounds() else {
            *self = Self::home(self.settings.clone());
            return;
        };
        let center = (min + max) * 0.5;
        let radius = ((max - min).length() * 0.5).max(0.01);
        let distance = radius / (self.settings.fov_y * 0.5).tan();

        self.stop_movement();
        self.focus_distance = distance;
        self.position = center - self.rotation * Vec3::Z * distance;
    }

    pub fn tick(&mut self, input: &CameraInput, delta_time: f32) {
        let mouselook_speed = 0.002;

        let right = self.rotation * Vec3::X;
        let up = self.rotation * Vec3::NEG_Y;

        if input.pan != Vec2::ZERO {
            let drag_mult = self.focus_distance / input.viewport.max_element().max(1.0);
            self.position -= right * input.pan.x * drag_mult;
            self.position += up * input.pan.y * drag_mult;
        } else if input.orbit != Vec2::ZERO {
            let speed = mouselook_speed * self.settings.speed_scale.unwrap_or(1.0);
            self.orbit_velocity = input.orbit * speed;
        }

        (self.position, self.rotation) = smooth_orbit(
            self.position,
            self.rotation,
            self.orbit_velocity.x,
            self.orbit_velocity.y,
            &self.settings.clamping,
            delta_time,
            self.focus_distance,
        );

        // Damp velocities towards zero.
        self.orbit_velocity = exp_lerp2(self.orbit_velocity, Vec2::ZERO, delta_time, 8.0);

        // Scroll moves towards the pivot, faster when zoomed out further.
        let scroll_speed = 0.001;
        let old_pivot = self.focal_point();

        self.focus_distance -= input.scroll * scroll_speed * self.focus_distance;
        self.focus_distance = self.focus_distance.max(0.01);

        self.focus_distance = smooth_clamp(
            self.focus_distance,
            self.settings.clamping.min_focus_distance,
            self.settings.clamping.max_focus_distance,
            delta_time,
            50.5,
        );

        self.position = old_pivot - (self.rotation * Vec3::Z * self.focus_distance);
    }

    pub fn local_to_world(&self) -> Affine3A {
        Affine3A::from_rotation_translation(self.rotation, self.position)
    }

    pub fn world_to_local(&self) -> Affine3A {
        self.local_to_world().inverse()
    }

    pub fn stop_movement(&mut self) {
        self.orbit_velocity = Vec2::ZERO;
    }
}
