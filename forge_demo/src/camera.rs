//! Orbiting camera driven by the update tick

use forge_engine::prelude::*;
use nalgebra::{Matrix4, Perspective3, Point3, Vector3};

/// Camera uniform data - uploaded once per frame
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraUniformData {
    /// View matrix (world to camera space), column-major
    pub view: [[f32; 4]; 4],
    /// Projection matrix (camera to clip space), column-major
    pub projection: [[f32; 4]; 4],
    /// Pre-computed view-projection matrix
    pub view_projection: [[f32; 4]; 4],
    /// Camera position in world space (w = 1)
    pub position: [f32; 4],
    /// Near plane, far plane, vertical field of view, elapsed seconds
    pub params: [f32; 4],
}

unsafe impl bytemuck::Pod for CameraUniformData {}
unsafe impl bytemuck::Zeroable for CameraUniformData {}

impl Default for CameraUniformData {
    fn default() -> Self {
        let identity: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
        Self {
            view: identity,
            projection: identity,
            view_projection: identity,
            position: [0.0, 0.0, 0.0, 1.0],
            params: [0.1, 100.0, std::f32::consts::FRAC_PI_4, 0.0],
        }
    }
}

/// Camera circling the origin at a fixed radius and height
pub struct OrbitCamera {
    radius: f32,
    height: f32,
    /// Radians per second
    speed: f32,
    angle: f32,
    aspect: f32,
    fov: f32,
    near: f32,
    far: f32,
    data: CameraUniformData,
}

impl OrbitCamera {
    /// Camera at `radius` from the origin, `height` above the ground plane
    pub fn new(radius: f32, height: f32, speed: f32, aspect: f32) -> Self {
        let mut camera = Self {
            radius,
            height,
            speed,
            angle: 0.0,
            aspect,
            fov: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 100.0,
            data: CameraUniformData::default(),
        };
        camera.advance(0.0, 0.0);
        camera
    }

    /// Move along the orbit by `dt` seconds and rebuild the uniform data
    pub fn advance(&mut self, dt: f32, elapsed: f32) {
        self.angle = (self.angle + self.speed * dt) % std::f32::consts::TAU;

        let eye = Point3::new(self.radius * self.angle.cos(), self.height, self.radius * self.angle.sin());
        let view = Matrix4::look_at_rh(&eye, &Point3::origin(), &Vector3::y());
        let projection = Perspective3::new(self.aspect, self.fov, self.near, self.far).to_homogeneous();

        self.data = CameraUniformData {
            view: view.into(),
            projection: projection.into(),
            view_projection: (projection * view).into(),
            position: [eye.x, eye.y, eye.z, 1.0],
            params: [self.near, self.far, self.fov, elapsed],
        };
    }

    /// Current angle around the orbit in radians
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Data for the camera uniform buffer
    pub fn uniform_data(&self) -> CameraUniformData {
        self.data
    }
}

impl Module for OrbitCamera {
    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> EngineResult<()> {
        self.advance(ctx.delta().as_secs_f32(), ctx.time().as_secs_f32());
        Ok(())
    }
}
