//! Spherical harmonics and activation helpers

use glam::Vec3;

/// Zeroth-order SH basis constant.
pub const C0: f32 = 0.282_094_8;

pub fn rgb_to_sh(rgb: Vec3) -> Vec3 {
    (rgb - 0.5) / C0
}

pub fn sh_to_rgb(sh: Vec3) -> Vec3 {
    sh * C0 + 0.5
}

/// Number of non-DC coefficients per color channel.
pub fn rest_coefficients(sh_degree: u32) -> usize {
    let n = sh_degree as usize + 1;
    n * n - 1
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn inverse_sigmoid(y: f32) -> f32 {
    (y / (1.0 - y)).ln()
}
