// Rigid-body kinematics for moving the IMU's measured acceleration to the
// torso's center of mass.

/// Vector cross product `a x b`
pub fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Acceleration at the center of mass from a sensor mounted `imu_to_com` away
///
/// a_com = a_measured - (alpha x r) - (omega x (omega x r))
///
/// Only the roll component of angular acceleration is known; the torso is
/// assumed to have no play about the other two axes.
pub fn com_acceleration(
    accel: [f32; 3],
    omega: [f32; 3],
    alpha_x: f32,
    imu_to_com: [f32; 3],
) -> [f32; 3] {
    let alpha = [alpha_x, 0.0, 0.0];

    let alpha_cross_r = cross(alpha, imu_to_com);
    let omega_cross_r = cross(omega, imu_to_com);
    let centripetal = cross(omega, omega_cross_r);

    [
        accel[0] - alpha_cross_r[0] - centripetal[0],
        accel[1] - alpha_cross_r[1] - centripetal[1],
        accel[2] - alpha_cross_r[2] - centripetal[2],
    ]
}
