// Swerve drivetrain control core
//
// - odometry: high-rate signal sampler feeding per-signal buffers
// - swerve: module state optimization, per-wheel control, chassis kinematics
// - hardware: motor/encoder/gyro traits plus a simulated backend
// - runtime: 50 Hz zenoh loop tying it together

pub mod config;
pub mod hardware;
pub mod messages;
pub mod odometry;
pub mod runtime;
pub mod swerve;
