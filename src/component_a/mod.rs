// Component A: sensing side of the loop.
// Turns raw inertial and proximity readings into the semantic samples the
// controller and gripper logic consume.

pub mod tilt;
pub mod proximity;
