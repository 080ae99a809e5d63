//component B: decision and actuation side of the loop.
//PID balance control, gripper decisions and the actuator front that clamps
//every command before it reaches a driver chip.
pub mod controller;
pub mod gripper;
pub mod actuator;
