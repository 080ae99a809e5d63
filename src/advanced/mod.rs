// Telemetry overlay with an offloaded display thread, and the simulated
// peripheral set used to run the loop on a development host.
pub mod telemetry;
pub mod sim;
