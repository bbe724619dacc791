mod current_state;
mod mapping;
mod meter_reading;
mod vehicle_reading;
mod window;

pub use current_state::{MeterCurrentState, VehicleCurrentState};
pub use mapping::VehicleMeterMapping;
pub use meter_reading::{MeterReading, MeterTelemetry};
pub use vehicle_reading::{VehicleReading, VehicleTelemetry};
pub use window::{MeterWindowTotals, VehicleWindowTotals};
