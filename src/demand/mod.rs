pub mod trip_generation;

pub use trip_generation::{generate_trips, read_trips, write_trips, Trip};
