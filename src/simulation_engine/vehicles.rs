use rand::Rng;
use serde::{Deserialize, Serialize};

/// Standstill gap kept to the vehicle in front, meters.
pub const MIN_GAP: f64 = 3.0;

/// Different types of vehicles in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
}

impl VehicleType {
    /// Physical length in meters.
    pub fn length(&self) -> f64 {
        match self {
            VehicleType::Car => 4.5,
            VehicleType::Bus => 12.0,
            VehicleType::Truck => 16.0,
        }
    }

    /// Top speed in m/s. Lanes may be slower.
    pub fn max_speed(&self) -> f64 {
        match self {
            VehicleType::Car => 16.7,
            VehicleType::Bus => 13.9,
            VehicleType::Truck => 12.5,
        }
    }
}

/// Share of each vehicle type among inserted vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleMix {
    pub car: f64,
    pub bus: f64,
    pub truck: f64,
}

impl Default for VehicleMix {
    fn default() -> Self {
        Self {
            car: 1.0,
            bus: 0.0,
            truck: 0.0,
        }
    }
}

impl VehicleMix {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> VehicleType {
        let total = self.car + self.bus + self.truck;
        if !(total > 0.0) {
            return VehicleType::Car;
        }
        let draw = rng.random_range(0.0..total);
        if draw < self.car {
            VehicleType::Car
        } else if draw < self.car + self.bus {
            VehicleType::Bus
        } else {
            VehicleType::Truck
        }
    }
}

/// Represents a vehicle traveling along its lane route.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: String,
    pub vehicle_type: VehicleType,
    /// Lane ids from origin to destination.
    pub route: Vec<String>,
    pub route_index: usize,
    pub depart: f64,
    /// Distance covered on the current lane.
    pub position: f64,
    pub speed: f64,
    pub length: f64,
    /// Accumulated time spent standing, seconds.
    pub waiting_time: f64,
    /// Time spent standing since the vehicle last moved.
    pub stopped_for: f64,
    /// True while blocked by the stop line or the vehicle in front.
    pub is_queued: bool,
    /// Sum of the lengths of the lanes left behind.
    pub distance_done: f64,
}

impl Vehicle {
    /// Creates a new vehicle with predefined lengths based on type.
    pub fn new(id: &str, vehicle_type: VehicleType, route: Vec<String>, depart: f64) -> Self {
        Self {
            id: id.to_string(),
            vehicle_type,
            route,
            route_index: 0,
            depart,
            position: 0.0,
            speed: 0.0,
            length: vehicle_type.length(),
            waiting_time: 0.0,
            stopped_for: 0.0,
            is_queued: false,
            distance_done: 0.0,
        }
    }

    /// Road space the vehicle occupies in a queue.
    pub fn space(&self) -> f64 {
        self.length + MIN_GAP
    }

    pub fn current_lane(&self) -> Option<&str> {
        self.route.get(self.route_index).map(String::as_str)
    }

    pub fn next_lane(&self) -> Option<&str> {
        self.route.get(self.route_index + 1).map(String::as_str)
    }

    pub fn on_last_lane(&self) -> bool {
        self.route_index + 1 >= self.route.len()
    }

    /// Moves onto the next lane of the route.
    pub fn advance(&mut self) {
        self.distance_done += self.position;
        self.route_index += 1;
        self.position = 0.0;
        self.is_queued = false;
    }
}
