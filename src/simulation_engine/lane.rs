use crate::simulation_engine::network::LaneDefinition;
use crate::simulation_engine::vehicles::Vehicle;
use std::collections::VecDeque;

/// Runtime state of a lane: vehicles in order of entry, front first.
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: String,
    pub length_meters: f64,
    pub speed_limit: f64,
    /// Road space occupied by the vehicles on the lane, meters.
    pub current_vehicle_length: f64,
    pub vehicles: VecDeque<Vehicle>,
    /// Simulation time of the last discharge from the stop line.
    pub last_discharge: Option<f64>,
}

impl Lane {
    pub fn new(definition: &LaneDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            length_meters: definition.length,
            speed_limit: definition.speed,
            current_vehicle_length: 0.0,
            vehicles: VecDeque::new(),
            last_discharge: None,
        }
    }

    /// Checks if a new vehicle can enter the lane. An empty lane always
    /// accepts one vehicle, however long.
    pub fn can_add_vehicle(&self, vehicle: &Vehicle) -> bool {
        self.vehicles.is_empty()
            || self.current_vehicle_length + vehicle.space() <= self.length_meters + 1e-9
    }

    /// Adds a vehicle at the back of the lane if there is enough space.
    pub fn add_vehicle(&mut self, vehicle: Vehicle) -> Result<(), Vehicle> {
        if !self.can_add_vehicle(&vehicle) {
            return Err(vehicle);
        }
        self.current_vehicle_length += vehicle.space();
        self.vehicles.push_back(vehicle);
        Ok(())
    }

    /// Like `can_add_vehicle`, but the lane entry must also be clear of the
    /// last vehicle.
    pub fn can_insert(&self, vehicle: &Vehicle) -> bool {
        self.can_add_vehicle(vehicle)
            && self
                .vehicles
                .back()
                .map_or(true, |last| last.position >= last.space())
    }

    /// Puts a vehicle back at the front, bypassing the space check.
    pub fn restore_front(&mut self, vehicle: Vehicle) {
        self.current_vehicle_length += vehicle.space();
        self.vehicles.push_front(vehicle);
    }

    /// Removes the front vehicle.
    pub fn remove_front(&mut self) -> Option<Vehicle> {
        let vehicle = self.vehicles.pop_front()?;
        self.current_vehicle_length = (self.current_vehicle_length - vehicle.space()).max(0.0);
        Some(vehicle)
    }

    pub fn front(&self) -> Option<&Vehicle> {
        self.vehicles.front()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Vehicles standing at the stop line.
    pub fn halting_count(&self) -> usize {
        self.vehicles.iter().filter(|v| v.is_queued).count()
    }

    /// Sum over the vehicles on the lane of the time each has been standing.
    pub fn waiting_time(&self) -> f64 {
        self.vehicles.iter().map(|v| v.stopped_for).sum()
    }

    /// True when the front vehicle has reached the stop line.
    pub fn head_at_stop_line(&self) -> bool {
        self.front()
            .is_some_and(|v| v.position >= self.length_meters - 1e-6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::vehicles::VehicleType;

    fn car(id: &str) -> Vehicle {
        Vehicle::new(id, VehicleType::Car, vec!["l_0".into()], 0.0)
    }

    #[test]
    fn lanes_fill_up_in_car_spacings() {
        let mut lane = Lane::new(&LaneDefinition::new("l", 15.0, 10.0));
        assert!(lane.add_vehicle(car("a")).is_ok());
        assert!(lane.add_vehicle(car("b")).is_ok());
        assert!(lane.add_vehicle(car("c")).is_err());
        assert_eq!(lane.vehicle_count(), 2);
        assert_eq!(lane.remove_front().map(|v| v.id), Some("a".to_string()));
        assert!(lane.add_vehicle(car("c")).is_ok());
    }

    #[test]
    fn insertion_needs_a_clear_entry() {
        let mut lane = Lane::new(&LaneDefinition::new("l", 100.0, 10.0));
        lane.add_vehicle(car("a")).unwrap();
        assert!(lane.can_add_vehicle(&car("b")));
        assert!(!lane.can_insert(&car("b")));
        lane.vehicles[0].position = 7.5;
        assert!(lane.can_insert(&car("b")));
    }

    #[test]
    fn an_empty_lane_takes_anything() {
        let mut lane = Lane::new(&LaneDefinition::new("l", 5.0, 10.0));
        let truck = Vehicle::new("t", VehicleType::Truck, vec!["l_0".into()], 0.0);
        assert!(lane.add_vehicle(truck).is_ok());
        assert!(lane.add_vehicle(car("a")).is_err());
    }

    #[test]
    fn waiting_time_counts_the_current_stop_only() {
        let mut lane = Lane::new(&LaneDefinition::new("l", 100.0, 10.0));
        let mut a = car("a");
        a.is_queued = true;
        a.position = 100.0;
        a.waiting_time = 9.0;
        a.stopped_for = 4.0;
        let mut b = car("b");
        b.stopped_for = 1.5;
        lane.add_vehicle(a).unwrap();
        lane.add_vehicle(b).unwrap();
        assert_eq!(lane.halting_count(), 1);
        assert_eq!(lane.waiting_time(), 5.5);
        assert!(lane.head_at_stop_line());
    }
}
