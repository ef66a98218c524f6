// route_generation.rs
//
// Lane-level routes for trips. A randomized breadth-first search over lane
// successors finds a shortest route (fewest lanes); neighbours are shuffled
// so that equally short alternatives are spread across vehicles.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Randomized BFS from `start` to `target`. Returns the lane ids of the
/// route including both ends, or `None` if `target` is unreachable.
pub fn shortest_lane_route<R: Rng + ?Sized>(
    successors: &BTreeMap<String, Vec<String>>,
    start: &str,
    target: &str,
    rng: &mut R,
) -> Option<Vec<String>> {
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());
    let mut came_from: HashMap<String, String> = HashMap::new();
    came_from.insert(start.to_string(), start.to_string());

    while let Some(current) = queue.pop_front() {
        if current == target {
            let mut path = vec![current.clone()];
            let mut cur = current;
            while cur != start {
                cur = came_from.get(&cur)?.clone();
                path.push(cur.clone());
            }
            path.reverse();
            return Some(path);
        }

        if let Some(next) = successors.get(&current) {
            let mut neighbors = next.clone();
            neighbors.shuffle(rng);
            for neighbor in neighbors {
                if !came_from.contains_key(&neighbor) {
                    came_from.insert(neighbor.clone(), current.clone());
                    queue.push_back(neighbor);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::network::NetworkDefinition;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn finds_the_arterial_route() {
        let successors = NetworkDefinition::corridor().successors();
        let mut rng = SmallRng::seed_from_u64(1);
        let route = shortest_lane_route(&successors, "E_A_J1_0", "E_J3_O_0", &mut rng).unwrap();
        assert_eq!(
            route,
            vec!["E_A_J1_0", "E_J1_J2_0", "E_J2_J3_0", "E_J3_O_0"]
        );
    }

    #[test]
    fn side_street_joins_the_arterial() {
        let successors = NetworkDefinition::corridor().successors();
        let mut rng = SmallRng::seed_from_u64(2);
        let route = shortest_lane_route(&successors, "E_S2N_J2_0", "E_J3_O_0", &mut rng).unwrap();
        assert_eq!(route, vec!["E_S2N_J2_0", "E_J2_J3_0", "E_J3_O_0"]);
    }

    #[test]
    fn single_lane_and_unreachable_routes() {
        let successors = NetworkDefinition::corridor().successors();
        let mut rng = SmallRng::seed_from_u64(3);
        assert_eq!(
            shortest_lane_route(&successors, "E_J3_O_0", "E_J3_O_0", &mut rng),
            Some(vec!["E_J3_O_0".to_string()])
        );
        assert_eq!(
            shortest_lane_route(&successors, "E_J3_O_0", "E_A_J1_0", &mut rng),
            None
        );
    }
}
