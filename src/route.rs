//! Turn a set of target addresses into an ordered walking route.

use serde::Serialize;

use crate::{
    solver::{self, DistanceMatrix, TourStrategy},
    store::{Database, ResolvedHouse},
    GeoPoint, Result,
};

const WALKING_SPEED_KMH: f64 = 5.0;
const STOP_DWELL_MINUTES: f64 = 2.0;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    /// 1-based visiting position.
    pub order: u32,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_from_previous_m: f64,
    pub voter_count: u32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedRoute {
    pub houses: Vec<RouteStop>,
    pub total_distance_m: f64,
    pub estimated_duration_min: f64,
}

impl OptimizedRoute {
    fn empty() -> Self {
        Self {
            houses: Vec::new(),
            total_distance_m: 0.0,
            estimated_duration_min: 0.0,
        }
    }
}

/// Resolve `addresses` against the voter table and order the
/// resolvable ones into a walking route from `start`. Unknown
/// addresses are dropped; no targets at all is an empty route, not an
/// error.
pub async fn build_route(
    db: &Database,
    start: GeoPoint,
    addresses: &[String],
    strategy: TourStrategy,
) -> Result<OptimizedRoute> {
    let mut unique = Vec::new();
    for address in addresses {
        if !unique.contains(address) {
            unique.push(address.clone());
        }
    }
    if unique.is_empty() {
        return Ok(OptimizedRoute::empty());
    }

    let houses = db.resolve_addresses(unique).await?;
    Ok(route_from_houses(start, &houses, strategy))
}

/// Pure ordering step: synthetic start node at index 0, haversine
/// matrix over start + houses, tour via the chosen strategy. The
/// return-to-start leg is not part of the total; canvassers walk the
/// route one way.
pub fn route_from_houses(
    start: GeoPoint,
    houses: &[ResolvedHouse],
    strategy: TourStrategy,
) -> OptimizedRoute {
    if houses.is_empty() {
        return OptimizedRoute::empty();
    }

    let mut points = Vec::with_capacity(houses.len() + 1);
    points.push(start);
    points.extend(houses.iter().map(ResolvedHouse::location));

    let matrix = DistanceMatrix::from_points(&points);
    let tour = solver::solve(&matrix, strategy);

    let mut stops = Vec::with_capacity(houses.len());
    let mut total_distance_m = 0.0;
    let mut previous = 0usize;
    for &node in tour.iter().skip(1) {
        let house = &houses[node - 1];
        let leg = matrix.get(previous, node);
        total_distance_m += leg;
        stops.push(RouteStop {
            order: stops.len() as u32 + 1,
            address: house.address.clone(),
            lat: house.lat,
            lng: house.lng,
            distance_from_previous_m: leg,
            voter_count: house.voter_count(),
        });
        previous = node;
    }

    let walking_min = total_distance_m / 1000.0 / WALKING_SPEED_KMH * 60.0;
    let estimated_duration_min = walking_min + STOP_DWELL_MINUTES * stops.len() as f64;

    log::info!(
        "route: built stops={} total_m={total_distance_m:.0} est_min={estimated_duration_min:.1}",
        stops.len()
    );

    OptimizedRoute {
        houses: stops,
        total_distance_m,
        estimated_duration_min,
    }
}

#[cfg(test)]
mod tests {
    use super::{route_from_houses, OptimizedRoute};
    use crate::solver::TourStrategy;
    use crate::store::{ResolvedHouse, VoterSummary};
    use crate::GeoPoint;

    fn house(address: &str, lat: f64, lng: f64, voters: usize) -> ResolvedHouse {
        ResolvedHouse {
            address: address.to_owned(),
            lat,
            lng,
            voters: (0..voters)
                .map(|i| VoterSummary {
                    id: format!("{address}-{i}"),
                    name: format!("Voter {i}"),
                })
                .collect(),
        }
    }

    fn input_order_total(start: GeoPoint, houses: &[ResolvedHouse]) -> f64 {
        let mut total = 0.0;
        let mut previous = start;
        for h in houses {
            total += previous.dist(&h.location());
            previous = h.location();
        }
        total
    }

    #[test]
    fn no_houses_is_an_empty_route() {
        let route: OptimizedRoute =
            route_from_houses(GeoPoint::new(33.4, -86.8), &[], TourStrategy::TwoOpt);
        assert!(route.houses.is_empty());
        assert_eq!(route.total_distance_m, 0.0);
        assert_eq!(route.estimated_duration_min, 0.0);
    }

    #[test]
    fn visits_every_house_once_with_sequential_order() {
        let start = GeoPoint::new(33.405, -86.811);
        let houses = vec![
            house("100 Main St", 33.406, -86.812, 2),
            house("200 Oak Ave", 33.409, -86.805, 1),
            house("300 Elm Ct", 33.401, -86.808, 3),
        ];
        let route = route_from_houses(start, &houses, TourStrategy::TwoOpt);

        assert_eq!(route.houses.len(), 3);
        let orders: Vec<u32> = route.houses.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);

        let mut addresses: Vec<&str> = route.houses.iter().map(|s| s.address.as_str()).collect();
        addresses.sort_unstable();
        assert_eq!(addresses, vec!["100 Main St", "200 Oak Ave", "300 Elm Ct"]);

        let leg_sum: f64 = route.houses.iter().map(|s| s.distance_from_previous_m).sum();
        assert!((leg_sum - route.total_distance_m).abs() < 1e-9);
    }

    // Three houses around downtown Birmingham; the ordered route must
    // not be longer than walking them in input order.
    #[test]
    fn ordered_total_beats_or_matches_input_order() {
        let start = GeoPoint::new(33.5186, -86.8104);
        let houses = vec![
            house("A", 33.5200, -86.8000, 1),
            house("B", 33.5150, -86.8150, 1),
            house("C", 33.5230, -86.8120, 1),
        ];

        let route = route_from_houses(start, &houses, TourStrategy::TwoOpt);
        assert!(route.total_distance_m <= input_order_total(start, &houses) + 1e-6);

        let expected_min = route.total_distance_m / 1000.0 / 5.0 * 60.0 + 2.0 * 3.0;
        assert!((route.estimated_duration_min - expected_min).abs() < 1e-9);
    }

    #[test]
    fn identical_inputs_build_identical_routes() {
        let start = GeoPoint::new(33.5186, -86.8104);
        let houses: Vec<ResolvedHouse> = (0..8)
            .map(|i| {
                house(
                    &format!("{i} Test St"),
                    33.50 + 0.007 * f64::from(i),
                    -86.80 - 0.003 * f64::from(i % 3),
                    1,
                )
            })
            .collect();

        let first = route_from_houses(start, &houses, TourStrategy::TwoOpt);
        let second = route_from_houses(start, &houses, TourStrategy::TwoOpt);
        let first_order: Vec<&str> = first.houses.iter().map(|s| s.address.as_str()).collect();
        let second_order: Vec<&str> = second.houses.iter().map(|s| s.address.as_str()).collect();
        assert_eq!(first_order, second_order);
        assert_eq!(first.total_distance_m, second.total_distance_m);
    }
}
