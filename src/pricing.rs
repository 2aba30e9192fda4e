//! Suggested fares. Everything here is pure: the same inputs and the same table always
//! produce the same price.

use geo_types::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::entities::{Coordinates, VehicleCategory};
use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ByCategory<T> {
    pub car: T,
    pub moto: T,
}

impl<T> ByCategory<T> {
    pub fn get(&self, category: VehicleCategory) -> &T {
        match category {
            VehicleCategory::Car => &self.car,
            VehicleCategory::Moto => &self.moto,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryRates {
    pub per_minute: f64,
    pub average_speed_kmh: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub base: f64,
    pub per_km: f64,
    pub minimum: i64,
}

/// Closed polygon in (lat, lng) vertices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Coordinates>", into = "Vec<Coordinates>")]
pub struct Geofence(Polygon<f64>);

impl From<Vec<Coordinates>> for Geofence {
    fn from(vertices: Vec<Coordinates>) -> Self {
        let ring: Vec<Coord<f64>> = vertices
            .into_iter()
            .map(|c| Coord { x: c.lng, y: c.lat })
            .collect();

        Geofence(Polygon::new(LineString::from(ring), vec![]))
    }
}

impl From<Geofence> for Vec<Coordinates> {
    fn from(geofence: Geofence) -> Self {
        geofence
            .0
            .exterior()
            .0
            .iter()
            .map(|c| Coordinates::new(c.y, c.x))
            .collect()
    }
}

impl Geofence {
    pub fn contains(&self, point: &Coordinates) -> bool {
        if !ring_contains(self.0.exterior(), point) {
            return false;
        }

        !self.0.interiors().iter().any(|hole| ring_contains(hole, point))
    }
}

// even-odd ray casting
fn ring_contains(ring: &LineString<f64>, point: &Coordinates) -> bool {
    let (x, y) = (point.lng, point.lat);
    let vertices = &ring.0;
    if vertices.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i].x, vertices[i].y);
        let (xj, yj) = (vertices[j].x, vertices[j].y);

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    inside
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    #[serde(default)]
    pub boundary: Option<Geofence>,
    pub tariffs: ByCategory<Tariff>,
    #[serde(default = "one")]
    pub multiplier: f64,
    #[serde(default = "one")]
    pub demand_multiplier: f64,
}

fn one() -> f64 {
    1.0
}

impl Zone {
    pub fn covers(&self, point: &Coordinates) -> bool {
        match &self.boundary {
            Some(boundary) => boundary.contains(point),
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub categories: ByCategory<CategoryRates>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    pub default_zone: Zone,
    pub min_offer_ratio: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Estimate {
    pub price: i64,
    pub minimum: i64,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub zone: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            categories: ByCategory {
                car: CategoryRates {
                    per_minute: 350.0,
                    average_speed_kmh: 22.0,
                },
                moto: CategoryRates {
                    per_minute: 150.0,
                    average_speed_kmh: 35.0,
                },
            },
            zones: vec![],
            default_zone: Zone {
                name: "metro".into(),
                boundary: None,
                tariffs: ByCategory {
                    car: Tariff {
                        base: 4800.0,
                        per_km: 1600.0,
                        minimum: 8000,
                    },
                    moto: Tariff {
                        base: 3000.0,
                        per_km: 900.0,
                        minimum: 5000,
                    },
                },
                multiplier: 1.0,
                demand_multiplier: 1.0,
            },
            min_offer_ratio: 0.5,
        }
    }
}

impl PricingTable {
    /// Town tariffs without a boundary; callers attach the geofence they operate in.
    pub fn town_zone(boundary: Geofence) -> Zone {
        Zone {
            name: "town".into(),
            boundary: Some(boundary),
            tariffs: ByCategory {
                car: Tariff {
                    base: 4000.0,
                    per_km: 1800.0,
                    minimum: 7000,
                },
                moto: Tariff {
                    base: 2500.0,
                    per_km: 1000.0,
                    minimum: 4000,
                },
            },
            multiplier: 1.0,
            demand_multiplier: 1.0,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("{}: {}", path.as_ref().display(), e)))?;
        let table: PricingTable = serde_json::from_str(&raw)?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for rates in [&self.categories.car, &self.categories.moto] {
            if rates.average_speed_kmh <= 0.0 {
                return Err(Error::config("average speed must be positive"));
            }
        }

        if !(0.0..=1.0).contains(&self.min_offer_ratio) {
            return Err(Error::config("min_offer_ratio must be within [0, 1]"));
        }

        Ok(())
    }

    /// First configured zone covering any point of the trip, otherwise the default zone.
    pub fn zone_for(&self, points: &[Coordinates]) -> &Zone {
        self.zones
            .iter()
            .find(|zone| points.iter().any(|p| zone.covers(p)))
            .unwrap_or(&self.default_zone)
    }

    pub fn estimate(
        &self,
        origin: &Coordinates,
        destination: &Coordinates,
        category: VehicleCategory,
        stops: &[Coordinates],
    ) -> Estimate {
        let distance = path_distance(origin, destination, stops);
        self.estimate_with_distance(origin, destination, category, stops, distance)
    }

    /// Same as `estimate` with a routed path length instead of the great-circle sum.
    pub fn estimate_with_distance(
        &self,
        origin: &Coordinates,
        destination: &Coordinates,
        category: VehicleCategory,
        stops: &[Coordinates],
        distance_meters: f64,
    ) -> Estimate {
        let points = trip_points(origin, destination, stops);
        let zone = self.zone_for(&points);
        let tariff = zone.tariffs.get(category);
        let rates = self.categories.get(category);

        let km = distance_meters.max(0.0) / 1000.0;
        let minutes = km / rates.average_speed_kmh * 60.0;

        let raw = (tariff.base + km * tariff.per_km + minutes * rates.per_minute)
            * zone.multiplier
            * zone.demand_multiplier;

        let price = round_to_hundred(raw.max(tariff.minimum as f64));

        Estimate {
            price,
            minimum: tariff.minimum,
            distance_meters,
            duration_seconds: minutes * 60.0,
            zone: zone.name.clone(),
        }
    }

    pub fn minimum_offer(&self, category: VehicleCategory, points: &[Coordinates]) -> i64 {
        let minimum = self.zone_for(points).tariffs.get(category).minimum;
        round_to_hundred(minimum as f64 * self.min_offer_ratio)
    }

    pub fn validate_offer(
        &self,
        offer: i64,
        category: VehicleCategory,
        points: &[Coordinates],
    ) -> Result<(), Error> {
        let floor = self.minimum_offer(category, points);
        if offer <= 0 || offer < floor {
            return Err(Error::invalid_input(format!(
                "offer {} is below the minimum of {}",
                offer, floor
            )));
        }

        Ok(())
    }
}

/// Origin, each stop in the given order, then destination.
pub fn trip_points(
    origin: &Coordinates,
    destination: &Coordinates,
    stops: &[Coordinates],
) -> Vec<Coordinates> {
    let mut points = Vec::with_capacity(stops.len() + 2);
    points.push(*origin);
    points.extend_from_slice(stops);
    points.push(*destination);
    points
}

pub fn path_distance(origin: &Coordinates, destination: &Coordinates, stops: &[Coordinates]) -> f64 {
    trip_points(origin, destination, stops)
        .windows(2)
        .map(|leg| leg[0].haversine_distance(&leg[1]))
        .sum()
}

pub fn round_to_hundred(value: f64) -> i64 {
    ((value / 100.0).round() * 100.0) as i64
}

/// Quick-pick offers around an estimate.
pub fn suggestions(price: i64) -> [i64; 3] {
    [
        round_to_hundred(price as f64 * 0.9),
        price,
        round_to_hundred(price as f64 * 1.1),
    ]
}
