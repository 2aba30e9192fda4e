use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::{MapsProvider, Place, RouteSummary};
use crate::entities::{Coordinates, Location, VehicleCategory};
use crate::error::Error;

const SEARCH_LIMIT: &str = "5";

/// Mapbox directions (v5) and geocoding (v5) over HTTPS.
#[derive(Clone, Debug)]
pub struct Mapbox {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DirectionsResponse {
    code: String,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DirectionsRoute {
    distance: f64,
    duration: f64,
    geometry: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Feature {
    id: String,
    text: String,
    place_name: String,
    /// `[lng, lat]`
    center: [f64; 2],
}

impl From<Feature> for Place {
    fn from(feature: Feature) -> Self {
        Place {
            id: feature.id,
            name: feature.text,
            address: feature.place_name,
            coordinates: Coordinates::new(feature.center[1], feature.center[0]),
        }
    }
}

fn lng_lat(coordinates: &Coordinates) -> String {
    format!("{},{}", coordinates.lng, coordinates.lat)
}

impl Mapbox {
    pub fn new(api_base: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            access_token: access_token.into(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&format!("https://{}", self.api_base))
            .map_err(|e| Error::config(format!("mapbox api base: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| Error::config("mapbox api base cannot carry a path"))?
            .extend(segments);

        Ok(url)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let res = self
            .client
            .get(url)
            .query(&[("access_token", &self.access_token)])
            .query(query)
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if (400..500).contains(&status_code) {
            return Err(Error::invalid_input(format!(
                "mapbox rejected the request ({})",
                status_code
            )));
        } else if status_code != 200 {
            return Err(Error::upstream(format!("mapbox returned {}", status_code)));
        }

        Ok(res.json().await?)
    }
}

#[async_trait]
impl MapsProvider for Mapbox {
    #[tracing::instrument(skip(self))]
    async fn route(
        &self,
        points: &[Coordinates],
        category: VehicleCategory,
    ) -> Result<RouteSummary, Error> {
        if points.len() < 2 {
            return Err(Error::invalid_input("route needs at least two points"));
        }

        let waypoints = points.iter().map(lng_lat).collect::<Vec<_>>().join(";");
        let profile = match category {
            VehicleCategory::Car => "driving-traffic",
            VehicleCategory::Moto => "driving",
        };
        let url = self.url(&["directions", "v5", "mapbox", profile, &waypoints])?;

        let data: DirectionsResponse = self
            .get(url, &[("overview", "simplified".into()), ("geometries", "polyline6".into())])
            .await?;

        if data.code != "Ok" {
            return Err(Error::upstream(format!("mapbox directions: {}", data.code)));
        }

        let route = data
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream("mapbox directions: no route"))?;

        Ok(RouteSummary {
            distance_meters: route.distance,
            duration_seconds: route.duration,
            polyline: route.geometry,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Location, Error> {
        let query = format!("{}.json", lng_lat(&coordinates));
        let url = self.url(&["geocoding", "v5", "mapbox.places", &query])?;

        let data: GeocodingResponse = self.get(url, &[("limit", "1".into())]).await?;

        let feature = data
            .features
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream("mapbox geocoding: no match"))?;

        Ok(Location::new(coordinates, feature.place_name))
    }

    #[tracing::instrument(skip(self))]
    async fn search_places(
        &self,
        query: &str,
        proximity: Option<Coordinates>,
    ) -> Result<Vec<Place>, Error> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(vec![]);
        }

        let segment = format!("{}.json", query);
        let url = self.url(&["geocoding", "v5", "mapbox.places", &segment])?;

        let mut params = vec![("limit", SEARCH_LIMIT.to_string())];
        if let Some(proximity) = proximity {
            params.push(("proximity", lng_lat(&proximity)));
        }

        let data: GeocodingResponse = self.get(url, &params).await?;

        Ok(data.features.into_iter().map(Place::from).collect())
    }
}
