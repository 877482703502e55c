//! Geolocation: coordinate parsing, map links and OpenStreetMap geocoding.

use crate::models::{Coordinate, ModuleError, PartialResult, Query, QueryType};
use crate::modules::{encode_component, link_list, Module, ScanContext};
use crate::net::ProviderRequest;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Parse `"lat, lon"` or `"lat lon"` in decimal degrees.
pub fn parse_coordinates(input: &str) -> Option<Coordinate> {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    let pattern = PAIR.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*[,\s]\s*(-?\d+(?:\.\d+)?)\s*$").expect("valid coordinate regex")
    });

    let caps = pattern.captures(input)?;
    Coordinate::new(caps[1].parse().ok()?, caps[2].parse().ok()?)
}

fn map_links(c: &Coordinate) -> Vec<String> {
    let (lat, lon) = (c.lat, c.lon);
    link_list(&[
        ("Google Maps", format!("https://www.google.com/maps?q={},{}", lat, lon)),
        ("OpenStreetMap", format!("https://www.openstreetmap.org/?mlat={}&mlon={}#map=16/{}/{}", lat, lon, lat, lon)),
        ("Bing Maps", format!("https://www.bing.com/maps?cp={}~{}&lvl=16", lat, lon)),
        ("Apple Maps", format!("https://maps.apple.com/?ll={},{}", lat, lon)),
        ("Yandex Maps", format!("https://yandex.com/maps/?pt={},{}&z=16", lon, lat)),
        ("Waze", format!("https://www.waze.com/ul?ll={},{}", lat, lon)),
    ])
}

fn satellite_links(c: &Coordinate) -> Vec<String> {
    let (lat, lon) = (c.lat, c.lon);
    link_list(&[
        ("Google Earth", format!("https://earth.google.com/web/@{},{},1000a,1000d", lat, lon)),
        ("Sentinel Hub", format!("https://apps.sentinel-hub.com/eo-browser/?lat={}&lng={}&zoom=14", lat, lon)),
        ("Zoom Earth", format!("https://zoom.earth/#view={},{},14z", lat, lon)),
    ])
}

fn osint_links(c: &Coordinate) -> Vec<String> {
    let (lat, lon) = (c.lat, c.lon);
    link_list(&[
        ("SunCalc", format!("https://www.suncalc.org/#/{},{},16/null/null/null/null", lat, lon)),
        ("Flightradar24", format!("https://www.flightradar24.com/{:.2},{:.2}/10", lat, lon)),
        ("MarineTraffic", format!("https://www.marinetraffic.com/en/ais/home/centerx:{}/centery:{}/zoom:12", lon, lat)),
        ("WiGLE", format!("https://wigle.net/map?maplat={}&maplon={}&mapzoom=16", lat, lon)),
    ])
}

/// Coordinate parsing and map/satellite/OSINT links. Makes no provider calls.
pub struct GeoCoordinatesModule;

#[async_trait]
impl Module for GeoCoordinatesModule {
    fn name(&self) -> &'static str {
        "geo_coordinates"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Geo]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        ctx.checkpoint(self.name())?;

        let Some(coordinate) = parse_coordinates(query.value()) else {
            let address = encode_component(query.value());
            let mut result = PartialResult::new(self.name(), 0.5)
                .with_field("geo.input", "address");
            result.set(
                "links.maps",
                link_list(&[
                    ("Google Maps", format!("https://www.google.com/maps/search/{}", address)),
                    ("OpenStreetMap", format!("https://www.openstreetmap.org/search?query={}", address)),
                ]),
            );
            return Ok(result);
        };

        let mut result = PartialResult::new(self.name(), 1.0)
            .with_field("geo.input", "coordinates")
            .with_field("location", coordinate)
            .with_field("links.maps", map_links(&coordinate))
            .with_field("links.satellite", satellite_links(&coordinate));
        if query.flag("deep") {
            result.set("links.osint", osint_links(&coordinate));
        }

        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    #[serde(default)]
    lat: Option<String>,
    #[serde(default)]
    lon: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<NominatimAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    town: Option<String>,
    #[serde(default)]
    village: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

/// Reverse or forward geocoding with OpenStreetMap Nominatim.
pub struct NominatimModule;

impl NominatimModule {
    const BASE: &'static str = "https://nominatim.openstreetmap.org";

    fn apply(result: &mut PartialResult, place: NominatimPlace) {
        result.set_text("geo.address", place.display_name.as_deref());
        let address = place.address.unwrap_or_default();
        let city = address.city.or(address.town).or(address.village);
        result.set_text("city", city.as_deref());
        result.set_text("region", address.state.as_deref());
        result.set_text("postal", address.postcode.as_deref());
        result.set_text("country_name", address.country.as_deref());
        result.set_opt("country", address.country_code.map(|c| c.to_ascii_uppercase()));
    }
}

#[async_trait]
impl Module for NominatimModule {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Geo]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let mut result = PartialResult::new(self.name(), 0.8);

        match parse_coordinates(query.value()) {
            Some(c) => {
                let request = ProviderRequest::get("nominatim", format!("{}/reverse", Self::BASE))
                    .query("format", "jsonv2")
                    .query("addressdetails", "1")
                    .query("lat", c.lat.to_string())
                    .query("lon", c.lon.to_string());
                let place: NominatimPlace = ctx.fetch_json(self.name(), request).await?;
                if let Some(error) = place.error {
                    return Err(ModuleError::invalid_target(self.name(), error));
                }
                Self::apply(&mut result, place);
            }
            None => {
                let request = ProviderRequest::get("nominatim", format!("{}/search", Self::BASE))
                    .query("format", "jsonv2")
                    .query("addressdetails", "1")
                    .query("limit", "1")
                    .query("q", query.value());
                let places: Vec<NominatimPlace> = ctx.fetch_json(self.name(), request).await?;
                let place = places
                    .into_iter()
                    .next()
                    .ok_or_else(|| ModuleError::invalid_target(self.name(), "no place matches the address"))?;

                let location = match (place.lat.as_deref(), place.lon.as_deref()) {
                    (Some(lat), Some(lon)) => Coordinate::parse_pair(&format!("{},{}", lat, lon)),
                    _ => None,
                };
                result.set_opt("location", location);
                Self::apply(&mut result, place);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, FieldValue};
    use crate::modules::testing::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_parse_coordinates() {
        assert_eq!(
            parse_coordinates("-6.2088, 106.8456"),
            Some(Coordinate { lat: -6.2088, lon: 106.8456 })
        );
        assert_eq!(
            parse_coordinates("40.7128 -74.0060"),
            Some(Coordinate { lat: 40.7128, lon: -74.006 })
        );
        assert_eq!(parse_coordinates("95, 10"), None);
        assert_eq!(parse_coordinates("Jakarta, Indonesia"), None);
    }

    #[tokio::test]
    async fn test_coordinates_module() {
        let ctx = context(Arc::new(MockProvider::new()));
        let query = Query::new(QueryType::Geo, "-6.2088,106.8456").unwrap();

        let result = GeoCoordinatesModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(result.confidence, 1.0);
        assert_eq!(
            result.fields["location"],
            FieldValue::Coordinate(Coordinate { lat: -6.2088, lon: 106.8456 })
        );
        assert!(result.fields["links.maps"].to_string().contains("google.com/maps?q=-6.2088,106.8456"));
    }

    #[tokio::test]
    async fn test_reverse_geocoding() {
        let mock = Arc::new(MockProvider::new().json(
            "/reverse",
            200,
            json!({
                "display_name": "Monas, Jakarta, Indonesia",
                "address": {"city": "Jakarta", "state": "DKI Jakarta", "country": "Indonesia", "country_code": "id"}
            }),
        ));
        let ctx = context(mock);
        let query = Query::new(QueryType::Geo, "-6.1754,106.8272").unwrap();

        let result = NominatimModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(result.fields["country"], FieldValue::from("ID"));
        assert_eq!(result.fields["city"], FieldValue::from("Jakarta"));
        assert!(!result.fields.contains_key("location"));
    }

    #[tokio::test]
    async fn test_forward_geocoding() {
        let mock = Arc::new(MockProvider::new().json(
            "/search",
            200,
            json!([{"lat": "-6.1754", "lon": "106.8272", "display_name": "Monas"}]),
        ));
        let ctx = context(mock);
        let query = Query::new(QueryType::Geo, "Monas, Jakarta").unwrap();

        let result = NominatimModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(
            result.fields["location"],
            FieldValue::Coordinate(Coordinate { lat: -6.1754, lon: 106.8272 })
        );
    }

    #[tokio::test]
    async fn test_forward_geocoding_no_match() {
        let mock = Arc::new(MockProvider::new().json("/search", 200, json!([])));
        let ctx = context(mock);
        let query = Query::new(QueryType::Geo, "Nowhere Special").unwrap();

        let err = NominatimModule.investigate(&query, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTarget);
    }
}
