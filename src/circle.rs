use std::mem;

use geo::{Destination, Distance, Geodesic, Point};
use serde::Serialize;

use crate::error::InatError;

/// Segments used for the preview rubber band and the persisted circle polygon.
pub const CIRCLE_SEGMENTS: usize = 72;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// A point in canvas (projected) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
}

impl MapPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// Selection region: a geographic center and a radius in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Circle {
    center: GeoPoint,
    radius_m: f64,
}

impl Circle {
    pub fn new(lat: f64, lon: f64, radius_m: f64) -> Result<Self, InatError> {
        if !(-90.0..=90.0).contains(&lat) || !lat.is_finite() {
            return Err(InatError::InvalidCircle(format!("latitude {lat} out of range")));
        }
        if !(-180.0..=180.0).contains(&lon) || !lon.is_finite() {
            return Err(InatError::InvalidCircle(format!("longitude {lon} out of range")));
        }
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(InatError::InvalidCircle(format!(
                "radius must be a positive number of metres, got {radius_m}"
            )));
        }
        Ok(Self {
            center: GeoPoint::new(lat, lon),
            radius_m,
        })
    }

    pub fn center(&self) -> GeoPoint {
        self.center
    }

    pub fn lat(&self) -> f64 {
        self.center.lat
    }

    pub fn lon(&self) -> f64 {
        self.center.lon
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// The observation API takes the radius in kilometres.
    pub fn radius_km(&self) -> f64 {
        self.radius_m / 1000.0
    }
}

/// Converts canvas coordinates to WGS84 and measures ground distance.
pub trait MapProjection {
    fn to_geographic(&self, point: MapPoint) -> GeoPoint;
    fn from_geographic(&self, point: GeoPoint) -> MapPoint;

    /// Geodesic distance in metres between two canvas points.
    fn measure(&self, a: MapPoint, b: MapPoint) -> f64 {
        Geodesic.distance(self.to_geographic(a).to_point(), self.to_geographic(b).to_point())
    }
}

/// Canvas axes are longitude/latitude degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlateCarree;

impl MapProjection for PlateCarree {
    fn to_geographic(&self, point: MapPoint) -> GeoPoint {
        GeoPoint::new(point.y, point.x)
    }

    fn from_geographic(&self, point: GeoPoint) -> MapPoint {
        MapPoint::new(point.lon, point.lat)
    }
}

/// Spherical Web Mercator (EPSG:3857), canvas axes in metres.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl MapProjection for WebMercator {
    fn to_geographic(&self, point: MapPoint) -> GeoPoint {
        let lon = (point.x / EARTH_RADIUS_M).to_degrees();
        let lat = (2.0 * (point.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2)
            .to_degrees();
        GeoPoint::new(lat, lon)
    }

    fn from_geographic(&self, point: GeoPoint) -> MapPoint {
        let x = EARTH_RADIUS_M * point.lon.to_radians();
        let y = EARTH_RADIUS_M
            * (std::f64::consts::FRAC_PI_4 + point.lat.to_radians() / 2.0)
                .tan()
                .ln();
        MapPoint::new(x, y)
    }
}

/// Closed geodesic ring of `segments` vertices around a center, as WGS84 points.
pub fn geodesic_ring(center: GeoPoint, radius_m: f64, segments: usize) -> Vec<GeoPoint> {
    let segments = segments.max(3);
    let origin = center.to_point();
    let mut ring = (0..segments)
        .map(|i| {
            let bearing = 360.0 * i as f64 / segments as f64;
            let vertex = Geodesic.destination(origin, bearing, radius_m);
            GeoPoint::new(vertex.y(), vertex.x())
        })
        .collect::<Vec<_>>();
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }
    ring
}

pub fn circle_ring(circle: &Circle, segments: usize) -> Vec<GeoPoint> {
    geodesic_ring(circle.center, circle.radius_m, segments)
}

/// Capture state. Transitions consume the current state and hand back the next one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ToolState {
    #[default]
    Idle,
    CenterSet {
        center_map: MapPoint,
        center_geo: GeoPoint,
    },
    AwaitingRadius {
        center_map: MapPoint,
        center_geo: GeoPoint,
        measured_m: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PressOutcome {
    CenterPlaced(GeoPoint),
    /// Ask the user to confirm (or edit) the measured radius.
    RadiusPrompt { measured_m: f64 },
    Ignored,
}

impl ToolState {
    pub fn press<P: MapProjection>(self, projection: &P, point: MapPoint) -> (Self, PressOutcome) {
        match self {
            ToolState::Idle => {
                let center_geo = projection.to_geographic(point);
                (
                    ToolState::CenterSet {
                        center_map: point,
                        center_geo,
                    },
                    PressOutcome::CenterPlaced(center_geo),
                )
            }
            ToolState::CenterSet {
                center_map,
                center_geo,
            } => {
                let measured_m = projection.measure(center_map, point);
                (
                    ToolState::AwaitingRadius {
                        center_map,
                        center_geo,
                        measured_m,
                    },
                    PressOutcome::RadiusPrompt { measured_m },
                )
            }
            state @ ToolState::AwaitingRadius { .. } => (state, PressOutcome::Ignored),
        }
    }

    /// Live preview radius while the center is set. Never changes state.
    pub fn hover<P: MapProjection>(&self, projection: &P, point: MapPoint) -> Option<f64> {
        match self {
            ToolState::CenterSet { center_map, .. } => Some(projection.measure(*center_map, point)),
            _ => None,
        }
    }

    /// `answer` is the prompt text, or `None` when the prompt was dismissed.
    /// Dismissal or an unparsable radius returns to idle without a circle.
    pub fn confirm(self, answer: Option<&str>) -> (Self, Option<Circle>) {
        let ToolState::AwaitingRadius { center_geo, .. } = self else {
            return (self, None);
        };
        let circle = answer
            .and_then(parse_radius)
            .and_then(|radius_m| Circle::new(center_geo.lat, center_geo.lon, radius_m).ok());
        (ToolState::Idle, circle)
    }

    pub fn center(&self) -> Option<(MapPoint, GeoPoint)> {
        match self {
            ToolState::Idle => None,
            ToolState::CenterSet {
                center_map,
                center_geo,
            }
            | ToolState::AwaitingRadius {
                center_map,
                center_geo,
                ..
            } => Some((*center_map, *center_geo)),
        }
    }
}

/// Accepts `12.5` as well as `12,5`.
pub fn parse_radius(text: &str) -> Option<f64> {
    text.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

/// Two-click circle capture over a projection.
#[derive(Debug)]
pub struct CircleTool<P: MapProjection> {
    projection: P,
    state: ToolState,
}

impl<P: MapProjection> CircleTool<P> {
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            state: ToolState::Idle,
        }
    }

    pub fn state(&self) -> ToolState {
        self.state
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn press(&mut self, point: MapPoint) -> PressOutcome {
        let (next, outcome) = mem::take(&mut self.state).press(&self.projection, point);
        self.state = next;
        outcome
    }

    pub fn hover(&self, point: MapPoint) -> Option<f64> {
        self.state.hover(&self.projection, point)
    }

    pub fn confirm(&mut self, answer: Option<&str>) -> Option<Circle> {
        let (next, circle) = mem::take(&mut self.state).confirm(answer);
        self.state = next;
        circle
    }

    pub fn reset(&mut self) {
        self.state = ToolState::Idle;
    }

    /// Rubber band around the current center, in canvas coordinates.
    pub fn preview_ring(&self, radius_m: f64, segments: usize) -> Vec<MapPoint> {
        let Some((_, center_geo)) = self.state.center() else {
            return Vec::new();
        };
        geodesic_ring(center_geo, radius_m, segments)
            .into_iter()
            .map(|point| self.projection.from_geographic(point))
            .collect()
    }
}
