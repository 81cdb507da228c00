//! Decoding of inbound frames into domain events.
//!
//! The backend does not pin down its payload shape, so this module is where
//! key-name and coordinate-layout variance gets absorbed. Everything
//! downstream only ever sees a [`RideOffer`].

use captain_shared::{
    Coordinate, InboundEvent, RideOffer, EVENT_DATA_KEY, EVENT_NAME_KEYS, NEW_RIDE_REQUEST,
};
use serde_json::{Map, Value};

type Object = Map<String, Value>;

/// Decode one text frame into at most one domain event.
///
/// Unparseable frames, unknown events and offers without a ride id all yield
/// `None`; each is logged at debug level and otherwise ignored.
pub fn normalize(frame: &str) -> Option<InboundEvent> {
    let root: Object = match serde_json::from_str::<Value>(frame) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::debug!("dropping non-object frame");
            return None;
        }
        Err(e) => {
            tracing::debug!(error = %e, "dropping unparseable frame");
            return None;
        }
    };

    let Some(event) = event_name(&root) else {
        tracing::debug!("dropping frame without event name");
        return None;
    };

    if event != NEW_RIDE_REQUEST {
        tracing::debug!(event, "ignoring unhandled event");
        return None;
    }

    let Some(payload) = root.get(EVENT_DATA_KEY).and_then(Value::as_object) else {
        tracing::debug!(event, "dropping event without payload object");
        return None;
    };

    let offer = ride_offer(payload)?;
    Some(InboundEvent::NewOffer(offer))
}

fn event_name(root: &Object) -> Option<&str> {
    EVENT_NAME_KEYS
        .iter()
        .find_map(|key| root.get(*key).and_then(Value::as_str))
}

/// Build an offer from a `new_ride_request` payload.
fn ride_offer(payload: &Object) -> Option<RideOffer> {
    let ride_id = payload.get("ride_id").map(text).unwrap_or_default();
    let Some(builder) = RideOffer::builder(ride_id) else {
        tracing::debug!("dropping ride offer without ride_id");
        return None;
    };

    let offer = builder
        .pickup_address(string_field(payload, "pickup_address"))
        .dropoff_address(string_field(payload, "dropoff_address"))
        .fare(payload.get("estimated_fare").and_then(number).unwrap_or(0.0))
        .customer_name(string_field(payload, "customer_name"))
        .customer_rating(payload.get("customer_rating").and_then(number))
        .distance_km(payload.get("distance_km").and_then(number))
        .pickup_location(pickup_location(payload))
        .build();
    Some(offer)
}

/// Coerce a JSON value to text the way the backend's ids are meant to be read.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn string_field(payload: &Object, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers, or strings holding numbers. Non-finite values are rejected.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

// --- Pickup coordinates ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Latitude,
    Longitude,
}

impl Axis {
    /// Keys tried directly on the payload root.
    fn root_keys(self) -> &'static [&'static str] {
        match self {
            Axis::Latitude => &["pickup_lat", "pickup_latitude"],
            Axis::Longitude => &["pickup_lng", "pickup_lon", "pickup_long", "pickup_longitude"],
        }
    }

    /// Keys tried inside a nested location object.
    fn nested_keys(self) -> &'static [&'static str] {
        match self {
            Axis::Latitude => &["lat", "latitude"],
            Axis::Longitude => &["lng", "lon", "long", "longitude"],
        }
    }

    /// Position in a GeoJSON `[longitude, latitude]` pair.
    fn geojson_index(self) -> usize {
        match self {
            Axis::Longitude => 0,
            Axis::Latitude => 1,
        }
    }
}

type Extractor = fn(&Object, Axis) -> Option<f64>;

/// Sources tried in priority order, independently for each axis.
const EXTRACTORS: [Extractor; 4] = [
    from_root,
    from_pickup,
    from_pickup_location,
    from_pickup_coordinates,
];

fn pickup_location(payload: &Object) -> Option<Coordinate> {
    let lat = resolve(payload, Axis::Latitude)?;
    let lng = resolve(payload, Axis::Longitude)?;
    Some(Coordinate::new(lat, lng))
}

fn resolve(payload: &Object, axis: Axis) -> Option<f64> {
    EXTRACTORS
        .iter()
        .find_map(|extract| extract(payload, axis))
}

fn first_key(object: &Object, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| object.get(*key).and_then(number))
}

fn from_geojson_pair(value: &Value, axis: Axis) -> Option<f64> {
    match value.as_array()?.as_slice() {
        pair @ [_, _] => number(&pair[axis.geojson_index()]),
        _ => None,
    }
}

fn from_nested(payload: &Object, key: &str, axis: Axis) -> Option<f64> {
    let nested = payload.get(key)?.as_object()?;
    first_key(nested, axis.nested_keys())
        .or_else(|| nested.get("coordinates").and_then(|c| from_geojson_pair(c, axis)))
}

fn from_root(payload: &Object, axis: Axis) -> Option<f64> {
    first_key(payload, axis.root_keys())
}

fn from_pickup(payload: &Object, axis: Axis) -> Option<f64> {
    from_nested(payload, "pickup", axis)
}

fn from_pickup_location(payload: &Object, axis: Axis) -> Option<f64> {
    from_nested(payload, "pickup_location", axis)
}

fn from_pickup_coordinates(payload: &Object, axis: Axis) -> Option<f64> {
    from_geojson_pair(payload.get("pickup_coordinates")?, axis)
}
