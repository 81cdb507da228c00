//! Shared data models for the captain client and its backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Geography ---

/// A WGS84 position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

// --- Ride offers ---

pub const DEFAULT_PICKUP_ADDRESS: &str = "Pickup";
pub const DEFAULT_DROPOFF_ADDRESS: &str = "Dropoff";

/// A ride request pushed to the driver, awaiting accept or reject.
///
/// Offers are immutable once built. `id` is a local identity used by list
/// and sheet rendering; it never leaves the device. The backend only knows
/// `ride_id`.
///
/// Offers are only constructed through [`RideOffer::builder`], so this type
/// does not implement `Deserialize`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RideOffer {
    #[serde(skip)]
    id: Uuid,
    ride_id: String,
    pickup_address: String,
    dropoff_address: String,
    fare: f64,
    customer_name: Option<String>,
    customer_rating: Option<f64>,
    distance_km: Option<f64>,
    pickup_location: Option<Coordinate>,
}

impl RideOffer {
    /// Start building an offer. Returns `None` when `ride_id` is blank,
    /// since such an offer can never be accepted or rejected.
    pub fn builder(ride_id: impl Into<String>) -> Option<RideOfferBuilder> {
        let ride_id = ride_id.into();
        if ride_id.trim().is_empty() {
            return None;
        }
        Some(RideOfferBuilder {
            ride_id,
            pickup_address: None,
            dropoff_address: None,
            fare: 0.0,
            customer_name: None,
            customer_rating: None,
            distance_km: None,
            pickup_location: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ride_id(&self) -> &str {
        &self.ride_id
    }

    pub fn pickup_address(&self) -> &str {
        &self.pickup_address
    }

    pub fn dropoff_address(&self) -> &str {
        &self.dropoff_address
    }

    pub fn fare(&self) -> f64 {
        self.fare
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.customer_name.as_deref()
    }

    pub fn customer_rating(&self) -> Option<f64> {
        self.customer_rating
    }

    pub fn distance_km(&self) -> Option<f64> {
        self.distance_km
    }

    pub fn pickup_location(&self) -> Option<Coordinate> {
        self.pickup_location
    }
}

/// Builder for [`RideOffer`]. Unset addresses fall back to the
/// "Pickup"/"Dropoff" placeholders and an unset fare is zero.
#[derive(Debug, Clone)]
pub struct RideOfferBuilder {
    ride_id: String,
    pickup_address: Option<String>,
    dropoff_address: Option<String>,
    fare: f64,
    customer_name: Option<String>,
    customer_rating: Option<f64>,
    distance_km: Option<f64>,
    pickup_location: Option<Coordinate>,
}

impl RideOfferBuilder {
    pub fn pickup_address(mut self, address: Option<String>) -> Self {
        self.pickup_address = address;
        self
    }

    pub fn dropoff_address(mut self, address: Option<String>) -> Self {
        self.dropoff_address = address;
        self
    }

    pub fn fare(mut self, fare: f64) -> Self {
        self.fare = fare;
        self
    }

    pub fn customer_name(mut self, name: Option<String>) -> Self {
        self.customer_name = name;
        self
    }

    pub fn customer_rating(mut self, rating: Option<f64>) -> Self {
        self.customer_rating = rating;
        self
    }

    pub fn distance_km(mut self, distance: Option<f64>) -> Self {
        self.distance_km = distance;
        self
    }

    pub fn pickup_location(mut self, location: Option<Coordinate>) -> Self {
        self.pickup_location = location;
        self
    }

    pub fn build(self) -> RideOffer {
        RideOffer {
            id: Uuid::new_v4(),
            ride_id: self.ride_id,
            pickup_address: self
                .pickup_address
                .unwrap_or_else(|| DEFAULT_PICKUP_ADDRESS.to_string()),
            dropoff_address: self
                .dropoff_address
                .unwrap_or_else(|| DEFAULT_DROPOFF_ADDRESS.to_string()),
            fare: self.fare,
            customer_name: self.customer_name,
            customer_rating: self.customer_rating,
            distance_km: self.distance_km,
            pickup_location: self.pickup_location,
        }
    }
}

// --- Driver ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub vehicle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterRequest {
    pub name: String,
    pub phone: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<String>,
}

/// Response body of login and register.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthResponse {
    pub token: String,
    pub driver: DriverProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
}

impl From<Coordinate> for LocationUpdate {
    fn from(c: Coordinate) -> Self {
        Self { lat: c.lat, lng: c.lng }
    }
}

// --- Rides ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideDetails {
    pub ride_id: String,
    pub status: RideStatus,
    #[serde(default)]
    pub pickup_address: Option<String>,
    #[serde(default)]
    pub dropoff_address: Option<String>,
    #[serde(default)]
    pub fare: Option<f64>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub pickup_location: Option<Coordinate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideHistoryEntry {
    pub ride_id: String,
    pub status: RideStatus,
    #[serde(default)]
    pub fare: Option<f64>,
    #[serde(default)]
    pub pickup_address: Option<String>,
    #[serde(default)]
    pub dropoff_address: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
