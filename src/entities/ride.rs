use chrono::{DateTime, Utc};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::entities::{Coordinates, Location};
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleCategory {
    #[serde(alias = "economy")]
    Car,
    Moto,
}

impl VehicleCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Moto => "moto",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Negotiating,
    Accepted,
    DriverArriving,
    Ongoing,
    Completed,
    Cancelled,
    Emergency,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Pending,
        Status::Negotiating,
        Status::Accepted,
        Status::DriverArriving,
        Status::Ongoing,
        Status::Completed,
        Status::Cancelled,
        Status::Emergency,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Negotiating => "negotiating",
            Self::Accepted => "accepted",
            Self::DriverArriving => "driver_arriving",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Emergency => "emergency",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Still accepting bids and acceptances.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Negotiating)
    }

    pub fn has_driver(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::DriverArriving | Self::Ongoing | Self::Completed | Self::Emergency
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Edges of the ride graph. `allowed_from` is the only place the graph is encoded; the
/// ledger uses it as the guard of the conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Bid,
    Accept,
    Arrive,
    Start,
    Complete,
    Cancel,
    TriggerEmergency,
    ClearEmergency,
    Expire,
}

impl Transition {
    pub fn allowed_from(&self) -> &'static [Status] {
        match self {
            Self::Bid => &[Status::Pending, Status::Negotiating],
            Self::Accept => &[Status::Pending, Status::Negotiating],
            Self::Arrive => &[Status::Accepted],
            Self::Start => &[Status::DriverArriving],
            Self::Complete => &[Status::Ongoing],
            Self::Cancel => &[
                Status::Pending,
                Status::Negotiating,
                Status::Accepted,
                Status::DriverArriving,
                Status::Emergency,
            ],
            Self::TriggerEmergency => &[Status::Accepted, Status::DriverArriving, Status::Ongoing],
            Self::ClearEmergency => &[Status::Emergency],
            Self::Expire => &[Status::Pending, Status::Negotiating],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Accept => "accept",
            Self::Arrive => "arrive",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::TriggerEmergency => "trigger_emergency",
            Self::ClearEmergency => "clear_emergency",
            Self::Expire => "expire",
        }
    }

    /// Status a ride lands in. `None` for `ClearEmergency`, which restores the previous one.
    pub fn target(&self) -> Option<Status> {
        match self {
            Self::Bid => Some(Status::Negotiating),
            Self::Accept => Some(Status::Accepted),
            Self::Arrive => Some(Status::DriverArriving),
            Self::Start => Some(Status::Ongoing),
            Self::Complete => Some(Status::Completed),
            Self::Cancel | Self::Expire => Some(Status::Cancelled),
            Self::TriggerEmergency => Some(Status::Emergency),
            Self::ClearEmergency => None,
        }
    }

    pub fn admits(&self, status: Status) -> bool {
        self.allowed_from().contains(&status)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Emergency {
    pub previous: Status,
    pub triggered_by: Uuid,
    pub reason: String,
    pub coordinates: Option<Coordinates>,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub category: VehicleCategory,
    pub origin: Location,
    pub destination: Location,
    pub stops: Vec<Location>,
    pub offer_price: i64,
    pub final_price: Option<i64>,
    pub status: Status,
    pub distance_meters: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub emergency: Option<Emergency>,
}

impl Ride {
    pub fn new(
        rider_id: Uuid,
        category: VehicleCategory,
        origin: Location,
        destination: Location,
        stops: Vec<Location>,
        offer_price: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id,
            driver_id: None,
            category,
            origin,
            destination,
            stops,
            offer_price,
            final_price: None,
            status: Status::Pending,
            distance_meters: None,
            duration_seconds: None,
            version: 1,
            created_at: Utc::now(),
            accepted_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            emergency: None,
        }
    }

    /// `driver_id` and `final_price` are present exactly when the status carries a driver.
    /// A cancelled ride keeps the driver it had, if any, for audit.
    pub fn is_consistent(&self) -> bool {
        if self.status == Status::Cancelled {
            return self.driver_id.is_some() == self.final_price.is_some();
        }

        let has_driver = self.status.has_driver();
        self.driver_id.is_some() == has_driver && self.final_price.is_some() == has_driver
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.rider_id == user_id || self.driver_id == Some(user_id)
    }

    /// Whether the ride currently sits where `transition` would have left it.
    pub fn reached(&self, transition: Transition) -> bool {
        match transition.target() {
            Some(status) => self.status == status,
            None => {
                self.status != Status::Emergency
                    && self
                        .emergency
                        .as_ref()
                        .map_or(false, |emergency| emergency.resolved_at.is_some())
            }
        }
    }

    fn ensure(&self, transition: Transition) -> Result<(), Error> {
        if transition.admits(self.status) {
            return Ok(());
        }

        Err(Error::invalid_transition(format!(
            "cannot {} a ride that is {}",
            transition, self.status
        )))
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn open_negotiation(&mut self) -> Result<(), Error> {
        self.ensure(Transition::Bid)?;
        self.status = Status::Negotiating;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn accept(&mut self, driver_id: Uuid, price: i64, now: DateTime<Utc>) -> Result<(), Error> {
        self.ensure(Transition::Accept)?;

        if self.driver_id.is_some() {
            return Err(Error::invalid_transition("ride already has a driver"));
        }

        self.driver_id = Some(driver_id);
        self.final_price = Some(price);
        self.accepted_at = Some(now);
        self.status = Status::Accepted;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn arrive(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        self.ensure(Transition::Arrive)?;
        self.arrived_at = Some(now);
        self.status = Status::DriverArriving;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        self.ensure(Transition::Start)?;
        self.started_at = Some(now);
        self.status = Status::Ongoing;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        self.ensure(Transition::Complete)?;
        self.completed_at = Some(now);
        self.status = Status::Completed;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn cancel(&mut self, cancelled_by: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        self.ensure(Transition::Cancel)?;
        self.cancelled_by = Some(cancelled_by);
        self.cancelled_at = Some(now);
        if let Some(emergency) = self.emergency.as_mut() {
            emergency.resolved_at.get_or_insert(now);
        }
        self.status = Status::Cancelled;
        Ok(())
    }

    /// Auto-cancellation of an open ride nobody took.
    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        self.ensure(Transition::Expire)?;
        self.cancelled_at = Some(now);
        self.status = Status::Cancelled;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn trigger_emergency(
        &mut self,
        triggered_by: Uuid,
        reason: String,
        coordinates: Option<Coordinates>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.ensure(Transition::TriggerEmergency)?;
        self.emergency = Some(Emergency {
            previous: self.status,
            triggered_by,
            reason,
            coordinates,
            triggered_at: now,
            resolved_at: None,
        });
        self.status = Status::Emergency;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id, status = %self.status))]
    pub fn clear_emergency(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        self.ensure(Transition::ClearEmergency)?;

        let emergency = self
            .emergency
            .as_mut()
            .ok_or_else(|| Error::unexpected("emergency status without emergency record"))?;

        emergency.resolved_at = Some(now);
        self.status = emergency.previous;
        Ok(())
    }
}

impl PolarClass for Ride {
    fn get_polar_class_builder() -> oso::ClassBuilder<Ride> {
        oso::Class::builder()
            .name("Ride")
            .add_attribute_getter("id", |recv: &Ride| recv.id.to_string())
            .add_attribute_getter("rider_id", |recv: &Ride| recv.rider_id.to_string())
            .add_attribute_getter("driver_id", |recv: &Ride| {
                recv.driver_id.map(|id| id.to_string()).unwrap_or_default()
            })
            .add_attribute_getter("status", |recv: &Ride| recv.status.name().to_string())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Ride::get_polar_class_builder();
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ride() -> Ride {
        let origin = Location::new(Coordinates::new(3.45, -76.53), "Cali".into());
        let destination = Location::new(Coordinates::new(3.40, -76.52), "Jamundi".into());
        Ride::new(
            Uuid::new_v4(),
            VehicleCategory::Car,
            origin,
            destination,
            vec![],
            20000,
        )
    }

    #[test]
    fn new_ride_is_pending_without_driver() {
        let ride = ride();
        assert_eq!(ride.status, Status::Pending);
        assert_eq!(ride.driver_id, None);
        assert_eq!(ride.final_price, None);
        assert!(ride.is_consistent());
    }

    #[test]
    fn full_lifecycle_keeps_invariants() {
        let mut ride = ride();
        let driver = Uuid::new_v4();
        let now = Utc::now();

        ride.open_negotiation().unwrap();
        assert_eq!(ride.status, Status::Negotiating);
        assert!(ride.is_consistent());

        ride.accept(driver, 25000, now).unwrap();
        assert_eq!(ride.status, Status::Accepted);
        assert_eq!(ride.driver_id, Some(driver));
        assert_eq!(ride.final_price, Some(25000));
        assert_eq!(ride.accepted_at, Some(now));
        assert!(ride.is_consistent());

        ride.arrive(now).unwrap();
        ride.start(now).unwrap();
        ride.complete(now).unwrap();
        assert_eq!(ride.status, Status::Completed);
        assert_eq!(ride.completed_at, Some(now));
        assert!(ride.is_consistent());
    }

    #[test]
    fn start_on_pending_ride_is_rejected_without_change() {
        let mut ride = ride();
        let before = ride.clone();

        let err = ride.start(Utc::now()).unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(ride, before);
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        let transitions = [
            Transition::Bid,
            Transition::Accept,
            Transition::Arrive,
            Transition::Start,
            Transition::Complete,
            Transition::Cancel,
            Transition::TriggerEmergency,
            Transition::ClearEmergency,
            Transition::Expire,
        ];

        for status in Status::ALL.iter().filter(|s| s.is_terminal()) {
            for transition in transitions.iter() {
                assert!(
                    !transition.admits(*status),
                    "{} admitted from {}",
                    transition,
                    status
                );
            }
        }
    }

    #[test]
    fn cancel_is_not_permitted_once_ongoing() {
        let mut ride = ride();
        let now = Utc::now();
        ride.accept(Uuid::new_v4(), 20000, now).unwrap();
        ride.arrive(now).unwrap();
        ride.start(now).unwrap();

        assert!(ride.cancel(ride.rider_id, now).unwrap_err().is_invalid_transition());
        assert_eq!(ride.status, Status::Ongoing);
    }

    #[test]
    fn emergency_restores_previous_status_when_cleared() {
        let mut ride = ride();
        let now = Utc::now();
        ride.accept(Uuid::new_v4(), 20000, now).unwrap();
        ride.arrive(now).unwrap();
        ride.start(now).unwrap();

        ride.trigger_emergency(ride.rider_id, "help".into(), None, now)
            .unwrap();
        assert_eq!(ride.status, Status::Emergency);
        assert!(ride.is_consistent());

        ride.clear_emergency(now).unwrap();
        assert_eq!(ride.status, Status::Ongoing);
        assert_eq!(ride.emergency.as_ref().unwrap().resolved_at, Some(now));
    }

    #[test]
    fn emergency_requires_assigned_driver() {
        let mut ride = ride();
        let err = ride
            .trigger_emergency(ride.rider_id, "help".into(), None, Utc::now())
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(ride.status, Status::Pending);
    }

    #[test]
    fn cancelled_ride_keeps_its_driver_for_audit() {
        let mut ride = ride();
        let driver = Uuid::new_v4();
        let now = Utc::now();
        ride.accept(driver, 20000, now).unwrap();
        ride.cancel(driver, now).unwrap();

        assert_eq!(ride.status, Status::Cancelled);
        assert_eq!(ride.driver_id, Some(driver));
        assert_eq!(ride.cancelled_by, Some(driver));
        assert!(ride.is_consistent());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::DriverArriving).unwrap();
        assert_eq!(json, "\"driver_arriving\"");

        let category: VehicleCategory = serde_json::from_str("\"economy\"").unwrap();
        assert_eq!(category, VehicleCategory::Car);
    }

    #[test]
    fn reached_tracks_where_a_transition_lands() {
        let mut ride = ride();
        let now = Utc::now();
        assert!(!ride.reached(Transition::Accept));

        ride.accept(Uuid::new_v4(), 20000, now).unwrap();
        assert!(ride.reached(Transition::Accept));
        assert!(!ride.reached(Transition::ClearEmergency));

        ride.trigger_emergency(ride.rider_id, "help".into(), None, now)
            .unwrap();
        assert!(ride.reached(Transition::TriggerEmergency));
        assert!(!ride.reached(Transition::ClearEmergency));

        ride.clear_emergency(now).unwrap();
        assert!(ride.reached(Transition::ClearEmergency));
        assert!(ride.reached(Transition::Accept));
    }
}
