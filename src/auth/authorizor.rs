use oso::{Oso, PolarClass};

use crate::auth::{Platform, User};
use crate::entities::Ride;
use crate::error::Error;

pub fn new() -> Result<Oso, Error> {
    let mut o = Oso::new();

    o.register_class(Platform::get_polar_class())?;
    o.register_class(User::get_polar_class())?;
    o.register_class(Ride::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

#[cfg(test)]
fn ride_for(rider_id: uuid::Uuid) -> Ride {
    use crate::entities::{Coordinates, Location, VehicleCategory};

    let origin = Location::new(Coordinates::new(3.45, -76.53), "".into());
    let destination = Location::new(Coordinates::new(3.40, -76.52), "".into());
    Ride::new(rider_id, VehicleCategory::Car, origin, destination, vec![], 15000)
}

#[test]
fn platform_ride_relation_test() {
    let authorizor = new().unwrap();
    let ride = ride_for(uuid::Uuid::new_v4());

    let result = authorizor.query_rule("has_relation", (Platform::new(), "platform", ride));
    assert!(result.unwrap().next().unwrap().is_ok());
}

#[test]
fn platform_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let rider = User::rider(Uuid::new_v4());
    let driver = User::driver(Uuid::new_v4()).with_verified(true);
    let unverified = User::driver(Uuid::new_v4());

    let result = authorizor.query_rule("has_role", (rider.clone(), "rider", Platform::new()));
    assert!(result.unwrap().next().unwrap().is_ok());

    let result = authorizor.query_rule("has_role", (rider.clone(), "driver", Platform::new()));
    assert!(result.unwrap().next().is_none());

    assert!(authorizor.is_allowed(rider.clone(), "create_ride", Platform::new()).unwrap());
    assert!(!authorizor.is_allowed(rider, "post_bid", Platform::new()).unwrap());

    assert!(authorizor.is_allowed(driver.clone(), "post_bid", Platform::new()).unwrap());
    assert!(authorizor.is_allowed(driver.clone(), "update_presence", Platform::new()).unwrap());
    assert!(!authorizor.is_allowed(driver, "create_ride", Platform::new()).unwrap());

    assert!(authorizor.is_allowed(unverified.clone(), "update_presence", Platform::new()).unwrap());
    assert!(authorizor.is_allowed(unverified.clone(), "request_verification", Platform::new()).unwrap());
    assert!(!authorizor.is_allowed(unverified.clone(), "post_bid", Platform::new()).unwrap());
    assert!(!authorizor.is_allowed(unverified.clone(), "accept_offer", Platform::new()).unwrap());
    assert!(!authorizor.is_allowed(unverified, "verify_drivers", Platform::new()).unwrap());

    // a rider cannot pass as a verified driver
    let claimed = User::rider(Uuid::new_v4()).with_verified(true);
    assert!(!authorizor.is_allowed(claimed, "accept_offer", Platform::new()).unwrap());
}

#[test]
fn ride_rider_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let rider = User::rider(Uuid::new_v4());
    let stranger = User::rider(Uuid::new_v4());
    let ride = ride_for(rider.id);

    let result = authorizor.query_rule("has_role", (rider.clone(), "rider", ride.clone()));
    assert!(result.unwrap().next().unwrap().is_ok());

    for action in ["read", "cancel", "accept_bid", "list_bids", "emergency", "rate"] {
        assert!(
            authorizor.is_allowed(rider.clone(), action, ride.clone()).unwrap(),
            "rider should be allowed to {}",
            action
        );
        assert!(
            !authorizor.is_allowed(stranger.clone(), action, ride.clone()).unwrap(),
            "stranger should not be allowed to {}",
            action
        );
    }

    assert!(!authorizor.is_allowed(rider.clone(), "bid", ride.clone()).unwrap());
    assert!(!authorizor.is_allowed(rider, "complete", ride).unwrap());
}

#[test]
fn ride_candidate_and_driver_role_test() {
    use chrono::Utc;
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::driver(Uuid::new_v4()).with_verified(true);
    let other_driver = User::driver(Uuid::new_v4()).with_verified(true);
    let unverified = User::driver(Uuid::new_v4());
    let mut ride = ride_for(Uuid::new_v4());

    // before acceptance every verified driver is a candidate

    let result = authorizor.query_rule("has_role", (unverified.clone(), "candidate", ride.clone()));
    assert!(result.unwrap().next().is_none());
    assert!(!authorizor.is_allowed(unverified.clone(), "bid", ride.clone()).unwrap());
    assert!(!authorizor.is_allowed(unverified, "accept_offer", ride.clone()).unwrap());

    let result = authorizor.query_rule("has_role", (driver.clone(), "candidate", ride.clone()));
    assert!(result.unwrap().next().unwrap().is_ok());

    let result = authorizor.query_rule("has_role", (driver.clone(), "driver", ride.clone()));
    assert!(result.unwrap().next().is_none());

    assert!(authorizor.is_allowed(driver.clone(), "read", ride.clone()).unwrap());
    assert!(authorizor.is_allowed(driver.clone(), "bid", ride.clone()).unwrap());
    assert!(authorizor.is_allowed(driver.clone(), "accept_offer", ride.clone()).unwrap());
    assert!(!authorizor.is_allowed(driver.clone(), "arrive", ride.clone()).unwrap());
    assert!(!authorizor.is_allowed(driver.clone(), "chat", ride.clone()).unwrap());
    assert!(!authorizor.is_allowed(driver.clone(), "accept_bid", ride.clone()).unwrap());

    ride.accept(driver.id, 15000, Utc::now()).unwrap();

    // after acceptance

    let result = authorizor.query_rule("has_role", (driver.clone(), "driver", ride.clone()));
    assert!(result.unwrap().next().unwrap().is_ok());

    for action in ["arrive", "start", "complete", "cancel", "chat", "emergency"] {
        assert!(authorizor.is_allowed(driver.clone(), action, ride.clone()).unwrap());
        assert!(!authorizor
            .is_allowed(other_driver.clone(), action, ride.clone())
            .unwrap());
    }

    assert!(!authorizor.is_allowed(driver, "rate", ride).unwrap());
}

#[test]
fn ride_admin_and_system_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let admin = User::admin(Uuid::new_v4());
    let system = User::system();
    let rider = User::rider(Uuid::new_v4());
    let ride = ride_for(rider.id);

    let result = authorizor.query_rule("has_role", (system.clone(), "system", ride.clone()));
    assert!(result.unwrap().next().unwrap().is_ok());

    let result = authorizor.query_rule("has_role", (rider.clone(), "system", ride.clone()));
    assert!(result.unwrap().next().is_none());

    assert!(authorizor.is_allowed(system.clone(), "expire", ride.clone()).unwrap());
    assert!(authorizor.is_allowed(system.clone(), "read", ride.clone()).unwrap());
    assert!(!authorizor.is_allowed(rider, "expire", ride.clone()).unwrap());

    assert!(authorizor.is_allowed(admin.clone(), "clear_emergency", ride.clone()).unwrap());
    assert!(authorizor.is_allowed(admin.clone(), "cancel", ride.clone()).unwrap());
    assert!(authorizor.is_allowed(admin.clone(), "verify_drivers", Platform::new()).unwrap());
    assert!(!authorizor.is_allowed(admin.clone(), "expire", ride.clone()).unwrap());
    assert!(!authorizor.is_allowed(admin, "bid", ride).unwrap());
}
