use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Where a driver stands in document review. Only verified drivers are offered rides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    #[default]
    Unverified,
    Pending,
    Verified,
}

impl Verification {
    pub fn name(&self) -> &'static str {
        match self {
            Verification::Unverified => "unverified",
            Verification::Pending => "pending",
            Verification::Verified => "verified",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "unverified" => Ok(Verification::Unverified),
            "pending" => Ok(Verification::Pending),
            "verified" => Ok(Verification::Verified),
            other => Err(Error::invalid_input(format!(
                "unknown verification status {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub driver_id: Uuid,
    pub verification: Verification,
    pub updated_at: DateTime<Utc>,
}

impl DriverProfile {
    pub fn new(driver_id: Uuid) -> Self {
        Self {
            driver_id,
            verification: Verification::Unverified,
            updated_at: Utc::now(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Verified
    }

    /// A driver asks for review after uploading documents. Verified drivers stay verified.
    pub fn request_review(&mut self, at: DateTime<Utc>) -> Result<(), Error> {
        match self.verification {
            Verification::Unverified => {
                self.verification = Verification::Pending;
                self.updated_at = at;
                Ok(())
            }
            Verification::Pending => Ok(()),
            Verification::Verified => Err(Error::invalid_transition(
                "driver is already verified",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_drivers_start_unverified() {
        let profile = DriverProfile::new(Uuid::new_v4());
        assert_eq!(profile.verification, Verification::Unverified);
        assert!(!profile.is_verified());
    }

    #[test]
    fn review_request_moves_to_pending_once() {
        let mut profile = DriverProfile::new(Uuid::new_v4());
        profile.request_review(Utc::now()).unwrap();
        assert_eq!(profile.verification, Verification::Pending);

        profile.request_review(Utc::now()).unwrap();
        assert_eq!(profile.verification, Verification::Pending);

        profile.verification = Verification::Verified;
        assert!(profile.request_review(Utc::now()).unwrap_err().is_invalid_transition());
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            Verification::Unverified,
            Verification::Pending,
            Verification::Verified,
        ] {
            assert_eq!(Verification::parse(status.name()).unwrap(), status);
        }
        assert!(Verification::parse("approved").is_err());
        assert_eq!(
            serde_json::to_string(&Verification::Pending).unwrap(),
            "\"pending\""
        );
    }
}
