use super::helpers::with_retry;
use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    api::DriverAPI,
    auth::{Platform, Role, User},
    entities::{DriverProfile, Verification},
    error::Error,
};

#[async_trait]
impl DriverAPI for Engine {
    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn request_verification(&self, user: User) -> Result<DriverProfile, Error> {
        self.authorize(&user, "request_verification", Platform::new())
            .await?;

        let mut profile = self.stores.drivers.get(user.id).await?;
        if profile.verification == Verification::Pending {
            return Ok(profile);
        }

        profile.request_review(Utc::now())?;

        let drivers = self.stores.drivers.clone();
        let driver_id = user.id;
        let requested = profile.verification;
        let profile = with_retry(&self.settings.retry, "set_verification", || {
            let drivers = drivers.clone();
            async move {
                drivers
                    .set_verification(driver_id, requested)
                    .await
            }
        })
        .await?;

        tracing::info!("driver {} is awaiting review", driver_id);

        Ok(profile)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn driver_profile(&self, user: User, driver_id: Uuid) -> Result<DriverProfile, Error> {
        self.authorize(&user, "read_profile", Platform::new()).await?;

        if user.role == Role::Driver && user.id != driver_id {
            return Err(Error::unauthorized());
        }

        self.stores.drivers.get(driver_id).await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn set_verification(
        &self,
        user: User,
        driver_id: Uuid,
        verification: Verification,
    ) -> Result<DriverProfile, Error> {
        self.authorize(&user, "verify_drivers", Platform::new()).await?;

        let drivers = self.stores.drivers.clone();
        let profile = with_retry(&self.settings.retry, "set_verification", || {
            let drivers = drivers.clone();
            async move { drivers.set_verification(driver_id, verification).await }
        })
        .await?;

        tracing::info!("driver {} is now {}", driver_id, profile.verification);

        Ok(profile)
    }
}
