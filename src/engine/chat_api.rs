use super::helpers::{bounded_text, MAX_MESSAGE_LEN};
use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::ChatAPI,
    auth::User,
    entities::{ChatMessage, Ride},
    error::Error,
    notify::{Event, Topic},
};

impl Engine {
    /// Chat opens once a driver is assigned and is limited to the two participants.
    async fn chat_ride(&self, user: &User, ride_id: Uuid) -> Result<Ride, Error> {
        let ride = self.load_ride(ride_id).await?;

        self.authorize(user, "chat", ride.clone()).await?;

        if ride.driver_id.is_none() {
            return Err(Error::invalid_transition("chat opens once a driver is assigned"));
        }

        Ok(ride)
    }
}

#[async_trait]
impl ChatAPI for Engine {
    #[tracing::instrument(skip(self, message), fields(user_id = %user.id))]
    async fn send_message(
        &self,
        user: User,
        ride_id: Uuid,
        message: String,
    ) -> Result<ChatMessage, Error> {
        let text = bounded_text("message", &message, MAX_MESSAGE_LEN)?;
        if text.is_empty() {
            return Err(Error::invalid_input("message is empty"));
        }

        self.chat_ride(&user, ride_id).await?;

        let message = self
            .stores
            .chat
            .append(&ChatMessage::new(ride_id, user.id, text))
            .await?;

        self.publish(Topic::Ride(ride_id), Event::MessagePosted(message.clone()))
            .await;

        Ok(message)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn list_messages(&self, user: User, ride_id: Uuid) -> Result<Vec<ChatMessage>, Error> {
        self.chat_ride(&user, ride_id).await?;

        self.stores.chat.list_for(ride_id).await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn mark_read(&self, user: User, ride_id: Uuid) -> Result<u64, Error> {
        self.chat_ride(&user, ride_id).await?;

        self.stores.chat.mark_read(ride_id, user.id).await
    }
}
