//! Turns decoded peripheral actions into speech and messages.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use navassist_core::DomainEvent;

use crate::geocode::{Address, Geocoder};
use crate::identity::SharedStore;
use crate::sms::SmsSender;
use crate::speech::SpeechQueue;
use crate::translate::Translator;

pub const UNKNOWN_ROAD: &str = "Calle desconocida";
pub const UNKNOWN_DISTRICT: &str = "Colonia desconocida";
pub const SMS_SENT: &str = "Se ha enviado un mensaje con tu ubicación actual.";
pub const SMS_FAILED: &str = "No se pudo enviar el mensaje de ayuda.";

/// Spoken location sentence.
pub fn location_sentence(address: Option<&Address>) -> String {
    let road = address.and_then(Address::road).unwrap_or(UNKNOWN_ROAD);
    let district = address
        .and_then(Address::district)
        .unwrap_or(UNKNOWN_DISTRICT);
    format!("Estás en {road}, colonia {district}")
}

/// Spoken sentence for a detected object.
pub fn detection_sentence(description: &str) -> String {
    format!("Se ha detectado: {description}.")
}

/// Text sent to the emergency contact.
pub fn help_message(lat: f64, lon: f64) -> String {
    format!("Hola, necesito ayuda. Estoy en https://maps.google.com/?q={lat},{lon}")
}

/// Everything the handler talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub geocoder: Arc<dyn Geocoder>,
    pub translator: Arc<dyn Translator>,
    pub sms: Arc<dyn SmsSender>,
    pub speech: SpeechQueue,
    pub store: SharedStore,
    /// Used when no number has been stored.
    pub default_phone_number: String,
}

/// Consumes the action stream one event at a time.
pub struct ActionHandler {
    collaborators: Collaborators,
}

impl ActionHandler {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Run on a new task until `cancel` fires or the stream closes.
    pub fn spawn(
        self,
        mut actions: broadcast::Receiver<DomainEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = actions.recv() => event,
                };
                match event {
                    Ok(event) => self.handle(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Action handler fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Action handler stopped");
        })
    }

    /// Handle a single event to completion.
    pub async fn handle(&self, event: DomainEvent) {
        match event {
            DomainEvent::NoAction => {
                info!("Peripheral reported no action");
            }
            DomainEvent::TalkLocation { lat, lon } => {
                info!(lat, lon, "Announcing location");
                let address = self.lookup(lat, lon).await;
                self.collaborators
                    .speech
                    .enqueue(location_sentence(address.as_ref()));
            }
            DomainEvent::TalkObject { description } => {
                info!(%description, "Announcing detected object");
                let text = match self.collaborators.translator.translate(&description).await {
                    Ok(translated) => translated,
                    Err(e) => {
                        warn!(error = %e, "Translation failed, speaking original text");
                        description
                    }
                };
                self.collaborators.speech.enqueue(detection_sentence(&text));
            }
            DomainEvent::SendLocationSms { lat, lon } => {
                info!(lat, lon, "Sending location to emergency contact");
                // The message carries only coordinates; the lookup is for the log.
                if let Some(address) = self.lookup(lat, lon).await {
                    debug!(?address, "Emergency location");
                }
                let spoken = if self.send_help(lat, lon).await {
                    SMS_SENT
                } else {
                    SMS_FAILED
                };
                self.collaborators.speech.enqueue(spoken);
            }
        }
    }

    async fn lookup(&self, lat: f64, lon: f64) -> Option<Address> {
        match self.collaborators.geocoder.address(lat, lon).await {
            Ok(address) => Some(address),
            Err(e) => {
                warn!(error = %e, lat, lon, "Reverse geocoding failed");
                None
            }
        }
    }

    async fn send_help(&self, lat: f64, lon: f64) -> bool {
        let phone = match self
            .collaborators
            .store
            .phone_number_or(&self.collaborators.default_phone_number)
        {
            Ok(phone) => phone,
            Err(e) => {
                warn!(error = %e, "Failed to read emergency number, using default");
                self.collaborators.default_phone_number.clone()
            }
        };

        match self
            .collaborators
            .sms
            .send(&phone, &help_message(lat, lon))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, %phone, "Failed to send emergency SMS");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_sentence() {
        let address = Address {
            road: Some("Calle Madero".to_string()),
            neighbourhood: Some("Centro".to_string()),
            ..Default::default()
        };
        assert_eq!(
            location_sentence(Some(&address)),
            "Estás en Calle Madero, colonia Centro"
        );
    }

    #[test]
    fn test_location_sentence_unknown_parts() {
        assert_eq!(
            location_sentence(None),
            "Estás en Calle desconocida, colonia Colonia desconocida"
        );
        let road_only = Address {
            road: Some("Calle Madero".to_string()),
            ..Default::default()
        };
        assert_eq!(
            location_sentence(Some(&road_only)),
            "Estás en Calle Madero, colonia Colonia desconocida"
        );
    }

    #[test]
    fn test_help_message() {
        assert_eq!(
            help_message(24.14, -110.27),
            "Hola, necesito ayuda. Estoy en https://maps.google.com/?q=24.14,-110.27"
        );
    }

    #[test]
    fn test_detection_sentence() {
        assert_eq!(detection_sentence("silla"), "Se ha detectado: silla.");
    }
}
