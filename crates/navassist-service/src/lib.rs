//! Daemon that connects to a navassist peripheral and acts on what it reports.
//!
//! The BLE session itself lives in `navassist-core`. This crate wires its
//! decoded action stream to the collaborators that make the actions useful:
//!
//! | Action | What happens |
//! |--------|--------------|
//! | `TalkLocation` | reverse geocode, speak "Estás en {calle}, colonia {colonia}" |
//! | `TalkObject` | translate the description, speak "Se ha detectado: {objeto}." |
//! | `SendLocationSms` | text a maps link to the emergency contact, confirm aloud |
//! | `NoAction` | logged |
//!
//! # Configuration
//!
//! Read from `~/.config/navassist/config.toml`; every key is optional:
//!
//! ```toml
//! [ble]
//! scan_timeout = 15
//! connection_timeout = 15
//!
//! [ble.reconnect]
//! max_attempts = 5
//! initial_delay_ms = 1000
//!
//! [storage]
//! path = "~/.local/share/navassist/data.db"
//!
//! [geocoding]
//! base_url = "https://nominatim.openstreetmap.org"
//! language = "es"
//!
//! [translation]
//! url = "https://libretranslate.com/translate"
//! source = "en"
//! target = "es"
//!
//! [speech]
//! program = "espeak-ng"
//! args = ["-v", "es"]
//!
//! [sms]
//! webhook_url = "https://sms-gateway.example.com/send"
//! default_phone_number = "6121692423"
//! ```

pub mod config;
pub mod error;
pub mod geocode;
pub mod handler;
pub mod identity;
pub mod sms;
pub mod speech;
pub mod translate;

pub use config::{
    BleConfig, Config, ConfigError, GeocodingConfig, ReconnectConfig, SmsConfig, SpeechConfig,
    StorageConfig, TranslationConfig, ValidationError, default_config_path,
};
pub use error::{CollaboratorError, Result};
pub use geocode::{Address, DisabledGeocoder, Geocoder, NominatimGeocoder};
pub use handler::{ActionHandler, Collaborators};
pub use identity::{SharedStore, SqliteIdentityStore};
pub use sms::{LogSmsSender, SmsSender, WebhookSmsSender, sender_from_config};
pub use speech::{CommandSpeaker, LogSpeaker, Speaker, SpeechQueue, speaker_from_config};
pub use translate::{HttpTranslator, PassthroughTranslator, Translator};

use std::sync::Arc;

/// Geocoder selected by `[geocoding]`.
pub fn geocoder_from_config(config: &GeocodingConfig) -> Result<Arc<dyn Geocoder>> {
    let geocoder: Arc<dyn Geocoder> = if config.enabled {
        Arc::new(NominatimGeocoder::new(config)?)
    } else {
        Arc::new(DisabledGeocoder)
    };
    Ok(geocoder)
}

/// Translator selected by `[translation]`.
pub fn translator_from_config(config: &TranslationConfig) -> Result<Arc<dyn Translator>> {
    let translator: Arc<dyn Translator> = if config.enabled {
        Arc::new(HttpTranslator::new(config)?)
    } else {
        Arc::new(PassthroughTranslator)
    };
    Ok(translator)
}
