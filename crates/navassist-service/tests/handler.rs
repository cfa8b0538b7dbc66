//! Action handling against fake collaborators, and end to end from a
//! mock peripheral notification to speech.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use navassist_core::{BleService, DomainEvent, IdentityStore, MockBackend, ServiceConfig};
use navassist_service::handler::{SMS_FAILED, SMS_SENT};
use navassist_service::{
    ActionHandler, Address, CollaboratorError, Collaborators, Geocoder, Result, SharedStore,
    SmsSender, Speaker, SpeechQueue, SqliteIdentityStore, Translator,
};
use navassist_store::Store;

const ADDR: &str = "24:0A:C4:12:34:56";

#[derive(Default)]
struct FakeGeocoder {
    address: Option<Address>,
    calls: Mutex<Vec<(f64, f64)>>,
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn address(&self, lat: f64, lon: f64) -> Result<Address> {
        self.calls.lock().unwrap().push((lat, lon));
        self.address
            .clone()
            .ok_or_else(|| CollaboratorError::InvalidResponse("offline".to_string()))
    }
}

struct FakeTranslator {
    fail: bool,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        if self.fail {
            return Err(CollaboratorError::InvalidResponse("offline".to_string()));
        }
        Ok(match text {
            "chair" => "silla".to_string(),
            other => format!("[{other}]"),
        })
    }
}

#[derive(Default)]
struct FakeSms {
    fail: bool,
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SmsSender for FakeSms {
    async fn send(&self, phone: &str, message: &str) -> Result<()> {
        if self.fail {
            return Err(CollaboratorError::InvalidResponse("gateway down".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl Speaker for Recorder {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct Fixture {
    geocoder: Arc<FakeGeocoder>,
    sms: Arc<FakeSms>,
    speaker: Arc<Recorder>,
    store: SharedStore,
    handler: ActionHandler,
    worker: tokio::task::JoinHandle<()>,
}

impl Fixture {
    fn new(geocoder: FakeGeocoder, translator: FakeTranslator, sms: FakeSms) -> Self {
        let geocoder = Arc::new(geocoder);
        let sms = Arc::new(sms);
        let speaker = Arc::new(Recorder::default());
        let store = SharedStore::new(Store::open_in_memory().unwrap());
        let (speech, worker) = SpeechQueue::spawn(speaker.clone());
        let handler = ActionHandler::new(Collaborators {
            geocoder: geocoder.clone(),
            translator: Arc::new(translator),
            sms: sms.clone(),
            speech,
            store: store.clone(),
            default_phone_number: "6121692423".to_string(),
        });
        Self {
            geocoder,
            sms,
            speaker,
            store,
            handler,
            worker,
        }
    }

    /// Drop the handler and wait for every queued utterance.
    async fn spoken(self) -> Vec<String> {
        drop(self.handler);
        self.worker.await.unwrap();
        self.speaker.spoken.lock().unwrap().clone()
    }
}

fn madero() -> Address {
    Address {
        road: Some("Calle Madero".to_string()),
        neighbourhood: Some("Centro".to_string()),
        ..Default::default()
    }
}

fn online() -> FakeTranslator {
    FakeTranslator { fail: false }
}

#[tokio::test]
async fn talk_location_speaks_street_and_district() {
    let f = Fixture::new(
        FakeGeocoder {
            address: Some(madero()),
            ..Default::default()
        },
        online(),
        FakeSms::default(),
    );
    f.handler
        .handle(DomainEvent::TalkLocation {
            lat: 24.14,
            lon: -110.27,
        })
        .await;

    assert_eq!(*f.geocoder.calls.lock().unwrap(), vec![(24.14, -110.27)]);
    assert_eq!(f.spoken().await, vec!["Estás en Calle Madero, colonia Centro"]);
}

#[tokio::test]
async fn talk_location_without_geocoding_uses_placeholders() {
    let f = Fixture::new(FakeGeocoder::default(), online(), FakeSms::default());
    f.handler
        .handle(DomainEvent::TalkLocation { lat: 0.0, lon: 0.0 })
        .await;
    assert_eq!(
        f.spoken().await,
        vec!["Estás en Calle desconocida, colonia Colonia desconocida"]
    );
}

#[tokio::test]
async fn talk_object_translates_then_falls_back() {
    let f = Fixture::new(FakeGeocoder::default(), online(), FakeSms::default());
    f.handler
        .handle(DomainEvent::TalkObject {
            description: "chair".to_string(),
        })
        .await;
    assert_eq!(f.spoken().await, vec!["Se ha detectado: silla."]);

    let f = Fixture::new(
        FakeGeocoder::default(),
        FakeTranslator { fail: true },
        FakeSms::default(),
    );
    f.handler
        .handle(DomainEvent::TalkObject {
            description: "chair".to_string(),
        })
        .await;
    assert_eq!(f.spoken().await, vec!["Se ha detectado: chair."]);
}

#[tokio::test]
async fn sms_goes_to_default_number_then_stored_number() {
    let f = Fixture::new(
        FakeGeocoder {
            address: Some(madero()),
            ..Default::default()
        },
        online(),
        FakeSms::default(),
    );
    let event = DomainEvent::SendLocationSms {
        lat: 24.14,
        lon: -110.27,
    };

    f.handler.handle(event.clone()).await;
    f.store.lock().unwrap().set_phone_number("5550001111").unwrap();
    f.handler.handle(event).await;

    let message = "Hola, necesito ayuda. Estoy en https://maps.google.com/?q=24.14,-110.27";
    assert_eq!(
        *f.sms.sent.lock().unwrap(),
        vec![
            ("6121692423".to_string(), message.to_string()),
            ("5550001111".to_string(), message.to_string()),
        ]
    );
    assert_eq!(f.spoken().await, vec![SMS_SENT, SMS_SENT]);
}

#[tokio::test]
async fn sms_is_sent_even_when_geocoding_fails() {
    let f = Fixture::new(FakeGeocoder::default(), online(), FakeSms::default());
    f.handler
        .handle(DomainEvent::SendLocationSms { lat: 1.5, lon: 2.5 })
        .await;
    assert_eq!(f.sms.sent.lock().unwrap().len(), 1);
    assert_eq!(f.spoken().await, vec![SMS_SENT]);
}

#[tokio::test]
async fn failed_sms_is_announced() {
    let f = Fixture::new(
        FakeGeocoder::default(),
        online(),
        FakeSms {
            fail: true,
            ..Default::default()
        },
    );
    f.handler
        .handle(DomainEvent::SendLocationSms { lat: 1.5, lon: 2.5 })
        .await;
    assert_eq!(f.spoken().await, vec![SMS_FAILED]);
}

#[tokio::test]
async fn no_action_is_silent() {
    let f = Fixture::new(FakeGeocoder::default(), online(), FakeSms::default());
    f.handler.handle(DomainEvent::NoAction).await;
    assert!(f.spoken().await.is_empty());
}

#[tokio::test]
async fn spawned_handler_processes_stream_in_order() {
    let speaker = Arc::new(Recorder::default());
    let (speech, worker) = SpeechQueue::spawn(speaker.clone());
    let handler = ActionHandler::new(Collaborators {
        geocoder: Arc::new(FakeGeocoder::default()),
        translator: Arc::new(online()),
        sms: Arc::new(FakeSms::default()),
        speech,
        store: SharedStore::new(Store::open_in_memory().unwrap()),
        default_phone_number: "6121692423".to_string(),
    });

    let (tx, rx) = broadcast::channel(8);
    let task = handler.spawn(rx, CancellationToken::new());
    for description in ["chair", "dog"] {
        tx.send(DomainEvent::TalkObject {
            description: description.to_string(),
        })
        .unwrap();
    }
    // Closing the stream ends the handler.
    drop(tx);
    task.await.unwrap();
    worker.await.unwrap();

    assert_eq!(
        *speaker.spoken.lock().unwrap(),
        vec!["Se ha detectado: silla.", "Se ha detectado: [dog]."]
    );
}

#[tokio::test(start_paused = true)]
async fn peripheral_notification_is_spoken() {
    let store = SharedStore::new(Store::open_in_memory().unwrap());
    let identities: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(store.clone()));
    let backend = Arc::new(MockBackend::new());
    let (service, handle) =
        BleService::new(backend.clone(), identities, ServiceConfig::default()).unwrap();

    let speaker = Arc::new(Recorder::default());
    let (speech, worker) = SpeechQueue::spawn(speaker.clone());
    let cancel = CancellationToken::new();
    let handler_task = ActionHandler::new(Collaborators {
        geocoder: Arc::new(FakeGeocoder::default()),
        translator: Arc::new(online()),
        sms: Arc::new(FakeSms::default()),
        speech,
        store: store.clone(),
        default_phone_number: "6121692423".to_string(),
    })
    .spawn(handle.bus().actions(), cancel.clone());
    let service_task = tokio::spawn(service.run());

    handle.connect(ADDR).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // The connected peripheral is remembered in the database.
    let identity = store.lock().unwrap().peripheral_identity().unwrap();
    assert_eq!(identity.address.as_deref(), Some(ADDR));

    assert!(backend.notify(&b"2,0,0,chair"[..]));
    tokio::time::sleep(Duration::from_millis(1)).await;

    handle.shutdown();
    service_task.await.unwrap().unwrap();
    cancel.cancel();
    handler_task.await.unwrap();
    worker.await.unwrap();

    assert_eq!(
        *speaker.spoken.lock().unwrap(),
        vec!["Se ha detectado: silla."]
    );
}
