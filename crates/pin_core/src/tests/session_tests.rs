use super::*;

use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use url::Url;

use storage::MemoryKv;

#[derive(Debug, Clone)]
struct RenderedMarker {
    lat: f64,
    lng: f64,
    popup_html: String,
}

struct TestMapView {
    clicks_tx: broadcast::Sender<MapClick>,
    markers: Mutex<Vec<RenderedMarker>>,
    fly_tos: Mutex<Vec<(f64, f64, f64)>>,
    next_handle: AtomicI64,
    disposed: AtomicBool,
}

impl TestMapView {
    fn new() -> Arc<Self> {
        let (clicks_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            clicks_tx,
            markers: Mutex::new(Vec::new()),
            fly_tos: Mutex::new(Vec::new()),
            next_handle: AtomicI64::new(1),
            disposed: AtomicBool::new(false),
        })
    }

    fn click(&self, lat: f64, lng: f64) {
        let _ = self.clicks_tx.send(MapClick { lat, lng });
    }

    fn markers(&self) -> Vec<RenderedMarker> {
        self.markers.lock().expect("markers lock").clone()
    }

    fn fly_tos(&self) -> Vec<(f64, f64, f64)> {
        self.fly_tos.lock().expect("fly_tos lock").clone()
    }

    fn disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl MapView for TestMapView {
    fn clicks(&self) -> broadcast::Receiver<MapClick> {
        self.clicks_tx.subscribe()
    }

    fn create_marker(&self, lat: f64, lng: f64, popup_html: &str) -> shared::domain::MarkerHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.markers.lock().expect("markers lock").push(RenderedMarker {
            lat,
            lng,
            popup_html: popup_html.to_string(),
        });
        shared::domain::MarkerHandle(handle)
    }

    fn fly_to(&self, lat: f64, lng: f64, zoom: f64) {
        self.fly_tos.lock().expect("fly_tos lock").push((lat, lng, zoom));
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

struct TestProvider {
    map: Arc<TestMapView>,
    builds: AtomicUsize,
}

impl TestProvider {
    fn new(map: Arc<TestMapView>) -> Arc<Self> {
        Arc::new(Self {
            map,
            builds: AtomicUsize::new(0),
        })
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MapViewProvider for TestProvider {
    async fn build(&self) -> Result<Arc<dyn MapView>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.map.clone())
    }
}

struct CountingKv {
    inner: MemoryKv,
    reads: AtomicUsize,
}

impl CountingKv {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryKv::new(),
            reads: AtomicUsize::new(0),
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value).await
    }
}

struct StaticGeocoder {
    address: String,
    delay: Duration,
}

impl StaticGeocoder {
    fn named(address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            delay: Duration::ZERO,
        })
    }

    fn slow(address: impl Into<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            delay,
        })
    }
}

#[async_trait]
impl ReverseGeocoder for StaticGeocoder {
    async fn resolve_address(&self, _lat: f64, _lng: f64) -> String {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.address.clone()
    }
}

struct Fixture {
    gate: HydrationGate,
    kv: Arc<CountingKv>,
    map: Arc<TestMapView>,
    provider: Arc<TestProvider>,
}

impl Fixture {
    fn new() -> Self {
        let map = TestMapView::new();
        Self {
            gate: HydrationGate::new(),
            kv: CountingKv::new(),
            map: map.clone(),
            provider: TestProvider::new(map),
        }
    }

    async fn start(&self, geocoder: Arc<dyn ReverseGeocoder>) -> MapSession {
        self.gate.open();
        MapSession::start(
            self.gate.watch(),
            self.kv.clone(),
            geocoder,
            self.provider.clone(),
            Settings::default(),
        )
        .await
        .expect("session start")
    }
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn nothing_stateful_runs_before_the_gate_opens() {
    let fixture = Fixture::new();
    let starting = tokio::spawn(MapSession::start(
        fixture.gate.watch(),
        fixture.kv.clone(),
        StaticGeocoder::named("x"),
        fixture.provider.clone(),
        Settings::default(),
    ));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(fixture.kv.reads(), 0, "no persistence read before ready");
    assert_eq!(fixture.provider.builds(), 0, "no map view before ready");
    assert!(fixture.map.markers().is_empty());

    fixture.gate.open();
    let session = starting.await.expect("join").expect("start");

    assert_eq!(fixture.kv.reads(), 1);
    assert_eq!(fixture.provider.builds(), 1);
    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn start_errors_when_the_gate_is_torn_down() {
    let fixture = Fixture::new();
    let watch = fixture.gate.watch();
    let Fixture { gate, kv, provider, .. } = fixture;
    drop(gate);

    let result = MapSession::start(
        watch,
        kv,
        StaticGeocoder::named("x"),
        provider,
        Settings::default(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn click_then_submit_creates_an_addressed_pin_and_marker() {
    let fixture = Fixture::new();
    let session = fixture.start(StaticGeocoder::named("Main St Cafe")).await;

    fixture.map.click(12.34, 56.78);
    sleep(Duration::from_millis(50)).await;
    session.set_remarks("Coffee shop").await.expect("remarks");
    session.submit().await.expect("submit");

    wait_until(|| session.pins().len() == 1).await;
    let pins = session.pins();
    let pin = &pins[0];
    assert_eq!((pin.lat, pin.lng), (12.34, 56.78));
    assert_eq!(pin.remarks, "Coffee shop");
    assert_eq!(pin.address, "Main St Cafe");

    wait_until(|| fixture.map.markers().len() == 1).await;
    let markers = fixture.map.markers();
    let marker = &markers[0];
    assert_eq!((marker.lat, marker.lng), (12.34, 56.78));
    assert!(marker.popup_html.contains("Coffee shop"));
    assert!(marker.popup_html.contains("Main St Cafe"));

    // Snapshot reached the persistence surface.
    let reloaded = PinStore::new(fixture.kv.clone()).load().await;
    assert_eq!(reloaded, session.pins());

    // Draft is cleared: another submit commits nothing.
    session.submit().await.expect("submit");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(session.pins().len(), 1);

    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn unreachable_geocoder_degrades_to_the_failure_sentinel() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let geocoder = NominatimGeocoder::new(
        Url::parse(&format!("http://{addr}/reverse")).expect("url"),
        Duration::from_secs(1),
    )
    .expect("geocoder");

    let fixture = Fixture::new();
    let session = fixture.start(Arc::new(geocoder)).await;

    fixture.map.click(3.0, 4.0);
    sleep(Duration::from_millis(50)).await;
    session.submit().await.expect("submit");

    wait_until(|| session.pins().len() == 1).await;
    assert_eq!(session.pins()[0].address, ADDRESS_FETCH_FAILED);

    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn only_the_latest_click_is_submittable() {
    let fixture = Fixture::new();
    let session = fixture.start(StaticGeocoder::named("anywhere")).await;

    fixture.map.click(1.0, 1.0);
    fixture.map.click(2.0, 2.0);
    sleep(Duration::from_millis(50)).await;
    session.submit().await.expect("submit");

    wait_until(|| session.pins().len() == 1).await;
    assert_eq!(
        (session.pins()[0].lat, session.pins()[0].lng),
        (2.0, 2.0),
        "first draft was discarded"
    );

    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn click_during_inflight_commit_is_not_lost() {
    let fixture = Fixture::new();
    let session = fixture
        .start(StaticGeocoder::slow("resolved", Duration::from_millis(150)))
        .await;

    fixture.map.click(1.0, 1.0);
    sleep(Duration::from_millis(50)).await;
    session.submit().await.expect("submit");
    sleep(Duration::from_millis(30)).await;

    // Geocode for the first pin is still in flight.
    fixture.map.click(2.0, 2.0);

    wait_until(|| session.pins().len() == 1).await;
    sleep(Duration::from_millis(50)).await;
    session.submit().await.expect("submit");

    wait_until(|| session.pins().len() == 2).await;
    let pins = session.pins();
    assert_eq!((pins[0].lat, pins[0].lng), (1.0, 1.0));
    assert_eq!((pins[1].lat, pins[1].lng), (2.0, 2.0));
    wait_until(|| fixture.map.markers().len() == 2).await;

    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn persisted_pins_render_on_startup() {
    let fixture = Fixture::new();
    let seeded = vec![
        Pin {
            id: PinId(1),
            lat: 10.0,
            lng: 20.0,
            remarks: "old".to_string(),
            address: "somewhere".to_string(),
        },
        Pin {
            id: PinId(2),
            lat: -5.0,
            lng: 5.0,
            remarks: "older".to_string(),
            address: "elsewhere".to_string(),
        },
    ];
    PinStore::new(fixture.kv.clone())
        .save(&seeded)
        .await
        .expect("seed snapshot");

    let session = fixture.start(StaticGeocoder::named("x")).await;

    assert_eq!(session.pins(), seeded);
    wait_until(|| fixture.map.markers().len() == 2).await;

    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn focus_pin_flies_the_map_at_configured_zoom() {
    let fixture = Fixture::new();
    let session = fixture.start(StaticGeocoder::named("Main St Cafe")).await;

    fixture.map.click(12.34, 56.78);
    sleep(Duration::from_millis(50)).await;
    session.submit().await.expect("submit");
    wait_until(|| session.pins().len() == 1).await;

    let id = session.pins()[0].id;
    session.focus_pin(id).await.expect("focus");

    wait_until(|| !fixture.map.fly_tos().is_empty()).await;
    assert_eq!(fixture.map.fly_tos()[0], (12.34, 56.78, 10.0));

    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn shutdown_disposes_the_map_view() {
    let fixture = Fixture::new();
    let session = fixture.start(StaticGeocoder::named("x")).await;

    session.shutdown().await.expect("shutdown");
    assert!(fixture.map.disposed());
}
