/// End-to-end tests for fetch → ensure schema → write.
///
/// Providers talk to a one-shot HTTP stub on 127.0.0.1 serving canned
/// responses; rows land in an in-memory store.
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};
use weather_ingest_core::{
    Config, ErrorKind, Ingestion, LocationQuery, ObservationStore, PersistedRow, ProviderConfig,
    ProviderId, Stage, Units, WeatherObservation, WeatherProvider, model::ObservationRow,
    provider::provider_from_config,
};

const JOHANNESBURG: &str = r#"{
    "name": "Johannesburg",
    "main": { "temp": 68.0 },
    "weather": [{ "description": "clear sky" }],
    "wind": { "speed": 3.1 },
    "dt": 1700000000,
    "timezone": 7200
}"#;

/// Serves one canned response after `delay` and hands back the raw request.
async fn stub(status: u16, body: &'static str, delay: Duration) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        tokio::time::sleep(delay).await;

        let response = format!(
            "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;

        String::from_utf8_lossy(&request).into_owned()
    });

    (format!("http://{addr}"), handle)
}

fn config_for(id: ProviderId, base_url: String) -> Config {
    let mut config = Config { request_timeout_secs: 1, ..Config::default() };
    config.providers.insert(
        id.as_str().to_string(),
        ProviderConfig { api_key: "test-key".into(), base_url: Some(base_url) },
    );
    config.set_default_provider(id);
    config
}

#[derive(Default)]
struct MemoryStore {
    schema_calls: usize,
    rows: Vec<PersistedRow>,
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn ensure_schema(&mut self) -> weather_ingest_core::Result<()> {
        self.schema_calls += 1;
        Ok(())
    }

    async fn write(
        &mut self,
        observation: &WeatherObservation,
    ) -> weather_ingest_core::Result<PersistedRow> {
        let id = self.rows.len() as i32 + 1;
        let row = ObservationRow::from(observation).persisted(id, Utc::now());
        self.rows.push(row.clone());
        Ok(row)
    }
}

#[tokio::test]
async fn johannesburg_end_to_end() {
    let (base_url, server) = stub(200, JOHANNESBURG, Duration::ZERO).await;
    let config = config_for(ProviderId::OpenWeather13, base_url);
    let provider = provider_from_config(ProviderId::OpenWeather13, &config).unwrap();
    let mut store = MemoryStore::default();
    let mut ingestion = Ingestion::new();

    let query = LocationQuery::city("Johannesburg").unwrap();
    let row = ingestion.run(provider.as_ref(), &mut store, &query).await.unwrap();

    assert_eq!(ingestion.stage(), Stage::Written);
    assert_eq!(row.city, "Johannesburg");
    assert!((row.temperature - 20.0).abs() < 1e-9);
    assert_eq!(row.weather_description, "clear sky");
    assert_eq!(row.wind_speed, "3.1");
    assert_eq!(row.utc_offset, "2.0");
    assert_eq!(row.time, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    assert_eq!(store.rows, vec![row]);

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /city?city=Johannesburg&lang=EN&units=metric "), "{request}");
    assert!(request.contains("x-rapidapi-key: test-key"), "{request}");
    assert!(request.contains("x-rapidapi-host: open-weather13.p.rapidapi.com"), "{request}");
}

#[tokio::test]
async fn coordinates_use_the_latlon_endpoint() {
    let (base_url, server) = stub(200, JOHANNESBURG, Duration::ZERO).await;
    let config = config_for(ProviderId::OpenWeather13, base_url);
    let provider = provider_from_config(ProviderId::OpenWeather13, &config).unwrap();

    let query = LocationQuery::coordinates(-26.2, 28.05)
        .unwrap()
        .with_units(Units::Imperial)
        .with_lang("DE");
    let obs = provider.fetch(&query).await.unwrap();
    assert_eq!(obs.location_name(), "Johannesburg");

    let request = server.await.unwrap();
    assert!(
        request.starts_with("GET /latlon?latitude=-26.2&longitude=28.05&lang=DE&units=imperial "),
        "{request}"
    );
}

#[tokio::test]
async fn empty_body_is_provider_error_and_nothing_is_written() {
    let (base_url, _server) = stub(200, "", Duration::ZERO).await;
    let config = config_for(ProviderId::OpenWeather13, base_url);
    let provider = provider_from_config(ProviderId::OpenWeather13, &config).unwrap();
    let mut store = MemoryStore::default();
    let mut ingestion = Ingestion::new();

    let query = LocationQuery::city("Johannesburg").unwrap();
    let err = ingestion.run(provider.as_ref(), &mut store, &query).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(ingestion.stage(), Stage::Failed);
    assert_eq!(store.schema_calls, 0);
    assert!(store.rows.is_empty());
}

#[tokio::test]
async fn error_status_is_transport_error() {
    let (base_url, _server) =
        stub(503, r#"{"message":"Service Unavailable"}"#, Duration::ZERO).await;
    let config = config_for(ProviderId::OpenWeather13, base_url);
    let provider = provider_from_config(ProviderId::OpenWeather13, &config).unwrap();

    let err = provider.fetch(&LocationQuery::city("Johannesburg").unwrap()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("status 503"), "{err}");
    assert!(err.to_string().contains("Service Unavailable"), "{err}");
}

#[tokio::test]
async fn slow_provider_times_out_as_transport_error() {
    let (base_url, _server) = stub(200, JOHANNESBURG, Duration::from_secs(5)).await;
    let config = config_for(ProviderId::OpenWeather13, base_url);
    let provider = provider_from_config(ProviderId::OpenWeather13, &config).unwrap();

    let err = provider.fetch(&LocationQuery::city("Johannesburg").unwrap()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test]
async fn weatherstack_in_band_error_is_provider_error() {
    let body = r#"{"success":false,"error":{"code":615,"type":"request_failed","info":"Your API request failed."}}"#;
    let (base_url, server) = stub(200, body, Duration::ZERO).await;
    let config = config_for(ProviderId::Weatherstack, base_url);
    let provider = provider_from_config(ProviderId::Weatherstack, &config).unwrap();

    let err = provider.fetch(&LocationQuery::city("Nowhere").unwrap()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("request_failed (615)"), "{err}");

    let request = server.await.unwrap();
    assert!(
        request.starts_with("GET /current?access_key=test-key&query=Nowhere&units=m "),
        "{request}"
    );
}

#[tokio::test]
async fn weatherstack_celsius_is_stored_unchanged() {
    let body = r#"{
        "location": { "name": "Pretoria", "localtime_epoch": 1700007200, "utc_offset": "2.0" },
        "current": {
            "observation_time": "10:13 PM",
            "temperature": 21,
            "weather_descriptions": ["Sunny"],
            "wind_speed": 9
        }
    }"#;
    let (base_url, _server) = stub(200, body, Duration::ZERO).await;
    let config = config_for(ProviderId::Weatherstack, base_url);
    let provider = provider_from_config(ProviderId::Weatherstack, &config).unwrap();
    let mut store = MemoryStore::default();

    let query = LocationQuery::city("Pretoria").unwrap();
    let row = Ingestion::new().run(provider.as_ref(), &mut store, &query).await.unwrap();

    assert_eq!(row.temperature, 21.0);
    assert_eq!(row.weather_description, "Sunny");
    assert_eq!(row.wind_speed, "9.0");
    assert_eq!(row.utc_offset, "2.0");
    assert_eq!(row.time, Utc.timestamp_opt(1_699_999_980, 0).unwrap());
}

#[tokio::test]
async fn weatherstack_coordinates_and_language_are_sent() {
    let body = r#"{
        "location": { "name": "Johannesburg", "localtime_epoch": 1700007200, "utc_offset": "2.0" },
        "current": {
            "observation_time": "10:13 PM",
            "temperature": 19,
            "weather_descriptions": ["Klar"],
            "wind_speed": 7
        }
    }"#;
    let (base_url, server) = stub(200, body, Duration::ZERO).await;
    let config = config_for(ProviderId::Weatherstack, base_url);
    let provider = provider_from_config(ProviderId::Weatherstack, &config).unwrap();

    let query = LocationQuery::coordinates(-26.2, 28.05).unwrap().with_lang("de");
    let obs = provider.fetch(&query).await.unwrap();
    assert_eq!(obs.description(), "Klar");

    let request = server.await.unwrap();
    assert!(
        request.starts_with("GET /current?access_key=test-key&query=-26.2%2C28.05&units=m&language=de "),
        "{request}"
    );
}

#[test]
fn ambiguous_query_fails_before_any_request() {
    let both = LocationQuery::new(Some("Johannesburg".into()), Some((-26.2, 28.05)));
    assert_eq!(both.unwrap_err().kind(), ErrorKind::InvalidQuery);

    let neither = LocationQuery::new(None, None);
    assert_eq!(neither.unwrap_err().kind(), ErrorKind::InvalidQuery);
}
