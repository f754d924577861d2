//! HTTP shim for Terma MOA Blue heating elements.
//!
//! Exposes discovery, pairing, status, inspection and verified mode
//! changes as plain GET endpoints returning JSON.
//!
//! Run with: cargo run --bin moa_server -- --port 8080

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use terma_moa_ble::control::bluetoothctl::DEFAULT_PROGRAM;
use terma_moa_ble::sensor::W1_DEVICES_DIR;
use terma_moa_ble::{
    BluetoothCtl, BtleplugTransport, Ds18b20Sensor, Error, HeaterController, ReferenceSensor,
    Result, Timings, DEFAULT_DISCOVER_TIMEOUT, DEFAULT_PIN,
};

const TITLE: &str = "TERMA MOA BLUE WEB INTERFACE";

const BANNER: &str = "\
TERMA MOA BLUE WEB INTERFACE
A web API for one or more Terma MOA Bluetooth electric heating elements.

WARNING:

Setting the heating element programmatically can store wrong values,
particularly when switching between modes 5 and 6, where target
temperatures end up doubled. This service therefore always sets and
confirms mode 0 (off) first, then sets and confirms the target mode. If
the element does not report the requested values after several retries
it is set back to mode 0 (off). Targets are clamped to the manufacturer
ranges.

DO NOT REMOVE ANY OF THIS PROTECTION AND VALIDATION LOGIC. ALL TOWEL RAILS
REQUIRE EXPANSION SPACE FOR THEIR CONTENTS AT THE MAXIMUM POSSIBLE
TEMPERATURE.

THE SELF-PROTECTION MECHANISMS OF THE TERMA ELEMENTS ARE NOT PUBLIC AND IT
IS POSSIBLE TO CONFIGURE THESE DEVICES TO EXCEED THEIR DESIGN MAXIMUM
WATER TEMPERATURE OF 60°C.

THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND. THE END
USER IS RESPONSIBLE FOR TESTING THE COMPLETE SYSTEM AND FOR ALL LIABILITY
ARISING FROM ITS USE.";

const HELP: &str = "\
/discover?timeout=XX.X
  Lists every visible Bluetooth device. Timeout defaults to 15 seconds.

/pair?address=XX:XX:XX:XX:XX:XX&pin=XXXXXX
  Removes, rediscovers, connects, trusts and pairs the element through
  bluetoothctl. The element must be in pairing mode. PIN defaults to 123456.
  Slow and flaky; the whole handshake is retried three times.

/status?address=XX:XX:XX:XX:XX:XX
  Returns the element status:
  {
    \"device\": \"CC:22:37:10:43:4B\",
    \"name\": \"MOA Blue TERMA\",
    \"mode\": 5,
    \"room_current_temp\": 20.9,
    \"room_target_temp\": 20.0,
    \"heater_current_temp\": 42.8,
    \"heater_target_temp\": 20.0,
    \"room_temp_source\": \"HeatingElement\"
  }

/set?address=XX:XX:XX:XX:XX:XX&mode=Y&temp=ZZ.Z
  Switches the element off, then applies the requested mode and returns the
  verified status. If the element never reports the requested target it is
  switched off and the response carries an \"error\" field.
    0 - Off
    5 - Room temperature regulation, 15.0-29.9°C
    6 - Radiator surface temperature regulation, 29.9-59.8°C
  Any other mode is rejected.

/query-device?address=XX:XX:XX:XX:XX:XX
  Troubleshooting: every service and characteristic with its raw value.
";

#[derive(Parser, Debug)]
#[command(name = "moa_server")]
#[command(about = "HTTP shim for Terma MOA Blue heating elements")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "MOA_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[arg(long, env = "MOA_PORT", default_value_t = 8080)]
    port: u16,
    /// 1-Wire devices directory for the DS18B20 reference sensor
    #[arg(long, env = "MOA_SENSOR_DIR", default_value = W1_DEVICES_DIR)]
    sensor_dir: PathBuf,
    /// Always use the element's own room temperature
    #[arg(long, env = "MOA_NO_SENSOR")]
    no_sensor: bool,
    /// bluetoothctl executable
    #[arg(long, env = "MOA_BLUETOOTHCTL", default_value = DEFAULT_PROGRAM)]
    bluetoothctl: String,
    /// Drive bluetoothctl over plain pipes instead of a pseudo-terminal
    #[arg(long, env = "MOA_BLUETOOTHCTL_NO_PTY")]
    no_pty: bool,
}

#[derive(Clone)]
struct AppState {
    controller: Arc<HeaterController<BtleplugTransport>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct AddressQuery {
    address: String,
}

#[derive(Debug, Deserialize)]
struct DiscoverQuery {
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PairQuery {
    address: String,
    #[serde(default = "default_pin")]
    pin: String,
}

#[derive(Debug, Deserialize)]
struct SetQuery {
    address: String,
    #[serde(default)]
    mode: i64,
    #[serde(default = "default_temp")]
    temp: f64,
}

fn default_pin() -> String {
    DEFAULT_PIN.to_string()
}

fn default_temp() -> f64 {
    20.0
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,terma_moa_ble=info,moa_server=info")),
        )
        .init();

    let cli = Cli::parse();

    let transport = Arc::new(BtleplugTransport::new().await?);
    let sensor: Option<Arc<dyn ReferenceSensor>> = if cli.no_sensor {
        None
    } else {
        Some(Arc::new(Ds18b20Sensor::new(cli.sensor_dir.clone())))
    };
    let control = if cli.no_pty {
        BluetoothCtl::new(cli.bluetoothctl.clone())
    } else {
        BluetoothCtl::with_pty(cli.bluetoothctl.clone())
    };
    let controller = Arc::new(HeaterController::new(
        transport,
        Arc::new(control),
        sensor,
        Timings::default(),
    ));

    let app = router(AppState {
        controller: controller.clone(),
    });

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr).await?;
    println!("{}", BANNER);
    info!("{} listening on {}", TITLE, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    controller.shutdown().await;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/discover", get(handle_discover))
        .route("/pair", get(handle_pair))
        .route("/status", get(handle_status))
        .route("/query-device", get(handle_query_device))
        .route("/set", get(handle_set))
        .with_state(state)
}

async fn handle_root() -> String {
    format!("{}\n\n{}", BANNER, HELP)
}

async fn handle_discover(
    State(state): State<AppState>,
    Query(params): Query<DiscoverQuery>,
) -> Response {
    let timeout = match params.timeout {
        None => DEFAULT_DISCOVER_TIMEOUT,
        Some(secs) => match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => timeout,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid timeout"),
        },
    };
    info!("Received /discover with timeout={:?}", timeout);

    match state.controller.discover(timeout).await {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => failure("/discover", &e),
    }
}

async fn handle_pair(State(state): State<AppState>, Query(params): Query<PairQuery>) -> Response {
    info!("Received /pair for device {}", params.address);

    match state.controller.pair(&params.address, &params.pin).await {
        Ok(()) => Json(serde_json::json!({ "pairing": "success" })).into_response(),
        Err(e) => failure("/pair", &e),
    }
}

async fn handle_status(
    State(state): State<AppState>,
    Query(params): Query<AddressQuery>,
) -> Response {
    info!("Received /status for device {}", params.address);

    match state.controller.status(&params.address).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => failure("/status", &e),
    }
}

async fn handle_query_device(
    State(state): State<AppState>,
    Query(params): Query<AddressQuery>,
) -> Response {
    info!("Received /query-device for device {}", params.address);

    match state.controller.inspect(&params.address).await {
        Ok(dump) => Json(dump).into_response(),
        Err(e) => failure("/query-device", &e),
    }
}

async fn handle_set(State(state): State<AppState>, Query(params): Query<SetQuery>) -> Response {
    info!(
        "Received /set for device {} with mode={}, temp={}",
        params.address, params.mode, params.temp
    );

    match state
        .controller
        .set(&params.address, params.mode, params.temp)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => failure("/set", &e),
    }
}

fn status_for(err: &Error) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn failure(route: &str, err: &Error) -> Response {
    error!("{} failed: {}", route, err);
    error_response(status_for(err), &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Uri;

    #[test]
    fn test_set_query_defaults() {
        let uri: Uri = "/set?address=CC:22:37:10:43:4B".parse().unwrap();
        let Query(params) = Query::<SetQuery>::try_from_uri(&uri).unwrap();

        assert_eq!(params.mode, 0);
        assert_eq!(params.temp, 20.0);
    }

    #[test]
    fn test_pair_query_default_pin() {
        let uri: Uri = "/pair?address=CC:22:37:10:43:4B".parse().unwrap();
        let Query(params) = Query::<PairQuery>::try_from_uri(&uri).unwrap();

        assert_eq!(params.pin, "123456");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&Error::InvalidMode { mode: 7 }), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&Error::InvalidTemperature { value: f64::NAN }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Error::InvalidAddress {
                address: "x".to_string()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Error::PairingFailed {
                address: "CC:22:37:10:43:4B".to_string(),
                attempts: 3
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_root_carries_safety_warning() {
        let body = handle_root().await;

        assert!(body.starts_with(BANNER));
        assert!(body.contains("60°C"));
        assert!(body.contains("/set?address="));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["moa_server"]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.bluetoothctl, "bluetoothctl");
        assert!(!cli.no_sensor);
        assert!(!cli.no_pty);
    }
}
