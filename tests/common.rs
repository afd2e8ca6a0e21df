use anyhow::{Context, Result};
use uuid::Uuid;

use isomdl_proximity::config::SessionConfig;
use isomdl_proximity::definitions::{
    BleOptions, CentralClientMode, ConnectionMethod, NfcOptions, PeripheralServerMode,
};
use isomdl_proximity::presentation::{device, reader, Session};
use isomdl_proximity::transport::{Capability, Connector};

#[allow(dead_code)]
fn main() {}

/// BLE with the holder as GATT server.
#[allow(dead_code)]
pub fn ble_server() -> ConnectionMethod {
    ConnectionMethod::Ble(BleOptions {
        peripheral_server_mode: Some(PeripheralServerMode {
            uuid: Uuid::new_v4(),
            ble_device_address: None,
        }),
        central_client_mode: None,
    })
}

/// BLE with the holder as GATT client.
#[allow(dead_code)]
pub fn ble_client() -> ConnectionMethod {
    ConnectionMethod::Ble(BleOptions {
        peripheral_server_mode: None,
        central_client_mode: Some(CentralClientMode {
            uuid: Uuid::new_v4(),
        }),
    })
}

#[allow(dead_code)]
pub fn nfc() -> ConnectionMethod {
    ConnectionMethod::Nfc(NfcOptions::default())
}

/// Engage by QR code and bring both sides up over `connector`.
#[allow(dead_code)]
pub async fn connect(
    methods: Vec<ConnectionMethod>,
    connector: &dyn Connector,
    config: SessionConfig,
) -> Result<(Session, Session)> {
    let (engaged, qr_code) = device::SessionManagerInit::initialise_with_curve(
        config.ephemeral_curve,
        methods,
        None,
    )
    .context("failed to initialise holder")?
    .qr_engagement();
    let holder = Session::start_as_holder(engaged, connector, config.clone())
        .await
        .context("holder failed to connect")?;
    let reader_engaged = reader::SessionManagerEngaged::from_qr_code(&qr_code)
        .context("reader failed to engage")?;
    let reader = Session::start_as_reader(reader_engaged, &Capability::all(), connector, config)
        .await
        .context("reader failed to connect")?;
    Ok((holder, reader))
}

/// Short timeouts so failure paths finish quickly.
#[allow(dead_code)]
pub fn impatient_config() -> SessionConfig {
    SessionConfig {
        engagement_timeout_ms: 200,
        connect_timeout_ms: 200,
        receive_timeout_ms: 200,
        ..Default::default()
    }
}
