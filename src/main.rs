use std::path::PathBuf;

use anyhow::{bail, Context, Error};
use clap::Parser;
use isomdl_proximity::config::SessionConfig;
use isomdl_proximity::definitions::{
    BleOptions, Capabilities, CentralClientMode, ConnectionMethod, DeviceEngagement, NfcOptions,
    PeripheralServerMode, WifiOptions,
};
use isomdl_proximity::definitions::helpers::Tag24;
use isomdl_proximity::presentation::{device, reader, Received, Session};
use isomdl_proximity::transport::memory::MemoryConnector;
use isomdl_proximity::transport::{Capability, Channel, Party};
use serde_json::json;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON session configuration. `PROXIMITY_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Create a holder engagement and print its `mdoc:` QR code URI.
    Engage {
        #[command(flatten)]
        methods: Methods,
        /// Advertise support for negotiated handover and reader authentication.
        #[arg(long)]
        capabilities: bool,
    },
    /// Print a JSON summary of an `mdoc:` QR code URI.
    Inspect { uri: String },
    /// Run a holder and a reader against each other in memory.
    Simulate {
        #[command(flatten)]
        methods: Methods,
        /// Size of the reader's request, in bytes.
        #[arg(long, default_value_t = 450)]
        request_size: usize,
        /// Size of the holder's response, in bytes.
        #[arg(long, default_value_t = 64)]
        response_size: usize,
        /// Largest unit the in-memory link carries.
        #[arg(long, default_value_t = isomdl_proximity::transport::memory::DEFAULT_MTU)]
        mtu: usize,
    },
}

#[derive(Debug, clap::Args)]
struct Methods {
    /// Offer BLE with the holder as GATT server.
    #[arg(long)]
    ble_server: bool,
    /// Offer BLE with the holder as GATT client.
    #[arg(long)]
    ble_client: bool,
    #[arg(long)]
    nfc: bool,
    #[arg(long)]
    wifi_aware: bool,
}

impl Methods {
    /// The selected methods; BLE server mode if nothing was selected.
    fn connection_methods(&self) -> Vec<ConnectionMethod> {
        let mut methods = vec![];
        let ble_server = self.ble_server || !(self.ble_client || self.nfc || self.wifi_aware);
        if ble_server || self.ble_client {
            methods.push(ConnectionMethod::Ble(BleOptions {
                peripheral_server_mode: ble_server.then(|| PeripheralServerMode {
                    uuid: Uuid::new_v4(),
                    ble_device_address: None,
                }),
                central_client_mode: self.ble_client.then(|| CentralClientMode {
                    uuid: Uuid::new_v4(),
                }),
            }));
        }
        if self.nfc {
            methods.push(ConnectionMethod::Nfc(NfcOptions::default()));
        }
        if self.wifi_aware {
            methods.push(ConnectionMethod::WifiAware(WifiOptions::default()));
        }
        methods
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    match args.action {
        Action::Engage {
            methods,
            capabilities,
        } => engage(&config, &methods, capabilities),
        Action::Inspect { uri } => inspect(&uri),
        Action::Simulate {
            methods,
            request_size,
            response_size,
            mtu,
        } => simulate(config, &methods, request_size, response_size, mtu).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig, Error> {
    let config = match path {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("could not load {}", path.display()))?,
        None => SessionConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn engage(config: &SessionConfig, methods: &Methods, capabilities: bool) -> Result<(), Error> {
    let capabilities = capabilities.then(|| Capabilities {
        handover_session_establishment_support: Some(true),
        reader_auth_all_support: Some(true),
    });
    let init = device::SessionManagerInit::initialise_with_curve(
        config.ephemeral_curve,
        methods.connection_methods(),
        capabilities,
    )
    .context("could not create engagement")?;
    let (_, uri) = init.qr_engagement();
    println!("{uri}");
    Ok(())
}

fn inspect(uri: &str) -> Result<(), Error> {
    let engagement =
        Tag24::<DeviceEngagement>::from_qr_code_uri(uri).context("could not decode engagement")?;
    println!("{}", serde_json::to_string_pretty(&summary(&engagement)?)?);
    Ok(())
}

fn summary(engagement: &Tag24<DeviceEngagement>) -> Result<serde_json::Value, Error> {
    let reader = reader::SessionManagerEngaged::from_qr_code(&engagement.to_qr_code_uri())?;
    let de = engagement.as_ref();
    let channels: Vec<_> = Channel::expand(&de.connection_methods)
        .into_iter()
        .map(|channel| {
            json!({
                "transport": channel.kind().to_string(),
                "holder_role": channel.role_of(Party::Holder).to_string(),
                "reader_role": channel.role_of(Party::Reader).to_string(),
                "details": format!("{channel:?}"),
            })
        })
        .collect();
    Ok(json!({
        "version": de.version,
        "cipher_suite": de.security.0,
        "curve": format!("{:?}", de.e_device_key().ec2_curve()),
        "ble_ident": hex::encode(reader.ble_ident()?),
        "channels": channels,
        "capabilities": de.capabilities.as_ref().map(|c| json!({
            "handover_session_establishment_support": c.handover_session_establishment_support,
            "reader_auth_all_support": c.reader_auth_all_support,
        })),
        "engagement_bytes": engagement.inner_bytes.len(),
    }))
}

async fn simulate(
    config: SessionConfig,
    methods: &Methods,
    request_size: usize,
    response_size: usize,
    mtu: usize,
) -> Result<(), Error> {
    let connector = MemoryConnector::new(mtu);
    let init = device::SessionManagerInit::initialise_with_curve(
        config.ephemeral_curve,
        methods.connection_methods(),
        None,
    )?;
    let (engaged, uri) = init.qr_engagement();
    tracing::info!(%uri, "holder engagement");

    let holder = async {
        let mut session = Session::start_as_holder(engaged, &connector, config.clone()).await?;
        let Received::Message(request) = session.receive().await? else {
            bail!("reader ended the session before sending a request");
        };
        tracing::info!(bytes = request.len(), "holder received request");
        session.send(&vec![0xa5; response_size]).await?;
        match session.receive().await? {
            Received::Terminated(_) => Ok::<Session, Error>(session),
            Received::Message(_) => bail!("expected the reader to terminate"),
        }
    };
    let reader = async {
        let engaged = reader::SessionManagerEngaged::from_qr_code(&uri)?;
        let mut session =
            Session::start_as_reader(engaged, &Capability::all(), &connector, config.clone())
                .await?;
        session.send(&vec![0x5a; request_size]).await?;
        let Received::Message(response) = session.receive().await? else {
            bail!("holder ended the session before responding");
        };
        tracing::info!(bytes = response.len(), "reader received response");
        session.terminate().await?;
        Ok::<Session, Error>(session)
    };

    let (holder, reader) = tokio::join!(holder, reader);
    let (holder, reader) = (holder?, reader?);
    let stats = connector.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "holder_state": holder.state().to_string(),
            "reader_state": reader.state().to_string(),
            "units_sent": stats.units_sent(),
            "transports_closed": stats.closes(),
        }))?
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_method_is_ble_server() {
        let methods = Methods {
            ble_server: false,
            ble_client: false,
            nfc: false,
            wifi_aware: false,
        };
        let channels = Channel::expand(&methods.connection_methods());
        assert_eq!(channels.len(), 1);
        assert!(matches!(channels[0], Channel::BlePeripheralServer { .. }));
    }

    #[test]
    fn inspect_summary() {
        let methods = Methods {
            ble_server: true,
            ble_client: true,
            nfc: true,
            wifi_aware: false,
        };
        let init =
            device::SessionManagerInit::initialise(methods.connection_methods(), None).unwrap();
        let summary = summary(init.device_engagement()).unwrap();
        assert_eq!(summary["version"], "1.0");
        assert_eq!(summary["channels"].as_array().unwrap().len(), 3);
        assert_eq!(summary["ble_ident"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn simulation_runs_to_completion() {
        let methods = Methods {
            ble_server: true,
            ble_client: false,
            nfc: false,
            wifi_aware: false,
        };
        simulate(SessionConfig::default(), &methods, 450, 64, 128)
            .await
            .unwrap();
    }
}
