//! This module contains the definitions for the [DeviceEngagement] struct and related types.
//!
//! The [DeviceEngagement] is the record a holder hands to a reader out-of-band (QR code or NFC
//! tap). It carries the holder's ephemeral public key and the ordered list of
//! [ConnectionMethod]s the reader may use to reach it.
//!
//! The module also provides the conversions between [DeviceEngagement] and [ciborium::Value]
//! that make up the engagement codec, and the `mdoc:` QR code URI form.
use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::Error;
pub use nfc_options::NfcOptions;

use crate::cbor;
use crate::definitions::device_key::cose_key::{CoseKey, EC2Curve};
use crate::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};

pub mod error;
pub mod nfc_options;

pub type EDeviceKeyBytes = Tag24<CoseKey>;
pub type EReaderKeyBytes = Tag24<CoseKey>;

pub type ConnectionMethods = NonEmptyVec<ConnectionMethod>;

/// Version written when no capabilities are advertised.
pub const VERSION: &str = "1.0";
/// Version written when capabilities are advertised.
pub const VERSION_WITH_CAPABILITIES: &str = "1.1";

/// The only cipher suite defined by ISO/IEC 18013-5.
pub const CIPHER_SUITE: u64 = 1;

/// Represents a device engagement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub struct DeviceEngagement {
    /// The version of the device engagement.
    pub version: String,

    /// The cipher suite and ephemeral device key.
    pub security: Security,

    /// The connection methods, in the holder's order of preference.
    pub connection_methods: ConnectionMethods,

    /// Optional capability flags.
    pub capabilities: Option<Capabilities>,
}

/// Cipher suite identifier and the encoded ephemeral device key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Security(pub u64, pub EDeviceKeyBytes);

/// A way of reaching the holder for data retrieval.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConnectionMethod {
    /// Represents the options for NFC data retrieval.
    Nfc(NfcOptions),

    /// Represents the BLE options for data retrieval.
    ///
    /// It contains the service UUIDs for the mode(s) the holder supports.
    Ble(BleOptions),

    /// Represents the options for a Wi-Fi Aware connection.
    WifiAware(WifiOptions),
}

/// Represents the options for `Bluetooth Low Energy` (BLE) data retrieval.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BleOptions {
    /// The holder acts as GATT server and the reader connects to it.
    pub peripheral_server_mode: Option<PeripheralServerMode>,

    /// The holder acts as GATT client and connects to the reader.
    pub central_client_mode: Option<CentralClientMode>,
}

/// Represents a peripheral server mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralServerMode {
    /// The 'UUID' of the peripheral server.
    pub uuid: Uuid,

    /// The 'BLE' device address of the peripheral server, if available.
    pub ble_device_address: Option<ByteStr>,
}

/// Represents the central client mode for data retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralClientMode {
    pub uuid: Uuid,
}

/// Represents the options for a `Wi-Fi Aware` connection.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct WifiOptions {
    /// The passphrase for the `Wi-Fi` connection. If [None], no passphrase is required.
    pub pass_phrase: Option<String>,

    /// The operating class of the `Wi-Fi` channel. If [None], the operating class is not specified.
    pub channel_info_operating_class: Option<u64>,

    /// The channel number of the `Wi-Fi` channel. If [None], the channel number is not specified.
    pub channel_info_channel_number: Option<u64>,

    /// The band information of the `Wi-Fi` channel. If [None], the band information is not specified.
    pub band_info: Option<ByteStr>,
}

/// Capability flags advertised by the holder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub handover_session_establishment_support: Option<bool>,
    pub reader_auth_all_support: Option<bool>,
}

impl DeviceEngagement {
    /// Build an engagement for the given ephemeral key, rejecting keys on curves the
    /// session establishment cannot use and empty method lists.
    pub fn new(
        e_device_key: CoseKey,
        connection_methods: Vec<ConnectionMethod>,
        capabilities: Option<Capabilities>,
    ) -> Result<Self, Error> {
        ensure_supported_curve(&e_device_key)?;
        let connection_methods =
            NonEmptyVec::try_from(connection_methods).map_err(|_| Error::NoTransportsOffered)?;
        let e_device_key_bytes = Tag24::new(e_device_key)
            .map_err(|e| Error::malformed(format!("unable to encode EDeviceKey: {e}")))?;
        let version = match capabilities {
            Some(_) => VERSION_WITH_CAPABILITIES,
            None => VERSION,
        };
        Ok(Self {
            version: version.to_string(),
            security: Security(CIPHER_SUITE, e_device_key_bytes),
            connection_methods,
            capabilities,
        })
    }

    /// The holder's ephemeral public key.
    pub fn e_device_key(&self) -> &CoseKey {
        self.security.1.as_ref()
    }

    /// Encode to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        cbor::to_vec(self).map_err(Error::from)
    }

    /// Decode a peer's engagement, keeping the exact bytes for the session transcript.
    pub fn decode(bytes: &[u8]) -> Result<Tag24<DeviceEngagement>, Error> {
        let value: Value = cbor::from_slice(bytes)?;
        let engagement = DeviceEngagement::try_from(value)?;
        Ok(Tag24::from_parts(engagement, bytes.to_vec()))
    }
}

fn ensure_supported_curve(key: &CoseKey) -> Result<(), Error> {
    match key.ec2_curve() {
        Some(EC2Curve::P256) | Some(EC2Curve::P384) => Ok(()),
        _ => Err(Error::UnsupportedCurve),
    }
}

fn label(k: &Value) -> Option<i128> {
    k.as_integer().map(i128::from)
}

fn integer_map(v: Value, what: &str) -> Result<BTreeMap<i128, Value>, Error> {
    let Value::Map(entries) = v else {
        return Err(Error::malformed(format!("{what} is not a map")));
    };
    let mut map = BTreeMap::new();
    for (k, v) in entries {
        let k = label(&k).ok_or_else(|| Error::malformed(format!("{what} has a non-integer key")))?;
        if map.insert(k, v).is_some() {
            return Err(Error::malformed(format!("{what} has a duplicate key {k}")));
        }
    }
    Ok(map)
}

impl From<DeviceEngagement> for Value {
    fn from(device_engagement: DeviceEngagement) -> Value {
        let mut map = vec![
            (
                Value::Integer(0.into()),
                Value::Text(device_engagement.version),
            ),
            (
                Value::Integer(1.into()),
                Value::Array(vec![
                    Value::Integer(device_engagement.security.0.into()),
                    device_engagement.security.1.into(),
                ]),
            ),
            (
                Value::Integer(2.into()),
                Value::Array(
                    device_engagement
                        .connection_methods
                        .into_inner()
                        .into_iter()
                        .map(Value::from)
                        .collect(),
                ),
            ),
        ];
        if let Some(capabilities) = device_engagement.capabilities {
            map.push((Value::Integer(6.into()), capabilities.into()));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for DeviceEngagement {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut map = integer_map(v, "DeviceEngagement")?;

        let version = match map.remove(&0) {
            Some(Value::Text(v)) if v == VERSION || v == VERSION_WITH_CAPABILITIES => v,
            Some(Value::Text(v)) => {
                return Err(Error::malformed(format!("unsupported version {v}")))
            }
            _ => return Err(Error::malformed("missing version")),
        };

        let security = map
            .remove(&1)
            .ok_or_else(|| Error::malformed("missing security"))
            .and_then(Security::try_from)?;

        let connection_methods = match map.remove(&2) {
            Some(Value::Array(items)) => {
                let mut methods = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(method) = ConnectionMethod::decode(item)? {
                        methods.push(method);
                    }
                }
                NonEmptyVec::try_from(methods).map_err(|_| Error::NoTransportsOffered)?
            }
            Some(_) => return Err(Error::malformed("device retrieval methods are not an array")),
            None => return Err(Error::NoTransportsOffered),
        };

        let capabilities = map.remove(&6).map(Capabilities::try_from).transpose()?;

        for key in map.keys() {
            // Server retrieval (3), protocol info (4) and origin infos (5) are not used
            // for proximity presentment.
            tracing::debug!("ignoring DeviceEngagement field {key}");
        }

        Ok(DeviceEngagement {
            version,
            security,
            connection_methods,
            capabilities,
        })
    }
}

impl TryFrom<Value> for Security {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Array(items) = v else {
            return Err(Error::malformed("security is not an array"));
        };
        match <[Value; 2]>::try_from(items) {
            Ok([Value::Integer(suite), Value::Tag(24, inner)]) => {
                let suite = u64::try_from(suite).map_err(|_| Error::malformed("bad cipher suite"))?;
                if suite != CIPHER_SUITE {
                    return Err(Error::malformed(format!("unsupported cipher suite {suite}")));
                }
                let Value::Bytes(key_bytes) = *inner else {
                    return Err(Error::malformed("EDeviceKeyBytes is not a byte string"));
                };
                let key_value: Value = cbor::from_slice(&key_bytes)?;
                let key = CoseKey::try_from(key_value)?;
                ensure_supported_curve(&key)?;
                Ok(Security(suite, Tag24::from_parts(key, key_bytes)))
            }
            _ => Err(Error::malformed("security must be [cipher suite, EDeviceKeyBytes]")),
        }
    }
}

impl Tag24<DeviceEngagement> {
    const BASE64_CONFIG: base64::Config = base64::Config::new(base64::CharacterSet::UrlSafe, false);

    pub fn to_qr_code_uri(&self) -> String {
        let mut qr_code_uri = String::from("mdoc:");
        base64::encode_config_buf(&self.inner_bytes, Self::BASE64_CONFIG, &mut qr_code_uri);
        qr_code_uri
    }

    pub fn from_qr_code_uri(qr_code_uri: &str) -> Result<Self, Error> {
        let encoded_de = qr_code_uri
            .strip_prefix("mdoc:")
            .ok_or_else(|| Error::malformed("qr code has invalid prefix"))?;
        let decoded_de = base64::decode_config(encoded_de, Self::BASE64_CONFIG)
            .map_err(|e| Error::malformed(format!("qr code is not base64url: {e}")))?;
        DeviceEngagement::decode(&decoded_de)
    }
}

impl ConnectionMethod {
    pub fn version(&self) -> u64 {
        1
    }

    pub fn transport_type(&self) -> u64 {
        match self {
            Self::Nfc(_) => 1,
            Self::Ble(_) => 2,
            Self::WifiAware(_) => 3,
        }
    }

    /// Decodes one `[type, version, options]` entry. Unknown transport types are skipped
    /// rather than failing the whole engagement.
    fn decode(value: Value) -> Result<Option<Self>, Error> {
        let Value::Array(items) = value else {
            return Err(Error::malformed("device retrieval method is not an array"));
        };
        let Ok([transport_type, version, options]) = <[Value; 3]>::try_from(items) else {
            return Err(Error::malformed("device retrieval method must have three entries"));
        };
        let (Some(transport_type), Some(version)) = (label(&transport_type), label(&version))
        else {
            return Err(Error::malformed("device retrieval method type and version must be integers"));
        };
        if version != 1 {
            return Err(Error::malformed(format!(
                "unsupported device retrieval method version {version}"
            )));
        }
        match transport_type {
            1 => Ok(Some(ConnectionMethod::Nfc(NfcOptions::try_from(options)?))),
            2 => Ok(Some(ConnectionMethod::Ble(BleOptions::try_from(options)?))),
            3 => Ok(Some(ConnectionMethod::WifiAware(WifiOptions::try_from(options)?))),
            other => {
                tracing::debug!("skipping unknown device retrieval method type {other}");
                Ok(None)
            }
        }
    }
}

impl TryFrom<Value> for ConnectionMethod {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        ConnectionMethod::decode(value)?
            .ok_or_else(|| Error::malformed("unsupported device retrieval method"))
    }
}

impl From<ConnectionMethod> for Value {
    fn from(method: ConnectionMethod) -> Self {
        let transport_type = Value::Integer(method.transport_type().into());
        let version = Value::Integer(method.version().into());
        let options = match method {
            ConnectionMethod::Nfc(opts) => opts.into(),
            ConnectionMethod::Ble(opts) => opts.into(),
            ConnectionMethod::WifiAware(opts) => opts.into(),
        };
        Value::Array(vec![transport_type, version, options])
    }
}

fn uuid_from(value: Option<Value>) -> Result<Uuid, Error> {
    match value {
        Some(Value::Bytes(uuid)) => {
            let uuid_bytes: [u8; 16] = uuid
                .try_into()
                .map_err(|_| Error::malformed("BLE UUID must be 16 bytes"))?;
            Ok(Uuid::from_bytes(uuid_bytes))
        }
        _ => Err(Error::malformed("BLE mode enabled without a UUID")),
    }
}

impl TryFrom<Value> for BleOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut map = integer_map(v, "BLE options")?;

        let peripheral_server_mode = match map.remove(&0) {
            Some(Value::Bool(true)) => {
                let uuid = uuid_from(map.remove(&10))?;
                let ble_device_address = map
                    .remove(&20)
                    .map(ByteStr::try_from)
                    .transpose()
                    .map_err(|_| Error::malformed("BLE device address is not a byte string"))?;
                Some(PeripheralServerMode {
                    uuid,
                    ble_device_address,
                })
            }
            Some(Value::Bool(false)) => None,
            _ => return Err(Error::malformed("BLE peripheral server mode flag missing")),
        };

        let central_client_mode = match map.remove(&1) {
            Some(Value::Bool(true)) => Some(CentralClientMode {
                uuid: uuid_from(map.remove(&11))?,
            }),
            Some(Value::Bool(false)) => None,
            _ => return Err(Error::malformed("BLE central client mode flag missing")),
        };

        if peripheral_server_mode.is_none() && central_client_mode.is_none() {
            return Err(Error::malformed("BLE options enable neither mode"));
        }

        Ok(BleOptions {
            peripheral_server_mode,
            central_client_mode,
        })
    }
}

impl From<BleOptions> for Value {
    fn from(o: BleOptions) -> Value {
        let mut map = vec![
            (
                Value::Integer(0.into()),
                Value::Bool(o.peripheral_server_mode.is_some()),
            ),
            (
                Value::Integer(1.into()),
                Value::Bool(o.central_client_mode.is_some()),
            ),
        ];
        let mut ble_device_address = None;
        if let Some(PeripheralServerMode {
            uuid,
            ble_device_address: address,
        }) = o.peripheral_server_mode
        {
            map.push((
                Value::Integer(10.into()),
                Value::Bytes(uuid.as_bytes().to_vec()),
            ));
            ble_device_address = address;
        }
        if let Some(CentralClientMode { uuid }) = o.central_client_mode {
            map.push((
                Value::Integer(11.into()),
                Value::Bytes(uuid.as_bytes().to_vec()),
            ));
        }
        if let Some(address) = ble_device_address {
            map.push((Value::Integer(20.into()), address.into()));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for WifiOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut map = integer_map(v, "Wi-Fi options")?;

        let pass_phrase = match map.remove(&0) {
            None => None,
            Some(Value::Text(text)) => Some(text),
            Some(_) => return Err(Error::malformed("Wi-Fi passphrase is not text")),
        };
        let mut lookup_opt_u64 = |idx: i128| -> Result<Option<u64>, Error> {
            match map.remove(&idx) {
                None => Ok(None),
                Some(Value::Integer(int_val)) => u64::try_from(int_val)
                    .map(Some)
                    .map_err(|_| Error::malformed("Wi-Fi channel info out of range")),
                Some(_) => Err(Error::malformed("Wi-Fi channel info is not an integer")),
            }
        };
        let channel_info_operating_class = lookup_opt_u64(1)?;
        let channel_info_channel_number = lookup_opt_u64(2)?;
        let band_info = map
            .remove(&3)
            .map(ByteStr::try_from)
            .transpose()
            .map_err(|_| Error::malformed("Wi-Fi band info is not a byte string"))?;

        Ok(WifiOptions {
            pass_phrase,
            channel_info_operating_class,
            channel_info_channel_number,
            band_info,
        })
    }
}

impl From<WifiOptions> for Value {
    fn from(o: WifiOptions) -> Value {
        let mut map = vec![];
        if let Some(v) = o.pass_phrase {
            map.push((Value::Integer(0.into()), Value::Text(v)));
        }
        if let Some(v) = o.channel_info_operating_class {
            map.push((Value::Integer(1.into()), Value::Integer(v.into())));
        }
        if let Some(v) = o.channel_info_channel_number {
            map.push((Value::Integer(2.into()), Value::Integer(v.into())));
        }
        if let Some(v) = o.band_info {
            map.push((Value::Integer(3.into()), v.into()));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for Capabilities {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut map = integer_map(v, "capabilities")?;
        let mut flag = |idx: i128| -> Result<Option<bool>, Error> {
            match map.remove(&idx) {
                None => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(b)),
                Some(_) => Err(Error::malformed("capability flag is not a bool")),
            }
        };
        Ok(Capabilities {
            handover_session_establishment_support: flag(2)?,
            reader_auth_all_support: flag(3)?,
        })
    }
}

impl From<Capabilities> for Value {
    fn from(c: Capabilities) -> Value {
        let mut map = vec![];
        if let Some(b) = c.handover_session_establishment_support {
            map.push((Value::Integer(2.into()), Value::Bool(b)));
        }
        if let Some(b) = c.reader_auth_all_support {
            map.push((Value::Integer(3.into()), Value::Bool(b)));
        }
        Value::Map(map)
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use crate::definitions::device_key::cose_key::{OKPCurve, EC2Y};
    use crate::definitions::session::EphemeralKeyPair;

    use super::*;

    const EXAMPLE_QR_CODE: &str = "mdoc:owBjMS4wAYIB2BhYS6QBAiABIVgglyWXuAyJ6iRNc8OlYXenvkJt23rJPdtIhlawXqr-yf0iWCC1GQSH8tIwTYVwha_ZoPL20_saYXrGIbrCm133H0ki-QKBgwIBowD1AfQKUH2RiuAEbUVzrsrOiUnSPDw";

    fn p256_key() -> CoseKey {
        EphemeralKeyPair::generate(EC2Curve::P256)
            .unwrap()
            .public_key()
    }

    fn ble_central(uuid: Uuid) -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: None,
            central_client_mode: Some(CentralClientMode { uuid }),
        })
    }

    #[test]
    fn device_engagement_cbor_roundtrip() {
        let uuid = Uuid::now_v1(&[0, 1, 2, 3, 4, 5]);
        let device_engagement =
            DeviceEngagement::new(p256_key(), vec![ble_central(uuid)], None).unwrap();

        let bytes = device_engagement.encode().unwrap();
        let roundtripped = DeviceEngagement::decode(&bytes).unwrap();

        assert_eq!(&device_engagement, roundtripped.as_ref());
        assert_eq!(roundtripped.inner_bytes, bytes);
    }

    #[test]
    fn device_engagement_qr_code_roundtrip() {
        let de = Tag24::<DeviceEngagement>::from_qr_code_uri(EXAMPLE_QR_CODE).unwrap();
        assert_eq!(de.as_ref().version, "1.0");
        assert_eq!(de.as_ref().e_device_key().ec2_curve(), Some(EC2Curve::P256));
        match de.as_ref().connection_methods.first() {
            ConnectionMethod::Ble(BleOptions {
                peripheral_server_mode: Some(mode),
                central_client_mode: None,
            }) => assert_eq!(
                mode.uuid,
                Uuid::parse_str("7d918ae0-046d-4573-aeca-ce8949d23c3c").unwrap()
            ),
            other => panic!("unexpected method {other:?}"),
        }
        assert_eq!(EXAMPLE_QR_CODE, de.to_qr_code_uri());
    }

    #[test]
    fn capabilities_bump_the_version() {
        let capabilities = Capabilities {
            handover_session_establishment_support: Some(true),
            reader_auth_all_support: None,
        };
        let de = DeviceEngagement::new(
            p256_key(),
            vec![ble_central(Uuid::new_v4())],
            Some(capabilities.clone()),
        )
        .unwrap();
        assert_eq!(de.version, VERSION_WITH_CAPABILITIES);
        let decoded = DeviceEngagement::decode(&de.encode().unwrap()).unwrap();
        assert_eq!(decoded.as_ref().capabilities, Some(capabilities));
    }

    #[test]
    fn empty_methods_are_rejected() {
        assert_eq!(
            DeviceEngagement::new(p256_key(), vec![], None),
            Err(Error::NoTransportsOffered)
        );
    }

    #[test]
    fn unsupported_curves_are_rejected() {
        let p521 = CoseKey::EC2 {
            crv: EC2Curve::P521,
            x: vec![1; 66],
            y: EC2Y::Value(vec![2; 66]),
        };
        assert_eq!(
            DeviceEngagement::new(p521, vec![ble_central(Uuid::new_v4())], None),
            Err(Error::UnsupportedCurve)
        );
        let x25519 = CoseKey::OKP {
            crv: OKPCurve::X25519,
            x: vec![9; 32],
        };
        assert_eq!(
            DeviceEngagement::new(x25519, vec![ble_central(Uuid::new_v4())], None),
            Err(Error::UnsupportedCurve)
        );
    }

    #[test]
    fn decoding_an_unsupported_curve_is_typed() {
        // Hand-build an engagement around a secp256k1 key.
        let key = CoseKey::EC2 {
            crv: EC2Curve::P256K,
            x: vec![1; 32],
            y: EC2Y::Value(vec![2; 32]),
        };
        let engagement = Value::Map(vec![
            (Value::Integer(0.into()), Value::Text("1.0".into())),
            (
                Value::Integer(1.into()),
                Value::Array(vec![
                    Value::Integer(1.into()),
                    Tag24::new(key).unwrap().into(),
                ]),
            ),
            (
                Value::Integer(2.into()),
                Value::Array(vec![ble_central(Uuid::new_v4()).into()]),
            ),
        ]);
        let bytes = cbor::to_vec(&engagement).unwrap();
        assert_eq!(
            DeviceEngagement::decode(&bytes),
            Err(Error::UnsupportedCurve)
        );
    }

    #[test]
    fn decoding_empty_or_unknown_methods() {
        let de = DeviceEngagement::new(p256_key(), vec![ble_central(Uuid::new_v4())], None)
            .unwrap();
        let mut value = Value::from(de);
        if let Value::Map(entries) = &mut value {
            entries[2].1 = Value::Array(vec![Value::Array(vec![
                Value::Integer(9.into()),
                Value::Integer(1.into()),
                Value::Map(vec![]),
            ])]);
        }
        let bytes = cbor::to_vec(&value).unwrap();
        assert_eq!(
            DeviceEngagement::decode(&bytes),
            Err(Error::NoTransportsOffered)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        for input in [&[][..], &[0xff][..], &[0x01][..], &hex::decode("a10063322e30").unwrap()[..]]
        {
            assert!(
                matches!(
                    DeviceEngagement::decode(input),
                    Err(Error::MalformedEngagement(_))
                ),
                "{input:02x?} should be malformed"
            );
        }
        assert!(matches!(
            Tag24::<DeviceEngagement>::from_qr_code_uri("https://example.com"),
            Err(Error::MalformedEngagement(_))
        ));
        assert!(matches!(
            Tag24::<DeviceEngagement>::from_qr_code_uri("mdoc:!!!"),
            Err(Error::MalformedEngagement(_))
        ));
    }

    #[test]
    fn ble_options_need_a_mode() {
        let value = Value::Map(vec![
            (Value::Integer(0.into()), Value::Bool(false)),
            (Value::Integer(1.into()), Value::Bool(false)),
        ]);
        assert!(matches!(
            BleOptions::try_from(value),
            Err(Error::MalformedEngagement(_))
        ));
    }

    #[test]
    fn ble_options_roundtrip_both_modes() {
        let options = BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid: Uuid::new_v4(),
                ble_device_address: Some(ByteStr::from(vec![1, 2, 3, 4, 5, 6])),
            }),
            central_client_mode: Some(CentralClientMode {
                uuid: Uuid::new_v4(),
            }),
        };
        let bytes = cbor::to_vec(&Value::from(options.clone())).unwrap();
        let value: Value = cbor::from_slice(&bytes).unwrap();
        assert_eq!(BleOptions::try_from(value).unwrap(), options);
    }

    fn wifi_options_cbor_roundtrip_test(wifi_options: WifiOptions) {
        let method = ConnectionMethod::WifiAware(wifi_options);
        let bytes: Vec<u8> = cbor::to_vec(&method).unwrap();
        let deserialized: ConnectionMethod = cbor::from_slice(&bytes).unwrap();
        assert_eq!(method, deserialized);
    }

    #[test]
    fn wifi_options_cbor_roundtrip_all_some() {
        wifi_options_cbor_roundtrip_test(WifiOptions {
            pass_phrase: Some(String::from("secret")),
            channel_info_operating_class: Some(2),
            channel_info_channel_number: Some(3),
            band_info: Some(ByteStr::from(vec![20, 30, 40])),
        });
    }

    #[test]
    fn wifi_options_cbor_roundtrip_all_none() {
        wifi_options_cbor_roundtrip_test(WifiOptions::default());
    }
}
