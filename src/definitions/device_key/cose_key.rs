use ciborium::Value;
use elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};

/// An implementation of RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
/// restricted to the requirements of ISO/IEC 18013-5:2021.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub enum CoseKey {
    EC2 { crv: EC2Curve, x: Vec<u8>, y: EC2Y },
    OKP { crv: OKPCurve, x: Vec<u8> },
}

/// The sign bit or value of the y-coordinate for the EC point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Y {
    Value(Vec<u8>),
    SignBit(bool),
}

/// The RFC-8152 identifier of the curve, for EC2 key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EC2Curve {
    P256,
    P384,
    P521,
    P256K,
}

/// The RFC-8152 identifier of the curve, for OKP key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OKPCurve {
    X25519,
    X448,
    Ed25519,
    Ed448,
}

/// Errors that can occur when deserialising a COSE_Key.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("COSE_Key of kty 'EC2' missing x coordinate")]
    EC2MissingX,
    #[error("COSE_Key of kty 'EC2' missing y coordinate")]
    EC2MissingY,
    #[error("Expected to parse a CBOR bool or bstr for y-coordinate, received: {0}")]
    InvalidTypeY(&'static str),
    #[error("Expected to parse a CBOR map, received: {0}")]
    NotAMap(&'static str),
    #[error("This implementation of COSE_Key only supports P-256, P-384, P-521, Ed25519 and Ed448 elliptic curves")]
    UnsupportedCurve,
    #[error("This implementation of COSE_Key only supports EC2 and OKP keys")]
    UnsupportedKeyType,
    #[error("Could not reconstruct coordinates from the provided COSE_Key")]
    InvalidCoseKey,
}

impl CoseKey {
    /// The EC2 curve, when this is an EC2 key.
    pub fn ec2_curve(&self) -> Option<EC2Curve> {
        match self {
            CoseKey::EC2 { crv, .. } => Some(*crv),
            CoseKey::OKP { .. } => None,
        }
    }

    /// SEC1 encoding of an EC2 public key, uncompressed or compressed depending on
    /// how the y-coordinate was transmitted.
    pub fn to_sec1_bytes(&self) -> Result<Vec<u8>, Error> {
        match self {
            CoseKey::EC2 {
                x,
                y: EC2Y::Value(y),
                ..
            } => {
                let mut bytes = Vec::with_capacity(1 + x.len() + y.len());
                bytes.push(0x04);
                bytes.extend_from_slice(x);
                bytes.extend_from_slice(y);
                Ok(bytes)
            }
            CoseKey::EC2 {
                x,
                y: EC2Y::SignBit(sign),
                ..
            } => {
                let mut bytes = Vec::with_capacity(1 + x.len());
                bytes.push(if *sign { 0x03 } else { 0x02 });
                bytes.extend_from_slice(x);
                Ok(bytes)
            }
            CoseKey::OKP { .. } => Err(Error::UnsupportedKeyType),
        }
    }
}

impl From<CoseKey> for Value {
    fn from(key: CoseKey) -> Value {
        // Keys in the order used by ISO/IEC 18013-5 Annex D: kty, crv, x, y.
        let mut map = vec![];
        match key {
            CoseKey::EC2 { crv, x, y } => {
                // kty: 1, EC2: 2
                map.push((Value::Integer(1.into()), Value::Integer(2.into())));
                // crv: -1
                map.push((Value::Integer((-1).into()), crv.into()));
                // x: -2
                map.push((Value::Integer((-2).into()), Value::Bytes(x)));
                // y: -3
                map.push((Value::Integer((-3).into()), y.into()));
            }
            CoseKey::OKP { crv, x } => {
                // kty: 1, OKP: 1
                map.push((Value::Integer(1.into()), Value::Integer(1.into())));
                map.push((Value::Integer((-1).into()), crv.into()));
                map.push((Value::Integer((-2).into()), Value::Bytes(x)));
            }
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for CoseKey {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let entries = match v {
            Value::Map(entries) => entries,
            other => return Err(Error::NotAMap(crate::cbor::kind(&other))),
        };
        let mut kty = None;
        let mut crv = None;
        let mut x = None;
        let mut y = None;
        for (k, v) in entries {
            let Some(label) = k.as_integer().map(i128::from) else {
                continue;
            };
            match label {
                1 => kty = v.as_integer().map(i128::from),
                -1 => crv = v.as_integer().map(i128::from),
                -2 => x = Some(v),
                -3 => y = Some(v),
                _ => {}
            }
        }
        match (kty, crv) {
            (Some(2), Some(crv)) => {
                let crv = EC2Curve::try_from(crv)?;
                let x = match x {
                    Some(Value::Bytes(x)) => x,
                    Some(_) => return Err(Error::InvalidCoseKey),
                    None => return Err(Error::EC2MissingX),
                };
                let y = EC2Y::try_from(y.ok_or(Error::EC2MissingY)?)?;
                Ok(Self::EC2 { crv, x, y })
            }
            (Some(1), Some(crv)) => {
                let crv = OKPCurve::try_from(crv)?;
                match x {
                    Some(Value::Bytes(x)) => Ok(Self::OKP { crv, x }),
                    _ => Err(Error::InvalidCoseKey),
                }
            }
            _ => Err(Error::UnsupportedKeyType),
        }
    }
}

impl From<EC2Y> for Value {
    fn from(y: EC2Y) -> Value {
        match y {
            EC2Y::Value(s) => Value::Bytes(s),
            EC2Y::SignBit(b) => Value::Bool(b),
        }
    }
}

impl TryFrom<Value> for EC2Y {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        match v {
            Value::Bytes(s) => Ok(EC2Y::Value(s)),
            Value::Bool(b) => Ok(EC2Y::SignBit(b)),
            other => Err(Error::InvalidTypeY(crate::cbor::kind(&other))),
        }
    }
}

impl From<EC2Curve> for Value {
    fn from(crv: EC2Curve) -> Value {
        let id: i64 = match crv {
            EC2Curve::P256 => 1,
            EC2Curve::P384 => 2,
            EC2Curve::P521 => 3,
            EC2Curve::P256K => 8,
        };
        Value::Integer(id.into())
    }
}

impl TryFrom<i128> for EC2Curve {
    type Error = Error;

    fn try_from(crv_id: i128) -> Result<Self, Error> {
        match crv_id {
            1 => Ok(EC2Curve::P256),
            2 => Ok(EC2Curve::P384),
            3 => Ok(EC2Curve::P521),
            8 => Ok(EC2Curve::P256K),
            _ => Err(Error::UnsupportedCurve),
        }
    }
}

impl From<OKPCurve> for Value {
    fn from(crv: OKPCurve) -> Value {
        let id: i64 = match crv {
            OKPCurve::X25519 => 4,
            OKPCurve::X448 => 5,
            OKPCurve::Ed25519 => 6,
            OKPCurve::Ed448 => 7,
        };
        Value::Integer(id.into())
    }
}

impl TryFrom<i128> for OKPCurve {
    type Error = Error;

    fn try_from(crv_id: i128) -> Result<Self, Error> {
        match crv_id {
            4 => Ok(OKPCurve::X25519),
            5 => Ok(OKPCurve::X448),
            6 => Ok(OKPCurve::Ed25519),
            7 => Ok(OKPCurve::Ed448),
            _ => Err(Error::UnsupportedCurve),
        }
    }
}

macro_rules! public_key_conversions {
    ($curve:ident, $crv:expr) => {
        impl From<&$curve::PublicKey> for CoseKey {
            fn from(key: &$curve::PublicKey) -> CoseKey {
                let point = key.to_encoded_point(false);
                CoseKey::EC2 {
                    crv: $crv,
                    x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
                    y: EC2Y::Value(point.y().map(|y| y.to_vec()).unwrap_or_default()),
                }
            }
        }

        impl TryFrom<&CoseKey> for $curve::PublicKey {
            type Error = Error;

            fn try_from(key: &CoseKey) -> Result<$curve::PublicKey, Error> {
                if key.ec2_curve() != Some($crv) {
                    return Err(Error::UnsupportedCurve);
                }
                // Rejects wrong coordinate lengths and points that are not on the curve.
                $curve::PublicKey::from_sec1_bytes(&key.to_sec1_bytes()?)
                    .map_err(|_| Error::InvalidCoseKey)
            }
        }
    };
}

public_key_conversions!(p256, EC2Curve::P256);
public_key_conversions!(p384, EC2Curve::P384);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cose_key() {
        let key = CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: vec![0x01, 0x02, 0x03],
            y: EC2Y::Value(vec![0x04, 0x05, 0x06]),
        };
        let cbor = crate::cbor::to_vec(&key).unwrap();
        assert_eq!(
            hex::encode(&cbor),
            "a40102200121430102032243040506",
            "unexpected label order"
        );
        let key2: CoseKey = crate::cbor::from_slice(&cbor).unwrap();
        assert_eq!(key, key2);
    }

    #[test]
    fn p256_public_key_roundtrip() {
        let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let public = secret.public_key();
        let cose = CoseKey::from(&public);
        assert_eq!(cose.ec2_curve(), Some(EC2Curve::P256));
        assert_eq!(p256::PublicKey::try_from(&cose).unwrap(), public);
    }

    #[test]
    fn compressed_point_is_accepted() {
        let secret = p384::SecretKey::random(&mut rand::rngs::OsRng);
        let public = secret.public_key();
        let point = public.to_encoded_point(true);
        let sign = point.as_bytes()[0] == 0x03;
        let cose = CoseKey::EC2 {
            crv: EC2Curve::P384,
            x: point.x().unwrap().to_vec(),
            y: EC2Y::SignBit(sign),
        };
        assert_eq!(p384::PublicKey::try_from(&cose).unwrap(), public);
    }

    #[test]
    fn off_curve_point_is_rejected() {
        let cose = CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: vec![0x01; 32],
            y: EC2Y::Value(vec![0x02; 32]),
        };
        assert_eq!(
            p256::PublicKey::try_from(&cose),
            Err(Error::InvalidCoseKey)
        );
    }

    #[test]
    fn curve_mismatch_is_rejected() {
        let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let cose = CoseKey::from(&secret.public_key());
        assert_eq!(
            p384::PublicKey::try_from(&cose),
            Err(Error::UnsupportedCurve)
        );
    }

    #[test]
    fn okp_roundtrip() {
        let key = CoseKey::OKP {
            crv: OKPCurve::X25519,
            x: vec![9; 32],
        };
        let cbor = crate::cbor::to_vec(&key).unwrap();
        let decoded: CoseKey = crate::cbor::from_slice(&cbor).unwrap();
        assert_eq!(key, decoded);
        assert_eq!(decoded.to_sec1_bytes(), Err(Error::UnsupportedKeyType));
    }

    #[test]
    fn wrong_item_types_are_named() {
        assert_eq!(
            CoseKey::try_from(Value::Array(vec![])),
            Err(Error::NotAMap("array"))
        );
        assert_eq!(
            EC2Y::try_from(Value::Text("y".into())),
            Err(Error::InvalidTypeY("tstr"))
        );
    }
}
