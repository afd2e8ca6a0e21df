pub mod cose_key;

pub use cose_key::{CoseKey, EC2Curve, Error, OKPCurve, EC2Y};
