use ciborium::Value;

use crate::definitions::device_engagement::error::Error;

/// The maximum length of the NFC command, as specified in ISO_18013-5 2021 Section 8.3.3.1.2
/// Values of this type must lie between 255 and 65,535 inclusive, as specified in Note 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandDataLength(u16);

/// The maximum length of the NFC response data, as specified in ISO_18013-5 2021 Section 8.3.3.1.2
/// Values of this type must lie between 256 and 65,536 inclusive, as specified in Note 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseDataLength(u32);

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NfcOptions {
    pub max_len_command_data_field: CommandDataLength,
    pub max_len_response_data_field: ResponseDataLength,
}

impl CommandDataLength {
    pub const MIN: CommandDataLength = CommandDataLength(255);
    pub const MAX: CommandDataLength = CommandDataLength(65535);

    pub const fn new(v: u16) -> Option<CommandDataLength> {
        match v >= Self::MIN.get() {
            true => Some(CommandDataLength(v)),
            false => None,
        }
    }

    pub const fn get(&self) -> u16 {
        self.0
    }
}

/// ISO_18013-5 2021 does not specify a default value for the Command Data Length, so we make
/// a safe assumption here and specify the minimum value, which is 255.
impl Default for CommandDataLength {
    fn default() -> Self {
        Self::MIN
    }
}

impl ResponseDataLength {
    pub const MIN: ResponseDataLength = ResponseDataLength(256);
    pub const MAX: ResponseDataLength = ResponseDataLength(65536);

    pub const fn new(v: u32) -> Option<ResponseDataLength> {
        match v >= Self::MIN.get() && v <= Self::MAX.get() {
            true => Some(ResponseDataLength(v)),
            false => None,
        }
    }

    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// ISO_18013-5 2021 does not specify a default value for the Response Data Length, so we make
/// a safe assumption here and specify the minimum value, which is 256.
impl Default for ResponseDataLength {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<Value> for NfcOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::malformed("NFC options are not a map"));
        };
        let lookup = |label: i128| -> Option<u64> {
            entries
                .iter()
                .find(|(k, _)| k.as_integer().map(i128::from) == Some(label))
                .and_then(|(_, v)| v.as_integer())
                .and_then(|i| u64::try_from(i).ok())
        };

        let max_len_command_data_field = lookup(0)
            .and_then(|v| u16::try_from(v).ok())
            .and_then(CommandDataLength::new)
            .ok_or_else(|| Error::malformed("NFC command data length must be 255..=65535"))?;
        let max_len_response_data_field = lookup(1)
            .and_then(|v| u32::try_from(v).ok())
            .and_then(ResponseDataLength::new)
            .ok_or_else(|| Error::malformed("NFC response data length must be 256..=65536"))?;

        Ok(NfcOptions {
            max_len_command_data_field,
            max_len_response_data_field,
        })
    }
}

impl From<NfcOptions> for Value {
    fn from(o: NfcOptions) -> Value {
        Value::Map(vec![
            (
                Value::Integer(0.into()),
                Value::Integer(o.max_len_command_data_field.get().into()),
            ),
            (
                Value::Integer(1.into()),
                Value::Integer(o.max_len_response_data_field.get().into()),
            ),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bounds() {
        assert!(CommandDataLength::new(254).is_none());
        assert!(CommandDataLength::new(255).is_some());
        assert!(ResponseDataLength::new(255).is_none());
        assert!(ResponseDataLength::new(65536).is_some());
        assert!(ResponseDataLength::new(65537).is_none());
    }

    #[test]
    fn out_of_range_lengths_are_malformed() {
        let value = Value::Map(vec![
            (Value::Integer(0.into()), Value::Integer(10.into())),
            (Value::Integer(1.into()), Value::Integer(300.into())),
        ]);
        assert!(matches!(
            NfcOptions::try_from(value),
            Err(Error::MalformedEngagement(_))
        ));
    }

    #[test]
    fn roundtrip() {
        let options = NfcOptions {
            max_len_command_data_field: CommandDataLength::MAX,
            max_len_response_data_field: ResponseDataLength::MAX,
        };
        let value = Value::from(options.clone());
        assert_eq!(NfcOptions::try_from(value).unwrap(), options);
    }
}
