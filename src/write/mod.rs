//! The [`Write`] transport unit moved one-at-a-time from [`crate::buffer`]
//! to [`crate::database`].
//!
//! Wire format: `[keySize:u32][action:u8][version:u64][record][key][value]`,
//! matching spec §3/§6.2. This is the same length-prefixed-fields shape the
//! teacher uses for `MemtableSingleEntry` and WAL records, just hand-encoded
//! through [`crate::encoding`] instead of `bincode`.

#[cfg(test)]
mod tests;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::model::{Action, Identifier, Text, Value, Version};

/// A single pending mutation, carrying enough information to build all
/// three family revisions (primary, secondary, search) once it reaches
/// the Database.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub action: Action,
    pub record: Identifier,
    pub key: Text,
    pub value: Value,
    pub version: Version,
}

impl Write {
    pub fn new(action: Action, record: Identifier, key: Text, value: Value, version: Version) -> Self {
        Self {
            action,
            record,
            key,
            value,
            version,
        }
    }

    pub fn add(record: Identifier, key: Text, value: Value, version: Version) -> Self {
        Self::new(Action::Add, record, key, value, version)
    }

    pub fn remove(record: Identifier, key: Text, value: Value, version: Version) -> Self {
        Self::new(Action::Remove, record, key, value, version)
    }
}

impl Encode for Write {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let key_bytes = encoding::encode_to_vec(&self.key)?;
        (key_bytes.len() as u32).encode_to(buf)?;
        self.action.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.record.encode_to(buf)?;
        buf.extend_from_slice(&key_bytes);
        self.value.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Write {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (action, n) = Action::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = Version::decode_from(&buf[off..])?;
        off += n;
        let (record, n) = Identifier::decode_from(&buf[off..])?;
        off += n;

        let key_start = off;
        let key_end = off + key_size as usize;
        if key_end > buf.len() {
            return Err(EncodingError::UnexpectedEof {
                needed: key_size as usize,
                available: buf.len().saturating_sub(key_start),
            });
        }
        let (key, key_consumed) = Text::decode_from(&buf[key_start..key_end])?;
        off = key_end.max(key_start + key_consumed);

        let (value, n) = Value::decode_from(&buf[off..])?;
        off += n;

        Ok((
            Self {
                action,
                record,
                key,
                value,
                version,
            },
            off,
        ))
    }
}
