use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{Error, ErrorKind, Result};

// size of SEC_CHANNEL_BINDINGS structure
const SEC_CHANNEL_BINDINGS_SIZE: usize = 32;

/// Ties the handshake to an outer transport session, e.g. the `tls-server-end-point` value of
/// the TLS connection the tokens travel over.
///
/// [SEC_CHANNEL_BINDINGS](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-sec_channel_bindings)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelBindings {
    pub initiator_addr_type: u32,
    pub initiator: Vec<u8>,
    pub acceptor_addr_type: u32,
    pub acceptor: Vec<u8>,
    pub application_data: Vec<u8>,
}

impl ChannelBindings {
    /// Bindings that carry only application data, which is what TLS channel bindings use.
    pub fn from_application_data(application_data: impl Into<Vec<u8>>) -> Self {
        Self {
            application_data: application_data.into(),
            ..Default::default()
        }
    }

    pub fn from_bytes<T: AsRef<[u8]>>(data: T) -> Result<Self> {
        let data = data.as_ref();

        if data.len() < SEC_CHANNEL_BINDINGS_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!(
                    "Invalid SEC_CHANNEL_BINDINGS buffer: buffer is too short: {}. Minimum len: {}",
                    data.len(),
                    SEC_CHANNEL_BINDINGS_SIZE,
                ),
            ));
        }

        let mut header = Cursor::new(&data[..SEC_CHANNEL_BINDINGS_SIZE]);

        let initiator_addr_type = header.read_u32::<LittleEndian>()?;
        let initiator = read_field(&mut header, data, "initiator")?;

        let acceptor_addr_type = header.read_u32::<LittleEndian>()?;
        let acceptor = read_field(&mut header, data, "acceptor")?;

        let application_data = read_field(&mut header, data, "application")?;

        Ok(Self {
            initiator_addr_type,
            initiator,
            acceptor_addr_type,
            acceptor,
            application_data,
        })
    }

    /// Serializes the bindings with all payloads laid out right after the fixed-size header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let total_len =
            SEC_CHANNEL_BINDINGS_SIZE + self.initiator.len() + self.acceptor.len() + self.application_data.len();
        let mut buffer = Vec::with_capacity(total_len);
        let mut offset = SEC_CHANNEL_BINDINGS_SIZE;

        buffer.write_u32::<LittleEndian>(self.initiator_addr_type)?;
        write_field(&mut buffer, &mut offset, &self.initiator)?;
        buffer.write_u32::<LittleEndian>(self.acceptor_addr_type)?;
        write_field(&mut buffer, &mut offset, &self.acceptor)?;
        write_field(&mut buffer, &mut offset, &self.application_data)?;

        buffer.write_all(&self.initiator)?;
        buffer.write_all(&self.acceptor)?;
        buffer.write_all(&self.application_data)?;

        Ok(buffer)
    }
}

fn read_field(header: &mut Cursor<&[u8]>, data: &[u8], name: &str) -> Result<Vec<u8>> {
    let len = header.read_u32::<LittleEndian>()? as usize;
    let offset = header.read_u32::<LittleEndian>()? as usize;

    if len == 0 {
        return Ok(Vec::new());
    }

    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(data[offset..end].to_vec()),
        _ => Err(Error::new(
            ErrorKind::InvalidParameter,
            format!(
                "Invalid SEC_CHANNEL_BINDINGS buffer: {} offset + len ({}) goes outside the buffer ({})",
                name,
                offset.saturating_add(len),
                data.len()
            ),
        )),
    }
}

fn write_field(buffer: &mut Vec<u8>, offset: &mut usize, field: &[u8]) -> Result<()> {
    let len = u32::try_from(field.len())
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, "channel bindings field is too large"))?;
    let field_offset = if field.is_empty() { 0 } else { *offset };
    let field_offset = u32::try_from(field_offset)
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, "channel bindings buffer is too large"))?;

    buffer.write_u32::<LittleEndian>(len)?;
    buffer.write_u32::<LittleEndian>(field_offset)?;
    *offset += field.len();

    Ok(())
}
