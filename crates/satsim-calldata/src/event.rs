use crate::error::CalldataError;
use crate::reader::BinaryReader;
use crate::writer::BinaryWriter;

/// An event emitted by a module. The payload is opaque to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: String,
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

/// Encode an event list the way `getEvents` returns it:
/// u16 count, then `string(type) ‖ bytes(data)` per event.
pub fn encode_events(events: &[Event]) -> Result<Vec<u8>, CalldataError> {
    let count = u16::try_from(events.len()).map_err(|_| CalldataError::LengthOverflow(events.len()))?;
    let mut writer = BinaryWriter::new();
    writer.write_u16(count);
    for event in events {
        writer.write_string_with_length(&event.event_type)?;
        writer.write_bytes_with_length(&event.data)?;
    }
    Ok(writer.into_vec())
}

pub fn decode_events(data: &[u8]) -> Result<Vec<Event>, CalldataError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = BinaryReader::new(data);
    let count = reader.read_u16()?;
    let mut events = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let event_type = reader.read_string_with_length()?;
        let data = reader.read_bytes_with_length()?;
        events.push(Event { event_type, data });
    }
    Ok(events)
}
