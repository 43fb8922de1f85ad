/// The serial dialect is the only place that knows how messages are laid out
/// on the wire. It packs named commands into checksummed frames and unpacks
/// frames read from the radio back into named arguments, using the message
/// catalogs for the layouts.
use std::convert::TryInto;

use log::trace;

use crate::catalog::{layout_width, Catalog, CatalogEntry, Field, FieldKind};
use crate::error::AntError;
use crate::message::{
    AntMessage, Args, Frame, Value, MESG_CHECKSUM_SIZE, MESG_DATA_OFFSET, MESG_FRAME_SIZE,
    MESG_ID_OFFSET, MESG_MAX_SIZE_VALUE, MESG_SIZE_OFFSET, MESG_TX_SYNC,
};
use crate::Result;

pub use crate::message::{generate_checksum, validate_checksum};

#[derive(Clone, Debug)]
pub struct SerialDialect {
    functions: Catalog,
    callbacks: Catalog,
    decoding: Catalog,
}

impl Default for SerialDialect {
    fn default() -> Self {
        SerialDialect::new()
    }
}

impl SerialDialect {
    /// Dialect using the full command and reply catalogs.
    pub fn new() -> Self {
        SerialDialect::with_catalogs(
            Catalog::functions().clone(),
            Catalog::callbacks().clone(),
        )
    }

    /// `functions` are used to encode outbound messages, `callbacks` to
    /// decode inbound ones. Frames with an id only `functions` knows, such as
    /// an echoed command, decode with the command layout.
    pub fn with_catalogs(functions: Catalog, callbacks: Catalog) -> Self {
        let reply_ids: Vec<u8> = callbacks.entries().map(|e| e.msg_id).collect();
        let decoding = callbacks.merge(&functions.remove_entries(&reply_ids));
        SerialDialect {
            functions,
            callbacks,
            decoding,
        }
    }

    /// A copy of this dialect that no longer decodes the given message ids.
    pub fn masked(&self, msg_ids: &[u8]) -> Self {
        SerialDialect {
            functions: self.functions.clone(),
            callbacks: self.callbacks.remove_entries(msg_ids),
            decoding: self.decoding.remove_entries(msg_ids),
        }
    }

    pub fn functions(&self) -> &Catalog {
        &self.functions
    }

    pub fn callbacks(&self) -> &Catalog {
        &self.callbacks
    }

    /// Encodes a command by id. When several layouts share the id, the one
    /// taking `args.len()` arguments is used.
    pub fn encode(&self, msg_id: u8, args: &[Value]) -> Result<Vec<u8>> {
        let entry = self
            .functions
            .resolve_arity(msg_id, args.len())
            .or_else(|| self.functions.lookup_id(msg_id))
            .ok_or(AntError::UnknownMessage(msg_id))?;
        encode_entry(entry, args)
    }

    /// Encodes a command by its catalog name.
    pub fn encode_named(&self, name: &str, args: &[Value]) -> Result<Vec<u8>> {
        let entry = self
            .functions
            .lookup_name(name)
            .ok_or_else(|| AntError::Encoding(format!("unknown message {}", name)))?;
        encode_entry(entry, args)
    }

    /// Validates and decodes one complete frame. Bytes beyond the fixed width
    /// of the layout are returned as extended data.
    pub fn decode(&self, frame: &[u8]) -> Result<AntMessage> {
        if frame.len() < MESG_FRAME_SIZE {
            return Err(AntError::Malformed(format!("frame too short: {:02x?}", frame)));
        }
        if frame[0] != MESG_TX_SYNC {
            return Err(AntError::Malformed(format!("bad sync byte: {:02x?}", frame)));
        }
        let payload_len = frame[MESG_SIZE_OFFSET] as usize;
        if frame_len(frame) != Some(frame.len()) {
            return Err(AntError::Malformed(format!(
                "length byte {} does not match frame {:02x?}",
                payload_len, frame
            )));
        }
        if !validate_checksum(frame) {
            return Err(AntError::Checksum(frame.to_vec()));
        }
        let msg_id = frame[MESG_ID_OFFSET];
        let entry = self
            .decoding
            .resolve(msg_id, payload_len)
            .ok_or(AntError::UnknownMessage(msg_id))?;
        let (args, extended) = unpack_frame(entry.layout, frame)?;
        let message = AntMessage {
            msg_id,
            name: entry.name,
            args,
            extended,
        };
        trace!("Decoded {}", message);
        Ok(message)
    }
}

fn encode_entry(entry: &CatalogEntry, args: &[Value]) -> Result<Vec<u8>> {
    let payload = pack(entry.layout, args)
        .map_err(|e| AntError::Encoding(format!("{}: {}", entry.name, e)))?;
    Ok(Frame::new(entry.msg_id, &payload).encode())
}

/// Packs arguments into a payload according to `layout`. Padding fields are
/// written as zero and consume no argument.
pub fn pack(layout: &[Field], args: &[Value]) -> Result<Vec<u8>> {
    let expected = layout.iter().filter(|f| f.kind != FieldKind::Pad).count();
    if expected != args.len() {
        return Err(AntError::Encoding(format!(
            "expected {} arguments, got {}",
            expected,
            args.len()
        )));
    }
    let mut payload = Vec::with_capacity(layout_width(layout));
    let mut args = args.iter();
    for field in layout {
        if field.kind == FieldKind::Pad {
            payload.push(0);
            continue;
        }
        // Counted above, there is one argument per non padding field.
        let value = match args.next() {
            Some(value) => value,
            None => break,
        };
        pack_field(field, value, &mut payload)?;
    }
    if payload.len() > MESG_MAX_SIZE_VALUE {
        return Err(AntError::Encoding(format!(
            "payload of {} bytes too large",
            payload.len()
        )));
    }
    Ok(payload)
}

fn pack_field(field: &Field, value: &Value, payload: &mut Vec<u8>) -> Result<()> {
    if let FieldKind::Bytes(width) = field.kind {
        let bytes = value.as_bytes().ok_or_else(|| {
            AntError::Encoding(format!("{} expects bytes, got {:?}", field.name, value))
        })?;
        if bytes.len() > width {
            return Err(AntError::Encoding(format!(
                "{} holds {} bytes, got {}",
                field.name,
                width,
                bytes.len()
            )));
        }
        payload.extend_from_slice(bytes);
        payload.resize(payload.len() + width - bytes.len(), 0);
        return Ok(());
    }
    let integer = value.as_u64().ok_or_else(|| {
        AntError::Encoding(format!("{} expects an integer, got {:?}", field.name, value))
    })?;
    let width = field.kind.width();
    let max = if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    };
    if field.kind == FieldKind::Bool && integer > 1 {
        return Err(AntError::Encoding(format!(
            "{} expects a boolean, got {}",
            field.name, integer
        )));
    }
    if integer > max {
        return Err(AntError::Encoding(format!(
            "{} value {} does not fit in {} bytes",
            field.name, integer, width
        )));
    }
    payload.extend_from_slice(&integer.to_le_bytes()[..width]);
    Ok(())
}

/// Unpacks the fixed part of a payload. `payload` must be at least as wide
/// as the layout; extra bytes are ignored.
pub fn unpack(layout: &[Field], payload: &[u8]) -> Result<Args> {
    let width = layout_width(layout);
    if payload.len() < width {
        return Err(AntError::Malformed(format!(
            "payload of {} bytes shorter than layout width {}",
            payload.len(),
            width
        )));
    }
    let mut args = Args::new();
    let mut offset = 0;
    for field in layout {
        let bytes = &payload[offset..offset + field.kind.width()];
        offset += bytes.len();
        let value = match field.kind {
            FieldKind::Pad => continue,
            FieldKind::U8 => Value::U8(bytes[0]),
            FieldKind::Bool => Value::Bool(bytes[0] != 0),
            FieldKind::U16 => Value::U16(u16::from_le_bytes(fixed(bytes)?)),
            FieldKind::U32 => Value::U32(u32::from_le_bytes(fixed(bytes)?)),
            FieldKind::U64 => Value::U64(u64::from_le_bytes(fixed(bytes)?)),
            FieldKind::Bytes(_) => Value::Bytes(bytes.to_vec()),
        };
        args.push(field.name, value);
    }
    Ok(args)
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| AntError::Malformed(format!("expected {} bytes, got {}", N, bytes.len())))
}

/// Unpacks a whole frame (sync, length, id, payload, checksum) into the
/// arguments of its fixed layout and its extended tail. The checksum is not
/// checked here.
pub fn unpack_frame(layout: &[Field], frame: &[u8]) -> Result<(Args, Vec<u8>)> {
    let width = layout_width(layout);
    let end = frame.len().saturating_sub(MESG_CHECKSUM_SIZE);
    if end < MESG_DATA_OFFSET + width {
        return Err(AntError::Malformed(format!(
            "frame {:02x?} shorter than layout width {}",
            frame, width
        )));
    }
    let args = unpack(layout, &frame[MESG_DATA_OFFSET..end])?;
    Ok((args, extract_extended_data(width, frame).to_vec()))
}

/// Bytes of `frame` between the end of a `width` byte fixed payload and the
/// checksum. Empty when the frame carries no extended data.
pub fn extract_extended_data(width: usize, frame: &[u8]) -> &[u8] {
    let start = MESG_DATA_OFFSET + width;
    let end = frame.len().saturating_sub(MESG_CHECKSUM_SIZE);
    if start >= end {
        return &[];
    }
    &frame[start..end]
}

/// `frame` without its extended data: header and fixed payload followed by
/// the trailing checksum byte. The length byte is left as it was.
pub fn remove_extended_data(width: usize, frame: &[u8]) -> Vec<u8> {
    let start = MESG_DATA_OFFSET + width;
    let end = frame.len().saturating_sub(MESG_CHECKSUM_SIZE);
    if start >= end {
        return frame.to_vec();
    }
    let mut result = frame[..start].to_vec();
    result.extend_from_slice(&frame[end..]);
    result
}

/// Encodes a reply frame from the callback catalog. Mostly useful to script a
/// fake radio.
pub fn encode_reply(name: &str, args: &[Value]) -> Result<Vec<u8>> {
    let entry = Catalog::callbacks()
        .lookup_name(name)
        .ok_or_else(|| AntError::Encoding(format!("unknown reply {}", name)))?;
    encode_entry(entry, args)
}

/// Frame length implied by the length byte of a (possibly partial) frame.
pub fn frame_len(frame: &[u8]) -> Option<usize> {
    frame
        .get(MESG_SIZE_OFFSET)
        .map(|&len| len as usize + MESG_FRAME_SIZE)
}
