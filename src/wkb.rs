//! GeoPackage geometry blobs.
//!
//! A blob is a small header (`GP`, version, flags, srs id), an optional
//! envelope whose size is picked by the flags, and a standard WKB payload.
//!
//! Further reading: <https://www.geopackage.org/spec/#gpb_format>

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use geo::{BoundingRect, Geometry};
use geozero::{ToGeo, wkb::Wkb};

use crate::error::DecodeError;
use crate::filter::Envelope;

/// Envelope sizes in bytes, indexed by the envelope indicator.
const ENVELOPE_LENGTH: [usize; 5] = [0, 32, 48, 48, 64];
const HEADER_LENGTH: usize = 8;
const LITTLE_ENDIAN_FLAG: u8 = 0b1;
const EMPTY_FLAG: u8 = 0b1_0000;

const WKB_MULTIPOLYGON: u32 = 6;
const WKB_GEOMETRYCOLLECTION: u32 = 7;

fn truncated() -> DecodeError {
    DecodeError::Truncated(std::io::ErrorKind::UnexpectedEof.into())
}

/// Offset of the WKB payload inside a GeoPackage blob.
pub fn payload_offset(blob: &[u8]) -> Result<usize, DecodeError> {
    if blob.len() < HEADER_LENGTH {
        return Err(truncated());
    }
    if &blob[0..2] != b"GP" {
        return Err(DecodeError::BadMagic([blob[0], blob[1]]));
    }

    let flags = blob[3];
    let envelope = (flags >> 1) & 0b111;
    let envelope_len = ENVELOPE_LENGTH
        .get(envelope as usize)
        .ok_or(DecodeError::InvalidEnvelope(envelope))?;

    Ok(HEADER_LENGTH + envelope_len)
}

/// The xy envelope stored in the blob header, if the writer included one.
pub fn header_envelope(blob: &[u8]) -> Result<Option<Envelope>, DecodeError> {
    let offset = payload_offset(blob)?;
    if offset == HEADER_LENGTH {
        return Ok(None);
    }

    let bytes = blob.get(HEADER_LENGTH..HEADER_LENGTH + 32).ok_or_else(truncated)?;
    let mut values = [0f64; 4];
    if blob[3] & LITTLE_ENDIAN_FLAG != 0 {
        LittleEndian::read_f64_into(bytes, &mut values);
    } else {
        BigEndian::read_f64_into(bytes, &mut values);
    }

    Ok(Some(Envelope {
        min_x: values[0],
        max_x: values[1],
        min_y: values[2],
        max_y: values[3],
    }))
}

/// Bounding box of a blob, from its header when present and from the decoded
/// geometry otherwise. `None` for empty or unreadable blobs.
pub fn blob_envelope(blob: &[u8]) -> Option<Envelope> {
    if let Ok(Some(envelope)) = header_envelope(blob) {
        return Some(envelope);
    }

    let rect = decode_blob(blob).ok()??.bounding_rect()?;
    Some(Envelope {
        min_x: rect.min().x,
        max_x: rect.max().x,
        min_y: rect.min().y,
        max_y: rect.max().y,
    })
}

/// Decodes a GeoPackage geometry blob. Blobs flagged as empty produce `None`.
pub fn decode_blob(blob: &[u8]) -> Result<Option<Geometry<f64>>, DecodeError> {
    let offset = payload_offset(blob)?;

    if blob[3] & EMPTY_FLAG != 0 {
        return Ok(None);
    }

    let payload = blob.get(offset..).ok_or_else(truncated)?;

    decode_wkb(payload).map(Some)
}

/// Decodes an ISO WKB payload. Z and M ordinates are dropped.
pub fn decode_wkb(payload: &[u8]) -> Result<Geometry<f64>, DecodeError> {
    match geometry_type(payload)? {
        1..=WKB_MULTIPOLYGON => (),
        WKB_GEOMETRYCOLLECTION => return Err(DecodeError::GeometryCollection),
        code => return Err(DecodeError::UnsupportedGeometry(code)),
    }

    match Wkb(payload.to_vec()).to_geo()? {
        Geometry::GeometryCollection(_) => Err(DecodeError::GeometryCollection),
        geometry => Ok(geometry),
    }
}

/// Base geometry type of a WKB payload, with the ISO 1000/2000/3000
/// dimension offsets removed.
fn geometry_type(mut payload: &[u8]) -> Result<u32, DecodeError> {
    let code = match payload.read_u8()? {
        0 => payload.read_u32::<BigEndian>()?,
        _ => payload.read_u32::<LittleEndian>()?,
    };

    if code / 1000 > 3 {
        return Err(DecodeError::UnsupportedGeometry(code));
    }

    Ok(code % 1000)
}
