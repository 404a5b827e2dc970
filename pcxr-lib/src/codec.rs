//! Fixed-layout encode/decode of the PCXR header and point records.

use crate::error::PcxrError;
use crate::structures::{
    Header, Point, WireHeader, WirePoint, HEADER_SIZE, POINT_STRIDE, POINT_STRIDE_BYTES,
    VERSION,
};
use zerocopy::byteorder::little_endian::{F32, F64, I32, U16, U32};
use zerocopy::{FromBytes, IntoBytes};

#[inline]
fn f32s<const N: usize>(src: [F32; N]) -> [f32; N] {
    src.map(|v| v.get())
}

#[inline]
fn f64s<const N: usize>(src: [F64; N]) -> [f64; N] {
    src.map(|v| v.get())
}

#[inline]
fn wire_f32s<const N: usize>(src: [f32; N]) -> [F32; N] {
    src.map(F32::new)
}

#[inline]
fn wire_f64s<const N: usize>(src: [f64; N]) -> [F64; N] {
    src.map(F64::new)
}

/// Decodes the fixed preamble. The declared offset is returned as stored; callers that
/// seek with it go through [`validate_header`].
pub fn decode_header(bytes: &[u8]) -> Result<Header, PcxrError> {
    if bytes.len() < HEADER_SIZE {
        return Err(PcxrError::TruncatedRecord {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let wire = WireHeader::ref_from_bytes(&bytes[..HEADER_SIZE]).map_err(|_| {
        PcxrError::InvalidHeader("Header bytes could not be mapped".to_string())
    })?;

    Ok(Header {
        version: wire.version.get(),
        point_count: wire.point_count.get(),
        stride: wire.stride.get(),
        offset_to_point_data: wire.offset_to_point_data.get(),
        start_position: f32s(wire.start_position),
        start_rotation: f32s(wire.start_rotation),
        add_intensity_to_color: wire.add_intensity_to_color.get(),
        intensity_as_color: wire.intensity_as_color.get(),
        color_intensity: wire.color_intensity.get(),
        geometry_size: wire.geometry_size.get(),
        user_color_as_color: wire.user_color_as_color.get(),
        bounds_max: f32s(wire.bounds_max),
        bounds_min: f32s(wire.bounds_min),
        scale: f64s(wire.scale),
        offset: f64s(wire.offset),
    })
}

/// Encodes the header. `version` is always written as [`VERSION`] and
/// `offset_to_point_data` as the serialized size.
pub fn encode_header(header: &Header) -> Vec<u8> {
    let wire = WireHeader {
        version: U32::new(VERSION),
        point_count: U32::new(header.point_count),
        stride: U16::new(header.stride),
        offset_to_point_data: U16::new(HEADER_SIZE as u16),
        start_position: wire_f32s(header.start_position),
        start_rotation: wire_f32s(header.start_rotation),
        add_intensity_to_color: I32::new(header.add_intensity_to_color),
        intensity_as_color: I32::new(header.intensity_as_color),
        color_intensity: F32::new(header.color_intensity),
        geometry_size: F32::new(header.geometry_size),
        user_color_as_color: F32::new(header.user_color_as_color),
        bounds_max: wire_f32s(header.bounds_max),
        bounds_min: wire_f32s(header.bounds_min),
        scale: wire_f64s(header.scale),
        offset: wire_f64s(header.offset),
    };
    wire.as_bytes().to_vec()
}

/// Checks the invariants a reader relies on before trusting the header's layout fields.
pub fn validate_header(header: &Header) -> Result<(), PcxrError> {
    if header.offset_to_point_data as usize != HEADER_SIZE {
        return Err(PcxrError::InvalidHeader(format!(
            "Offset to point data is {}, expected {}",
            header.offset_to_point_data, HEADER_SIZE
        )));
    }
    if header.stride as usize != POINT_STRIDE {
        return Err(PcxrError::InvalidHeader(format!(
            "Unsupported stride {}, expected {}",
            header.stride, POINT_STRIDE
        )));
    }
    Ok(())
}

pub fn decode_point(bytes: &[u8], byte_offset: usize) -> Result<Point, PcxrError> {
    let available = bytes.len().saturating_sub(byte_offset);
    if available < POINT_STRIDE_BYTES {
        return Err(PcxrError::TruncatedRecord {
            needed: POINT_STRIDE_BYTES,
            available,
        });
    }
    let record = &bytes[byte_offset..byte_offset + POINT_STRIDE_BYTES];
    let wire = WirePoint::ref_from_bytes(record).map_err(|_| PcxrError::TruncatedRecord {
        needed: POINT_STRIDE_BYTES,
        available,
    })?;
    Ok(Point::from_floats(&f32s(wire.fields)))
}

pub fn encode_point(point: &Point) -> [u8; POINT_STRIDE_BYTES] {
    let mut out = [0u8; POINT_STRIDE_BYTES];
    encode_point_into(point, &mut out);
    out
}

/// Encodes into the first `POINT_STRIDE_BYTES` of `out`.
#[inline]
pub(crate) fn encode_point_into(point: &Point, out: &mut [u8]) {
    let wire = WirePoint {
        fields: wire_f32s(point.to_floats()),
    };
    out[..POINT_STRIDE_BYTES].copy_from_slice(wire.as_bytes());
}
