use std::borrow::Cow;
use zerocopy::byteorder::little_endian::{F32, F64, I32, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const VERSION: u32 = 1;
/// Floats per point record.
pub const POINT_STRIDE: usize = 24;
pub const POINT_STRIDE_BYTES: usize = POINT_STRIDE * size_of::<f32>();
pub const HEADER_SIZE: usize = size_of::<WireHeader>();

// Float slots of a record, in file order.
pub(crate) const FIELD_X: usize = 0;
pub(crate) const FIELD_RED: usize = 3;
pub(crate) const FIELD_DELETED: usize = 7;
pub(crate) const FIELD_SELECTED: usize = 8;
pub(crate) const FIELD_INTENSITY: usize = 9;
pub(crate) const FIELD_CLASSIFICATION: usize = 10;
pub(crate) const FIELD_ID: usize = 11;
pub(crate) const FIELD_USER_RED: usize = 12;
pub(crate) const FIELD_POINT_SOURCE_ID: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub version: u32,
    pub point_count: u32,
    /// Floats per record, not bytes.
    pub stride: u16,
    pub offset_to_point_data: u16,
    pub start_position: [f32; 3],
    /// w, x, y, z
    pub start_rotation: [f32; 4],
    pub add_intensity_to_color: i32,
    pub intensity_as_color: i32,
    pub color_intensity: f32,
    pub geometry_size: f32,
    pub user_color_as_color: f32,
    pub bounds_max: [f32; 3],
    pub bounds_min: [f32; 3],
    pub scale: [f64; 3],
    pub offset: [f64; 3],
}

impl Header {
    pub fn new(point_count: u32) -> Self {
        Header {
            version: VERSION,
            point_count,
            stride: POINT_STRIDE as u16,
            offset_to_point_data: HEADER_SIZE as u16,
            start_position: [0.0; 3],
            start_rotation: [1.0, 0.0, 0.0, 0.0],
            add_intensity_to_color: 0,
            intensity_as_color: 0,
            color_intensity: 0.0,
            geometry_size: 1.0,
            user_color_as_color: 0.0,
            bounds_max: [0.0; 3],
            bounds_min: [0.0; 3],
            scale: [1.0; 3],
            offset: [0.0; 3],
        }
    }

    #[inline]
    pub fn stride_bytes(&self) -> usize {
        self.stride as usize * size_of::<f32>()
    }

    /// Byte length of the point-data region.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.stride_bytes() * self.point_count as usize
    }
}

impl Default for Header {
    fn default() -> Self {
        Header::new(0)
    }
}

/// One decoded record. Every field is float-encoded on disk, flags as 0.0/1.0.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
    pub deleted: f32,
    pub selected: f32,
    pub intensity_normalized: f32,
    pub classification: f32,
    pub id: f32,
    pub user_red: f32,
    pub user_green: f32,
    pub user_blue: f32,
    pub user_alpha: f32,
    pub scan_angle_rank: f32,
    pub user_data: f32,
    pub point_source_id: f32,
    pub gps_time: f32,
    pub visible: f32,
    pub padding: [f32; 3],
}

#[inline]
pub(crate) const fn flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}

impl Point {
    pub fn at(x: f32, y: f32, z: f32, id: u32) -> Self {
        Point {
            x,
            y,
            z,
            alpha: 1.0,
            id: id as f32,
            visible: 1.0,
            ..Default::default()
        }
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = flag(selected);
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = flag(deleted);
        self
    }

    pub fn with_class(mut self, class: u8) -> Self {
        self.classification = class as f32;
        self
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted != 0.0
    }

    #[inline]
    pub fn is_selected(&self) -> bool {
        self.selected != 0.0
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible != 0.0
    }

    #[inline]
    pub fn class_code(&self) -> u8 {
        self.classification.clamp(0.0, 255.0) as u8
    }

    #[inline]
    pub fn point_id(&self) -> u32 {
        self.id as u32
    }

    pub fn to_floats(&self) -> [f32; POINT_STRIDE] {
        [
            self.x,
            self.y,
            self.z,
            self.red,
            self.green,
            self.blue,
            self.alpha,
            self.deleted,
            self.selected,
            self.intensity_normalized,
            self.classification,
            self.id,
            self.user_red,
            self.user_green,
            self.user_blue,
            self.user_alpha,
            self.scan_angle_rank,
            self.user_data,
            self.point_source_id,
            self.gps_time,
            self.visible,
            self.padding[0],
            self.padding[1],
            self.padding[2],
        ]
    }

    pub fn from_floats(f: &[f32; POINT_STRIDE]) -> Self {
        Point {
            x: f[0],
            y: f[1],
            z: f[2],
            red: f[3],
            green: f[4],
            blue: f[5],
            alpha: f[6],
            deleted: f[7],
            selected: f[8],
            intensity_normalized: f[9],
            classification: f[10],
            id: f[11],
            user_red: f[12],
            user_green: f[13],
            user_blue: f[14],
            user_alpha: f[15],
            scan_angle_rank: f[16],
            user_data: f[17],
            point_source_id: f[18],
            gps_time: f[19],
            visible: f[20],
            padding: [f[21], f[22], f[23]],
        }
    }
}

/// Decoded records held in host memory before upload.
#[derive(Debug, Clone, PartialEq)]
pub enum PointCloud {
    /// `count * POINT_STRIDE` floats.
    Floats(Vec<f32>),
    /// Little-endian record bytes, as found in the file's point-data region.
    Bytes(Vec<u8>),
}

impl PointCloud {
    pub fn len(&self) -> usize {
        match self {
            PointCloud::Floats(f) => f.len() / POINT_STRIDE,
            PointCloud::Bytes(b) => b.len() / POINT_STRIDE_BYTES,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn point(&self, index: usize) -> Option<Point> {
        if index >= self.len() {
            return None;
        }
        match self {
            PointCloud::Floats(f) => {
                let start = index * POINT_STRIDE;
                let rec: &[f32; POINT_STRIDE] = f[start..start + POINT_STRIDE].try_into().ok()?;
                Some(Point::from_floats(rec))
            }
            PointCloud::Bytes(b) => {
                crate::codec::decode_point(b, index * POINT_STRIDE_BYTES).ok()
            }
        }
    }

    /// Float view of the records. Borrows when the bytes are already aligned little-endian floats.
    pub fn as_floats(&self) -> Cow<'_, [f32]> {
        match self {
            PointCloud::Floats(f) => Cow::Borrowed(f.as_slice()),
            PointCloud::Bytes(b) => {
                if cfg!(target_endian = "little") {
                    if let Ok(view) = <[f32]>::ref_from_bytes(b.as_slice()) {
                        return Cow::Borrowed(view);
                    }
                }
                Cow::Owned(
                    b.chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                )
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PointCloud::Floats(f) => f.iter().flat_map(|v| v.to_le_bytes()).collect(),
            PointCloud::Bytes(b) => b.clone(),
        }
    }
}

/// On-disk header, 132 bytes with no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct WireHeader {
    pub version: U32,
    pub point_count: U32,
    pub stride: U16,
    pub offset_to_point_data: U16,
    pub start_position: [F32; 3],
    pub start_rotation: [F32; 4],
    pub add_intensity_to_color: I32,
    pub intensity_as_color: I32,
    pub color_intensity: F32,
    pub geometry_size: F32,
    pub user_color_as_color: F32,
    pub bounds_max: [F32; 3],
    pub bounds_min: [F32; 3],
    pub scale: [F64; 3],
    pub offset: [F64; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct WirePoint {
    pub fields: [F32; POINT_STRIDE],
}
