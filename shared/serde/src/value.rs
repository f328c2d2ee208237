use crate::{ByteReader, ByteWriter, SerdeError};

/// Tolerance used when comparing replicated floating-point values.
/// Assignments within this tolerance are treated as unchanged and do not
/// generate sync traffic.
pub const FLOAT_EPSILON: f32 = 1e-5;

/// A value that can travel on the weft wire.
///
/// `wire_eq` is the equality used to gate dirty-marking: exact for integers,
/// booleans and strings, approximate for floats and the vector types.
pub trait WireValue: Clone + Send + Sync + 'static {
    fn encode(&self, writer: &mut ByteWriter);
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError>
    where
        Self: Sized;
    fn wire_eq(&self, other: &Self) -> bool;
}

macro_rules! exact_wire_value {
    ($ty:ty, $write:ident, $read:ident) => {
        impl WireValue for $ty {
            fn encode(&self, writer: &mut ByteWriter) {
                writer.$write(*self);
            }
            fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
                reader.$read()
            }
            fn wire_eq(&self, other: &Self) -> bool {
                self == other
            }
        }
    };
}

exact_wire_value!(bool, write_bool, read_bool);
exact_wire_value!(u8, write_u8, read_u8);
exact_wire_value!(u16, write_u16, read_u16);
exact_wire_value!(u32, write_u32, read_u32);

impl WireValue for u64 {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_var_u64(*self);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        reader.read_var_u64()
    }
    fn wire_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl WireValue for i32 {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u32(*self as u32);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        Ok(reader.read_u32()? as i32)
    }
    fn wire_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl WireValue for i64 {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u64(*self as u64);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        Ok(reader.read_u64()? as i64)
    }
    fn wire_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl WireValue for f32 {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_f32(*self);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        reader.read_f32()
    }
    fn wire_eq(&self, other: &Self) -> bool {
        (self - other).abs() <= FLOAT_EPSILON
    }
}

impl WireValue for f64 {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_f64(*self);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        reader.read_f64()
    }
    fn wire_eq(&self, other: &Self) -> bool {
        (self - other).abs() <= f64::from(FLOAT_EPSILON)
    }
}

impl WireValue for String {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_string(self);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        reader.read_string()
    }
    fn wire_eq(&self, other: &Self) -> bool {
        self == other
    }
}

/// A replicated three-component vector.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl WireValue for Vector3 {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_f32(self.x);
        writer.write_f32(self.y);
        writer.write_f32(self.z);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        Ok(Self {
            x: reader.read_f32()?,
            y: reader.read_f32()?,
            z: reader.read_f32()?,
        })
    }
    fn wire_eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() <= FLOAT_EPSILON
            && (self.y - other.y).abs() <= FLOAT_EPSILON
            && (self.z - other.z).abs() <= FLOAT_EPSILON
    }
}

/// A replicated rotation. Compared component-wise; `q` and `-q` are treated
/// as distinct since drivers may care about the sign.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

impl Quaternion {
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl WireValue for Quaternion {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_f32(self.x);
        writer.write_f32(self.y);
        writer.write_f32(self.z);
        writer.write_f32(self.w);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        Ok(Self {
            x: reader.read_f32()?,
            y: reader.read_f32()?,
            z: reader.read_f32()?,
            w: reader.read_f32()?,
        })
    }
    fn wire_eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() <= FLOAT_EPSILON
            && (self.y - other.y).abs() <= FLOAT_EPSILON
            && (self.z - other.z).abs() <= FLOAT_EPSILON
            && (self.w - other.w).abs() <= FLOAT_EPSILON
    }
}

/// A replicated linear RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for ColorRgba {
    fn default() -> Self {
        Self {
            r: 0.0,
            g: 0.0,
            b: 0.0,
            a: 1.0,
        }
    }
}

impl ColorRgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl WireValue for ColorRgba {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_f32(self.r);
        writer.write_f32(self.g);
        writer.write_f32(self.b);
        writer.write_f32(self.a);
    }
    fn decode(reader: &mut ByteReader) -> Result<Self, SerdeError> {
        Ok(Self {
            r: reader.read_f32()?,
            g: reader.read_f32()?,
            b: reader.read_f32()?,
            a: reader.read_f32()?,
        })
    }
    fn wire_eq(&self, other: &Self) -> bool {
        (self.r - other.r).abs() <= FLOAT_EPSILON
            && (self.g - other.g).abs() <= FLOAT_EPSILON
            && (self.b - other.b).abs() <= FLOAT_EPSILON
            && (self.a - other.a).abs() <= FLOAT_EPSILON
    }
}
