use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Counterpart of [`Serialize`], for reading existing class files
///
/// Decoding never consults the constant pool: anything which needs a constant looked up is read
/// as an index and resolved later.
pub trait Deserialize: Sized {
    /// Read construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u8()
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Deserialize for i8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_i8()
    }
}

/// Multi-byte numbers are always big endian
macro_rules! big_endian_number {
    ($typ:ty, $write:ident, $read:ident) => {
        impl Serialize for $typ {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }

        impl Deserialize for $typ {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
                reader.$read::<BigEndian>()
            }
        }
    };
}

big_endian_number!(u16, write_u16, read_u16);
big_endian_number!(u32, write_u32, read_u32);
big_endian_number!(u64, write_u64, read_u64);
big_endian_number!(i16, write_i16, read_i16);
big_endian_number!(i32, write_i32, read_i32);
big_endian_number!(i64, write_i64, read_i64);
big_endian_number!(f32, write_f32, read_f32);
big_endian_number!(f64, write_f64, read_f64);

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u16::deserialize(reader)?;
        let mut elems = Vec::with_capacity(len as usize);
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}

/// Read exactly `len` raw bytes
pub fn read_bytes<R: ReadBytesExt>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn length_prefixed_sequences() {
        let mut bytes = vec![];
        vec![1u16, 0xCAFE].serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0, 2, 0, 1, 0xCA, 0xFE]);

        let decoded = Vec::<u16>::deserialize(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(decoded, vec![1, 0xCAFE]);
    }

    #[test]
    fn truncated_input() {
        let mut cursor = Cursor::new(vec![0, 3, 0, 1]);
        assert!(Vec::<u16>::deserialize(&mut cursor).is_err());
    }
}
