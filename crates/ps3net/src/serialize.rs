//! Serialize/deserialize protocol structures into/from binary.
//!
//! Every integer is written in network byte order regardless of the host.

use crate::{io_err, res, wire::*};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::{Read, Result};
use std::mem;
use std::ops::Shl;
use tokio::io::{AsyncWrite, AsyncWriteExt};

fn read_exact<R: Read + ?Sized>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf[..]).and(Ok(buf))
}

fn name_len(name: &[u8]) -> Result<u16> {
    u16::try_from(name.len()).map_err(|_| io_err!(InvalidInput, "name too long for the reply"))
}

/// A serializing specific result to overload `<<` on `Result`
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<W: WriteBytesExt> SResult<Encoder<W>> {
    fn written(self) -> Result<usize> {
        self.0.map(|enc| enc.bytes_written())
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for bool {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (*self as u8).encode(w)
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<BigEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<BigEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<BigEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for i64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_i64::<BigEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for Command {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.code << &self.size << &self.count << &self.offset).written()
    }
}

impl Encodable for OpenReadReply {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.size << &self.mtime).written()
    }
}

impl Encodable for FileStatReply {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.size
            << &self.times.mtime
            << &self.times.ctime
            << &self.times.atime
            << &self.is_directory)
            .written()
    }
}

impl Encodable for ShortEntryReply {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let len = name_len(&self.name)?;
        let bytes = (Encoder::new(&mut *w) << &self.size << &len << &self.is_directory).written()?;
        w.write_all(&self.name)?;
        Ok(bytes + self.name.len())
    }
}

impl Encodable for LongEntryReply {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let len = name_len(&self.name)?;
        let bytes = (Encoder::new(&mut *w)
            << &self.size
            << &self.times.mtime
            << &self.times.ctime
            << &self.times.atime
            << &len
            << &self.is_directory)
            .written()?;
        w.write_all(&self.name)?;
        Ok(bytes + self.name.len())
    }
}

/// Fills the fixed name slot; the bytes after the name stay zero.
impl Encodable for Name {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let mut field = [0u8; NAME_FIELD_SIZE];
        field[..self.as_bytes().len()].copy_from_slice(self.as_bytes());
        w.write_all(&field).and(Ok(NAME_FIELD_SIZE))
    }
}

impl Encodable for BatchEntry {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.size << &self.mtime << &self.is_directory << &self.name)
            .written()
    }
}

impl Encodable for DirectoryBatchReply {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        self.entries
            .iter()
            .fold(Encoder::new(w) << &(self.entries.len() as i64), |acc, e| {
                acc << e
            })
            .written()
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for bool {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(r.read_u8()? != 0)
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<BigEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<BigEndian>()
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<BigEndian>()
    }
}

impl Decodable for i64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_i64::<BigEndian>()
    }
}

impl Decodable for Command {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(Command {
            code: Decodable::decode(r)?,
            size: Decodable::decode(r)?,
            count: Decodable::decode(r)?,
            offset: Decodable::decode(r)?,
        })
    }
}

impl Decodable for OpenReadReply {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(OpenReadReply {
            size: Decodable::decode(r)?,
            mtime: Decodable::decode(r)?,
        })
    }
}

impl Decodable for Times {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(Times {
            mtime: Decodable::decode(r)?,
            ctime: Decodable::decode(r)?,
            atime: Decodable::decode(r)?,
        })
    }
}

impl Decodable for FileStatReply {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(FileStatReply {
            size: Decodable::decode(r)?,
            times: Decodable::decode(r)?,
            is_directory: Decodable::decode(r)?,
        })
    }
}

impl Decodable for ShortEntryReply {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let size = Decodable::decode(r)?;
        let len: u16 = Decodable::decode(r)?;
        let is_directory = Decodable::decode(r)?;
        Ok(ShortEntryReply {
            size,
            is_directory,
            name: read_exact(r, len as usize)?,
        })
    }
}

impl Decodable for LongEntryReply {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let size = Decodable::decode(r)?;
        let times = Decodable::decode(r)?;
        let len: u16 = Decodable::decode(r)?;
        let is_directory = Decodable::decode(r)?;
        Ok(LongEntryReply {
            size,
            times,
            is_directory,
            name: read_exact(r, len as usize)?,
        })
    }
}

impl Decodable for Name {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let field = read_exact(r, NAME_FIELD_SIZE)?;
        let end = field
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| io_err!(InvalidData, "unterminated name field"))?;
        Name::new(&field[..end]).map_err(|e| io_err!(InvalidData, e.to_string()))
    }
}

impl Decodable for BatchEntry {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(BatchEntry {
            size: Decodable::decode(r)?,
            mtime: Decodable::decode(r)?,
            is_directory: Decodable::decode(r)?,
            name: Decodable::decode(r)?,
        })
    }
}

impl Decodable for DirectoryBatchReply {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let count: i64 = Decodable::decode(r)?;
        if count < 0 {
            return res!(io_err!(InvalidData, "negative entry count"));
        }
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(Decodable::decode(r)?);
        }
        Ok(DirectoryBatchReply { entries })
    }
}

/// Helper function to read a command header from a byte-oriented buffer
pub fn read_command<R: ReadBytesExt>(r: &mut R) -> Result<Command> {
    Decodable::decode(r)
}

/// Helper function to write a reply into a byte-oriented stream
pub fn write_reply<W: WriteBytesExt, T: Encodable>(w: &mut W, reply: &T) -> Result<usize> {
    reply.encode(w)
}

/// Encode a reply and write it to an async stream in one piece
pub async fn send<W, T>(w: &mut W, reply: &T) -> Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Encodable,
{
    let mut writer = BytesMut::with_capacity(64).writer();
    reply.encode(&mut writer)?;
    let frozen = writer.into_inner().freeze();
    w.write_all(&frozen).await?;
    Ok(frozen.len())
}
