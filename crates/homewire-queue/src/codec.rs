//! Big-endian binary encoding of persisted queues.
//!
//! Integers are big-endian, strings carry a `u32` length prefix and packets a
//! `u8` length prefix.

use bytes::{Buf, BufMut};

use crate::error::PersistError;

#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn string(&mut self, v: &str) {
        self.blob_u32(v.as_bytes());
    }

    /// `u32` length prefix followed by the bytes.
    pub fn blob_u32(&mut self, v: &[u8]) {
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v);
    }

    /// `u8` length prefix followed by at most 255 bytes.
    pub fn blob_u8(&mut self, v: &[u8]) {
        let len = v.len().min(usize::from(u8::MAX));
        self.buf.put_u8(len as u8);
        self.buf.put_slice(&v[..len]);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), PersistError> {
        if self.buf.remaining() < n {
            return Err(PersistError::Truncated);
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, PersistError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> Result<bool, PersistError> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32, PersistError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn string(&mut self) -> Result<String, PersistError> {
        let bytes = self.blob_u32()?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn blob_u32(&mut self) -> Result<&'a [u8], PersistError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn blob_u8(&mut self) -> Result<&'a [u8], PersistError> {
        let len = usize::from(self.u8()?);
        self.take(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PersistError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
