// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bounds-checked cursor helpers backing the [encdec] implementations for
//! CryptoNote structures (varint-prefixed containers, fixed width blobs).

use alloc::vec::Vec;

use encdec::Encode;

use super::varint;
use crate::{crypto::Key, engine::Error};

/// Serialization target, either a buffer or a length counter
pub struct Writer<'a> {
    buff: Option<&'a mut [u8]>,
    index: usize,
}

impl<'a> Writer<'a> {
    /// Create a writer over the provided buffer
    pub fn new(buff: &'a mut [u8]) -> Self {
        Self {
            buff: Some(buff),
            index: 0,
        }
    }

    /// Create a writer that only counts bytes
    pub fn counter() -> Writer<'static> {
        Writer {
            buff: None,
            index: 0,
        }
    }

    /// Bytes written
    pub fn len(&self) -> usize {
        self.index
    }

    /// Check whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.index == 0
    }

    /// Write raw bytes
    pub fn put(&mut self, d: &[u8]) -> Result<(), Error> {
        if let Some(b) = self.buff.as_deref_mut() {
            if b.len() < self.index + d.len() {
                return Err(Error::InvalidLength);
            }
            b[self.index..][..d.len()].copy_from_slice(d);
        }
        self.index += d.len();
        Ok(())
    }

    /// Write a single byte
    pub fn byte(&mut self, v: u8) -> Result<(), Error> {
        self.put(&[v])
    }

    /// Write a varint
    pub fn varint(&mut self, v: u64) -> Result<(), Error> {
        let (b, n) = varint::to_bytes(v);
        self.put(&b[..n])
    }

    /// Write a little-endian u32
    pub fn u32(&mut self, v: u32) -> Result<(), Error> {
        self.put(&v.to_le_bytes())
    }

    /// Write a little-endian u64
    pub fn u64(&mut self, v: u64) -> Result<(), Error> {
        self.put(&v.to_le_bytes())
    }

    /// Write a boolean as a single byte
    pub fn bool(&mut self, v: bool) -> Result<(), Error> {
        self.byte(v as u8)
    }

    /// Write a varint length prefixed blob
    pub fn blob(&mut self, d: &[u8]) -> Result<(), Error> {
        self.varint(d.len() as u64)?;
        self.put(d)
    }

    /// Write a varint length prefixed container of keys
    pub fn keys(&mut self, keys: &[Key]) -> Result<(), Error> {
        self.varint(keys.len() as u64)?;
        for k in keys {
            self.put(k)?;
        }
        Ok(())
    }

    /// Write an optional key with a presence byte
    pub fn opt_key(&mut self, k: Option<&Key>) -> Result<(), Error> {
        match k {
            Some(k) => {
                self.byte(1)?;
                self.put(k)
            }
            None => self.byte(0),
        }
    }

    /// Write an optional blob with a presence byte
    pub fn opt_blob(&mut self, d: Option<&[u8]>) -> Result<(), Error> {
        match d {
            Some(d) => {
                self.byte(1)?;
                self.blob(d)
            }
            None => self.byte(0),
        }
    }
}

/// Deserialization cursor
pub struct Reader<'a> {
    buff: &'a [u8],
    index: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buff: &'a [u8]) -> Self {
        Self { buff, index: 0 }
    }

    /// Bytes consumed
    pub fn position(&self) -> usize {
        self.index
    }

    /// Take `n` raw bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buff.len() < self.index + n {
            return Err(Error::InvalidLength);
        }
        let d = &self.buff[self.index..][..n];
        self.index += n;
        Ok(d)
    }

    pub fn byte(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn varint(&mut self) -> Result<u64, Error> {
        let (v, n) = varint::decode(&self.buff[self.index..])?;
        self.index += n;
        Ok(v)
    }

    pub fn key(&mut self) -> Result<Key, Error> {
        let mut k = [0u8; 32];
        k.copy_from_slice(self.take(32)?);
        Ok(k)
    }

    /// Read a strict boolean byte
    pub fn bool(&mut self) -> Result<bool, Error> {
        match self.byte()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::EncodingFailed),
        }
    }

    /// Read a varint length prefixed blob of at most `max` bytes
    pub fn blob(&mut self, max: usize) -> Result<&'a [u8], Error> {
        let n = self.count(max)?;
        self.take(n)
    }

    /// Read a container of keys, bounded by `max` entries
    pub fn keys(&mut self, max: usize) -> Result<Vec<Key>, Error> {
        let n = self.count(max)?;
        (0..n).map(|_| self.key()).collect()
    }

    /// Read an optional key written with [Writer::opt_key]
    pub fn opt_key(&mut self) -> Result<Option<Key>, Error> {
        match self.bool()? {
            true => self.key().map(Some),
            false => Ok(None),
        }
    }

    /// Read an optional blob written with [Writer::opt_blob]
    pub fn opt_blob(&mut self, max: usize) -> Result<Option<&'a [u8]>, Error> {
        match self.bool()? {
            true => self.blob(max).map(Some),
            false => Ok(None),
        }
    }

    /// Read a container length, bounded by `max` entries
    pub fn count(&mut self, max: usize) -> Result<usize, Error> {
        let n = self.varint()?;
        if n > max as u64 {
            return Err(Error::InvalidLength);
        }
        Ok(n as usize)
    }
}

/// Serialize an object to a newly allocated buffer
pub fn to_vec<T: Encode<Error = Error>>(v: &T) -> Result<Vec<u8>, Error> {
    let mut buff = alloc::vec![0u8; v.encode_len()?];
    let n = v.encode(&mut buff)?;
    buff.truncate(n);
    Ok(buff)
}

/// Implement [encdec::Encode] via a `write(&self, &mut Writer)` method
macro_rules! encode_via_writer {
    ($t:ty) => {
        impl encdec::Encode for $t {
            type Error = $crate::engine::Error;

            fn encode_len(&self) -> Result<usize, Self::Error> {
                let mut w = $crate::xmr::codec::Writer::counter();
                self.write(&mut w)?;
                Ok(w.len())
            }

            fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
                let mut w = $crate::xmr::codec::Writer::new(buff);
                self.write(&mut w)?;
                Ok(w.len())
            }
        }
    };
}
pub(crate) use encode_via_writer;

/// Implement [encdec::DecodeOwned] via a `read(&mut Reader)` constructor
macro_rules! decode_via_reader {
    ($t:ty) => {
        impl encdec::DecodeOwned for $t {
            type Output = $t;
            type Error = $crate::engine::Error;

            fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
                let mut r = $crate::xmr::codec::Reader::new(buff);
                let v = <$t>::read(&mut r)?;
                Ok((v, r.position()))
            }
        }
    };
}
pub(crate) use decode_via_reader;
