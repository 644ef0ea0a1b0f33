//! Extend AsyncRead and AsyncWrite with some convenience methods for binary i/o
//!
use std::io;

use async_trait::async_trait;
use futures::{io as aio, AsyncReadExt, AsyncWriteExt};
use gridfuse::{Error, Result};
use unsigned_varint::{
    aio::read_u64 as varint_read_u64,
    encode::{u64 as varint_encode_u64, u64_buffer as varint_u64_buffer},
};

#[async_trait]
pub(crate) trait ExtendedAsyncRead: aio::AsyncRead {
    /// Read a byte from a stream
    async fn read_byte(&mut self) -> io::Result<u8>;

    /// Read a Big Endian encoded 16 bit unsigned integer from a stream
    async fn read_u16(&mut self) -> io::Result<u16>;

    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    async fn read_u32(&mut self) -> io::Result<u32>;

    /// Read a varint length-prefixed UTF-8 string from a stream
    async fn read_str(&mut self) -> Result<String>;
}

#[async_trait]
impl<R: aio::AsyncRead + Unpin + Send> ExtendedAsyncRead for R {
    async fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0; 1];
        self.read_exact(&mut buffer).await?;

        Ok(buffer[0])
    }

    async fn read_u16(&mut self) -> io::Result<u16> {
        let mut buffer = [0; 2];
        self.read_exact(&mut buffer).await?;

        Ok(u16::from_be_bytes(buffer))
    }

    async fn read_u32(&mut self) -> io::Result<u32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer).await?;

        Ok(u32::from_be_bytes(buffer))
    }

    async fn read_str(&mut self) -> Result<String> {
        let len = varint_read_u64(&mut *self)
            .await
            .map_err(|err| Error::Corrupt(err.to_string()))?;
        // The length prefix comes from untrusted bytes, so cap the
        // pre-allocation; read_to_end grows as needed for longer strings.
        let mut bytes = Vec::with_capacity(len.min(4096) as usize);
        self.take(len).read_to_end(&mut bytes).await?;
        if bytes.len() as u64 != len {
            return Err(Error::Corrupt("truncated string".into()));
        }

        String::from_utf8(bytes).map_err(|err| Error::Corrupt(err.to_string()))
    }
}

#[async_trait]
pub(crate) trait ExtendedAsyncWrite: aio::AsyncWrite {
    /// Write a byte to a stream
    async fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Write a Big Endian encoded 16 bit unsigned integer to a stream
    async fn write_u16(&mut self, word: u16) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    async fn write_u32(&mut self, word: u32) -> io::Result<()>;

    /// Write a varint length-prefixed UTF-8 string to a stream
    async fn write_str(&mut self, value: &str) -> io::Result<()>;
}

#[async_trait]
impl<W: aio::AsyncWrite + Unpin + Send> ExtendedAsyncWrite for W {
    async fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let buffer = [byte];
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_u16(&mut self, word: u16) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_u32(&mut self, word: u32) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_str(&mut self, value: &str) -> io::Result<()> {
        let mut varint_buf = varint_u64_buffer();
        self.write_all(varint_encode_u64(value.len() as u64, &mut varint_buf))
            .await?;
        self.write_all(value.as_bytes()).await?;

        Ok(())
    }
}
