//! 长度前缀 + JSON 的消息帧编解码
//!
//! 帧格式为4字节大端长度，后跟JSON正文。单个帧内容损坏或超长时，解码器
//! 产出 `Err(DecodeError)` 条目而不是流错误，连接可以继续读取后续帧。

use std::io;
use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use gateway_errors::DecodeError;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// 默认的单帧上限
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const HEADER_LEN: usize = 4;

pub struct JsonFrameCodec<D> {
    max_frame_bytes: usize,
    discarding: usize,
    _marker: PhantomData<fn() -> D>,
}

impl<D> JsonFrameCodec<D> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            discarding: 0,
            _marker: PhantomData,
        }
    }
}

impl<D> Default for JsonFrameCodec<D> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<D: DeserializeOwned> Decoder for JsonFrameCodec<D> {
    type Item = Result<D, DecodeError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.discarding > 0 {
            let skip = self.discarding.min(src.len());
            src.advance(skip);
            self.discarding -= skip;
            if self.discarding > 0 {
                return Ok(None);
            }
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut length_bytes = [0u8; HEADER_LEN];
        length_bytes.copy_from_slice(&src[..HEADER_LEN]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > self.max_frame_bytes {
            src.advance(HEADER_LEN);
            self.discarding = length;
            return Ok(Some(Err(DecodeError::FrameTooLarge {
                length,
                max: self.max_frame_bytes,
            })));
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let frame = src.split_to(length);
        Ok(Some(decode_message(&frame)))
    }
}

impl<D, E: Serialize> Encoder<E> for JsonFrameCodec<D> {
    type Error = io::Error;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = serde_json::to_vec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        if encoded.len() > self.max_frame_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame of length {} is too large", encoded.len()),
            ));
        }

        dst.reserve(HEADER_LEN + encoded.len());
        dst.put_u32(encoded.len() as u32);
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}

/// 解析单个帧正文
pub fn decode_message<D: DeserializeOwned>(frame: &[u8]) -> Result<D, DecodeError> {
    serde_json::from_slice(frame).map_err(DecodeError::from)
}
