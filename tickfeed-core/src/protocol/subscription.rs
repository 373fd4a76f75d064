//! Client → server subscription request
//!
//! `0xFF`, then a little-endian `u16` count, then `count` little-endian
//! `u16` instrument ids. An empty list means "everything".

use crate::config::constants::SUBSCRIPTION_MARKER;
use crate::core::InstrumentId;
use thiserror::Error;

use super::frame::read_u16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("expected subscription marker 0xFF, found {0:#04x}")]
    BadMarker(u8),

    #[error("too many instruments for one request: {0}")]
    TooMany(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subscription {
    pub instruments: Vec<InstrumentId>,
}

impl Subscription {
    pub fn new(instruments: Vec<InstrumentId>) -> Self {
        Self { instruments }
    }

    /// True when the request covers every instrument
    pub fn is_all(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        3 + self.instruments.len() * 2
    }

    pub fn encode(&self) -> Result<Vec<u8>, SubscriptionError> {
        let count = u16::try_from(self.instruments.len())
            .map_err(|_| SubscriptionError::TooMany(self.instruments.len()))?;

        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(SUBSCRIPTION_MARKER);
        out.extend_from_slice(&count.to_le_bytes());
        for id in &self.instruments {
            out.extend_from_slice(&id.to_le_bytes());
        }
        Ok(out)
    }

    /// Decode one request from the front of `buf`
    ///
    /// Returns `Ok(None)` while the request is incomplete, otherwise the
    /// request and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, SubscriptionError> {
        let Some(&marker) = buf.first() else {
            return Ok(None);
        };
        if marker != SUBSCRIPTION_MARKER {
            return Err(SubscriptionError::BadMarker(marker));
        }
        if buf.len() < 3 {
            return Ok(None);
        }

        let count = usize::from(read_u16(buf, 1));
        let total = 3 + count * 2;
        if buf.len() < total {
            return Ok(None);
        }

        let instruments = (0..count).map(|i| read_u16(buf, 3 + i * 2)).collect();
        Ok(Some((Self { instruments }, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let bytes = Subscription::new(vec![1, 0x0203]).encode().unwrap();
        assert_eq!(bytes, vec![0xFF, 2, 0, 1, 0, 0x03, 0x02]);
    }

    #[test]
    fn test_decode_incomplete() {
        let bytes = Subscription::new(vec![5, 6, 7]).encode().unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(Subscription::decode(&bytes[..cut]).unwrap(), None);
        }
    }

    #[test]
    fn test_decode_complete_with_trailing_bytes() {
        let mut bytes = Subscription::new(vec![5, 6]).encode().unwrap();
        bytes.extend_from_slice(&[0xAB, 0xCD]);

        let (sub, used) = Subscription::decode(&bytes).unwrap().unwrap();
        assert_eq!(sub.instruments, vec![5, 6]);
        assert_eq!(used, 7);
    }

    #[test]
    fn test_bad_marker() {
        assert_eq!(
            Subscription::decode(&[0x01, 0, 0]),
            Err(SubscriptionError::BadMarker(0x01))
        );
    }

    #[test]
    fn test_empty_means_all() {
        let sub = Subscription::default();
        assert!(sub.is_all());
        let bytes = sub.encode().unwrap();
        assert_eq!(bytes, vec![0xFF, 0, 0]);
        let (decoded, used) = Subscription::decode(&bytes).unwrap().unwrap();
        assert!(decoded.is_all());
        assert_eq!(used, 3);
    }
}
