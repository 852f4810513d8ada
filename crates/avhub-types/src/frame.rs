//! Canonical bus frame.
//!
//! Bus-oriented adapters convert between their wire format and a [`Frame`] at
//! their own boundary. The hub never retains frames; the [`Display`] rendering
//! exists for logging and diagnostics only.
//!
//! [`Display`]: std::fmt::Display

use std::fmt;

use crate::HubError;

/// Largest payload a frame may carry (classic CAN).
pub const MAX_FRAME_LEN: usize = 8;

/// A bus message: identifier plus a bounded byte payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    id: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Build a frame, taking ownership of a freshly allocated payload.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::FrameTooLong`] when `data` exceeds
    /// [`MAX_FRAME_LEN`].
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Result<Self, HubError> {
        let data = data.into();
        if data.len() > MAX_FRAME_LEN {
            return Err(HubError::FrameTooLong {
                len: data.len(),
                max: MAX_FRAME_LEN,
            });
        }
        Ok(Self { id, data })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// `123:00 FF 10 ` – lowercase hex id, colon, then every byte as two
/// uppercase hex digits followed by a single space.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:", self.id)?;
        for byte in &self.data {
            write!(f, "{byte:02X} ")?;
        }
        Ok(())
    }
}
