//! Firmware images for the bootloader update path.
//!
//! The update orchestrator never looks inside an image. It asks a
//! [`FirmwareSource`] for the payload matching the detected model and gets
//! back already-encrypted bytes plus the key material the bootloader needs.
//! How a source produces them (vendor update files, encryption of a plain
//! image) is its own business.
//!
//! [`PreparedImage`] is the simplest source: a payload that was encrypted
//! ahead of time, read verbatim from disk, plus the erase key for the
//! target model.

use {
    crate::{
        error::{Error, Result},
        protocol::{bootloader::EraseKey, report::Model},
        target::layout::FlashLayout,
    },
    log::debug,
    std::{fs::File, io::Read, path::Path},
};

/// Key the payload was encrypted with.
///
/// Carried for sources that encrypt on load; the bootloader never sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteKey(pub Vec<u8>);

/// Everything an update needs from an image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Whether the source vouches for the payload.
    pub valid: bool,
    /// Encrypted bytes, written in chunks as-is.
    pub payload: Vec<u8>,
    /// Key the payload was encrypted with.
    pub write_key: WriteKey,
    /// Erase key for the target model.
    pub erase_key: EraseKey,
}

/// Supplies firmware for a given programmer model.
pub trait FirmwareSource {
    /// Produce the image to flash onto `model`.
    fn load(&self, model: Model) -> Result<FirmwareImage>;
}

impl<F> FirmwareSource for F
where
    F: Fn(Model) -> Result<FirmwareImage>,
{
    fn load(&self, model: Model) -> Result<FirmwareImage> {
        self(model)
    }
}

/// A pre-encrypted payload loaded from disk.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    payload: Vec<u8>,
    erase_key: EraseKey,
    layout: FlashLayout,
}

impl PreparedImage {
    /// Wrap payload bytes.
    pub fn from_bytes(payload: Vec<u8>, erase_key: EraseKey) -> Self {
        Self {
            payload,
            erase_key,
            layout: FlashLayout::default(),
        }
    }

    /// Read a payload file.
    pub fn from_file<P: AsRef<Path>>(path: P, erase_key: EraseKey) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading prepared image from: {}", path.display());

        let mut payload = Vec::new();
        File::open(path)?.read_to_end(&mut payload)?;
        Ok(Self::from_bytes(payload, erase_key))
    }

    /// Validate against a different layout.
    #[must_use]
    pub fn with_layout(mut self, layout: FlashLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check size and alignment against the layout.
    pub fn validate(&self) -> Result<()> {
        let len = self.payload.len();
        if len == 0 {
            return Err(Error::InvalidImage("payload is empty".into()));
        }
        if len % self.layout.chunk_size != 0 {
            return Err(Error::InvalidImage(format!(
                "payload length {len} is not a multiple of {}",
                self.layout.chunk_size
            )));
        }
        if len > self.layout.capacity() {
            return Err(Error::InvalidImage(format!(
                "payload length {len} exceeds the {} bytes that fit from {:#x}",
                self.layout.capacity(),
                self.layout.base_address
            )));
        }
        Ok(())
    }
}

impl FirmwareSource for PreparedImage {
    fn load(&self, model: Model) -> Result<FirmwareImage> {
        let valid = match self.validate() {
            Ok(()) => true,
            Err(e) => {
                debug!("Prepared image rejected for {model}: {e}");
                false
            },
        };
        Ok(FirmwareImage {
            valid,
            payload: self.payload.clone(),
            write_key: WriteKey::default(),
            erase_key: self.erase_key,
        })
    }
}
