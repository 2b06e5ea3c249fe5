//! Fail-fast guard for converters reachable from several call sites.

use std::sync::{Mutex, TryLockError};

use log::debug;

use super::{Converter, Progress};
use crate::form::SideFlags;
use crate::table::NameId;
use crate::{Error, Result};

/// A converter behind a busy guard.
///
/// Overlapping calls are rejected with `ConverterBusy` instead of waiting,
/// and leave the converter untouched. After [`SharedConverter::dispose`]
/// every call fails with `InvalidConverter`.
#[derive(Debug)]
pub struct SharedConverter {
    inner: Mutex<Option<Converter>>,
}

impl SharedConverter {
    /// Put a converter behind the guard
    pub fn new(converter: Converter) -> Self {
        Self {
            inner: Mutex::new(Some(converter)),
        }
    }

    /// Run `f` with exclusive access to the converter
    pub fn with_converter<T>(&self, f: impl FnOnce(&mut Converter) -> Result<T>) -> Result<T> {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(Error::ConverterBusy),
            Err(TryLockError::Poisoned(_)) => return Err(Error::InvalidConverter),
        };
        let converter = guard.as_mut().ok_or(Error::InvalidConverter)?;
        f(converter)
    }

    /// See [`Converter::convert_buffer`]
    pub fn convert_buffer(
        &self,
        input: &[u8],
        output: &mut [u8],
        complete: bool,
    ) -> Result<Progress> {
        self.with_converter(|c| c.convert_buffer(input, output, complete))
    }

    /// See [`Converter::flush`]
    pub fn flush(&self, output: &mut [u8]) -> Result<Progress> {
        self.with_converter(|c| c.flush(output))
    }

    /// See [`Converter::reset`]
    pub fn reset(&self) -> Result<()> {
        self.with_converter(|c| {
            c.reset();
            Ok(())
        })
    }

    /// See [`Converter::name`]
    pub fn name(&self, id: NameId) -> Result<String> {
        self.with_converter(|c| c.name(id))
    }

    /// See [`Converter::flags`]
    pub fn flags(&self) -> Result<(SideFlags, SideFlags)> {
        self.with_converter(|c| Ok(c.flags()))
    }

    /// Take the converter out; later calls fail with `InvalidConverter`
    pub fn dispose(&self) -> Result<Converter> {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(Error::ConverterBusy),
            Err(TryLockError::Poisoned(_)) => return Err(Error::InvalidConverter),
        };
        let converter = guard.take().ok_or(Error::InvalidConverter)?;
        debug!("disposed converter");
        Ok(converter)
    }
}

impl From<Converter> for SharedConverter {
    fn from(converter: Converter) -> Self {
        SharedConverter::new(converter)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{CompileOptions, EncodingForm, MappingTable, Status, compile};

    fn shared() -> SharedConverter {
        let blob = compile(
            "PassThrough 0x00..0x7F\n0x41 <> U+0391\n0xC1 0x80 <> U+00C0\n",
            &CompileOptions::default(),
            |_| {},
        )
        .unwrap();
        let table = Arc::new(MappingTable::from_bytes(blob).unwrap());
        Converter::new(table, true, EncodingForm::BYTES, EncodingForm::UTF8)
            .unwrap()
            .into()
    }

    #[test]
    fn test_reentrant_call_is_rejected() {
        let shared = shared();
        let mut out = [0u8; 8];
        shared.convert_buffer(&[0xC1], &mut out, false).unwrap();

        let inner = shared.with_converter(|_| {
            let mut scratch = [0u8; 8];
            Ok(shared.convert_buffer(&[0x80], &mut scratch, true))
        });
        assert_eq!(inner.unwrap(), Err(Error::ConverterBusy));

        // The rejected call left the buffered 0xC1 alone
        let progress = shared.convert_buffer(&[0x80], &mut out, true).unwrap();
        assert_eq!(progress.status, Status::NoError);
        assert_eq!(&out[..progress.output_used], "\u{C0}".as_bytes());
    }

    #[test]
    fn test_dispose_invalidates() {
        let shared = shared();
        assert!(shared.dispose().is_ok());
        let mut out = [0u8; 8];
        assert_eq!(
            shared.convert_buffer(b"A", &mut out, true),
            Err(Error::InvalidConverter)
        );
        assert_eq!(shared.reset(), Err(Error::InvalidConverter));
        assert!(matches!(shared.dispose(), Err(Error::InvalidConverter)));
    }
}
