//! Command-line or API options for the external-row exchange.
//!
//! This module provides the `ExchangeOptions` struct, which controls the
//! message tags used by the exchange, whether `send_rows` waits for its send
//! requests before returning, and which parts of the exchange are dumped to
//! the debug log. Options can be built through setters or parsed from
//! PETSc/Euclid-style arguments.

use bitflags::bitflags;

use crate::error::XError;
use crate::exchange::Phase;
use crate::parallel::CommTag;

bitflags! {
    /// Which parts of an exchange are written to the debug log.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u8 {
        /// Per-peer row and nonzero counts.
        const COUNTS  = 0b0001;
        /// Row numbers and row lengths.
        const LISTS   = 0b0010;
        /// Flat payload sizes and offsets.
        const PAYLOAD = 0b0100;
        /// Every received or sent row, entry by entry.
        const ROWS    = 0b1000;
    }
}

/// Default base tag; phases use `base + 0..7`.
pub const DEFAULT_TAG_BASE: u16 = 0x4555;

/// Largest accepted base tag. MPI only guarantees tags up to 32767, and the
/// last phase adds its offset to the base.
pub const MAX_TAG_BASE: u16 = 32767 - (Phase::ALL.len() as u16 - 1);

/// Exchange parameters.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    /// Base message tag; each phase adds its own offset.
    pub tag_base: CommTag,

    /// Wait for all send requests before `send_rows` returns.
    pub wait_for_sends: bool,

    /// Debug log selection.
    pub debug: DebugFlags,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        ExchangeOptions {
            tag_base: CommTag::new(DEFAULT_TAG_BASE),
            wait_for_sends: true,
            debug: DebugFlags::empty(),
        }
    }
}

impl ExchangeOptions {
    pub fn with_tag_base(mut self, tag: u16) -> Self {
        self.tag_base = CommTag::new(tag);
        self
    }

    pub fn with_wait_for_sends(mut self, wait: bool) -> Self {
        self.wait_for_sends = wait;
        self
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    /// Parse options from command-line style arguments.
    ///
    /// Recognized: `-debug_ExtRows`, `-extrows_tag <n>`,
    /// `-extrows_defer_send_wait`. Tag bases above [`MAX_TAG_BASE`] are
    /// rejected. Unknown arguments are ignored so the same
    /// argument list can be shared with other components.
    pub fn from_args<I, S>(args: I) -> Result<Self, XError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut opts = ExchangeOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_ref() {
                "-debug_ExtRows" => opts.debug = DebugFlags::all(),
                "-extrows_defer_send_wait" => opts.wait_for_sends = false,
                "-extrows_tag" => {
                    let value = args
                        .next()
                        .ok_or_else(|| XError::shape("-extrows_tag expects a value"))?;
                    let tag = value
                        .as_ref()
                        .parse::<u16>()
                        .map_err(|e| XError::Shape(format!("-extrows_tag: {e}")))?;
                    if tag > MAX_TAG_BASE {
                        return Err(XError::Shape(format!("-extrows_tag {tag} exceeds {MAX_TAG_BASE}")));
                    }
                    opts.tag_base = CommTag::new(tag);
                }
                _ => {}
            }
        }
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_wait_for_sends() {
        let opts = ExchangeOptions::default();
        assert!(opts.wait_for_sends);
        assert!(opts.debug.is_empty());
        assert_eq!(opts.tag_base.as_u16(), DEFAULT_TAG_BASE);
    }

    #[test]
    fn parses_known_flags() {
        let opts = ExchangeOptions::from_args([
            "-ksp_type", "gmres", "-debug_ExtRows", "-extrows_tag", "900", "-extrows_defer_send_wait",
        ])
        .unwrap();
        assert_eq!(opts.debug, DebugFlags::all());
        assert_eq!(opts.tag_base.as_u16(), 900);
        assert!(!opts.wait_for_sends);
    }

    #[test]
    fn bad_tag_is_rejected() {
        assert!(ExchangeOptions::from_args(["-extrows_tag", "abc"]).is_err());
        assert!(ExchangeOptions::from_args(["-extrows_tag"]).is_err());
        assert!(ExchangeOptions::from_args(["-extrows_tag", "65535"]).is_err());
        let top = MAX_TAG_BASE.to_string();
        let opts = ExchangeOptions::from_args(["-extrows_tag", top.as_str()]).unwrap();
        assert_eq!(Phase::Values.tag(opts.tag_base).as_u16(), 32767);
    }
}
