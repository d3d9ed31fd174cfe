//! PC/SC reader driver (`pcsc:<reader name>`).
//!
//! A PC/SC reader presents one card at a time. Each sweep reads the reader
//! state once, and if a card is present connects to it, fetches the UID with
//! `GET DATA` (`FF CA 00 00 00`) and classifies the ATR. Individual
//! modulation polls then answer from that cached card.
//!
//! The port selects the reader: an exact PC/SC reader name, a
//! case-insensitive substring of one, or empty for the first reader.

use std::ffi::{CStr, CString};
use std::time::Duration;

use pcsc::{Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::debug;

use super::atr::target_from_card;
use super::{PollError, ReaderAddress, ReaderDriver, ReaderError, ReaderHandle, ReaderResult};
use crate::types::{Modulation, TargetInfo};

/// Address scheme of the PC/SC driver.
pub const SCHEME: &str = "pcsc";

const GET_UID_APDU: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];
const SW_SUCCESS: [u8; 2] = [0x90, 0x00];

/// Driver opening PC/SC readers through the system resource manager.
#[derive(Debug, Default)]
pub struct PcscDriver;

impl PcscDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn select_reader(readers: Vec<CString>, wanted: &str) -> Option<CString> {
    if wanted.is_empty() {
        return readers.into_iter().next();
    }
    let wanted_lower = wanted.to_lowercase();
    let position = readers
        .iter()
        .position(|r| r.to_string_lossy() == wanted)
        .or_else(|| {
            readers
                .iter()
                .position(|r| r.to_string_lossy().to_lowercase().contains(&wanted_lower))
        })?;
    readers.into_iter().nth(position)
}

impl ReaderDriver for PcscDriver {
    fn open(&mut self, address: &ReaderAddress) -> ReaderResult<Box<dyn ReaderHandle>> {
        let open_error = |message: String| ReaderError::Open {
            address: address.to_string(),
            message,
        };

        let ctx = Context::establish(Scope::User)
            .map_err(|e| open_error(format!("failed to establish PC/SC context: {e}")))?;
        let readers = ctx
            .list_readers_owned()
            .map_err(|e| open_error(format!("failed to list readers: {e}")))?;
        let reader = select_reader(readers, address.port())
            .ok_or_else(|| open_error("no matching PC/SC reader".to_string()))?;

        Ok(Box::new(PcscHandle {
            name: reader.to_string_lossy().into_owned(),
            ctx,
            reader,
            card: None,
        }))
    }
}

struct PcscHandle {
    name: String,
    ctx: Context,
    reader: CString,
    card: Option<TargetInfo>,
}

fn classify(err: pcsc::Error) -> PollError {
    match err {
        pcsc::Error::Timeout | pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => {
            PollError::Timeout
        }
        pcsc::Error::ReaderUnavailable
        | pcsc::Error::UnknownReader
        | pcsc::Error::NoReadersAvailable
        | pcsc::Error::NoService
        | pcsc::Error::ServiceStopped
        | pcsc::Error::InvalidHandle => PollError::Device(err.to_string()),
        other => PollError::Transport(other.to_string()),
    }
}

impl PcscHandle {
    fn read_card(&self, atr: &[u8]) -> Result<Option<TargetInfo>, PollError> {
        let reader: &CStr = &self.reader;
        let card = match self.ctx.connect(reader, ShareMode::Shared, Protocols::ANY) {
            Ok(card) => card,
            Err(e) => {
                return match classify(e) {
                    PollError::Timeout => Ok(None),
                    other => Err(other),
                }
            }
        };

        let mut buf = [0u8; pcsc::MAX_BUFFER_SIZE];
        let response = card.transmit(&GET_UID_APDU, &mut buf).map(<[u8]>::to_vec);
        if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
            debug!(reader = %self.name, error = %e, "Card disconnect failed");
        }

        let uid = match response {
            Ok(rapdu) if rapdu.len() > 2 && rapdu.ends_with(&SW_SUCCESS) => {
                Some(rapdu[..rapdu.len() - 2].to_vec())
            }
            Ok(rapdu) => {
                debug!(reader = %self.name, response = %crate::types::encode_hex(&rapdu), "GET DATA refused");
                None
            }
            Err(e) => {
                return match classify(e) {
                    PollError::Timeout => Ok(None),
                    other => Err(other),
                };
            }
        };

        // A card that refuses GET DATA is still reported, with an empty
        // identity, so it is counted and excluded by the tracker.
        Ok(Some(target_from_card(atr, uid.unwrap_or_default())))
    }
}

impl ReaderHandle for PcscHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize_as_initiator(&mut self) -> ReaderResult<()> {
        self.ctx.is_valid().map_err(|e| ReaderError::Init {
            message: e.to_string(),
        })
    }

    fn begin_sweep(&mut self) -> Result<(), PollError> {
        self.card = None;

        let mut states = [ReaderState::new(self.reader.clone(), State::UNAWARE)];
        self.ctx
            .get_status_change(Duration::ZERO, &mut states)
            .map_err(classify)
            .or_else(|e| if e == PollError::Timeout { Ok(()) } else { Err(e) })?;

        let state = states[0].event_state();
        if !state.contains(State::PRESENT) || state.contains(State::MUTE) {
            return Ok(());
        }

        let atr = states[0].atr().to_vec();
        self.card = self.read_card(&atr)?;
        Ok(())
    }

    fn list_visible_tags(
        &mut self,
        modulation: Modulation,
        _window: Duration,
    ) -> Result<Vec<TargetInfo>, PollError> {
        match &self.card {
            Some(card) if card.family() == modulation.family => Ok(vec![card.clone()]),
            _ => Err(PollError::Timeout),
        }
    }

    fn close(&mut self) {
        self.card = None;
    }
}
