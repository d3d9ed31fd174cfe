//! Protocol family detection from a contactless card's ATR.
//!
//! PC/SC readers synthesize an ATR for contactless cards. Storage cards get
//! the PC/SC part 3 layout, which names the card standard and card type:
//!
//! ```text
//! 3B 8F 80 01 80 4F 0C A0 00 00 03 06 SS C0 C1 00 00 00 00 TCK
//!                      '--- RID ----'  |  '-+-'
//!                                      |    card name
//!                                      standard
//! ```
//!
//! ISO-DEP cards get `3B 8n 80 01` followed by their historical bytes (Type A)
//! or ATQB application data (Type B), which cannot be told apart reliably and
//! are reported as Type A.

use crate::types::{
    FelicaTarget, IClassTarget, JewelTarget, ProtocolFamily, TargetInfo, TypeATarget, TypeBTarget,
};

const PCSC_RID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x06];

/// Standard byte values of interest.
mod standard {
    pub const ISO14443B_PART1: u8 = 0x05;
    pub const ISO14443B_PART3: u8 = 0x07;
    pub const FELICA: u8 = 0x11;
    pub const PICOPASS_PART3: u8 = 0x1A;
}

/// Card name values of interest.
mod card_name {
    pub const TOPAZ_JEWEL: [u8; 2] = [0xF0, 0x04];
    pub const FELICA_212: [u8; 2] = [0xF0, 0x11];
    pub const FELICA_424: [u8; 2] = [0xF0, 0x12];
}

/// Historical bytes of an ATR, located through the T0 interface indicators.
#[must_use]
pub fn historical_bytes(atr: &[u8]) -> &[u8] {
    if atr.len() < 2 {
        return &[];
    }
    let count = usize::from(atr[1] & 0x0F);

    // Walk TA/TB/TC/TD chains to find where the historical bytes start.
    let mut index = 1;
    let mut td = atr[1];
    loop {
        let present = (td >> 4).count_ones() as usize;
        let has_td = td & 0x80 != 0;
        index += present;
        if !has_td || index >= atr.len() {
            break;
        }
        td = atr[index];
    }

    let start = index + 1;
    let end = (start + count).min(atr.len());
    atr.get(start..end).unwrap_or(&[])
}

/// Family and card name from a PC/SC part 3 storage-card ATR.
fn storage_card(atr: &[u8]) -> Option<(u8, [u8; 2])> {
    let hist = historical_bytes(atr);
    // 80 4F 0C <RID:5> SS C0 C1 ...
    if hist.len() < 11 || hist[0] != 0x80 || hist[1] != 0x4F || hist[3..8] != PCSC_RID {
        return None;
    }
    Some((hist[8], [hist[9], hist[10]]))
}

/// Guesses the protocol family of a card from its ATR.
#[must_use]
pub fn family_from_atr(atr: &[u8]) -> ProtocolFamily {
    let Some((standard_byte, name)) = storage_card(atr) else {
        return ProtocolFamily::TypeA;
    };
    match (standard_byte, name) {
        (_, card_name::TOPAZ_JEWEL) => ProtocolFamily::Jewel,
        (_, card_name::FELICA_212 | card_name::FELICA_424) | (standard::FELICA, _) => {
            ProtocolFamily::Felica
        }
        (standard::ISO14443B_PART1..=standard::ISO14443B_PART3, _) => ProtocolFamily::TypeB,
        (standard::PICOPASS_PART3, _) => ProtocolFamily::IClass,
        _ => ProtocolFamily::TypeA,
    }
}

/// Builds a target from what a PC/SC reader exposes: the ATR and the UID
/// returned by `GET DATA`. Fields PC/SC does not report are left empty.
#[must_use]
pub fn target_from_card(atr: &[u8], uid: Vec<u8>) -> TargetInfo {
    match family_from_atr(atr) {
        ProtocolFamily::TypeA => TargetInfo::TypeA(TypeATarget {
            uid,
            ats: if storage_card(atr).is_some() {
                Vec::new()
            } else {
                historical_bytes(atr).to_vec()
            },
            ..TypeATarget::default()
        }),
        ProtocolFamily::TypeB => TargetInfo::TypeB(TypeBTarget {
            pupi: uid,
            ..TypeBTarget::default()
        }),
        ProtocolFamily::Felica => TargetInfo::Felica(FelicaTarget {
            id: uid,
            ..FelicaTarget::default()
        }),
        ProtocolFamily::Jewel => TargetInfo::Jewel(JewelTarget {
            id: uid,
            ..JewelTarget::default()
        }),
        ProtocolFamily::IClass => TargetInfo::IClass(IClassTarget { uid }),
    }
}
