//! Console presentation of presence events.
//!
//! ```text
//! [Reader 1] TAG ARRIVED - UID: 04A1B2C3, Type: ISO14443A
//!   ATQA: 0044
//!   SAK: 08
//! [Reader 1] TAG DEPARTED - UID: 04A1B2C3
//! ```

use std::fmt::Write;

use tagwatch_core::types::encode_hex;
use tagwatch_core::{ReaderEvent, TagEvent, TargetInfo};

/// Renders an event the way it is printed to stdout, without a trailing newline.
#[must_use]
pub fn format_event(event: &ReaderEvent) -> String {
    match &event.event {
        TagEvent::Arrived { identity, target } => {
            let mut out = format!(
                "[{}] TAG ARRIVED - UID: {identity}, Type: {}",
                event.reader,
                target.type_name()
            );
            for (label, value) in metadata(target) {
                let _ = write!(out, "\n  {label}: {value}");
            }
            out
        }
        TagEvent::Departed { identity } => {
            format!("[{}] TAG DEPARTED - UID: {identity}", event.reader)
        }
    }
}

/// Family-specific fields worth showing, as (label, value) pairs.
fn metadata(target: &TargetInfo) -> Vec<(&'static str, String)> {
    match target {
        TargetInfo::TypeA(a) => {
            let mut fields = vec![
                ("ATQA", encode_hex(&a.atqa)),
                ("SAK", format!("{:02X}", a.sak)),
            ];
            if !a.ats.is_empty() {
                fields.push(("ATS", encode_hex(&a.ats)));
            }
            fields
        }
        TargetInfo::TypeB(b) => vec![
            ("PUPI", encode_hex(&b.pupi)),
            ("Application Data", encode_hex(&b.application_data)),
            ("Protocol Info", encode_hex(&b.protocol_info)),
        ],
        TargetInfo::Felica(f) => vec![
            ("ID", encode_hex(&f.id)),
            ("Pad", encode_hex(&f.pad)),
            ("System Code", encode_hex(&f.system_code)),
        ],
        TargetInfo::Jewel(j) => vec![
            ("SENS_RES", encode_hex(&j.sens_res)),
            ("ID", encode_hex(&j.id)),
        ],
        TargetInfo::IClass(i) => vec![("UID", encode_hex(&i.uid))],
    }
}
