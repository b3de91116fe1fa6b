//! Charset detection and repair for text-bearing assets.
//!
//! Detection is layered: byte-order marks first, then strict UTF-8 (where
//! non-ASCII text carrying windows-1252 mojibake is reversed when that is
//! lossless), then the statistical detector from `chardetng`. When the
//! detector is unsure, C1-range smart quotes select windows-1252.
//!
//! Repair always produces valid UTF-8 and never fails. Undecodable input is
//! replaced with U+FFFD and reported as `best_effort_replaced` with
//! confidence 0.

use std::borrow::Cow;
use std::collections::BTreeMap;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use crate::model::{CharsetFinding, CharsetReport, RepairAction};

pub const ASCII_LABEL: &str = "ascii";
pub const MOJIBAKE_LABEL: &str = "UTF-8 (double-encoded windows-1252)";

const CONFIDENCE_CERTAIN: f32 = 1.0;
const CONFIDENCE_STATISTICAL_HIGH: f32 = 0.9;
const CONFIDENCE_HEURISTIC: f32 = 0.6;
const CONFIDENCE_STATISTICAL_LOW: f32 = 0.4;
const CONFIDENCE_REPLACED: f32 = 0.0;

/// windows-1252 bytes for ellipsis, curly quotes, dashes and the trade mark.
const SMART_PUNCTUATION: [u8; 8] = [0x85, 0x91, 0x92, 0x93, 0x94, 0x96, 0x97, 0x99];

/// Sequences a UTF-8 encoder leaves behind when its output is read as
/// windows-1252.
const MOJIBAKE_MARKERS: [&str; 3] = ["â€", "Ã", "Â"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detected {
    Ascii,
    Mojibake,
    Encoding(&'static Encoding),
}

impl Detected {
    fn from_label(label: &str) -> Self {
        match label {
            ASCII_LABEL => Self::Ascii,
            MOJIBAKE_LABEL => Self::Mojibake,
            other => Self::Encoding(Encoding::for_label(other.as_bytes()).unwrap_or(UTF_8)),
        }
    }

    fn label(self) -> String {
        match self {
            Self::Ascii => ASCII_LABEL.to_string(),
            Self::Mojibake => MOJIBAKE_LABEL.to_string(),
            Self::Encoding(encoding) => encoding.name().to_string(),
        }
    }
}

/// Repaired bytes plus the final report (with `repaired_size` filled in).
#[derive(Debug, Clone)]
pub struct Repaired<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub report: CharsetReport,
}

pub fn analyze(bytes: &[u8]) -> CharsetReport {
    let original_size = bytes.len() as u64;

    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        let mut findings = vec![CharsetFinding {
            bytes: hex(&bytes[..bom_len]),
            decoded: "byte order mark".to_string(),
            occurrences: 1,
        }];
        let action = if had_errors {
            findings.extend(replacement_finding(&text));
            RepairAction::BestEffortReplaced
        } else {
            RepairAction::Transcoded
        };
        return report(
            Detected::Encoding(encoding),
            CONFIDENCE_CERTAIN,
            true,
            findings,
            action,
            original_size,
        );
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        if text.is_ascii() {
            return report(
                Detected::Ascii,
                CONFIDENCE_CERTAIN,
                false,
                Vec::new(),
                RepairAction::None,
                original_size,
            );
        }
        if let Some(fixed) = reverse_mojibake(text) {
            return report(
                Detected::Mojibake,
                CONFIDENCE_HEURISTIC,
                false,
                mojibake_findings(&fixed),
                RepairAction::Transcoded,
                original_size,
            );
        }
        return report(
            Detected::Encoding(UTF_8),
            CONFIDENCE_CERTAIN,
            false,
            Vec::new(),
            RepairAction::None,
            original_size,
        );
    }

    if mostly_utf8(bytes) {
        return report(
            Detected::Encoding(UTF_8),
            CONFIDENCE_REPLACED,
            false,
            invalid_utf8_findings(bytes),
            RepairAction::BestEffortReplaced,
            original_size,
        );
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let (guess, high_confidence) = detector.guess_assess(None, false);

    let (encoding, confidence) = if high_confidence {
        (guess, CONFIDENCE_STATISTICAL_HIGH)
    } else if bytes.iter().any(|byte| SMART_PUNCTUATION.contains(byte)) {
        (WINDOWS_1252, CONFIDENCE_HEURISTIC)
    } else {
        (guess, CONFIDENCE_STATISTICAL_LOW)
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    let mut findings = if encoding.is_single_byte() {
        single_byte_findings(bytes, encoding)
    } else {
        Vec::new()
    };

    if had_errors {
        findings.extend(replacement_finding(&text));
        return report(
            Detected::Encoding(encoding),
            CONFIDENCE_REPLACED,
            false,
            findings,
            RepairAction::BestEffortReplaced,
            original_size,
        );
    }

    report(
        Detected::Encoding(encoding),
        confidence,
        false,
        findings,
        RepairAction::Transcoded,
        original_size,
    )
}

/// Converts `bytes` to UTF-8 according to `report`. Bytes are returned
/// untouched when the report's action is `none`.
pub fn repair<'a>(bytes: &'a [u8], report: &CharsetReport) -> Repaired<'a> {
    let mut report = report.clone();

    let repaired: Cow<'a, [u8]> = match report.action {
        RepairAction::None => Cow::Borrowed(bytes),
        RepairAction::Transcoded | RepairAction::BestEffortReplaced => {
            let text = decode(bytes, Detected::from_label(&report.detected_encoding));
            Cow::Owned(text.into_owned().into_bytes())
        }
    };

    report.repaired_size = Some(repaired.len() as u64);
    Repaired {
        bytes: repaired,
        report,
    }
}

fn decode(bytes: &[u8], detected: Detected) -> Cow<'_, str> {
    match detected {
        Detected::Ascii => String::from_utf8_lossy(bytes),
        Detected::Mojibake => {
            let text = String::from_utf8_lossy(bytes);
            match reverse_mojibake(&text) {
                Some(fixed) => Cow::Owned(fixed),
                None => text,
            }
        }
        Detected::Encoding(encoding) => {
            let body = match Encoding::for_bom(bytes) {
                Some((bom_encoding, bom_len)) if bom_encoding == encoding => &bytes[bom_len..],
                _ => bytes,
            };
            if encoding == UTF_8 {
                String::from_utf8_lossy(body)
            } else {
                encoding.decode_without_bom_handling(body).0
            }
        }
    }
}

/// Rewrites CRLF pairs as LF. Returns the normalized bytes and the number of
/// pairs replaced, or `None` when there were none. Lone CR is kept.
pub fn normalize_line_endings(bytes: &[u8]) -> Option<(Vec<u8>, usize)> {
    let crlf = bytes.windows(2).filter(|pair| *pair == b"\r\n").count();
    if crlf == 0 {
        return None;
    }
    let mut normalized = Vec::with_capacity(bytes.len() - crlf);
    let mut iter = bytes.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        if byte == b'\r' && iter.peek() == Some(&b'\n') {
            continue;
        }
        normalized.push(byte);
    }
    Some((normalized, crlf))
}

/// Undoes a UTF-8 → windows-1252 mis-decode when the reversal is lossless.
fn reverse_mojibake(text: &str) -> Option<String> {
    if !MOJIBAKE_MARKERS.iter().any(|marker| text.contains(marker)) {
        return None;
    }
    let (encoded, _, unmappable) = WINDOWS_1252.encode(text);
    if unmappable {
        return None;
    }
    let fixed = std::str::from_utf8(&encoded).ok()?;
    if fixed == text || fixed.is_ascii() {
        return None;
    }
    Some(fixed.to_string())
}

/// Invalid UTF-8 that still carries more valid multi-byte characters than
/// broken sequences is treated as damaged UTF-8 rather than a legacy charset.
fn mostly_utf8(bytes: &[u8]) -> bool {
    let mut valid_multibyte = 0_usize;
    let mut invalid = 0_usize;
    for chunk in bytes.utf8_chunks() {
        valid_multibyte += chunk.valid().chars().filter(|ch| !ch.is_ascii()).count();
        if !chunk.invalid().is_empty() {
            invalid += 1;
        }
    }
    valid_multibyte > 0 && valid_multibyte >= invalid
}

fn invalid_utf8_findings(bytes: &[u8]) -> Vec<CharsetFinding> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for chunk in bytes.utf8_chunks() {
        if !chunk.invalid().is_empty() {
            *counts.entry(hex(chunk.invalid())).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(bytes, occurrences)| CharsetFinding {
            bytes,
            decoded: char::REPLACEMENT_CHARACTER.to_string(),
            occurrences,
        })
        .collect()
}

fn single_byte_findings(bytes: &[u8], encoding: &'static Encoding) -> Vec<CharsetFinding> {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for byte in bytes.iter().copied().filter(|byte| *byte >= 0x80) {
        *counts.entry(byte).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(byte, occurrences)| {
            let single = [byte];
            let (decoded, _) = encoding.decode_without_bom_handling(&single);
            CharsetFinding {
                bytes: hex(&single),
                decoded: decoded.into_owned(),
                occurrences,
            }
        })
        .collect()
}

fn mojibake_findings(fixed: &str) -> Vec<CharsetFinding> {
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    for ch in fixed.chars().filter(|ch| !ch.is_ascii()) {
        *counts.entry(ch).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(ch, occurrences)| {
            let mut buf = [0_u8; 4];
            CharsetFinding {
                bytes: hex(ch.encode_utf8(&mut buf).as_bytes()),
                decoded: ch.to_string(),
                occurrences,
            }
        })
        .collect()
}

fn replacement_finding(text: &str) -> Option<CharsetFinding> {
    let occurrences = text
        .chars()
        .filter(|ch| *ch == char::REPLACEMENT_CHARACTER)
        .count();
    (occurrences > 0).then(|| CharsetFinding {
        bytes: "undecodable".to_string(),
        decoded: char::REPLACEMENT_CHARACTER.to_string(),
        occurrences,
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn report(
    detected: Detected,
    confidence: f32,
    bom: bool,
    findings: Vec<CharsetFinding>,
    action: RepairAction,
    original_size: u64,
) -> CharsetReport {
    CharsetReport {
        detected_encoding: detected.label(),
        confidence,
        bom,
        findings,
        action,
        original_size,
        repaired_size: None,
    }
}
