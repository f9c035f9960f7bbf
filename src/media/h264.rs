//! H.264 Annex-B parsing
//!
//! Device encoders emit H.264 as an Annex-B byte stream: NAL units separated
//! by start codes.
//!
//! ```text
//! 00 00 00 01 | NAL header | payload ... | 00 00 01 | NAL header | payload ...
//! ```
//!
//! NAL header (1 byte): forbidden_zero_bit (1) | nal_ref_idc (2) | nal_unit_type (5)

use bytes::{BufMut, Bytes, BytesMut};

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }

    /// Video coding layer (picture data) NAL unit
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SlicePartA
                | NaluType::SlicePartB
                | NaluType::SlicePartC
                | NaluType::Idr
        )
    }
}

/// Position of one NAL unit inside an Annex-B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NaluSpan {
    /// Offset of the first start code byte
    start: usize,
    /// Offset of the NAL header byte
    header: usize,
    /// Offset one past the last byte
    end: usize,
}

/// Find the next `00 00 01` start code at or after `from`.
///
/// Returns (offset of the first zero, offset of the first byte after the code).
/// A zero byte directly preceding the code is treated as part of a 4-byte code.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > from && data[i - 1] == 0 { i - 1 } else { i };
            return Some((start, i + 3));
        }
        i += 1;
    }
    None
}

fn nalu_spans(data: &[u8]) -> Vec<NaluSpan> {
    let mut spans = Vec::new();
    let Some((mut start, mut header)) = find_start_code(data, 0) else {
        return spans;
    };

    loop {
        match find_start_code(data, header) {
            Some((next_start, next_header)) => {
                spans.push(NaluSpan {
                    start,
                    header,
                    end: next_start,
                });
                start = next_start;
                header = next_header;
            }
            None => {
                spans.push(NaluSpan {
                    start,
                    header,
                    end: data.len(),
                });
                return spans;
            }
        }
    }
}

/// Iterator over NAL units (without start codes) in an Annex-B buffer
pub struct AnnexBNalus<'a> {
    data: &'a [u8],
    spans: std::vec::IntoIter<NaluSpan>,
}

impl<'a> AnnexBNalus<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            spans: nalu_spans(data).into_iter(),
        }
    }
}

impl<'a> Iterator for AnnexBNalus<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let span = self.spans.next()?;
            if span.header < span.end {
                return Some(&self.data[span.header..span.end]);
            }
        }
    }
}

/// Whether a VCL NAL starts a new picture (first_mb_in_slice == 0).
///
/// first_mb_in_slice is ue(v) coded; a value of zero is the single bit `1`,
/// so the top bit of the first payload byte is set.
fn starts_picture(nalu: &[u8]) -> bool {
    nalu.get(1).is_some_and(|b| b & 0x80 != 0)
}

/// Split an Annex-B byte stream into access units (one encoded picture each)
///
/// Start codes are kept so every returned unit is itself valid Annex-B. The
/// returned buffers share memory with `data`.
pub fn split_access_units(data: &Bytes) -> Vec<Bytes> {
    let spans = nalu_spans(data);
    let mut units = Vec::new();
    let mut unit_start: Option<usize> = None;
    let mut has_vcl = false;

    for span in &spans {
        if span.header >= span.end {
            continue;
        }
        let nalu = &data[span.header..span.end];
        let new_unit = match NaluType::from_byte(nalu[0]) {
            Some(NaluType::Aud) => true,
            Some(NaluType::Sps | NaluType::Pps | NaluType::Sei) => has_vcl,
            Some(t) if t.is_vcl() => has_vcl && starts_picture(nalu),
            _ => false,
        };

        match unit_start {
            Some(begin) if new_unit => {
                units.push(data.slice(begin..span.start));
                unit_start = Some(span.start);
                has_vcl = false;
            }
            None => unit_start = Some(span.start),
            _ => {}
        }

        if NaluType::from_byte(nalu[0]).is_some_and(|t| t.is_vcl()) {
            has_vcl = true;
        }
    }

    if let Some(begin) = unit_start {
        if begin < data.len() {
            units.push(data.slice(begin..));
        }
    }

    units
}

/// Check if an access unit contains an IDR picture
pub fn is_keyframe(unit: &[u8]) -> bool {
    AnnexBNalus::new(unit)
        .any(|nalu| NaluType::from_byte(nalu[0]).is_some_and(|t| t.is_keyframe()))
}

/// Collect SPS/PPS NAL units of an access unit, re-prefixed with 4-byte start codes
pub fn parameter_sets(unit: &[u8]) -> Option<Bytes> {
    let mut out = BytesMut::new();
    for nalu in AnnexBNalus::new(unit) {
        if NaluType::from_byte(nalu[0]).is_some_and(|t| t.is_parameter_set()) {
            out.put_slice(&[0, 0, 0, 1]);
            out.put_slice(nalu);
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out.freeze())
    }
}
