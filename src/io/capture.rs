//! Raw capture file parsing.
//!
//! This module turns a DAQ dump into a typed [`RawCapture`]. It is strict:
//! any malformed header or data line fails the whole file (exit code 2),
//! because a partially decoded capture would silently miscalibrate channels.
//!
//! File layout:
//!
//! - header of `KEY: value` lines, terminated by a sentinel line of dashes
//! - `nstep × ntrial` trial blocks, each consisting of
//!   - 2 delimiter lines (content ignored)
//!   - `group × nsample` filler lines for unused lower channel groups
//!   - `nsample` data lines, one per sample clock; each line carries 8
//!     hexadecimal 32-bit words, word `j` packing channels `2j` (low 16
//!     bits) and `2j+1` (high 16 bits)
//!   - `(3 − group) × nsample` filler lines for unused upper groups
//!   - 2 trailing delimiter lines
//!
//! No fitting logic lives here; the reader produces arrays and nothing else.

use std::io::BufRead;

use crate::domain::{BOARD_CHANNELS, CaptureMeta, GROUP_CHANNELS, RawCapture};
use crate::error::AppError;

/// 16 channels, two per 32-bit word.
const WORDS_PER_LINE: usize = GROUP_CHANNELS / 2;
const GROUPS: usize = BOARD_CHANNELS / GROUP_CHANNELS;
const DELIMITER_LINES: usize = 2;

type Lines<'a> = &'a mut dyn Iterator<Item = std::io::Result<String>>;

/// Parse a complete capture from any buffered reader.
pub fn read_capture<R: BufRead>(input: R) -> Result<RawCapture, AppError> {
    read_capture_with_progress(input, |_| {})
}

/// Parse a capture, reporting the fraction of trial blocks read in `[0, 1]`.
pub fn read_capture_with_progress<R, F>(input: R, mut progress: F) -> Result<RawCapture, AppError>
where
    R: BufRead,
    F: FnMut(f64),
{
    let mut lines = input.lines();
    let meta = read_header(&mut lines)?;

    let (nstep, ntrial, nsample) = (meta.nstep, meta.ntrial, meta.nsample);
    let group = meta.group();
    let mut samples = vec![0u16; nstep * ntrial * GROUP_CHANNELS * nsample];

    let total_blocks = (nstep * ntrial) as f64;
    let mut blocks_done = 0usize;

    for step in 0..nstep {
        for trial in 0..ntrial {
            skip_lines(&mut lines, DELIMITER_LINES)?;
            skip_lines(&mut lines, group * nsample)?;

            for s in 0..nsample {
                let line = next_line(&mut lines)?;
                let words = parse_data_line(&line)?;
                for (j, &word) in words.iter().enumerate() {
                    let base = (step * ntrial + trial) * GROUP_CHANNELS;
                    samples[(base + 2 * j) * nsample + s] = (word & 0xFFFF) as u16;
                    samples[(base + 2 * j + 1) * nsample + s] = (word >> 16) as u16;
                }
            }

            skip_lines(&mut lines, (GROUPS - 1 - group) * nsample)?;
            skip_lines(&mut lines, DELIMITER_LINES)?;

            blocks_done += 1;
            progress(blocks_done as f64 / total_blocks);
        }
    }

    Ok(RawCapture::new(meta, samples))
}

fn read_header(lines: Lines) -> Result<CaptureMeta, AppError> {
    let mut serial = None;
    let mut offset = None;
    let mut nstep = None;
    let mut ntrial = None;
    let mut ndac = None;
    let mut nsample = None;
    let mut extra = Vec::new();

    loop {
        let line = next_line(lines)?;
        if is_sentinel(&line) {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(AppError::parse(format!("malformed header line: {line:?}")));
        };
        let key = key.trim().to_uppercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "BOARD_ID" => serial = Some(value),
            "CHANNEL_OFFSET" => offset = Some(parse_count(&key, &value)?),
            "NSTEPS" => nstep = Some(parse_count(&key, &value)?),
            "NTRIALS" => ntrial = Some(parse_count(&key, &value)?),
            "NDACS" => ndac = Some(parse_count(&key, &value)?),
            "NSAMPLES" => nsample = Some(parse_count(&key, &value)?),
            _ => extra.push((key, value)),
        }
    }

    fn required<T>(field: Option<T>, key: &str) -> Result<T, AppError> {
        field.ok_or_else(|| AppError::parse(format!("missing header key {key}")))
    }

    let meta = CaptureMeta {
        serial: required(serial, "BOARD_ID")?,
        offset: required(offset, "CHANNEL_OFFSET")?,
        nstep: required(nstep, "NSTEPS")?,
        ntrial: required(ntrial, "NTRIALS")?,
        ndac: required(ndac, "NDACS")?,
        nsample: required(nsample, "NSAMPLES")?,
        extra,
    };

    if meta.offset % GROUP_CHANNELS != 0 || meta.offset >= BOARD_CHANNELS {
        return Err(AppError::parse(format!(
            "invalid channel offset {}",
            meta.offset
        )));
    }
    if meta.nstep == 0 || meta.ntrial == 0 || meta.nsample == 0 {
        return Err(AppError::parse("empty capture geometry"));
    }

    Ok(meta)
}

fn parse_count(key: &str, value: &str) -> Result<usize, AppError> {
    value
        .parse::<usize>()
        .map_err(|_| AppError::parse(format!("invalid {key} value: {value:?}")))
}

/// A run of dashes terminates the header; delimiter content inside the body
/// is skipped without inspection.
fn is_sentinel(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 4 && t.chars().all(|c| c == '-')
}

fn next_line(lines: Lines) -> Result<String, AppError> {
    match lines.next() {
        Some(Ok(line)) => Ok(line),
        Some(Err(e)) => Err(AppError::parse(format!("read failure: {e}"))),
        None => Err(AppError::parse("unexpected end of file")),
    }
}

fn skip_lines(lines: Lines, count: usize) -> Result<(), AppError> {
    for _ in 0..count {
        next_line(lines)?;
    }
    Ok(())
}

fn parse_data_line(line: &str) -> Result<[u32; WORDS_PER_LINE], AppError> {
    let mut words = [0u32; WORDS_PER_LINE];
    let mut count = 0;
    for token in line.split_whitespace() {
        if count == WORDS_PER_LINE {
            return Err(AppError::parse(line));
        }
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        words[count] =
            u32::from_str_radix(digits, 16).map_err(|_| AppError::parse(line))?;
        count += 1;
    }
    if count != WORDS_PER_LINE {
        return Err(AppError::parse(line));
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(offset: usize, nstep: usize, ntrial: usize, nsample: usize) -> String {
        format!(
            "BOARD_ID: 0x70\n\
             CHANNEL_OFFSET: {offset}\n\
             NSTEPS: {nstep}\n\
             NTRIALS: {ntrial}\n\
             NDACS: 1\n\
             NSAMPLES: {nsample}\n\
             {}\n",
            "-".repeat(32)
        )
    }

    fn block(offset: usize, nsample: usize, data_lines: &[String]) -> String {
        let group = offset / GROUP_CHANNELS;
        let filler = "00000000 00000000 00000000 00000000 \
                      00000000 00000000 00000000 00000000";
        let mut out = String::from("# trial\n----------------\n");
        for _ in 0..group * nsample {
            out.push_str(filler);
            out.push('\n');
        }
        for line in data_lines {
            out.push_str(line);
            out.push('\n');
        }
        for _ in 0..(3 - group) * nsample {
            out.push_str(filler);
            out.push('\n');
        }
        out.push_str("# end\n----------------\n");
        out
    }

    #[test]
    fn splits_words_into_low_and_high_channels() {
        let data = "00ff1234 00000000 00000000 00000000 \
                    00000000 00000000 00000000 00000000";
        let text = header(0, 1, 1, 1) + &block(0, 1, &[data.to_string()]);

        let capture = read_capture(Cursor::new(text)).unwrap();
        assert_eq!(capture.sample(0, 0, 0, 0), 4660); // 0x1234
        assert_eq!(capture.sample(0, 0, 1, 0), 255); // 0x00FF
        for channel in 2..GROUP_CHANNELS {
            assert_eq!(capture.sample(0, 0, channel, 0), 0);
        }
    }

    #[test]
    fn reads_full_shape_with_nonzero_offset() {
        let nstep = 2;
        let ntrial = 3;
        let nsample = 4;
        let mut text = header(16, nstep, ntrial, nsample);
        for _ in 0..nstep * ntrial {
            let lines: Vec<String> = (0..nsample)
                .map(|s| {
                    (0..WORDS_PER_LINE)
                        .map(|j| format!("{:08x}", (s * WORDS_PER_LINE + j) as u32))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            text.push_str(&block(16, nsample, &lines));
        }

        let capture = read_capture(Cursor::new(text)).unwrap();
        assert_eq!(capture.meta.offset, 16);
        assert_eq!(capture.meta.group(), 1);
        // Word j of sample line s holds (s*8 + j) in the low half: that is
        // channel 2j's value at sample s.
        assert_eq!(capture.sample(1, 2, 6, 3), (3 * 8 + 3) as u16);
    }

    #[test]
    fn progress_is_monotone_and_reaches_one() {
        let nsample = 2;
        let lines: Vec<String> = (0..nsample)
            .map(|_| vec!["00000000"; WORDS_PER_LINE].join(" "))
            .collect();
        let mut text = header(0, 2, 2, nsample);
        for _ in 0..4 {
            text.push_str(&block(0, nsample, &lines));
        }

        let mut seen = Vec::new();
        read_capture_with_progress(Cursor::new(text), |f| seen.push(f)).unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[test]
    fn rejects_bad_word_count() {
        let short = "00ff1234 00000000";
        let text = header(0, 1, 1, 1) + &block(0, 1, &[short.to_string()]);

        let err = read_capture(Cursor::new(text)).unwrap_err();
        assert!(err.to_string().starts_with("error parsing raw data"));
    }

    #[test]
    fn rejects_non_hex_token() {
        let bad = "00ff1234 zzzzzzzz 00000000 00000000 \
                   00000000 00000000 00000000 00000000";
        let text = header(0, 1, 1, 1) + &block(0, 1, &[bad.to_string()]);
        assert!(read_capture(Cursor::new(text)).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let text = header(0, 2, 2, 1) + &block(0, 1, &[vec!["0"; 0].join(" ")]);
        // Block content is malformed and the file is short regardless.
        assert!(read_capture(Cursor::new(text)).is_err());
    }

    #[test]
    fn rejects_misaligned_offset() {
        let text = format!(
            "BOARD_ID: x\nCHANNEL_OFFSET: 8\nNSTEPS: 1\nNTRIALS: 1\nNDACS: 1\nNSAMPLES: 1\n{}\n",
            "-".repeat(32)
        );
        assert!(read_capture(Cursor::new(text)).is_err());
    }

    #[test]
    fn keeps_unknown_header_keys() {
        let mut text = format!(
            "BOARD_ID: 0x71\nCHANNEL_OFFSET: 0\nNSTEPS: 1\nNTRIALS: 1\nNDACS: 1\nNSAMPLES: 1\nFIRMWARE: v2.1\n{}\n",
            "-".repeat(32)
        );
        let data = vec!["00000000"; WORDS_PER_LINE].join(" ");
        text.push_str(&block(0, 1, &[data]));

        let capture = read_capture(Cursor::new(text)).unwrap();
        assert_eq!(
            capture.meta.extra,
            vec![("FIRMWARE".to_string(), "v2.1".to_string())]
        );
    }
}
