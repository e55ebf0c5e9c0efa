//! Raw calibration dump parsing.
//!
//! A dump is loosely structured text. The rules are deliberately small:
//!
//! - a line is data iff its first whitespace-separated token is a number;
//!   everything else (headers, comments, banners) is skipped
//! - every data line ends with a sentinel field that is not a value
//! - the first data line is the voltage reference ladder
//! - each following data line is one cell (one code per probe); 64 cells make
//!   one channel block, blocks run through sampic 1 channels 0..15, then
//!   sampic 0 channels 0..15
//! - the board id comes from the file name (`..._db12.txt`, `..._12.txt`)
//!
//! Bytes that are not valid UTF-8 are replaced, never fatal.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::{
    BLOCKS_PER_BOARD, CELLS_NO, CalibrationRun, CellSample, ChannelBlock, VoltageReference,
};
use crate::error::ParseError;

static BOARD_ID_DB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)_db(\d+)").expect("board id pattern is valid"));
static BOARD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d+)").expect("board id pattern is valid"));

/// Parse one dump file. The board id is taken from its file name.
pub fn parse_run_file(path: &Path) -> Result<CalibrationRun, ParseError> {
    let board_id = board_id_from_path(path)?;
    let file = File::open(path).map_err(|source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let run = parse_run(BufReader::new(file), board_id)?;
    debug!(
        path = %path.display(),
        board = board_id,
        probes = run.voltage.probes(),
        "parsed calibration dump"
    );
    Ok(run)
}

/// Extract the board id from the file name: the digits after `_db` if
/// present, else the first run of digits after an underscore.
pub fn board_id_from_path(path: &Path) -> Result<u32, ParseError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    BOARD_ID_DB
        .captures(&name)
        .or_else(|| BOARD_ID.captures(&name))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or(ParseError::MissingBoardId { name })
}

/// Parse a dump from any buffered reader.
pub fn parse_run<R: BufRead>(reader: R, board_id: u32) -> Result<CalibrationRun, ParseError> {
    let mut voltage: Option<VoltageReference> = None;
    let mut pending: Vec<CellSample> = Vec::with_capacity(CELLS_NO);
    let mut blocks: Vec<ChannelBlock> = Vec::with_capacity(BLOCKS_PER_BOARD);
    let mut completed = 0usize;
    let mut line_no = 0usize;

    for raw in reader.split(b'\n') {
        let raw = raw.map_err(|source| ParseError::Read { line: line_no, source })?;
        line_no += 1;

        let text = String::from_utf8_lossy(&raw);
        let line = text.trim_end_matches(['\r', '\n']);
        if !is_data_line(line) {
            continue;
        }
        let values = parse_values(line, line_no)?;

        let Some(reference) = &voltage else {
            if values.is_empty() {
                return Err(ParseError::EmptyVoltageReference { line: line_no });
            }
            voltage = Some(VoltageReference { values });
            continue;
        };

        if values.len() != reference.probes() {
            return Err(ParseError::ProbeCount {
                line: line_no,
                expected: reference.probes(),
                actual: values.len(),
            });
        }
        pending.push(CellSample { codes: values });

        if pending.len() == CELLS_NO {
            let cells = std::mem::replace(&mut pending, Vec::with_capacity(CELLS_NO));
            // Surplus blocks are only counted; they fail validation below.
            if completed < BLOCKS_PER_BOARD {
                let (sampic, channel) = ChannelBlock::position(completed);
                blocks.push(ChannelBlock {
                    board_id,
                    sampic,
                    channel,
                    cells,
                });
            }
            completed += 1;
        }
    }

    if !pending.is_empty() {
        warn!(
            board = board_id,
            rows = pending.len(),
            "ignoring incomplete trailing channel block"
        );
    }

    if completed != BLOCKS_PER_BOARD {
        return Err(ParseError::BlockCount {
            expected: BLOCKS_PER_BOARD,
            actual: completed,
        });
    }

    let voltage = voltage.ok_or(ParseError::BlockCount {
        expected: BLOCKS_PER_BOARD,
        actual: 0,
    })?;

    Ok(CalibrationRun {
        voltage,
        boards: BTreeMap::from([(board_id, blocks)]),
    })
}

fn is_data_line(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|tok| tok.parse::<f64>().is_ok())
}

/// Values of a data line: the final field is a sentinel and is dropped, empty
/// fields from repeated separators are ignored.
fn parse_values(line: &str, line_no: usize) -> Result<Vec<f64>, ParseError> {
    let mut fields: Vec<&str> = line.split([' ', '\t']).collect();
    fields.pop();

    fields
        .into_iter()
        .filter(|f| !f.is_empty())
        .map(|tok| {
            tok.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ParseError::InvalidValue {
                    line: line_no,
                    token: tok.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// A dump with `blocks` complete blocks plus `extra_rows` loose rows.
    fn dump(probes: &[f64], blocks: usize, extra_rows: usize) -> String {
        let mut out = String::from("SAMPIC calibration dump\n# board header line\n");
        for v in probes {
            out.push_str(&format!("{v} "));
        }
        out.push('\n');
        for row in 0..blocks * CELLS_NO + extra_rows {
            out.push_str("Channel marker\n");
            for (k, v) in probes.iter().enumerate() {
                out.push_str(&format!("{} ", 1000.0 + row as f64 + 100.0 * v + k as f64));
            }
            out.push('\n');
        }
        out
    }

    fn parse(text: &str) -> Result<CalibrationRun, ParseError> {
        parse_run(Cursor::new(text.as_bytes().to_vec()), 4)
    }

    #[test]
    fn well_formed_dump_has_32_blocks_of_64_cells() {
        let probes = [0.0, 0.25, 0.5, 0.75, 1.0];
        let run = parse(&dump(&probes, BLOCKS_PER_BOARD, 0)).unwrap();

        assert_eq!(run.voltage.values, probes.to_vec());
        assert_eq!(run.block_count(), BLOCKS_PER_BOARD);
        for (ordinal, block) in run.blocks().enumerate() {
            assert_eq!(block.board_id, 4);
            assert_eq!((block.sampic, block.channel), ChannelBlock::position(ordinal));
            assert_eq!(block.cells.len(), CELLS_NO);
            for cell in &block.cells {
                assert_eq!(cell.codes.len(), probes.len());
            }
        }

        // Rows land in file order: cell 3 of block 1 is row 67.
        let block1 = run.blocks().nth(1).unwrap();
        assert_eq!(block1.cells[3].codes[0], 1000.0 + 67.0);
    }

    #[test]
    fn wrong_block_count_reports_expected_and_actual() {
        let probes = [0.0, 1.0];
        match parse(&dump(&probes, 31, 0)) {
            Err(ParseError::BlockCount { expected, actual }) => {
                assert_eq!((expected, actual), (32, 31));
            }
            other => panic!("unexpected: {other:?}"),
        }
        match parse(&dump(&probes, 33, 0)) {
            Err(ParseError::BlockCount { expected, actual }) => {
                assert_eq!((expected, actual), (32, 33));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn incomplete_trailing_block_is_ignored() {
        let run = parse(&dump(&[0.0, 1.0], BLOCKS_PER_BOARD, 10)).unwrap();
        assert_eq!(run.block_count(), BLOCKS_PER_BOARD);
    }

    #[test]
    fn empty_input_is_a_block_count_error() {
        assert!(matches!(
            parse("just a header\n"),
            Err(ParseError::BlockCount { expected: 32, actual: 0 })
        ));
    }

    #[test]
    fn crlf_and_invalid_utf8_are_tolerated() {
        let text = dump(&[0.0, 1.0], BLOCKS_PER_BOARD, 0).replace('\n', "\r\n");
        let mut bytes = b"\xff\xfe garbage header\r\n".to_vec();
        bytes.extend_from_slice(text.as_bytes());
        let run = parse_run(Cursor::new(bytes), 1).unwrap();
        assert_eq!(run.voltage.values, vec![0.0, 1.0]);
    }

    #[test]
    fn trailing_sentinel_field_is_dropped() {
        let mut text = String::from("0.0  0.5\t1.0 END\n");
        for _ in 0..BLOCKS_PER_BOARD * CELLS_NO {
            text.push_str("10 20 30 x\n");
        }
        let run = parse(&text).unwrap();
        assert_eq!(run.voltage.values, vec![0.0, 0.5, 1.0]);
        assert_eq!(run.blocks().next().unwrap().cells[0].codes, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn probe_count_mismatch_is_reported_with_line() {
        let mut text = dump(&[0.0, 1.0], 1, 0);
        text.push_str("5 6 7 \n");
        match parse(&text) {
            Err(ParseError::ProbeCount { line, expected, actual }) => {
                assert_eq!((expected, actual), (2, 3));
                assert_eq!(line, text.lines().count());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        let text = "0.0 abc 1.0 \n";
        assert!(matches!(
            parse(text),
            Err(ParseError::InvalidValue { line: 1, ref token }) if token == "abc"
        ));
    }

    #[test]
    fn empty_voltage_reference_is_rejected() {
        assert!(matches!(
            parse("# header\n1.0\n"),
            Err(ParseError::EmptyVoltageReference { line: 2 })
        ));
    }

    #[test]
    fn board_id_comes_from_file_name() {
        assert_eq!(board_id_from_path(Path::new("data/calib_db12.txt")).unwrap(), 12);
        assert_eq!(board_id_from_path(Path::new("run_7.dat")).unwrap(), 7);
        assert_eq!(board_id_from_path(Path::new("Run_DB3_v2.txt")).unwrap(), 3);
        assert_eq!(board_id_from_path(Path::new("calib_2024_db12.txt")).unwrap(), 12);
        assert_eq!(board_id_from_path(Path::new("run_2024_05.txt")).unwrap(), 2024);
        assert!(matches!(
            board_id_from_path(Path::new("dir_9/calibration.txt")),
            Err(ParseError::MissingBoardId { .. })
        ));
        assert!(matches!(
            board_id_from_path(Path::new("nodigits.txt")),
            Err(ParseError::MissingBoardId { .. })
        ));
    }

    #[test]
    fn parse_run_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampic_db21.txt");
        std::fs::write(&path, dump(&[0.0, 0.5, 1.0], BLOCKS_PER_BOARD, 0)).unwrap();

        let run = parse_run_file(&path).unwrap();
        assert!(run.boards.contains_key(&21));

        let missing = dir.path().join("absent_db1.txt");
        assert!(matches!(parse_run_file(&missing), Err(ParseError::Open { .. })));

        let unnamed = dir.path().join("calibration.txt");
        std::fs::write(&unnamed, "").unwrap();
        assert!(matches!(parse_run_file(&unnamed), Err(ParseError::MissingBoardId { .. })));
    }
}
