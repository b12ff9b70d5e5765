//! Summaries of benchmark logs.
//!
//! A benchmark runs a generated simulator several times for each thread count,
//! announcing every run with a `Threads: T Iteration: I` line. The simulator
//! then reports `Wall time: W seconds` when it finishes.

use std::collections::BTreeMap;
use std::io::{self, Write};

use tracing::{debug, instrument};

use crate::files::FileId;
use crate::reporting::{Message, SummaryMessage};
use crate::source::{ByteRange, FileRange};

const THREADS_LINE: &str = "Threads: T Iteration: I";
const WALL_TIME_LINE: &str = "Wall time: W seconds";

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub threads: u64,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation, zero for a single sample.
    pub std_dev: f64,
    pub speed_up: f64,
}

/// Wall times grouped by thread count.
#[instrument(skip_all, fields(file_id = %file_id))]
pub fn parse_log(file_id: FileId, source: &str) -> Result<BTreeMap<u64, Vec<f64>>, Message> {
    let mut samples = BTreeMap::<u64, Vec<f64>>::new();
    let mut threads = None;

    let mut start = 0;
    for line in source.split_inclusive('\n') {
        let text = line.trim_end();
        let byte_range = ByteRange::new(start as u32, (start + text.len()) as u32);
        let range = FileRange::new(file_id, byte_range);
        start += line.len();

        if text.starts_with("Threads") {
            let words = text.split_whitespace().collect::<Vec<_>>();
            match words.as_slice() {
                ["Threads:", count, "Iteration:", _] | ["Threads:", count] => {
                    let count = count.parse().map_err(|_| malformed(range, THREADS_LINE))?;
                    threads = Some(count);
                }
                _ => return Err(malformed(range, THREADS_LINE)),
            }
        } else if text.starts_with("Wall") {
            let words = text.split_whitespace().collect::<Vec<_>>();
            let time = match words.as_slice() {
                ["Wall", "time:", time, "seconds"] => (time.parse::<f64>())
                    .map_err(|_| malformed(range, WALL_TIME_LINE))?,
                _ => return Err(malformed(range, WALL_TIME_LINE)),
            };
            let threads = threads.ok_or(SummaryMessage::WallTimeWithoutThreads { range })?;
            samples.entry(threads).or_default().push(time);
        }
    }

    if samples.is_empty() {
        return Err(SummaryMessage::NoSamples.into());
    }
    debug!(thread_counts = samples.len(), "parsed benchmark log");
    Ok(samples)
}

fn malformed(range: FileRange, expected: &'static str) -> Message {
    SummaryMessage::MalformedLine { range, expected }.into()
}

/// One row per thread count, in ascending order. Speed-ups are relative to
/// the single thread mean, or to the smallest thread count without one.
pub fn summarize(samples: &BTreeMap<u64, Vec<f64>>) -> Vec<Row> {
    let baseline = (samples.get(&1).or_else(|| samples.values().next()))
        .map_or(f64::NAN, |times| mean(times));

    (samples.iter())
        .map(|(threads, times)| {
            let mean = mean(times);
            Row {
                threads: *threads,
                count: times.len(),
                mean,
                std_dev: std_dev(times, mean),
                speed_up: baseline / mean,
            }
        })
        .collect()
}

pub fn emit_rows(writer: &mut impl Write, rows: &[Row]) -> io::Result<()> {
    for row in rows {
        writeln!(
            writer,
            "Threads: {}. Samples: {}. Average time: {:.6} seconds. Sd: {:.6}. Speed-up {:.6}",
            row.threads, row.count, row.mean, row.std_dev, row.speed_up,
        )?;
    }
    Ok(())
}

fn mean(times: &[f64]) -> f64 {
    times.iter().sum::<f64>() / times.len() as f64
}

fn std_dev(times: &[f64], mean: f64) -> f64 {
    if times.len() < 2 {
        return 0.0;
    }
    let squares = times.iter().map(|time| (time - mean) * (time - mean));
    (squares.sum::<f64>() / (times.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_id() -> FileId {
        FileId::try_from(1).unwrap()
    }

    const LOG: &str = "\
Threads: 2 Iteration: 1
RENPSM simulator
THREADS: 2
Wall time: 2.0 seconds
Threads: 2 Iteration: 2
Wall time: 4.0 seconds
Threads: 1 Iteration: 1
Wall time: 6.0 seconds
";

    #[test]
    fn groups_by_thread_count() {
        let samples = parse_log(file_id(), LOG).unwrap();
        assert_eq!(samples.keys().copied().collect::<Vec<_>>(), [1, 2]);
        assert_eq!(samples[&2], [2.0, 4.0]);

        let rows = summarize(&samples);
        assert_eq!(rows[0].threads, 1);
        assert_eq!(rows[0].std_dev, 0.0);
        assert_eq!(rows[0].speed_up, 1.0);
        assert_eq!(rows[1].count, 2);
        assert_eq!(rows[1].mean, 3.0);
        assert!((rows[1].std_dev - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(rows[1].speed_up, 2.0);
    }

    #[test]
    fn speed_up_falls_back_to_the_smallest_thread_count() {
        let log = "Threads: 4 Iteration: 1\nWall time: 8 seconds\nThreads: 8 Iteration: 1\nWall time: 2 seconds\n";
        let rows = summarize(&parse_log(file_id(), log).unwrap());
        assert_eq!(rows[0].speed_up, 1.0);
        assert_eq!(rows[1].speed_up, 4.0);
    }

    #[test]
    fn rows_are_printed_one_per_line() {
        let rows = summarize(&parse_log(file_id(), LOG).unwrap());
        let mut output = Vec::new();
        emit_rows(&mut output, &rows).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(
            output.lines().next(),
            Some("Threads: 1. Samples: 1. Average time: 6.000000 seconds. Sd: 0.000000. Speed-up 1.000000"),
        );
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn malformed_logs() {
        assert!(matches!(
            parse_log(file_id(), "Wall time: 1.0 seconds\n"),
            Err(Message::Summary(SummaryMessage::WallTimeWithoutThreads { .. })),
        ));
        assert!(matches!(
            parse_log(file_id(), "Threads: two\n"),
            Err(Message::Summary(SummaryMessage::MalformedLine { .. })),
        ));
        assert!(matches!(
            parse_log(file_id(), "nothing here\n"),
            Err(Message::Summary(SummaryMessage::NoSamples)),
        ));
    }
}
