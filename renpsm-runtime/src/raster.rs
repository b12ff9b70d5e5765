//! Binary greyscale occupancy maps in the PGM (`P5`) format.
//!
//! Bright pixels are free space, dark pixels are obstacles. The header is
//! line based: the magic number, `width height`, and the maximum grey value
//! each sit on their own line, with `#` comment lines and blank lines skipped
//! in between. The raw byte plane follows the maximum grey value line.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Widths and heights must be strictly below this value.
pub const MAX_DIMENSION: usize = 65536;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open `{path}`: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot create `{path}`: {source}")]
    Create {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected end of file while reading the raster header")]
    TruncatedHeader,
    #[error("invalid PGM file: expected magic number `P5`, found `{0}`")]
    BadMagic(String),
    #[error("invalid raster size `{0}`")]
    BadSize(String),
    #[error("invalid maximum grey value `{0}`")]
    BadMaxValue(String),
    #[error("raster data is truncated: expected {expected} bytes, found {found}")]
    TruncatedData { expected: usize, found: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Raster {
    /// Create a raster filled with a single grey value.
    pub fn new(width: usize, height: usize, fill: u8) -> Raster {
        Raster {
            width,
            height,
            pixels: vec![fill; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn offset(&self, x: i64, y: i64) -> Option<usize> {
        let x = usize::try_from(x).ok().filter(|x| *x < self.width)?;
        let y = usize::try_from(y).ok().filter(|y| *y < self.height)?;
        Some(y * self.width + x)
    }

    /// The grey value at `(x, y)`, or `None` outside of the raster.
    pub fn get(&self, x: i64, y: i64) -> Option<u8> {
        self.offset(x, y).map(|offset| self.pixels[offset])
    }

    /// Set the grey value at `(x, y)`. Returns `false` outside of the raster.
    pub fn set(&mut self, x: i64, y: i64, value: u8) -> bool {
        match self.offset(x, y) {
            Some(offset) => {
                self.pixels[offset] = value;
                true
            }
            None => false,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Raster, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.display().to_string(),
            source,
        })?;
        Raster::read(file)
    }

    pub fn read(reader: impl Read) -> Result<Raster, Error> {
        let mut reader = BufReader::new(reader);

        let magic = next_header_line(&mut reader)?;
        if magic != "P5" {
            return Err(Error::BadMagic(magic));
        }

        let size = next_header_line(&mut reader)?;
        let (width, height) = parse_size(&size).ok_or_else(|| Error::BadSize(size.clone()))?;

        let max_value = next_header_line(&mut reader)?;
        match max_value.parse::<u32>() {
            Ok(1..=255) => {}
            _ => return Err(Error::BadMaxValue(max_value)),
        }

        let expected = width * height;
        let mut pixels = Vec::with_capacity(expected);
        reader.take(expected as u64).read_to_end(&mut pixels)?;
        if pixels.len() != expected {
            return Err(Error::TruncatedData {
                expected,
                found: pixels.len(),
            });
        }

        Ok(Raster {
            width,
            height,
            pixels,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| Error::Create {
            path: path.display().to_string(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write(&self, mut writer: impl Write) -> Result<(), Error> {
        write!(writer, "P5\n# PGM file\n{} {}\n255\n", self.width, self.height)?;
        writer.write_all(&self.pixels)?;
        Ok(())
    }

    /// Rasterize the segment from `(x0, y0)` to `(x1, y1)` by stepping along
    /// its unit vector for as long as the distance to the end point shrinks.
    ///
    /// Samples outside of the raster are skipped. The walk starts shortly
    /// before it first reaches the raster and ends once it has left it.
    pub fn draw_line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: u8) {
        let mut segment = Segment::new(x0, y0, x1, y1);
        let Some(skipped) = segment.steps_before(self.width as f64, self.height as f64) else {
            return;
        };
        segment.advance(skipped);

        let mut entered = false;
        for (x, y) in segment {
            if self.set(x, y, color) {
                entered = true;
            } else if entered {
                break;
            }
        }
    }

    /// March along the segment from `(x0, y0)` to `(x1, y1)`, reporting an
    /// obstacle as soon as a sample is darker than `threshold`.
    ///
    /// Samples outside of the raster count as obstacles.
    pub fn detect_obstacle(&self, x0: i64, y0: i64, x1: i64, y1: i64, threshold: u8) -> bool {
        Segment::new(x0, y0, x1, y1).any(|(x, y)| match self.get(x, y) {
            Some(value) => value < threshold,
            None => true,
        })
    }
}

/// Read the next header line that is neither blank nor a comment.
fn next_header_line(reader: &mut impl BufRead) -> Result<String, Error> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::TruncatedHeader);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            return Ok(trimmed.to_owned());
        }
    }
}

fn parse_size(line: &str) -> Option<(usize, usize)> {
    let mut fields = line.split_whitespace();
    let width = fields.next()?.parse::<usize>().ok()?;
    let height = fields.next()?.parse::<usize>().ok()?;
    let in_range = |n: usize| 0 < n && n < MAX_DIMENSION;
    (in_range(width) && in_range(height)).then_some((width, height))
}

/// Sample points of a segment, stepping one unit at a time from the start.
///
/// A degenerate segment yields only its start point.
struct Segment {
    x: f64,
    y: f64,
    goal: (f64, f64),
    step: (f64, f64),
    distance: f64,
    done: bool,
}

impl Segment {
    fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Segment {
        let (x, y) = (x0 as f64, y0 as f64);
        let goal = (x1 as f64, y1 as f64);
        let distance = squared_distance((x, y), goal);
        let length = distance.sqrt();
        let step = if length > 0.0 {
            ((goal.0 - x) / length, (goal.1 - y) / length)
        } else {
            (0.0, 0.0)
        };

        Segment {
            x,
            y,
            goal,
            step,
            distance,
            done: false,
        }
    }
}

impl Segment {
    /// Whole steps that can be skipped before the walk reaches the open box
    /// `(-1, width) x (-1, height)` of points truncating onto the raster, or
    /// `None` if it never does. Segments meet a box in a single interval.
    fn steps_before(&self, width: f64, height: f64) -> Option<u64> {
        let mut enter = 0.0_f64;
        let mut leave = self.distance.sqrt() + 1.0;
        for (start, step, end) in [(self.x, self.step.0, width), (self.y, self.step.1, height)] {
            if step == 0.0 {
                if start <= -1.0 || start >= end {
                    return None;
                }
                continue;
            }
            let (a, b) = ((-1.0 - start) / step, (end - start) / step);
            enter = enter.max(a.min(b));
            leave = leave.min(a.max(b));
        }
        (enter <= leave).then(|| (enter.floor() as u64).saturating_sub(1))
    }

    fn advance(&mut self, steps: u64) {
        if steps == 0 {
            return;
        }
        self.x += steps as f64 * self.step.0;
        self.y += steps as f64 * self.step.1;
        self.distance = squared_distance((self.x, self.y), self.goal);
    }
}

impl Iterator for Segment {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<(i64, i64)> {
        if self.done {
            return None;
        }

        let point = (self.x as i64, self.y as i64);
        self.x += self.step.0;
        self.y += self.step.1;

        let distance = squared_distance((self.x, self.y), self.goal);
        if distance < self.distance {
            self.distance = distance;
        } else {
            self.done = true;
        }

        Some(point)
    }
}

fn squared_distance((x0, y0): (f64, f64), (x1, y1): (f64, f64)) -> f64 {
    (x1 - x0) * (x1 - x0) + (y1 - y0) * (y1 - y0)
}
