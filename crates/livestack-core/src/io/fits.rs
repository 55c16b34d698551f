use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;
use num_traits::ToPrimitive;

use crate::error::{LiveStackError, Result};
use crate::frame::{ColorFrame, Frame, FrameData, Image, Keywords};

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

/// Header cards describing the data layout; never carried as keywords.
const STRUCTURAL_KEYS: &[&str] = &[
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND", "BZERO", "BSCALE", "END",
    "COMMENT", "HISTORY",
];

/// Sample encoding used when writing a FITS primary HDU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitsDepth {
    /// BITPIX 16 with BZERO 32768 (unsigned 16-bit).
    UInt16,
    /// BITPIX -32.
    Float32,
}

/// Parsed primary header.
#[derive(Clone, Debug)]
struct FitsHeader {
    bitpix: i32,
    width: usize,
    height: usize,
    planes: usize,
    bzero: f64,
    bscale: f64,
    keywords: Keywords,
    data_offset: usize,
}

/// Read only the header keywords of a FITS file.
pub fn read_fits_keywords(path: &Path) -> Result<Keywords> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(parse_header(&mmap)?.keywords)
}

/// Read the primary HDU of a FITS file.
///
/// Integer samples are normalised to [0, 1] by the full range of their
/// unsigned type; float samples are taken as stored.
pub fn read_fits(path: &Path) -> Result<Image> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let header = parse_header(&mmap)?;

    let bytes_per_sample = (header.bitpix.unsigned_abs() / 8) as usize;
    let plane_bytes = header
        .width
        .checked_mul(header.height)
        .and_then(|n| n.checked_mul(bytes_per_sample))
        .ok_or_else(|| LiveStackError::InvalidFits("image dimensions overflow".into()))?;
    let end = plane_bytes
        .checked_mul(header.planes)
        .and_then(|n| n.checked_add(header.data_offset))
        .ok_or_else(|| LiveStackError::InvalidFits("image dimensions overflow".into()))?;
    if mmap.len() < end {
        return Err(LiveStackError::InvalidFits(format!(
            "data truncated: expected {} bytes, got {}",
            end,
            mmap.len()
        )));
    }
    let raw = &mmap[header.data_offset..end];

    let mut planes = Vec::with_capacity(header.planes);
    for bytes in raw.chunks_exact(plane_bytes) {
        let values = decode_samples(bytes, &header)?;
        let data = Array2::from_shape_vec((header.height, header.width), values)
            .map_err(|e| LiveStackError::InvalidFits(e.to_string()))?;
        planes.push(Frame::new(data, header.bitpix as i8));
    }

    let data = match planes.len() {
        1 => FrameData::Mono(planes.remove(0)),
        3 => {
            let blue = planes.remove(2);
            let green = planes.remove(1);
            let red = planes.remove(0);
            FrameData::Color(ColorFrame { red, green, blue })
        }
        n => {
            return Err(LiveStackError::InvalidFits(format!(
                "unsupported plane count {n}"
            )))
        }
    };

    Ok(Image::new(data).with_keywords(header.keywords))
}

/// Write an image as a FITS primary HDU, keywords included.
pub fn write_fits(image: &Image, path: &Path, depth: FitsDepth) -> Result<()> {
    let (h, w) = image.dim();
    let channels = image.data.channels();

    let mut cards: Vec<String> = vec![
        card("SIMPLE", "T"),
        card(
            "BITPIX",
            match depth {
                FitsDepth::UInt16 => "16",
                FitsDepth::Float32 => "-32",
            },
        ),
        card("NAXIS", if channels.len() == 1 { "2" } else { "3" }),
        card("NAXIS1", &w.to_string()),
        card("NAXIS2", &h.to_string()),
    ];
    if channels.len() > 1 {
        cards.push(card("NAXIS3", &channels.len().to_string()));
    }
    if depth == FitsDepth::UInt16 {
        cards.push(card("BZERO", "32768"));
        cards.push(card("BSCALE", "1"));
    }
    for (key, value) in &image.keywords {
        cards.push(card(key, &format_value(value)));
    }
    cards.push(format!("{:<80}", "END"));

    let mut out = BufWriter::new(File::create(path)?);
    let mut header_len = 0;
    for c in &cards {
        out.write_all(c.as_bytes())?;
        header_len += CARD_SIZE;
    }
    write_padding(&mut out, header_len, b' ')?;

    let mut data_len = 0;
    for frame in channels {
        for &v in frame.data.iter() {
            match depth {
                FitsDepth::UInt16 => {
                    let scaled = (v.clamp(0.0, 1.0) * 65535.0).round() as i32 - 32768;
                    out.write_i16::<BigEndian>(scaled as i16)?;
                    data_len += 2;
                }
                FitsDepth::Float32 => {
                    out.write_f32::<BigEndian>(v)?;
                    data_len += 4;
                }
            }
        }
    }
    write_padding(&mut out, data_len, 0)?;
    out.flush()?;
    Ok(())
}

fn write_padding(out: &mut impl Write, written: usize, fill: u8) -> Result<()> {
    let rem = written % BLOCK_SIZE;
    if rem != 0 {
        out.write_all(&vec![fill; BLOCK_SIZE - rem])?;
    }
    Ok(())
}

/// Format one 80-column header card.
fn card(key: &str, value: &str) -> String {
    let key: String = key.chars().take(8).collect();
    let mut c = format!("{key:<8}= {value:>20}");
    c.truncate(CARD_SIZE);
    format!("{c:<80}")
}

/// Numbers and logicals are written bare, everything else as a quoted string.
fn format_value(value: &str) -> String {
    let v = value.trim();
    if v == "T" || v == "F" || v.parse::<f64>().is_ok() {
        v.to_string()
    } else {
        format!("'{:<8}'", v.replace('\'', "''"))
    }
}

fn parse_header(bytes: &[u8]) -> Result<FitsHeader> {
    if bytes.len() < BLOCK_SIZE || !bytes.starts_with(b"SIMPLE") {
        return Err(LiveStackError::InvalidFits("missing SIMPLE card".into()));
    }

    let mut all = Keywords::new();
    let mut keywords = Keywords::new();
    let mut end_card = None;

    for (i, raw_card) in bytes.chunks_exact(CARD_SIZE).enumerate() {
        let text = String::from_utf8_lossy(raw_card);
        let key = text.get(..8).unwrap_or("").trim().to_string();
        if key == "END" {
            end_card = Some(i);
            break;
        }
        if key.is_empty() || text.get(8..10) != Some("= ") {
            continue;
        }
        let value = parse_value(text.get(10..).unwrap_or(""));
        if !STRUCTURAL_KEYS.contains(&key.as_str()) {
            keywords.insert(key.clone(), value.clone());
        }
        all.insert(key, value);
    }

    let end_card =
        end_card.ok_or_else(|| LiveStackError::InvalidFits("missing END card".into()))?;
    let header_bytes = (end_card + 1) * CARD_SIZE;
    let data_offset = header_bytes.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

    let int = |key: &'static str| -> Result<i64> {
        all.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v as i64)
            .ok_or_else(|| LiveStackError::InvalidFits(format!("missing or invalid {key}")))
    };
    let float_or = |key: &str, default: f64| -> f64 {
        all.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    };

    let bitpix = int("BITPIX")? as i32;
    if ![8, 16, 32, -32, -64].contains(&bitpix) {
        return Err(LiveStackError::InvalidFits(format!("unsupported BITPIX {bitpix}")));
    }
    let naxis = int("NAXIS")?;
    if !(2..=3).contains(&naxis) {
        return Err(LiveStackError::InvalidFits(format!("unsupported NAXIS {naxis}")));
    }
    let axis = |key: &'static str| -> Result<usize> {
        let n = int(key)?;
        usize::try_from(n)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| LiveStackError::InvalidFits(format!("invalid {key} {n}")))
    };
    let width = axis("NAXIS1")?;
    let height = axis("NAXIS2")?;
    let planes = if naxis == 3 { axis("NAXIS3")? } else { 1 };

    Ok(FitsHeader {
        bitpix,
        width,
        height,
        planes,
        bzero: float_or("BZERO", 0.0),
        bscale: float_or("BSCALE", 1.0),
        keywords,
        data_offset,
    })
}

/// Value field of a card, without quotes or trailing comment.
fn parse_value(field: &str) -> String {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        out.trim_end().to_string()
    } else {
        field.split('/').next().unwrap_or("").trim().to_string()
    }
}

fn decode_samples(bytes: &[u8], header: &FitsHeader) -> Result<Vec<f32>> {
    let (bzero, bscale) = (header.bzero, header.bscale);
    Ok(match header.bitpix {
        8 => normalise(bytes.iter().copied(), bzero, bscale, u8::MAX as f64),
        16 => normalise(
            bytes.chunks_exact(2).map(BigEndian::read_i16),
            bzero,
            bscale,
            u16::MAX as f64,
        ),
        32 => normalise(
            bytes.chunks_exact(4).map(BigEndian::read_i32),
            bzero,
            bscale,
            u32::MAX as f64,
        ),
        -32 => normalise(bytes.chunks_exact(4).map(BigEndian::read_f32), bzero, bscale, 1.0),
        -64 => normalise(bytes.chunks_exact(8).map(BigEndian::read_f64), bzero, bscale, 1.0),
        other => {
            return Err(LiveStackError::InvalidFits(format!(
                "unsupported BITPIX {other}"
            )))
        }
    })
}

/// Physical value `bzero + bscale * raw`, divided by `range`.
fn normalise<T, I>(samples: I, bzero: f64, bscale: f64, range: f64) -> Vec<f32>
where
    T: ToPrimitive,
    I: Iterator<Item = T>,
{
    samples
        .map(|s| ((bzero + bscale * s.to_f64().unwrap_or(0.0)) / range) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_layout() {
        let c = card("EXPTIME", "120");
        assert_eq!(c.len(), 80);
        assert!(c.starts_with("EXPTIME = "));
        assert_eq!(&c[10..30], format!("{:>20}", "120"));
    }

    #[test]
    fn test_string_values_are_quoted() {
        assert_eq!(format_value("Ha"), "'Ha      '");
        assert_eq!(format_value("300.5"), "300.5");
        assert_eq!(format_value("T"), "T");
        assert_eq!(format_value("O'III"), "'O''III   '");
    }

    fn header(cards: &[(&str, &str)]) -> Vec<u8> {
        let mut text: String = cards.iter().map(|(k, v)| card(k, v)).collect();
        text.push_str(&format!("{:<80}", "END"));
        let mut bytes = text.into_bytes();
        bytes.resize(bytes.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, b' ');
        bytes
    }

    #[test]
    fn test_bad_axis_lengths_rejected() {
        let negative = header(&[
            ("SIMPLE", "T"),
            ("BITPIX", "16"),
            ("NAXIS", "2"),
            ("NAXIS1", "-1"),
            ("NAXIS2", "4"),
        ]);
        assert!(matches!(parse_header(&negative), Err(LiveStackError::InvalidFits(_))));

        let zero = header(&[
            ("SIMPLE", "T"),
            ("BITPIX", "16"),
            ("NAXIS", "3"),
            ("NAXIS1", "4"),
            ("NAXIS2", "4"),
            ("NAXIS3", "0"),
        ]);
        assert!(parse_header(&zero).is_err());
    }

    #[test]
    fn test_oversized_axes_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.fits");
        let bytes = header(&[
            ("SIMPLE", "T"),
            ("BITPIX", "-64"),
            ("NAXIS", "3"),
            ("NAXIS1", "4294967296"),
            ("NAXIS2", "4294967296"),
            ("NAXIS3", "3"),
        ]);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_fits(&path), Err(LiveStackError::InvalidFits(_))));

        let path = dir.path().join("short.fits");
        let bytes = header(&[
            ("SIMPLE", "T"),
            ("BITPIX", "16"),
            ("NAXIS", "2"),
            ("NAXIS1", "100"),
            ("NAXIS2", "100"),
        ]);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_fits(&path), Err(LiveStackError::InvalidFits(_))));
    }

    #[test]
    fn test_parse_value_strips_quotes_and_comments() {
        assert_eq!(parse_value("'OIII    '           / filter"), "OIII");
        assert_eq!(parse_value("                 120 / exposure"), "120");
        assert_eq!(parse_value("'O''III'"), "O'III");
    }
}
