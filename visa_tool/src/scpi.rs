//! IEEE 488.2 binary blocks as returned by waveform queries such as `CURV?` or `WAV:DATA?`
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;
use byteorder::{BigEndian, LittleEndian};

use crate::Error;

/// Instruments may prefix the block with a short text header such as `:CURV `.
const DEFAULT_LENGTH_BEFORE_BLOCK: usize = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Index of the first data byte.
    pub offset: usize,
    /// Declared payload length, `None` for an indefinite-length (`#0`) block.
    pub length: Option<usize>,
}

/// Parse a `#<n><length>` block header.
pub fn parse_block_header(rx: &[u8]) -> crate::Result<BlockHeader> {
    let begin = rx
        .iter()
        .position(|x| *x == b'#')
        .ok_or_else(|| Error::invalid_block("Could not find hash sign (#) indicating the start of the block"))?;

    if begin > DEFAULT_LENGTH_BEFORE_BLOCK {
        log::warn!("Binary block starts {} bytes into the response", begin);
    }
    let header_length = rx
        .get(begin + 1)
        .and_then(|x| (*x as char).to_digit(10))
        .unwrap_or(0) as usize;
    let offset = begin + 2 + header_length;
    if offset > rx.len() {
        return Err(Error::invalid_block("Truncated block header"));
    }
    if header_length == 0 {
        return Ok(BlockHeader { offset, length: None });
    }
    let digits = &rx[begin + 2..offset];
    let length = std::str::from_utf8(digits)
        .ok()
        .and_then(|x| x.parse::<usize>().ok())
        .ok_or_else(|| {
            Error::invalid_block(format!(
                "Invalid block length `{}`",
                String::from_utf8_lossy(digits)
            ))
        })?;
    Ok(BlockHeader {
        offset,
        length: Some(length),
    })
}

/// Decode the payload of `block`. Bytes past the declared length are ignored.
pub fn decode_block(
    block: &[u8],
    header: &BlockHeader,
    data_type: DataType,
    byte_order: ByteOrder,
) -> crate::Result<Vec<Sample>> {
    let end = match header.length {
        Some(length) => header.offset + length,
        None => block.len(),
    };
    if header.offset > block.len() || end > block.len() {
        return Err(Error::invalid_block(format!(
            "Binary data is incomplete: the header states {} data bytes, but {} were received",
            end.saturating_sub(header.offset),
            block.len().saturating_sub(header.offset)
        )));
    }
    Ok(decode(&block[header.offset..end], data_type, byte_order))
}

/// Decode `data` into as many whole elements as it holds.
pub fn decode(data: &[u8], data_type: DataType, byte_order: ByteOrder) -> Vec<Sample> {
    match byte_order {
        ByteOrder::Little => decode_with::<LittleEndian>(data, data_type),
        ByteOrder::Big => decode_with::<BigEndian>(data, data_type),
    }
}

fn decode_with<B: byteorder::ByteOrder>(data: &[u8], data_type: DataType) -> Vec<Sample> {
    data.chunks_exact(data_type.size())
        .map(|x| match data_type {
            DataType::I8 => Sample::Int(x[0] as i8 as i64),
            DataType::U8 => Sample::UInt(x[0] as u64),
            DataType::I16 => Sample::Int(B::read_i16(x) as i64),
            DataType::U16 => Sample::UInt(B::read_u16(x) as u64),
            DataType::I32 => Sample::Int(B::read_i32(x) as i64),
            DataType::U32 => Sample::UInt(B::read_u32(x) as u64),
            DataType::I64 => Sample::Int(B::read_i64(x)),
            DataType::U64 => Sample::UInt(B::read_u64(x)),
            DataType::F32 => Sample::Float(B::read_f32(x) as f64),
            DataType::F64 => Sample::Float(B::read_f64(x)),
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Element type of a binary block, named by its `struct`-style format code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DataType {
    pub fn size(&self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
        }
    }

    pub fn code(&self) -> char {
        match self {
            DataType::I8 => 'b',
            DataType::U8 => 'B',
            DataType::I16 => 'h',
            DataType::U16 => 'H',
            DataType::I32 => 'i',
            DataType::U32 => 'I',
            DataType::I64 => 'q',
            DataType::U64 => 'Q',
            DataType::F32 => 'f',
            DataType::F64 => 'd',
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ret = match s {
            "b" => DataType::I8,
            "B" => DataType::U8,
            "h" => DataType::I16,
            "H" => DataType::U16,
            "i" | "l" => DataType::I32,
            "I" | "L" => DataType::U32,
            "q" => DataType::I64,
            "Q" => DataType::U64,
            "f" => DataType::F32,
            "d" => DataType::F64,
            _ => {
                return Err(Error::argument(anyhow!(
                    "Unsupported data type `{}`, expected one of b, B, h, H, i, I, l, L, q, Q, f, d",
                    s
                )))
            }
        };
        Ok(ret)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Display for Sample {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Int(x) => write!(f, "{}", x),
            Sample::UInt(x) => write!(f, "{}", x),
            Sample::Float(x) if x.is_nan() => f.write_str("nan"),
            Sample::Float(x) => f.write_str(&float_repr(*x)),
        }
    }
}

/// Shortest round-trip form with a signed, at least two digit exponent: `1.2e-05`, `1e+16`.
fn float_repr(x: f64) -> String {
    let ret = format!("{:?}", x);
    match ret.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => ret,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponent_is_signed_and_padded() {
        assert_eq!(Sample::Float(1.2e-5).to_string(), "1.2e-05");
        assert_eq!(Sample::Float(2.5e-7).to_string(), "2.5e-07");
        assert_eq!(Sample::Float(-3.1e-6).to_string(), "-3.1e-06");
        assert_eq!(Sample::Float(1e16).to_string(), "1e+16");
        assert_eq!(Sample::Float(1.2345678901234568e17).to_string(), "1.2345678901234568e+17");
        assert_eq!(Sample::Float(1e-100).to_string(), "1e-100");
        assert_eq!(Sample::Float(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn header_definite() {
        let header = parse_block_header(b"#212abcdefghijkl\n").unwrap();
        assert_eq!(
            header,
            BlockHeader {
                offset: 4,
                length: Some(12)
            }
        );
        let header = parse_block_header(b":CURV #14abcd").unwrap();
        assert_eq!(header.offset, 9);
        assert_eq!(header.length, Some(4));
    }

    #[test]
    fn header_indefinite() {
        let header = parse_block_header(b"#0abcd\n").unwrap();
        assert_eq!(
            header,
            BlockHeader {
                offset: 2,
                length: None
            }
        );
        // a non-digit after the hash reads as an indefinite block
        let header = parse_block_header(b"#Xab").unwrap();
        assert_eq!(header.length, None);
    }

    #[test]
    fn header_invalid() {
        assert!(matches!(parse_block_header(b"1,2,3\n"), Err(Error::InvalidBinaryBlock(_))));
        assert!(matches!(parse_block_header(b"#4"), Err(Error::InvalidBinaryBlock(_))));
        assert!(matches!(parse_block_header(b"#2x1abc"), Err(Error::InvalidBinaryBlock(_))));
        assert!(matches!(parse_block_header(b"#"), Err(Error::InvalidBinaryBlock(_))));
    }

    #[test]
    fn decode_f32_little_endian() {
        let mut block = b"#18".to_vec();
        block.extend_from_slice(&0.5_f32.to_le_bytes());
        block.extend_from_slice(&(-2.0_f32).to_le_bytes());
        block.push(b'\n');
        let header = parse_block_header(&block).unwrap();
        let data = decode_block(&block, &header, DataType::F32, ByteOrder::Little).unwrap();
        assert_eq!(data, vec![Sample::Float(0.5), Sample::Float(-2.0)]);
    }

    #[test]
    fn decode_f64_big_endian() {
        let mut block = b"#216".to_vec();
        block.extend_from_slice(&1.25_f64.to_be_bytes());
        block.extend_from_slice(&1e-3_f64.to_be_bytes());
        let header = parse_block_header(&block).unwrap();
        let data = decode_block(&block, &header, DataType::F64, ByteOrder::Big).unwrap();
        assert_eq!(data, vec![Sample::Float(1.25), Sample::Float(1e-3)]);
    }

    #[test]
    fn decode_integers() {
        let data = [0xFF, 0x7F, 0x00, 0x80];
        assert_eq!(
            decode(&data, DataType::I16, ByteOrder::Little),
            vec![Sample::Int(0x7FFF), Sample::Int(-32768)]
        );
        assert_eq!(
            decode(&data, DataType::U16, ByteOrder::Big),
            vec![Sample::UInt(0xFF7F), Sample::UInt(0x0080)]
        );
        assert_eq!(
            decode(&data, DataType::I8, ByteOrder::Big),
            vec![Sample::Int(-1), Sample::Int(127), Sample::Int(0), Sample::Int(-128)]
        );
        assert_eq!(decode(&data, DataType::U32, ByteOrder::Big), vec![Sample::UInt(0xFF7F0080)]);
    }

    #[test]
    fn partial_element_is_dropped() {
        let data = [1, 0, 2, 0, 3];
        assert_eq!(
            decode(&data, DataType::U16, ByteOrder::Little),
            vec![Sample::UInt(1), Sample::UInt(2)]
        );
    }

    #[test]
    fn incomplete_block() {
        let block = b"#210abc";
        let header = parse_block_header(block).unwrap();
        let ret = decode_block(block, &header, DataType::U8, ByteOrder::Little);
        assert!(matches!(ret, Err(Error::InvalidBinaryBlock(_))));
    }

    #[test]
    fn data_type_codes() {
        assert_eq!("f".parse::<DataType>().unwrap(), DataType::F32);
        assert_eq!("d".parse::<DataType>().unwrap(), DataType::F64);
        assert_eq!("h".parse::<DataType>().unwrap(), DataType::I16);
        assert_eq!("L".parse::<DataType>().unwrap(), DataType::U32);
        assert_eq!(DataType::I32.to_string(), "i");
        assert!(matches!("x".parse::<DataType>(), Err(Error::Argument(_))));
        assert!(matches!("ff".parse::<DataType>(), Err(Error::Argument(_))));
    }

    #[test]
    fn sample_display() {
        assert_eq!(Sample::Float(1.0).to_string(), "1.0");
        assert_eq!(Sample::Float(0.1_f32 as f64).to_string(), "0.10000000149011612");
        assert_eq!(Sample::Float(f64::NAN).to_string(), "nan");
        assert_eq!(Sample::Float(f64::INFINITY).to_string(), "inf");
        assert_eq!(Sample::Float(0.0001).to_string(), "0.0001");
        assert_eq!(Sample::Float(1e15).to_string(), "1000000000000000.0");
        assert_eq!(Sample::Int(-7).to_string(), "-7");
        assert_eq!(Sample::UInt(255).to_string(), "255");
    }
}
