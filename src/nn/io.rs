/*
 * Tessera Chess Engine
 * Copyright (C) 2026 tessera developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::nn::{HL_HALF_NODES, NUM_INPUTS, NUM_KING_BUCKETS, NUM_VARIANTS};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Error, ErrorKind, Read, Result};

const MAGIC: u32 = 0x4E4E_5354; // "TSNN"
const VERSION: u16 = 1;

pub struct NetworkData {
    pub input_weights: Vec<i16>,
    pub input_biases: Vec<i16>,
    pub output_weights: Vec<i16>,
    pub output_biases: Vec<i32>,
}

fn invalid(msg: &str) -> Error {
    Error::new(ErrorKind::InvalidData, msg.to_string())
}

fn read_i16s<R: Read>(reader: &mut R, count: usize) -> Result<Vec<i16>> {
    let mut values = vec![0i16; count];
    reader.read_i16_into::<LittleEndian>(&mut values)?;
    Ok(values)
}

/// Reads a quantized network in the engine's own format: a small header
/// describing the layer shape followed by raw little-endian weights.
pub fn read_network<R: Read>(reader: &mut R) -> Result<NetworkData> {
    if reader.read_u32::<LittleEndian>()? != MAGIC {
        return Err(invalid("not a quantized network file"));
    }
    if reader.read_u16::<LittleEndian>()? != VERSION {
        return Err(invalid("unsupported network version"));
    }
    if reader.read_u16::<LittleEndian>()? as usize != NUM_KING_BUCKETS {
        return Err(invalid("unexpected king bucket count"));
    }
    if reader.read_u16::<LittleEndian>()? as usize != HL_HALF_NODES {
        return Err(invalid("unexpected accumulator size"));
    }
    if reader.read_u16::<LittleEndian>()? as usize != NUM_VARIANTS {
        return Err(invalid("unexpected output variant count"));
    }

    let input_weights = read_i16s(reader, NUM_INPUTS * HL_HALF_NODES)?;
    let input_biases = read_i16s(reader, HL_HALF_NODES)?;

    let mut output_weights = Vec::with_capacity(NUM_VARIANTS * 2 * HL_HALF_NODES);
    let mut output_biases = Vec::with_capacity(NUM_VARIANTS);
    for _ in 0..NUM_VARIANTS {
        output_weights.extend_from_slice(&read_i16s(reader, 2 * HL_HALF_NODES)?);
        output_biases.push(reader.read_i32::<LittleEndian>()?);
    }

    Ok(NetworkData { input_weights, input_biases, output_weights, output_biases })
}
