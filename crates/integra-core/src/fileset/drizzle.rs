use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;

use super::estimates::ChannelEstimates;
use crate::consts::{DRIZZLE_MAGIC, DRIZZLE_VERSION};
use crate::error::{IntegraError, Result};

/// Per-channel integration parameters stored in a drizzle data sidecar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrizzleChannel {
    pub location: f64,
    pub scale_low: f64,
    pub scale_high: f64,
    pub weight: f64,
}

impl From<&ChannelEstimates> for DrizzleChannel {
    fn from(e: &ChannelEstimates) -> Self {
        Self {
            location: e.location,
            scale_low: e.scale_factor.low,
            scale_high: e.scale_factor.high,
            weight: e.weight,
        }
    }
}

/// Contents of a drizzle data sidecar.
#[derive(Clone, Debug, PartialEq)]
pub struct DrizzleData {
    pub width: usize,
    pub height: usize,
    pub channels: Vec<DrizzleChannel>,
    /// One rejection map per channel, empty when none was generated.
    pub rejection_maps: Vec<Array2<u8>>,
}

/// Sidecar path for an input frame: the input path with `.idd` appended.
pub fn sidecar_path(input: &Path) -> PathBuf {
    let mut s = input.as_os_str().to_os_string();
    s.push(".idd");
    PathBuf::from(s)
}

/// Write a drizzle data sidecar.
///
/// Layout (little endian): magic, version u32, width u32, height u32,
/// channels u32, per channel four f64 (location, scale low, scale high,
/// weight), map flag u8, then `channels * height * width` map bytes.
pub fn write_drizzle_data(path: &Path, data: &DrizzleData) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(DRIZZLE_MAGIC)?;
    w.write_u32::<LittleEndian>(DRIZZLE_VERSION)?;
    w.write_u32::<LittleEndian>(data.width as u32)?;
    w.write_u32::<LittleEndian>(data.height as u32)?;
    w.write_u32::<LittleEndian>(data.channels.len() as u32)?;
    for c in &data.channels {
        w.write_f64::<LittleEndian>(c.location)?;
        w.write_f64::<LittleEndian>(c.scale_low)?;
        w.write_f64::<LittleEndian>(c.scale_high)?;
        w.write_f64::<LittleEndian>(c.weight)?;
    }
    let has_maps = !data.rejection_maps.is_empty();
    w.write_u8(u8::from(has_maps))?;
    for map in &data.rejection_maps {
        for &b in map.iter() {
            w.write_u8(b)?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn read_drizzle_data(path: &Path) -> Result<DrizzleData> {
    let mut r = BufReader::new(File::open(path)?);
    let invalid = |what: &str| IntegraError::Config(format!("{}: invalid drizzle data ({what})", path.display()));

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != DRIZZLE_MAGIC {
        return Err(invalid("bad magic"));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != DRIZZLE_VERSION {
        return Err(invalid("unsupported version"));
    }
    let width = r.read_u32::<LittleEndian>()? as usize;
    let height = r.read_u32::<LittleEndian>()? as usize;
    let n = r.read_u32::<LittleEndian>()? as usize;
    let mut channels = Vec::with_capacity(n);
    for _ in 0..n {
        channels.push(DrizzleChannel {
            location: r.read_f64::<LittleEndian>()?,
            scale_low: r.read_f64::<LittleEndian>()?,
            scale_high: r.read_f64::<LittleEndian>()?,
            weight: r.read_f64::<LittleEndian>()?,
        });
    }
    let mut rejection_maps = Vec::new();
    if r.read_u8()? != 0 {
        for _ in 0..n {
            let mut bytes = vec![0u8; width * height];
            r.read_exact(&mut bytes)?;
            let map = Array2::from_shape_vec((height, width), bytes).map_err(|_| invalid("map size"))?;
            rejection_maps.push(map);
        }
    }
    Ok(DrizzleData {
        width,
        height,
        channels,
        rejection_maps,
    })
}
