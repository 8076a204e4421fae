//! Minimal reader for LAS/LAZ public header blocks.
//!
//! LAZ files keep the header uncompressed, so both are handled alike. Only
//! the fields the catalog records are decoded: version, point count, bounds
//! and the EPSG code from the GeoTIFF key directory.

use relic_core::error::ExtractError;
use relic_state::raw::BoundingBox;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const SIGNATURE: &[u8; 4] = b"LASF";
const MIN_HEADER_SIZE: usize = 227;
const HEADER_READ_LEN: u64 = 375;
/// Upper bound on header + VLR bytes read before the point data.
const MAX_PREAMBLE_LEN: u64 = 16 * 1024 * 1024;
const VLR_HEADER_LEN: usize = 54;
const GEO_KEY_DIRECTORY_RECORD: u16 = 34735;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct LasHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub point_count: u64,
    pub bbox: BoundingBox,
    pub srid: Option<i32>,
}

pub fn read_header(path: &Path) -> Result<LasHeader, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::io(path, e))?;
    let mut head = Vec::with_capacity(HEADER_READ_LEN as usize);
    let mut reader = file;
    (&mut reader)
        .take(HEADER_READ_LEN)
        .read_to_end(&mut head)
        .map_err(|e| ExtractError::io(path, e))?;

    let invalid = |reason: &str| ExtractError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if head.len() < MIN_HEADER_SIZE {
        return Err(invalid("file shorter than a LAS header"));
    }
    if &head[0..4] != SIGNATURE {
        return Err(invalid("missing LASF signature"));
    }

    let version_major = head[24];
    let version_minor = head[25];
    let header_size = u16_at(&head, 94) as usize;
    let offset_to_points = u32_at(&head, 96) as u64;
    let vlr_count = u32_at(&head, 100);
    if header_size < MIN_HEADER_SIZE {
        return Err(invalid("header size field too small"));
    }

    let legacy_count = u32_at(&head, 107) as u64;
    let point_count = if (version_major, version_minor) >= (1, 4) && head.len() >= 255 {
        let full = u64_at(&head, 247);
        if full > 0 { full } else { legacy_count }
    } else {
        legacy_count
    };

    let bbox = BoundingBox {
        max_x: f64_at(&head, 179),
        min_x: f64_at(&head, 187),
        max_y: f64_at(&head, 195),
        min_y: f64_at(&head, 203),
        max_z: f64_at(&head, 211),
        min_z: f64_at(&head, 219),
    };

    let srid = if vlr_count == 0 || offset_to_points <= header_size as u64 {
        None
    } else {
        let preamble_len = offset_to_points.min(MAX_PREAMBLE_LEN);
        let mut preamble = head;
        if (preamble.len() as u64) < preamble_len {
            reader
                .take(preamble_len - preamble.len() as u64)
                .read_to_end(&mut preamble)
                .map_err(|e| ExtractError::io(path, e))?;
        }
        let vlr_bytes = preamble.get(header_size..).unwrap_or(&[]);
        srid_from_vlrs(vlr_bytes, vlr_count)
    };

    Ok(LasHeader {
        version_major,
        version_minor,
        point_count,
        bbox,
        srid,
    })
}

/// Walk `count` VLRs and pull the EPSG code out of the GeoKeyDirectory, if any.
fn srid_from_vlrs(mut bytes: &[u8], count: u32) -> Option<i32> {
    for _ in 0..count {
        if bytes.len() < VLR_HEADER_LEN {
            return None;
        }
        let record_id = u16_at(bytes, 18);
        let payload_len = u16_at(bytes, 20) as usize;
        let payload = bytes.get(VLR_HEADER_LEN..VLR_HEADER_LEN + payload_len)?;
        if record_id == GEO_KEY_DIRECTORY_RECORD {
            return srid_from_geo_keys(payload);
        }
        bytes = &bytes[VLR_HEADER_LEN + payload_len..];
    }
    None
}

fn srid_from_geo_keys(payload: &[u8]) -> Option<i32> {
    let keys: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let key_count = *keys.get(3)? as usize;

    let mut geographic = None;
    for entry in keys.get(4..)?.chunks_exact(4).take(key_count) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        // location 0 means the value is stored inline
        if location != 0 || value == 0 || value == 32767 {
            continue;
        }
        match key_id {
            PROJECTED_CS_TYPE_KEY => return Some(value as i32),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(value as i32),
            _ => {}
        }
    }
    geographic
}

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn u64_at(b: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn f64_at(b: &[u8], at: usize) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[at..at + 8]);
    f64::from_le_bytes(buf)
}
