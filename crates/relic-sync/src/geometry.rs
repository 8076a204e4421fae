use regex::Regex;
use std::sync::OnceLock;

/// Axis-aligned 2D envelope of a footprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn centre(&self) -> (f64, f64) {
        (
            self.min_x + (self.max_x - self.min_x) / 2.0,
            self.min_y + (self.max_y - self.min_y) / 2.0,
        )
    }

    pub fn grow(&self, buffer: f64) -> Envelope {
        Envelope {
            min_x: self.min_x - buffer,
            min_y: self.min_y - buffer,
            max_x: self.max_x + buffer,
            max_y: self.max_y + buffer,
        }
    }
}

fn coordinate_pair() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)\s+(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)")
            .expect("coordinate pair regex must be valid")
    })
}

fn ewkt_srid() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*SRID=(\d+)\s*;").expect("EWKT SRID regex must be valid")
    })
}

/// SRID carried by an EWKT prefix (`SRID=32633;POLYGON(...)`), if any.
pub fn footprint_srid(wkt: &str) -> Option<i32> {
    ewkt_srid().captures(wkt)?[1].parse().ok()
}

/// Envelope of every coordinate pair in a (MULTI)POLYGON WKT string.
/// A trailing third ordinate on each vertex is ignored.
pub fn envelope_from_wkt(wkt: &str) -> Option<Envelope> {
    let body = wkt.split_once('(').map(|(_, rest)| rest)?;
    let mut envelope: Option<Envelope> = None;
    for vertex in body.split(',') {
        let Some(caps) = coordinate_pair().captures(vertex) else {
            continue;
        };
        let (Ok(x), Ok(y)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) else {
            continue;
        };
        envelope = Some(match envelope {
            None => Envelope {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            },
            Some(e) => Envelope {
                min_x: e.min_x.min(x),
                min_y: e.min_y.min(y),
                max_x: e.max_x.max(x),
                max_y: e.max_y.max(y),
            },
        });
    }
    envelope
}
