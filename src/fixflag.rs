//! Legacy `fixflag` bitmask packing the free/fixed state of a source.
//!
//! Bits, most significant first: position (32), par3 (16: `index2` or
//! `curvature`), par2 (8: `cutoffEnergy` or `pivotEnergy`), index (4),
//! reserved (2, always zero), flux (1). Which spectral bits mean anything
//! depends on the record's spectrum type.

use crate::source::{Source, SpectrumType};

pub const POSITION_BIT: u32 = 1 << 5;
pub const PAR3_BIT: u32 = 1 << 4;
pub const PAR2_BIT: u32 = 1 << 3;
pub const INDEX_BIT: u32 = 1 << 2;
pub const RESERVED_BIT: u32 = 1 << 1;
pub const FLUX_BIT: u32 = 1;

/// Everything fixed.
pub const ALL_FIXED: u32 = 0;
/// Position free with a location limit, spectrum fixed.
pub const LIMITED_POSITION: u32 = POSITION_BIT;
pub const LIMITED_POSITION_LOCATION_LIMIT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeFlags {
    pub position: bool,
    pub flux: bool,
    pub index: bool,
    pub par2: bool,
    pub par3: bool,
}

impl FreeFlags {
    /// Clears the flags that have no parameter behind them for `kind`.
    pub fn normalized(self, kind: SpectrumType) -> Self {
        Self {
            par2: self.par2 && kind.par2_name().is_some(),
            par3: self.par3 && kind.par3_name().is_some(),
            ..self
        }
    }

    pub fn of(source: &Source) -> Self {
        let kind = source.spectrum.kind;
        Self {
            position: source.spatial.free,
            flux: source.spectrum.is_free("flux"),
            index: source.spectrum.is_free(kind.index_name()),
            par2: kind
                .par2_name()
                .is_some_and(|name| source.spectrum.is_free(name)),
            par3: kind
                .par3_name()
                .is_some_and(|name| source.spectrum.is_free(name)),
        }
    }

    pub fn apply(self, source: &mut Source) {
        let kind = source.spectrum.kind;
        source.spatial.free = self.position;
        source.set_free("flux", self.flux);
        source.set_free(kind.index_name(), self.index);
        if let Some(name) = kind.par2_name() {
            source.set_free(name, self.par2);
        }
        if let Some(name) = kind.par3_name() {
            source.set_free(name, self.par3);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    pub flags: FreeFlags,
    /// Set when the value itself implies a location limit.
    pub location_limit: Option<f64>,
}

pub fn encode(kind: SpectrumType, flags: FreeFlags) -> u32 {
    let flags = flags.normalized(kind);
    let mut value = 0;
    if flags.position {
        value |= POSITION_BIT;
    }
    if flags.par3 {
        value |= PAR3_BIT;
    }
    if flags.par2 {
        value |= PAR2_BIT;
    }
    if flags.index {
        value |= INDEX_BIT;
    }
    if flags.flux {
        value |= FLUX_BIT;
    }
    value
}

pub fn decode(kind: SpectrumType, value: u32) -> Decoded {
    match value {
        ALL_FIXED => Decoded {
            flags: FreeFlags::default(),
            location_limit: None,
        },
        LIMITED_POSITION => Decoded {
            flags: FreeFlags {
                position: true,
                ..FreeFlags::default()
            },
            location_limit: Some(LIMITED_POSITION_LOCATION_LIMIT),
        },
        _ => Decoded {
            flags: FreeFlags {
                position: value & POSITION_BIT != 0,
                flux: value & FLUX_BIT != 0,
                index: value & INDEX_BIT != 0,
                par2: value & PAR2_BIT != 0,
                par3: value & PAR3_BIT != 0,
            }
            .normalized(kind),
            location_limit: None,
        },
    }
}

pub fn encode_source(source: &Source) -> u32 {
    encode(source.spectrum.kind, FreeFlags::of(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [SpectrumType; 4] = [
        SpectrumType::PowerLaw,
        SpectrumType::PLExpCutoff,
        SpectrumType::PLSuperExpCutoff,
        SpectrumType::LogParabola,
    ];

    fn all_flags() -> impl Iterator<Item = FreeFlags> {
        (0u32..32).map(|bits| FreeFlags {
            position: bits & 1 != 0,
            flux: bits & 2 != 0,
            index: bits & 4 != 0,
            par2: bits & 8 != 0,
            par3: bits & 16 != 0,
        })
    }

    #[test]
    fn decode_inverts_encode_for_every_type() {
        for kind in KINDS {
            for flags in all_flags() {
                let expected = flags.normalized(kind);
                let decoded = decode(kind, encode(kind, flags));
                assert_eq!(decoded.flags, expected, "{kind} {flags:?}");
            }
        }
    }

    #[test]
    fn encoding_is_injective_on_meaningful_flags() {
        for kind in KINDS {
            let mut seen = std::collections::BTreeMap::new();
            for flags in all_flags() {
                let normalized = flags.normalized(kind);
                let code = encode(kind, normalized);
                if let Some(previous) = seen.insert(code, normalized) {
                    assert_eq!(previous, normalized);
                }
            }
        }
    }

    #[test]
    fn special_values() {
        let zero = decode(SpectrumType::PowerLaw, 0);
        assert_eq!(zero.flags, FreeFlags::default());
        assert_eq!(zero.location_limit, None);

        let limited = decode(SpectrumType::LogParabola, 32);
        assert!(limited.flags.position);
        assert!(!limited.flags.flux && !limited.flags.index);
        assert!(!limited.flags.par2 && !limited.flags.par3);
        assert_eq!(limited.location_limit, Some(2.0));
        assert_eq!(encode(SpectrumType::LogParabola, limited.flags), 32);
    }

    #[test]
    fn bits_follow_documented_layout() {
        let flags = FreeFlags {
            position: true,
            flux: true,
            index: true,
            par2: true,
            par3: true,
        };
        assert_eq!(encode(SpectrumType::LogParabola, flags), 0b111101);
        assert_eq!(encode(SpectrumType::PowerLaw, flags), 0b100101);
        assert_eq!(encode(SpectrumType::PLExpCutoff, flags), 0b101101);
        assert_eq!(decode(SpectrumType::PowerLaw, RESERVED_BIT | FLUX_BIT).flags.flux, true);
    }
}
