use crate::unit::ZoneId;

/// Hand-picked colors for the first zones; later zones fall back to a hash.
const PALETTE: [(u8, u8, u8); 8] = [
    (0x00, 0x72, 0xb2),
    (0xe6, 0x9f, 0x00),
    (0x00, 0x9e, 0x73),
    (0xcc, 0x79, 0xa7),
    (0x56, 0xb4, 0xe9),
    (0xd5, 0x5e, 0x00),
    (0xf0, 0xe4, 0x42),
    (0x99, 0x99, 0x99),
];

/// Deterministic fill color for a zone.
/// Zones past the palette get the first 3 bytes of a CRC32 of the zone number.
pub fn zone_color(zone: ZoneId) -> (u8, u8, u8) {
    if let Some(&rgb) = zone
        .checked_sub(1)
        .and_then(|idx| PALETTE.get(idx as usize))
    {
        return rgb;
    }
    let hash = crc32fast::hash(&zone.to_be_bytes());
    let bytes = hash.to_be_bytes();
    (bytes[0], bytes[1], bytes[2])
}

pub fn zone_color_hex(zone: ZoneId) -> String {
    let (r, g, b) = zone_color(zone);
    format!("#{r:02x}{g:02x}{b:02x}")
}
