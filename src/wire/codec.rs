// codec - fixed size frames carrying public values.
//
// DH:   value as big endian, left padded to the group frame length.
// ECDH: 0x04 || X || Y, coordinates big endian, padded to the field width.
use num_bigint::BigUint;
use num_traits::Zero;

use crate::common::{KexError, Result};
use crate::mp::to_be_bytes_padded;
use crate::pke::curve::{Curve, Point};
use crate::pke::dh::DhGroup;

/// Leading byte of an uncompressed point.
pub const POINT_TAG: u8 = 0x04;

pub fn dh_frame_len(group: &DhGroup) -> usize {
    group.frame_len()
}

pub fn encode_dh(value: &BigUint, group: &DhGroup) -> Result<Vec<u8>> {
    to_be_bytes_padded(value, group.frame_len()).ok_or_else(|| {
        KexError::MalformedWireValue(format!(
            "value does not fit in a {} byte frame",
            group.frame_len()
        ))
    })
}

/// Decode a peer value, which must lie in [1, p-1].
pub fn decode_dh(frame: &[u8], group: &DhGroup) -> Result<BigUint> {
    if frame.len() != group.frame_len() {
        return Err(KexError::MalformedWireValue(format!(
            "expected {} bytes, got {}",
            group.frame_len(),
            frame.len()
        )));
    }
    let value = BigUint::from_bytes_be(frame);
    if value.is_zero() || &value >= group.p() {
        return Err(KexError::MalformedWireValue(
            "dh value is outside [1, p-1]".to_owned(),
        ));
    }
    Ok(value)
}

pub fn point_frame_len(curve: &Curve) -> usize {
    1 + 2 * curve.field_len()
}

pub fn encode_point(point: &Point, curve: &Curve) -> Result<Vec<u8>> {
    let (x, y) = match point {
        Point::Infinity => return Err(KexError::PointAtInfinity),
        Point::Affine { x, y } => (x, y),
    };
    let width = curve.field_len();
    let mut ret = Vec::with_capacity(point_frame_len(curve));
    ret.push(POINT_TAG);
    for coord in [x, y] {
        let bytes = to_be_bytes_padded(coord, width).ok_or_else(|| {
            KexError::MalformedWireValue("coordinate wider than the field".to_owned())
        })?;
        ret.extend_from_slice(&bytes);
    }
    Ok(ret)
}

/// Decode a peer point and check it lies on `curve`.
pub fn decode_point(frame: &[u8], curve: &Curve) -> Result<Point> {
    if frame.len() != point_frame_len(curve) {
        return Err(KexError::MalformedWireValue(format!(
            "expected {} bytes, got {}",
            point_frame_len(curve),
            frame.len()
        )));
    }
    if frame[0] != POINT_TAG {
        return Err(KexError::MalformedWireValue(format!(
            "unknown point tag {:#04x}",
            frame[0]
        )));
    }
    let width = curve.field_len();
    let x = BigUint::from_bytes_be(&frame[1..1 + width]);
    let y = BigUint::from_bytes_be(&frame[1 + width..]);
    let point = Point::new(x, y);
    if !curve.is_on_curve(&point) {
        return Err(KexError::MalformedWireValue(
            "point is not on the curve".to_owned(),
        ));
    }
    Ok(point)
}

#[cfg(test)]
use crate::pke::{curve::toy_curve, dh::toy_group};

#[test]
fn test_dh_frame() {
    let group = toy_group();
    let frame = encode_dh(&BigUint::from(19u32), &group).unwrap();
    assert_eq!(frame.len(), 8192);
    assert_eq!(frame[8191], 19);
    assert!(frame[..8191].iter().all(|b| *b == 0));
    assert_eq!(decode_dh(&frame, &group).unwrap(), BigUint::from(19u32));
}

#[test]
fn test_dh_rejects_out_of_range() {
    let group = toy_group();
    let frame = encode_dh(&BigUint::from(23u32), &group).unwrap();
    assert!(matches!(
        decode_dh(&frame, &group),
        Err(KexError::MalformedWireValue(_))
    ));
    let frame = vec![0u8; 8192];
    assert!(matches!(
        decode_dh(&frame, &group),
        Err(KexError::MalformedWireValue(_))
    ));
    let mut short = vec![0u8; 100];
    short[99] = 3;
    assert!(matches!(
        decode_dh(&short, &group),
        Err(KexError::MalformedWireValue(_))
    ));
}

#[test]
fn test_point_frame() {
    let curve = toy_curve();
    let frame = encode_point(&curve.params().g, &curve).unwrap();
    assert_eq!(frame, vec![0x04, 5, 1]);
    assert_eq!(decode_point(&frame, &curve).unwrap(), curve.params().g);
    assert!(matches!(
        encode_point(&Point::Infinity, &curve),
        Err(KexError::PointAtInfinity)
    ));
}

#[test]
fn test_p256_point_frame() {
    use crate::pke::curve::CurveParams;

    let curve = Curve::new(CurveParams::secp256r1());
    let frame = encode_point(&curve.params().g, &curve).unwrap();
    assert_eq!(frame.len(), 65);
    assert_eq!(
        hex::encode(&frame[..33]),
        "046b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296"
    );
    assert_eq!(decode_point(&frame, &curve).unwrap(), curve.params().g);
}

#[test]
fn test_point_rejects_malformed() {
    let curve = toy_curve();
    // Off the curve.
    assert!(matches!(
        decode_point(&[0x04, 5, 2], &curve),
        Err(KexError::MalformedWireValue(_))
    ));
    // Coordinate not reduced.
    assert!(matches!(
        decode_point(&[0x04, 22, 1], &curve),
        Err(KexError::MalformedWireValue(_))
    ));
    // Bad tag.
    assert!(matches!(
        decode_point(&[0x02, 5, 1], &curve),
        Err(KexError::MalformedWireValue(_))
    ));
    // Bad length.
    assert!(matches!(
        decode_point(&[0x04, 5], &curve),
        Err(KexError::MalformedWireValue(_))
    ));
}
