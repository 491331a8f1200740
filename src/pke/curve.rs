// Operations over short Weierstrass curves.
// y^2 = x^3 + a*x + b mod p
use crate::common::{KexError, Result};
use crate::mp::{add_mod, mod_inverse, mul_mod, sub_mod};
use crate::pke::key::{KeyPair, PublicValue};
use crate::pke::prime::is_probable_prime;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use std::fmt;

// secp256r1 parameters, little endian u32 words.
const P256_P: [u32; 8] = [
    0xffffffff, 0xffffffff, 0xffffffff, 0x00000000, 0x00000000, 0x00000000, 0x00000001, 0xffffffff,
];
const P256_A: [u32; 8] = [
    0xfffffffc, 0xffffffff, 0xffffffff, 0x00000000, 0x00000000, 0x00000000, 0x00000001, 0xffffffff,
];
const P256_B: [u32; 8] = [
    0x27d2604b, 0x3bce3c3e, 0xcc53b0f6, 0x651d06b0, 0x769886bc, 0xb3ebbd55, 0xaa3a93e7, 0x5ac635d8,
];
const P256_GX: [u32; 8] = [
    0xd898c296, 0xf4a13945, 0x2deb33a0, 0x77037d81, 0x63a440f2, 0xf8bce6e5, 0xe12c4247, 0x6b17d1f2,
];
const P256_GY: [u32; 8] = [
    0x37bf51f5, 0xcbb64068, 0x6b315ece, 0x2bce3357, 0x7c0f9e16, 0x8ee7eb4a, 0xfe1a7f9b, 0x4fe342e2,
];
const P256_N: [u32; 8] = [
    0xfc632551, 0xf3b9cac2, 0xa7179e84, 0xbce6faad, 0xffffffff, 0xffffffff, 0x00000000, 0xffffffff,
];

/// A curve point. `Infinity` is the group identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Point {
    Infinity,
    Affine { x: BigUint, y: BigUint },
}

impl Point {
    pub fn new(x: BigUint, y: BigUint) -> Self {
        Point::Affine { x, y }
    }

    pub fn is_infinity(&self) -> bool {
        matches!(self, Point::Infinity)
    }
}

/// Text form written to `<role>.pub`.
impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Point::Infinity => write!(f, "infinity"),
            Point::Affine { x, y } => write!(f, "{{'x': {}, 'y': {}}}", x, y),
        }
    }
}

/// Domain parameters (p, a, b, G, n, h).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurveParams {
    pub p: BigUint,
    pub a: BigUint,
    pub b: BigUint,
    pub g: Point,
    pub n: BigUint,
    pub h: BigUint,
}

impl CurveParams {
    /// Validate and build curve parameters.
    pub fn new(
        p: BigUint,
        a: BigUint,
        b: BigUint,
        g: Point,
        n: BigUint,
        h: BigUint,
    ) -> Result<Self> {
        if p <= BigUint::from(3u32) || !is_probable_prime(&p, 16) {
            return Err(KexError::InvalidCurveParams("field modulus is not an odd prime"));
        }
        if a >= p || b >= p {
            return Err(KexError::InvalidCurveParams("coefficients are not reduced"));
        }
        // 4a^3 + 27b^2 != 0
        let a3 = mul_mod(&mul_mod(&a, &a, &p), &a, &p);
        let disc = add_mod(
            &mul_mod(&BigUint::from(4u32), &a3, &p),
            &mul_mod(&BigUint::from(27u32), &mul_mod(&b, &b, &p), &p),
            &p,
        );
        if disc.is_zero() {
            return Err(KexError::InvalidCurveParams("curve is singular"));
        }
        if n < BigUint::from(2u32) || h.is_zero() {
            return Err(KexError::InvalidCurveParams("invalid order or cofactor"));
        }
        let params = Self { p, a, b, g, n, h };
        let curve = Curve::new(params);
        if curve.params.g.is_infinity() || !curve.is_on_curve(&curve.params.g) {
            return Err(KexError::InvalidCurveParams("base point is not on the curve"));
        }
        if !curve.scalar_mul(&curve.params.n, &curve.params.g)?.is_infinity() {
            return Err(KexError::InvalidCurveParams("n is not the order of the base point"));
        }
        Ok(curve.params)
    }

    /// NIST P-256.
    pub fn secp256r1() -> Self {
        Self {
            p: BigUint::from_slice(&P256_P),
            a: BigUint::from_slice(&P256_A),
            b: BigUint::from_slice(&P256_B),
            g: Point::new(
                BigUint::from_slice(&P256_GX),
                BigUint::from_slice(&P256_GY),
            ),
            n: BigUint::from_slice(&P256_N),
            h: BigUint::one(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Curve {
    params: CurveParams,
}

impl Curve {
    pub fn new(params: CurveParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CurveParams {
        &self.params
    }

    /// Byte width of one coordinate.
    pub fn field_len(&self) -> usize {
        ((self.params.p.bits() + 7) / 8) as usize
    }

    pub fn is_on_curve(&self, point: &Point) -> bool {
        match point {
            Point::Infinity => true,
            Point::Affine { x, y } => {
                let p = &self.params.p;
                if x >= p || y >= p {
                    return false;
                }
                let y2 = mul_mod(y, y, p);
                let x3 = mul_mod(&mul_mod(x, x, p), x, p);
                let ax = mul_mod(&self.params.a, x, p);
                y2 == add_mod(&add_mod(&x3, &ax, p), &self.params.b, p)
            }
        }
    }

    pub fn negate(&self, point: &Point) -> Point {
        match point {
            Point::Infinity => Point::Infinity,
            Point::Affine { x, y } => Point::new(x.clone(), sub_mod(&BigUint::zero(), y, &self.params.p)),
        }
    }

    /// Point addition.
    pub fn add(&self, lhs: &Point, rhs: &Point) -> Result<Point> {
        let p = &self.params.p;
        let (x1, y1, x2, y2) = match (lhs, rhs) {
            (Point::Infinity, _) => return Ok(rhs.clone()),
            (_, Point::Infinity) => return Ok(lhs.clone()),
            (Point::Affine { x: x1, y: y1 }, Point::Affine { x: x2, y: y2 }) => (x1, y1, x2, y2),
        };

        // Inverse points, or doubling a point of order 2.
        if x1 == x2 && (y1 != y2 || y1.is_zero()) {
            return Ok(Point::Infinity);
        }

        let slope = if x1 == x2 {
            // (3*x1^2 + a) / (2*y1)
            let num = add_mod(
                &mul_mod(&BigUint::from(3u32), &mul_mod(x1, x1, p), p),
                &self.params.a,
                p,
            );
            let den = mul_mod(&BigUint::from(2u32), y1, p);
            mul_mod(&num, &mod_inverse(&den, p)?, p)
        } else {
            // (y2 - y1) / (x2 - x1)
            let num = sub_mod(y2, y1, p);
            let den = sub_mod(x2, x1, p);
            mul_mod(&num, &mod_inverse(&den, p)?, p)
        };

        let x3 = sub_mod(&sub_mod(&mul_mod(&slope, &slope, p), x1, p), x2, p);
        let y3 = sub_mod(&mul_mod(&slope, &sub_mod(x1, &x3, p), p), y1, p);
        Ok(Point::new(x3, y3))
    }

    /// k * point, double-and-add from the least significant bit.
    ///
    /// Not constant time.
    pub fn scalar_mul(&self, k: &BigUint, point: &Point) -> Result<Point> {
        let mut ret = Point::Infinity;
        let mut current = point.clone();
        for i in 0..k.bits() {
            if k.bit(i) {
                ret = self.add(&ret, &current)?;
            }
            current = self.add(&current, &current)?;
        }
        Ok(ret)
    }

    /// Draw the private scalar uniformly from [1, n-1].
    pub fn generate_key_pair<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<KeyPair> {
        let private = rng.gen_biguint_range(&BigUint::one(), &self.params.n);
        let public = self.scalar_mul(&private, &self.params.g)?;
        Ok(KeyPair {
            private,
            public: PublicValue::Ec(public),
        })
    }
}

#[cfg(test)]
pub(crate) fn toy_curve() -> Curve {
    // y^2 = x^3 + 2x + 2 mod 17, G = (5, 1) of order 19.
    let big = |v: u32| BigUint::from(v);
    Curve::new(
        CurveParams::new(
            big(17),
            big(2),
            big(2),
            Point::new(big(5), big(1)),
            big(19),
            big(1),
        )
        .unwrap(),
    )
}

#[cfg(test)]
fn pt(x: u32, y: u32) -> Point {
    Point::new(BigUint::from(x), BigUint::from(y))
}

#[test]
fn test_toy_doubling() {
    let curve = toy_curve();
    let g = curve.params().g.clone();
    assert_eq!(curve.scalar_mul(&BigUint::from(2u32), &g).unwrap(), pt(6, 3));
    assert_eq!(curve.add(&g, &g).unwrap(), pt(6, 3));
    assert_eq!(curve.scalar_mul(&BigUint::from(3u32), &g).unwrap(), pt(10, 6));
    assert_eq!(curve.add(&pt(6, 3), &g).unwrap(), pt(10, 6));
    assert_eq!(curve.scalar_mul(&BigUint::from(18u32), &g).unwrap(), pt(5, 16));
    assert_eq!(
        curve.scalar_mul(&BigUint::from(19u32), &g).unwrap(),
        Point::Infinity
    );
}

#[test]
fn test_toy_group_walk() {
    // Every multiple 1..18 is on the curve and distinct.
    let curve = toy_curve();
    let g = curve.params().g.clone();
    let mut acc = Point::Infinity;
    let mut seen = vec![];
    for k in 1..19u32 {
        acc = curve.add(&acc, &g).unwrap();
        assert!(curve.is_on_curve(&acc));
        assert_eq!(curve.scalar_mul(&BigUint::from(k), &g).unwrap(), acc);
        assert!(!seen.contains(&acc));
        seen.push(acc.clone());
    }
    assert_eq!(curve.add(&acc, &g).unwrap(), Point::Infinity);
}

#[test]
fn test_identity_and_inverse() {
    let curve = toy_curve();
    let g = curve.params().g.clone();
    assert_eq!(curve.add(&g, &Point::Infinity).unwrap(), g);
    assert_eq!(curve.add(&Point::Infinity, &g).unwrap(), g);
    assert_eq!(
        curve.add(&Point::Infinity, &Point::Infinity).unwrap(),
        Point::Infinity
    );
    let neg = curve.negate(&g);
    assert_eq!(neg, pt(5, 16));
    assert_eq!(curve.add(&g, &neg).unwrap(), Point::Infinity);
    assert_eq!(curve.add(&neg, &g).unwrap(), Point::Infinity);
}

#[test]
fn test_two_torsion_doubles_to_infinity() {
    // y^2 = x^3 + 1 mod 5 has (4, 0).
    let curve = Curve::new(CurveParams {
        p: BigUint::from(5u32),
        a: BigUint::zero(),
        b: BigUint::one(),
        g: pt(4, 0),
        n: BigUint::from(2u32),
        h: BigUint::from(3u32),
    });
    assert!(curve.is_on_curve(&pt(4, 0)));
    assert_eq!(curve.add(&pt(4, 0), &pt(4, 0)).unwrap(), Point::Infinity);
}

#[test]
fn test_scalar_mul_edge_scalars() {
    let curve = toy_curve();
    let g = curve.params().g.clone();
    assert_eq!(curve.scalar_mul(&BigUint::zero(), &g).unwrap(), Point::Infinity);
    assert_eq!(curve.scalar_mul(&BigUint::one(), &g).unwrap(), g);
    assert_eq!(
        curve.scalar_mul(&BigUint::from(5u32), &Point::Infinity).unwrap(),
        Point::Infinity
    );
}

#[test]
fn test_scalar_mul_associative() {
    let curve = toy_curve();
    let g = curve.params().g.clone();
    let n = &curve.params().n;
    for k in 0..25u32 {
        for m in 0..25u32 {
            let k = BigUint::from(k);
            let m = BigUint::from(m);
            let lhs = curve
                .scalar_mul(&k, &curve.scalar_mul(&m, &g).unwrap())
                .unwrap();
            let rhs = curve.scalar_mul(&((&k * &m) % n), &g).unwrap();
            assert_eq!(lhs, rhs);
        }
    }
}

#[test]
fn test_p256_params() {
    let params = CurveParams::secp256r1();
    let curve = Curve::new(params.clone());
    assert!(curve.is_on_curve(&params.g));
    assert_eq!(curve.field_len(), 32);
    // Re-validating the built-in constants succeeds.
    let checked = CurveParams::new(
        params.p.clone(),
        params.a.clone(),
        params.b.clone(),
        params.g.clone(),
        params.n.clone(),
        params.h.clone(),
    )
    .unwrap();
    assert_eq!(checked, params);
}

#[test]
fn test_p256_associative_and_agreement() {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let curve = Curve::new(CurveParams::secp256r1());
    let g = curve.params().g.clone();
    let n = curve.params().n.clone();
    let mut rng = ChaCha20Rng::seed_from_u64(42);

    let k = rng.gen_biguint(256);
    let m = rng.gen_biguint(256);
    let lhs = curve
        .scalar_mul(&k, &curve.scalar_mul(&m, &g).unwrap())
        .unwrap();
    let rhs = curve.scalar_mul(&((&k * &m) % &n), &g).unwrap();
    assert_eq!(lhs, rhs);

    let alice = curve.generate_key_pair(&mut rng).unwrap();
    let bob = curve.generate_key_pair(&mut rng).unwrap();
    let (PublicValue::Ec(a_pub), PublicValue::Ec(b_pub)) = (&alice.public, &bob.public) else {
        panic!("ec key pair holds a dh value");
    };
    assert!(curve.is_on_curve(a_pub));
    assert!(alice.private >= BigUint::one() && alice.private < n);
    assert_eq!(
        curve.scalar_mul(&alice.private, b_pub).unwrap(),
        curve.scalar_mul(&bob.private, a_pub).unwrap()
    );
}

#[test]
fn test_p256_known_double() {
    // 2G from the SEC test vectors.
    let curve = Curve::new(CurveParams::secp256r1());
    let two_g = curve
        .scalar_mul(&BigUint::from(2u32), &curve.params().g)
        .unwrap();
    let expected = Point::new(
        BigUint::parse_bytes(
            b"7cf27b188d034f7e8a52380304b51ac3c08969e277f21b35a60b48fc47669978",
            16,
        )
        .unwrap(),
        BigUint::parse_bytes(
            b"07775510db8ed040293d9ac69f7430dbba7dade63ce982299e04b79d227873d1",
            16,
        )
        .unwrap(),
    );
    assert_eq!(two_g, expected);
}

#[test]
fn test_invalid_params() {
    let big = |v: u32| BigUint::from(v);
    // Composite modulus.
    assert!(matches!(
        CurveParams::new(big(15), big(2), big(2), pt(5, 1), big(19), big(1)),
        Err(KexError::InvalidCurveParams(_))
    ));
    // Base point off the curve.
    assert!(matches!(
        CurveParams::new(big(17), big(2), big(2), pt(5, 2), big(19), big(1)),
        Err(KexError::InvalidCurveParams(_))
    ));
    // Wrong order.
    assert!(matches!(
        CurveParams::new(big(17), big(2), big(2), pt(5, 1), big(18), big(1)),
        Err(KexError::InvalidCurveParams(_))
    ));
    // Singular: y^2 = x^3 mod 17.
    assert!(matches!(
        CurveParams::new(big(17), big(0), big(0), pt(1, 1), big(19), big(1)),
        Err(KexError::InvalidCurveParams(_))
    ));
}
