/// Bounding box in LTRB format with conversions to the center/size signals.
///
/// Coordinates are normalized image coordinates:
/// - LTRB: Left, Top, Right, Bottom
/// - CXCYWH: Center X, Center Y, Width, Height
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BBox {
    /// Left x coordinate
    pub left: f64,
    /// Top y coordinate
    pub top: f64,
    /// Right x coordinate
    pub right: f64,
    /// Bottom y coordinate
    pub bottom: f64,
}

impl BBox {
    /// The all-zero box, used both for missing observations and for zeroed reconstructions.
    pub const ZERO: BBox = BBox {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    /// Create a new box from LTRB coordinates.
    #[inline]
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Create a box from an `[l, t, r, b]` array.
    #[inline]
    pub fn from_ltrb(ltrb: [f64; 4]) -> Self {
        Self::new(ltrb[0], ltrb[1], ltrb[2], ltrb[3])
    }

    /// Create a box from center x, center y, width and height.
    #[inline]
    pub fn from_cxcywh(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self {
            left: cx - width / 2.0,
            top: cy - height / 2.0,
            right: cx + width / 2.0,
            bottom: cy + height / 2.0,
        }
    }

    /// Convert to `[l, t, r, b]`.
    #[inline]
    pub fn to_ltrb(&self) -> [f64; 4] {
        [self.left, self.top, self.right, self.bottom]
    }

    /// Convert to `[cx, cy, w, h]`.
    #[inline]
    pub fn to_cxcywh(&self) -> [f64; 4] {
        [
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
            self.right - self.left,
            self.bottom - self.top,
        ]
    }

    /// All-zero boxes mark frames where the object was not observed.
    #[inline]
    pub fn is_missing(&self) -> bool {
        self.to_ltrb().iter().all(|&v| v == 0.0)
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.to_ltrb().iter().all(|v| v.is_finite())
    }

    /// Whole-box finiteness policy: a box with any non-finite coordinate becomes [`BBox::ZERO`].
    #[inline]
    pub fn or_zero(self) -> Self {
        if self.is_finite() { self } else { Self::ZERO }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(ltrb: [f64; 4]) -> Self {
        Self::from_ltrb(ltrb)
    }
}
