use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};

/// Axis-aligned 2-D rectangle approximating a geometry for indexing.
///
/// Boxes are immutable once built. The [BoundingBox::EMPTY] box stands in
/// for a missing geometry and matches no query.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

impl BoundingBox {
    pub const EMPTY: BoundingBox = BoundingBox {
        min_x: f64::INFINITY,
        max_x: f64::NEG_INFINITY,
        min_y: f64::INFINITY,
        max_y: f64::NEG_INFINITY,
    };

    /// Creates a box from its extents on each axis.
    ///
    /// Extents given in the wrong order are swapped.
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x: min_x.min(max_x),
            max_x: min_x.max(max_x),
            min_y: min_y.min(max_y),
            max_y: min_y.max(max_y),
        }
    }

    /// Degenerate box covering a single point.
    pub fn point(x: f64, y: f64) -> Self {
        BoundingBox::new(x, x, y, y)
    }

    /// Smallest box enclosing every `(x, y)` pair, or [BoundingBox::EMPTY]
    /// when there is none.
    pub fn enclosing<I: IntoIterator<Item = (f64, f64)>>(coordinates: I) -> Self {
        coordinates
            .into_iter()
            .fold(BoundingBox::EMPTY, |acc, (x, y)| BoundingBox {
                min_x: acc.min_x.min(x),
                max_x: acc.max_x.max(x),
                min_y: acc.min_y.min(y),
                max_y: acc.max_y.max(y),
            })
    }

    #[inline]
    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    #[inline]
    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    #[inline]
    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    #[inline]
    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    pub fn is_empty(&self) -> bool {
        !(self.min_x <= self.max_x && self.min_y <= self.max_y)
    }

    /// Inclusive overlap test: boxes sharing only an edge or a corner
    /// intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    /// Strict containment: `inner` must lie inside `self` without touching
    /// its border on either axis. A box never strictly contains itself.
    pub fn strictly_contains(&self, inner: &BoundingBox) -> bool {
        if self.is_empty() || inner.is_empty() {
            return false;
        }
        inner.min_x > self.min_x
            && inner.max_x < self.max_x
            && inner.min_y > self.min_y
            && inner.max_y < self.max_y
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    fn bits(&self) -> [u64; 4] {
        [
            self.min_x.to_bits(),
            self.max_x.to_bits(),
            self.min_y.to_bits(),
            self.max_y.to_bits(),
        ]
    }
}

impl PartialEq for BoundingBox {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BoundingBox {}

impl PartialOrd for BoundingBox {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BoundingBox {
    fn cmp(&self, other: &Self) -> Ordering {
        self.min_x
            .total_cmp(&other.min_x)
            .then(self.max_x.total_cmp(&other.max_x))
            .then(self.min_y.total_cmp(&other.min_y))
            .then(self.max_y.total_cmp(&other.max_y))
    }
}

impl Hash for BoundingBox {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "BoundingBox(EMPTY)");
        }
        write!(
            f,
            "BoundingBox({}, {}, {}, {})",
            self.min_x, self.max_x, self.min_y, self.max_y
        )
    }
}
