//! Property-based invariant tests for geometry primitives.
//!
//! 1. Intersection is commutative.
//! 2. Intersection result fits within both inputs.
//! 3. Signed clipping never yields a cell outside the signed rectangle.
//! 4. `cells()` yields exactly `area()` coordinates, all contained.

use proptest::prelude::*;
use tplane_core::geometry::{Origin, Rect};

fn small_rect_strategy() -> impl Strategy<Value = Rect> {
    (0u16..=500, 0u16..=500, 0u16..=500, 0u16..=500).prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
}

proptest! {
    #[test]
    fn intersection_commutative(a in small_rect_strategy(), b in small_rect_strategy()) {
        prop_assert_eq!(a.intersect(&b), b.intersect(&a));
    }
}

proptest! {
    #[test]
    fn intersection_within_both(a in small_rect_strategy(), b in small_rect_strategy()) {
        if let Some(r) = a.intersect(&b) {
            prop_assert!(r.x >= a.x && r.x >= b.x);
            prop_assert!(r.y >= a.y && r.y >= b.y);
            prop_assert!(r.right() <= a.right() && r.right() <= b.right());
            prop_assert!(r.bottom() <= a.bottom() && r.bottom() <= b.bottom());
        }
    }
}

proptest! {
    #[test]
    fn signed_clip_stays_inside(y in -300i32..300, x in -300i32..300, w in 0u16..200, h in 0u16..200) {
        if let Some(r) = Rect::from_signed(Origin::new(y, x), w, h) {
            prop_assert!(i64::from(r.x) >= i64::from(x));
            prop_assert!(i64::from(r.y) >= i64::from(y));
            prop_assert!(i64::from(r.right()) <= i64::from(x) + i64::from(w));
            prop_assert!(i64::from(r.bottom()) <= i64::from(y) + i64::from(h));
            prop_assert!(!r.is_empty());
        }
    }
}

proptest! {
    #[test]
    fn cells_enumerates_area(r in (0u16..40, 0u16..40, 0u16..20, 0u16..20)
        .prop_map(|(x, y, w, h)| Rect::new(x, y, w, h)))
    {
        let cells: Vec<_> = r.cells().collect();
        prop_assert_eq!(cells.len() as u32, r.area());
        for (x, y) in cells {
            prop_assert!(r.contains(x, y));
        }
    }
}
