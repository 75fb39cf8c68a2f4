//! Zoom-scoped setting values.
//!
//! Most per-feature settings (buffer pixels, simplification tolerance, label
//! grid size, ...) are either a constant or a step function of the zoom
//! level. [`ZoomValue`] models both as a small tagged enum with a pure
//! evaluation function, so callers never branch on a runtime type.

/// A value that is either constant or stepped by zoom.
///
/// The `ByZoom` variant holds `(min_zoom, value)` entries sorted ascending;
/// evaluation picks the entry with the highest threshold at or below the
/// requested zoom (most-specific-wins). Below the lowest threshold the value
/// is unset and the caller's default applies.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoomValue<T> {
    Constant(T),
    ByZoom(Vec<(u8, T)>),
}

impl<T> ZoomValue<T> {
    /// Build a step function from `(min_zoom, value)` entries.
    ///
    /// Entries are sorted by threshold; when two entries share a threshold
    /// the first registration wins.
    pub fn by_zoom(mut entries: Vec<(u8, T)>) -> Self {
        entries.sort_by_key(|e| e.0);
        entries.dedup_by(|later, earlier| later.0 == earlier.0);
        ZoomValue::ByZoom(entries)
    }

    /// The value in effect at `zoom`, if any.
    pub fn eval(&self, zoom: u8) -> Option<&T> {
        match self {
            ZoomValue::Constant(v) => Some(v),
            ZoomValue::ByZoom(entries) => entries
                .iter()
                .rev()
                .find(|(min_zoom, _)| *min_zoom <= zoom)
                .map(|(_, v)| v),
        }
    }

    /// The value in effect at `zoom`, or `default` when unset.
    pub fn eval_or(&self, zoom: u8, default: T) -> T
    where
        T: Clone,
    {
        self.eval(zoom).cloned().unwrap_or(default)
    }
}

impl<T> From<T> for ZoomValue<T> {
    fn from(v: T) -> Self {
        ZoomValue::Constant(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let v: ZoomValue<f64> = 4.0.into();
        assert_eq!(v.eval(0), Some(&4.0));
        assert_eq!(v.eval(14), Some(&4.0));
    }

    #[test]
    fn test_step_function_most_specific_wins() {
        let v = ZoomValue::by_zoom(vec![(10, "coarse"), (4, "coarser"), (13, "fine")]);
        assert_eq!(v.eval(3), None, "below the lowest threshold is unset");
        assert_eq!(v.eval(4), Some(&"coarser"));
        assert_eq!(v.eval(9), Some(&"coarser"));
        assert_eq!(v.eval(10), Some(&"coarse"));
        assert_eq!(v.eval(13), Some(&"fine"));
        assert_eq!(v.eval(15), Some(&"fine"));
    }

    #[test]
    fn test_duplicate_threshold_keeps_first_registration() {
        let v = ZoomValue::by_zoom(vec![(8, 1), (8, 2)]);
        assert_eq!(v.eval(8), Some(&1));
    }

    #[test]
    fn test_eval_or_default() {
        let v: ZoomValue<u32> = ZoomValue::by_zoom(vec![(12, 7)]);
        assert_eq!(v.eval_or(11, 99), 99);
        assert_eq!(v.eval_or(12, 99), 7);
    }
}
