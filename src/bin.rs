use serde::{Deserialize, Serialize};

/// Gradient statistics accumulated for one histogram bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub g: f64,
    pub h: f64,
    pub counts: usize,
}

impl Bin {
    #[inline]
    pub fn add(&mut self, g: f32, h: f32) {
        self.g += f64::from(g);
        self.h += f64::from(h);
        self.counts += 1;
    }

    #[inline]
    pub fn merge(&mut self, other: &Bin) {
        self.g += other.g;
        self.h += other.h;
        self.counts += other.counts;
    }

    /// Statistics of `self` with `other` removed. An empty result is exactly zero.
    #[inline]
    pub fn subtract(&self, other: &Bin) -> Bin {
        let counts = self.counts.saturating_sub(other.counts);
        if counts == 0 {
            Bin::default()
        } else {
            Bin {
                g: self.g - other.g,
                h: self.h - other.h,
                counts,
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        self.g.is_finite() && self.h.is_finite()
    }
}
