// SPDX-License-Identifier: GPL-3.0-or-later

// Golden section search for the minimum of a unimodal function. Each
// evaluation is a physical move of the printer, so the search is driven from
// the outside: ask for point(), measure it, submit() the result.

// 1/phi
const INV_PHI: f32 = 0.618_034;

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct GoldenSearch {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    fc: Option<f32>,
    fd: Option<f32>,
    best: Option<(f32, f32)>,
}

impl GoldenSearch {
    pub fn new(a: f32, b: f32) -> Self {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        let h = b - a;
        Self {
            a,
            b,
            c: b - h * INV_PHI,
            d: a + h * INV_PHI,
            fc: None,
            fd: None,
            best: None,
        }
    }

    pub fn around(center: f32, window: f32) -> Self {
        Self::new(center - window / 2.0, center + window / 2.0)
    }

    // Next point to evaluate.
    pub fn point(&self) -> f32 {
        if self.fc.is_none() { self.c } else { self.d }
    }

    pub fn submit(&mut self, fx: f32) {
        let x = self.point();
        if self.best.map_or(true, |(_, f)| fx < f) {
            self.best = Some((x, fx));
        }

        if self.fc.is_none() {
            self.fc = Some(fx);
        } else {
            self.fd = Some(fx);
        }

        // Narrow the bracket. One of the two inner points is reused, so only
        // one new evaluation is needed per iteration.
        if let (Some(fc), Some(fd)) = (self.fc, self.fd) {
            if fc < fd {
                self.b = self.d;
                self.d = self.c;
                self.fd = Some(fc);
                self.c = self.b - (self.b - self.a) * INV_PHI;
                self.fc = None;
            } else {
                self.a = self.c;
                self.c = self.d;
                self.fc = Some(fd);
                self.d = self.a + (self.b - self.a) * INV_PHI;
                self.fd = None;
            }
        }
    }

    // Best (x, f(x)) evaluated so far.
    pub fn best(&self) -> Option<(f32, f32)> {
        self.best
    }

    pub fn bracket(&self) -> (f32, f32) {
        (self.a, self.b)
    }
}
