use itertools::izip;

/// A position in the plane of the survey.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Wrap an angle in degrees into `(-180, 180]`. Non-finite angles give NaN.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return f64::NAN;
    }
    let wrapped = (angle + 180.).rem_euclid(360.) - 180.;
    if wrapped == -180. {
        180.
    } else {
        wrapped
    }
}

/// Angles of incidence in degrees along a path of detector positions.
///
/// For every position the bearing of the direction of travel (the difference to
/// the next position, zero for the last one) minus the bearing of the line from
/// the source to the detector.
pub fn incidence_angles(path: &[Point], source: &Point, out: &mut [f64]) {
    assert!(path.len() == out.len());

    let next = path.iter().skip(1).map(Some).chain(std::iter::once(None));
    izip!(path, next, out.iter_mut()).for_each(|(pos, next, angle)| {
        let (vx, vy) = match next {
            Some(next) => (next.x - pos.x, next.y - pos.y),
            None => (0., 0.),
        };
        let travel = vy.atan2(vx);
        let bearing = (pos.y - source.y).atan2(pos.x - source.x);
        *angle = normalize_angle((travel - bearing).to_degrees());
    });
}

/// Mirrors proposals that wandered far away from the measurements back across
/// the closest measurement position.
#[derive(Debug, Clone)]
pub struct BoundaryReflector {
    positions: Box<[Point]>,
    /// For every position, the largest distance to any other position.
    spread: Box<[f64]>,
}

impl BoundaryReflector {
    pub fn new(positions: &[Point]) -> Self {
        assert!(!positions.is_empty());
        let spread = positions
            .iter()
            .map(|a| {
                positions
                    .iter()
                    .map(|b| a.distance(b))
                    .fold(0f64, f64::max)
            })
            .collect();
        Self {
            positions: positions.into(),
            spread,
        }
    }

    /// Index of the measurement closest to `point`.
    pub fn nearest(&self, point: &Point) -> usize {
        self.positions
            .iter()
            .map(|pos| pos.distance(point))
            .enumerate()
            .fold((0, f64::INFINITY), |(best, best_dist), (idx, dist)| {
                if dist < best_dist {
                    (idx, dist)
                } else {
                    (best, best_dist)
                }
            })
            .0
    }

    /// Reflect `point` across its nearest measurement if it lies farther from
    /// that measurement than any other measurement does.
    ///
    /// Returns true if the point was moved.
    pub fn reflect(&self, point: &mut Point) -> bool {
        let idx = self.nearest(point);
        let nearest = self.positions[idx];
        if nearest.distance(point) <= self.spread[idx] {
            return false;
        }
        point.x -= 2. * (point.x - nearest.x);
        point.y -= 2. * (point.y - nearest.y);
        true
    }
}
